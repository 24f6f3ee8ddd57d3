//! 数据源服务
//!
//! 提供完整的市镇列表和问题列表。编排器只在需要时（建队列 / 构建请求）才加载。

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::AppResult;
use crate::models::{load_municipalities, load_questions, Municipality, Question, SourceCatalog};

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// 加载完整的市镇与问题列表（未做抽样和排除）
    async fn load(&self) -> AppResult<SourceCatalog>;
}

/// 从两个 TOML 文件加载
pub struct TomlCatalog {
    municipalities_file: PathBuf,
    questions_file: PathBuf,
}

impl TomlCatalog {
    pub fn new(municipalities_file: impl Into<PathBuf>, questions_file: impl Into<PathBuf>) -> Self {
        Self {
            municipalities_file: municipalities_file.into(),
            questions_file: questions_file.into(),
        }
    }
}

#[async_trait]
impl CatalogSource for TomlCatalog {
    async fn load(&self) -> AppResult<SourceCatalog> {
        let municipalities = load_municipalities(&self.municipalities_file).await?;
        let questions = load_questions(&self.questions_file).await?;
        Ok(SourceCatalog::new(municipalities, questions))
    }
}

/// 内存中的固定列表
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    catalog: SourceCatalog,
}

impl StaticCatalog {
    pub fn new(municipalities: Vec<Municipality>, questions: Vec<Question>) -> Self {
        Self {
            catalog: SourceCatalog::new(municipalities, questions),
        }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn load(&self) -> AppResult<SourceCatalog> {
        Ok(self.catalog.clone())
    }
}
