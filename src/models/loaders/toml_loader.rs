use crate::error::SourceError;
use crate::models::source::{Municipality, Question};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Deserialize)]
struct MunicipalityFile {
    #[serde(default)]
    municipalities: Vec<Municipality>,
}

#[derive(Debug, Deserialize)]
struct QuestionFile {
    #[serde(default)]
    questions: Vec<Question>,
}

async fn read_toml(path: &Path) -> Result<String, SourceError> {
    fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::ReadFailed {
            path: path.display().to_string(),
            source,
        })
}

/// 从 TOML 文件加载市镇列表（保持文件中的顺序）
pub async fn load_municipalities(path: &Path) -> Result<Vec<Municipality>, SourceError> {
    let content = read_toml(path).await?;

    let file: MunicipalityFile =
        toml::from_str(&content).map_err(|source| SourceError::ParseFailed {
            path: path.display().to_string(),
            source,
        })?;

    tracing::info!(
        "成功加载 {} 个市镇: {}",
        file.municipalities.len(),
        path.file_name().unwrap_or_default().to_string_lossy()
    );

    Ok(file.municipalities)
}

/// 从 TOML 文件加载问题列表
pub async fn load_questions(path: &Path) -> Result<Vec<Question>, SourceError> {
    let content = read_toml(path).await?;

    let file: QuestionFile = toml::from_str(&content).map_err(|source| SourceError::ParseFailed {
        path: path.display().to_string(),
        source,
    })?;

    tracing::info!("成功加载 {} 个问题", file.questions.len());

    Ok(file.questions)
}
