use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::SourceError;

/// 市镇
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Municipality {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// 市镇相关的文本片段，按相关度排列
    #[serde(default)]
    pub context: Vec<String>,
}

impl Municipality {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: None,
            context: Vec::new(),
        }
    }

    /// 显示名（带州缩写）
    pub fn display_name(&self) -> String {
        match &self.state {
            Some(state) => format!("{}, {}", self.name, state),
            None => self.name.clone(),
        }
    }
}

/// 问题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
}

impl Question {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// 市镇与问题的完整列表
///
/// 构建时为两个列表建立主键索引，查找为 O(1)；主键重复时以第一次出现为准。
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    municipalities: Vec<Municipality>,
    questions: Vec<Question>,
    municipality_index: HashMap<String, usize>,
    question_index: HashMap<String, usize>,
}

impl SourceCatalog {
    pub fn new(municipalities: Vec<Municipality>, questions: Vec<Question>) -> Self {
        let municipality_index = index_by(&municipalities, |m| &m.id);
        let question_index = index_by(&questions, |q| &q.id);
        Self {
            municipalities,
            questions,
            municipality_index,
            question_index,
        }
    }

    /// 按抽样大小截取市镇列表（`None` 表示全部）
    pub fn sampled(self, sample_size: Option<usize>) -> Self {
        match sample_size {
            Some(n) if n < self.municipalities.len() => {
                let mut municipalities = self.municipalities;
                municipalities.truncate(n);
                Self::new(municipalities, self.questions)
            }
            _ => self,
        }
    }

    pub fn municipalities(&self) -> &[Municipality] {
        &self.municipalities
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.municipalities.iter().map(|m| m.id.clone()).collect()
    }

    pub fn question_ids(&self) -> Vec<String> {
        self.questions.iter().map(|q| q.id.clone()).collect()
    }

    pub fn municipality(&self, entity_id: &str) -> Result<&Municipality, SourceError> {
        self.municipality_index
            .get(entity_id)
            .map(|&i| &self.municipalities[i])
            .ok_or_else(|| SourceError::UnknownEntity {
                entity_id: entity_id.to_string(),
            })
    }

    pub fn question(&self, question_id: &str) -> Result<&Question, SourceError> {
        self.question_index
            .get(question_id)
            .map(|&i| &self.questions[i])
            .ok_or_else(|| SourceError::UnknownQuestion {
                question_id: question_id.to_string(),
            })
    }

    pub fn ensure_not_empty(&self) -> Result<(), SourceError> {
        if self.municipalities.is_empty() {
            return Err(SourceError::Empty {
                what: "市镇".to_string(),
            });
        }
        if self.questions.is_empty() {
            return Err(SourceError::Empty {
                what: "问题".to_string(),
            });
        }
        Ok(())
    }
}

fn index_by<T>(items: &[T], id: impl Fn(&T) -> &String) -> HashMap<String, usize> {
    let mut index = HashMap::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        index.entry(id(item).clone()).or_insert(i);
    }
    index
}
