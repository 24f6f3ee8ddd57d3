use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::work_item::WorkItemKey;

/// 批次句柄
///
/// 标识一个已提交、尚未取回结果的批次，以及它覆盖的全部工作项。
/// 同一时刻最多只有一个句柄处于未完成状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHandle {
    pub batch_id: String,
    /// 按提交顺序排列，下标即请求的 custom_id 序号
    pub keys: Vec<WorkItemKey>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl BatchHandle {
    pub fn new(batch_id: impl Into<String>, keys: Vec<WorkItemKey>) -> Self {
        Self {
            batch_id: batch_id.into(),
            keys,
            submitted_at: Utc::now(),
            input_file_id: None,
            task_id: None,
        }
    }

    /// 批次已提交的小时数
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.submitted_at).num_seconds() as f64 / 3600.0
    }
}

/// 成功结果记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub entity_id: String,
    pub question_id: String,
    pub payload: String,
    pub batch_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// 失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub entity_id: String,
    pub question_id: String,
    pub detail: String,
    pub batch_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// 可按主键去重的记录
pub trait Keyed {
    fn key(&self) -> WorkItemKey;
}

impl Keyed for ResultRecord {
    fn key(&self) -> WorkItemKey {
        WorkItemKey::new(self.entity_id.clone(), self.question_id.clone())
    }
}

impl Keyed for ErrorRecord {
    fn key(&self) -> WorkItemKey {
        WorkItemKey::new(self.entity_id.clone(), self.question_id.clone())
    }
}

/// 提交给批处理服务的单个请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRequest {
    pub key: WorkItemKey,
    /// 服务端请求体（如 chat completion 请求）
    pub body: serde_json::Value,
}
