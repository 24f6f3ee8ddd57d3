//! 工作项模型
//!
//! 一个工作项 = 一个（市镇, 问题）组合，状态只能单向推进：
//! `Pending → Submitted → Completed | Errored`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransitionError;

/// 工作项主键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemKey {
    pub entity_id: String,
    pub question_id: String,
}

impl WorkItemKey {
    pub fn new(entity_id: impl Into<String>, question_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            question_id: question_id.into(),
        }
    }
}

impl fmt::Display for WorkItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.question_id)
    }
}

/// 工作项状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// 等待提交
    Pending,
    /// 已随某个批次提交，等待结果
    Submitted,
    /// 已拿到结果
    Completed,
    /// 失败（包括结果缺失）
    Errored,
}

impl WorkStatus {
    /// 终态：之后不允许任何转换
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }

    /// 状态机允许的单步转换
    pub fn can_transition_to(&self, next: WorkStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Submitted)
                | (Self::Submitted, Self::Completed)
                | (Self::Submitted, Self::Errored)
        )
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Submitted => write!(f, "submitted"),
            Self::Completed => write!(f, "completed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// 单个工作项在批次中的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success { payload: String },
    Failure { detail: String },
}

impl Outcome {
    pub fn success(payload: impl Into<String>) -> Self {
        Outcome::Success {
            payload: payload.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Outcome::Failure {
            detail: detail.into(),
        }
    }

    fn target_status(&self) -> WorkStatus {
        match self {
            Outcome::Success { .. } => WorkStatus::Completed,
            Outcome::Failure { .. } => WorkStatus::Errored,
        }
    }
}

/// 工作项
///
/// 字段私有，只能通过 [`crate::models::PairQueue`] 的转换操作修改，
/// 保证 `payload` 仅在 Completed 时存在、`error_detail` 仅在 Errored 时存在。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    entity_id: String,
    question_id: String,
    status: WorkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,
}

impl WorkItem {
    /// 创建新的待处理工作项
    pub fn pending(key: WorkItemKey) -> Self {
        Self {
            entity_id: key.entity_id,
            question_id: key.question_id,
            status: WorkStatus::Pending,
            batch_id: None,
            payload: None,
            error_detail: None,
        }
    }

    pub fn key(&self) -> WorkItemKey {
        WorkItemKey::new(self.entity_id.clone(), self.question_id.clone())
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn question_id(&self) -> &str {
        &self.question_id
    }

    pub fn status(&self) -> WorkStatus {
        self.status
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.batch_id.as_deref()
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    /// 检查字段与状态是否一致（用于加载检查点后的校验）
    pub(crate) fn is_consistent(&self) -> bool {
        match self.status {
            WorkStatus::Pending => {
                self.batch_id.is_none() && self.payload.is_none() && self.error_detail.is_none()
            }
            WorkStatus::Submitted => {
                self.batch_id.is_some() && self.payload.is_none() && self.error_detail.is_none()
            }
            WorkStatus::Completed => self.payload.is_some() && self.error_detail.is_none(),
            WorkStatus::Errored => self.payload.is_none() && self.error_detail.is_some(),
        }
    }

    fn check(&self, next: WorkStatus) -> Result<(), TransitionError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                key: self.key(),
                from: self.status,
                to: next,
            })
        }
    }

    pub(crate) fn check_submit(&self) -> Result<(), TransitionError> {
        self.check(WorkStatus::Submitted)
    }

    pub(crate) fn submit(&mut self, batch_id: &str) -> Result<(), TransitionError> {
        self.check_submit()?;
        self.status = WorkStatus::Submitted;
        self.batch_id = Some(batch_id.to_string());
        Ok(())
    }

    pub(crate) fn resolve(&mut self, outcome: Outcome) -> Result<(), TransitionError> {
        self.check(outcome.target_status())?;
        match outcome {
            Outcome::Success { payload } => {
                self.status = WorkStatus::Completed;
                self.payload = Some(payload);
            }
            Outcome::Failure { detail } => {
                self.status = WorkStatus::Errored;
                self.error_detail = Some(detail);
            }
        }
        Ok(())
    }
}
