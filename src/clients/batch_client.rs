//! 批处理适配器接口
//!
//! 编排器只通过这个 trait 与批处理服务交互：
//! - `submit`：提交一组待处理请求，返回批次句柄
//! - `poll`：查询批次，返回"仍在运行"或全部结果

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::models::{BatchHandle, Outcome, PairRequest, WorkItemKey};

/// 批次查询结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// 批次尚未完成，`status` 为服务端原始状态
    StillRunning { status: String },
    /// 批次已结束；结果可能不覆盖全部工作项，缺失的由合并阶段处理
    Finished(Vec<(WorkItemKey, Outcome)>),
}

#[async_trait]
pub trait BatchAdapter: Send + Sync {
    /// 适配器名称（仅用于日志）
    fn name(&self) -> &'static str;

    /// 提交一个非空的请求集合
    async fn submit(&self, requests: &[PairRequest]) -> Result<BatchHandle, AdapterError>;

    /// 查询批次状态
    async fn poll(&self, handle: &BatchHandle) -> Result<PollStatus, AdapterError>;
}

/// 请求在批次中的 custom_id
pub fn custom_id(index: usize) -> String {
    format!("req-{index}")
}

/// 根据 custom_id 找回对应的工作项
pub fn key_for_custom_id<'a>(handle: &'a BatchHandle, custom_id: &str) -> Option<&'a WorkItemKey> {
    custom_id
        .strip_prefix("req-")
        .and_then(|index| index.parse::<usize>().ok())
        .and_then(|index| handle.keys.get(index))
}
