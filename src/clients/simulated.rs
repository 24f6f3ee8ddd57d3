use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::info;

use crate::clients::batch_client::{BatchAdapter, PollStatus};
use crate::error::AdapterError;
use crate::models::{BatchHandle, Outcome, PairRequest};

/// 模拟批处理客户端
///
/// 不发起任何网络请求。结果完全由句柄中的主键推导，
/// 因此跨进程重复调用 `poll` 得到的结果相同。
pub struct SimulatedBatchClient {
    latency: Duration,
    task_id: Option<String>,
}

impl SimulatedBatchClient {
    pub fn new() -> Self {
        Self {
            latency: Duration::zero(),
            task_id: None,
        }
    }

    /// 批次提交后 `secs` 秒内 `poll` 返回 StillRunning
    ///
    /// 超出 `Duration` 表示范围的值按最大值处理。
    pub fn with_latency_secs(mut self, secs: u64) -> Self {
        self.latency = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        self
    }

    pub fn with_task_id(mut self, task_id: Option<String>) -> Self {
        self.task_id = task_id;
        self
    }
}

impl Default for SimulatedBatchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchAdapter for SimulatedBatchClient {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn submit(&self, requests: &[PairRequest]) -> Result<BatchHandle, AdapterError> {
        if requests.is_empty() {
            return Err(AdapterError::EmptyBatch);
        }

        let batch_id = format!("sim_batch_{}", Utc::now().format("%Y%m%d%H%M%S%f"));
        let keys = requests.iter().map(|r| r.key.clone()).collect();
        let mut handle = BatchHandle::new(batch_id, keys);
        handle.task_id = self.task_id.clone();

        info!("🧪 模拟提交批次 {}，共 {} 个请求", handle.batch_id, requests.len());
        Ok(handle)
    }

    async fn poll(&self, handle: &BatchHandle) -> Result<PollStatus, AdapterError> {
        if Utc::now() - handle.submitted_at < self.latency {
            return Ok(PollStatus::StillRunning {
                status: "in_progress".to_string(),
            });
        }

        let outcomes = handle
            .keys
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    Outcome::success(format!("simulated answer for {key}")),
                )
            })
            .collect();
        Ok(PollStatus::Finished(outcomes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkItemKey;

    fn request(entity: &str, question: &str) -> PairRequest {
        PairRequest {
            key: WorkItemKey::new(entity, question),
            body: serde_json::json!({}),
        }
    }

    #[test]
    fn test_submit_then_poll_is_deterministic() {
        tokio_test::block_on(async {
            let client = SimulatedBatchClient::new().with_task_id(Some("7".to_string()));
            let handle = client
                .submit(&[request("M1", "Q1"), request("M2", "Q1")])
                .await
                .unwrap();
            assert_eq!(handle.keys.len(), 2);
            assert_eq!(handle.task_id.as_deref(), Some("7"));

            let first = client.poll(&handle).await.unwrap();
            let second = client.poll(&handle).await.unwrap();
            assert_eq!(first, second);

            match first {
                PollStatus::Finished(outcomes) => {
                    assert_eq!(outcomes.len(), 2);
                    assert_eq!(
                        outcomes[0].1,
                        Outcome::success("simulated answer for M1/Q1")
                    );
                }
                other => panic!("unexpected poll status: {other:?}"),
            }
        });
    }

    #[test]
    fn test_latency_reports_still_running() {
        tokio_test::block_on(async {
            let client = SimulatedBatchClient::new().with_latency_secs(3600);
            let handle = client.submit(&[request("M1", "Q1")]).await.unwrap();
            assert!(matches!(
                client.poll(&handle).await.unwrap(),
                PollStatus::StillRunning { .. }
            ));
        });
    }

    #[test]
    fn test_huge_latency_does_not_overflow() {
        tokio_test::block_on(async {
            let client = SimulatedBatchClient::new().with_latency_secs(u64::MAX);
            let handle = client.submit(&[request("M1", "Q1")]).await.unwrap();
            assert!(matches!(
                client.poll(&handle).await.unwrap(),
                PollStatus::StillRunning { .. }
            ));
        });
    }

    #[test]
    fn test_empty_submit_is_rejected() {
        tokio_test::block_on(async {
            let client = SimulatedBatchClient::new();
            assert!(matches!(
                client.submit(&[]).await,
                Err(AdapterError::EmptyBatch)
            ));
        });
    }
}
