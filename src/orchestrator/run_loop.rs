//! 运行循环 - 编排层
//!
//! ## 职责
//!
//! 每次调用只推进一步，然后退出，由外部调度器反复调用直到全部工作项进入终态：
//!
//! 1. 检查点已全部完成 → 直接返回 "finished"（只清除可能残留的批次句柄）
//! 2. 加载队列；首次运行时构建市镇 × 问题的完整组合并立即保存
//! 3. 存在未完成批次 → 查询一次：
//!    - 仍在运行 → 返回 "batch still running"
//!    - 已结束 → 合并结果，追加结果 / 错误，保存队列，清除句柄
//! 4. 仍有 Pending 工作项 → 提交一个新批次，保存句柄和队列，返回 "running another batch"
//! 5. 否则全部进入终态 → 返回 "finished"
//!
//! 每次调用最多查询一次、最多提交一次。
//!
//! ## 持久化顺序
//!
//! - 合并：结果 → 错误 → 队列 → 清除句柄。任何一步之后崩溃，下次运行会重新查询同一批次，
//!   合并会跳过已终态的工作项，追加会跳过已存在的主键。
//! - 提交：句柄 → 队列。两者之间崩溃时，下次运行会把句柄中仍为 Pending 的工作项补记为 Submitted。

use chrono::Utc;
use std::fmt;
use tracing::{debug, info, warn};

use crate::clients::{BatchAdapter, PollStatus};
use crate::config::Config;
use crate::error::{AppResult, CheckpointError};
use crate::infrastructure::CheckpointStore;
use crate::models::{BatchHandle, PairQueue, QueueCounts, SourceCatalog, WorkItemKey, WorkStatus};
use crate::services::{merge, CatalogSource, RequestBuilder};

/// 检查点所处的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// 还没有队列（首次运行）
    NoQueue,
    /// 队列已建立，没有未完成的批次
    QueueBuiltNoBatch,
    /// 有一个批次在等待结果
    BatchOutstanding,
    /// 全部工作项已进入终态
    AllTerminal,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NoQueue => write!(f, "no_queue"),
            RunState::QueueBuiltNoBatch => write!(f, "queue_built_no_batch"),
            RunState::BatchOutstanding => write!(f, "batch_outstanding"),
            RunState::AllTerminal => write!(f, "all_terminal"),
        }
    }
}

/// 单次调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 全部完成，无需再调用
    Finished,
    /// 批次仍在运行，稍后再调用
    BatchStillRunning,
    /// 已提交新批次，稍后再调用
    SubmittedBatch,
}

impl RunOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunOutcome::Finished)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Finished => write!(f, "finished"),
            RunOutcome::BatchStillRunning => write!(f, "batch still running"),
            RunOutcome::SubmittedBatch => write!(f, "running another batch"),
        }
    }
}

/// 合并统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub batch_id: String,
    pub completed: usize,
    pub errored: usize,
    pub missing: usize,
    pub skipped: usize,
}

/// 单次调用的报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub counts: QueueCounts,
    /// 本次查询或提交的批次
    pub batch_id: Option<String>,
    /// 本次提交的工作项数
    pub submitted: usize,
    pub merged: Option<MergeStats>,
}

impl RunReport {
    fn new(outcome: RunOutcome, counts: QueueCounts) -> Self {
        Self {
            outcome,
            counts,
            batch_id: None,
            submitted: 0,
            merged: None,
        }
    }

    /// 调用结束后检查点所处的状态
    pub fn state(&self) -> RunState {
        match self.outcome {
            RunOutcome::Finished => RunState::AllTerminal,
            RunOutcome::BatchStillRunning | RunOutcome::SubmittedBatch => {
                RunState::BatchOutstanding
            }
        }
    }
}

/// 运行循环编排器
pub struct Orchestrator {
    config: Config,
    store: CheckpointStore,
    adapter: Box<dyn BatchAdapter>,
    catalog_source: Box<dyn CatalogSource>,
    builder: RequestBuilder,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        store: CheckpointStore,
        adapter: Box<dyn BatchAdapter>,
        catalog_source: Box<dyn CatalogSource>,
    ) -> Self {
        let builder = RequestBuilder::new(&config);
        Self {
            config,
            store,
            adapter,
            catalog_source,
            builder,
        }
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// 从检查点推导当前状态（不发起网络请求）
    pub fn current_state(&self) -> AppResult<RunState> {
        checkpoint_state(&self.store)
    }

    /// 推进一步
    pub async fn run_once(&self) -> AppResult<RunReport> {
        // ========== 1. 已完成则直接返回 ==========
        if self.store.queue_exists() && !self.store.has_pending_work()? {
            // 上次运行在保存队列之后、清除句柄之前中断
            if let Some(handle) = self.store.load_batch_handle()? {
                warn!("⚠️ 队列已全部完成，清除残留的批次句柄 {}", handle.batch_id);
                self.store.clear_batch_handle()?;
            }
            let counts = self
                .store
                .load_summary()?
                .map(|summary| summary.counts)
                .unwrap_or_default();
            info!("✅ 检查点已全部完成，无需处理");
            return Ok(RunReport::new(RunOutcome::Finished, counts));
        }

        // ========== 2. 加载或构建队列 ==========
        let mut catalog: Option<SourceCatalog> = None;
        let mut queue = match self.store.load_queue()? {
            Some(queue) => {
                info!("📂 已加载队列: {} 个工作项", queue.len());
                queue
            }
            None => {
                let loaded = self.load_catalog().await?;
                let queue = PairQueue::build(
                    &loaded.entity_ids(),
                    &loaded.question_ids(),
                    &self.config.excluded_questions,
                );
                info!(
                    "🆕 首次运行，已构建队列: {} 个市镇 × {} 个问题 → {} 个工作项",
                    loaded.municipalities().len(),
                    loaded.questions().len(),
                    queue.len()
                );
                self.store.save_queue(&queue)?;
                catalog = Some(loaded);
                queue
            }
        };

        let mut merged = None;

        // ========== 3. 查询未完成的批次 ==========
        if let Some(handle) = self.store.load_batch_handle()? {
            let repaired = reconcile(&mut queue, &handle)?;
            self.warn_if_stalled(&handle);

            info!("🔍 查询批次 {} ({} 个请求)...", handle.batch_id, handle.keys.len());
            match self.adapter.poll(&handle).await? {
                PollStatus::StillRunning { status } => {
                    if repaired > 0 {
                        self.store.save_queue(&queue)?;
                    }
                    info!("⏳ 批次 {} 仍在运行 (状态: {})", handle.batch_id, status);
                    let mut report = RunReport::new(RunOutcome::BatchStillRunning, queue.counts());
                    report.batch_id = Some(handle.batch_id);
                    return Ok(report);
                }
                PollStatus::Finished(outcomes) => {
                    info!("📥 批次 {} 已结束，返回 {} 条结果", handle.batch_id, outcomes.len());
                    let report = merge(&mut queue, &handle, outcomes)?;

                    self.store.append_results(&report.new_results)?;
                    self.store.append_errors(&report.new_errors)?;
                    self.store.save_queue(&queue)?;
                    self.store.clear_batch_handle()?;

                    merged = Some(MergeStats {
                        batch_id: handle.batch_id.clone(),
                        completed: report.new_results.len(),
                        errored: report.new_errors.len(),
                        missing: report.missing,
                        skipped: report.skipped,
                    });
                }
            }
        }

        // ========== 4. 提交新批次 ==========
        let pending: Vec<WorkItemKey> = queue
            .select_pending()
            .into_iter()
            .take(self.config.max_batch_size)
            .map(|item| item.key())
            .collect();

        if !pending.is_empty() {
            let catalog = match catalog {
                Some(catalog) => catalog,
                None => self.load_catalog().await?,
            };
            let requests = pending
                .iter()
                .map(|key| self.builder.build_pair_request(&catalog, key))
                .collect::<AppResult<Vec<_>>>()?;

            info!(
                "📤 通过 {} 适配器提交 {} 个请求...",
                self.adapter.name(),
                requests.len()
            );
            let mut handle = self.adapter.submit(&requests).await?;
            if handle.task_id.is_none() {
                handle.task_id = self.config.task_id.clone();
            }

            queue.mark_submitted(&handle.keys, &handle.batch_id)?;
            self.store.save_batch_handle(&handle)?;
            self.store.save_queue(&queue)?;

            let mut report = RunReport::new(RunOutcome::SubmittedBatch, queue.counts());
            report.submitted = handle.keys.len();
            report.batch_id = Some(handle.batch_id);
            report.merged = merged;
            return Ok(report);
        }

        // ========== 5. 全部完成 ==========
        let counts = queue.counts();
        if counts.submitted > 0 {
            return Err(CheckpointError::OrphanedSubmissions {
                count: counts.submitted,
            }
            .into());
        }

        let mut report = RunReport::new(RunOutcome::Finished, counts);
        report.batch_id = merged.as_ref().map(|m| m.batch_id.clone());
        report.merged = merged;
        Ok(report)
    }

    async fn load_catalog(&self) -> AppResult<SourceCatalog> {
        let catalog = self
            .catalog_source
            .load()
            .await?
            .sampled(self.config.sample_size);
        catalog.ensure_not_empty()?;
        debug!(
            "数据源: {} 个市镇, {} 个问题",
            catalog.municipalities().len(),
            catalog.questions().len()
        );
        Ok(catalog)
    }

    fn warn_if_stalled(&self, handle: &BatchHandle) {
        let age = handle.age_hours(Utc::now());
        if self.config.stall_warn_hours > 0 && age >= self.config.stall_warn_hours as f64 {
            warn!(
                "⚠️ 批次 {} 已提交 {:.1} 小时仍未完成（提交于 {}），可能需要人工处理",
                handle.batch_id, age, handle.submitted_at
            );
        }
    }
}

/// 从检查点推导状态
pub fn checkpoint_state(store: &CheckpointStore) -> AppResult<RunState> {
    let Some(queue) = store.load_queue()? else {
        return Ok(RunState::NoQueue);
    };
    if queue.is_complete() {
        return Ok(RunState::AllTerminal);
    }
    if store.load_batch_handle()?.is_some() {
        Ok(RunState::BatchOutstanding)
    } else {
        Ok(RunState::QueueBuiltNoBatch)
    }
}

/// 句柄已保存但队列未更新（上次运行在两次保存之间中断）时，
/// 把句柄中仍为 Pending 的工作项补记为 Submitted；返回补记的数量
fn reconcile(queue: &mut PairQueue, handle: &BatchHandle) -> AppResult<usize> {
    let stale: Vec<WorkItemKey> = handle
        .keys
        .iter()
        .filter(|key| {
            queue
                .get(key)
                .is_some_and(|item| item.status() == WorkStatus::Pending)
        })
        .cloned()
        .collect();

    if !stale.is_empty() {
        warn!(
            "⚠️ 批次 {} 中有 {} 个工作项仍为 Pending，补记为已提交",
            handle.batch_id,
            stale.len()
        );
        queue.mark_submitted(&stale, &handle.batch_id)?;
    }
    Ok(stale.len())
}
