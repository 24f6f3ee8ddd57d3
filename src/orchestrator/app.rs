//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：校验配置、选择批处理适配器（在线 / 模拟）、定位检查点目录
//! 2. **单步运行**：委托 [`Orchestrator`] 推进一步并输出统计
//! 3. **状态查看**：只读检查点，不发起网络请求

use tracing::info;

use crate::clients::{BatchAdapter, OpenAiBatchClient, SimulatedBatchClient};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::CheckpointStore;
use crate::models::{BatchHandle, QueueCounts};
use crate::orchestrator::run_loop::{checkpoint_state, Orchestrator, RunReport, RunState};
use crate::services::TomlCatalog;
use crate::utils::logging;

/// 调度器看到的退出信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    /// 全部完成
    Finished,
    /// 仍在进行（包括暂时性错误），稍后再调用
    InProgress,
    /// 需要人工处理
    Fatal,
}

impl ExitSignal {
    pub fn for_report(report: &RunReport) -> Self {
        if report.outcome.is_finished() {
            ExitSignal::Finished
        } else {
            ExitSignal::InProgress
        }
    }

    pub fn for_error(error: &AppError) -> Self {
        if error.is_retryable() {
            ExitSignal::InProgress
        } else {
            ExitSignal::Fatal
        }
    }

    /// 进程退出码：0 完成，75 稍后再调用（EX_TEMPFAIL），1 致命错误
    pub fn code(&self) -> u8 {
        match self {
            ExitSignal::Finished => 0,
            ExitSignal::InProgress => 75,
            ExitSignal::Fatal => 1,
        }
    }
}

/// 应用主结构
pub struct App {
    orchestrator: Orchestrator,
}

/// 检查点状态快照
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: RunState,
    pub counts: QueueCounts,
    pub outstanding_batch: Option<BatchHandle>,
    pub results: usize,
    pub errors: usize,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config, output_folder: &str) -> AppResult<Self> {
        config.validate()?;

        let adapter: Box<dyn BatchAdapter> = if config.fake_batch {
            Box::new(
                SimulatedBatchClient::new()
                    .with_latency_secs(config.sim_latency_secs)
                    .with_task_id(config.task_id.clone()),
            )
        } else {
            Box::new(OpenAiBatchClient::new(&config, output_folder)?)
        };

        logging::log_startup(&config, output_folder, adapter.name());

        let store = CheckpointStore::for_output(&config.processed_data_dir, output_folder);
        info!("💾 检查点目录: {}", store.folder().display());

        let catalog = TomlCatalog::new(
            config.municipalities_file.clone(),
            config.questions_file.clone(),
        );

        Ok(Self {
            orchestrator: Orchestrator::new(config, store, adapter, Box::new(catalog)),
        })
    }

    /// 推进一步
    pub async fn run(&self) -> AppResult<RunReport> {
        let report = self.orchestrator.run_once().await?;
        logging::log_run_report(&report);
        Ok(report)
    }

    /// 读取检查点状态（不需要 API Key，也不发起网络请求）
    pub fn status(config: &Config, output_folder: &str) -> AppResult<StatusSnapshot> {
        let store = CheckpointStore::for_output(&config.processed_data_dir, output_folder);
        let state = checkpoint_state(&store)?;
        let counts = store
            .load_queue()?
            .map(|queue| queue.counts())
            .unwrap_or_default();

        Ok(StatusSnapshot {
            state,
            counts,
            outstanding_batch: store.load_batch_handle()?,
            results: store.load_results()?.len(),
            errors: store.load_errors()?.len(),
        })
    }
}
