//! # Muni QA Batch
//!
//! 针对"市镇 × 问题"组合的可恢复批量问答编排器
//!
//! ## 架构设计
//!
//! 每次进程调用只推进一步（查询一次、提交一次），状态全部保存在检查点目录中，
//! 由外部调度器反复调用直到输出 `finished`。
//!
//! ### ① 模型层（Models）
//! - `models/` - 工作项、组合队列、批次句柄、结果 / 错误记录、数据源
//! - `PairQueue` - 唯一的状态机持有者，保证状态只能单向推进
//!
//! ### ② 基础设施层（Infrastructure）
//! - `infrastructure/` - 检查点目录的原子读写
//! - `CheckpointStore` - 队列、结果、错误、批次句柄的持久化
//!
//! ### ③ 客户端层（Clients）
//! - `clients/` - 批处理适配器
//! - `OpenAiBatchClient` - OpenAI Batch API
//! - `SimulatedBatchClient` - 离线模拟，用于测试
//!
//! ### ④ 业务能力层（Services）
//! - `services/` - 数据源加载、请求构建、结果合并
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/run_loop` - 单步运行状态机
//! - `orchestrator/app` - 应用初始化和状态查看
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use clients::{BatchAdapter, OpenAiBatchClient, PollStatus, SimulatedBatchClient};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::CheckpointStore;
pub use models::{
    BatchHandle, Municipality, Outcome, PairQueue, Question, SourceCatalog, WorkItem, WorkItemKey,
    WorkStatus,
};
pub use orchestrator::{
    App, ExitSignal, Orchestrator, RunOutcome, RunReport, RunState, StatusSnapshot,
};
pub use services::{CatalogSource, StaticCatalog, TomlCatalog};
