//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `run_loop` - 运行循环状态机
//! - 加载 / 构建组合队列
//! - 决定本次是查询批次还是提交新批次
//! - 合并结果并持久化
//!
//! ### `app` - 应用入口
//! - 校验配置，选择在线或模拟适配器
//! - 输出启动信息和运行统计
//! - 只读的状态查看
//!
//! ## 层次关系
//!
//! ```text
//! app (一次进程调用)
//!     ↓
//! run_loop::Orchestrator (推进一步)
//!     ↓
//! services (request_builder / result_merger / catalog)
//!     ↓
//! clients (BatchAdapter) + infrastructure (CheckpointStore)
//! ```

pub mod app;
pub mod run_loop;

pub use app::{App, ExitSignal, StatusSnapshot};
pub use run_loop::{Orchestrator, RunOutcome, RunReport, RunState};
