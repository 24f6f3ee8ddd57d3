/// 日志工具模块
///
/// 提供日志初始化和格式化输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::QueueCounts;
use crate::orchestrator::run_loop::{MergeStats, RunReport};

/// 初始化日志
///
/// 优先使用 `RUST_LOG`，否则默认 `info`（详细模式下为 `debug`）。
/// 重复调用是安全的。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 程序配置
/// - `output_folder`: 检查点目录名
/// - `adapter`: 批处理适配器名称
pub fn log_startup(config: &Config, output_folder: &str, adapter: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量问答模式");
    info!("📁 输出目录: {}", output_folder);
    info!("🤖 模型: {} | 上下文段数: {}", config.model_id, config.context_length);
    info!("🔌 批处理适配器: {}", adapter);
    if let Some(task_id) = &config.task_id {
        info!("🏷️ 任务 ID: {}", task_id);
    }
    match config.sample_size {
        Some(n) => info!("📊 抽样: 前 {} 个市镇", n),
        None => info!("📊 抽样: 全部市镇"),
    }
    info!("{}", "=".repeat(60));
}

/// 记录队列统计
pub fn log_queue_counts(counts: &QueueCounts) {
    info!(
        "📋 队列: 共 {} | 待提交 {} | 已提交 {} | 完成 {} | 失败 {}",
        counts.total(),
        counts.pending,
        counts.submitted,
        counts.completed,
        counts.errored
    );
}

/// 记录批次合并信息
pub fn log_merge(stats: &MergeStats) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 批次 {} 合并完成", stats.batch_id);
    info!("✅ 成功: {}", stats.completed);
    info!("❌ 失败: {} (其中结果缺失 {})", stats.errored, stats.missing);
    if stats.skipped > 0 {
        info!("⏭️ 跳过: {}", stats.skipped);
    }
    info!("{}", "─".repeat(60));
}

/// 打印本次运行的最终统计
pub fn log_run_report(report: &RunReport) {
    if let Some(stats) = &report.merged {
        log_merge(stats);
    }

    info!("\n{}", "=".repeat(60));
    info!("📊 本次运行结果: {}", report.outcome);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    if report.submitted > 0 {
        if let Some(batch_id) = &report.batch_id {
            info!("📤 已提交批次 {}: {} 个请求", batch_id, report.submitted);
        }
    }
    log_queue_counts(&report.counts);
    info!("{}", "=".repeat(60));
}
