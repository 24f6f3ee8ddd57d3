use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use muni_qa_batch::utils::logging;
use muni_qa_batch::{App, AppError, Config, ExitSignal};
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "muni_qa_batch")]
#[command(about = "Resumable batch question answering over municipality/question pairs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Advance the checkpoint by one step (poll once, submit once)
    Run {
        /// Checkpoint folder name under the processed data directory
        output_folder: String,
        /// Task identifier recorded with each submitted batch
        task_id: Option<String>,
        /// Use the offline simulated batch adapter
        #[arg(long)]
        fake_batch: bool,
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the checkpoint state without touching the network
    Status {
        output_folder: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            output_folder,
            task_id,
            fake_batch,
            config,
        } => run(output_folder, task_id, fake_batch, config).await,
        Commands::Status {
            output_folder,
            config,
        } => status(output_folder, config),
    };

    match result {
        Ok(signal) => ExitCode::from(signal.code()),
        Err(e) => report_error(&e),
    }
}

/// 暂时性错误提示稍后重试，其余错误输出 `fatal: <原因>`
fn report_error(e: &anyhow::Error) -> ExitCode {
    let app_error = e.downcast_ref::<AppError>();
    let signal = app_error.map_or(ExitSignal::Fatal, ExitSignal::for_error);

    if signal == ExitSignal::InProgress {
        warn!("⚠️ 本次调用失败，检查点未改动，稍后重试: {:#}", e);
        println!("retry later: {:#}", e);
    } else {
        error!("❌ {:#}", e);
        if app_error.is_some_and(AppError::is_invariant_violation) {
            error!("❌ 检查点保持在上次成功保存的状态，需要人工检查");
        }
        println!("fatal: {:#}", e);
    }
    ExitCode::from(signal.code())
}

async fn run(
    output_folder: String,
    task_id: Option<String>,
    fake_batch: bool,
    config_path: Option<PathBuf>,
) -> Result<ExitSignal> {
    let mut config = Config::load(config_path.as_deref()).context("加载配置失败")?;
    if task_id.is_some() {
        config.task_id = task_id;
    }
    if fake_batch {
        config.fake_batch = true;
    }
    logging::init(config.verbose_logging);

    let app = App::initialize(config, &output_folder)?;
    let report = app.run().await?;

    println!("{}", report.outcome);
    Ok(ExitSignal::for_report(&report))
}

fn status(output_folder: String, config_path: Option<PathBuf>) -> Result<ExitSignal> {
    let config = Config::load(config_path.as_deref()).context("加载配置失败")?;
    logging::init(config.verbose_logging);

    let snapshot = App::status(&config, &output_folder)
        .with_context(|| format!("读取检查点 {} 失败", output_folder))?;
    let counts = snapshot.counts;

    println!("state: {}", snapshot.state);
    println!(
        "pending: {} | submitted: {} | completed: {} | errored: {} | total: {}",
        counts.pending,
        counts.submitted,
        counts.completed,
        counts.errored,
        counts.total()
    );
    if let Some(handle) = &snapshot.outstanding_batch {
        println!(
            "outstanding batch: {} ({} requests, submitted at {})",
            handle.batch_id,
            handle.keys.len(),
            handle.submitted_at
        );
    }
    println!("results: {} | errors: {}", snapshot.results, snapshot.errors);

    Ok(ExitSignal::Finished)
}
