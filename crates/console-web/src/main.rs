//! console-web CLI: live summary of an instrumented tokio process.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use console_web_core::config::Config;
use console_web_core::details::{HdrDecoder, TaskDetailsView, TimesDetails, watch_task_details};
use console_web_core::error::format_error_with_remediation;
use console_web_core::ids::SpanId;
use console_web_core::logging::{LogFormat, init_logging};
use console_web_core::session::{Session, SessionSummary, StartOutcome, WarningItem};
use console_web_core::transport::JsonLinesConnector;
use serde::Serialize;
use tokio::sync::{broadcast, watch};

#[derive(Parser, Debug)]
#[command(name = "console-web", version, about = "Live view of an instrumented tokio process")]
struct Cli {
    /// Configuration file path
    #[arg(long, global = true, env = "CONSOLE_WEB_CONFIG")]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: pretty, json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print a summary of the reconstructed state
    Watch(WatchArgs),
    /// Stream poll and scheduled time histograms for one task
    Details(DetailsArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Address of the console feed, host:port
    #[arg(long)]
    target: Option<String>,

    /// Seconds to keep completed entities after they are dropped
    #[arg(long)]
    retain_for: Option<u64>,

    /// One JSON object per line instead of text
    #[arg(long)]
    json: bool,

    /// Milliseconds between summaries
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
}

#[derive(Args, Debug)]
struct DetailsArgs {
    /// Remote span id of the task
    span_id: u64,

    /// Address of the console feed, host:port
    #[arg(long)]
    target: Option<String>,

    /// Histogram buckets per chart
    #[arg(long, default_value_t = 40)]
    width: u32,

    /// One JSON object per line instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        match err.downcast_ref::<console_web_core::Error>() {
            Some(core) => eprintln!("{}", format_error_with_remediation(core)),
            None => eprintln!("Error: {err:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }

    match cli.command {
        Command::Config => {
            config.validate()?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Watch(args) => {
            if let Some(target) = args.target.clone() {
                config.connection.target_addr = target;
            }
            if let Some(secs) = args.retain_for {
                config.retention.retain_for_secs = secs;
            }
            config.validate()?;
            init_logging(&config.log_config()).context("initializing logging")?;
            watch(&config, &args).await
        }
        Command::Details(args) => {
            if let Some(target) = args.target.clone() {
                config.connection.target_addr = target;
            }
            config.validate()?;
            init_logging(&config.log_config()).context("initializing logging")?;
            details(&config, &args).await
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::load_from(path)?),
        None => Ok(Config::default()),
    }
}

async fn watch(config: &Config, args: &WatchArgs) -> anyhow::Result<()> {
    let session = Session::from_config(config);
    let mut notices = session.subscribe_notices();
    let connector = JsonLinesConnector::from_config(&config.connection);
    if session.start(connector) != StartOutcome::Started {
        anyhow::bail!("session did not start");
    }
    tracing::info!(target_addr = %config.connection.target_addr, "watching");

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                let (summary, warnings) = session.read(|state| (state.summary(), state.warnings()));
                print_summary(&summary, &warnings, args.json)?;
            }
            notice = notices.recv() => match notice {
                Ok(notice) => eprintln!("{}: {}", notice.name, notice.message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "notices lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn details(config: &Config, args: &DetailsArgs) -> anyhow::Result<()> {
    let connector = JsonLinesConnector::from_config(&config.connection);
    let task = SpanId(args.span_id);
    let width = args.width;
    let (close_tx, close_rx) = watch::channel(false);
    let (sink, mut view) = watch::channel(TaskDetailsView::default());
    let driver = tokio::spawn(async move {
        watch_task_details(&connector, task, width, &HdrDecoder, close_rx, &sink).await
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                close_tx.send_replace(true);
                driver.abort();
                break;
            }
            changed = view.changed() => {
                // sender dropped: the stream is over
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                print_details(task, &current, args.json)?;
            }
        }
    }

    match driver.await {
        Ok(result) => Ok(result?),
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(err).context("details stream task failed"),
    }
}

#[derive(Serialize)]
struct DetailsLine<'a> {
    span_id: SpanId,
    #[serde(flatten)]
    view: &'a TaskDetailsView,
}

fn print_details(task: SpanId, view: &TaskDetailsView, json: bool) -> anyhow::Result<()> {
    if json {
        let line = DetailsLine { span_id: task, view };
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    let Some(updated_at) = view.updated_at else {
        println!("task {task}: no details yet");
        return Ok(());
    };
    println!("[{updated_at}] task {task}");
    println!("  poll times       {}", times_line(&view.details.poll_times));
    if let Some(scheduled) = &view.details.scheduled_times {
        println!("  scheduled times  {}", times_line(scheduled));
    }
    Ok(())
}

fn times_line(times: &TimesDetails) -> String {
    let mut line = format!("min {} max {}", times.min, times.max);
    for p in &times.percentiles {
        let _ = write!(line, "  p{} {}", p.percentile, p.duration);
    }
    line
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    summary: &'a SessionSummary,
    warnings: &'a [WarningItem],
}

fn print_summary(summary: &SessionSummary, warnings: &[WarningItem], json: bool) -> anyhow::Result<()> {
    if json {
        let line = SummaryLine { summary, warnings };
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    let now = summary
        .now
        .map_or_else(|| "-".to_string(), |now| now.to_string());
    let stale = if summary.pending { " (stale)" } else { "" };
    println!(
        "[{now}] {connection}{stale}  tasks {tasks} (running {running}, scheduled {scheduled}, idle {idle}, completed {completed})  resources {resources}  async ops {async_ops}  warnings {warning_count}",
        connection = summary.connection,
        tasks = summary.tasks,
        running = summary.running,
        scheduled = summary.scheduled,
        idle = summary.idle,
        completed = summary.completed,
        resources = summary.resources,
        async_ops = summary.async_ops,
        warning_count = summary.warnings,
    );
    for warning in warnings {
        println!("  ! {}: {}", warning.title, warning.description);
    }
    Ok(())
}
