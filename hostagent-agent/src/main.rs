//! `hostagentd`: watches the kernel log and, optionally, the NVIDIA fabric-manager log for
//! GPU faults and records them as deduplicated events.

mod classify;
mod config;

use std::sync::Arc;

use clap::Parser;
use hostagent_core::dedup::DeduperConfig;
use hostagent_core::event_bucket::{EventBucket, InMemoryEventBucket};
use hostagent_core::event_processor::{EventProcessor, MatchFn};
use hostagent_core::log_streamer::LogStreamer;
use hostagent_log_parsers::FabricManagerParser;
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "hostagentd", about = "GPU host agent log-observation daemon")]
struct Cli {
    /// Path to a config file; defaults to $XDG_CONFIG_HOME/hostagent/config.toml.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Increase log verbosity; repeatable (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // Best-effort: a second logger init (e.g. under a test harness) failing is not fatal.
    let _ = TermLogger::init(
        level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = config::Config::load(cli.config.as_deref())?;
    log::info!("hostagentd starting: {config:?}");

    let cancel = CancellationToken::new();
    let bucket: Arc<dyn EventBucket> = Arc::new(InMemoryEventBucket::new());
    let mut processors = Vec::new();

    if config.watch_kernel_log {
        match classify::KernelClassifier::new() {
            Ok(classifier) => {
                match hostagent_dmesg_source::open_kernel_log_stream(cancel.child_token()).await {
                    Ok(streamer) => {
                        let classify: Arc<dyn MatchFn> = Arc::new(classifier);
                        processors.push(EventProcessor::spawn(
                            streamer,
                            classify,
                            bucket.clone(),
                            cancel.child_token(),
                        ));
                        log::info!("hostagentd: watching kernel log");
                    }
                    Err(err) => log::error!("hostagentd: failed to open kernel log stream: {err}"),
                }
            }
            Err(err) => log::error!("hostagentd: failed to compile kernel filter set: {err}"),
        }
    }

    if let Some(path) = &config.fabric_manager_log_path {
        let commands = vec![vec![
            "tail".to_string(),
            "-F".to_string(),
            path.display().to_string(),
        ]];
        match LogStreamer::open(
            commands,
            Arc::new(FabricManagerParser),
            DeduperConfig::default(),
            cancel.child_token(),
        )
        .await
        {
            Ok(streamer) => {
                let classify: Arc<dyn MatchFn> = Arc::new(classify::FabricManagerClassifier);
                processors.push(EventProcessor::spawn(
                    streamer,
                    classify,
                    bucket.clone(),
                    cancel.child_token(),
                ));
                log::info!("hostagentd: watching fabric-manager log at {}", path.display());
            }
            Err(err) => log::error!("hostagentd: failed to open fabric-manager log stream: {err}"),
        }
    }

    if processors.is_empty() {
        log::warn!("hostagentd: no log sources enabled, exiting");
        return Ok(());
    }

    let retention_task = spawn_retention_sweeper(
        bucket.clone(),
        config.event_retention.clone(),
        cancel.child_token(),
    );

    wait_for_shutdown_signal().await;
    log::info!("hostagentd: shutting down");
    cancel.cancel();
    for mut processor in processors {
        processor.close().await;
    }
    let _ = retention_task.await;

    Ok(())
}

/// Periodically purges events older than the configured retention window. This lives outside
/// `hostagent-core` because §6 scopes the retention sweeper as an external collaborator of the
/// Event Bucket, not part of the log-observation core itself.
fn spawn_retention_sweeper(
    bucket: Arc<dyn EventBucket>,
    retention: config::EventRetentionConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            retention.purge_interval_secs,
        ));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let cutoff = chrono::Utc::now()
                        - chrono::Duration::seconds(retention.max_age_secs as i64);
                    let removed = bucket.purge(cutoff).await;
                    if removed > 0 {
                        log::info!("hostagentd: retention sweep purged {removed} events");
                    }
                }
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("installing a SIGTERM handler should not fail");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
