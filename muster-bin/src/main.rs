mod logger;

use clap::Parser;
use logger::Logger;
use muster_core::{MqttLink, PollDriver, Roster};
use muster_error::{MusterError, MusterResult};
use muster_models::{
    constants::DEFAULT_CONFIG_FILE_NAME, CommandPublisher, InboundFrame, PollerMetrics,
    RecordSink, SensorCommand, Settings,
};
use muster_storage::ResultsLog;
use std::{env::current_dir, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

/// muster - sensor polling coordinator
///
/// Polls a fixed roster of MQTT-attached sensor devices once per period,
/// deduplicates and acknowledges their readings, re-polls stragglers within
/// a retry budget and appends one aggregated record per cycle to a results
/// log.
#[derive(Parser)]
#[command(name = "musterd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sensor polling coordinator", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    ///
    /// If not specified, looks for 'muster.toml' in the current working
    /// directory.
    #[arg(short, long, env = "MUSTER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> MusterResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(p) => p,
        None => {
            let dir = current_dir()
                .map_err(|e| MusterError::from(format!("Failed to get current directory: {e}")))?;
            dir.join(DEFAULT_CONFIG_FILE_NAME)
        }
    };

    let settings = Settings::new(config_path.to_string_lossy().to_string())?;
    settings.validate()?;

    let level = settings.log.level.parse::<Level>().map_err(|_| {
        MusterError::ConfigurationError(format!("invalid log level '{}'", settings.log.level))
    })?;
    let mut logger = Logger::new(Some(level));
    logger.initialize()?;
    info!(
        level = %logger.get_level(),
        config = %config_path.display(),
        devices = settings.sensors.len(),
        "🚀 muster starting"
    );

    let results_path = settings.storage.results_path_resolved();
    let sink = Arc::new(ResultsLog::open(&results_path, settings.storage.fsync_on_append).await?);
    info!(path = %sink.path().display(), "results log open");

    let metrics = Arc::new(PollerMetrics::default());
    let cancel = CancellationToken::new();
    let (frame_tx, frame_rx) =
        mpsc::channel::<InboundFrame>(settings.broker.inbound_queue_capacity);

    let roster = Roster::new(settings.sensors.clone());
    let link = Arc::new(MqttLink::start(
        settings.broker.clone(),
        &settings.topics,
        roster.ids(),
        frame_tx,
        cancel.clone(),
    ));

    let sync_timeout = Duration::from_millis(settings.broker.sync_start_timeout_ms);
    if link.wait_connected(sync_timeout).await {
        if settings.poller.reset_on_start {
            reset_roster(link.as_ref(), &roster);
        }
    } else {
        warn!(
            timeout_ms = settings.broker.sync_start_timeout_ms,
            last_error = ?link.last_error(),
            "broker not connected yet, proceeding anyway"
        );
    }

    let publisher: Arc<dyn CommandPublisher> = link.clone();
    let record_sink: Arc<dyn RecordSink> = sink.clone();
    let driver = PollDriver::new(
        settings.poller,
        &settings.topics,
        settings.storage.absent_value.clone(),
        roster,
        publisher,
        record_sink,
        metrics.clone(),
        cancel.clone(),
    );
    let mut driver_handle = tokio::spawn(driver.run(frame_rx));

    let driver_result = tokio::select! {
        _ = shutdown_signal() => {
            info!("🛑 starting graceful shutdown");
            cancel.cancel();
            (&mut driver_handle).await
        }
        result = &mut driver_handle => {
            // The driver only stops on its own for a storage failure or a
            // closed inbound channel; take the transport down with it.
            cancel.cancel();
            result
        }
    };

    info!(metrics = ?metrics.snapshot(), "final poller metrics");
    driver_result??;
    info!("✅ shutdown complete");
    Ok(())
}

/// Send every device a reset so it re-announces with a fresh message id.
fn reset_roster(link: &MqttLink, roster: &Roster) {
    info!(devices = roster.len(), "sending roster-wide reset");
    for id in roster.ids() {
        if let Err(e) = link.try_publish(&id, SensorCommand::Reset(None)) {
            warn!(sensor = %id, error = %e, "reset command failed");
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM signal");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT signal");
        }
    }
}

#[cfg(windows)]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received ctrl-c signal");
    }
}
