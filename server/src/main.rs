//! Fitness Session Server - standalone gateway adapter for the fitness
//! session core.
//!
//! Bootstraps a single session and decodes inbound wire frames into
//! [`Sample`]s, handing each one to the coordinator via [`CoordinatorHandle::ingest`].
//! Frames arrive as newline-delimited JSON envelopes on stdin - one envelope
//! per ANT+ or vibration frame - which keeps the adapter transport-agnostic
//! with respect to whatever actually terminates the WebSocket/MQTT
//! connections upstream (an ANT+ USB dongle bridge, an MQTT broker client).

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use fitness_session_core::bootstrap::bootstrap_session;
use fitness_session_core::events::LoggingEventEmitter;
use fitness_session_core::model::Sample;
use fitness_session_core::normalizer::{decode_ant_frame, decode_vibration_edge};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use crate::config::ServerConfig;

/// Fitness Session Server - headless gateway adapter and session host.
#[derive(Parser, Debug)]
#[command(name = "fitness-session-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "FITNESS_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Output directory for the persisted session document (overrides config file).
    #[arg(short = 'o', long, env = "FITNESS_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

/// One line of stdin input: an envelope around a single inbound wire frame.
/// `kind` selects which decoder in [`fitness_session_core::normalizer`]
/// applies; `device_id` is required for vibration frames, which (per §6)
/// carry no device identifier of their own - that comes from the MQTT topic
/// the frame arrived on, which the adapter resolves and stamps here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct IngestLine {
    kind: IngestKind,
    #[serde(default)]
    device_id: Option<String>,
    frame: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum IngestKind {
    Ant,
    Vibration,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Fitness Session Server v{}", env!("CARGO_PKG_VERSION"));

    let mut server_config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(data_dir) = args.data_dir {
        server_config.core.persistence.output_dir = data_dir;
    }

    log::info!(
        "Configuration: output_dir={}, tick_interval_seconds={}",
        server_config.core.persistence.output_dir.display(),
        server_config.core.timeline.interval_seconds
    );

    let session = bootstrap_session(server_config.core, Some(Arc::new(LoggingEventEmitter)))
        .context("Failed to bootstrap session")?;

    log::info!("Session bootstrapped successfully");

    let snapshot_task = tokio::spawn(snapshot_logger(session.coordinator.subscribe()));

    let sweep_task = tokio::spawn(vibration_sweeper(
        Arc::clone(&session.vibration),
        session.coordinator.clone(),
        session.timebase.interval_seconds(),
    ));

    let ingest_task = tokio::spawn(ingest_loop(
        session.coordinator.clone(),
        Arc::clone(&session.vibration),
    ));

    log::info!("Ingestion loop started, reading frames from stdin");

    shutdown_signal().await;

    log::info!("Shutdown signal received, ending session...");

    snapshot_task.abort();
    sweep_task.abort();
    ingest_task.abort();

    session.shutdown().await.context("Failed to end session cleanly")?;

    log::info!("Shutdown complete");
    Ok(())
}

/// Reads newline-delimited [`IngestLine`] envelopes from stdin, decodes each
/// into a [`Sample`], and routes it into the session. Malformed lines are
/// logged and skipped rather than treated as fatal, mirroring the Frame
/// Normalizer's tolerance for bad frames (§4.A).
async fn ingest_loop(
    coordinator: fitness_session_core::CoordinatorHandle,
    vibration: Arc<fitness_session_core::normalizer::VibrationCoalescer>,
) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                log::info!("stdin closed, ingestion loop exiting");
                break;
            }
            Err(e) => {
                log::warn!("failed to read stdin line: {e}");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let envelope: IngestLine = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("dropping malformed ingest line: {e}");
                continue;
            }
        };

        let sample = match decode_envelope(&envelope, &vibration) {
            Ok(Some(sample)) => sample,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("dropping malformed frame: {e}");
                continue;
            }
        };

        if let Err(e) = coordinator.ingest(sample).await {
            log::warn!("ingest rejected: {e}");
        }
    }
}

fn decode_envelope(
    envelope: &IngestLine,
    vibration: &fitness_session_core::normalizer::VibrationCoalescer,
) -> Result<Option<Sample>, fitness_session_core::CoreError> {
    let raw = serde_json::to_vec(&envelope.frame)
        .map_err(|e| fitness_session_core::CoreError::MalformedFrame(e.to_string()))?;

    match envelope.kind {
        IngestKind::Ant => decode_ant_frame(&raw).map(Some),
        IngestKind::Vibration => {
            let device_id = envelope.device_id.clone().ok_or_else(|| {
                fitness_session_core::CoreError::MalformedFrame(
                    "vibration frame missing deviceId".to_string(),
                )
            })?;
            let edge = decode_vibration_edge(&raw)?;
            Ok(vibration.ingest(&device_id, edge, Utc::now()))
        }
    }
}

/// Periodically flushes vibration windows that never saw a closing edge,
/// per [`fitness_session_core::normalizer::VibrationCoalescer::sweep_expired`].
async fn vibration_sweeper(
    coalescer: Arc<fitness_session_core::normalizer::VibrationCoalescer>,
    coordinator: fitness_session_core::CoordinatorHandle,
    interval_seconds: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
    loop {
        interval.tick().await;
        for sample in coalescer.sweep_expired(Utc::now()) {
            if let Err(e) = coordinator.ingest(sample).await {
                log::warn!("ingest rejected for swept vibration pulse: {e}");
            }
        }
    }
}

/// Logs each coalesced snapshot as it arrives, standing in for a real
/// subscriber (a dashboard, a companion display) in this headless binary.
async fn snapshot_logger(mut snapshots: tokio::sync::watch::Receiver<fitness_session_core::Snapshot>) {
    loop {
        if snapshots.changed().await.is_err() {
            break;
        }
        let snapshot = snapshots.borrow().clone();
        log::debug!(
            "tick {} ({} participants, {} coins)",
            snapshot.tick,
            snapshot.participants.len(),
            snapshot.totals.coins
        );
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
