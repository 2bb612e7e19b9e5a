//! # Phototaxis controller entry point
//!
//! Receives `/sensor` light readings from every robot over OSC/UDP, answers
//! with `/motor` commands from the phototaxis law, and records all robots
//! at 24 fps to `robot_logs/<prefix>_<YYYYmmdd_HHMMSS>.csv`.
//!
//! ## Threads
//! - `robot-<i>` (one per robot): blocks on its sensor socket.
//! - `frame-logger`: wakes every Δ/2, emits one row per elapsed frame.
//! - `liveness-monitor`: 1 Hz silence check.
//! - main: waits for SIGINT/SIGTERM, then runs the shutdown sequence.
//!
//! Usage: `phototaxis_controller [config.toml]`

use std::{
    fs::{File, create_dir_all},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use anyhow::{Context, Result};
use log::{error, info};

use phototaxis_controller::{
    Config, FrameLogger, LivenessMonitor, LogSink, PhototaxisLaw, RobotHandler, RobotStateStore,
    RunFlag, ShutdownSequencer, StagingBuffer,
    transport::{
        CommandSink, SensorSource,
        osc::{OscSink, OscSource},
    },
    utils::logging::init_logging,
};

fn main() -> Result<()> {
    init_logging();
    info!("=== Starting phototaxis controller ===");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load_or_default(config_path.as_deref()).context("failed to load config")?;
    let n = config.num_robots;
    info!(
        "Phototaxis mapping: M_max={}, alpha={}, {} robots",
        config.control.motor_max, config.control.alpha, n
    );

    // CSV record stream
    let csv_path = csv_path(&config.recording.log_dir, &config.recording.file_prefix)?;
    let file = File::create(&csv_path).with_context(|| format!("failed to create {}", csv_path.display()))?;
    let sink = Arc::new(LogSink::new(
        Box::new(BufWriter::new(file)),
        n,
        config.recording.flush_every_frames,
    )?);
    info!("CSV log file created: {}", csv_path.display());

    // Transport
    let outbound: Arc<dyn CommandSink> = Arc::new(
        OscSink::new(
            std::net::SocketAddr::new(config.network.bind_ip, 0),
            config.motor_targets(),
        )
        .context("failed to open motor socket")?,
    );
    for id in 0..n {
        info!("Motor client for robot {id}: {}", config.motor_target(id));
    }

    let running = RunFlag::new();
    let store = Arc::new(RobotStateStore::new(n));
    let staging = Arc::new(StagingBuffer::new(n));
    let law = PhototaxisLaw::new(config.control.motor_max, config.control.alpha);

    // Per-robot handlers
    let mut handlers: Vec<JoinHandle<u64>> = Vec::with_capacity(n);
    for id in 0..n {
        let addr = config.sensor_bind(id);
        let source: Box<dyn SensorSource> = Box::new(
            OscSource::bind(addr).with_context(|| format!("failed to bind sensor socket {addr}"))?,
        );
        let handler = RobotHandler::new(
            id,
            law,
            store.clone(),
            staging.clone(),
            outbound.clone(),
            config.led_message(),
        );
        handlers.push(handler.spawn(source, running.clone(), config.recv_timeout())?);
        info!("Listening for robot {id} sensors on UDP {addr}");
    }

    // Periodic tasks
    let monitor = LivenessMonitor::new(
        store.clone(),
        config.monitor.silence_threshold_secs,
        config.monitor_interval(),
    )
    .spawn(running.clone())?;
    let logger = FrameLogger::new(
        sink.clone(),
        staging.clone(),
        config.frame_interval(),
        config.recording.staleness_secs,
    )
    .spawn(running.clone())?;

    let sequencer = ShutdownSequencer::new(
        running.clone(),
        outbound.clone(),
        sink.clone(),
        n,
        config.led.enabled,
        config.shutdown.stop_repeats,
        Duration::from_millis(config.shutdown.stop_delay_ms),
    );

    info!("Controller is running. Press Ctrl+C to stop.");
    match wait_for_signal() {
        Ok(signal) => {
            info!("{signal} received, shutting down...");
            sequencer.trigger(signal);
        }
        Err(e) => error!("Signal handling failed: {e}"),
    }
    // normal exit path; no-op if the signal path already ran
    sequencer.trigger("exit");

    for (id, h) in handlers.into_iter().enumerate() {
        match h.join() {
            Ok(count) => info!("Robot {id}: handled {count} sensor messages"),
            Err(_) => error!("Robot {id}: handler thread panicked"),
        }
    }
    if logger.join().is_err() {
        error!("Frame logger thread panicked");
    }
    if monitor.join().is_err() {
        error!("Monitor thread panicked");
    }

    info!("=== Controller stopped ===");
    Ok(())
}

fn csv_path(log_dir: &Path, prefix: &str) -> Result<PathBuf> {
    create_dir_all(log_dir).with_context(|| format!("failed to create {}", log_dir.display()))?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    Ok(log_dir.join(format!("{prefix}_{stamp}.csv")))
}

/// Block until SIGINT (or SIGTERM on unix).
fn wait_for_signal() -> Result<&'static str> {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut term = signal(SignalKind::terminate())?;
            tokio::select! {
                res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
                _ = term.recv() => Ok("SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.map(|_| "SIGINT")
        }
    })
    .map_err(Into::into)
}
