//! C9: wires the pipeline together and owns its lifecycle.
//!
//! Task spawning follows this codebase's own process entrypoint; cancellation
//! is a single `tokio::sync::watch<bool>` broadcast to every task, since this
//! codebase's dependency stack has no `tokio-util`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sensor_types::{AcceptanceHistogram, BackgroundParams, BackgroundSnapshot};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::background::{BackgroundGrid, GridStatus};
use crate::config::CoreConfig;
use crate::encoder::{self, EncoderStats, ForegroundEncoder};
use crate::error::{ConfigError, ControlResult, Error, FatalIoError};
use crate::flusher::{self, JsonFileSnapshotSink, SnapshotSink};
use crate::frame_builder::{FrameBuilder, FrameBuilderConfig};
use crate::listener::{self, IngestBatch, ListenerConfig};
use crate::sensor_config::{SensorConfig, RING_ELEVATIONS_DEG};
use crate::stats::PacketStats;

/// Snapshot key used for the single warm-start slot. Real multi-sensor
/// deployments would key snapshots per source address; this default covers
/// the single-sensor case `sensor-sim` exercises.
const DEFAULT_SNAPSHOT_KEY: &str = "default";

fn parse_dest(var: &'static str, addr: &str) -> Result<SocketAddr, Error> {
    addr.parse()
        .map_err(|source| Error::Config(ConfigError::InvalidBindAddress { addr: addr.to_string(), source }))
        .map_err(|e| {
            warn!(var, addr, "{e}");
            e
        })
}

pub struct Orchestrator {
    grid: Arc<BackgroundGrid>,
    stats: Arc<PacketStats>,
    encoder_stats: Arc<EncoderStats>,
    snapshot_sink: Arc<dyn SnapshotSink>,
    forwarding_enabled: Arc<AtomicBool>,
    cancel_tx: watch::Sender<bool>,
    shutdown_drain_deadline: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    pub async fn start(config: CoreConfig) -> Result<Self, Error> {
        SensorConfig::validate()?;

        let sink: Arc<dyn SnapshotSink> = Arc::new(JsonFileSnapshotSink::new(&config.snapshot_dir));
        let grid = Arc::new(BackgroundGrid::new(
            RING_ELEVATIONS_DEG.len() as u16,
            config.azimuth_bin_count,
            RING_ELEVATIONS_DEG.to_vec(),
            BackgroundParams::default(),
            default_histogram_bounds(),
        ));
        if let Some(snap) = sink.load_snapshot(DEFAULT_SNAPSHOT_KEY).await {
            match grid.load_snapshot(snap).await {
                Ok(()) => info!("warm-started background grid from persisted snapshot"),
                Err(e) => warn!(error = %e, "ignoring persisted snapshot, starting cold"),
            }
        }

        let stats = Arc::new(PacketStats::new());
        let encoder_stats = Arc::new(EncoderStats::default());
        let encoder = Arc::new(ForegroundEncoder::new(encoder_stats.clone()));
        let forwarding_enabled = Arc::new(AtomicBool::new(true));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut tasks = Vec::new();

        let mirror_tx = match &config.mirror_addr {
            Some(addr) => {
                let dest = parse_dest("LIDAR_MIRROR_ADDR", addr)?;
                let socket = Arc::new(bind_ephemeral("mirror forwarder").await?);
                let (tx, rx) = mpsc::channel::<Vec<u8>>(config.queue_capacity);
                tasks.push(tokio::spawn(encoder::run_sender(rx, socket, dest, cancel_rx.clone())));
                Some(tx)
            }
            None => None,
        };

        let (encoder_tx, encoder_rx) = mpsc::channel::<Vec<u8>>(config.queue_capacity);
        if let Some(addr) = &config.foreground_addr {
            let dest = parse_dest("LIDAR_FOREGROUND_ADDR", addr)?;
            let socket = Arc::new(bind_ephemeral("foreground sender").await?);
            tasks.push(tokio::spawn(encoder::run_sender(encoder_rx, socket, dest, cancel_rx.clone())));
        } else {
            drop(encoder_rx);
        }

        let (batch_tx, batch_rx) = mpsc::channel::<IngestBatch>(config.queue_capacity);
        let listener_config = ListenerConfig {
            bind_addr: config.listen_addr.clone(),
            recv_buffer_bytes: config.recv_buffer_bytes,
            timestamp_mode: Default::default(),
        };
        let listener_stats = stats.clone();
        let listener_cancel = cancel_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = listener::run_listener(
                listener_config,
                listener_stats,
                mirror_tx,
                batch_tx,
                listener_cancel,
            )
            .await
            {
                warn!(error = %e, "UDP listener task exited with fatal error");
            }
        }));

        let fb_config = FrameBuilderConfig {
            min_frame_points: config.min_frame_points,
            max_frame_rate: config.max_frame_rate,
            buffer_timeout_ns: config.buffer_timeout_ms * 1_000_000,
            cleanup_interval_ns: config.cleanup_interval_ms * 1_000_000,
        };
        tasks.push(tokio::spawn(run_pipeline(
            fb_config,
            batch_rx,
            grid.clone(),
            encoder,
            encoder_tx,
            forwarding_enabled.clone(),
            config.buffer_timeout_ms,
            cancel_rx.clone(),
        )));

        if let Some(ms) = config.background_flush_interval_ms {
            tasks.push(tokio::spawn(flusher::run_flusher(
                DEFAULT_SNAPSHOT_KEY.to_string(),
                grid.clone(),
                sink.clone(),
                Duration::from_millis(ms),
                cancel_rx.clone(),
            )));
        } else {
            info!("background flushing disabled (LIDAR_FLUSH_INTERVAL_MS unset)");
        }

        tasks.push(tokio::spawn(run_stats_sampler(stats.clone(), encoder_stats.clone(), cancel_rx)));

        Ok(Self {
            grid,
            stats,
            encoder_stats,
            snapshot_sink: sink,
            forwarding_enabled,
            cancel_tx,
            shutdown_drain_deadline: Duration::from_millis(config.shutdown_drain_deadline_ms),
            tasks,
        })
    }

    // ── Control operations ──────────────────────────────────────────────

    pub fn set_params(&self, params: BackgroundParams) -> ControlResult<()> {
        if params.update_fraction <= 0.0 || params.update_fraction > 1.0 {
            return ControlResult::InvalidInput("update_fraction must be in (0, 1]".to_string());
        }
        if params.settling_threshold == 0 {
            return ControlResult::InvalidInput("settling_threshold must be positive".to_string());
        }
        self.grid.set_params(params);
        ControlResult::Ok(())
    }

    pub async fn reset_grid(&self) -> ControlResult<()> {
        self.grid.reset().await;
        ControlResult::Ok(())
    }

    pub async fn request_snapshot(&self) -> ControlResult<BackgroundSnapshot> {
        let snap = self.grid.snapshot().await;
        if let Err(e) = self.snapshot_sink.store_snapshot(DEFAULT_SNAPSHOT_KEY, &snap).await {
            warn!(error = %e, "on-demand snapshot persist failed");
        }
        ControlResult::Ok(snap)
    }

    /// Toggles whether classified foreground points are still forwarded
    /// while a replay source (`sensor-sim`) is feeding the listener.
    pub fn start_replay(&self, forward_during_replay: bool) -> ControlResult<()> {
        self.forwarding_enabled.store(forward_during_replay, Ordering::Relaxed);
        ControlResult::Ok(())
    }

    pub fn stop_replay(&self) -> ControlResult<()> {
        self.forwarding_enabled.store(true, Ordering::Relaxed);
        ControlResult::Ok(())
    }

    pub async fn get_status(&self) -> ControlResult<GridStatus> {
        ControlResult::Ok(self.grid.status().await)
    }

    pub fn get_acceptance_histograms(&self) -> ControlResult<AcceptanceHistogram> {
        ControlResult::Ok(self.grid.status_extended())
    }

    pub fn packet_stats(&self) -> Arc<PacketStats> {
        self.stats.clone()
    }

    pub fn encoder_stats(&self) -> Arc<EncoderStats> {
        self.encoder_stats.clone()
    }

    /// Signals cancellation to every task and waits up to the configured
    /// drain deadline for them to finish.
    pub async fn shutdown(self) {
        let _ = self.cancel_tx.send(true);
        let deadline = self.shutdown_drain_deadline;
        for task in self.tasks {
            if tokio::time::timeout(deadline, task).await.is_err() {
                warn!("task did not finish within shutdown drain deadline");
            }
        }
    }
}

async fn bind_ephemeral(purpose: &'static str) -> Result<UdpSocket, Error> {
    UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|source| Error::FatalIo(FatalIoError { context: purpose, source }))
}

fn default_histogram_bounds() -> Vec<f64> {
    vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0]
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    fb_config: FrameBuilderConfig,
    mut batch_rx: mpsc::Receiver<IngestBatch>,
    grid: Arc<BackgroundGrid>,
    encoder: Arc<ForegroundEncoder>,
    encoder_tx: mpsc::Sender<Vec<u8>>,
    forwarding_enabled: Arc<AtomicBool>,
    buffer_timeout_ms: u64,
    mut cancel: watch::Receiver<bool>,
) {
    let mut fb = FrameBuilder::new(fb_config);
    let mut maintenance = tokio::time::interval(Duration::from_millis(buffer_timeout_ms.max(1)));

    loop {
        tokio::select! {
            maybe_batch = batch_rx.recv() => {
                match maybe_batch {
                    Some(batch) => {
                        if let Some(frame) = fb.ingest(&batch.sensor_id, &batch.points, batch.recv_ts_ns) {
                            process_frame(frame, &grid, &encoder, &encoder_tx, &forwarding_enabled).await;
                        }
                    }
                    None => break,
                }
            }
            _ = maintenance.tick() => {
                let now_ns = now_ns();
                for frame in fb.check_timeouts(now_ns) {
                    process_frame(frame, &grid, &encoder, &encoder_tx, &forwarding_enabled).await;
                }
                fb.cleanup(now_ns);
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
        }
    }
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

async fn process_frame(
    frame: sensor_types::Frame,
    grid: &BackgroundGrid,
    encoder: &ForegroundEncoder,
    encoder_tx: &mpsc::Sender<Vec<u8>>,
    forwarding_enabled: &AtomicBool,
) {
    let mask = grid.classify_and_update(&frame).await;
    if !forwarding_enabled.load(Ordering::Relaxed) {
        return;
    }
    let foreground: Vec<_> = frame
        .points
        .iter()
        .zip(mask.iter())
        .filter(|(_, &is_fg)| is_fg)
        .map(|(p, _)| *p)
        .collect();
    if foreground.is_empty() {
        return;
    }
    for packet in encoder.encode(&foreground, frame.end_ts_ns) {
        encoder::try_enqueue(encoder_tx, packet, encoder.stats());
    }
}

async fn run_stats_sampler(stats: Arc<PacketStats>, encoder_stats: Arc<EncoderStats>, mut cancel: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                stats.log_sampled();
                encoder_stats.log_sampled();
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
        }
    }
}
