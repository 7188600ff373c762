//! C8: UDP ingest loop.
//!
//! Directly grounded in this codebase's other UDP hub task: bind, loop on
//! `recv_from`, never let a single bad datagram or transient IO error bring
//! the task down. Unlike that hub, this loop must not allocate per packet,
//! so it reads into one reusable buffer for the lifetime of the task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sensor_types::{PolarPoint, TimestampMode};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::FatalIoError;
use crate::packet;
use crate::stats::PacketStats;

/// One packet's worth of parsed points, tagged with the sensor that
/// produced them and the listener's receive timestamp.
pub struct IngestBatch {
    pub sensor_id: String,
    pub points: Vec<PolarPoint>,
    pub recv_ts_ns: u64,
}

pub struct ListenerConfig {
    pub bind_addr: String,
    pub recv_buffer_bytes: usize,
    pub timestamp_mode: TimestampMode,
}

/// Binds the configured address and runs the ingest loop until `cancel`
/// fires or the socket fails unrecoverably.
pub async fn run_listener(
    config: ListenerConfig,
    stats: Arc<PacketStats>,
    mirror_tx: Option<mpsc::Sender<Vec<u8>>>,
    batch_tx: mpsc::Sender<IngestBatch>,
    mut cancel: watch::Receiver<bool>,
) -> Result<(), FatalIoError> {
    let socket = UdpSocket::bind(&config.bind_addr)
        .await
        .map_err(|e| FatalIoError {
            context: "bind",
            source: e,
        })?;
    info!(addr = %config.bind_addr, "UDP listener bound");

    let _ = socket.set_broadcast(false);
    debug!(
        requested_bytes = config.recv_buffer_bytes,
        "receive buffer sizing is best-effort and platform-specific; not tuned here"
    );

    let mut buf = vec![0u8; 65536];
    let seq_counter = AtomicU64::new(0);

    loop {
        tokio::select! {
            recv = socket.recv_from(&mut buf) => {
                match recv {
                    Ok((len, src)) => {
                        handle_packet(&buf[..len], src, &config, &stats, &mirror_tx, &batch_tx, &seq_counter).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "UDP recv error, continuing");
                    }
                }
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    info!("UDP listener stopping");
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn handle_packet(
    data: &[u8],
    src: SocketAddr,
    config: &ListenerConfig,
    stats: &Arc<PacketStats>,
    mirror_tx: &Option<mpsc::Sender<Vec<u8>>>,
    batch_tx: &mpsc::Sender<IngestBatch>,
    seq_counter: &AtomicU64,
) {
    stats.record_received(data.len());

    if let Some(tx) = mirror_tx {
        match tx.try_send(data.to_vec()) {
            Ok(()) => stats.record_forwarded(),
            Err(_) => stats.record_forward_dropped(),
        }
    }

    let recv_ts_ns = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = seq_counter.fetch_add(1, Ordering::Relaxed);

    let points = match packet::parse(data, recv_ts_ns, seq, config.timestamp_mode) {
        Ok(points) => points,
        Err(e) => {
            stats.record_parse_error();
            debug!(error = %e, src = %src, "dropping unparseable packet");
            return;
        }
    };

    let batch = IngestBatch {
        sensor_id: src.to_string(),
        points,
        recv_ts_ns,
    };
    if batch_tx.try_send(batch).is_err() {
        stats.record_dropped_overflow();
        warn!("frame builder queue full, dropping packet");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_failure_surfaces_as_fatal_io_error() {
        let (batch_tx, _batch_rx) = mpsc::channel(1);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let config = ListenerConfig {
            bind_addr: "not-an-address".to_string(),
            recv_buffer_bytes: 1024,
            timestamp_mode: TimestampMode::SystemWallClock,
        };
        let result = run_listener(config, Arc::new(PacketStats::new()), None, batch_tx, cancel_rx).await;
        assert!(result.is_err());
    }
}
