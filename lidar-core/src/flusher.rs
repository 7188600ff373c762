//! C6: periodic background-grid snapshot flushing.
//!
//! The timer loop follows the periodic-tick-over-shared-state convention
//! used elsewhere for interval-driven background tasks; persistence itself
//! follows the JSON-file load/save convention used for this codebase's other
//! durable state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sensor_types::BackgroundSnapshot;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use crate::background::BackgroundGrid;
use crate::error::PersistenceError;

/// Durable storage collaborator for background snapshots. The core treats
/// implementations as an opaque sink; failures are logged and never tear
/// down the flusher.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn store_snapshot(
        &self,
        sensor_id: &str,
        snapshot: &BackgroundSnapshot,
    ) -> Result<(), PersistenceError>;

    async fn load_snapshot(&self, sensor_id: &str) -> Option<BackgroundSnapshot>;
}

/// Default filesystem-backed sink: one JSON file per sensor, mirroring the
/// rest of this codebase's simple JSON-file state persistence.
pub struct JsonFileSnapshotSink {
    dir: PathBuf,
}

impl JsonFileSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, sensor_id: &str) -> PathBuf {
        self.dir.join(format!("background-{sensor_id}.json"))
    }
}

#[async_trait]
impl SnapshotSink for JsonFileSnapshotSink {
    async fn store_snapshot(
        &self,
        sensor_id: &str,
        snapshot: &BackgroundSnapshot,
    ) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(snapshot).map_err(PersistenceError::Serialize)?;
        tokio::fs::write(self.path_for(sensor_id), json)
            .await
            .map_err(PersistenceError::Io)?;
        Ok(())
    }

    async fn load_snapshot(&self, sensor_id: &str) -> Option<BackgroundSnapshot> {
        let path = self.path_for(sensor_id);
        if !path.exists() {
            info!(sensor_id, "no persisted background snapshot found, starting cold");
            return None;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(snap) => Some(snap),
                Err(e) => {
                    warn!(sensor_id, error = %e, "failed to parse persisted snapshot, starting cold");
                    None
                }
            },
            Err(e) => {
                warn!(sensor_id, error = %e, "failed to read persisted snapshot, starting cold");
                None
            }
        }
    }
}

/// Runs the periodic flush loop until `cancel` is set. Intended to be
/// spawned as its own task by the orchestrator.
pub async fn run_flusher(
    sensor_id: String,
    grid: Arc<BackgroundGrid>,
    sink: Arc<dyn SnapshotSink>,
    interval_duration: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = interval(interval_duration);
    info!(sensor_id, interval_ms = interval_duration.as_millis() as u64, "background flusher started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = grid.snapshot().await;
                match sink.store_snapshot(&sensor_id, &snapshot).await {
                    Ok(()) => info!(sensor_id, sequence = snapshot.sequence_number, "flushed background snapshot"),
                    Err(e) => warn!(sensor_id, error = %e, "failed to persist background snapshot"),
                }
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    info!(sensor_id, "background flusher stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_types::BackgroundParams;

    #[tokio::test]
    async fn json_sink_round_trips() {
        let dir = std::env::temp_dir().join(format!("lidar-core-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let sink = JsonFileSnapshotSink::new(&dir);

        let grid = BackgroundGrid::new(2, 4, vec![0.0, 0.0], BackgroundParams::default(), vec![10.0]);
        let snap = grid.snapshot().await;
        sink.store_snapshot("s1", &snap).await.unwrap();

        let loaded = sink.load_snapshot("s1").await.unwrap();
        assert_eq!(loaded.ring_count, snap.ring_count);
        assert_eq!(loaded.azimuth_bin_count, snap.azimuth_bin_count);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn missing_snapshot_returns_none() {
        let sink = JsonFileSnapshotSink::new(std::env::temp_dir().join("lidar-core-test-missing"));
        assert!(sink.load_snapshot("does-not-exist").await.is_none());
    }
}
