//! Environment-variable-driven runtime configuration.
//!
//! No CLI subcommand dispatcher lives here — that plumbing is explicitly out
//! of scope for the core. `CoreConfig::from_env` follows the
//! `std::env::var(...).ok().and_then(|v| v.parse().ok()).unwrap_or(default)`
//! pattern used throughout for its env-backed defaults.

use crate::error::ConfigError;

fn env_or<T: std::str::FromStr>(var: &'static str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_string(var: &'static str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Address the listener binds for live sensor ingest (host:port).
    pub listen_addr: String,
    /// Best-effort OS receive buffer size, in bytes.
    pub recv_buffer_bytes: usize,
    /// Optional raw-packet mirror destination.
    pub mirror_addr: Option<String>,
    /// Destination for re-encoded foreground packets.
    pub foreground_addr: Option<String>,
    /// Number of azimuth bins in the background grid.
    pub azimuth_bin_count: u16,
    /// Interval, in milliseconds, between background snapshot flushes.
    /// `None` disables the flusher entirely (the default).
    pub background_flush_interval_ms: Option<u64>,
    /// Directory the default `JsonFileSnapshotSink` writes into.
    pub snapshot_dir: String,
    /// Minimum points for a frame to be accepted (unless timeout-forced).
    pub min_frame_points: usize,
    /// Maximum accepted frame emission rate, in frames/second.
    pub max_frame_rate: f64,
    /// How long the frame builder waits for a new point before forcing a
    /// short frame, in milliseconds.
    pub buffer_timeout_ms: u64,
    /// How long a sensor's working buffer may sit idle before it is reclaimed.
    pub cleanup_interval_ms: u64,
    /// Capacity of each bounded inter-task queue.
    pub queue_capacity: usize,
    /// How long forwarders drain their queues after cancellation, in milliseconds.
    pub shutdown_drain_deadline_ms: u64,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self {
            listen_addr: env_or_string("LIDAR_LISTEN_ADDR", "0.0.0.0:2368"),
            recv_buffer_bytes: env_or("LIDAR_RECV_BUFFER_BYTES", 1 << 20),
            mirror_addr: std::env::var("LIDAR_MIRROR_ADDR").ok(),
            foreground_addr: std::env::var("LIDAR_FOREGROUND_ADDR").ok(),
            azimuth_bin_count: env_or("LIDAR_AZIMUTH_BINS", 720u16),
            background_flush_interval_ms: std::env::var("LIDAR_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&ms| ms > 0),
            snapshot_dir: env_or_string("LIDAR_SNAPSHOT_DIR", "."),
            min_frame_points: env_or("LIDAR_MIN_FRAME_POINTS", 100),
            max_frame_rate: env_or("LIDAR_MAX_FRAME_RATE", 20.0),
            buffer_timeout_ms: env_or("LIDAR_BUFFER_TIMEOUT_MS", 200),
            cleanup_interval_ms: env_or("LIDAR_CLEANUP_INTERVAL_MS", 30_000),
            queue_capacity: env_or("LIDAR_QUEUE_CAPACITY", 256),
            shutdown_drain_deadline_ms: env_or("LIDAR_SHUTDOWN_DRAIN_DEADLINE_MS", 2_000),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidEnvVar {
                var: "LIDAR_LISTEN_ADDR",
                value: self.listen_addr.clone(),
                expected: "host:port socket address",
            });
        }
        if self.azimuth_bin_count == 0 {
            return Err(ConfigError::InvalidEnvVar {
                var: "LIDAR_AZIMUTH_BINS",
                value: self.azimuth_bin_count.to_string(),
                expected: "a positive bin count",
            });
        }
        if self.max_frame_rate <= 0.0 {
            return Err(ConfigError::InvalidEnvVar {
                var: "LIDAR_MAX_FRAME_RATE",
                value: self.max_frame_rate.to_string(),
                expected: "a positive frame rate",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_listen_addr_parses() {
        let cfg = CoreConfig {
            listen_addr: "0.0.0.0:2368".to_string(),
            recv_buffer_bytes: 1024,
            mirror_addr: None,
            foreground_addr: None,
            azimuth_bin_count: 720,
            background_flush_interval_ms: None,
            snapshot_dir: ".".to_string(),
            min_frame_points: 100,
            max_frame_rate: 20.0,
            buffer_timeout_ms: 200,
            cleanup_interval_ms: 30_000,
            queue_capacity: 256,
            shutdown_drain_deadline_ms: 2_000,
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_bins_is_rejected() {
        let mut cfg = CoreConfig {
            listen_addr: "0.0.0.0:2368".to_string(),
            recv_buffer_bytes: 1024,
            mirror_addr: None,
            foreground_addr: None,
            azimuth_bin_count: 720,
            background_flush_interval_ms: None,
            snapshot_dir: ".".to_string(),
            min_frame_points: 100,
            max_frame_rate: 20.0,
            buffer_timeout_ms: 200,
            cleanup_interval_ms: 30_000,
            queue_capacity: 256,
            shutdown_drain_deadline_ms: 2_000,
        };
        cfg.azimuth_bin_count = 0;
        assert!(cfg.validate().is_err());
    }
}
