//! Typed error taxonomy for the ingest/background/encode pipeline.
//!
//! Component-local errors (parse, transient IO, queue overflow, persistence)
//! are recovered inline by their owning component and never leave it; only
//! `ConfigError` (at startup) and `FatalIoError` (from the listener) surface
//! to the orchestrator and, from there, to `main`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid sensor config: {0}")]
    InvalidSensorConfig(String),

    #[error("invalid background parameters: {0}")]
    InvalidBackgroundParams(String),

    #[error("invalid bind address {addr:?}: {source}")]
    InvalidBindAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("invalid snapshot on load: {0}")]
    InvalidSnapshot(String),

    #[error("invalid environment variable {var}={value:?}: expected {expected}")]
    InvalidEnvVar {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("packet length {actual} does not match expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("block {index} missing identifier marker (got {got:#06x})")]
    BadBlockIdentifier { index: usize, got: u16 },

    #[error("unrecognised return-mode byte {0:#04x}")]
    BadReturnMode(u8),

    #[error("implausible motor speed: raw {raw} ({rpm:.1} RPM) outside the plausible range")]
    ImplausibleMotorSpeed { raw: u16, rpm: f64 },
}

#[derive(Debug, Error)]
pub enum TransientIoError {
    #[error("socket read timed out")]
    ReadTimeout,

    #[error("received truncated datagram of {0} bytes")]
    TruncatedDatagram(usize),

    #[error("packet send failed: {0}")]
    SendFailed(#[source] std::io::Error),
}

#[derive(Debug, Error)]
#[error("queue {queue} overflowed, dropped {dropped} item(s)")]
pub struct OverflowError {
    pub queue: &'static str,
    pub dropped: u64,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to serialise snapshot: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to write snapshot: {0}")]
    Io(#[source] std::io::Error),
}

#[derive(Debug, Error)]
#[error("fatal socket error on {context}: {source}")]
pub struct FatalIoError {
    pub context: &'static str,
    #[source]
    pub source: std::io::Error,
}

/// Errors that can leave the core outright: startup configuration failure,
/// or an unrecoverable socket failure surfaced from the listener.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    FatalIo(#[from] FatalIoError),
}

/// Result returned by control-plane operations, distinguishing a rejected
/// request from a core that cannot currently service requests at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResult<T> {
    Ok(T),
    InvalidInput(String),
    Unavailable(String),
}

impl<T> ControlResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, ControlResult::Ok(_))
    }
}
