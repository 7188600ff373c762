//! Ingest, background/foreground segmentation, and foreground re-encoding
//! for a spinning LiDAR sensor feed.
//!
//! See `orchestrator` for how the pieces below are wired into a running
//! process, and `sensor_types` (a sibling crate) for the shared wire-format
//! constants and domain types everything here operates on.

pub mod background;
pub mod config;
pub mod encoder;
pub mod error;
pub mod flusher;
pub mod frame_builder;
pub mod listener;
pub mod orchestrator;
pub mod packet;
pub mod sensor_config;
pub mod stats;

pub use error::Error;
pub use orchestrator::Orchestrator;
