//! # sensor-types
//!
//! Shared LiDAR wire-format constants and domain types for the ingest/background/
//! re-encode pipeline in `lidar-core`, and for the `sensor-sim` packet generator.
//!
//! ## Sensor model
//!
//! The target sensor is a 16-ring spinning LiDAR with a fixed 1208-byte UDP data
//! packet, following the well-known 16-channel "puck" family convention:
//!
//! - 12 raw firing blocks per packet, each firing two interleaved 16-ring
//!   sequences (32 channel slots per raw block).
//! - [`BLOCK_SLOTS`] = `RAW_BLOCKS_PER_PACKET * SEQUENCES_PER_BLOCK` firing
//!   sequences per packet; each carries one azimuth and one per-ring firing-time
//!   offset, and is what `block_index` addresses throughout this workspace.
//! - Distance raw units are 0.5 cm; azimuth raw units are 0.01°.
//!
//! ## Coordinate conventions
//!
//! Points are polar: `(ring, azimuth_deg, distance_m)`. No Cartesian projection
//! is performed anywhere in this pipeline — consumers downstream of the
//! foreground re-encoder are expected to do their own spherical-to-Cartesian
//! conversion, exactly as they would for a live sensor.

use serde::{Deserialize, Serialize};

// ── Wire format constants ─────────────────────────────────────────────────────

/// Number of laser rings (channels) on the sensor.
pub const RINGS: usize = 16;

/// Number of raw firing blocks per packet.
pub const RAW_BLOCKS_PER_PACKET: usize = 12;

/// Number of interleaved firing sequences per raw block.
pub const SEQUENCES_PER_BLOCK: usize = 2;

/// Number of addressable firing-sequence slots per packet (`block_index` range).
pub const BLOCK_SLOTS: usize = RAW_BLOCKS_PER_PACKET * SEQUENCES_PER_BLOCK;

/// Little-endian marker that opens every raw block.
pub const BLOCK_IDENTIFIER: u16 = 0xEEFF;

/// Raw block size in bytes: 2 (identifier) + 2 (azimuth) + 32 * (2 distance + 1 intensity).
pub const RAW_BLOCK_LEN: usize = 2 + 2 + (RINGS * SEQUENCES_PER_BLOCK) * 3;

/// Packet trailer size in bytes: 4 (timestamp) + 2 (motor speed) + 1 (return mode) + 1 (product id).
pub const TRAILER_LEN: usize = 8;

/// Total fixed packet length in bytes.
pub const PACKET_LEN: usize = RAW_BLOCKS_PER_PACKET * RAW_BLOCK_LEN + TRAILER_LEN;

/// Distance raw-unit resolution in metres (0.5 cm).
pub const DISTANCE_RAW_SCALE_M: f64 = 0.005;

/// Azimuth raw-unit resolution in degrees (0.01°).
pub const AZIMUTH_RAW_SCALE_DEG: f64 = 0.01;

/// Raw distance value meaning "no return". MUST NOT be turned into a point.
pub const DISTANCE_NO_RETURN_RAW: u16 = 0xFFFF;

/// Largest raw distance value that still represents a real (clamped) measurement.
pub const DISTANCE_MAX_VALID_RAW: u16 = 0xFFFE;

/// Maximum encodable distance in metres, derived from [`DISTANCE_MAX_VALID_RAW`].
pub const DISTANCE_MAX_VALID_M: f64 = DISTANCE_MAX_VALID_RAW as f64 * DISTANCE_RAW_SCALE_M;

/// Distances below this floor are not worth encoding and become no-return.
pub const DISTANCE_MIN_VALID_M: f64 = 0.02;

/// Motor-speed raw-unit resolution: 0.01 RPM per unit (not 1/60 RPM).
pub const MOTOR_SPEED_RAW_SCALE_RPM: f64 = 0.01;

/// Nominal motor speed the encoder reports, in RPM (600 RPM = 10 Hz rotation).
pub const NOMINAL_MOTOR_RPM: f64 = 600.0;

/// Lower plausibility bound for the trailer's motor-speed field, in RPM. A
/// spinning sensor below this speed is not producing a usable revolution rate.
pub const MOTOR_SPEED_PLAUSIBLE_MIN_RPM: f64 = 300.0;

/// Upper plausibility bound for the trailer's motor-speed field, in RPM.
pub const MOTOR_SPEED_PLAUSIBLE_MAX_RPM: f64 = 1200.0;

/// Azimuth span, in degrees, covered by one data packet at nominal rotation speed
/// and packet rate; used by the encoder to size its per-packet block slices.
pub const NOMINAL_PACKET_AZIMUTH_SPAN_DEG: f64 = 6.0;

// ── Return mode / timestamp mode ──────────────────────────────────────────────

/// Sensor return-mode factory field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReturnMode {
    Strongest = 0x37,
    Last = 0x38,
    Dual = 0x39,
}

impl ReturnMode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x37 => Some(Self::Strongest),
            0x38 => Some(Self::Last),
            0x39 => Some(Self::Dual),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u8 {
        self as u8
    }
}

/// Selects which raw packet field a point's timestamp is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimestampMode {
    /// Packet trailer's microsecond-of-hour field, anchored to the listener's wall clock.
    DeviceInternal,
    /// GPS/PPS-derived timestamp. No GPS subsystem is in scope; falls back to
    /// `SystemWallClock` and logs once per process when this happens.
    GpsDerived,
    /// The listener's local wall-clock time at packet receipt. Default: robust
    /// when no external clock source is available.
    #[default]
    SystemWallClock,
}

// ── Polar point & frame ───────────────────────────────────────────────────────

/// One laser return, in polar coordinates relative to the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarPoint {
    /// Laser channel, in `[0, RINGS)`.
    pub ring: u16,
    /// Azimuth in degrees, in `[0, 360)`.
    pub azimuth_deg: f64,
    /// Range in metres. Always non-negative; "no return" is absence, not zero.
    pub distance_m: f64,
    /// Calibrated reflectivity / intensity.
    pub intensity: u8,
    /// Nanoseconds, monotonic within a sensor session.
    pub timestamp_ns: u64,
    /// Firing-sequence index within the packet, in `[0, BLOCK_SLOTS)`.
    pub block_index: u16,
    /// Monotonic packet sequence assigned by the listener.
    pub source_packet_seq: u64,
}

impl PolarPoint {
    pub fn azimuth_bin(&self, bin_count: u16) -> u16 {
        let scaled = self.azimuth_deg * bin_count as f64 / 360.0;
        (scaled.floor() as i64).rem_euclid(bin_count as i64) as u16
    }
}

/// One complete angular revolution of accumulated points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub sensor_id: String,
    pub sequence: u64,
    pub start_ts_ns: u64,
    pub end_ts_ns: u64,
    /// Ordered by `(source_packet_seq, block_index, ring)`; non-empty.
    pub points: Vec<PolarPoint>,
    /// True if this frame was forced out by the buffer timeout rather than a
    /// detected rotation boundary, and may be shorter than `min_frame_points`.
    pub short: bool,
}

impl Frame {
    pub fn is_empty_invariant_ok(&self) -> bool {
        !self.points.is_empty()
    }
}

// ── Background grid configuration & snapshot ──────────────────────────────────

/// Tunable parameters for background/foreground classification. Swapped
/// atomically by the orchestrator's `set_params` control operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackgroundParams {
    /// EMA weight applied to accepted background observations, in `(0, 1]`.
    pub update_fraction: f64,
    /// Safety multiplier on the noise-derived threshold.
    pub closeness_multiplier: f64,
    /// Additive metres floor on the classification threshold.
    pub safety_margin_m: f64,
    /// Fraction of the observed distance treated as measurement noise.
    pub noise_relative_fraction: f64,
    /// How long, in nanoseconds, a newly-updated cell resists confidence growth.
    pub freeze_duration_ns: u64,
    /// Number of same-ring neighbour cells (K) that must independently confirm
    /// a background match for the neighbour-confirmation rule to apply.
    pub neighbour_confirmation_count: u32,
    /// If true, the first observation of an unseen cell seeds it as background.
    pub seed_from_first_observation: bool,
    /// Observations needed before a cell is considered SETTLED.
    pub settling_threshold: u32,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            update_fraction: 0.1,
            closeness_multiplier: 2.0,
            safety_margin_m: 0.05,
            noise_relative_fraction: 0.01,
            freeze_duration_ns: 200_000_000,
            neighbour_confirmation_count: 2,
            seed_from_first_observation: true,
            settling_threshold: 10,
        }
    }
}

/// Serialisable copy of the background grid's state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundSnapshot {
    pub sequence_number: u64,
    pub timestamp_ns: u64,
    pub ring_count: u16,
    pub azimuth_bin_count: u16,
    pub ring_elevations_deg: Vec<f64>,
    /// Row-major `[ring * azimuth_bin_count + bin]`, length `ring_count * azimuth_bin_count`.
    pub mean_distance_m: Vec<f64>,
    pub confidence: Vec<f64>,
    /// True where the cell has reached the SETTLED state.
    pub settled: Vec<bool>,
}

impl BackgroundSnapshot {
    pub fn cell_count(&self) -> usize {
        self.ring_count as usize * self.azimuth_bin_count as usize
    }

    pub fn is_well_formed(&self) -> bool {
        let n = self.cell_count();
        self.mean_distance_m.len() == n
            && self.confidence.len() == n
            && self.settled.len() == n
            && self.ring_elevations_deg.len() == self.ring_count as usize
    }
}

// ── Acceptance histogram (C5 observability requirement) ──────────────────────

/// Per-distance-bucket accept/reject counters for the background classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceHistogram {
    /// Ascending upper bounds (metres) of each bucket; the last bucket catches
    /// everything above the second-to-last bound.
    pub bucket_upper_bounds_m: Vec<f64>,
    pub accepted: Vec<u64>,
    pub rejected: Vec<u64>,
}

impl AcceptanceHistogram {
    pub fn new(bucket_upper_bounds_m: Vec<f64>) -> Self {
        let n = bucket_upper_bounds_m.len();
        Self {
            bucket_upper_bounds_m,
            accepted: vec![0; n],
            rejected: vec![0; n],
        }
    }

    pub fn bucket_for(&self, distance_m: f64) -> usize {
        self.bucket_upper_bounds_m
            .iter()
            .position(|&bound| distance_m <= bound)
            .unwrap_or(self.bucket_upper_bounds_m.len().saturating_sub(1))
    }
}
