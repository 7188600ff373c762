//! C4: accumulate points across packets into whole-revolution frames.
//!
//! Rotation boundaries are detected on the first point of each firing block
//! rather than per point, as required so that per-channel azimuth correction
//! cannot itself trigger a spurious split.

use std::collections::HashMap;

use sensor_types::{Frame, PolarPoint};
use tracing::{debug, warn};

/// Azimuth must regress by at least this much, in degrees, to count as a
/// rotation boundary rather than jitter from firing-time correction.
const BOUNDARY_JITTER_TOLERANCE_DEG: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct FrameBuilderConfig {
    pub min_frame_points: usize,
    pub max_frame_rate: f64,
    pub buffer_timeout_ns: u64,
    pub cleanup_interval_ns: u64,
}

#[derive(Debug, Default)]
struct SensorBuffer {
    points: Vec<PolarPoint>,
    last_block_index: Option<u16>,
    last_block_first_azimuth_deg: Option<f64>,
    last_append_ns: u64,
    frame_seq: u64,
    last_emit_ns: Option<u64>,
}

#[derive(Debug, Default)]
pub struct FrameBuilderStats {
    pub discarded_short: u64,
    pub rate_capped: u64,
}

pub struct FrameBuilder {
    config: FrameBuilderConfig,
    buffers: HashMap<String, SensorBuffer>,
    stats: FrameBuilderStats,
}

impl FrameBuilder {
    pub fn new(config: FrameBuilderConfig) -> Self {
        Self {
            config,
            buffers: HashMap::new(),
            stats: FrameBuilderStats::default(),
        }
    }

    pub fn stats(&self) -> &FrameBuilderStats {
        &self.stats
    }

    /// Feeds points parsed from one packet (already in packet order) for a
    /// sensor. Returns zero or one completed frame: a rotation boundary
    /// within this batch can complete at most the buffer that existed before
    /// the batch started.
    pub fn ingest(
        &mut self,
        sensor_id: &str,
        points: &[PolarPoint],
        now_ns: u64,
    ) -> Option<Frame> {
        let buf = self
            .buffers
            .entry(sensor_id.to_string())
            .or_insert_with(SensorBuffer::default);

        let mut boundary_hit = false;
        let mut carry_over = Vec::new();

        for p in points {
            if buf.last_block_index != Some(p.block_index) {
                if let Some(prev_az) = buf.last_block_first_azimuth_deg {
                    if !boundary_hit && p.azimuth_deg + BOUNDARY_JITTER_TOLERANCE_DEG < prev_az {
                        boundary_hit = true;
                    }
                }
                buf.last_block_index = Some(p.block_index);
                buf.last_block_first_azimuth_deg = Some(p.azimuth_deg);
            }

            if boundary_hit {
                carry_over.push(*p);
            } else {
                buf.points.push(*p);
            }
        }

        buf.last_append_ns = now_ns;

        if !boundary_hit {
            return None;
        }

        let completed = std::mem::replace(&mut buf.points, carry_over);
        buf.last_block_index = None;
        buf.last_block_first_azimuth_deg = None;
        self.finalize(sensor_id, completed, now_ns, false)
    }

    /// Forces out any sensor buffer that has gone quiet past
    /// `buffer_timeout_ns`, flagged as a short frame. Intended to be driven
    /// from a periodic tick alongside live packet ingest.
    pub fn check_timeouts(&mut self, now_ns: u64) -> Vec<Frame> {
        let timeout_ns = self.config.buffer_timeout_ns;
        let mut timed_out = Vec::new();
        for (sensor_id, buf) in self.buffers.iter_mut() {
            if !buf.points.is_empty() && now_ns.saturating_sub(buf.last_append_ns) >= timeout_ns {
                timed_out.push(sensor_id.clone());
            }
        }

        let mut frames = Vec::new();
        for sensor_id in timed_out {
            let completed = {
                let buf = self.buffers.get_mut(&sensor_id).unwrap();
                buf.last_block_index = None;
                buf.last_block_first_azimuth_deg = None;
                std::mem::take(&mut buf.points)
            };
            if let Some(frame) = self.finalize(&sensor_id, completed, now_ns, true) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Drops buffers for sensors that have not produced any points within
    /// `cleanup_interval_ns`.
    pub fn cleanup(&mut self, now_ns: u64) {
        let before = self.buffers.len();
        self.buffers
            .retain(|_, buf| now_ns.saturating_sub(buf.last_append_ns) < self.config.cleanup_interval_ns);
        let removed = before - self.buffers.len();
        if removed > 0 {
            debug!(removed, "reclaimed idle sensor frame buffers");
        }
    }

    fn finalize(
        &mut self,
        sensor_id: &str,
        points: Vec<PolarPoint>,
        now_ns: u64,
        timeout_forced: bool,
    ) -> Option<Frame> {
        if points.is_empty() {
            return None;
        }

        if !timeout_forced && points.len() < self.config.min_frame_points {
            self.stats.discarded_short += 1;
            warn!(
                sensor_id,
                len = points.len(),
                min = self.config.min_frame_points,
                "discarding short frame"
            );
            return None;
        }

        let buf = self.buffers.get_mut(sensor_id).expect("buffer must exist");

        if let Some(last_emit_ns) = buf.last_emit_ns {
            let min_period_ns = (1.0e9 / self.config.max_frame_rate) as u64;
            if now_ns.saturating_sub(last_emit_ns) < min_period_ns {
                self.stats.rate_capped += 1;
                warn!(sensor_id, "dropping frame: exceeds max_frame_rate");
                return None;
            }
        }

        let mut sorted = points;
        sorted.sort_by_key(|p| (p.source_packet_seq, p.block_index, p.ring));

        let start_ts_ns = sorted.first().map(|p| p.timestamp_ns).unwrap_or(now_ns);
        let end_ts_ns = sorted.last().map(|p| p.timestamp_ns).unwrap_or(now_ns);
        let sequence = buf.frame_seq;
        buf.frame_seq += 1;
        buf.last_emit_ns = Some(now_ns);

        Some(Frame {
            sensor_id: sensor_id.to_string(),
            sequence,
            start_ts_ns,
            end_ts_ns,
            points: sorted,
            short: timeout_forced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FrameBuilderConfig {
        FrameBuilderConfig {
            min_frame_points: 4,
            max_frame_rate: 1000.0,
            buffer_timeout_ns: 50_000_000,
            cleanup_interval_ns: 1_000_000_000,
        }
    }

    fn point(az: f64, block: u16, seq: u64) -> PolarPoint {
        PolarPoint {
            ring: 0,
            azimuth_deg: az,
            distance_m: 5.0,
            intensity: 10,
            timestamp_ns: 0,
            block_index: block,
            source_packet_seq: seq,
        }
    }

    #[test]
    fn rotation_boundary_splits_frame() {
        let mut fb = FrameBuilder::new(cfg());
        let first_batch = vec![point(0.0, 0, 1), point(90.0, 1, 1), point(180.0, 2, 1)];
        assert!(fb.ingest("s1", &first_batch, 0).is_none());

        let second_batch = vec![point(270.0, 3, 1), point(5.0, 4, 2)];
        let frame = fb.ingest("s1", &second_batch, 1_000_000).unwrap();
        assert_eq!(frame.points.len(), 4);
        assert!(!frame.short);
    }

    #[test]
    fn short_frame_is_discarded_unless_timeout_forced() {
        let mut fb = FrameBuilder::new(cfg());
        let batch = vec![point(0.0, 0, 1), point(90.0, 1, 1)];
        fb.ingest("s1", &batch, 0);
        let wrap = vec![point(0.0, 2, 2)];
        assert!(fb.ingest("s1", &wrap, 1).is_none());
        assert_eq!(fb.stats().discarded_short, 1);
    }

    #[test]
    fn timeout_forces_short_frame() {
        let mut fb = FrameBuilder::new(cfg());
        let batch = vec![point(0.0, 0, 1), point(90.0, 1, 1)];
        fb.ingest("s1", &batch, 0);
        let frames = fb.check_timeouts(100_000_000);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].short);
    }

    #[test]
    fn cleanup_drops_idle_buffers() {
        let mut fb = FrameBuilder::new(cfg());
        let batch = vec![point(0.0, 0, 1)];
        fb.ingest("s1", &batch, 0);
        fb.cleanup(2_000_000_000);
        assert!(fb.buffers.is_empty());
    }
}
