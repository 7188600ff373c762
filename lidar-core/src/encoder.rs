//! C7: re-encode the foreground subset of a frame into wire-format packets.
//!
//! Output packets are handed to a dedicated sender task over a bounded
//! queue, following the one-task-per-socket convention used for UDP egress
//! throughout this codebase; queue overflow drops the newest packet and is
//! counted rather than ever blocking the encoder.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use sensor_types::{
    PolarPoint, ReturnMode, BLOCK_IDENTIFIER, BLOCK_SLOTS, DISTANCE_MAX_VALID_M,
    DISTANCE_MAX_VALID_RAW, DISTANCE_MIN_VALID_M, DISTANCE_NO_RETURN_RAW, DISTANCE_RAW_SCALE_M,
    MOTOR_SPEED_RAW_SCALE_RPM, NOMINAL_MOTOR_RPM, NOMINAL_PACKET_AZIMUTH_SPAN_DEG, PACKET_LEN,
    RAW_BLOCKS_PER_PACKET, RAW_BLOCK_LEN, RINGS, SEQUENCES_PER_BLOCK,
};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct EncoderStats {
    packets_emitted: AtomicU64,
    points_encoded: AtomicU64,
    points_lost_clamped: AtomicU64,
    blocks_emitted_empty: AtomicU64,
    queue_overflow_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStatsSnapshot {
    pub packets_emitted: u64,
    pub points_encoded: u64,
    pub points_lost_clamped: u64,
    pub blocks_emitted_empty: u64,
    pub queue_overflow_dropped: u64,
}

impl EncoderStats {
    pub fn snapshot(&self) -> EncoderStatsSnapshot {
        EncoderStatsSnapshot {
            packets_emitted: self.packets_emitted.load(Ordering::Relaxed),
            points_encoded: self.points_encoded.load(Ordering::Relaxed),
            points_lost_clamped: self.points_lost_clamped.load(Ordering::Relaxed),
            blocks_emitted_empty: self.blocks_emitted_empty.load(Ordering::Relaxed),
            queue_overflow_dropped: self.queue_overflow_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn log_sampled(&self) {
        let s = self.snapshot();
        info!(
            packets_emitted = s.packets_emitted,
            points_encoded = s.points_encoded,
            points_lost_clamped = s.points_lost_clamped,
            blocks_emitted_empty = s.blocks_emitted_empty,
            queue_overflow_dropped = s.queue_overflow_dropped,
            "foreground encoder stats"
        );
    }
}

pub struct ForegroundEncoder {
    stats: Arc<EncoderStats>,
}

impl ForegroundEncoder {
    pub fn new(stats: Arc<EncoderStats>) -> Self {
        Self { stats }
    }

    pub fn stats(&self) -> &Arc<EncoderStats> {
        &self.stats
    }

    /// Encodes the foreground subset of one frame into zero or more
    /// complete wire-format packets, partitioning blocks by azimuth rather
    /// than by the points' original source block index.
    pub fn encode(&self, points: &[PolarPoint], packet_wall_ts_ns: u64) -> Vec<Vec<u8>> {
        if points.is_empty() {
            return Vec::new();
        }

        let mut sorted: Vec<&PolarPoint> = points.iter().collect();
        sorted.sort_by(|a, b| a.azimuth_deg.partial_cmp(&b.azimuth_deg).unwrap());

        // One slice per raw block, matching the single wire azimuth field each
        // raw block carries; both interleaved sequences of a block share it.
        let slice_width_deg = NOMINAL_PACKET_AZIMUTH_SPAN_DEG / RAW_BLOCKS_PER_PACKET as f64;
        let mut packets = Vec::new();
        let mut chunk: Vec<&PolarPoint> = Vec::new();
        let mut chunk_base: Option<f64> = None;

        for p in sorted {
            match chunk_base {
                None => {
                    chunk_base = Some(p.azimuth_deg);
                    chunk.push(p);
                }
                Some(base) if p.azimuth_deg - base < NOMINAL_PACKET_AZIMUTH_SPAN_DEG => {
                    chunk.push(p);
                }
                Some(_) => {
                    packets.push(self.encode_chunk(&chunk, chunk_base.unwrap(), slice_width_deg, packet_wall_ts_ns));
                    chunk_base = Some(p.azimuth_deg);
                    chunk = vec![p];
                }
            }
        }
        if !chunk.is_empty() {
            packets.push(self.encode_chunk(&chunk, chunk_base.unwrap(), slice_width_deg, packet_wall_ts_ns));
        }

        self.stats.packets_emitted.fetch_add(packets.len() as u64, Ordering::Relaxed);
        packets
    }

    fn encode_chunk(
        &self,
        chunk: &[&PolarPoint],
        base_azimuth_deg: f64,
        slice_width_deg: f64,
        packet_wall_ts_ns: u64,
    ) -> Vec<u8> {
        // slot[raw_block][sequence][ring] -> Option<&PolarPoint>
        let mut slots: Vec<Option<&PolarPoint>> = vec![None; BLOCK_SLOTS * RINGS];

        for p in chunk {
            let mut raw_block = ((p.azimuth_deg - base_azimuth_deg) / slice_width_deg).floor() as i64;
            raw_block = raw_block.clamp(0, RAW_BLOCKS_PER_PACKET as i64 - 1);
            // A raw block's single wire azimuth field is its slice's left edge;
            // which half of the slice a point falls in picks its sequence, since
            // the wire format has no second azimuth to distinguish them.
            let frac = (p.azimuth_deg - base_azimuth_deg - raw_block as f64 * slice_width_deg) / slice_width_deg;
            let sequence = if frac < 0.5 { 0 } else { 1 };
            let block_index = raw_block as usize * SEQUENCES_PER_BLOCK + sequence;
            let slot_idx = block_index * RINGS + p.ring as usize;
            if slots[slot_idx].is_none() {
                slots[slot_idx] = Some(p);
            }
        }

        let mut buf = vec![0u8; PACKET_LEN];
        for raw_block in 0..RAW_BLOCKS_PER_PACKET {
            let base = raw_block * RAW_BLOCK_LEN;
            LittleEndian::write_u16(&mut buf[base..base + 2], BLOCK_IDENTIFIER);

            let block_base_azimuth_deg =
                (base_azimuth_deg + raw_block as f64 * slice_width_deg).rem_euclid(360.0);
            let raw_azimuth = (block_base_azimuth_deg * 100.0).round() as u16;
            LittleEndian::write_u16(&mut buf[base + 2..base + 4], raw_azimuth);

            for sequence in 0..SEQUENCES_PER_BLOCK {
                let block_index = raw_block * SEQUENCES_PER_BLOCK + sequence;

                let mut block_nonempty = false;
                for ring in 0..RINGS {
                    let offset = base + 4 + (sequence * RINGS + ring) * 3;
                    let slot = slots[block_index * RINGS + ring];
                    let raw_distance = match slot {
                        Some(p) => {
                            self.stats.points_encoded.fetch_add(1, Ordering::Relaxed);
                            block_nonempty = true;
                            if p.distance_m < DISTANCE_MIN_VALID_M {
                                self.stats.points_lost_clamped.fetch_add(1, Ordering::Relaxed);
                                DISTANCE_NO_RETURN_RAW
                            } else if p.distance_m > DISTANCE_MAX_VALID_M {
                                self.stats.points_lost_clamped.fetch_add(1, Ordering::Relaxed);
                                DISTANCE_MAX_VALID_RAW
                            } else {
                                (p.distance_m / DISTANCE_RAW_SCALE_M).round() as u16
                            }
                        }
                        None => DISTANCE_NO_RETURN_RAW,
                    };
                    let intensity = slot.map(|p| p.intensity).unwrap_or(0);
                    LittleEndian::write_u16(&mut buf[offset..offset + 2], raw_distance);
                    buf[offset + 2] = intensity;
                }
                if !block_nonempty {
                    self.stats.blocks_emitted_empty.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let trailer_base = RAW_BLOCKS_PER_PACKET * RAW_BLOCK_LEN;
        let us_of_hour = (packet_wall_ts_ns / 1_000) % 3_600_000_000;
        LittleEndian::write_u32(&mut buf[trailer_base..trailer_base + 4], us_of_hour as u32);
        let motor_speed_raw = (NOMINAL_MOTOR_RPM / MOTOR_SPEED_RAW_SCALE_RPM).round() as u16;
        LittleEndian::write_u16(&mut buf[trailer_base + 4..trailer_base + 6], motor_speed_raw);
        buf[trailer_base + 6] = ReturnMode::Strongest.to_raw();
        buf[trailer_base + 7] = 0x22;

        buf
    }
}

/// Enqueues an already-encoded packet for transmission, dropping the newest
/// packet and counting it if the queue is full.
pub fn try_enqueue(tx: &mpsc::Sender<Vec<u8>>, packet: Vec<u8>, stats: &EncoderStats) {
    if tx.try_send(packet).is_err() {
        stats.queue_overflow_dropped.fetch_add(1, Ordering::Relaxed);
        warn!("foreground encoder queue full, dropping packet");
    }
}

/// Dedicated sender task: owns the egress socket, drains the queue until
/// cancellation, and drains any remaining backlog up to the caller's
/// shutdown deadline before returning.
pub async fn run_sender(
    mut rx: mpsc::Receiver<Vec<u8>>,
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe_packet = rx.recv() => {
                match maybe_packet {
                    Some(packet) => {
                        if let Err(e) = socket.send_to(&packet, dest).await {
                            warn!(error = %e, "foreground packet send failed");
                        }
                    }
                    None => break,
                }
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::parse as parse_packet;
    use sensor_types::TimestampMode;

    fn point(ring: u16, azimuth_deg: f64, distance_m: f64) -> PolarPoint {
        PolarPoint {
            ring,
            azimuth_deg,
            distance_m,
            intensity: 77,
            timestamp_ns: 0,
            block_index: 0,
            source_packet_seq: 0,
        }
    }

    #[test]
    fn empty_input_produces_no_packets() {
        let encoder = ForegroundEncoder::new(Arc::new(EncoderStats::default()));
        assert!(encoder.encode(&[], 0).is_empty());
    }

    #[test]
    fn round_trip_preserves_ring_and_approximate_distance() {
        let encoder = ForegroundEncoder::new(Arc::new(EncoderStats::default()));
        let points = vec![point(3, 10.0, 12.345), point(7, 10.02, 8.0)];
        let packets = encoder.encode(&points, 0);
        assert_eq!(packets.len(), 1);

        let parsed = parse_packet(&packets[0], 0, 1, TimestampMode::SystemWallClock).unwrap();
        let distances: Vec<f64> = parsed
            .iter()
            .filter(|p| p.ring == 3)
            .map(|p| p.distance_m)
            .collect();
        assert_eq!(distances.len(), 1);
        assert!((distances[0] - 12.345).abs() < DISTANCE_RAW_SCALE_M);
    }

    #[test]
    fn sequence_one_point_decodes_under_its_own_blocks_azimuth() {
        let encoder = ForegroundEncoder::new(Arc::new(EncoderStats::default()));
        // Both points fall within the same 0.5 deg raw-block slice starting at
        // 10.0; the second sits in the slice's back half and must land in
        // sequence 1 of that same raw block rather than spilling its azimuth
        // into the next block's slice.
        let points = vec![point(2, 10.0, 5.0), point(9, 10.3, 5.0)];
        let packets = encoder.encode(&points, 0);
        assert_eq!(packets.len(), 1);

        let parsed = parse_packet(&packets[0], 0, 1, TimestampMode::SystemWallClock).unwrap();
        let p1 = parsed.iter().find(|p| p.ring == 2).unwrap();
        let p2 = parsed.iter().find(|p| p.ring == 9).unwrap();
        assert_eq!(p1.block_index / SEQUENCES_PER_BLOCK as u16, p2.block_index / SEQUENCES_PER_BLOCK as u16);
        assert_ne!(p1.block_index, p2.block_index);
        assert!((p2.azimuth_deg - 10.0).abs() < 0.1);
    }

    #[test]
    fn oversized_distance_clamps_to_max_valid_not_no_return() {
        let encoder = ForegroundEncoder::new(Arc::new(EncoderStats::default()));
        let points = vec![point(0, 0.0, DISTANCE_MAX_VALID_M + 50.0)];
        let packets = encoder.encode(&points, 0);
        let parsed = parse_packet(&packets[0], 0, 1, TimestampMode::SystemWallClock).unwrap();
        let p = parsed.iter().find(|p| p.ring == 0).unwrap();
        assert!((p.distance_m - DISTANCE_MAX_VALID_M).abs() < DISTANCE_RAW_SCALE_M);
        assert_eq!(encoder.stats().snapshot().points_lost_clamped, 1);
    }

    #[test]
    fn sparse_points_spread_across_distinct_blocks() {
        let encoder = ForegroundEncoder::new(Arc::new(EncoderStats::default()));
        let points = vec![point(0, 0.0, 5.0), point(0, 5.9, 5.0)];
        let packets = encoder.encode(&points, 0);
        assert_eq!(packets.len(), 1);
        let parsed = parse_packet(&packets[0], 0, 1, TimestampMode::SystemWallClock).unwrap();
        let ring0: Vec<_> = parsed.iter().filter(|p| p.ring == 0).collect();
        assert_eq!(ring0.len(), 2);
        assert_ne!(ring0[0].block_index, ring0[1].block_index);
    }
}
