//! C5: polar background/foreground segmentation grid.
//!
//! The grid is the one piece of shared mutable state in the pipeline, so it
//! follows the shared-state convention used for the race-state handle
//! elsewhere in this codebase: a `tokio::sync::RwLock` around the cell
//! array, with hot-swappable parameters kept behind their own
//! `std::sync::RwLock<Arc<...>>` so `set_params` never waits on a
//! classification pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use sensor_types::{AcceptanceHistogram, BackgroundParams, BackgroundSnapshot, Frame};
use tokio::sync::RwLock as TokioRwLock;
use tracing::warn;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy)]
struct GridCell {
    mean_distance_m: f64,
    confidence: f64,
    times_seen: u32,
    last_update_ts_ns: u64,
    frozen_until_ts_ns: u64,
}

impl Default for GridCell {
    fn default() -> Self {
        Self {
            mean_distance_m: 0.0,
            confidence: 0.0,
            times_seen: 0,
            last_update_ts_ns: 0,
            frozen_until_ts_ns: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridStatus {
    pub nonzero_cells: usize,
    pub mean_confidence: f64,
    pub settling_complete_ratio: f64,
    pub last_update_ts_ns: u64,
}

pub struct BackgroundGrid {
    ring_count: u16,
    azimuth_bin_count: u16,
    ring_elevations_deg: StdRwLock<Vec<f64>>,
    cells: TokioRwLock<Vec<GridCell>>,
    params: StdRwLock<Arc<BackgroundParams>>,
    histogram_bounds: Vec<f64>,
    histogram_accepted: Vec<AtomicU64>,
    histogram_rejected: Vec<AtomicU64>,
    sequence_number: AtomicU64,
    last_update_ts_ns: AtomicU64,
}

impl BackgroundGrid {
    pub fn new(
        ring_count: u16,
        azimuth_bin_count: u16,
        ring_elevations_deg: Vec<f64>,
        params: BackgroundParams,
        histogram_bounds: Vec<f64>,
    ) -> Self {
        let cell_count = ring_count as usize * azimuth_bin_count as usize;
        let bucket_count = histogram_bounds.len();
        Self {
            ring_count,
            azimuth_bin_count,
            ring_elevations_deg: StdRwLock::new(ring_elevations_deg),
            cells: TokioRwLock::new(vec![GridCell::default(); cell_count]),
            params: StdRwLock::new(Arc::new(params)),
            histogram_bounds,
            histogram_accepted: (0..bucket_count).map(|_| AtomicU64::new(0)).collect(),
            histogram_rejected: (0..bucket_count).map(|_| AtomicU64::new(0)).collect(),
            sequence_number: AtomicU64::new(0),
            last_update_ts_ns: AtomicU64::new(0),
        }
    }

    fn idx(&self, ring: u16, bin: u16) -> usize {
        ring as usize * self.azimuth_bin_count as usize + bin as usize
    }

    fn bucket_for(&self, distance_m: f64) -> usize {
        self.histogram_bounds
            .iter()
            .position(|&bound| distance_m <= bound)
            .unwrap_or(self.histogram_bounds.len().saturating_sub(1))
    }

    /// The pipeline hot path: classifies every point in `frame` as
    /// background/foreground and folds accepted background points back into
    /// the grid. Returns a `is_foreground` mask parallel to `frame.points`.
    pub async fn classify_and_update(&self, frame: &Frame) -> Vec<bool> {
        let params = self.params.read().unwrap().clone();
        let now_ns = frame.end_ts_ns;
        let mut cells = self.cells.write().await;
        let mut mask = Vec::with_capacity(frame.points.len());
        let mut logged_invariant_violation = false;

        for p in &frame.points {
            if p.ring >= self.ring_count
                || !(0.0..360.0).contains(&p.azimuth_deg)
                || !p.distance_m.is_finite()
            {
                if !logged_invariant_violation {
                    warn!(
                        sensor_id = %frame.sensor_id,
                        ring = p.ring,
                        azimuth_deg = p.azimuth_deg,
                        distance_m = p.distance_m,
                        "point violates grid invariants, treating as foreground"
                    );
                    logged_invariant_violation = true;
                }
                mask.push(true);
                continue;
            }

            let bin = p.azimuth_bin(self.azimuth_bin_count);
            let idx = self.idx(p.ring, bin);
            let d_obs = p.distance_m;
            let noise = params.noise_relative_fraction * d_obs;
            let threshold = params.closeness_multiplier * noise + params.safety_margin_m;

            let times_seen = cells[idx].times_seen;
            let is_background = if times_seen > 0 {
                let diff = (d_obs - cells[idx].mean_distance_m).abs();
                diff <= threshold
                    || Self::neighbour_confirms(
                        &cells,
                        self.azimuth_bin_count,
                        p.ring,
                        bin,
                        d_obs,
                        threshold,
                        params.neighbour_confirmation_count,
                    )
            } else {
                params.seed_from_first_observation
            };

            let bucket = self.bucket_for(d_obs);
            if is_background {
                self.histogram_accepted[bucket].fetch_add(1, Ordering::Relaxed);
                let cell = &mut cells[idx];
                let frozen = now_ns < cell.frozen_until_ts_ns;
                if cell.times_seen == 0 {
                    cell.mean_distance_m = d_obs;
                    cell.confidence = 1.0 / params.settling_threshold.max(1) as f64;
                } else {
                    cell.mean_distance_m = (1.0 - params.update_fraction) * cell.mean_distance_m
                        + params.update_fraction * d_obs;
                    if !frozen {
                        cell.confidence =
                            (cell.confidence + 1.0 / params.settling_threshold.max(1) as f64)
                                .min(1.0);
                    }
                }
                cell.times_seen += 1;
                cell.last_update_ts_ns = now_ns;
                cell.frozen_until_ts_ns = now_ns + params.freeze_duration_ns;
            } else {
                self.histogram_rejected[bucket].fetch_add(1, Ordering::Relaxed);
            }
            mask.push(!is_background);
        }

        self.last_update_ts_ns.store(now_ns, Ordering::Relaxed);
        mask
    }

    fn neighbour_confirms(
        cells: &[GridCell],
        azimuth_bin_count: u16,
        ring: u16,
        bin: u16,
        d_obs: f64,
        threshold: f64,
        required: u32,
    ) -> bool {
        if required == 0 {
            return false;
        }
        let mut confirmations = 0u32;
        for offset in 1..=required as i64 {
            for delta in [offset, -offset] {
                let nb_bin = (bin as i64 + delta).rem_euclid(azimuth_bin_count as i64) as u16;
                let idx = ring as usize * azimuth_bin_count as usize + nb_bin as usize;
                let cell = &cells[idx];
                if cell.times_seen > 0 && (d_obs - cell.mean_distance_m).abs() <= threshold {
                    confirmations += 1;
                }
            }
        }
        confirmations >= required
    }

    pub async fn reset(&self) {
        let mut cells = self.cells.write().await;
        for cell in cells.iter_mut() {
            *cell = GridCell::default();
        }
    }

    pub fn set_params(&self, params: BackgroundParams) {
        *self.params.write().unwrap() = Arc::new(params);
    }

    pub fn params(&self) -> BackgroundParams {
        *self.params.read().unwrap().as_ref()
    }

    pub fn set_ring_elevations(&self, elevations: Vec<f64>) {
        *self.ring_elevations_deg.write().unwrap() = elevations;
    }

    pub async fn snapshot(&self) -> BackgroundSnapshot {
        let cells = self.cells.read().await;
        let elevations = self.ring_elevations_deg.read().unwrap().clone();
        let settling_threshold = self.params.read().unwrap().settling_threshold;

        let mean_distance_m = cells.iter().map(|c| c.mean_distance_m).collect();
        let confidence = cells.iter().map(|c| c.confidence).collect();
        let settled = cells
            .iter()
            .map(|c| c.times_seen >= settling_threshold)
            .collect();

        BackgroundSnapshot {
            sequence_number: self.sequence_number.fetch_add(1, Ordering::Relaxed),
            timestamp_ns: self.last_update_ts_ns.load(Ordering::Relaxed),
            ring_count: self.ring_count,
            azimuth_bin_count: self.azimuth_bin_count,
            ring_elevations_deg: elevations,
            mean_distance_m,
            confidence,
            settled,
        }
    }

    pub async fn load_snapshot(&self, snap: BackgroundSnapshot) -> Result<(), ConfigError> {
        if !snap.is_well_formed() {
            return Err(ConfigError::InvalidSnapshot(
                "array lengths do not match ring_count * azimuth_bin_count".to_string(),
            ));
        }
        if snap.ring_count != self.ring_count || snap.azimuth_bin_count != self.azimuth_bin_count {
            return Err(ConfigError::InvalidSnapshot(format!(
                "snapshot grid shape {}x{} does not match configured {}x{}",
                snap.ring_count, snap.azimuth_bin_count, self.ring_count, self.azimuth_bin_count
            )));
        }

        let settling_threshold = self.params.read().unwrap().settling_threshold;
        let mut cells = self.cells.write().await;
        for (i, cell) in cells.iter_mut().enumerate() {
            let confidence = snap.confidence[i];
            let times_seen = if confidence <= 0.0 {
                0
            } else if snap.settled[i] {
                settling_threshold
            } else {
                ((confidence * settling_threshold as f64).round() as u32).max(1)
            };
            *cell = GridCell {
                mean_distance_m: snap.mean_distance_m[i],
                confidence,
                times_seen,
                last_update_ts_ns: snap.timestamp_ns,
                frozen_until_ts_ns: 0,
            };
        }
        *self.ring_elevations_deg.write().unwrap() = snap.ring_elevations_deg.clone();
        self.last_update_ts_ns
            .store(snap.timestamp_ns, Ordering::Relaxed);
        Ok(())
    }

    pub async fn status(&self) -> GridStatus {
        let cells = self.cells.read().await;
        let settling_threshold = self.params.read().unwrap().settling_threshold;
        let nonzero_cells = cells.iter().filter(|c| c.times_seen > 0).count();
        let mean_confidence = if cells.is_empty() {
            0.0
        } else {
            cells.iter().map(|c| c.confidence).sum::<f64>() / cells.len() as f64
        };
        let settled = cells
            .iter()
            .filter(|c| c.times_seen >= settling_threshold)
            .count();
        let settling_complete_ratio = if cells.is_empty() {
            0.0
        } else {
            settled as f64 / cells.len() as f64
        };

        GridStatus {
            nonzero_cells,
            mean_confidence,
            settling_complete_ratio,
            last_update_ts_ns: self.last_update_ts_ns.load(Ordering::Relaxed),
        }
    }

    pub fn status_extended(&self) -> AcceptanceHistogram {
        AcceptanceHistogram {
            bucket_upper_bounds_m: self.histogram_bounds.clone(),
            accepted: self
                .histogram_accepted
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            rejected: self
                .histogram_rejected
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_types::PolarPoint;

    fn grid() -> BackgroundGrid {
        BackgroundGrid::new(
            2,
            4,
            vec![0.0, 0.0],
            BackgroundParams {
                seed_from_first_observation: true,
                ..Default::default()
            },
            vec![1.0, 5.0, 50.0],
        )
    }

    fn point(ring: u16, azimuth_deg: f64, distance_m: f64) -> PolarPoint {
        PolarPoint {
            ring,
            azimuth_deg,
            distance_m,
            intensity: 50,
            timestamp_ns: 0,
            block_index: 0,
            source_packet_seq: 0,
        }
    }

    fn frame(points: Vec<PolarPoint>, end_ts_ns: u64) -> Frame {
        Frame {
            sensor_id: "s1".to_string(),
            sequence: 0,
            start_ts_ns: 0,
            end_ts_ns,
            points,
            short: false,
        }
    }

    #[tokio::test]
    async fn first_observation_seeds_as_background() {
        let grid = grid();
        let f = frame(vec![point(0, 10.0, 10.0)], 1);
        let mask = grid.classify_and_update(&f).await;
        assert_eq!(mask, vec![false]);
    }

    #[tokio::test]
    async fn second_observation_near_seed_is_background() {
        let grid = grid();
        let f1 = frame(vec![point(0, 10.0, 10.0)], 1);
        grid.classify_and_update(&f1).await;
        let f2 = frame(vec![point(0, 10.0, 10.02)], 2);
        let mask = grid.classify_and_update(&f2).await;
        assert_eq!(mask, vec![false]);
    }

    #[tokio::test]
    async fn intruder_far_from_seed_is_foreground() {
        let grid = grid();
        let f1 = frame(vec![point(0, 10.0, 10.0)], 1);
        grid.classify_and_update(&f1).await;
        let f2 = frame(vec![point(0, 10.0, 4.0)], 2);
        let mask = grid.classify_and_update(&f2).await;
        assert_eq!(mask, vec![true]);
    }

    #[tokio::test]
    async fn reset_returns_cells_to_unseen() {
        let grid = grid();
        let f1 = frame(vec![point(0, 10.0, 10.0)], 1);
        grid.classify_and_update(&f1).await;
        grid.reset().await;
        let status = grid.status().await;
        assert_eq!(status.nonzero_cells, 0);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_load() {
        let grid1 = grid();
        let f1 = frame(vec![point(0, 10.0, 10.0), point(1, 100.0, 20.0)], 1);
        grid1.classify_and_update(&f1).await;
        let snap = grid1.snapshot().await;

        let grid2 = grid();
        grid2.load_snapshot(snap).await.unwrap();
        let f2 = frame(vec![point(0, 10.0, 10.01)], 2);
        let mask = grid2.classify_and_update(&f2).await;
        assert_eq!(mask, vec![false]);
    }

    #[tokio::test]
    async fn load_snapshot_rejects_mismatched_shape() {
        let grid = grid();
        let mut snap = grid.snapshot().await;
        snap.ring_count = 99;
        let err = grid.load_snapshot(snap).await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSnapshot(_)));
    }
}
