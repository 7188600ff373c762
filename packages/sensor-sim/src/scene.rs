//! Synthetic scene model: a static background plus an optional moving
//! intruder, sampled into per-ring distances for the packet generator.

use rand::Rng;
use rand_distr::{Distribution, Normal};

/// A single moving foreground object, angularly narrow and confined to one ring.
#[derive(Debug, Clone, Copy)]
pub struct Intruder {
    pub ring: u16,
    pub azimuth_deg: f64,
    pub distance_m: f64,
    pub angular_velocity_deg_s: f64,
    pub angular_half_width_deg: f64,
}

pub struct Scene {
    pub background_distance_m: f64,
    pub noise_std_m: f64,
    pub intruder: Option<Intruder>,
}

impl Scene {
    pub fn new(background_distance_m: f64, noise_std_m: f64) -> Self {
        Self {
            background_distance_m,
            noise_std_m,
            intruder: None,
        }
    }

    pub fn with_intruder(mut self, intruder: Intruder) -> Self {
        self.intruder = Some(intruder);
        self
    }

    pub fn tick(&mut self, dt_s: f64) {
        if let Some(intruder) = &mut self.intruder {
            intruder.azimuth_deg =
                (intruder.azimuth_deg + intruder.angular_velocity_deg_s * dt_s).rem_euclid(360.0);
        }
    }

    /// Samples the range at one (ring, azimuth) direction, folding in the
    /// intruder (if its angular window covers this azimuth on this ring) and
    /// measurement noise.
    pub fn distance_at(&self, ring: u16, azimuth_deg: f64, rng: &mut impl Rng) -> f64 {
        let noise = if self.noise_std_m > 0.0 {
            Normal::new(0.0, self.noise_std_m).unwrap().sample(rng)
        } else {
            0.0
        };

        if let Some(intruder) = &self.intruder {
            if intruder.ring == ring
                && angular_distance_deg(azimuth_deg, intruder.azimuth_deg)
                    <= intruder.angular_half_width_deg
            {
                return (intruder.distance_m + noise).max(0.0);
            }
        }
        (self.background_distance_m + noise).max(0.0)
    }
}

fn angular_distance_deg(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intruder_azimuth_advances_and_wraps() {
        let mut intruder = Intruder {
            ring: 0,
            azimuth_deg: 350.0,
            distance_m: 3.0,
            angular_velocity_deg_s: 20.0,
            angular_half_width_deg: 2.0,
        };
        intruder.azimuth_deg = (intruder.azimuth_deg + intruder.angular_velocity_deg_s * 1.0).rem_euclid(360.0);
        assert!((intruder.azimuth_deg - 10.0).abs() < 1e-9);
    }

    #[test]
    fn distance_at_prefers_intruder_within_window() {
        let scene = Scene::new(10.0, 0.0).with_intruder(Intruder {
            ring: 3,
            azimuth_deg: 90.0,
            distance_m: 2.0,
            angular_velocity_deg_s: 0.0,
            angular_half_width_deg: 1.0,
        });
        let mut rng = rand::thread_rng();
        assert_eq!(scene.distance_at(3, 90.0, &mut rng), 2.0);
        assert_eq!(scene.distance_at(3, 180.0, &mut rng), 10.0);
        assert_eq!(scene.distance_at(0, 90.0, &mut rng), 10.0);
    }
}
