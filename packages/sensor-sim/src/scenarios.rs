//! Named scenario presets exercising the segmentation pipeline end to end.

use sensor_types::BackgroundParams;

use crate::scene::{Intruder, Scene};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Static empty scene, long enough for every grid cell to settle.
    EmptySceneSeeded,
    /// Settled background plus one intruder sweeping across several rings.
    SingleIntruder,
    /// Intruder present throughout; background parameters are swapped
    /// mid-run by the operator rather than by this generator.
    ParameterSwapLive,
    /// Short settle window, intended to be followed by an external reset call.
    ResetClears,
    /// Sparse, slow-moving intruder meant to exercise foreground re-encoding.
    EncoderRoundTrip,
    /// High packet rate into a small queue, meant to exercise overflow counters.
    OverflowNeverBlocks,
}

pub struct ScenarioConfig {
    pub kind: ScenarioKind,
    pub duration_s: f64,
    pub packet_rate_hz: f64,
    pub scene: Scene,
    /// Background parameters a control client would push mid-run for
    /// `ParameterSwapLive`; `None` for scenarios that don't exercise it.
    pub param_override: Option<BackgroundParams>,
}

pub fn preset(name: &str) -> Option<ScenarioConfig> {
    Some(match name {
        "empty-scene-seeded" => ScenarioConfig {
            kind: ScenarioKind::EmptySceneSeeded,
            duration_s: 30.0,
            packet_rate_hz: 100.0,
            scene: Scene::new(8.0, 0.02),
            param_override: None,
        },
        "single-intruder" => ScenarioConfig {
            kind: ScenarioKind::SingleIntruder,
            duration_s: 20.0,
            packet_rate_hz: 100.0,
            scene: Scene::new(8.0, 0.02).with_intruder(Intruder {
                ring: 4,
                azimuth_deg: 0.0,
                distance_m: 2.5,
                angular_velocity_deg_s: 30.0,
                angular_half_width_deg: 2.0,
            }),
            param_override: None,
        },
        "parameter-swap-live" => ScenarioConfig {
            kind: ScenarioKind::ParameterSwapLive,
            duration_s: 25.0,
            packet_rate_hz: 100.0,
            scene: Scene::new(8.0, 0.02).with_intruder(Intruder {
                ring: 6,
                azimuth_deg: 45.0,
                distance_m: 3.0,
                angular_velocity_deg_s: 15.0,
                angular_half_width_deg: 2.0,
            }),
            param_override: Some(BackgroundParams {
                update_fraction: 0.25,
                ..BackgroundParams::default()
            }),
        },
        "reset-clears" => ScenarioConfig {
            kind: ScenarioKind::ResetClears,
            duration_s: 5.0,
            packet_rate_hz: 100.0,
            scene: Scene::new(8.0, 0.02),
            param_override: None,
        },
        "encoder-round-trip" => ScenarioConfig {
            kind: ScenarioKind::EncoderRoundTrip,
            duration_s: 15.0,
            packet_rate_hz: 50.0,
            scene: Scene::new(8.0, 0.0).with_intruder(Intruder {
                ring: 8,
                azimuth_deg: 180.0,
                distance_m: 4.0,
                angular_velocity_deg_s: 5.0,
                angular_half_width_deg: 1.0,
            }),
            param_override: None,
        },
        "overflow-never-blocks" => ScenarioConfig {
            kind: ScenarioKind::OverflowNeverBlocks,
            duration_s: 10.0,
            packet_rate_hz: 2000.0,
            scene: Scene::new(8.0, 0.02).with_intruder(Intruder {
                ring: 0,
                azimuth_deg: 0.0,
                distance_m: 1.5,
                angular_velocity_deg_s: 60.0,
                angular_half_width_deg: 3.0,
            }),
            param_override: None,
        },
        _ => return None,
    })
}

pub fn names() -> &'static [&'static str] {
    &[
        "empty-scene-seeded",
        "single-intruder",
        "parameter-swap-live",
        "reset-clears",
        "encoder-round-trip",
        "overflow-never-blocks",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_resolves_to_a_preset() {
        for name in names() {
            assert!(preset(name).is_some(), "missing preset for {name}");
        }
    }

    #[test]
    fn unknown_name_returns_none() {
        assert!(preset("not-a-real-scenario").is_none());
    }
}
