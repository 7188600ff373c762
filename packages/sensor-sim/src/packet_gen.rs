//! Wire-format packet generation from a [`Scene`].
//!
//! Builds fixed-length data packets directly from the wire-format constants
//! in `sensor-types`, independent of `lidar-core`'s parser/encoder — this
//! generator plays the part of real sensor firmware, not the pipeline under
//! test.

use byteorder::{ByteOrder, LittleEndian};
use rand::Rng;
use sensor_types::{
    ReturnMode, BLOCK_IDENTIFIER, DISTANCE_MAX_VALID_RAW, DISTANCE_NO_RETURN_RAW,
    DISTANCE_RAW_SCALE_M, MOTOR_SPEED_RAW_SCALE_RPM, NOMINAL_MOTOR_RPM,
    NOMINAL_PACKET_AZIMUTH_SPAN_DEG, PACKET_LEN, RAW_BLOCKS_PER_PACKET, RAW_BLOCK_LEN, RINGS,
    SEQUENCES_PER_BLOCK,
};

use crate::scene::Scene;

pub struct PacketGenerator {
    product_id: u8,
}

impl PacketGenerator {
    pub fn new() -> Self {
        Self { product_id: 0x21 }
    }

    /// Builds one fixed-length packet starting at `base_azimuth_deg`, sampling
    /// `scene` for every (ring, block_index) firing slot it covers.
    pub fn generate(
        &self,
        scene: &Scene,
        base_azimuth_deg: f64,
        packet_wall_ts_ns: u64,
        rng: &mut impl Rng,
    ) -> Vec<u8> {
        let slice_width_deg =
            NOMINAL_PACKET_AZIMUTH_SPAN_DEG / (RAW_BLOCKS_PER_PACKET * SEQUENCES_PER_BLOCK) as f64;
        let mut buf = vec![0u8; PACKET_LEN];

        for raw_block in 0..RAW_BLOCKS_PER_PACKET {
            let base = raw_block * RAW_BLOCK_LEN;
            LittleEndian::write_u16(&mut buf[base..base + 2], BLOCK_IDENTIFIER);

            let block_azimuth_deg =
                (base_azimuth_deg + (raw_block * SEQUENCES_PER_BLOCK) as f64 * slice_width_deg)
                    .rem_euclid(360.0);
            let raw_azimuth = (block_azimuth_deg * 100.0).round() as u16;
            LittleEndian::write_u16(&mut buf[base + 2..base + 4], raw_azimuth);

            for sequence in 0..SEQUENCES_PER_BLOCK {
                let slot_azimuth_deg = (base_azimuth_deg
                    + (raw_block * SEQUENCES_PER_BLOCK + sequence) as f64 * slice_width_deg)
                    .rem_euclid(360.0);

                for ring in 0..RINGS {
                    let offset = base + 4 + (sequence * RINGS + ring) * 3;
                    let distance_m = scene.distance_at(ring as u16, slot_azimuth_deg, rng);
                    let raw_distance = if distance_m <= 0.0 {
                        DISTANCE_NO_RETURN_RAW
                    } else {
                        let raw = (distance_m / DISTANCE_RAW_SCALE_M).round();
                        if raw >= DISTANCE_MAX_VALID_RAW as f64 {
                            DISTANCE_MAX_VALID_RAW
                        } else {
                            raw as u16
                        }
                    };
                    LittleEndian::write_u16(&mut buf[offset..offset + 2], raw_distance);
                    buf[offset + 2] = rng.gen_range(20..=220);
                }
            }
        }

        let trailer_base = RAW_BLOCKS_PER_PACKET * RAW_BLOCK_LEN;
        let us_of_hour = (packet_wall_ts_ns / 1_000) % 3_600_000_000;
        LittleEndian::write_u32(&mut buf[trailer_base..trailer_base + 4], us_of_hour as u32);
        let motor_speed_raw = (NOMINAL_MOTOR_RPM / MOTOR_SPEED_RAW_SCALE_RPM).round() as u16;
        LittleEndian::write_u16(&mut buf[trailer_base + 4..trailer_base + 6], motor_speed_raw);
        buf[trailer_base + 6] = ReturnMode::Strongest.to_raw();
        buf[trailer_base + 7] = self.product_id;

        buf
    }
}

impl Default for PacketGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_packet_has_fixed_length() {
        let gen = PacketGenerator::new();
        let scene = Scene::new(5.0, 0.0);
        let mut rng = rand::thread_rng();
        let packet = gen.generate(&scene, 0.0, 0, &mut rng);
        assert_eq!(packet.len(), PACKET_LEN);
    }

    #[test]
    fn every_raw_block_carries_the_identifier() {
        let gen = PacketGenerator::new();
        let scene = Scene::new(5.0, 0.0);
        let mut rng = rand::thread_rng();
        let packet = gen.generate(&scene, 0.0, 0, &mut rng);
        for raw_block in 0..RAW_BLOCKS_PER_PACKET {
            let base = raw_block * RAW_BLOCK_LEN;
            let marker = LittleEndian::read_u16(&packet[base..base + 2]);
            assert_eq!(marker, BLOCK_IDENTIFIER);
        }
    }
}
