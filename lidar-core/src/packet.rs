//! C3: parse one raw sensor packet into polar points.
//!
//! Field layout and little-endian decoding follow the `DataBlock`/`DataRecord`
//! byte-level parsing convention used by LiDAR driver crates for this sensor
//! family, adapted to the `block_index`-addresses-a-firing-sequence model
//! resolved in `sensor_config`.

use std::sync::Once;

use byteorder::{ByteOrder, LittleEndian};
use sensor_types::{
    PolarPoint, ReturnMode, TimestampMode, AZIMUTH_RAW_SCALE_DEG, BLOCK_IDENTIFIER,
    DISTANCE_NO_RETURN_RAW, DISTANCE_RAW_SCALE_M, MOTOR_SPEED_PLAUSIBLE_MAX_RPM,
    MOTOR_SPEED_PLAUSIBLE_MIN_RPM, MOTOR_SPEED_RAW_SCALE_RPM, PACKET_LEN, RAW_BLOCKS_PER_PACKET,
    RAW_BLOCK_LEN, RINGS, SEQUENCES_PER_BLOCK,
};
use tracing::warn;

use crate::error::ParseError;
use crate::sensor_config::SensorConfig;

const HOUR_NS: u64 = 3_600_000_000_000;

static GPS_FALLBACK_WARNED: Once = Once::new();

fn top_of_hour_ns(wall_clock_ns: u64) -> u64 {
    wall_clock_ns - (wall_clock_ns % HOUR_NS)
}

/// Parses one raw sensor packet.
///
/// `packet_wall_ts_ns` is the listener's local receive timestamp, used both
/// as the `SystemWallClock` timestamp base and as the top-of-hour anchor for
/// `DeviceInternal` timestamps. `source_packet_seq` is supplied by the caller
/// so this function carries no state between calls.
pub fn parse(
    buf: &[u8],
    packet_wall_ts_ns: u64,
    source_packet_seq: u64,
    timestamp_mode: TimestampMode,
) -> Result<Vec<PolarPoint>, ParseError> {
    if buf.len() != PACKET_LEN {
        return Err(ParseError::WrongLength {
            expected: PACKET_LEN,
            actual: buf.len(),
        });
    }

    let trailer = &buf[RAW_BLOCKS_PER_PACKET * RAW_BLOCK_LEN..];
    let device_us_of_hour = LittleEndian::read_u32(&trailer[0..4]);
    let motor_speed_raw = LittleEndian::read_u16(&trailer[4..6]);
    let motor_speed_rpm = motor_speed_raw as f64 * MOTOR_SPEED_RAW_SCALE_RPM;
    if !(MOTOR_SPEED_PLAUSIBLE_MIN_RPM..=MOTOR_SPEED_PLAUSIBLE_MAX_RPM).contains(&motor_speed_rpm) {
        return Err(ParseError::ImplausibleMotorSpeed {
            raw: motor_speed_raw,
            rpm: motor_speed_rpm,
        });
    }
    let return_mode_raw = trailer[6];
    ReturnMode::from_raw(return_mode_raw).ok_or(ParseError::BadReturnMode(return_mode_raw))?;

    let base_ns = match timestamp_mode {
        TimestampMode::SystemWallClock => packet_wall_ts_ns,
        TimestampMode::DeviceInternal => {
            top_of_hour_ns(packet_wall_ts_ns) + device_us_of_hour as u64 * 1_000
        }
        TimestampMode::GpsDerived => {
            GPS_FALLBACK_WARNED.call_once(|| {
                warn!("GPS-derived timestamping requested but no GPS/PPS subsystem is wired up; falling back to system wall clock for the remainder of this process");
            });
            packet_wall_ts_ns
        }
    };

    let mut points = Vec::with_capacity(RAW_BLOCKS_PER_PACKET * SEQUENCES_PER_BLOCK * RINGS);

    for raw_block in 0..RAW_BLOCKS_PER_PACKET {
        let block_bytes = &buf[raw_block * RAW_BLOCK_LEN..(raw_block + 1) * RAW_BLOCK_LEN];
        let identifier = LittleEndian::read_u16(&block_bytes[0..2]);
        if identifier != BLOCK_IDENTIFIER {
            return Err(ParseError::BadBlockIdentifier {
                index: raw_block,
                got: identifier,
            });
        }
        let raw_azimuth = LittleEndian::read_u16(&block_bytes[2..4]);
        let raw_azimuth_deg = raw_azimuth as f64 * AZIMUTH_RAW_SCALE_DEG;

        let mut offset = 4;
        for sequence in 0..SEQUENCES_PER_BLOCK {
            let block_index = (raw_block * SEQUENCES_PER_BLOCK + sequence) as u16;
            for ring in 0..RINGS {
                let distance_raw = LittleEndian::read_u16(&block_bytes[offset..offset + 2]);
                let intensity = block_bytes[offset + 2];
                offset += 3;

                if distance_raw == DISTANCE_NO_RETURN_RAW {
                    continue;
                }

                let azimuth_deg =
                    SensorConfig::corrected_azimuth(ring as u16, block_index, raw_azimuth_deg);
                let timestamp_ns =
                    base_ns + SensorConfig::fire_time_offset_ns(ring as u16, block_index);

                points.push(PolarPoint {
                    ring: ring as u16,
                    azimuth_deg,
                    distance_m: distance_raw as f64 * DISTANCE_RAW_SCALE_M,
                    intensity,
                    timestamp_ns,
                    block_index,
                    source_packet_seq,
                });
            }
        }
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_packet(azimuths_deci_deg: [u16; RAW_BLOCKS_PER_PACKET]) -> Vec<u8> {
        let mut buf = vec![0u8; PACKET_LEN];
        for raw_block in 0..RAW_BLOCKS_PER_PACKET {
            let base = raw_block * RAW_BLOCK_LEN;
            LittleEndian::write_u16(&mut buf[base..base + 2], BLOCK_IDENTIFIER);
            LittleEndian::write_u16(&mut buf[base + 2..base + 4], azimuths_deci_deg[raw_block]);
            let mut offset = base + 4;
            for _ in 0..(SEQUENCES_PER_BLOCK * RINGS) {
                LittleEndian::write_u16(&mut buf[offset..offset + 2], 2000); // 10.0 m
                buf[offset + 2] = 100;
                offset += 3;
            }
        }
        let trailer_base = RAW_BLOCKS_PER_PACKET * RAW_BLOCK_LEN;
        LittleEndian::write_u32(&mut buf[trailer_base..trailer_base + 4], 0);
        LittleEndian::write_u16(&mut buf[trailer_base + 4..trailer_base + 6], 60_000); // 600 RPM
        buf[trailer_base + 6] = ReturnMode::Strongest.to_raw();
        buf[trailer_base + 7] = 0x22;
        buf
    }

    #[test]
    fn parses_full_packet_into_expected_point_count() {
        let buf = build_packet([0; RAW_BLOCKS_PER_PACKET]);
        let points = parse(&buf, 0, 1, TimestampMode::SystemWallClock).unwrap();
        assert_eq!(points.len(), RAW_BLOCKS_PER_PACKET * SEQUENCES_PER_BLOCK * RINGS);
        assert!(points.iter().all(|p| (p.distance_m - 10.0).abs() < 1e-9));
    }

    #[test]
    fn rejects_wrong_length() {
        let buf = vec![0u8; 10];
        let err = parse(&buf, 0, 1, TimestampMode::SystemWallClock).unwrap_err();
        assert!(matches!(err, ParseError::WrongLength { .. }));
    }

    #[test]
    fn rejects_implausible_motor_speed() {
        let mut buf = build_packet([0; RAW_BLOCKS_PER_PACKET]);
        let trailer_base = RAW_BLOCKS_PER_PACKET * RAW_BLOCK_LEN;
        LittleEndian::write_u16(&mut buf[trailer_base + 4..trailer_base + 6], 0);
        let err = parse(&buf, 0, 1, TimestampMode::SystemWallClock).unwrap_err();
        assert!(matches!(err, ParseError::ImplausibleMotorSpeed { .. }));
    }

    #[test]
    fn rejects_bad_block_identifier() {
        let mut buf = build_packet([0; RAW_BLOCKS_PER_PACKET]);
        buf[0] = 0xAB;
        let err = parse(&buf, 0, 1, TimestampMode::SystemWallClock).unwrap_err();
        assert!(matches!(err, ParseError::BadBlockIdentifier { index: 0, .. }));
    }

    #[test]
    fn no_return_sentinel_is_skipped() {
        let mut buf = build_packet([0; RAW_BLOCKS_PER_PACKET]);
        LittleEndian::write_u16(&mut buf[4..6], DISTANCE_NO_RETURN_RAW);
        let points = parse(&buf, 0, 1, TimestampMode::SystemWallClock).unwrap();
        assert_eq!(
            points.len(),
            RAW_BLOCKS_PER_PACKET * SEQUENCES_PER_BLOCK * RINGS - 1
        );
    }
}
