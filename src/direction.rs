/// Direction resolution
///
/// Beams are spread evenly around the array: beam `i` of `n` points at
/// `i * 360 / n` degrees relative to microphone 0. The mounting offset of
/// microphone 0 rotates that into the device's frame.

use crate::aggregator::BeamId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DirectionError {
    #[error("Beam {beam} has no direction with {num_beams} beams")]
    InvalidBeam { beam: BeamId, num_beams: usize },

    #[error("Beam count must be greater than 0")]
    NoBeams,
}

/// Nominal sector of a beam, before the mounting offset
pub fn beam_sector(beam: BeamId, num_beams: usize) -> Result<u16, DirectionError> {
    if num_beams == 0 {
        return Err(DirectionError::NoBeams);
    }

    if beam >= num_beams {
        return Err(DirectionError::InvalidBeam { beam, num_beams });
    }

    Ok((beam * 360 / num_beams) as u16)
}

/// Absolute direction in `[0, 360)` of `beam` given the mic-0 offset.
pub fn resolve_direction(
    beam: BeamId,
    mic0_angle_offset: i32,
    num_beams: usize,
) -> Result<u16, DirectionError> {
    let sector = beam_sector(beam, num_beams)? as i64;
    Ok((sector + mic0_angle_offset as i64).rem_euclid(360) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 0, 3 => 0 ; "beam0_no_offset")]
    #[test_case(1, 0, 3 => 120 ; "beam1_of_3")]
    #[test_case(2, 0, 3 => 240 ; "beam2_of_3")]
    #[test_case(0, 30, 3 => 30 ; "respeaker_v2_offset")]
    #[test_case(2, 150, 3 => 30 ; "wraps_past_360")]
    #[test_case(1, -90, 6 => 330 ; "negative_offset")]
    #[test_case(5, 0, 6 => 300 ; "last_of_six")]
    fn test_resolve_direction(beam: BeamId, offset: i32, num_beams: usize) -> u16 {
        resolve_direction(beam, offset, num_beams).unwrap()
    }

    #[test]
    fn test_offset_is_periodic() {
        for num_beams in 1..=8 {
            for beam in 0..num_beams {
                for offset in [-720, -361, -30, 0, 45, 359, 1000] {
                    let base = resolve_direction(beam, offset, num_beams).unwrap();
                    assert_eq!(resolve_direction(beam, offset + 360, num_beams).unwrap(), base);
                    assert_eq!(resolve_direction(beam, offset - 360, num_beams).unwrap(), base);
                    assert!(base < 360);
                }
            }
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let first = resolve_direction(3, 17, 6).unwrap();
        let second = resolve_direction(3, 17, 6).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reference_channel_has_no_direction() {
        assert_eq!(
            resolve_direction(3, 0, 3),
            Err(DirectionError::InvalidBeam {
                beam: 3,
                num_beams: 3
            })
        );
    }

    #[test]
    fn test_zero_beams_rejected() {
        assert_eq!(resolve_direction(0, 0, 0), Err(DirectionError::NoBeams));
    }

    #[test]
    fn test_extreme_offsets_do_not_overflow() {
        assert!(resolve_direction(1, i32::MAX, 4).unwrap() < 360);
        assert!(resolve_direction(1, i32::MIN, 4).unwrap() < 360);
    }
}
