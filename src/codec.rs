use crate::{
    error::{MountError, Result},
    types::{Axis, CharacteristicRole},
    MOTIONMOUNT_EXTEND_CHAR_UUID, MOTIONMOUNT_MOVE_CHAR_UUID, MOTIONMOUNT_TURN_CHAR_UUID,
};
use bytes::{BufMut, BytesMut};
use std::fmt::Write as _;
use uuid::Uuid;

/// First byte of a preset slot that holds a stored position
pub const PRESET_VALID_MARKER: u8 = 0x01;

/// Shortest slot buffer that can hold a preset
pub const PRESET_MIN_LEN: usize = 6;

/// Size of the move command in bytes
pub const MOVE_COMMAND_SIZE: usize = 4;

/// Leading bytes shared by all MotionMount characteristic UUIDs
pub const CHARACTERISTIC_PREFIX: [u8; 3] = [0xC0, 0x05, 0xFA];

/// Role bytes of the characteristics that may hold a preset
pub const PRESET_SLOT_RANGE: std::ops::RangeInclusive<u8> = 0x0A..=0x13;

/// Contents of a valid preset slot
///
/// Slot layout:
/// - Byte 0: valid marker (`0x01`)
/// - Bytes 1-4: move command (extend hi/lo, turn hi/lo)
/// - Bytes 5..: ASCII name, terminated by `0x00` or the end of the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetRecord {
    /// Name stored in the slot, if any
    pub name: Option<String>,
    /// Move command replayed on selection
    pub move_buffer: [u8; 4],
}

/// Encode an extend value as `[0x00, value]`
///
/// # Errors
///
/// Returns [`MountError::InvalidRange`] outside 0..=100.
pub fn encode_extend(value: i32) -> Result<[u8; 2]> {
    let byte = checked(Axis::Extend, value)?;
    Ok([0x00, byte])
}

/// Encode a turn value
///
/// Non-negative values encode as `[0x00, value]`, negative values as
/// `[0xFF, 255 + value]`.
///
/// # Errors
///
/// Returns [`MountError::InvalidRange`] outside -100..=100.
pub fn encode_turn(value: i32) -> Result<[u8; 2]> {
    if value < 0 {
        // -100..=-1 maps onto 155..=254
        checked(Axis::Turn, value)?;
        Ok([0xFF, to_byte(Axis::Turn, 255 + value, value)?])
    } else {
        Ok([0x00, checked(Axis::Turn, value)?])
    }
}

/// Decode a turn register
///
/// Raw values above 100 are read as `-(65535 - raw)`. This is not the exact
/// inverse of two's complement (`0xFFFF` decodes to 0) but matches
/// [`encode_turn`] over the whole accepted range.
#[must_use]
pub fn decode_turn(raw: [u8; 2]) -> i32 {
    let value = i32::from(u16::from_be_bytes(raw));
    if value > 100 {
        -(65535 - value)
    } else {
        value
    }
}

/// Decode an extend register as a big-endian magnitude
#[must_use]
pub fn decode_extend(raw: [u8; 2]) -> i32 {
    i32::from(u16::from_be_bytes(raw))
}

/// Build the 4-byte move command from two encoded registers
#[must_use]
pub fn encode_move(extend: [u8; 2], turn: [u8; 2]) -> [u8; 4] {
    let mut buf = BytesMut::with_capacity(MOVE_COMMAND_SIZE);
    buf.put_slice(&extend);
    buf.put_slice(&turn);

    let mut command = [0u8; MOVE_COMMAND_SIZE];
    command.copy_from_slice(&buf);
    command
}

/// Copy a 2-byte register out of a characteristic value
///
/// # Errors
///
/// Returns [`MountError::Io`] if the value is not exactly two bytes.
pub fn register(data: &[u8]) -> Result<[u8; 2]> {
    <[u8; 2]>::try_from(data).map_err(|_| {
        MountError::Io(format!(
            "Register value has {} bytes, expected 2",
            data.len()
        ))
    })
}

/// Parse a raw preset slot
///
/// Returns `None` for unmarked slots and for buffers shorter than
/// [`PRESET_MIN_LEN`].
#[must_use]
pub fn parse_preset_buffer(buf: &[u8]) -> Option<PresetRecord> {
    if buf.len() < PRESET_MIN_LEN || buf[0] != PRESET_VALID_MARKER {
        return None;
    }

    let mut move_buffer = [0u8; MOVE_COMMAND_SIZE];
    move_buffer.copy_from_slice(&buf[1..=MOVE_COMMAND_SIZE]);

    let name: String = buf[MOVE_COMMAND_SIZE + 1..]
        .iter()
        .take_while(|&&b| b != 0x00)
        .map(|&b| char::from(b))
        .collect();

    Some(PresetRecord {
        name: (!name.is_empty()).then_some(name),
        move_buffer,
    })
}

/// Classify a characteristic of the MotionMount service by UUID
#[must_use]
pub fn classify(uuid: &Uuid) -> Option<CharacteristicRole> {
    if *uuid == MOTIONMOUNT_EXTEND_CHAR_UUID {
        return Some(CharacteristicRole::ExtendPosition);
    }
    if *uuid == MOTIONMOUNT_TURN_CHAR_UUID {
        return Some(CharacteristicRole::TurnPosition);
    }
    if *uuid == MOTIONMOUNT_MOVE_CHAR_UUID {
        return Some(CharacteristicRole::Move);
    }

    let bytes = uuid.as_bytes();
    if bytes[..3] == CHARACTERISTIC_PREFIX && PRESET_SLOT_RANGE.contains(&bytes[3]) {
        return Some(CharacteristicRole::PresetSlot(bytes[3]));
    }

    None
}

/// Lowercase hex rendering of a register
#[must_use]
pub fn hex(raw: &[u8]) -> String {
    raw.iter().fold(String::with_capacity(raw.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn checked(axis: Axis, value: i32) -> Result<u8> {
    if !axis.contains(value) {
        return Err(MountError::InvalidRange { axis, value });
    }
    to_byte(axis, value.abs(), value)
}

fn to_byte(axis: Axis, raw: i32, value: i32) -> Result<u8> {
    u8::try_from(raw).map_err(|_| MountError::InvalidRange { axis, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_encoding() {
        assert_eq!(encode_extend(0).unwrap(), [0x00, 0x00]);
        assert_eq!(encode_extend(100).unwrap(), [0x00, 0x64]);
        assert_eq!(encode_extend(42).unwrap(), [0x00, 0x2A]);

        assert!(matches!(
            encode_extend(101),
            Err(MountError::InvalidRange {
                axis: Axis::Extend,
                value: 101
            })
        ));
        assert!(matches!(
            encode_extend(-1),
            Err(MountError::InvalidRange { value: -1, .. })
        ));
    }

    #[test]
    fn test_turn_encoding() {
        assert_eq!(encode_turn(0).unwrap(), [0x00, 0x00]);
        assert_eq!(encode_turn(100).unwrap(), [0x00, 0x64]);
        assert_eq!(encode_turn(-1).unwrap(), [0xFF, 0xFE]);
        assert_eq!(encode_turn(-100).unwrap(), [0xFF, 0x9B]);
        assert!(encode_turn(101).is_err());
        assert!(encode_turn(-101).is_err());
    }

    #[test]
    fn test_range_boundaries_encode_to_single_bytes() {
        assert_eq!(encode_turn(-100).unwrap()[1], 155);
        assert_eq!(encode_turn(-99).unwrap()[1], 156);
        assert_eq!(encode_turn(99).unwrap(), [0x00, 99]);
        assert_eq!(encode_extend(1).unwrap(), [0x00, 0x01]);
        assert!(matches!(
            encode_turn(i32::MIN),
            Err(MountError::InvalidRange {
                axis: Axis::Turn,
                ..
            })
        ));
        assert!(encode_extend(i32::MAX).is_err());
    }

    #[test]
    fn test_turn_round_trip_over_signed_range() {
        for value in -100..=100 {
            let raw = encode_turn(value).unwrap();
            assert_eq!(decode_turn(raw), value, "turn {value} via {raw:02X?}");
        }
        assert_eq!(decode_turn([0xFF, 0xFE]), -1);
    }

    #[test]
    fn test_turn_decode_keeps_wire_quirk() {
        // A true two's complement -1 is not recognised.
        assert_eq!(decode_turn([0xFF, 0xFF]), 0);
        assert_eq!(decode_turn([0x00, 0x65]), -65434);
    }

    #[test]
    fn test_move_command() {
        let command = encode_move(encode_extend(22).unwrap(), encode_turn(-1).unwrap());
        assert_eq!(command, [0x00, 0x16, 0xFF, 0xFE]);
    }

    #[test]
    fn test_register_length() {
        assert_eq!(register(&[0x00, 0x10]).unwrap(), [0x00, 0x10]);
        assert!(matches!(register(&[0x10]), Err(MountError::Io(_))));
        assert!(register(&[]).is_err());
    }

    #[test]
    fn test_preset_parsing() {
        let buf = [0x01, 0x00, 0x16, 0x00, 0x00, b'H', b'o', b'm', b'e', 0x00];
        let record = parse_preset_buffer(&buf).unwrap();
        assert_eq!(record.name.as_deref(), Some("Home"));
        assert_eq!(record.move_buffer, [0x00, 0x16, 0x00, 0x00]);
    }

    #[test]
    fn test_preset_parsing_without_terminator_or_name() {
        let buf = [0x01, 0x00, 0x32, 0xFF, 0xEC, b'T', b'V'];
        let record = parse_preset_buffer(&buf).unwrap();
        assert_eq!(record.name.as_deref(), Some("TV"));

        let buf = [0x01, 0x00, 0x32, 0x00, 0x10, 0x00, b'x'];
        let record = parse_preset_buffer(&buf).unwrap();
        assert_eq!(record.name, None);
        assert_eq!(record.move_buffer, [0x00, 0x32, 0x00, 0x10]);
    }

    #[test]
    fn test_invalid_preset_buffers() {
        assert!(parse_preset_buffer(&[0x00, 0x00, 0x16, 0x00, 0x00, b'H', 0x00]).is_none());
        assert!(parse_preset_buffer(&[0x01, 0x00, 0x00]).is_none());
        assert!(parse_preset_buffer(&[0x01, 0x00, 0x16, 0x00, 0x00]).is_none());
        assert!(parse_preset_buffer(&[]).is_none());
    }

    #[test]
    fn test_characteristic_classification() {
        assert_eq!(
            classify(&MOTIONMOUNT_EXTEND_CHAR_UUID),
            Some(CharacteristicRole::ExtendPosition)
        );
        assert_eq!(
            classify(&MOTIONMOUNT_TURN_CHAR_UUID),
            Some(CharacteristicRole::TurnPosition)
        );
        assert_eq!(
            classify(&MOTIONMOUNT_MOVE_CHAR_UUID),
            Some(CharacteristicRole::Move)
        );

        let slot = Uuid::from_u128(0xc005fa0a_0651_4800_b000_000000000000);
        assert_eq!(classify(&slot), Some(CharacteristicRole::PresetSlot(0x0A)));
        let slot = Uuid::from_u128(0xc005fa13_0651_4800_b000_000000000000);
        assert_eq!(classify(&slot), Some(CharacteristicRole::PresetSlot(0x13)));

        let outside = Uuid::from_u128(0xc005fa14_0651_4800_b000_000000000000);
        assert_eq!(classify(&outside), None);
        let outside = Uuid::from_u128(0xc005fa09_0651_4800_b000_000000000000);
        assert_eq!(classify(&outside), None);
        let foreign = Uuid::from_u128(0x0000fa0a_0000_1000_8000_00805f9b34fb);
        assert_eq!(classify(&foreign), None);
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0x16]), "0016");
        assert_eq!(hex(&[0xFF, 0xFE]), "fffe");
    }
}
