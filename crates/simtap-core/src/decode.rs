//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Reply struct codec: packed little-endian float64 slots."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
//! The host replies with one 8-byte IEEE-754 float per registered field,
//! packed without padding in registration order, little-endian.
//!
//! If the host-side structure holds more or fewer floats than the client
//! registered, every slot after the point of divergence reads the wrong
//! value. Nothing in the payload allows detecting that; only a payload that
//! is too short to hold the registered slots is rejected.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// Width of one reply slot in bytes.
pub const SLOT_WIDTH: usize = std::mem::size_of::<f64>();

/// Payload length required for `slots` registered fields.
pub const fn reply_len(slots: usize) -> usize {
    slots * SLOT_WIDTH
}

/// Read `slots` consecutive floats from the front of `payload`.
///
/// Trailing bytes beyond the registered slots are ignored.
pub fn decode_slots(payload: &[u8], slots: usize) -> Result<Vec<f64>, DecodeError> {
    let expected = reply_len(slots);
    if payload.len() < expected {
        return Err(DecodeError::Truncated {
            slots,
            expected,
            actual: payload.len(),
        });
    }
    let mut cursor = &payload[..expected];
    let mut values = Vec::with_capacity(slots);
    while cursor.has_remaining() {
        values.push(cursor.get_f64_le());
    }
    Ok(values)
}

/// Serialize values into the host reply layout.
pub fn encode_slots(values: &[f64]) -> Bytes {
    let mut buf = BytesMut::with_capacity(reply_len(values.len()));
    for value in values {
        buf.put_f64_le(*value);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_slots_in_order() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&123.4f64.to_le_bytes());
        raw.extend_from_slice(&5000.0f64.to_le_bytes());
        raw.extend_from_slice(&(-0.25f64).to_le_bytes());
        let values = decode_slots(&raw, 3).expect("payload large enough");
        assert_eq!(values, vec![123.4, 5000.0, -0.25]);
    }

    #[test]
    fn zero_slots_decode_to_nothing() {
        assert_eq!(decode_slots(&[], 0), Ok(Vec::new()));
    }

    #[test]
    fn short_payload_is_rejected() {
        let raw = encode_slots(&[1.0, 2.0]);
        let err = decode_slots(&raw[..12], 2).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                slots: 2,
                expected: 16,
                actual: 12
            }
        );
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let raw = encode_slots(&[7.0, 8.0, 9.0]);
        assert_eq!(decode_slots(&raw, 2), Ok(vec![7.0, 8.0]));
    }

    #[test]
    fn encoder_uses_little_endian_layout() {
        let raw = encode_slots(&[1.0]);
        assert_eq!(raw.len(), SLOT_WIDTH);
        assert_eq!(&raw[..], &1.0f64.to_le_bytes());
    }

    #[test]
    fn special_values_survive_the_codec() {
        let raw = encode_slots(&[f64::INFINITY, -0.0, f64::MAX]);
        let values = decode_slots(&raw, 3).unwrap();
        assert_eq!(values[0], f64::INFINITY);
        assert!(values[1] == 0.0 && values[1].is_sign_negative());
        assert_eq!(values[2], f64::MAX);
    }
}
