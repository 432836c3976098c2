//! Outer message envelope shared by all payload types.
//!
//! Wire layout (all integers big-endian):
//!
//! ```text
//! 0x00000000 | size:u32 | codec_id:u8 | data:(size-1) bytes | crc16:u32
//! ```
//!
//! The declared size covers the codec-id byte plus the data. The trailing
//! 4-byte field carries the CRC16/IBM of (codec-id byte ++ data) in its low
//! 16 bits.

use super::crc::crc16_ibm;
use super::{ByteCursor, CodecError};

const PREAMBLE: [u8; 4] = [0, 0, 0, 0];

/// Minimum envelope: preamble + size + codec id + crc field.
const MIN_FRAME_LEN: usize = 4 + 4 + 1 + 4;

/// Identifies the payload family carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CodecId {
    /// AVL telemetry with 1-byte I/O element ids.
    Telemetry = 0x08,
    /// Extended AVL telemetry with 2-byte I/O element ids.
    TelemetryExt = 0x8E,
    /// Text command request/response.
    Command = 0x0C,
}

impl TryFrom<u8> for CodecId {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0x08 => Ok(CodecId::Telemetry),
            0x8E => Ok(CodecId::TelemetryExt),
            0x0C => Ok(CodecId::Command),
            other => Err(CodecError::UnknownCodecId(other)),
        }
    }
}

/// One decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    codec_id: CodecId,
    data: Vec<u8>,
    crc16: u16,
}

impl MessageFrame {
    /// Builds a frame around `data`, computing the checksum.
    pub fn build(codec_id: CodecId, data: Vec<u8>) -> Self {
        let mut checked = Vec::with_capacity(1 + data.len());
        checked.push(codec_id as u8);
        checked.extend_from_slice(&data);
        let crc16 = crc16_ibm(&checked);
        Self { codec_id, data, crc16 }
    }

    pub fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn crc16(&self) -> u16 {
        self.crc16
    }

    /// Serializes the full envelope, preamble included.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MIN_FRAME_LEN + self.data.len());
        buf.extend_from_slice(&PREAMBLE);
        buf.extend_from_slice(&((1 + self.data.len()) as u32).to_be_bytes());
        buf.push(self.codec_id as u8);
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&u32::from(self.crc16).to_be_bytes());
        buf
    }

    /// Parses and validates a full envelope.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() < MIN_FRAME_LEN {
            return Err(CodecError::Truncated {
                context: "message frame",
                needed: MIN_FRAME_LEN,
                available: payload.len(),
            });
        }

        let mut cur = ByteCursor::new(payload);
        let preamble = cur.take(4, "preamble")?;
        if preamble != PREAMBLE {
            return Err(CodecError::InvalidPreamble {
                found: [preamble[0], preamble[1], preamble[2], preamble[3]],
            });
        }

        let declared = cur.u32("data size")? as usize;
        // Everything between the size field and the trailing crc field.
        let checked = &payload[8..payload.len() - 4];
        if checked.len() != declared {
            return Err(CodecError::LengthMismatch { declared, actual: checked.len() });
        }

        let crc_field = u32::from_be_bytes([
            payload[payload.len() - 4],
            payload[payload.len() - 3],
            payload[payload.len() - 2],
            payload[payload.len() - 1],
        ]);
        let computed = crc16_ibm(checked);
        // The whole 4-byte field participates: a checksum with non-zero
        // upper bytes is corruption, not a 16-bit match.
        if crc_field != u32::from(computed) {
            return Err(CodecError::CrcMismatch { expected: crc_field, computed });
        }

        let codec_id = CodecId::try_from(checked[0])?;
        Ok(Self { codec_id, data: checked[1..].to_vec(), crc16: computed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_preserves_codec_id_and_data() {
        let frame = MessageFrame::build(CodecId::Command, b"hello".to_vec());
        let decoded = MessageFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.codec_id(), CodecId::Command);
        assert_eq!(decoded.data(), b"hello");
    }

    #[test]
    fn rejects_bad_preamble() {
        let mut bytes = MessageFrame::build(CodecId::Command, vec![1, 2, 3]).encode();
        bytes[2] = 0xFF;
        assert!(matches!(
            MessageFrame::decode(&bytes),
            Err(CodecError::InvalidPreamble { .. })
        ));
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut bytes = MessageFrame::build(CodecId::Command, vec![1, 2, 3]).encode();
        bytes[7] = bytes[7].wrapping_add(1);
        assert!(matches!(
            MessageFrame::decode(&bytes),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_corrupted_crc() {
        let mut bytes = MessageFrame::build(CodecId::Command, vec![1, 2, 3]).encode();
        let last = bytes.len() - 1;
        bytes[last] = bytes[last].wrapping_add(1);
        assert!(matches!(MessageFrame::decode(&bytes), Err(CodecError::CrcMismatch { .. })));
    }

    #[test]
    fn rejects_corruption_in_crc_padding_bytes() {
        // Only the low 16 bits carry the checksum, but the upper bytes of
        // the field must still be zero.
        let mut bytes = MessageFrame::build(CodecId::Command, vec![1, 2, 3]).encode();
        let hi = bytes.len() - 4;
        bytes[hi] = 0x01;
        assert!(matches!(MessageFrame::decode(&bytes), Err(CodecError::CrcMismatch { .. })));
    }

    #[test]
    fn rejects_corrupted_payload_via_crc() {
        let mut bytes = MessageFrame::build(CodecId::Command, b"getinfo".to_vec()).encode();
        bytes[10] ^= 0x01;
        assert!(matches!(MessageFrame::decode(&bytes), Err(CodecError::CrcMismatch { .. })));
    }

    #[test]
    fn rejects_unknown_codec_id() {
        let frame = MessageFrame::build(CodecId::Command, vec![1]);
        let mut bytes = frame.encode();
        // Patch the codec id and fix the crc back up so only the id is wrong.
        bytes[8] = 0x42;
        let crc = crate::codec::crc::crc16_ibm(&bytes[8..bytes.len() - 4]);
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&u32::from(crc).to_be_bytes());
        assert_eq!(MessageFrame::decode(&bytes), Err(CodecError::UnknownCodecId(0x42)));
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(
            MessageFrame::decode(&[0, 0, 0]),
            Err(CodecError::Truncated { context: "message frame", .. })
        ));
    }

    proptest! {
        #[test]
        fn round_trip_any_payload(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let frame = MessageFrame::build(CodecId::TelemetryExt, data.clone());
            let decoded = MessageFrame::decode(&frame.encode()).unwrap();
            prop_assert_eq!(decoded.data(), &data[..]);
            prop_assert_eq!(decoded.codec_id(), CodecId::TelemetryExt);
        }

        #[test]
        fn flipping_any_header_byte_fails_decode(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            idx in 0usize..8,
            bit in 0u8..8,
        ) {
            let mut bytes = MessageFrame::build(CodecId::Command, data).encode();
            bytes[idx] ^= 1 << bit;
            prop_assert!(MessageFrame::decode(&bytes).is_err());
        }
    }
}
