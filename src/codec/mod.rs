//! Wire codecs for the tracker protocol.
//!
//! Every message exchanged with a unit travels inside the same CRC-checked
//! envelope ([`frame::MessageFrame`]). The envelope carries one of two payload
//! families: text commands ([`command::TextCommand`]) or multi-record AVL
//! telemetry ([`telemetry::TelemetryBatch`]).
//!
//! Decoding is strict: any structural inconsistency (bad preamble, length or
//! CRC mismatch, mismatched count markers, truncated or leftover bytes) fails
//! the whole decode call with a [`CodecError`]. Nothing is retried at this
//! layer.

pub mod command;
pub mod crc;
pub mod frame;
pub mod telemetry;

use thiserror::Error;

/// Byte-level decode/encode failures.
///
/// Always fatal to the decode call that produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    #[error("truncated {context}: need {needed} byte(s), have {available}")]
    Truncated { context: &'static str, needed: usize, available: usize },

    #[error("expected zero preamble, got {found:02x?}")]
    InvalidPreamble { found: [u8; 4] },

    #[error("declared data size {declared} does not match actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("crc mismatch: frame carries {expected:#x}, computed {computed:#06x}")]
    CrcMismatch { expected: u32, computed: u16 },

    #[error("unknown codec id {0:#04x}")]
    UnknownCodecId(u8),

    #[error("expected {expected:?} payload, got {found:?}")]
    UnexpectedCodec { expected: frame::CodecId, found: frame::CodecId },

    #[error("unknown command direction tag {0:#04x}")]
    UnknownDirection(u8),

    #[error("leading count {leading} does not match trailing count {trailing}")]
    CountMismatch { leading: usize, trailing: usize },

    #[error("{0} leftover byte(s) after final record")]
    TrailingBytes(usize),

    #[error("io element total {declared} does not match decoded count {actual}")]
    ElementTotalMismatch { declared: usize, actual: usize },

    #[error("{context} count {count} exceeds protocol limit {max}")]
    CountOverflow { context: &'static str, count: usize, max: usize },

    #[error("command text is not valid utf-8")]
    InvalidText,
}

/// Bounds-checked forward reader over a byte slice.
///
/// All multi-byte reads are big-endian, matching the wire format.
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub(crate) fn consumed(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                context,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self, context: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, context)?[0])
    }

    pub(crate) fn u16(&mut self, context: &'static str) -> Result<u16, CodecError> {
        let b = self.take(2, context)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self, context: &'static str) -> Result<u32, CodecError> {
        let b = self.take(4, context)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self, context: &'static str) -> Result<u64, CodecError> {
        let b = self.take(8, context)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }
}
