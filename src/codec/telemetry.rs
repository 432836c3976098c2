//! Multi-record AVL telemetry payloads (extended codec, 0x8E).
//!
//! Payload layout:
//!
//! ```text
//! record_count:u8 | record ... | record_count:u8
//! ```
//!
//! where each record is a fixed 24-byte header (timestamp, priority, GPS)
//! followed by a variable-width I/O element map. The trailing record count
//! must equal the leading one and the payload must be consumed exactly;
//! leftover or missing bytes fail the decode.
//!
//! I/O readings are grouped into four fixed-width buckets (1/2/4/8-byte
//! values) plus one variable-width bucket, each prefixed by a 2-byte element
//! count. The map's declared total must equal the sum of the five bucket
//! sizes. Buckets are ordered maps, so re-encoding a decoded payload
//! reproduces it byte for byte.

use std::collections::BTreeMap;

use super::frame::{CodecId, MessageFrame};
use super::{ByteCursor, CodecError};

/// Documented minimum for a telemetry payload: counts + one header-only record.
const MIN_PAYLOAD_LEN: usize = 45;

/// Fixed bytes before the I/O map in every record.
const RECORD_HEADER_LEN: usize = 24;

const GPS_BLOCK_LEN: usize = 15;

/// One decoded telemetry payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TelemetryBatch {
    pub records: Vec<AvlRecord>,
}

/// One timestamped vehicle telemetry sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvlRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub priority: u8,
    pub gps: GpsBlock,
    pub io: IoMap,
}

/// One GPS fix, exactly 15 bytes on the wire.
///
/// Coordinates are the raw wire integers; scaling to degrees is up to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpsBlock {
    pub longitude: u32,
    pub latitude: u32,
    pub altitude: u16,
    pub angle: u16,
    pub satellites: u8,
    pub speed: u16,
}

/// Variable-width I/O readings keyed by numeric element id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IoMap {
    /// Id of the element that triggered the record, 0 for periodic records.
    pub event_id: u16,
    pub n1: BTreeMap<u16, u8>,
    pub n2: BTreeMap<u16, u16>,
    pub n4: BTreeMap<u16, u32>,
    pub n8: BTreeMap<u16, u64>,
    pub nx: BTreeMap<u16, Vec<u8>>,
}

impl TelemetryBatch {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let count = u8::try_from(self.records.len()).map_err(|_| CodecError::CountOverflow {
            context: "telemetry record",
            count: self.records.len(),
            max: u8::MAX as usize,
        })?;

        let mut buf = vec![count];
        for record in &self.records {
            record.encode_into(&mut buf)?;
        }
        buf.push(count);
        Ok(buf)
    }

    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() < MIN_PAYLOAD_LEN {
            return Err(CodecError::Truncated {
                context: "telemetry payload",
                needed: MIN_PAYLOAD_LEN,
                available: body.len(),
            });
        }

        let leading = body[0] as usize;
        let trailing = body[body.len() - 1] as usize;
        if leading != trailing {
            return Err(CodecError::CountMismatch { leading, trailing });
        }

        let mut cur = ByteCursor::new(&body[1..body.len() - 1]);
        let mut records = Vec::with_capacity(leading);
        for _ in 0..leading {
            records.push(AvlRecord::decode(&mut cur)?);
        }
        if cur.remaining() != 0 {
            return Err(CodecError::TrailingBytes(cur.remaining()));
        }

        Ok(Self { records })
    }

    pub fn to_frame(&self) -> Result<MessageFrame, CodecError> {
        Ok(MessageFrame::build(CodecId::TelemetryExt, self.encode()?))
    }

    pub fn from_frame(frame: &MessageFrame) -> Result<Self, CodecError> {
        if frame.codec_id() != CodecId::TelemetryExt {
            return Err(CodecError::UnexpectedCodec {
                expected: CodecId::TelemetryExt,
                found: frame.codec_id(),
            });
        }
        Self::decode(frame.data())
    }
}

impl AvlRecord {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        buf.push(self.priority);
        self.gps.encode_into(buf);
        self.io.encode_into(buf)
    }

    /// Decodes one record off the cursor; the cursor advances by exactly the
    /// record's wire length.
    fn decode(cur: &mut ByteCursor<'_>) -> Result<Self, CodecError> {
        if cur.remaining() < RECORD_HEADER_LEN {
            return Err(CodecError::Truncated {
                context: "avl record header",
                needed: RECORD_HEADER_LEN,
                available: cur.remaining(),
            });
        }
        let timestamp_ms = cur.u64("timestamp")?;
        let priority = cur.u8("priority")?;
        let gps = GpsBlock::decode(cur)?;
        let io = IoMap::decode(cur)?;
        Ok(Self { timestamp_ms, priority, gps, io })
    }
}

impl GpsBlock {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.longitude.to_be_bytes());
        buf.extend_from_slice(&self.latitude.to_be_bytes());
        buf.extend_from_slice(&self.altitude.to_be_bytes());
        buf.extend_from_slice(&self.angle.to_be_bytes());
        buf.push(self.satellites);
        buf.extend_from_slice(&self.speed.to_be_bytes());
    }

    fn decode(cur: &mut ByteCursor<'_>) -> Result<Self, CodecError> {
        if cur.remaining() < GPS_BLOCK_LEN {
            return Err(CodecError::Truncated {
                context: "gps block",
                needed: GPS_BLOCK_LEN,
                available: cur.remaining(),
            });
        }
        Ok(Self {
            longitude: cur.u32("longitude")?,
            latitude: cur.u32("latitude")?,
            altitude: cur.u16("altitude")?,
            angle: cur.u16("angle")?,
            satellites: cur.u8("satellites")?,
            speed: cur.u16("speed")?,
        })
    }
}

impl IoMap {
    /// Total number of elements across all five buckets.
    pub fn element_count(&self) -> usize {
        self.n1.len() + self.n2.len() + self.n4.len() + self.n8.len() + self.nx.len()
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        let total = checked_count(self.element_count(), "io element")?;
        buf.extend_from_slice(&self.event_id.to_be_bytes());
        buf.extend_from_slice(&total.to_be_bytes());

        encode_fixed(buf, &self.n1, |buf, v| buf.push(*v))?;
        encode_fixed(buf, &self.n2, |buf, v| buf.extend_from_slice(&v.to_be_bytes()))?;
        encode_fixed(buf, &self.n4, |buf, v| buf.extend_from_slice(&v.to_be_bytes()))?;
        encode_fixed(buf, &self.n8, |buf, v| buf.extend_from_slice(&v.to_be_bytes()))?;

        let nx_count = checked_count(self.nx.len(), "variable io element")?;
        buf.extend_from_slice(&nx_count.to_be_bytes());
        for (id, value) in &self.nx {
            let value_len = checked_count(value.len(), "variable io value byte")?;
            buf.extend_from_slice(&id.to_be_bytes());
            buf.extend_from_slice(&value_len.to_be_bytes());
            buf.extend_from_slice(value);
        }
        Ok(())
    }

    fn decode(cur: &mut ByteCursor<'_>) -> Result<Self, CodecError> {
        let event_id = cur.u16("io event id")?;
        let declared = cur.u16("io element total")? as usize;

        let n1 = decode_fixed(cur, 1, |b| b[0])?;
        let n2 = decode_fixed(cur, 2, |b| u16::from_be_bytes([b[0], b[1]]))?;
        let n4 = decode_fixed(cur, 4, |b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))?;
        let n8 = decode_fixed(cur, 8, |b| {
            u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })?;

        let mut nx = BTreeMap::new();
        let nx_count = cur.u16("variable io count")?;
        for _ in 0..nx_count {
            let id = cur.u16("variable io id")?;
            let len = cur.u16("variable io length")? as usize;
            let value = cur.take(len, "variable io value")?;
            nx.insert(id, value.to_vec());
        }

        let map = Self { event_id, n1, n2, n4, n8, nx };
        if map.element_count() != declared {
            return Err(CodecError::ElementTotalMismatch {
                declared,
                actual: map.element_count(),
            });
        }
        Ok(map)
    }
}

fn checked_count(count: usize, context: &'static str) -> Result<u16, CodecError> {
    u16::try_from(count).map_err(|_| CodecError::CountOverflow {
        context,
        count,
        max: u16::MAX as usize,
    })
}

fn encode_fixed<V>(
    buf: &mut Vec<u8>,
    bucket: &BTreeMap<u16, V>,
    write_value: impl Fn(&mut Vec<u8>, &V),
) -> Result<(), CodecError> {
    let count = checked_count(bucket.len(), "fixed io element")?;
    buf.extend_from_slice(&count.to_be_bytes());
    for (id, value) in bucket {
        buf.extend_from_slice(&id.to_be_bytes());
        write_value(buf, value);
    }
    Ok(())
}

fn decode_fixed<V>(
    cur: &mut ByteCursor<'_>,
    width: usize,
    parse_value: impl Fn(&[u8]) -> V,
) -> Result<BTreeMap<u16, V>, CodecError> {
    let count = cur.u16("fixed io count")?;
    let mut bucket = BTreeMap::new();
    for _ in 0..count {
        let id = cur.u16("fixed io id")?;
        let value = cur.take(width, "fixed io value")?;
        bucket.insert(id, parse_value(value));
    }
    Ok(bucket)
}
