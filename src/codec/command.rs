//! Text command payloads.
//!
//! A command frame carries a single human-readable command (or its response)
//! plus a direction tag. The payload starts and ends with a 1-byte quantity
//! marker that the protocol fixes at 1; both markers must agree.
//!
//! ```text
//! count:u8(=1) | direction:u8 | len:u32be | utf8 text | count:u8(=1)
//! ```

use super::frame::{CodecId, MessageFrame};
use super::{ByteCursor, CodecError};

/// count(2x) + direction + length field
const MIN_COMMAND_LEN: usize = 7;

/// Whether the text travels towards the unit or back from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandDirection {
    Request = 0x05,
    Response = 0x06,
}

impl TryFrom<u8> for CommandDirection {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0x05 => Ok(CommandDirection::Request),
            0x06 => Ok(CommandDirection::Response),
            other => Err(CodecError::UnknownDirection(other)),
        }
    }
}

/// One text command request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCommand {
    pub direction: CommandDirection,
    pub text: String,
}

impl TextCommand {
    pub fn request(text: impl Into<String>) -> Self {
        Self { direction: CommandDirection::Request, text: text.into() }
    }

    pub fn response(text: impl Into<String>) -> Self {
        Self { direction: CommandDirection::Response, text: text.into() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let text = self.text.as_bytes();
        let mut buf = Vec::with_capacity(MIN_COMMAND_LEN + text.len());
        buf.push(1);
        buf.push(self.direction as u8);
        buf.extend_from_slice(&(text.len() as u32).to_be_bytes());
        buf.extend_from_slice(text);
        buf.push(1);
        buf
    }

    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() < MIN_COMMAND_LEN {
            return Err(CodecError::Truncated {
                context: "text command",
                needed: MIN_COMMAND_LEN,
                available: body.len(),
            });
        }

        let leading = body[0];
        let trailing = body[body.len() - 1];
        if leading != trailing {
            return Err(CodecError::CountMismatch {
                leading: leading as usize,
                trailing: trailing as usize,
            });
        }

        let mut cur = ByteCursor::new(&body[1..]);
        let direction = CommandDirection::try_from(cur.u8("direction tag")?)?;
        let text_len = cur.u32("text length")? as usize;
        let text = cur.take(text_len, "command text")?;
        let text = std::str::from_utf8(text).map_err(|_| CodecError::InvalidText)?;

        Ok(Self { direction, text: text.to_owned() })
    }

    /// Wraps this command in a frame envelope.
    pub fn to_frame(&self) -> MessageFrame {
        MessageFrame::build(CodecId::Command, self.encode())
    }

    /// Unwraps a command from a frame, rejecting non-command frames.
    pub fn from_frame(frame: &MessageFrame) -> Result<Self, CodecError> {
        if frame.codec_id() != CodecId::Command {
            return Err(CodecError::UnexpectedCodec {
                expected: CodecId::Command,
                found: frame.codec_id(),
            });
        }
        Self::decode(frame.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    // Captured from a real unit: "getinfo" wrapped as a request frame.
    #[test]
    fn encodes_known_request_frame() {
        let frame = TextCommand::request("getinfo").to_frame();
        assert_eq!(frame.encode(), unhex("000000000000000F0C010500000007676574696E666F0100004312"));
    }

    #[test]
    fn decodes_known_response_frame() {
        let raw = unhex(concat!(
            "00000000000000900C010600000088494E493A323031392F372F323220373A3232205254433A323031392F372F32",
            "3220373A3533205253543A32204552523A312053523A302042523A302043463A302046473A3020464C3A30205455",
            "3A302F302055543A3020534D533A30204E4F4750533A303A3330204750533A31205341543A302052533A33205246",
            "3A36352053463A31204D443A30010000C78F",
        ));
        let frame = MessageFrame::decode(&raw).unwrap();
        let cmd = TextCommand::from_frame(&frame).unwrap();
        assert_eq!(cmd.direction, CommandDirection::Response);
        assert_eq!(
            cmd.text,
            "INI:2019/7/22 7:22 RTC:2019/7/22 7:53 RST:2 ERR:1 SR:0 BR:0 CF:0 FG:0 FL:0 TU:0/0 \
             UT:0 SMS:0 NOGPS:0:30 GPS:1 SAT:0 RS:3 RF:65 SF:1 MD:0"
        );
    }

    #[test]
    fn round_trip() {
        let cmd = TextCommand::response("Param ID:1000 Value:300");
        assert_eq!(TextCommand::decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn rejects_mismatched_count_markers() {
        let mut body = TextCommand::request("x").encode();
        let last = body.len() - 1;
        body[last] = 2;
        assert!(matches!(TextCommand::decode(&body), Err(CodecError::CountMismatch { .. })));
    }

    #[test]
    fn rejects_short_body() {
        assert!(matches!(
            TextCommand::decode(&[1, 5, 0, 0, 0, 1]),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_bad_direction() {
        let mut body = TextCommand::request("x").encode();
        body[1] = 0x07;
        assert_eq!(TextCommand::decode(&body), Err(CodecError::UnknownDirection(0x07)));
    }

    #[test]
    fn rejects_wrong_frame_codec() {
        let frame = MessageFrame::build(CodecId::TelemetryExt, vec![0]);
        assert!(matches!(
            TextCommand::from_frame(&frame),
            Err(CodecError::UnexpectedCodec { .. })
        ));
    }

    #[test]
    fn accepts_empty_text() {
        let cmd = TextCommand::request("");
        assert_eq!(TextCommand::decode(&cmd.encode()).unwrap(), cmd);
    }
}
