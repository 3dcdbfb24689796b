//! The DSS frame: one ASCII line exchanged between roles.
//!
//! ```text
//! #<id>,<dest>,<src>,<opcode>[,<data_1>,...,<data_n>],*<checksum>\r\n
//! ```
//!
//! The checksum is the 16-bit wrapping sum of every byte between the leading
//! `#` and the `*` marker (both exclusive, so the comma before `*` counts),
//! written as four hex digits.

use crate::error::{FrameError, FrameResult};
use crate::opcode::Opcode;
use std::fmt;
use std::str::FromStr;

/// First byte of every frame.
pub const FRAME_START: u8 = b'#';

/// Prefix of the checksum field.
pub const CHECKSUM_MARKER: char = '*';

/// Line terminator appended to every serialized frame.
pub const FRAME_TERMINATOR: &str = "\r\n";

/// Field separator.
pub const FIELD_SEPARATOR: char = ',';

/// Header fields every frame must carry: id, destination, source, opcode.
pub const MIN_FIELDS: usize = 4;

/// Compute the checksum of a frame body.
///
/// `body` is everything between `#` and `*`, including the trailing comma.
pub fn checksum(body: &[u8]) -> u16 {
    body.iter()
        .fold(0u16, |acc, &byte| acc.wrapping_add(u16::from(byte)))
}

/// A decoded DSS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation id (e.g. `I001`). Responses echo the request id.
    pub id: String,
    /// Destination role id.
    pub destination: String,
    /// Source role id.
    pub source: String,
    /// Request or response code.
    pub opcode: Opcode,
    /// Ordered data fields.
    pub data: Vec<String>,
    /// Checksum carried by (or computed for) this frame.
    pub checksum: u16,
}

impl Frame {
    /// Build a frame and compute its checksum.
    pub fn new(
        id: impl Into<String>,
        destination: impl Into<String>,
        source: impl Into<String>,
        opcode: Opcode,
        data: Vec<String>,
    ) -> Self {
        let mut frame = Frame {
            id: id.into(),
            destination: destination.into(),
            source: source.into(),
            opcode,
            data,
            checksum: 0,
        };
        frame.checksum = frame.compute_checksum();
        frame
    }

    /// The text between `#` and `*`, trailing separator included.
    fn body(&self) -> String {
        let mut body = String::with_capacity(32);
        for field in [
            self.id.as_str(),
            self.destination.as_str(),
            self.source.as_str(),
            self.opcode.as_str(),
        ]
        .into_iter()
        .chain(self.data.iter().map(String::as_str))
        {
            body.push_str(field);
            body.push(FIELD_SEPARATOR);
        }
        body
    }

    /// Recompute the checksum over the current fields.
    pub fn compute_checksum(&self) -> u16 {
        checksum(self.body().as_bytes())
    }

    /// Whether the carried checksum matches the fields.
    pub fn is_checksum_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Serialize to wire bytes, `\r\n` included.
    pub fn encode(&self) -> Vec<u8> {
        let mut text = self.to_string();
        text.push_str(FRAME_TERMINATOR);
        text.into_bytes()
    }

    /// Parse one frame from raw wire bytes.
    ///
    /// A trailing `\r\n` (or bare `\n`) is accepted and ignored.
    pub fn parse(raw: &[u8]) -> FrameResult<Frame> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| FrameError::Format("frame is not valid UTF-8".to_string()))?;
        text.parse()
    }

    /// Data field at `index`, if present.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.data.get(index).map(String::as_str)
    }
}

impl fmt::Display for Frame {
    /// Wire text without the line terminator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{:04X}",
            FRAME_START as char,
            self.body(),
            CHECKSUM_MARKER,
            self.checksum
        )
    }
}

impl FromStr for Frame {
    type Err = FrameError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let line = raw.trim_end_matches(['\r', '\n']);

        let rest = line
            .strip_prefix(FRAME_START as char)
            .ok_or_else(|| FrameError::Format("missing leading '#'".to_string()))?;

        let (fields_text, checksum_text) = rest
            .rsplit_once(",*")
            .ok_or_else(|| FrameError::Format("missing checksum field".to_string()))?;

        let fields: Vec<&str> = fields_text.split(FIELD_SEPARATOR).collect();
        if fields.len() < MIN_FIELDS {
            return Err(FrameError::Format(format!(
                "expected at least {} fields, got {}",
                MIN_FIELDS,
                fields.len()
            )));
        }

        if checksum_text.is_empty()
            || checksum_text.len() > 4
            || !checksum_text.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(FrameError::Format(format!(
                "invalid checksum text {:?}",
                checksum_text
            )));
        }
        let received = u16::from_str_radix(checksum_text, 16)
            .map_err(|_| FrameError::Format(format!("invalid checksum text {:?}", checksum_text)))?;

        // Body spans up to and including the separator before '*'.
        let body_len = fields_text.len() + 1;
        let computed = checksum(&rest.as_bytes()[..body_len]);
        if received != computed {
            return Err(FrameError::Checksum { received, computed });
        }

        let opcode: Opcode = fields[3].parse()?;

        Ok(Frame {
            id: fields[0].to_string(),
            destination: fields[1].to_string(),
            source: fields[2].to_string(),
            opcode,
            data: fields[MIN_FIELDS..].iter().map(|s| s.to_string()).collect(),
            checksum: received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::new(
            "I001",
            "UDB",
            "RC-RI",
            Opcode::GetRegister,
            vec!["RSTATE_RPT".to_string()],
        )
    }

    #[test]
    fn test_wire_layout() {
        let frame = sample();
        let expected_sum = checksum(b"I001,UDB,RC-RI,GT,RSTATE_RPT,");
        let wire = String::from_utf8(frame.encode()).unwrap();
        assert_eq!(
            wire,
            format!("#I001,UDB,RC-RI,GT,RSTATE_RPT,*{:04X}\r\n", expected_sum)
        );
    }

    #[test]
    fn test_parse_serialize_round_trip() {
        let frame = sample();
        let parsed = Frame::parse(&frame.encode()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_parse_without_data() {
        let frame = Frame::new("I042", "RC-RI", "UDB", Opcode::Ok, Vec::new());
        let wire = frame.to_string();
        assert!(wire.contains(",OK,*"));
        let parsed: Frame = wire.parse().unwrap();
        assert!(parsed.data.is_empty());
        assert_eq!(parsed.opcode, Opcode::Ok);
    }

    #[test]
    fn test_lowercase_checksum_accepted() {
        let frame = sample();
        let wire = format!("#I001,UDB,RC-RI,GT,RSTATE_RPT,*{:04x}", frame.checksum);
        let parsed: Frame = wire.parse().unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_missing_start_marker() {
        let wire = sample().to_string();
        let err = wire[1..].parse::<Frame>().unwrap_err();
        assert!(matches!(err, FrameError::Format(_)));
    }

    #[test]
    fn test_too_few_fields() {
        let body = "I001,UDB,RC-RI,";
        let wire = format!("#{}*{:04X}", body, checksum(body.as_bytes()));
        let err = wire.parse::<Frame>().unwrap_err();
        assert!(matches!(err, FrameError::Format(_)), "got {:?}", err);
    }

    #[test]
    fn test_missing_checksum_field() {
        let err = "#I001,UDB,RC-RI,GT,RSTATE_RPT".parse::<Frame>().unwrap_err();
        assert!(matches!(err, FrameError::Format(_)));
    }

    #[test]
    fn test_tampered_checksum() {
        let frame = sample();
        let tampered = format!(
            "#I001,UDB,RC-RI,GT,RSTATE_RPT,*{:04X}",
            frame.checksum.wrapping_add(1)
        );
        let err = tampered.parse::<Frame>().unwrap_err();
        assert_eq!(
            err,
            FrameError::Checksum {
                received: frame.checksum.wrapping_add(1),
                computed: frame.checksum,
            }
        );
    }

    #[test]
    fn test_tampered_body() {
        let wire = sample().to_string().replace("RSTATE_RPT", "RSTATE_REQ");
        let err = wire.parse::<Frame>().unwrap_err();
        assert!(matches!(err, FrameError::Checksum { .. }));
    }

    #[test]
    fn test_unknown_opcode() {
        let body = "I001,UDB,RC-RI,ZZ,";
        let wire = format!("#{}*{:04X}", body, checksum(body.as_bytes()));
        assert_eq!(
            wire.parse::<Frame>(),
            Err(FrameError::UnknownOpcode("ZZ".to_string()))
        );
    }

    #[test]
    fn test_checksum_wraps() {
        let long = "Z".repeat(1000);
        let frame = Frame::new("I001", "UDB", "RC-RI", Opcode::LoadLine, vec![long]);
        assert!(frame.is_checksum_valid());
        assert_eq!(Frame::parse(&frame.encode()).unwrap(), frame);
    }
}
