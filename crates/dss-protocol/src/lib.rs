//! DSS Command Codec
//!
//! This crate provides the frame format exchanged between the RC-RI hand-held
//! controller and the UDB release device. Frames are single ASCII lines:
//!
//! ```text
//! #<id>,<dest>,<src>,<opcode>[,<data_1>,...,<data_n>],*<checksum>\r\n
//! ```
//!
//! # Message Types
//!
//! - **Requests**: `GT`, `ST`, `SP`, `GI`, `SI`, `FT`, `RB`, `LD`, `RM`
//! - **Responses**: `OK`, `NO`, `ACK`, `NAK`, `ID`, `RT`
//!
//! Every request carries a correlation id; responses echo it.
//!
//! # Example
//!
//! ```rust
//! use dss_protocol::{Frame, Request, FrameCodec};
//!
//! let frame = Request::GetRegister { name: "RSTATE_RPT".into() }.to_frame("I001", "UDB", "RC-RI");
//! let bytes = frame.encode();
//!
//! let mut codec = FrameCodec::new();
//! codec.push(&bytes);
//! let decoded = codec.decode().unwrap().unwrap();
//! assert_eq!(decoded, frame);
//! ```

mod codec;
mod error;
mod frame;
mod messages;
mod opcode;

pub use codec::*;
pub use error::*;
pub use frame::*;
pub use messages::*;
pub use opcode::*;

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn field() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_:. -]{0,24}"
    }

    fn opcode() -> impl Strategy<Value = Opcode> {
        prop::sample::select(Opcode::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn parse_inverts_encode(
            id in "I[0-9]{3}",
            dest in "[A-Z-]{1,6}",
            src in "[A-Z-]{1,6}",
            op in opcode(),
            data in prop::collection::vec(field(), 0..4),
        ) {
            let frame = Frame::new(id, dest, src, op, data);
            prop_assert_eq!(Frame::parse(&frame.encode()), Ok(frame));
        }

        #[test]
        fn any_checksum_change_is_rejected(
            name in "[A-Z_]{1,12}",
            delta in 1u16..=u16::MAX,
        ) {
            let frame = Request::GetRegister { name }.to_frame("I001", "UDB", "RC-RI");
            let body = frame.to_string();
            let (head, _) = body.rsplit_once('*').unwrap();
            let tampered = format!("{}*{:04X}", head, frame.checksum.wrapping_add(delta));
            let is_checksum_error = matches!(tampered.parse::<Frame>(), Err(FrameError::Checksum { .. }));
            prop_assert!(is_checksum_error);
        }
    }
}
