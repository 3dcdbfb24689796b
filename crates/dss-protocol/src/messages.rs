//! Typed requests and responses, and the canonical frames built from them.
//!
//! [`Frame`] is the untyped wire unit. The types here give each opcode its
//! named fields and enforce the per-opcode field count in both directions.

use crate::error::{FrameError, FrameResult};
use crate::frame::Frame;
use crate::opcode::Opcode;

/// Requests sent from one role to its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read a register (`GT name`).
    GetRegister {
        /// Register name.
        name: String,
    },

    /// Write a register (`ST name,value`).
    SetRegister {
        /// Register name.
        name: String,
        /// Value in its wire representation.
        value: String,
    },

    /// Write a register behind a password (`SP password,name,value`).
    SetProtected {
        /// Device password.
        password: String,
        /// Register name.
        name: String,
        /// Value in its wire representation.
        value: String,
    },

    /// Read the device serial number (`GI`).
    GetIdentity,

    /// Replace the device serial number (`SI password,serial`).
    SetIdentity {
        /// Device password.
        password: String,
        /// New serial number.
        serial: String,
    },

    /// Run the factory self test (`FT`).
    FactoryTest,

    /// Reboot and apply any loaded firmware (`RB`).
    Reboot,

    /// Load one firmware line (`LD line`).
    LoadLine {
        /// Firmware line text.
        line: String,
    },

    /// Announce which registers changed (`RM bitmap`).
    RegisterMap {
        /// One bit per changed register.
        bitmap: u64,
    },
}

impl Request {
    /// Opcode for this request.
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::GetRegister { .. } => Opcode::GetRegister,
            Request::SetRegister { .. } => Opcode::SetRegister,
            Request::SetProtected { .. } => Opcode::SetProtected,
            Request::GetIdentity => Opcode::GetIdentity,
            Request::SetIdentity { .. } => Opcode::SetIdentity,
            Request::FactoryTest => Opcode::FactoryTest,
            Request::Reboot => Opcode::Reboot,
            Request::LoadLine { .. } => Opcode::LoadLine,
            Request::RegisterMap { .. } => Opcode::RegisterMap,
        }
    }

    /// Data fields in wire order.
    pub fn data(&self) -> Vec<String> {
        match self {
            Request::GetRegister { name } => vec![name.clone()],
            Request::SetRegister { name, value } => vec![name.clone(), value.clone()],
            Request::SetProtected {
                password,
                name,
                value,
            } => vec![password.clone(), name.clone(), value.clone()],
            Request::GetIdentity | Request::FactoryTest | Request::Reboot => Vec::new(),
            Request::SetIdentity { password, serial } => vec![password.clone(), serial.clone()],
            Request::LoadLine { line } => vec![line.clone()],
            Request::RegisterMap { bitmap } => vec![bitmap.to_string()],
        }
    }

    /// Build the canonical frame for this request.
    pub fn to_frame(&self, id: &str, destination: &str, source: &str) -> Frame {
        Frame::new(id, destination, source, self.opcode(), self.data())
    }

    /// Interpret a frame as a request.
    pub fn from_frame(frame: &Frame) -> FrameResult<Request> {
        check_arity(frame)?;
        let field = |i: usize| frame.data[i].clone();
        let request = match frame.opcode {
            Opcode::GetRegister => Request::GetRegister { name: field(0) },
            Opcode::SetRegister => Request::SetRegister {
                name: field(0),
                value: field(1),
            },
            Opcode::SetProtected => Request::SetProtected {
                password: field(0),
                name: field(1),
                value: field(2),
            },
            Opcode::GetIdentity => Request::GetIdentity,
            Opcode::SetIdentity => Request::SetIdentity {
                password: field(0),
                serial: field(1),
            },
            Opcode::FactoryTest => Request::FactoryTest,
            Opcode::Reboot => Request::Reboot,
            Opcode::LoadLine => Request::LoadLine { line: field(0) },
            Opcode::RegisterMap => {
                let text = field(0);
                let bitmap = text
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| FrameError::InvalidField {
                        field: "bitmap",
                        value: text.clone(),
                    })?;
                Request::RegisterMap { bitmap }
            }
            other => {
                return Err(FrameError::Format(format!(
                    "{} is a response, not a request",
                    other
                )))
            }
        };
        Ok(request)
    }
}

/// Responses returned to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command accepted.
    Ok,
    /// Command refused.
    No,
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement.
    Nak,
    /// Device serial number.
    Identity {
        /// Serial number text.
        serial: String,
    },
    /// A register value.
    RegisterValue {
        /// Register name.
        name: String,
        /// Value in its wire representation.
        value: String,
    },
}

impl Response {
    /// Opcode for this response.
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::Ok => Opcode::Ok,
            Response::No => Opcode::No,
            Response::Ack => Opcode::Ack,
            Response::Nak => Opcode::Nak,
            Response::Identity { .. } => Opcode::Identity,
            Response::RegisterValue { .. } => Opcode::RegisterValue,
        }
    }

    /// Data fields in wire order.
    pub fn data(&self) -> Vec<String> {
        match self {
            Response::Ok | Response::No | Response::Ack | Response::Nak => Vec::new(),
            Response::Identity { serial } => vec![serial.clone()],
            Response::RegisterValue { name, value } => vec![name.clone(), value.clone()],
        }
    }

    /// Whether this is a positive outcome (`OK` or `ACK`).
    pub fn is_positive(&self) -> bool {
        matches!(self, Response::Ok | Response::Ack)
    }

    /// Build the canonical frame for this response, echoing the request id.
    pub fn to_frame(&self, id: &str, destination: &str, source: &str) -> Frame {
        Frame::new(id, destination, source, self.opcode(), self.data())
    }

    /// Interpret a frame as a response.
    pub fn from_frame(frame: &Frame) -> FrameResult<Response> {
        check_arity(frame)?;
        let response = match frame.opcode {
            Opcode::Ok => Response::Ok,
            Opcode::No => Response::No,
            Opcode::Ack => Response::Ack,
            Opcode::Nak => Response::Nak,
            Opcode::Identity => Response::Identity {
                serial: frame.data[0].clone(),
            },
            Opcode::RegisterValue => Response::RegisterValue {
                name: frame.data[0].clone(),
                value: frame.data[1].clone(),
            },
            other => {
                return Err(FrameError::Format(format!(
                    "{} is a request, not a response",
                    other
                )))
            }
        };
        Ok(response)
    }
}

/// Either side of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A request.
    Request(Request),
    /// A response.
    Response(Response),
}

impl Message {
    /// Interpret a frame according to its opcode.
    pub fn from_frame(frame: &Frame) -> FrameResult<Message> {
        if frame.opcode.is_request() {
            Request::from_frame(frame).map(Message::Request)
        } else {
            Response::from_frame(frame).map(Message::Response)
        }
    }
}

fn check_arity(frame: &Frame) -> FrameResult<()> {
    let expected = frame.opcode.arity();
    if frame.data.len() != expected {
        return Err(FrameError::FieldCount {
            opcode: frame.opcode.as_str(),
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(())
}
