//! Opcodes carried in the fourth field of every frame.

use crate::error::FrameError;
use std::fmt;
use std::str::FromStr;

/// Request and response codes understood by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ========== Requests ==========
    /// Get register (`GT`).
    GetRegister,
    /// Set register (`ST`).
    SetRegister,
    /// Set protected register, password gated (`SP`).
    SetProtected,
    /// Get identity (`GI`).
    GetIdentity,
    /// Set identity, password gated (`SI`).
    SetIdentity,
    /// Factory test (`FT`).
    FactoryTest,
    /// Reboot (`RB`).
    Reboot,
    /// Load one firmware line (`LD`).
    LoadLine,
    /// Register map change notification (`RM`).
    RegisterMap,

    // ========== Responses ==========
    /// Command accepted (`OK`).
    Ok,
    /// Command refused (`NO`).
    No,
    /// Positive acknowledgement (`ACK`).
    Ack,
    /// Negative acknowledgement (`NAK`).
    Nak,
    /// Identity report (`ID`).
    Identity,
    /// Register value (`RT`).
    RegisterValue,
}

impl Opcode {
    /// Every opcode, requests first.
    pub const ALL: [Opcode; 15] = [
        Opcode::GetRegister,
        Opcode::SetRegister,
        Opcode::SetProtected,
        Opcode::GetIdentity,
        Opcode::SetIdentity,
        Opcode::FactoryTest,
        Opcode::Reboot,
        Opcode::LoadLine,
        Opcode::RegisterMap,
        Opcode::Ok,
        Opcode::No,
        Opcode::Ack,
        Opcode::Nak,
        Opcode::Identity,
        Opcode::RegisterValue,
    ];

    /// The mnemonic used on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Opcode::GetRegister => "GT",
            Opcode::SetRegister => "ST",
            Opcode::SetProtected => "SP",
            Opcode::GetIdentity => "GI",
            Opcode::SetIdentity => "SI",
            Opcode::FactoryTest => "FT",
            Opcode::Reboot => "RB",
            Opcode::LoadLine => "LD",
            Opcode::RegisterMap => "RM",
            Opcode::Ok => "OK",
            Opcode::No => "NO",
            Opcode::Ack => "ACK",
            Opcode::Nak => "NAK",
            Opcode::Identity => "ID",
            Opcode::RegisterValue => "RT",
        }
    }

    /// Number of data fields the opcode carries.
    pub const fn arity(&self) -> usize {
        match self {
            Opcode::GetRegister => 1,
            Opcode::SetRegister => 2,
            Opcode::SetProtected => 3,
            Opcode::GetIdentity => 0,
            Opcode::SetIdentity => 2,
            Opcode::FactoryTest => 0,
            Opcode::Reboot => 0,
            Opcode::LoadLine => 1,
            Opcode::RegisterMap => 1,
            Opcode::Ok | Opcode::No | Opcode::Ack | Opcode::Nak => 0,
            Opcode::Identity => 1,
            Opcode::RegisterValue => 2,
        }
    }

    /// Whether this opcode is a request (as opposed to a response).
    pub const fn is_request(&self) -> bool {
        matches!(
            self,
            Opcode::GetRegister
                | Opcode::SetRegister
                | Opcode::SetProtected
                | Opcode::GetIdentity
                | Opcode::SetIdentity
                | Opcode::FactoryTest
                | Opcode::Reboot
                | Opcode::LoadLine
                | Opcode::RegisterMap
        )
    }

    /// Whether this response resolves a pending acknowledgement.
    pub const fn is_acknowledgement(&self) -> bool {
        matches!(self, Opcode::Ok | Opcode::No | Opcode::Ack | Opcode::Nak)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Opcode {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| FrameError::UnknownOpcode(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonics_parse_back() {
        for op in Opcode::ALL {
            assert_eq!(op.as_str().parse::<Opcode>(), Ok(op));
        }
    }

    #[test]
    fn test_unknown_mnemonic() {
        assert_eq!(
            "XX".parse::<Opcode>(),
            Err(FrameError::UnknownOpcode("XX".to_string()))
        );
        // Mnemonics are case sensitive on the wire.
        assert!("gt".parse::<Opcode>().is_err());
    }

    #[test]
    fn test_request_response_split() {
        assert!(Opcode::LoadLine.is_request());
        assert!(!Opcode::RegisterValue.is_request());
        assert!(Opcode::Nak.is_acknowledgement());
        assert!(!Opcode::Identity.is_acknowledgement());
    }
}
