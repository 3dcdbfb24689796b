//! Release operations, report codes and the controller's transition table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Codes the device writes to `RSTATE_RPT`.
pub mod report {
    pub const IDLE_ACK: i64 = 0x01;
    pub const INIT_PENDING: i64 = 0x11;
    pub const INIT_OK: i64 = 0x12;
    pub const INIT_FAIL: i64 = 0x13;
    pub const CON_ID1: i64 = 0x21;
    pub const CON_ID2: i64 = 0x22;
    pub const CON_OK: i64 = 0x23;
    pub const RNG_SINGLE_PENDING: i64 = 0x31;
    pub const RNG_SINGLE_OK: i64 = 0x32;
    pub const RNG_SINGLE_FAIL: i64 = 0x33;
    pub const RNG_CONT_PENDING: i64 = 0x41;
    pub const RNG_CONT_OK: i64 = 0x42;
    pub const RNG_CONT_FAIL: i64 = 0x43;
    pub const AT_ARM_PENDING: i64 = 0x51;
    pub const AT_ARM_OK: i64 = 0x52;
    pub const AT_ARM_FAIL: i64 = 0x53;
    pub const AT_TRG_PENDING: i64 = 0x54;
    pub const AT_TRG_OK: i64 = 0x55;
    pub const AT_TRG_FAIL: i64 = 0x56;
    pub const BCR_PENDING: i64 = 0x61;
    pub const BCR_OK: i64 = 0x62;
    pub const RB_ACK: i64 = 0x65;
    pub const PI_QID_PENDING: i64 = 0x71;
    pub const PI_QID_DETECT: i64 = 0x72;
    pub const PI_QID_NODETECT: i64 = 0x73;
    pub const PI_ID_PENDING: i64 = 0x81;
    pub const PI_ID_DETECT: i64 = 0x82;
    pub const PI_ID_NODETECT: i64 = 0x83;
    pub const NT_PENDING: i64 = 0x91;
    pub const NT_OK: i64 = 0x92;
}

/// An operation the controller requests by writing `RSTATE_REQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Idle,
    Init,
    Connect,
    SingleRange,
    ContinuousRange,
    Trigger,
    Broadcast,
    QuickId,
    FullId,
    NoiseTest,
    Reboot,
}

use ReleaseState::*;

const RANGING_READY: &[ReleaseState] = &[ConOk, RngSingleOk, RngContOk];

impl Operation {
    /// Every operation in request-code order.
    pub const ALL: [Operation; 11] = [
        Operation::Idle,
        Operation::Init,
        Operation::Connect,
        Operation::SingleRange,
        Operation::ContinuousRange,
        Operation::Trigger,
        Operation::Broadcast,
        Operation::Reboot,
        Operation::QuickId,
        Operation::FullId,
        Operation::NoiseTest,
    ];

    /// Value written to `RSTATE_REQ`.
    pub const fn code(self) -> i64 {
        match self {
            Operation::Idle => 0x00,
            Operation::Init => 0x10,
            Operation::Connect => 0x20,
            Operation::SingleRange => 0x30,
            Operation::ContinuousRange => 0x40,
            Operation::Trigger => 0x50,
            Operation::Broadcast => 0x60,
            Operation::Reboot => 0x64,
            Operation::QuickId => 0x70,
            Operation::FullId => 0x80,
            Operation::NoiseTest => 0x90,
        }
    }

    /// Operation for an `RSTATE_REQ` value.
    pub fn from_code(code: i64) -> Option<Operation> {
        Operation::ALL.into_iter().find(|op| op.code() == code)
    }

    /// Bit set in `RSTATE_MAP` while this operation is active.
    pub const fn map_bit(self) -> u32 {
        match self {
            Operation::Idle => 0,
            Operation::Init => 1,
            Operation::Connect => 2,
            Operation::SingleRange => 3,
            Operation::ContinuousRange => 4,
            Operation::Trigger => 5,
            Operation::Broadcast => 6,
            Operation::QuickId => 7,
            Operation::FullId => 8,
            Operation::NoiseTest => 9,
            Operation::Reboot => 10,
        }
    }

    /// Human-readable name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Operation::Idle => "idle",
            Operation::Init => "init",
            Operation::Connect => "connect",
            Operation::SingleRange => "single range",
            Operation::ContinuousRange => "continuous range",
            Operation::Trigger => "trigger",
            Operation::Broadcast => "broadcast",
            Operation::QuickId => "public quick id",
            Operation::FullId => "public full id",
            Operation::NoiseTest => "noise test",
            Operation::Reboot => "reboot",
        }
    }

    /// States the controller must be in to request this operation.
    ///
    /// `None` means the operation is always allowed.
    pub const fn required_states(self) -> Option<&'static [ReleaseState]> {
        match self {
            Operation::Idle => None,
            Operation::Init => Some(&[IdleAck]),
            Operation::Connect => Some(&[InitOk]),
            Operation::SingleRange | Operation::ContinuousRange | Operation::Trigger => {
                Some(RANGING_READY)
            }
            Operation::Broadcast | Operation::QuickId | Operation::FullId => Some(&[InitOk]),
            Operation::NoiseTest | Operation::Reboot => Some(&[IdleAck]),
        }
    }

    /// Whether `state` satisfies this operation's precondition.
    pub fn allowed_from(self, state: ReleaseState) -> bool {
        self.required_states()
            .map_or(true, |states| states.contains(&state))
    }

    /// Local state entered as soon as the request is sent.
    pub const fn requested_state(self) -> ReleaseState {
        match self {
            Operation::Idle => IdleReq,
            Operation::Init => InitReq,
            Operation::Connect => ConReq,
            Operation::SingleRange => RngSingleReq,
            Operation::ContinuousRange => RngContReq,
            Operation::Trigger => AtReq,
            Operation::Broadcast => BcrReq,
            Operation::QuickId => PiQidReq,
            Operation::FullId => PiIdReq,
            Operation::NoiseTest => NtReq,
            Operation::Reboot => RbReq,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The controller's view of the operation in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseState {
    // Idle
    IdleReq,
    IdleAck,
    // Init
    InitReq,
    InitPending,
    InitOk,
    InitFail,
    // Connect
    ConReq,
    ConId1,
    ConId2,
    ConOk,
    // Single range
    RngSingleReq,
    RngSinglePending,
    RngSingleOk,
    RngSingleFail,
    // Continuous range
    RngContReq,
    RngContPending,
    RngContOk,
    RngContFail,
    // Arm and trigger
    AtReq,
    AtArmPending,
    AtArmOk,
    AtArmFail,
    AtTrgPending,
    AtTrgOk,
    AtTrgFail,
    // Broadcast
    BcrReq,
    BcrPending,
    BcrOk,
    // Public quick id
    PiQidReq,
    PiQidPending,
    PiQidDetect,
    PiQidNodetect,
    // Public full id
    PiIdReq,
    PiIdPending,
    PiIdDetect,
    PiIdNodetect,
    // Noise test
    NtReq,
    NtPending,
    NtOk,
    // Reboot
    RbReq,
    RbAck,
}

impl ReleaseState {
    /// Wire-style name, e.g. `INIT_PENDING`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            IdleReq => "IDLE_REQ",
            IdleAck => "IDLE_ACK",
            InitReq => "INIT_REQ",
            InitPending => "INIT_PENDING",
            InitOk => "INIT_OK",
            InitFail => "INIT_FAIL",
            ConReq => "CON_REQ",
            ConId1 => "CON_ID1",
            ConId2 => "CON_ID2",
            ConOk => "CON_OK",
            RngSingleReq => "RNG_SINGLE_REQ",
            RngSinglePending => "RNG_SINGLE_PENDING",
            RngSingleOk => "RNG_SINGLE_OK",
            RngSingleFail => "RNG_SINGLE_FAIL",
            RngContReq => "RNG_CONT_REQ",
            RngContPending => "RNG_CONT_PENDING",
            RngContOk => "RNG_CONT_OK",
            RngContFail => "RNG_CONT_FAIL",
            AtReq => "AT_REQ",
            AtArmPending => "AT_ARM_PENDING",
            AtArmOk => "AT_ARM_OK",
            AtArmFail => "AT_ARM_FAIL",
            AtTrgPending => "AT_TRG_PENDING",
            AtTrgOk => "AT_TRG_OK",
            AtTrgFail => "AT_TRG_FAIL",
            BcrReq => "BCR_REQ",
            BcrPending => "BCR_PENDING",
            BcrOk => "BCR_OK",
            PiQidReq => "PI_QID_REQ",
            PiQidPending => "PI_QID_PENDING",
            PiQidDetect => "PI_QID_DETECT",
            PiQidNodetect => "PI_QID_NODETECT",
            PiIdReq => "PI_ID_REQ",
            PiIdPending => "PI_ID_PENDING",
            PiIdDetect => "PI_ID_DETECT",
            PiIdNodetect => "PI_ID_NODETECT",
            NtReq => "NT_REQ",
            NtPending => "NT_PENDING",
            NtOk => "NT_OK",
            RbReq => "RB_REQ",
            RbAck => "RB_ACK",
        }
    }

    /// Whether this is a failure or no-detect outcome.
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            InitFail
                | RngSingleFail
                | RngContFail
                | AtArmFail
                | AtTrgFail
                | PiQidNodetect
                | PiIdNodetect
        )
    }
}

impl Default for ReleaseState {
    fn default() -> Self {
        IdleReq
    }
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effect attached to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    /// Ranging or interrogation succeeded.
    Detection,
    /// The release fired.
    Release,
    /// An attempt failed; the miss counter should be re-published.
    Retry,
}

/// Outcome of applying a reported code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State after the report.
    pub next: ReleaseState,
    /// Alert to raise, if any.
    pub alert: Option<Alert>,
}

/// Map `(current, reported)` to the controller's next state.
///
/// Returns `None` for pairs the table does not cover; the caller keeps the
/// current state.
pub fn next_state(current: ReleaseState, reported: i64) -> Option<ReleaseState> {
    transition(current, reported).map(|t| t.next)
}

/// Like [`next_state`], including the alert the transition raises.
pub fn transition(current: ReleaseState, reported: i64) -> Option<Transition> {
    let next = match (current, reported) {
        (IdleReq, report::IDLE_ACK) => IdleAck,

        (InitReq, report::INIT_PENDING) => InitPending,
        (InitPending, report::INIT_OK) => InitOk,
        (InitPending, report::INIT_FAIL) => InitFail,

        (ConReq, report::CON_ID1) => ConId1,
        (ConId1, report::CON_ID2) => ConId2,
        (ConId1, report::CON_OK) | (ConId2, report::CON_OK) => ConOk,

        (RngSingleReq, report::RNG_SINGLE_PENDING) => RngSinglePending,
        (RngSinglePending, report::RNG_SINGLE_OK) => RngSingleOk,
        (RngSinglePending, report::RNG_SINGLE_FAIL) => RngSingleFail,

        (RngContReq, report::RNG_CONT_PENDING) => RngContPending,
        (RngContPending, report::RNG_CONT_OK) => RngContOk,
        (RngContPending, report::RNG_CONT_FAIL) => RngContFail,

        (AtReq, report::AT_ARM_PENDING) => AtArmPending,
        (AtArmPending, report::AT_ARM_OK) => AtArmOk,
        (AtArmPending, report::AT_ARM_FAIL) => AtArmFail,
        (AtArmOk, report::AT_TRG_PENDING) => AtTrgPending,
        (AtTrgPending, report::AT_TRG_OK) => AtTrgOk,
        (AtTrgPending, report::AT_TRG_FAIL) => AtTrgFail,

        (BcrReq, report::BCR_PENDING) => BcrPending,
        (BcrPending, report::BCR_OK) => BcrOk,

        (PiQidReq, report::PI_QID_PENDING) => PiQidPending,
        (PiQidPending, report::PI_QID_DETECT) => PiQidDetect,
        (PiQidPending, report::PI_QID_NODETECT) => PiQidNodetect,

        (PiIdReq, report::PI_ID_PENDING) => PiIdPending,
        (PiIdPending, report::PI_ID_DETECT) => PiIdDetect,
        (PiIdPending, report::PI_ID_NODETECT) => PiIdNodetect,

        (NtReq, report::NT_PENDING) => NtPending,
        (NtPending, report::NT_OK) => NtOk,

        (RbReq, report::RB_ACK) => RbAck,

        _ => return None,
    };

    let alert = match next {
        RngSingleOk | RngContOk | PiQidDetect | PiIdDetect => Some(Alert::Detection),
        AtTrgOk => Some(Alert::Release),
        state if state.is_failure() => Some(Alert::Retry),
        _ => None,
    };

    Some(Transition { next, alert })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_outcomes() {
        assert_eq!(next_state(InitPending, 0x12), Some(InitOk));
        assert_eq!(next_state(InitPending, 0x13), Some(InitFail));
        assert_eq!(
            transition(InitPending, 0x13).and_then(|t| t.alert),
            Some(Alert::Retry)
        );
    }

    #[test]
    fn test_arm_then_trigger() {
        assert_eq!(next_state(AtArmOk, 0x54), Some(AtTrgPending));
        let fired = transition(AtTrgPending, 0x55).unwrap();
        assert_eq!(fired.next, AtTrgOk);
        assert_eq!(fired.alert, Some(Alert::Release));
        assert_eq!(next_state(AtTrgPending, 0x56), Some(AtTrgFail));
    }

    #[test]
    fn test_connect_may_skip_second_id() {
        assert_eq!(next_state(ConId1, 0x23), Some(ConOk));
        assert_eq!(next_state(ConId2, 0x23), Some(ConOk));
    }

    #[test]
    fn test_unmatched_pairs() {
        assert_eq!(next_state(IdleAck, 0x12), None);
        assert_eq!(next_state(InitPending, 0x01), None);
        assert_eq!(next_state(AtTrgOk, 0x55), None);
    }

    #[test]
    fn test_detection_alerts() {
        for (state, code) in [
            (RngSinglePending, 0x32),
            (RngContPending, 0x42),
            (PiQidPending, 0x72),
            (PiIdPending, 0x82),
        ] {
            assert_eq!(
                transition(state, code).and_then(|t| t.alert),
                Some(Alert::Detection),
                "{} + {:#x}",
                state,
                code
            );
        }
        assert_eq!(transition(NtPending, 0x92).and_then(|t| t.alert), None);
    }

    #[test]
    fn test_operation_codes_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_code(op.code()), Some(op));
        }
        assert_eq!(Operation::from_code(0x99), None);
    }

    #[test]
    fn test_preconditions() {
        assert!(Operation::Idle.allowed_from(AtTrgOk));
        assert!(Operation::Init.allowed_from(IdleAck));
        assert!(!Operation::Init.allowed_from(IdleReq));
        assert!(Operation::Trigger.allowed_from(RngContOk));
        assert!(!Operation::Broadcast.allowed_from(ConOk));
        assert!(Operation::Reboot.allowed_from(IdleAck));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(InitPending.to_string(), "INIT_PENDING");
        assert_eq!(PiQidNodetect.to_string(), "PI_QID_NODETECT");
        assert_eq!(
            serde_json::to_string(&AtTrgOk).unwrap(),
            "\"AT_TRG_OK\""
        );
    }
}
