//! The standard DSS register set.
//!
//! Bits follow declaration order. `RSTATE_RPT` sits after every telemetry
//! register so a controller that reads changes in ascending bit order sees
//! the new measurements before the state report that announces them.

use crate::types::{Direction, RegisterDef};

use Direction::{Both, ControllerToDevice as ToDevice, DeviceToController as ToController};

// ========== Identity ==========

/// Device model number.
pub const MODEL: RegisterDef = RegisterDef::integer("MODEL", "device model number", ToController, 0);
/// Device serial number.
pub const SN: RegisterDef = RegisterDef::integer("SN", "device serial number", ToController, 1);
/// Firmware version.
pub const FIRMWARE: RegisterDef =
    RegisterDef::integer("FIRMWARE", "firmware version", ToController, 2);
/// Self-test result.
pub const SELFTEST: RegisterDef =
    RegisterDef::integer("SELFTEST", "self-test result", ToController, 3);

// ========== Acoustic release configuration ==========

/// Acoustic channel parameter.
pub const AR_ACP: RegisterDef =
    RegisterDef::integer("AR_ACP", "acoustic channel parameter", ToController, 4);
/// Detection threshold in dB.
pub const AR_THOLD_DB: RegisterDef =
    RegisterDef::integer("AR_THOLD_DB", "detection threshold (dB)", Both, 5);
/// Measured noise level in dB.
pub const AR_NOISE_DB: RegisterDef =
    RegisterDef::integer("AR_NOISE_DB", "noise level (dB)", ToController, 6);
/// Release manufacturer.
pub const AR_MFG: RegisterDef = RegisterDef::text("AR_MFG", "release manufacturer", ToDevice, 7);
/// Release model.
pub const AR_MODEL: RegisterDef = RegisterDef::text("AR_MODEL", "release model", ToDevice, 8);
/// Sound speed setting.
pub const SOUNDSPEED: RegisterDef =
    RegisterDef::integer("SOUNDSPEED", "sound speed setting", ToDevice, 9);
/// Maximum range setting.
pub const RANGE_MAX: RegisterDef =
    RegisterDef::integer("RANGE_MAX", "maximum range setting", ToDevice, 10);
/// Release PIN code.
pub const PIN_ID: RegisterDef = RegisterDef::integer("PIN_ID", "release PIN code", ToDevice, 11);
/// Broadcast group id.
pub const GROUP_ID: RegisterDef =
    RegisterDef::integer("GROUP_ID", "broadcast group id", ToDevice, 12);

// ========== State machine ==========

/// Requested operation code.
pub const RSTATE_REQ: RegisterDef =
    RegisterDef::integer("RSTATE_REQ", "requested operation", ToDevice, 13);
/// One-hot map of the reported state.
pub const RSTATE_MAP: RegisterDef =
    RegisterDef::integer("RSTATE_MAP", "reported state map", ToController, 14);

// ========== Ranging ==========

/// Range result map.
pub const RR_MAP: RegisterDef = RegisterDef::integer("RR_MAP", "range result map", ToController, 15);
/// Range attempt counter.
pub const RR_CTR: RegisterDef = RegisterDef::integer("RR_CTR", "range attempt counter", Both, 16);
/// Range miss counter.
pub const RR_MISS: RegisterDef = RegisterDef::integer("RR_MISS", "range miss counter", Both, 17);
/// Latest range value.
pub const RRR_VAL: RegisterDef =
    RegisterDef::integer("RRR_VAL", "latest range value", ToController, 18);
/// Telemetry slot 1 divisor.
pub const RR1_DIV: RegisterDef =
    RegisterDef::integer("RR1_DIV", "telemetry 1 divisor", ToController, 19);
/// Telemetry slot 1 legend.
pub const RR1_LGD: RegisterDef =
    RegisterDef::text("RR1_LGD", "telemetry 1 legend", ToController, 20);
/// Telemetry slot 1 value.
pub const RR1_VAL: RegisterDef =
    RegisterDef::integer("RR1_VAL", "telemetry 1 value", ToController, 21);
/// Telemetry slot 2 divisor.
pub const RR2_DIV: RegisterDef =
    RegisterDef::integer("RR2_DIV", "telemetry 2 divisor", ToController, 22);
/// Telemetry slot 2 legend.
pub const RR2_LGD: RegisterDef =
    RegisterDef::text("RR2_LGD", "telemetry 2 legend", ToController, 23);
/// Telemetry slot 2 value.
pub const RR2_VAL: RegisterDef =
    RegisterDef::integer("RR2_VAL", "telemetry 2 value", ToController, 24);
/// Telemetry slot 3 divisor.
pub const RR3_DIV: RegisterDef =
    RegisterDef::integer("RR3_DIV", "telemetry 3 divisor", ToController, 25);
/// Telemetry slot 3 legend.
pub const RR3_LGD: RegisterDef =
    RegisterDef::text("RR3_LGD", "telemetry 3 legend", ToController, 26);
/// Telemetry slot 3 value.
pub const RR3_VAL: RegisterDef =
    RegisterDef::integer("RR3_VAL", "telemetry 3 value", ToController, 27);
/// Telemetry slot 4 divisor.
pub const RR4_DIV: RegisterDef =
    RegisterDef::integer("RR4_DIV", "telemetry 4 divisor", ToController, 28);
/// Telemetry slot 4 legend.
pub const RR4_LGD: RegisterDef =
    RegisterDef::text("RR4_LGD", "telemetry 4 legend", ToController, 29);
/// Telemetry slot 4 value.
pub const RR4_VAL: RegisterDef =
    RegisterDef::integer("RR4_VAL", "telemetry 4 value", ToController, 30);

// ========== Identification ==========

/// Quick identification result.
pub const PUBLIC_QID: RegisterDef =
    RegisterDef::integer("PUBLIC_QID", "quick identification result", ToController, 31);
/// Full identification result.
pub const PUBLIC_ID: RegisterDef =
    RegisterDef::integer("PUBLIC_ID", "full identification result", ToController, 32);

// ========== Reporting ==========

/// Reported state code.
pub const RSTATE_RPT: RegisterDef =
    RegisterDef::integer("RSTATE_RPT", "reported state code", ToController, 33);
/// Change map of registers the device has modified.
pub const REG_MAP: RegisterDef = RegisterDef::bitmap("REG_MAP", "register change map", ToController, 34);

/// Name of the register that accumulates change bits.
pub const CHANGE_MAP: &str = REG_MAP.name;

/// Telemetry slots as (divisor, legend, value) triples.
pub const TELEMETRY_SLOTS: [(RegisterDef, RegisterDef, RegisterDef); 4] = [
    (RR1_DIV, RR1_LGD, RR1_VAL),
    (RR2_DIV, RR2_LGD, RR2_VAL),
    (RR3_DIV, RR3_LGD, RR3_VAL),
    (RR4_DIV, RR4_LGD, RR4_VAL),
];

/// Every standard register in change-map bit order.
pub const STANDARD_REGISTERS: &[RegisterDef] = &[
    MODEL, SN, FIRMWARE, SELFTEST, AR_ACP, AR_THOLD_DB, AR_NOISE_DB, AR_MFG, AR_MODEL, SOUNDSPEED,
    RANGE_MAX, PIN_ID, GROUP_ID, RSTATE_REQ, RSTATE_MAP, RR_MAP, RR_CTR, RR_MISS, RRR_VAL, RR1_DIV,
    RR1_LGD, RR1_VAL, RR2_DIV, RR2_LGD, RR2_VAL, RR3_DIV, RR3_LGD, RR3_VAL, RR4_DIV, RR4_LGD,
    RR4_VAL, PUBLIC_QID, PUBLIC_ID, RSTATE_RPT, REG_MAP,
];

/// Find a standard definition by name.
pub fn lookup(name: &str) -> Option<&'static RegisterDef> {
    STANDARD_REGISTERS.iter().find(|def| def.name == name)
}
