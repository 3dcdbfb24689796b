//! Events the controller publishes to observers.

use crate::state::ReleaseState;
use serde::Serialize;

/// Something an observer of the controller may react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// The tracked release state moved.
    StateChanged {
        /// Previous state.
        from: ReleaseState,
        /// New state.
        to: ReleaseState,
    },

    /// `RRR_VAL` was pulled from the device.
    RangeReceived {
        /// Range in centimetres.
        range: i64,
    },

    /// Ranging or interrogation succeeded.
    DetectionAlert {
        /// State that raised the alert.
        state: ReleaseState,
    },

    /// The release fired.
    ReleaseAlert,

    /// An attempt failed; carries the current `RR_MISS`.
    RetryCountChanged {
        /// Consecutive misses.
        misses: i64,
    },

    /// The device reported its serial number.
    IdentityReceived {
        /// Serial number text.
        serial: String,
    },
}
