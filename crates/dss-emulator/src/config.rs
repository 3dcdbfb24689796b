//! Configuration for the roles and the firmware transfer.
//!
//! Every struct deserializes with `#[serde(default)]`, so a config file only
//! needs the fields it changes. Durations are stored as milliseconds.

use crate::clock::ScaledClock;
use crate::error::EmulatorResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Protocol ids of the two roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Controller id.
    pub controller_id: String,
    /// Device id.
    pub device_id: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            controller_id: "RC-RI".to_string(),
            device_id: "UDB".to_string(),
        }
    }
}

/// Parameters the controller writes when it starts operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// `AR_MFG` written on init.
    pub manufacturer: String,
    /// `AR_MODEL` written on init.
    pub model: String,
    /// `SOUNDSPEED` written on init.
    pub sound_speed: i64,
    /// `RANGE_MAX` written on init.
    pub range_max: i64,
    /// `PIN_ID` written on connect.
    pub pin_id: i64,
    /// How long to wait for `OK`/`NO`/`ACK`/`NAK` on correlated requests.
    pub request_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            manufacturer: "ASH".to_string(),
            model: "ARC1-12".to_string(),
            sound_speed: 1,
            range_max: 1,
            pin_id: 12345,
            request_timeout_ms: 3000,
        }
    }
}

impl ControllerConfig {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Detection probabilities for the interrogation operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Quick id, noise below threshold.
    pub quick_id_quiet: f64,
    /// Quick id, noise at or above threshold.
    pub quick_id_noisy: f64,
    /// Full id, noise below threshold.
    pub full_id_quiet: f64,
    /// Full id, noise at or above threshold.
    pub full_id_noisy: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            quick_id_quiet: 0.8,
            quick_id_noisy: 0.3,
            full_id_quiet: 0.7,
            full_id_noisy: 0.2,
        }
    }
}

/// Simulated processing time of each device operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationTimings {
    pub idle_ms: u64,
    pub init_ms: u64,
    /// Delay before each of the two connect id packets.
    pub connect_step_ms: u64,
    /// Extra delay when a connect attempt is simulated to fail.
    pub connect_retry_ms: u64,
    pub single_range_ms: u64,
    pub continuous_start_ms: u64,
    /// Period of continuous ranging updates.
    pub continuous_period_ms: u64,
    pub arm_ms: u64,
    /// Pause between arming and firing.
    pub trigger_delay_ms: u64,
    pub trigger_ms: u64,
    pub broadcast_ms: u64,
    pub quick_id_ms: u64,
    pub full_id_ms: u64,
    pub noise_test_ms: u64,
    pub reboot_ms: u64,
    pub factory_test_ms: u64,
}

impl Default for OperationTimings {
    fn default() -> Self {
        OperationTimings {
            idle_ms: 1000,
            init_ms: 2000,
            connect_step_ms: 2000,
            connect_retry_ms: 1000,
            single_range_ms: 3000,
            continuous_start_ms: 2000,
            continuous_period_ms: 5000,
            arm_ms: 3000,
            trigger_delay_ms: 1000,
            trigger_ms: 2000,
            broadcast_ms: 2000,
            quick_id_ms: 3000,
            full_id_ms: 4000,
            noise_test_ms: 5000,
            reboot_ms: 2000,
            factory_test_ms: 2000,
        }
    }
}

/// Device behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Password accepted by `SP` and `SI`.
    pub password: String,
    /// Whether operations may fail at random.
    pub simulate_failures: bool,
    /// Failure probability when `simulate_failures` is set.
    pub failure_rate: f64,
    /// Probability of answering a firmware line with `NAK`.
    pub load_fault_rate: f64,
    /// Interrogation detection probabilities.
    pub detection: DetectionConfig,
    /// Operation latencies.
    pub timings: OperationTimings,
    /// Seed for the device RNG; random when unset.
    pub seed: Option<u64>,
    /// Directory receiving uploaded firmware images.
    pub firmware_dir: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            password: "1776".to_string(),
            simulate_failures: false,
            failure_rate: 0.2,
            load_fault_rate: 0.0,
            detection: DetectionConfig::default(),
            timings: OperationTimings::default(),
            seed: None,
            firmware_dir: PathBuf::from("firmware"),
        }
    }
}

/// Firmware transfer tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Wall time to wait for each line's acknowledgement; not scaled by `speed`.
    pub ack_timeout_ms: u64,
    /// Attempts per line before the transfer aborts.
    pub max_attempts: u32,
    /// Delay between successive lines.
    pub pacing_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            ack_timeout_ms: 3000,
            max_attempts: 5,
            pacing_ms: 100,
        }
    }
}

impl TransferConfig {
    /// Acknowledgement timeout as a duration.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Pacing delay as a duration.
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Everything needed to build both roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub link: LinkConfig,
    pub controller: ControllerConfig,
    pub device: DeviceConfig,
    pub transfer: TransferConfig,
    /// Simulation speed multiplier; 1.0 is real time.
    pub speed: f64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            link: LinkConfig::default(),
            controller: ControllerConfig::default(),
            device: DeviceConfig::default(),
            transfer: TransferConfig::default(),
            speed: 1.0,
        }
    }
}

impl EmulatorConfig {
    /// Clock running at the configured speed.
    pub fn clock(&self) -> EmulatorResult<ScaledClock> {
        ScaledClock::new(self.speed)
    }
}
