//! Simulation configuration loaded from YAML.
//!
//! A document holds an [`EmulatorConfig`] at the top level plus a few
//! runner-only keys:
//!
//! ```yaml
//! speed: 10.0
//! log_level: debug
//! device:
//!   simulate_failures: true
//!   failure_rate: 0.3
//!   timings:
//!     init_ms: 500
//! transfer:
//!   pacing_ms: 20
//! ```

use crate::error::{RunnerError, RunnerResult};
use dss_emulator::{EmulatorConfig, ScaledClock};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Everything the `dss-sim` binary needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Role configuration.
    #[serde(flatten)]
    pub emulator: EmulatorConfig,
    /// Log filter directive, used when neither `--log-level` nor `RUST_LOG`
    /// is given.
    pub log_level: Option<String>,
    /// Prometheus listen address (needs the `prometheus` feature).
    pub metrics_addr: Option<SocketAddr>,
}

/// Command-line values that take precedence over the config document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    /// Device RNG seed.
    pub seed: Option<u64>,
    /// Speed multiplier.
    pub speed: Option<f64>,
    /// Enables failure simulation at this rate.
    pub failure_rate: Option<f64>,
    /// Directory for uploaded firmware images.
    pub firmware_dir: Option<PathBuf>,
}

impl SimConfig {
    /// Parse a YAML document.
    pub fn from_yaml(text: &str) -> RunnerResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load and parse a YAML file.
    pub fn load(path: impl AsRef<Path>) -> RunnerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RunnerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        let device = &mut self.emulator.device;
        if let Some(seed) = overrides.seed {
            device.seed = Some(seed);
        }
        if let Some(rate) = overrides.failure_rate {
            device.simulate_failures = true;
            device.failure_rate = rate;
        }
        if let Some(dir) = &overrides.firmware_dir {
            device.firmware_dir = dir.clone();
        }
        if let Some(speed) = overrides.speed {
            self.emulator.speed = speed;
        }
    }

    /// Check values the YAML schema cannot express.
    pub fn validate(&self) -> RunnerResult<()> {
        self.clock()?;
        let device = &self.emulator.device;
        for (name, value) in [
            ("device.failure_rate", device.failure_rate),
            ("device.load_fault_rate", device.load_fault_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RunnerError::Config(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if self.emulator.transfer.max_attempts == 0 {
            return Err(RunnerError::Config(
                "transfer.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.emulator.link.controller_id == self.emulator.link.device_id {
            return Err(RunnerError::Config(format!(
                "controller and device share the id {}",
                self.emulator.link.device_id
            )));
        }
        Ok(())
    }

    /// Clock running at the configured speed.
    pub fn clock(&self) -> RunnerResult<ScaledClock> {
        Ok(self.emulator.clock()?)
    }
}
