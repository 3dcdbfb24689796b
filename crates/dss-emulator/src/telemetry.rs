//! Simulated sensor readings reported by the device.
//!
//! Units follow the register encoding: range and depth in centimetres,
//! battery in hundredths of a volt, water temperature in tenths of a degree,
//! noise in dB.

use dss_registers::{catalog, RegisterResult, RegisterTable};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Bounds of the random walk.
mod walk {
    use std::ops::RangeInclusive;

    pub const RANGE: RangeInclusive<i64> = 500..=8000;
    pub const BATTERY: RangeInclusive<i64> = 1000..=1500;
    pub const TEMPERATURE: RangeInclusive<i64> = 20..=300;
    pub const DEPTH: RangeInclusive<i64> = 100..=5000;
    pub const NOISE: RangeInclusive<i64> = 15..=80;
}

/// Bounds accepted for injected values.
mod custom {
    use std::ops::RangeInclusive;

    pub const RANGE: RangeInclusive<i64> = 500..=8000;
    pub const BATTERY: RangeInclusive<i64> = 1000..=1600;
    pub const TEMPERATURE: RangeInclusive<i64> = 0..=400;
    pub const DEPTH: RangeInclusive<i64> = 100..=5000;
    pub const NOISE: RangeInclusive<i64> = 15..=100;
}

/// One snapshot of every sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReadings {
    /// Slant range to the release, cm.
    pub range: i64,
    /// Battery voltage, V/100.
    pub battery: i64,
    /// Water temperature, °C/10.
    pub temperature: i64,
    /// Depth, cm.
    pub depth: i64,
    /// Ambient noise, dB.
    pub noise: i64,
}

/// Values to inject; unset fields keep their current reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorOverrides {
    pub range: Option<i64>,
    pub battery: Option<i64>,
    pub temperature: Option<i64>,
    pub depth: Option<i64>,
    pub noise: Option<i64>,
}

impl SensorReadings {
    /// Draw a fresh set of plausible readings.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        SensorReadings {
            range: rng.gen_range(1000..=5000),
            battery: rng.gen_range(1200..=1500),
            temperature: rng.gen_range(50..=250),
            depth: rng.gen_range(500..=2000),
            noise: rng.gen_range(20..=60),
        }
    }

    /// Take one bounded random-walk step on every sensor.
    pub fn drift<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.range = step(self.range, rng.gen_range(-100..=100), walk::RANGE);
        self.battery = step(self.battery, rng.gen_range(-5..=0), walk::BATTERY);
        self.temperature = step(self.temperature, rng.gen_range(-2..=2), walk::TEMPERATURE);
        self.depth = step(self.depth, rng.gen_range(-50..=50), walk::DEPTH);
        self.noise = step(self.noise, rng.gen_range(-5..=5), walk::NOISE);
    }

    /// Replace readings with injected values, clamped to their bounds.
    pub fn apply_overrides(&mut self, overrides: &SensorOverrides) {
        let set = |current: i64, value: Option<i64>, bounds: RangeInclusive<i64>| {
            value.map_or(current, |v| clamp(v, bounds))
        };
        self.range = set(self.range, overrides.range, custom::RANGE);
        self.battery = set(self.battery, overrides.battery, custom::BATTERY);
        self.temperature = set(self.temperature, overrides.temperature, custom::TEMPERATURE);
        self.depth = set(self.depth, overrides.depth, custom::DEPTH);
        self.noise = set(self.noise, overrides.noise, custom::NOISE);
    }

    /// Write the ranging telemetry into `table`, marking each register changed.
    pub fn publish(&self, table: &mut RegisterTable) -> RegisterResult<()> {
        table.update(&catalog::RRR_VAL, self.range)?;
        table.update(&catalog::RR1_VAL, self.battery)?;
        table.update(&catalog::RR2_VAL, self.temperature)?;
        table.update(&catalog::RR3_VAL, self.depth)
    }
}

fn step(value: i64, delta: i64, bounds: RangeInclusive<i64>) -> i64 {
    clamp(value + delta, bounds)
}

fn clamp(value: i64, bounds: RangeInclusive<i64>) -> i64 {
    value.clamp(*bounds.start(), *bounds.end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_drift_stays_in_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut readings = SensorReadings::random(&mut rng);
        for _ in 0..10_000 {
            readings.drift(&mut rng);
            assert!(walk::RANGE.contains(&readings.range));
            assert!(walk::BATTERY.contains(&readings.battery));
            assert!(walk::TEMPERATURE.contains(&readings.temperature));
            assert!(walk::DEPTH.contains(&readings.depth));
            assert!(walk::NOISE.contains(&readings.noise));
        }
    }

    #[test]
    fn test_battery_never_rises() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut readings = SensorReadings::random(&mut rng);
        let mut last = readings.battery;
        for _ in 0..100 {
            readings.drift(&mut rng);
            assert!(readings.battery <= last);
            last = readings.battery;
        }
    }

    #[test]
    fn test_overrides_are_clamped() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut readings = SensorReadings::random(&mut rng);
        let before = readings;
        readings.apply_overrides(&SensorOverrides {
            range: Some(100),
            noise: Some(120),
            temperature: Some(-10),
            ..Default::default()
        });
        assert_eq!(readings.range, 500);
        assert_eq!(readings.noise, 100);
        assert_eq!(readings.temperature, 0);
        assert_eq!(readings.battery, before.battery);
        assert_eq!(readings.depth, before.depth);
    }

    #[test]
    fn test_publish_marks_registers() {
        let mut table = RegisterTable::standard();
        let readings = SensorReadings {
            range: 1234,
            battery: 1400,
            temperature: 120,
            depth: 900,
            noise: 40,
        };
        readings.publish(&mut table).unwrap();
        assert_eq!(table.get_int(&catalog::RRR_VAL).unwrap(), 1234);
        assert_eq!(table.get_int(&catalog::RR2_VAL).unwrap(), 120);
        let expected = catalog::RRR_VAL.mask()
            | catalog::RR1_VAL.mask()
            | catalog::RR2_VAL.mask()
            | catalog::RR3_VAL.mask();
        assert_eq!(table.take_changes(), Some(expected));
    }
}
