//! Time source for simulated latencies.
//!
//! Simulated waits (device processing delays, firmware pacing) go through a
//! [`Clock`] so the runner can speed them up. Acknowledgement timeouts are
//! wall time and use `tokio::time` directly.

use crate::error::{EmulatorError, EmulatorResult};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A boxed sleep future.
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Something that can wait for simulated time to pass.
pub trait Clock: Send + Sync + 'static {
    /// Wait for `duration` of simulated time.
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// Real time through the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Tokio time divided by a speed multiplier.
///
/// A speed of 2.0 makes every simulated delay take half as long.
#[derive(Debug, Clone, Copy)]
pub struct ScaledClock {
    speed: f64,
}

impl ScaledClock {
    /// Create a clock running `speed` times faster than real time.
    pub fn new(speed: f64) -> EmulatorResult<Self> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(EmulatorError::Config(format!(
                "speed multiplier must be positive, got {}",
                speed
            )));
        }
        Ok(ScaledClock { speed })
    }

    /// The speed multiplier.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Wall-clock duration of a simulated delay.
    pub fn scale(&self, duration: Duration) -> Duration {
        duration.div_f64(self.speed)
    }
}

impl Clock for ScaledClock {
    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(self.scale(duration)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale() {
        let clock = ScaledClock::new(4.0).unwrap();
        assert_eq!(clock.scale(Duration::from_secs(2)), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_speed() {
        assert!(ScaledClock::new(0.0).is_err());
        assert!(ScaledClock::new(-1.0).is_err());
        assert!(ScaledClock::new(f64::NAN).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scaled_sleep_advances_less() {
        let clock = ScaledClock::new(10.0).unwrap();
        let start = tokio::time::Instant::now();
        clock.sleep(Duration::from_secs(5)).await;
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }
}
