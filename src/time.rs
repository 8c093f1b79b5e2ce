//! Logical time for the simulation.
//!
//! `Instant` and `Duration` carry microseconds of simulated time. One tick of
//! the simulator clock is [`crate::config::TICK`]; sub-tick values express
//! link transmission and propagation delays.

use core::fmt;
use core::ops::{Add, AddAssign, Mul, Sub, SubAssign};

/// A point on the simulated clock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    micros: i64,
}

impl Instant {
    pub const ZERO: Instant = Instant::from_micros(0);

    pub const fn from_micros(micros: i64) -> Instant {
        Instant { micros }
    }

    pub const fn from_millis(millis: i64) -> Instant {
        Instant {
            micros: millis * 1_000,
        }
    }

    pub const fn from_secs(secs: i64) -> Instant {
        Instant {
            micros: secs * 1_000_000,
        }
    }

    pub const fn total_micros(&self) -> i64 {
        self.micros
    }

    /// Simulated seconds, fractional.
    pub fn secs(&self) -> f64 {
        self.micros as f64 / 1_000_000.0
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.secs())
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_micros(self.micros + rhs.total_micros() as i64)
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.micros += rhs.total_micros() as i64;
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_micros(self.micros - rhs.total_micros() as i64)
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    /// The clock is monotone; subtracting a later instant is a logic error.
    fn sub(self, rhs: Instant) -> Duration {
        assert!(self.micros >= rhs.micros, "instant underflow");
        Duration::from_micros((self.micros - rhs.micros) as u64)
    }
}

/// A span of simulated time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    micros: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration::from_micros(0);

    pub const fn from_micros(micros: u64) -> Duration {
        Duration { micros }
    }

    pub const fn from_millis(millis: u64) -> Duration {
        Duration {
            micros: millis * 1_000,
        }
    }

    pub const fn from_secs(secs: u64) -> Duration {
        Duration {
            micros: secs * 1_000_000,
        }
    }

    pub const fn total_micros(&self) -> u64 {
        self.micros
    }

    pub fn secs(&self) -> f64 {
        self.micros as f64 / 1_000_000.0
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.secs())
    }
}

impl Add<Duration> for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration::from_micros(self.micros + rhs.micros)
    }
}

impl AddAssign<Duration> for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        self.micros += rhs.micros;
    }
}

impl Sub<Duration> for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        Duration::from_micros(self.micros.saturating_sub(rhs.micros))
    }
}

impl SubAssign<Duration> for Duration {
    fn sub_assign(&mut self, rhs: Duration) {
        self.micros = self.micros.saturating_sub(rhs.micros);
    }
}

impl Mul<u32> for Duration {
    type Output = Duration;

    fn mul(self, rhs: u32) -> Duration {
        Duration::from_micros(self.micros * rhs as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_arithmetic() {
        let t = Instant::from_secs(2) + Duration::from_millis(500);
        assert_eq!(t.total_micros(), 2_500_000);
        assert_eq!(t - Instant::from_secs(1), Duration::from_millis(1_500));
    }

    #[test]
    fn duration_saturates_downward() {
        let mut d = Duration::from_millis(1);
        d -= Duration::from_millis(5);
        assert_eq!(d, Duration::ZERO);
    }

    #[test]
    fn duration_scaling() {
        assert_eq!(Duration::from_millis(3) * 4, Duration::from_millis(12));
    }

    #[test]
    #[should_panic(expected = "instant underflow")]
    fn instant_subtraction_is_monotone() {
        let _ = Instant::ZERO - Instant::from_secs(1);
    }
}
