//! Retransmission-timeout estimation, RFC 6298 style.
//!
//! Smoothed RTT and deviation are kept as scaled integers in tick units
//! (8× and 4× respectively) so the gain divisions stay in integer
//! arithmetic. Samples come from the timestamp echoed in cumulative ACKs;
//! retransmissions carry no timestamp and never contribute a sample.

use crate::config;
use crate::report;
use crate::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// True once at least one RTT measurement has been folded in.
    have_measurement: bool,
    /// 8 × smoothed RTT, in ticks.
    srtt8: i64,
    /// 4 × RTT deviation, in ticks.
    rttvar4: i64,
    /// Base timeout, before backoff.
    timeout_interval: Duration,
    /// Exponential backoff multiplier, a power of two.
    backoff: u32,
    tick: Duration,
    max_timeout: Duration,
}

impl RttEstimator {
    pub fn new() -> RttEstimator {
        RttEstimator {
            have_measurement: false,
            srtt8: 0,
            rttvar4: 0,
            timeout_interval: config::TICK * config::INITIAL_RTO_TICKS,
            backoff: 1,
            tick: config::TICK,
            max_timeout: config::TICK * config::MAX_RTO_TICKS,
        }
    }

    /// Fold in the sample `now - ts`. Retransmissions (`ts == None`) are
    /// ignored. A fresh sample also resets the backoff.
    pub fn update_rtt(&mut self, now: Instant, ts: Option<Instant>) {
        let Some(ts) = ts else {
            return;
        };
        self.backoff = 1;

        let tick_us = self.tick.total_micros() as i64;
        let delta = (now - ts).total_micros() as i64;
        let sample = ((delta + tick_us / 2) / tick_us).max(1);

        if !self.have_measurement {
            self.have_measurement = true;
            self.srtt8 = sample * 8;
            self.rttvar4 = sample * 2;
        } else {
            let err = sample - self.srtt8 / 8;
            self.srtt8 += err;
            self.rttvar4 += err.abs() - self.rttvar4 / 4;
        }

        let base = (self.srtt8 / 8 + self.rttvar4.max(1)).max(1);
        self.timeout_interval = Duration::from_micros(base as u64 * tick_us as u64);
        report!(
            report::RTO_ESTIMATE,
            "tcpsim::rtte",
            "sample={}t srtt={}t rto={}",
            sample,
            self.srtt8 / 8,
            self.timeout_interval
        );
    }

    /// Double the backoff unless the backed-off interval already reached
    /// the ceiling.
    pub fn timer_backoff(&mut self) {
        if self.timeout_interval * self.backoff < self.max_timeout {
            self.backoff <<= 1;
        }
    }

    /// The interval to arm the retransmission timer with, backoff applied,
    /// clamped to [one tick, the ceiling].
    pub fn timeout_interval(&self) -> Duration {
        (self.timeout_interval * self.backoff)
            .max(self.tick)
            .min(self.max_timeout)
    }

    /// Smoothed RTT in ticks, rounded down.
    pub fn smoothed_rtt(&self) -> i64 {
        self.srtt8 / 8
    }

    #[cfg(test)]
    fn deviation4(&self) -> i64 {
        self.rttvar4
    }
}

impl Default for RttEstimator {
    fn default() -> RttEstimator {
        RttEstimator::new()
    }
}
