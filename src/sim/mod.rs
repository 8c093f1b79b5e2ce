//! The simulator clock and timer wheel.
//!
//! A single `Simulator` owns the logical clock and every armed timer. The
//! clock advances by a fixed increment per outer round; components arm timers
//! against absolute fire times and collect the expired ones during their
//! processing pass, dispatching their own callbacks.

pub mod runner;

use crate::config;
use crate::report;
use crate::time::{Duration, Instant};
use crate::{Error, Result};

/// Identity of a timer-owning component. Each sender and receiver gets its
/// own owner id, distinct from its host's node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerOwner(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The sender's retransmission timeout.
    Retransmit,
    /// The sender's idle-connection timeout.
    IdleConnection,
    /// The receiver's delayed cumulative ACK.
    DelayedAck,
}

/// A timer descriptor. Callers build one as a value; the wheel stores its own
/// copy, so the caller's template can be reused after cancellation or expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub owner: TimerOwner,
    pub kind: TimerKind,
    pub fires_at: Instant,
}

/// Opaque cancellation handle returned by [`Simulator::set_timeout_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

#[derive(Debug)]
struct Armed {
    handle: TimerHandle,
    timer: Timer,
}

pub struct Simulator {
    now: Instant,
    increment: Duration,
    /// Registration order; expiry checks walk this front to back.
    timers: Vec<Armed>,
    next_handle: u64,
}

impl Simulator {
    pub fn new() -> Simulator {
        Simulator {
            now: Instant::ZERO,
            increment: config::TICK,
            timers: Vec::new(),
            next_handle: 0,
        }
    }

    pub fn current_time(&self) -> Instant {
        self.now
    }

    pub fn time_increment(&self) -> Duration {
        self.increment
    }

    /// Current tick index.
    pub fn tick(&self) -> u64 {
        (self.now.total_micros() as u64) / self.increment.total_micros()
    }

    /// Advance the clock by one increment.
    pub fn advance(&mut self) {
        self.now += self.increment;
        report!(
            report::SIMULATOR,
            "tcpsim::sim",
            "tick {} ({} timers armed)",
            self.tick(),
            self.timers.len()
        );
    }

    /// Arm a copy of `timer`. Arming a second timer with the same owner and
    /// kind is a programmer error: callers cancel before re-arming.
    pub fn set_timeout_at(&mut self, timer: Timer) -> Result<TimerHandle> {
        if self
            .timers
            .iter()
            .any(|a| a.timer.owner == timer.owner && a.timer.kind == timer.kind)
        {
            return Err(Error::InvalidTimer);
        }
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.timers.push(Armed { handle, timer });
        Ok(handle)
    }

    /// Disarm a timer. Unknown handles are a programmer error.
    pub fn cancel_timeout(&mut self, handle: TimerHandle) -> Result<Timer> {
        match self.timers.iter().position(|a| a.handle == handle) {
            Some(i) => Ok(self.timers.remove(i).timer),
            None => Err(Error::InvalidTimer),
        }
    }

    /// Remove and return the due timers for `owner`, in registration order.
    ///
    /// The caller dispatches its own `timer_expired` callbacks. Timers armed
    /// while dispatching are seen only by a later check, never this one.
    pub fn check_expired(&mut self, owner: TimerOwner) -> Vec<Timer> {
        let now = self.now;
        let mut due = Vec::new();
        self.timers.retain(|a| {
            if a.timer.owner == owner && a.timer.fires_at <= now {
                due.push(a.timer);
                false
            } else {
                true
            }
        });
        due
    }

    #[cfg(test)]
    fn armed_count(&self) -> usize {
        self.timers.len()
    }
}

impl Default for Simulator {
    fn default() -> Simulator {
        Simulator::new()
    }
}
