//! The TCP sender state machine.
//!
//! One sender per run, fed a single application byte stream at start. The
//! congestion-control reaction to duplicate ACKs and retransmission
//! timeouts is selected by the [`TcpVariant`]; the Slow-Start /
//! Congestion-Avoidance / Fast-Recovery progression is a tagged state field
//! with per-state window arithmetic.

use core::fmt;
use core::str::FromStr;
use std::cell::RefCell;
use std::rc::Rc;

use super::rtte::RttEstimator;
use crate::config::{self, DUP_ACK_THRESHOLD, MSS};
use crate::iface::{LinkRef, NodeId};
use crate::report;
use crate::sim::{Simulator, Timer, TimerHandle, TimerKind, TimerOwner};
use crate::time::Instant;
use crate::wire::Segment;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpVariant {
    Tahoe,
    Reno,
    NewReno,
}

impl FromStr for TcpVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<TcpVariant> {
        if s.eq_ignore_ascii_case("tahoe") {
            Ok(TcpVariant::Tahoe)
        } else if s.eq_ignore_ascii_case("reno") {
            Ok(TcpVariant::Reno)
        } else if s.eq_ignore_ascii_case("newreno") {
            Ok(TcpVariant::NewReno)
        } else {
            Err(Error::UnknownVariant)
        }
    }
}

impl fmt::Display for TcpVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcpVariant::Tahoe => write!(f, "Tahoe"),
            TcpVariant::Reno => write!(f, "Reno"),
            TcpVariant::NewReno => write!(f, "NewReno"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongState {
    SlowStart,
    CongestionAvoidance,
    /// Reno and NewReno only.
    FastRecovery,
}

pub struct TcpSender {
    variant: TcpVariant,
    state: CongState,
    host: NodeId,
    peer: NodeId,
    owner: TimerOwner,
    sim: Rc<RefCell<Simulator>>,
    link: LinkRef,

    last_byte_sent: i64,
    last_byte_acked: i64,
    /// Congestion window, bytes.
    cwnd: u32,
    ss_thresh: u32,
    dup_ack_count: u32,
    /// Peer-advertised receive window, bytes.
    rcv_window: u32,
    /// `last_byte_sent` at the moment the third duplicate ACK hit; `-1`
    /// outside a recovery episode. An ACK covering this byte ends recovery.
    recover: i64,
    #[allow(unused)]
    first_partial_ack: bool,
    /// Application stream length fed so far.
    total_bytes: i64,

    rtte: RttEstimator,
    rto_timer: Option<TimerHandle>,
    idle_timer: Option<TimerHandle>,

    segments_sent: u64,
    retransmissions: u64,
}

impl TcpSender {
    pub fn new(
        variant: TcpVariant,
        host: NodeId,
        peer: NodeId,
        owner: TimerOwner,
        sim: Rc<RefCell<Simulator>>,
        link: LinkRef,
    ) -> TcpSender {
        TcpSender {
            variant,
            state: CongState::SlowStart,
            host,
            peer,
            owner,
            sim,
            link,
            last_byte_sent: -1,
            last_byte_acked: -1,
            cwnd: MSS,
            ss_thresh: config::DEFAULT_SS_THRESH,
            dup_ack_count: 0,
            rcv_window: config::DEFAULT_RCV_WINDOW,
            recover: -1,
            first_partial_ack: false,
            total_bytes: 0,
            rtte: RttEstimator::new(),
            rto_timer: None,
            idle_timer: None,
            segments_sent: 0,
            retransmissions: 0,
        }
    }

    pub fn variant(&self) -> TcpVariant {
        self.variant
    }

    pub fn owner(&self) -> TimerOwner {
        self.owner
    }

    pub fn state(&self) -> CongState {
        self.state
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ss_thresh(&self) -> u32 {
        self.ss_thresh
    }

    pub fn last_byte_acked(&self) -> i64 {
        self.last_byte_acked
    }

    pub fn last_byte_sent(&self) -> i64 {
        self.last_byte_sent
    }

    /// Bytes outstanding in the network.
    pub fn flight_size(&self) -> i64 {
        self.last_byte_sent - self.last_byte_acked
    }

    /// Usable window after congestion, flow control and flight size.
    pub fn effective_window(&self) -> i64 {
        (self.cwnd.min(self.rcv_window) as i64 - self.flight_size()).max(0)
    }

    pub fn rto_interval(&self) -> crate::time::Duration {
        self.rtte.timeout_interval()
    }

    pub fn segments_sent(&self) -> u64 {
        self.segments_sent
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    /// Transmit as much of the stream as the windows allow. `new_data`
    /// appends to the unsent stream first.
    pub fn send(&mut self, new_data: Option<i64>) -> Result<()> {
        let now = self.sim.borrow().current_time();
        if let Some(bytes) = new_data {
            self.total_bytes += bytes;
            if let Some(handle) = self.idle_timer.take() {
                self.sim.borrow_mut().cancel_timeout(handle)?;
            }
        }

        let remaining = self.total_bytes - (self.last_byte_sent + 1);
        let burst = self.effective_window().min(remaining) / MSS as i64;
        for _ in 0..burst {
            let seq = self.last_byte_sent + 1;
            let seg = Segment::data(self.peer, seq, MSS, config::DEFAULT_RCV_WINDOW, Some(now));
            self.link.borrow_mut().send(self.host, seg)?;
            self.last_byte_sent += MSS as i64;
            self.segments_sent += 1;
        }
        if burst > 0 {
            report!(
                report::SENDERS,
                "tcpsim::sender",
                "burst of {} segments up to byte {} (cwnd={} flight={})",
                burst,
                self.last_byte_sent,
                self.cwnd,
                self.flight_size()
            );
            if self.rto_timer.is_none() {
                self.arm_rto(now)?;
            }
        }

        let remaining = self.total_bytes - (self.last_byte_sent + 1);
        if remaining == 0 && self.flight_size() == 0 && self.idle_timer.is_none() {
            let fires_at = now + config::TICK * config::IDLE_TIMEOUT_TICKS;
            let handle = self.sim.borrow_mut().set_timeout_at(Timer {
                owner: self.owner,
                kind: TimerKind::IdleConnection,
                fires_at,
            })?;
            self.idle_timer = Some(handle);
        }
        Ok(())
    }

    /// Process an inbound acknowledgment.
    pub fn handle(&mut self, seg: &Segment) -> Result<()> {
        debug_assert!(seg.is_ack());
        let now = self.sim.borrow().current_time();
        self.rcv_window = seg.wnd;

        if seg.ack > self.last_byte_acked + 1 {
            let prev = self.last_byte_acked;
            self.last_byte_acked = seg.ack - 1;

            // one estimator update per MSS cumulatively acknowledged, so
            // cumulative ACKs do not starve RTT convergence
            let samples = ((self.last_byte_acked - prev) / MSS as i64).max(1);
            for _ in 0..samples {
                self.rtte.update_rtt(now, seg.ts);
            }

            self.cwnd = self.calc_cwnd_on_new_ack(seg.ack, prev)?;
            self.dup_ack_count = 0;
            self.advance_state_after_new_ack();
            if self.recover >= 0 && self.recover <= self.last_byte_acked {
                self.recover = -1;
            }

            if self.last_byte_acked < self.last_byte_sent {
                self.restart_rto(now)?;
            } else {
                self.cancel_rto()?;
            }
            report!(
                report::SENDERS,
                "tcpsim::sender",
                "new ack {} (cwnd={} ssthresh={} state={:?})",
                seg.ack,
                self.cwnd,
                self.ss_thresh,
                self.state
            );
        } else {
            self.handle_dup_ack()?;
        }
        Ok(())
    }

    pub fn timer_expired(&mut self, kind: TimerKind) -> Result<()> {
        match kind {
            TimerKind::Retransmit => {
                self.rto_timer = None;
                self.on_expired_rto()
            }
            TimerKind::IdleConnection => {
                self.idle_timer = None;
                self.on_idle_timeout();
                Ok(())
            }
            TimerKind::DelayedAck => Err(Error::InvalidTimer),
        }
    }

    fn calc_cwnd_on_new_ack(&mut self, ack: i64, prev: i64) -> Result<u32> {
        match self.state {
            CongState::SlowStart => {
                if self.recover < 0 {
                    // normal slow start: grow by the full amount acknowledged
                    Ok(self.cwnd + (ack - prev - 1) as u32)
                } else {
                    // slow start after a loss, before full recovery:
                    // cumulative ACKs count as one MSS
                    Ok(self.cwnd + MSS)
                }
            }
            CongState::CongestionAvoidance => {
                if ack - prev >= self.cwnd as i64 {
                    Ok(self.cwnd + MSS)
                } else {
                    Ok(self.cwnd + MSS * MSS / self.cwnd)
                }
            }
            CongState::FastRecovery => match self.variant {
                TcpVariant::Tahoe => unreachable!("Tahoe never enters fast recovery"),
                TcpVariant::Reno => {
                    // any new ACK ends recovery
                    self.recover = -1;
                    Ok(self.ss_thresh)
                }
                TcpVariant::NewReno => {
                    if ack < self.recover {
                        // partial ACK: the oldest outstanding segment is
                        // lost too; retransmit and deflate
                        self.retransmit_oldest()?;
                        let newly = ack - prev;
                        let mut deflated = self.cwnd as i64 - newly;
                        if newly >= MSS as i64 {
                            deflated += MSS as i64;
                        }
                        Ok(deflated.max(MSS as i64) as u32)
                    } else {
                        self.recover = -1;
                        self.first_partial_ack = true;
                        Ok(self.ss_thresh)
                    }
                }
            },
        }
    }

    fn advance_state_after_new_ack(&mut self) {
        match self.state {
            CongState::SlowStart => {
                if self.cwnd >= self.ss_thresh {
                    self.state = CongState::CongestionAvoidance;
                }
            }
            CongState::CongestionAvoidance => {
                if self.cwnd < self.ss_thresh {
                    self.state = CongState::SlowStart;
                }
            }
            CongState::FastRecovery => {
                let partial = self.variant == TcpVariant::NewReno && self.recover >= 0;
                if !partial {
                    self.state = CongState::CongestionAvoidance;
                }
            }
        }
    }

    fn handle_dup_ack(&mut self) -> Result<()> {
        if self.state == CongState::FastRecovery {
            // every further duplicate inflates the window by one segment
            self.cwnd += MSS;
            return Ok(());
        }
        self.dup_ack_count += 1;
        report!(
            report::SENDERS,
            "tcpsim::sender",
            "duplicate ack #{} for byte {}",
            self.dup_ack_count,
            self.last_byte_acked + 1
        );
        if self.dup_ack_count == DUP_ACK_THRESHOLD {
            self.on_three_duplicate_acks()?;
            self.state = match self.variant {
                TcpVariant::Tahoe => CongState::SlowStart,
                TcpVariant::Reno | TcpVariant::NewReno => CongState::FastRecovery,
            };
        }
        Ok(())
    }

    fn on_three_duplicate_acks(&mut self) -> Result<()> {
        let flight = self.flight_size();
        match self.variant {
            TcpVariant::Tahoe => {
                self.ss_thresh = half_floored_to_mss(self.cwnd as i64).max(2 * MSS);
                self.cwnd = MSS;
            }
            TcpVariant::Reno | TcpVariant::NewReno => {
                if self.recover < 0 {
                    self.recover = self.last_byte_sent;
                }
                self.ss_thresh = half_floored_to_mss(flight).max(2 * MSS);
                self.cwnd = ((flight / 2).max(2 * MSS as i64) + 3 * MSS as i64) as u32;
            }
        }
        report!(
            report::SENDERS,
            "tcpsim::sender",
            "fast retransmit (ssthresh={} cwnd={})",
            self.ss_thresh,
            self.cwnd
        );
        self.retransmit_oldest()
    }

    fn on_expired_rto(&mut self) -> Result<()> {
        let now = self.sim.borrow().current_time();
        let flight = self.flight_size();
        self.ss_thresh = match self.variant {
            TcpVariant::Tahoe => (self.cwnd as i64 / 2).max(2 * MSS as i64) as u32,
            TcpVariant::Reno | TcpVariant::NewReno => (flight / 2).max(2 * MSS as i64) as u32,
        };
        self.rtte.timer_backoff();
        self.cwnd = MSS;
        self.state = CongState::SlowStart;
        self.restart_rto(now)?;
        report!(
            report::SENDERS,
            "tcpsim::sender",
            "retransmission timeout (ssthresh={} rto={})",
            self.ss_thresh,
            self.rtte.timeout_interval()
        );
        self.retransmit_oldest()
    }

    fn on_idle_timeout(&mut self) {
        self.cwnd = MSS;
        self.dup_ack_count = 0;
        self.state = CongState::SlowStart;
        report!(
            report::SENDERS,
            "tcpsim::sender",
            "idle connection, window reset to one segment"
        );
    }

    /// Retransmit the oldest unacknowledged segment, unstamped so it never
    /// feeds the RTT estimator.
    fn retransmit_oldest(&mut self) -> Result<()> {
        if self.last_byte_acked >= self.last_byte_sent {
            return Ok(());
        }
        let seq = self.last_byte_acked + 1;
        let seg = Segment::data(self.peer, seq, MSS, config::DEFAULT_RCV_WINDOW, None);
        self.link.borrow_mut().send(self.host, seg)?;
        self.segments_sent += 1;
        self.retransmissions += 1;
        report!(
            report::SENDERS,
            "tcpsim::sender",
            "retransmitting seq={}",
            seq
        );
        Ok(())
    }

    fn arm_rto(&mut self, now: Instant) -> Result<()> {
        let handle = self.sim.borrow_mut().set_timeout_at(Timer {
            owner: self.owner,
            kind: TimerKind::Retransmit,
            fires_at: now + self.rtte.timeout_interval(),
        })?;
        self.rto_timer = Some(handle);
        Ok(())
    }

    fn restart_rto(&mut self, now: Instant) -> Result<()> {
        if let Some(handle) = self.rto_timer.take() {
            self.sim.borrow_mut().cancel_timeout(handle)?;
        }
        self.arm_rto(now)
    }

    fn cancel_rto(&mut self) -> Result<()> {
        if let Some(handle) = self.rto_timer.take() {
            self.sim.borrow_mut().cancel_timeout(handle)?;
        }
        Ok(())
    }
}

fn half_floored_to_mss(bytes: i64) -> u32 {
    ((bytes / 2) / MSS as i64 * MSS as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LINK1_TX_TIME, PROP_TIME};
    use crate::iface::Link;

    const HOST: NodeId = NodeId(1);
    const PEER: NodeId = NodeId(3);
    const LINK: NodeId = NodeId(10);

    fn harness(variant: TcpVariant) -> (TcpSender, LinkRef, Rc<RefCell<Simulator>>) {
        let sim = Rc::new(RefCell::new(Simulator::new()));
        let link = Rc::new(RefCell::new(Link::new(
            LINK,
            "l1",
            HOST,
            PEER,
            LINK1_TX_TIME,
            PROP_TIME,
        )));
        let sender = TcpSender::new(variant, HOST, PEER, TimerOwner(1), sim.clone(), link.clone());
        (sender, link, sim)
    }

    fn ack(n: i64) -> Segment {
        Segment::ack(HOST, n, config::DEFAULT_RCV_WINDOW, None)
    }

    /// Prime a sender with an acked first segment and a multi-segment
    /// flight, the state every loss test starts from.
    fn primed(variant: TcpVariant) -> (TcpSender, LinkRef, Rc<RefCell<Simulator>>) {
        let (mut sender, link, sim) = harness(variant);
        sender.send(Some(10 * MSS as i64)).unwrap();
        sender.handle(&ack(128)).unwrap();
        sender.cwnd = 1024;
        sender.send(None).unwrap();
        assert_eq!(sender.last_byte_sent(), 1151);
        (sender, link, sim)
    }

    #[test]
    fn slow_start_grows_by_the_bytes_acknowledged() {
        let (mut sender, link, _sim) = harness(TcpVariant::Tahoe);
        sender.send(Some(100 * MSS as i64)).unwrap();
        assert_eq!(link.borrow().pending(0), 1);
        assert_eq!(sender.cwnd(), MSS);

        sender.handle(&ack(128)).unwrap();
        assert_eq!(sender.cwnd(), 2 * MSS);
        sender.send(None).unwrap();
        assert_eq!(sender.last_byte_sent(), 383);

        sender.handle(&ack(384)).unwrap();
        assert_eq!(sender.cwnd(), 4 * MSS);
        assert_eq!(sender.state(), CongState::SlowStart);
    }

    #[test]
    fn slow_start_crosses_into_congestion_avoidance() {
        let (mut sender, _link, _sim) = harness(TcpVariant::Tahoe);
        sender.ss_thresh = 2 * MSS;
        sender.send(Some(100 * MSS as i64)).unwrap();
        sender.handle(&ack(128)).unwrap();
        assert_eq!(sender.state(), CongState::CongestionAvoidance);

        // additive increase from here on
        sender.send(None).unwrap();
        let before = sender.cwnd();
        sender.handle(&ack(256)).unwrap();
        assert_eq!(sender.cwnd(), before + MSS * MSS / before);
    }

    #[test]
    fn burst_respects_the_advertised_window() {
        let (mut sender, link, _sim) = harness(TcpVariant::Reno);
        sender.cwnd = 8 * MSS;
        sender.send(Some(100 * MSS as i64)).unwrap();
        assert_eq!(link.borrow().pending(0), 8);

        // the peer closes its window to three segments
        sender.handle(&ack(1024)).unwrap();
        sender.rcv_window = 3 * MSS;
        sender.send(None).unwrap();
        assert_eq!(sender.flight_size(), 3 * MSS as i64);
    }

    #[test]
    fn tahoe_fast_retransmits_once_per_episode() {
        let (mut sender, link, _sim) = primed(TcpVariant::Tahoe);
        let sent_before = link.borrow().pending(0);

        sender.handle(&ack(128)).unwrap();
        sender.handle(&ack(128)).unwrap();
        assert_eq!(sender.retransmissions(), 0);
        sender.handle(&ack(128)).unwrap();
        assert_eq!(sender.retransmissions(), 1);
        assert_eq!(sender.cwnd(), MSS);
        // floor(1024 / 2 to MSS) = 512
        assert_eq!(sender.ss_thresh(), 512);
        assert_eq!(sender.state(), CongState::SlowStart);

        // excess duplicates change nothing
        sender.handle(&ack(128)).unwrap();
        sender.handle(&ack(128)).unwrap();
        assert_eq!(sender.retransmissions(), 1);
        assert_eq!(sender.cwnd(), MSS);

        let retx = link.borrow().queued(0)[sent_before].clone();
        assert_eq!(retx.seq, 128);
        assert_eq!(retx.ts, None);
    }

    #[test]
    fn reno_enters_and_leaves_fast_recovery() {
        let (mut sender, _link, _sim) = primed(TcpVariant::Reno);
        // flight = 1151 - 127 = 1024 bytes
        for _ in 0..3 {
            sender.handle(&ack(128)).unwrap();
        }
        assert_eq!(sender.state(), CongState::FastRecovery);
        assert_eq!(sender.ss_thresh(), 512);
        assert_eq!(sender.cwnd(), 512 + 3 * MSS);
        assert_eq!(sender.retransmissions(), 1);

        // a fourth duplicate inflates the window without counting
        sender.handle(&ack(128)).unwrap();
        assert_eq!(sender.cwnd(), 512 + 4 * MSS);

        // any new ACK ends recovery and deflates to ssthresh
        sender.handle(&ack(1152)).unwrap();
        assert_eq!(sender.state(), CongState::CongestionAvoidance);
        assert_eq!(sender.cwnd(), 512);
    }

    #[test]
    fn newreno_retransmits_on_each_partial_ack() {
        let (mut sender, _link, _sim) = primed(TcpVariant::NewReno);
        for _ in 0..3 {
            sender.handle(&ack(128)).unwrap();
        }
        assert_eq!(sender.state(), CongState::FastRecovery);
        assert_eq!(sender.retransmissions(), 1);
        let inflated = sender.cwnd();

        // partial ACK: recovery continues, the next hole is retransmitted
        sender.handle(&ack(512)).unwrap();
        assert_eq!(sender.state(), CongState::FastRecovery);
        assert_eq!(sender.retransmissions(), 2);
        // deflation: cwnd - newly + one MSS
        let newly = 512 - 127;
        assert_eq!(sender.cwnd() as i64, inflated as i64 - newly + MSS as i64);

        // the ACK covering the recovery point ends the episode
        sender.handle(&ack(1152)).unwrap();
        assert_eq!(sender.state(), CongState::CongestionAvoidance);
        assert_eq!(sender.cwnd(), sender.ss_thresh());
        assert_eq!(sender.retransmissions(), 2);
    }

    #[test]
    fn rto_expiry_collapses_the_window() {
        let (mut sender, link, sim) = harness(TcpVariant::Reno);
        sender.send(Some(10 * MSS as i64)).unwrap();
        let interval_before = sender.rto_interval();

        for _ in 0..4 {
            sim.borrow_mut().advance();
        }
        let due = sim.borrow_mut().check_expired(TimerOwner(1));
        assert_eq!(due.len(), 1);
        sender.timer_expired(due[0].kind).unwrap();

        assert_eq!(sender.cwnd(), MSS);
        assert_eq!(sender.state(), CongState::SlowStart);
        assert_eq!(sender.retransmissions(), 1);
        // exponential backoff doubled the interval
        assert_eq!(sender.rto_interval(), interval_before * 2);
        // the retransmission is unstamped
        let retx = link.borrow().queued(0).last().unwrap().clone();
        assert_eq!(retx.seq, 0);
        assert_eq!(retx.ts, None);
        // and a fresh timer is armed
        assert!(sender.rto_timer.is_some());
    }

    #[test]
    fn idle_timeout_restarts_slow_start() {
        let (mut sender, _link, sim) = harness(TcpVariant::Tahoe);
        sender.send(Some(MSS as i64)).unwrap();
        sender.handle(&ack(128)).unwrap();
        sender.cwnd = 16 * MSS;
        sender.state = CongState::CongestionAvoidance;
        let thresh = sender.ss_thresh();

        // everything is acked and nothing is left: the idle timer is armed
        sender.send(None).unwrap();
        assert!(sender.idle_timer.is_some());
        for _ in 0..=config::IDLE_TIMEOUT_TICKS {
            sim.borrow_mut().advance();
        }
        let due = sim.borrow_mut().check_expired(TimerOwner(1));
        assert_eq!(due.len(), 1);
        sender.timer_expired(due[0].kind).unwrap();

        assert_eq!(sender.cwnd(), MSS);
        assert_eq!(sender.state(), CongState::SlowStart);
        assert_eq!(sender.ss_thresh(), thresh);
    }

    #[test]
    fn new_data_cancels_the_idle_timer() {
        let (mut sender, _link, _sim) = harness(TcpVariant::Tahoe);
        sender.send(Some(MSS as i64)).unwrap();
        sender.handle(&ack(128)).unwrap();
        sender.send(None).unwrap();
        assert!(sender.idle_timer.is_some());
        sender.send(Some(MSS as i64)).unwrap();
        assert!(sender.idle_timer.is_none());
    }

    #[test]
    fn recovery_marker_clears_once_covered() {
        let (mut sender, _link, _sim) = primed(TcpVariant::NewReno);
        for _ in 0..3 {
            sender.handle(&ack(128)).unwrap();
        }
        assert_eq!(sender.recover, 1151);
        sender.handle(&ack(512)).unwrap();
        assert_eq!(sender.recover, 1151);
        sender.handle(&ack(1152)).unwrap();
        assert_eq!(sender.recover, -1);
    }

    #[test]
    fn unknown_variant_names_are_rejected() {
        assert_eq!("Vegas".parse::<TcpVariant>(), Err(Error::UnknownVariant));
        assert_eq!("newreno".parse::<TcpVariant>(), Ok(TcpVariant::NewReno));
    }
}
