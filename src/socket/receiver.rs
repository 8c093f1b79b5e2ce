//! The TCP receiver.
//!
//! Delivers the byte stream in order, buffers out-of-order segments, and
//! acknowledges cumulatively. In-order arrivals share one pending ACK that a
//! delayed-ACK timer flushes at the end of the tick; a sequence gap flushes
//! the pending ACK and answers every out-of-order arrival with an immediate
//! duplicate ACK.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::iface::{LinkRef, NodeId};
use crate::report;
use crate::sim::{Simulator, Timer, TimerHandle, TimerKind, TimerOwner};
use crate::wire::Segment;
use crate::{Error, Result};

pub struct TcpReceiver {
    host: NodeId,
    peer: NodeId,
    owner: TimerOwner,
    sim: Rc<RefCell<Simulator>>,
    link: LinkRef,

    max_rcv_window: u32,
    current_rcv_window: u32,
    last_byte_received: i64,
    next_byte_expected: i64,
    /// Out-of-order segments, keyed and drained by sequence number.
    out_of_order: BTreeMap<i64, Segment>,
    /// At most one cumulative ACK waits for the delayed-ACK timer.
    pending_ack: Option<Segment>,
    delack_timer: Option<TimerHandle>,

    segments_received: u64,
    acks_sent: u64,
    dup_acks_sent: u64,
}

impl TcpReceiver {
    pub fn new(
        host: NodeId,
        peer: NodeId,
        owner: TimerOwner,
        sim: Rc<RefCell<Simulator>>,
        link: LinkRef,
        max_rcv_window: u32,
    ) -> TcpReceiver {
        TcpReceiver {
            host,
            peer,
            owner,
            sim,
            link,
            max_rcv_window,
            current_rcv_window: max_rcv_window,
            last_byte_received: -1,
            next_byte_expected: 0,
            out_of_order: BTreeMap::new(),
            pending_ack: None,
            delack_timer: None,
            segments_received: 0,
            acks_sent: 0,
            dup_acks_sent: 0,
        }
    }

    pub fn owner(&self) -> TimerOwner {
        self.owner
    }

    pub fn next_byte_expected(&self) -> i64 {
        self.next_byte_expected
    }

    pub fn last_byte_received(&self) -> i64 {
        self.last_byte_received
    }

    pub fn current_rcv_window(&self) -> u32 {
        self.current_rcv_window
    }

    pub fn max_rcv_window(&self) -> u32 {
        self.max_rcv_window
    }

    pub fn buffered(&self) -> usize {
        self.out_of_order.len()
    }

    pub fn segments_received(&self) -> u64 {
        self.segments_received
    }

    pub fn acks_sent(&self) -> u64 {
        self.acks_sent
    }

    pub fn dup_acks_sent(&self) -> u64 {
        self.dup_acks_sent
    }

    /// Process an inbound data segment.
    pub fn handle(&mut self, seg: &Segment) -> Result<()> {
        if seg.in_error {
            report!(
                report::RECEIVERS,
                "tcpsim::receiver",
                "dropping corrupted segment seq={}",
                seg.seq
            );
            return Ok(());
        }
        self.segments_received += 1;

        if seg.seq == self.next_byte_expected {
            self.handle_in_order(seg)
        } else {
            self.handle_out_of_order(seg)
        }
    }

    fn handle_in_order(&mut self, seg: &Segment) -> Result<()> {
        self.next_byte_expected += seg.len as i64;
        if self.out_of_order.is_empty() {
            self.last_byte_received = self.next_byte_expected - 1;
        } else {
            self.check_buffered();
        }

        match self.pending_ack.as_mut() {
            None => {
                self.pending_ack = Some(Segment::ack(
                    self.peer,
                    self.next_byte_expected,
                    self.current_rcv_window,
                    seg.ts,
                ));
                // flushed at the end of the current tick
                let now = self.sim.borrow().current_time();
                let handle = self.sim.borrow_mut().set_timeout_at(Timer {
                    owner: self.owner,
                    kind: TimerKind::DelayedAck,
                    fires_at: now,
                })?;
                self.delack_timer = Some(handle);
            }
            Some(pending) => {
                pending.ack = self.next_byte_expected;
                pending.wnd = self.current_rcv_window;
                pending.ts = seg.ts;
            }
        }
        Ok(())
    }

    fn handle_out_of_order(&mut self, seg: &Segment) -> Result<()> {
        self.flush_pending_ack()?;

        // stale retransmissions below the cumulative point are re-ACKed
        // but never buffered
        if seg.seq > self.next_byte_expected && !self.out_of_order.contains_key(&seg.seq) {
            self.out_of_order.insert(seg.seq, seg.clone());
            self.last_byte_received = self.last_byte_received.max(seg.last_byte());
            self.update_window();
            report!(
                report::RECEIVERS,
                "tcpsim::receiver",
                "buffered out-of-order seq={} ({} held, window {})",
                seg.seq,
                self.out_of_order.len(),
                self.current_rcv_window
            );
        }

        let dup = Segment::ack(
            self.peer,
            self.next_byte_expected,
            self.current_rcv_window,
            None,
        );
        self.link.borrow_mut().send(self.host, dup)?;
        self.acks_sent += 1;
        self.dup_acks_sent += 1;
        Ok(())
    }

    /// Drain every buffered segment the cumulative point has caught up to.
    fn check_buffered(&mut self) {
        while let Some(seg) = self.out_of_order.remove(&self.next_byte_expected) {
            self.next_byte_expected += seg.len as i64;
        }
        self.update_window();
    }

    fn update_window(&mut self) {
        let wnd = self.max_rcv_window as i64 - (self.last_byte_received - self.next_byte_expected);
        self.current_rcv_window = wnd.clamp(0, self.max_rcv_window as i64) as u32;
    }

    /// Emit the pending cumulative ACK now and disarm its timer.
    fn flush_pending_ack(&mut self) -> Result<()> {
        if let Some(ack) = self.pending_ack.take() {
            if let Some(handle) = self.delack_timer.take() {
                self.sim.borrow_mut().cancel_timeout(handle)?;
            }
            self.link.borrow_mut().send(self.host, ack)?;
            self.acks_sent += 1;
        }
        Ok(())
    }

    pub fn timer_expired(&mut self, kind: TimerKind) -> Result<()> {
        match kind {
            TimerKind::DelayedAck => {
                self.delack_timer = None;
                if let Some(ack) = self.pending_ack.take() {
                    report!(
                        report::RECEIVERS,
                        "tcpsim::receiver",
                        "delayed ack {} (window {})",
                        ack.ack,
                        ack.wnd
                    );
                    self.link.borrow_mut().send(self.host, ack)?;
                    self.acks_sent += 1;
                }
                Ok(())
            }
            _ => Err(Error::InvalidTimer),
        }
    }

    #[cfg(test)]
    fn buffered_seqs(&self) -> Vec<i64> {
        self.out_of_order.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LINK2_TX_TIME, MSS, PROP_TIME};
    use crate::iface::Link;
    use crate::time::Instant;

    const ROUTER: NodeId = NodeId(2);
    const HOST: NodeId = NodeId(3);
    const SENDER: NodeId = NodeId(1);
    const LINK: NodeId = NodeId(11);

    fn harness() -> (TcpReceiver, LinkRef, Rc<RefCell<Simulator>>) {
        let sim = Rc::new(RefCell::new(Simulator::new()));
        let link = Rc::new(RefCell::new(Link::new(
            LINK,
            "l2",
            ROUTER,
            HOST,
            LINK2_TX_TIME,
            PROP_TIME,
        )));
        let rcv = TcpReceiver::new(HOST, SENDER, TimerOwner(2), sim.clone(), link.clone(), 65_536);
        (rcv, link, sim)
    }

    fn data(seq: i64) -> Segment {
        Segment::data(HOST, seq, MSS, 65_536, Some(Instant::ZERO))
    }

    fn fire_delack(rcv: &mut TcpReceiver, sim: &Rc<RefCell<Simulator>>) {
        let due = sim.borrow_mut().check_expired(TimerOwner(2));
        for t in due {
            rcv.timer_expired(t.kind).unwrap();
        }
    }

    /// ACKs the receiver emitted toward the router side.
    fn acks(link: &LinkRef) -> Vec<Segment> {
        link.borrow().queued(1)
    }

    #[test]
    fn in_order_arrivals_share_one_delayed_ack() {
        let (mut rcv, link, sim) = harness();
        rcv.handle(&data(0)).unwrap();
        rcv.handle(&data(128)).unwrap();
        assert!(acks(&link).is_empty());

        fire_delack(&mut rcv, &sim);
        let sent = acks(&link);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].ack, 256);
        assert_eq!(sent[0].ts, Some(Instant::ZERO));
        assert_eq!(rcv.last_byte_received(), 255);
    }

    #[test]
    fn reordered_delivery_acknowledges_through_the_gap() {
        let (mut rcv, link, sim) = harness();
        // segments arrive as [0, 2, 1]
        rcv.handle(&data(0)).unwrap();
        rcv.handle(&data(256)).unwrap();

        // the gap flushed the pending ACK and answered with a duplicate
        let sent = acks(&link);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].ack, 128);
        assert_eq!(sent[1].ack, 128);
        assert_eq!(sent[1].ts, None);
        assert_eq!(rcv.buffered_seqs(), [256]);
        assert_eq!(rcv.last_byte_received(), 383);
        assert_eq!(rcv.current_rcv_window(), 65_536 - 255);

        // the hole fills; the next cumulative ACK covers segment 2 as well
        rcv.handle(&data(128)).unwrap();
        fire_delack(&mut rcv, &sim);
        let sent = acks(&link);
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2].ack, 384);
        assert_eq!(rcv.buffered(), 0);
        assert_eq!(rcv.current_rcv_window(), 65_536);
    }

    #[test]
    fn every_out_of_order_arrival_draws_a_duplicate_ack() {
        let (mut rcv, link, _sim) = harness();
        rcv.handle(&data(0)).unwrap();
        for seq in [256, 384, 512] {
            rcv.handle(&data(seq)).unwrap();
        }
        // one flushed cumulative ACK plus three duplicates
        let sent = acks(&link);
        assert_eq!(sent.len(), 4);
        assert!(sent[1..].iter().all(|a| a.ack == 128));
        assert_eq!(rcv.dup_acks_sent(), 3);
        assert_eq!(rcv.buffered_seqs(), [256, 384, 512]);
    }

    #[test]
    fn stale_retransmissions_are_reacked_not_buffered() {
        let (mut rcv, link, sim) = harness();
        rcv.handle(&data(0)).unwrap();
        fire_delack(&mut rcv, &sim);

        rcv.handle(&data(0)).unwrap();
        let sent = acks(&link);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].ack, 128);
        assert_eq!(rcv.buffered(), 0);
        assert_eq!(rcv.next_byte_expected(), 128);
    }

    #[test]
    fn duplicate_out_of_order_segments_are_held_once() {
        let (mut rcv, _link, _sim) = harness();
        rcv.handle(&data(0)).unwrap();
        rcv.handle(&data(256)).unwrap();
        rcv.handle(&data(256)).unwrap();
        assert_eq!(rcv.buffered_seqs(), [256]);
        // buffered ranges stay disjoint and above the cumulative point
        assert!(rcv
            .out_of_order
            .values()
            .all(|s| s.seq > rcv.next_byte_expected()));
    }

    #[test]
    fn corrupted_segments_vanish_silently() {
        let (mut rcv, link, _sim) = harness();
        let mut seg = data(0);
        seg.in_error = true;
        rcv.handle(&seg).unwrap();
        assert_eq!(rcv.next_byte_expected(), 0);
        assert!(acks(&link).is_empty());
        assert_eq!(rcv.segments_received(), 0);
    }

    #[test]
    fn retransmitted_fill_echoes_no_timestamp() {
        let (mut rcv, link, sim) = harness();
        rcv.handle(&data(0)).unwrap();
        rcv.handle(&data(256)).unwrap();
        // the hole arrives as an unstamped retransmission
        let fill = Segment::data(HOST, 128, MSS, 65_536, None);
        rcv.handle(&fill).unwrap();
        fire_delack(&mut rcv, &sim);
        let sent = acks(&link);
        assert_eq!(sent.last().unwrap().ack, 384);
        assert_eq!(sent.last().unwrap().ts, None);
    }

    #[test]
    fn window_never_leaves_its_bounds() {
        let (mut rcv, _link, _sim) = harness();
        rcv.handle(&data(0)).unwrap();
        for i in 1..=8 {
            rcv.handle(&data(128 + i * 256)).unwrap();
            let w = rcv.current_rcv_window();
            assert!(w <= rcv.max_rcv_window());
        }
    }
}
