//! A full-duplex point-to-point link.
//!
//! Each direction is a FIFO of in-flight segments, each carrying its
//! remaining delay. Enqueued segments take `propagation + transmission` time
//! unless the segment ahead of them still has more delay left, in which case
//! they inherit it — a coarse serialization approximation that keeps delays
//! within a direction non-decreasing, so delivery order equals enqueue order.

use std::collections::VecDeque;

use super::{LinkRef, NodeId, NodeRef};
use crate::report;
use crate::time::{Duration, Instant};
use crate::wire::Segment;
use crate::{Error, Result};

/// Process both directions.
pub const BOTH: u32 = 0;
/// Process the n1 → n2 direction only.
pub const FORWARD: u32 = 1;
/// Process the n2 → n1 direction only.
pub const REVERSE: u32 = 2;

#[derive(Debug)]
struct InFlight {
    seg: Segment,
    remaining: Duration,
}

pub struct Link {
    id: NodeId,
    name: String,
    ends: [NodeId; 2],
    peers: [Option<NodeRef>; 2],
    tx_time: Duration,
    prop_time: Duration,
    queues: [VecDeque<InFlight>; 2],
    /// One cursor per process mode.
    last_process: [Instant; 3],
    delivered: u64,
}

impl Link {
    pub fn new(
        id: NodeId,
        name: &str,
        n1: NodeId,
        n2: NodeId,
        tx_time: Duration,
        prop_time: Duration,
    ) -> Link {
        Link {
            id,
            name: name.to_owned(),
            ends: [n1, n2],
            peers: [None, None],
            tx_time,
            prop_time,
            queues: [VecDeque::new(), VecDeque::new()],
            last_process: [Instant::ZERO; 3],
            delivered: 0,
        }
    }

    /// Wire up the node objects at both ends. Must be called once before the
    /// first process pass.
    pub fn attach(&mut self, n1: NodeRef, n2: NodeRef) {
        self.peers = [Some(n1), Some(n2)];
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tx_time(&self) -> Duration {
        self.tx_time
    }

    /// Segments currently in flight toward `ends[1 - dir]`.
    pub fn pending(&self, dir: usize) -> usize {
        self.queues[dir].len()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Enqueue a segment from one of the link's ends.
    pub fn send(&mut self, src: NodeId, seg: Segment) -> Result<()> {
        let dir = if src == self.ends[0] {
            0
        } else if src == self.ends[1] {
            1
        } else {
            return Err(Error::NoRoute);
        };
        let mut delay = self.prop_time + self.tx_time;
        if let Some(back) = self.queues[dir].back() {
            if back.remaining > delay {
                delay = back.remaining;
            }
        }
        report!(
            report::LINKS,
            "tcpsim::link",
            "{}: queued seq={} ack={} dir={} delay={}",
            self.name,
            seg.seq,
            seg.ack,
            dir,
            delay
        );
        self.queues[dir].push_back(InFlight {
            seg,
            remaining: delay,
        });
        Ok(())
    }

    /// Move packets whose delay has elapsed since this mode's last pass,
    /// delivering each to the node at the far end.
    ///
    /// Takes the shared handle so a delivery callback may transmit on this
    /// same link: due packets are collected first, then dispatched with the
    /// borrow released.
    pub fn process(link: &LinkRef, mode: u32, now: Instant) -> Result<()> {
        let (src, due) = {
            let mut l = link.borrow_mut();
            (l.id, l.collect_due(mode, now))
        };
        for (peer, seg) in due {
            peer.borrow_mut().handle(src, seg)?;
        }
        Ok(())
    }

    fn collect_due(&mut self, mode: u32, now: Instant) -> Vec<(NodeRef, Segment)> {
        let elapsed = now - self.last_process[mode as usize];
        self.last_process[mode as usize] = now;

        let dirs: &[usize] = match mode {
            BOTH => &[0, 1],
            FORWARD => &[0],
            REVERSE => &[1],
            _ => unreachable!("unknown link mode {mode}"),
        };

        let mut due = Vec::new();
        for &dir in dirs {
            let peer = self.peers[1 - dir]
                .clone()
                .expect("link processed before attach");
            while let Some(front) = self.queues[dir].front() {
                if front.remaining > elapsed {
                    break;
                }
                let inflight = self.queues[dir].pop_front().unwrap();
                self.delivered += 1;
                report!(
                    report::LINKS,
                    "tcpsim::link",
                    "{}: delivering seq={} ack={} dir={}",
                    self.name,
                    inflight.seg.seq,
                    inflight.seg.ack,
                    dir
                );
                due.push((peer.clone(), inflight.seg));
            }
            for inflight in self.queues[dir].iter_mut() {
                inflight.remaining -= elapsed;
            }
        }
        due
    }

    #[cfg(test)]
    pub(crate) fn queued(&self, dir: usize) -> Vec<Segment> {
        self.queues[dir].iter().map(|f| f.seg.clone()).collect()
    }

    #[cfg(test)]
    pub(crate) fn remaining_delays(&self, dir: usize) -> Vec<Duration> {
        self.queues[dir].iter().map(|f| f.remaining).collect()
    }
}
