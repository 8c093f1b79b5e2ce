//! The bottleneck router.
//!
//! A drop-tail forwarder with one output port per attached link. A port
//! whose outgoing link is slower than the inbound one paces departures with
//! a mismatch counter; segments arriving while the port is busy wait in a
//! shared byte-bounded FIFO buffer and are discarded once it is full.
//!
//! The router also hosts the loss process: arriving segments are marked
//! in-error with the configured probability, and deterministic per-sequence
//! faults can be registered for tests and scenarios.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{LinkRef, Node, NodeId};
use crate::config::{ROUTER_MAX_PORTS, ROUTER_MAX_ROUTES};
use crate::report;
use crate::sim::Simulator;
use crate::time::{Duration, Instant};
use crate::wire::Segment;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct RouteEntry {
    dst: NodeId,
    port: usize,
}

struct Port {
    link: LinkRef,
    in_transmission: Option<Segment>,
    mismatch_count: f64,
    max_mismatch_ratio: f64,
}

pub struct Router {
    id: NodeId,
    name: String,
    sim: Rc<RefCell<Simulator>>,
    routes: heapless::Vec<RouteEntry, ROUTER_MAX_ROUTES>,
    ports: heapless::Vec<Port, ROUTER_MAX_PORTS>,
    buffer: VecDeque<Segment>,
    capacity: u32,
    occupancy: u32,
    last_process: Instant,
    loss_rate: f64,
    rng: StdRng,
    corrupt_once: Vec<i64>,
    drop_once: Vec<i64>,
    forwarded: u64,
    drops: u64,
    corrupted: u64,
}

impl Router {
    pub fn new(
        id: NodeId,
        name: &str,
        sim: Rc<RefCell<Simulator>>,
        capacity: u32,
        loss_rate: f64,
        seed: u64,
    ) -> Router {
        Router {
            id,
            name: name.to_owned(),
            sim,
            routes: heapless::Vec::new(),
            ports: heapless::Vec::new(),
            buffer: VecDeque::new(),
            capacity,
            occupancy: 0,
            last_process: Instant::ZERO,
            loss_rate,
            rng: StdRng::seed_from_u64(seed),
            corrupt_once: Vec::new(),
            drop_once: Vec::new(),
            forwarded: 0,
            drops: 0,
            corrupted: 0,
        }
    }

    /// Route `dst` over `link`, creating an output port for the link if it
    /// does not have one yet, and recompute every port's worst-case rate
    /// mismatch against the other ports.
    pub fn add_forwarding_entry(&mut self, dst: NodeId, link: LinkRef) -> Result<()> {
        let port = match self
            .ports
            .iter()
            .position(|p| Rc::ptr_eq(&p.link, &link))
        {
            Some(i) => i,
            None => {
                self.ports
                    .push(Port {
                        link,
                        in_transmission: None,
                        mismatch_count: 0.0,
                        max_mismatch_ratio: 1.0,
                    })
                    .map_err(|_| Error::TableFull)?;
                self.ports.len() - 1
            }
        };
        self.routes
            .push(RouteEntry { dst, port })
            .map_err(|_| Error::TableFull)?;

        let tx: Vec<f64> = self
            .ports
            .iter()
            .map(|p| p.link.borrow().tx_time().total_micros() as f64)
            .collect();
        for (i, port) in self.ports.iter_mut().enumerate() {
            let mut max = 1.0f64;
            for (j, &other) in tx.iter().enumerate() {
                if i != j {
                    max = max.max(tx[i] / other);
                }
            }
            port.max_mismatch_ratio = max;
        }
        Ok(())
    }

    /// Mark the first data segment with this sequence number in-error.
    pub fn corrupt_seq_once(&mut self, seq: i64) {
        self.corrupt_once.push(seq);
    }

    /// Discard the first data segment with this sequence number outright.
    pub fn drop_seq_once(&mut self, seq: i64) {
        self.drop_once.push(seq);
    }

    pub fn drops(&self) -> u64 {
        self.drops
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn corrupted(&self) -> u64 {
        self.corrupted
    }

    pub fn occupancy(&self) -> u32 {
        self.occupancy
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn port_of(&self, dst: NodeId) -> Option<usize> {
        self.routes.iter().find(|r| r.dst == dst).map(|r| r.port)
    }

    /// Apply the loss process to an arriving segment. Returns false when the
    /// segment was consumed by a deterministic drop.
    fn apply_loss(&mut self, seg: &mut Segment) -> bool {
        if let Some(i) = self.drop_once.iter().position(|&s| s == seg.seq) {
            self.drop_once.remove(i);
            self.drops += 1;
            report!(
                report::ROUTERS,
                "tcpsim::router",
                "{}: injected drop of seq={}",
                self.name,
                seg.seq
            );
            return false;
        }
        let corrupt = match self.corrupt_once.iter().position(|&s| s == seg.seq) {
            Some(i) => {
                self.corrupt_once.remove(i);
                true
            }
            None => self.loss_rate > 0.0 && self.rng.gen::<f64>() < self.loss_rate,
        };
        if corrupt {
            seg.in_error = true;
            self.corrupted += 1;
            report!(
                report::ROUTERS,
                "tcpsim::router",
                "{}: corrupted seq={} ack={}",
                self.name,
                seg.seq,
                seg.ack
            );
        }
        true
    }

    fn promote_buffered(&mut self, port: usize) -> Option<Segment> {
        let pos = self
            .buffer
            .iter()
            .position(|p| self.port_of(p.dst) == Some(port))?;
        let seg = self.buffer.remove(pos).unwrap();
        self.occupancy -= seg.len;
        Some(seg)
    }
}

impl Node for Router {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, src: NodeId, mut seg: Segment) -> Result<()> {
        if !self.apply_loss(&mut seg) {
            return Ok(());
        }
        let port = self.port_of(seg.dst).ok_or(Error::NoRoute)?;

        let out_tx = self.ports[port].link.borrow().tx_time().total_micros() as f64;
        let in_tx = self
            .ports
            .iter()
            .find_map(|p| {
                let link = p.link.borrow();
                (link.id() == src).then(|| link.tx_time().total_micros() as f64)
            })
            .unwrap_or(out_tx);
        let ratio = out_tx / in_tx;
        let max_ratio = self.ports[port].max_mismatch_ratio;

        if self.ports[port].in_transmission.is_none() {
            if ratio <= 1.0 {
                self.ports[port].link.borrow_mut().send(self.id, seg)?;
                self.forwarded += 1;
            } else {
                self.ports[port].in_transmission = Some(seg);
                self.ports[port].mismatch_count = max_ratio - max_ratio / ratio;
            }
            return Ok(());
        }

        if self.occupancy + seg.len <= self.capacity {
            self.occupancy += seg.len;
            self.buffer.push_back(seg);
        } else {
            self.drops += 1;
            report!(
                report::ROUTERS,
                "tcpsim::router",
                "{}: buffer full ({}/{}), dropping seq={}",
                self.name,
                self.occupancy,
                self.capacity,
                seg.seq
            );
        }

        if self.ports[port].mismatch_count < 1.0 {
            let released = self.ports[port].in_transmission.take().unwrap();
            self.ports[port].link.borrow_mut().send(self.id, released)?;
            self.forwarded += 1;
            self.ports[port].in_transmission = self.promote_buffered(port);
            self.ports[port].mismatch_count = max_ratio;
        }
        self.ports[port].mismatch_count -= max_ratio / ratio;

        debug_assert_eq!(
            self.occupancy,
            self.buffer.iter().map(|s| s.len).sum::<u32>()
        );
        Ok(())
    }

    /// Push every in-transmission segment out and forward buffered segments
    /// for the same port while the elapsed-time budget allows.
    fn process(&mut self, _pass: u32) -> Result<()> {
        let now = self.sim.borrow().current_time();
        let elapsed = now - self.last_process;
        self.last_process = now;

        for port in 0..self.ports.len() {
            let Some(seg) = self.ports[port].in_transmission.take() else {
                continue;
            };
            let link = self.ports[port].link.clone();
            let tx = link.borrow().tx_time();
            link.borrow_mut().send(self.id, seg)?;
            self.forwarded += 1;

            let mut budget = elapsed;
            while tx > Duration::ZERO && budget >= tx {
                match self.promote_buffered(port) {
                    Some(next) => {
                        link.borrow_mut().send(self.id, next)?;
                        self.forwarded += 1;
                        budget -= tx;
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }
}
