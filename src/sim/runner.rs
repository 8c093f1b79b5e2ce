//! Topology assembly and the per-tick schedule.
//!
//! One runner owns the whole three-node topology. Every tick it advances the
//! clock, then walks the fixed processing sequence: link1 both ways, the
//! sender host, link1 toward the router, the router, link2 toward the
//! receiver, the receiver host, link2 back toward the router. ACKs queued on
//! the reverse path reach the sender on the next tick, which is what makes
//! one tick one round-trip time.

use std::cell::RefCell;
use std::rc::Rc;

use super::{Simulator, TimerOwner};
use crate::config;
use crate::iface::link;
use crate::iface::{endpoint, Endpoint, Link, LinkRef, Node, NodeId, Router};
use crate::report;
use crate::socket::{TcpReceiver, TcpSender, TcpVariant};
use crate::time::Duration;
use crate::Result;

const SENDER_HOST: NodeId = NodeId(1);
const ROUTER: NodeId = NodeId(2);
const RECEIVER_HOST: NodeId = NodeId(3);
const LINK1: NodeId = NodeId(10);
const LINK2: NodeId = NodeId(11);
const SENDER_TIMERS: TimerOwner = TimerOwner(1);
const RECEIVER_TIMERS: TimerOwner = TimerOwner(2);

/// Tuning for one run. The defaults are the reference values.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub variant: TcpVariant,
    pub iterations: u32,
    pub loss_rate: f64,
    pub seed: u64,
    pub buffer_capacity: u32,
    pub rcv_window: u32,
    pub link1_tx: Duration,
    pub link2_tx: Duration,
    pub prop_time: Duration,
    pub report_mask: u32,
    /// Application bytes to feed the sender before the first tick. `None`
    /// feeds the full potential of the run, `(buffer_capacity + MSS) ×
    /// iterations` bytes.
    pub payload: Option<i64>,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            variant: TcpVariant::Tahoe,
            iterations: 10,
            loss_rate: 0.0,
            seed: 0,
            buffer_capacity: config::DEFAULT_BUFFER_CAPACITY,
            rcv_window: config::DEFAULT_RCV_WINDOW,
            link1_tx: config::LINK1_TX_TIME,
            link2_tx: config::LINK2_TX_TIME,
            prop_time: config::PROP_TIME,
            report_mask: report::DEFAULT,
            payload: None,
        }
    }
}

/// End-of-run summary.
#[derive(Debug, Clone)]
pub struct SimReport {
    pub ticks: u64,
    pub bytes_acked: i64,
    /// `round(100 × bytes_acked / potential_bytes)`.
    pub utilization_pct: u32,
    pub segments_sent: u64,
    pub retransmissions: u64,
    pub router_drops: u64,
    pub router_corrupted: u64,
    pub dup_acks: u64,
}

pub struct Runner {
    cfg: SimConfig,
    sim: Rc<RefCell<Simulator>>,
    link1: LinkRef,
    link2: LinkRef,
    router: Rc<RefCell<Router>>,
    shost: Rc<RefCell<Endpoint>>,
    rhost: Rc<RefCell<Endpoint>>,
}

impl Runner {
    pub fn new(cfg: SimConfig) -> Result<Runner> {
        report::init(cfg.report_mask);
        let sim = Rc::new(RefCell::new(Simulator::new()));
        let link1 = Rc::new(RefCell::new(Link::new(
            LINK1,
            "link1",
            SENDER_HOST,
            ROUTER,
            cfg.link1_tx,
            cfg.prop_time,
        )));
        let link2 = Rc::new(RefCell::new(Link::new(
            LINK2,
            "link2",
            ROUTER,
            RECEIVER_HOST,
            cfg.link2_tx,
            cfg.prop_time,
        )));

        let router = Rc::new(RefCell::new(Router::new(
            ROUTER,
            "router",
            sim.clone(),
            cfg.buffer_capacity,
            cfg.loss_rate,
            cfg.seed,
        )));
        router
            .borrow_mut()
            .add_forwarding_entry(RECEIVER_HOST, link2.clone())?;
        router
            .borrow_mut()
            .add_forwarding_entry(SENDER_HOST, link1.clone())?;

        let mut shost = Endpoint::new(SENDER_HOST, "shost", sim.clone());
        shost.set_sender(TcpSender::new(
            cfg.variant,
            SENDER_HOST,
            RECEIVER_HOST,
            SENDER_TIMERS,
            sim.clone(),
            link1.clone(),
        ));
        let shost = Rc::new(RefCell::new(shost));

        let mut rhost = Endpoint::new(RECEIVER_HOST, "rhost", sim.clone());
        rhost.set_receiver(TcpReceiver::new(
            RECEIVER_HOST,
            SENDER_HOST,
            RECEIVER_TIMERS,
            sim.clone(),
            link2.clone(),
            cfg.rcv_window,
        ));
        let rhost = Rc::new(RefCell::new(rhost));

        link1.borrow_mut().attach(shost.clone(), router.clone());
        link2.borrow_mut().attach(router.clone(), rhost.clone());

        Ok(Runner {
            cfg,
            sim,
            link1,
            link2,
            router,
            shost,
            rhost,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    /// The bottleneck router, for deterministic fault injection.
    pub fn router(&self) -> &Rc<RefCell<Router>> {
        &self.router
    }

    pub fn sender_host(&self) -> &Rc<RefCell<Endpoint>> {
        &self.shost
    }

    pub fn receiver_host(&self) -> &Rc<RefCell<Endpoint>> {
        &self.rhost
    }

    /// Bytes the run could move at most: the utilization denominator.
    pub fn potential_bytes(&self) -> i64 {
        (self.cfg.buffer_capacity as i64 + config::MSS as i64) * self.cfg.iterations as i64
    }

    /// Drive the configured number of ticks and report.
    pub fn run(&mut self) -> Result<SimReport> {
        println!("==== TCP {} simulation ====", self.cfg.variant);
        println!("Time\tCongWindow\tEffctWindow\tFlightSize\tSSThresh\tRTOinterval");

        let payload = self.cfg.payload.unwrap_or_else(|| self.potential_bytes());
        self.shost.borrow_mut().app_send(payload)?;

        for _ in 0..self.cfg.iterations {
            self.sim.borrow_mut().advance();
            let now = self.sim.borrow().current_time();

            Link::process(&self.link1, link::BOTH, now)?;
            self.shost.borrow_mut().process(endpoint::SENDER_PASS)?;
            Link::process(&self.link1, link::FORWARD, now)?;
            self.router.borrow_mut().process(0)?;
            Link::process(&self.link2, link::FORWARD, now)?;
            self.rhost.borrow_mut().process(endpoint::RECEIVER_PASS)?;
            Link::process(&self.link2, link::REVERSE, now)?;

            self.print_metrics_row();
            #[cfg(debug_assertions)]
            self.check_invariants();
        }

        println!("==== end of session ====");
        let summary = self.report();
        println!("Sender utilization: {} %", summary.utilization_pct);
        Ok(summary)
    }

    fn print_metrics_row(&self) {
        let shost = self.shost.borrow();
        let Some(sender) = shost.sender() else {
            return;
        };
        let tick_us = self.sim.borrow().time_increment().total_micros() as f64;
        let rto_ticks = sender.rto_interval().total_micros() as f64 / tick_us;
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.sim.borrow().tick(),
            sender.cwnd(),
            sender.effective_window(),
            sender.flight_size(),
            sender.ss_thresh(),
            rto_ticks
        );
    }

    /// Summarize the run so far.
    pub fn report(&self) -> SimReport {
        let shost = self.shost.borrow();
        let rhost = self.rhost.borrow();
        let router = self.router.borrow();
        let bytes_acked = shost
            .sender()
            .map(|s| s.last_byte_acked() + 1)
            .unwrap_or(0);
        let potential = self.potential_bytes();
        let utilization_pct = (100.0 * bytes_acked as f64 / potential as f64).round() as u32;
        SimReport {
            ticks: self.sim.borrow().tick(),
            bytes_acked,
            utilization_pct,
            segments_sent: shost.sender().map(|s| s.segments_sent()).unwrap_or(0),
            retransmissions: shost.sender().map(|s| s.retransmissions()).unwrap_or(0),
            router_drops: router.drops(),
            router_corrupted: router.corrupted(),
            dup_acks: rhost.receiver().map(|r| r.dup_acks_sent()).unwrap_or(0),
        }
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        let shost = self.shost.borrow();
        if let Some(sender) = shost.sender() {
            assert!(sender.last_byte_acked() <= sender.last_byte_sent());
            assert!(sender.cwnd() >= config::MSS);
        }
        let rhost = self.rhost.borrow();
        if let Some(receiver) = rhost.receiver() {
            assert!(receiver.current_rcv_window() <= receiver.max_rcv_window());
        }
        let router = self.router.borrow();
        assert!(router.occupancy() <= self.cfg.buffer_capacity);
    }
}
