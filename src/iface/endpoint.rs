//! An end host.
//!
//! Routes inbound segments to the TCP components living on the host — ACKs
//! to the sender, data to the receiver — and drives their timer checks: pass
//! 1 fires sender timers and lets the sender transmit, pass 2 fires receiver
//! timers. Either component may be absent; this topology puts the sender and
//! the receiver on different hosts.

use std::cell::RefCell;
use std::rc::Rc;

use super::{Node, NodeId};
use crate::report;
use crate::sim::Simulator;
use crate::socket::{TcpReceiver, TcpSender};
use crate::wire::Segment;
use crate::Result;

/// Sender-side processing pass.
pub const SENDER_PASS: u32 = 1;
/// Receiver-side processing pass.
pub const RECEIVER_PASS: u32 = 2;

pub struct Endpoint {
    id: NodeId,
    name: String,
    sim: Rc<RefCell<Simulator>>,
    sender: Option<TcpSender>,
    receiver: Option<TcpReceiver>,
}

impl Endpoint {
    pub fn new(id: NodeId, name: &str, sim: Rc<RefCell<Simulator>>) -> Endpoint {
        Endpoint {
            id,
            name: name.to_owned(),
            sim,
            sender: None,
            receiver: None,
        }
    }

    pub fn set_sender(&mut self, sender: TcpSender) {
        self.sender = Some(sender);
    }

    pub fn set_receiver(&mut self, receiver: TcpReceiver) {
        self.receiver = Some(receiver);
    }

    pub fn sender(&self) -> Option<&TcpSender> {
        self.sender.as_ref()
    }

    pub fn sender_mut(&mut self) -> Option<&mut TcpSender> {
        self.sender.as_mut()
    }

    pub fn receiver(&self) -> Option<&TcpReceiver> {
        self.receiver.as_ref()
    }

    /// Hand application bytes to the sender side.
    pub fn app_send(&mut self, bytes: i64) -> Result<()> {
        if let Some(sender) = self.sender.as_mut() {
            sender.send(Some(bytes))?;
        }
        Ok(())
    }
}

impl Node for Endpoint {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, _src: NodeId, seg: Segment) -> Result<()> {
        if seg.is_ack() {
            if seg.in_error {
                report!(
                    report::SENDERS,
                    "tcpsim::endpoint",
                    "{}: dropping corrupted ack {}",
                    self.name,
                    seg.ack
                );
            } else if let Some(sender) = self.sender.as_mut() {
                sender.handle(&seg)?;
            }
        }
        if seg.len > 0 {
            if let Some(receiver) = self.receiver.as_mut() {
                receiver.handle(&seg)?;
            }
        }
        Ok(())
    }

    fn process(&mut self, pass: u32) -> Result<()> {
        match pass {
            SENDER_PASS => {
                if let Some(sender) = self.sender.as_mut() {
                    let due = self.sim.borrow_mut().check_expired(sender.owner());
                    for timer in due {
                        sender.timer_expired(timer.kind)?;
                    }
                    sender.send(None)?;
                }
            }
            RECEIVER_PASS => {
                if let Some(receiver) = self.receiver.as_mut() {
                    let due = self.sim.borrow_mut().check_expired(receiver.owner());
                    for timer in due {
                        receiver.timer_expired(timer.kind)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LINK1_TX_TIME, MSS, PROP_TIME};
    use crate::iface::Link;
    use crate::sim::TimerOwner;
    use crate::socket::TcpVariant;

    const HOST: NodeId = NodeId(1);
    const PEER: NodeId = NodeId(3);

    fn sender_host() -> Endpoint {
        let sim = Rc::new(RefCell::new(Simulator::new()));
        let link = Rc::new(RefCell::new(Link::new(
            NodeId(10),
            "l1",
            HOST,
            PEER,
            LINK1_TX_TIME,
            PROP_TIME,
        )));
        let mut host = Endpoint::new(HOST, "shost", sim.clone());
        host.set_sender(TcpSender::new(
            TcpVariant::Reno,
            HOST,
            PEER,
            TimerOwner(1),
            sim,
            link,
        ));
        host
    }

    #[test]
    fn acks_reach_the_sender() {
        let mut host = sender_host();
        host.app_send(10 * MSS as i64).unwrap();
        host.handle(NodeId(10), Segment::ack(HOST, 128, 65_536, None))
            .unwrap();
        assert_eq!(host.sender().unwrap().last_byte_acked(), 127);
    }

    #[test]
    fn corrupted_acks_are_discarded() {
        let mut host = sender_host();
        host.app_send(10 * MSS as i64).unwrap();
        let mut ack = Segment::ack(HOST, 128, 65_536, None);
        ack.in_error = true;
        host.handle(NodeId(10), ack).unwrap();
        assert_eq!(host.sender().unwrap().last_byte_acked(), -1);
    }

    #[test]
    fn the_sender_pass_transmits_fresh_data() {
        let mut host = sender_host();
        host.app_send(10 * MSS as i64).unwrap();
        host.handle(NodeId(10), Segment::ack(HOST, 128, 65_536, None))
            .unwrap();
        let sent_before = host.sender().unwrap().last_byte_sent();
        host.process(SENDER_PASS).unwrap();
        assert!(host.sender().unwrap().last_byte_sent() > sent_before);
    }

    #[test]
    fn data_without_a_receiver_is_ignored() {
        let mut host = sender_host();
        let seg = Segment::data(HOST, 0, MSS, 65_536, None);
        assert!(host.handle(NodeId(10), seg).is_ok());
    }
}
