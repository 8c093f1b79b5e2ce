//! The simulated topology: nodes, links and the bottleneck router.

pub mod endpoint;
pub mod link;
pub mod router;

pub use self::endpoint::Endpoint;
pub use self::link::Link;
pub use self::router::Router;

use std::cell::RefCell;
use std::rc::Rc;

use crate::wire::Segment;
use crate::Result;

/// Identity of a topology element. Links get ids too, so a delivery can name
/// the link it came over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// A packet-handling element of the topology: an end host or a router.
pub trait Node {
    fn id(&self) -> NodeId;

    fn name(&self) -> &str;

    /// Deliver a segment that arrived over `src`.
    fn handle(&mut self, src: NodeId, seg: Segment) -> Result<()>;

    /// Run one processing pass. The meaning of `pass` is per-node: end hosts
    /// use 1 for the sender side and 2 for the receiver side; the router
    /// ignores it.
    fn process(&mut self, pass: u32) -> Result<()>;
}

pub type NodeRef = Rc<RefCell<dyn Node>>;
pub type LinkRef = Rc<RefCell<Link>>;
