//! The segment model.
//!
//! A segment is the unit crossing every link in the topology. Payloads are
//! modeled as byte counts only; there is no octet buffer behind `len`.

use core::cmp::Ordering;

use crate::iface::NodeId;
use crate::time::Instant;

/// A data or acknowledgment segment. Immutable after creation, except for
/// the in-error mark applied by the loss process.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Destination host.
    pub dst: NodeId,
    /// Byte index of the first carried byte, counted from 0. `-1` if the
    /// segment carries no data.
    pub seq: i64,
    /// Carried data length in bytes.
    pub len: u32,
    /// Next byte expected at the receiver. `-1` if this is not an ACK.
    pub ack: i64,
    /// Advertised receive window, in bytes.
    pub wnd: u32,
    /// Tick of origin. `None` marks a retransmission and suppresses RTT
    /// sampling at the sender.
    pub ts: Option<Instant>,
    /// Set by the loss process; in-error segments are dropped on delivery.
    pub in_error: bool,
}

impl Segment {
    /// A full-size data segment.
    pub fn data(dst: NodeId, seq: i64, len: u32, wnd: u32, ts: Option<Instant>) -> Segment {
        debug_assert!(seq >= 0 && len > 0);
        Segment {
            dst,
            seq,
            len,
            ack: -1,
            wnd,
            ts,
            in_error: false,
        }
    }

    /// A zero-payload acknowledgment.
    pub fn ack(dst: NodeId, ack: i64, wnd: u32, ts: Option<Instant>) -> Segment {
        debug_assert!(ack >= 0);
        Segment {
            dst,
            seq: -1,
            len: 0,
            ack,
            wnd,
            ts,
            in_error: false,
        }
    }

    /// Whether this segment acknowledges data. Holds exactly when the
    /// acknowledgment number is present.
    pub fn is_ack(&self) -> bool {
        self.ack >= 0
    }

    /// Index of the last carried byte, or `seq - 1` for empty segments.
    pub fn last_byte(&self) -> i64 {
        self.seq + self.len as i64 - 1
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Segment) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Segment {}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Segment) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Segment {
    /// Segments order by data sequence number.
    fn cmp(&self, other: &Segment) -> Ordering {
        self.seq.cmp(&other.seq)
    }
}
