//! Reference tuning for the simulated topology.

use crate::time::Duration;

/// Maximum segment size, in bytes. Every data segment carries exactly one MSS.
pub const MSS: u32 = 128;

/// Initial slow-start threshold, in bytes.
pub const DEFAULT_SS_THRESH: u32 = 65_535;

/// Default advertised receive window, in bytes.
pub const DEFAULT_RCV_WINDOW: u32 = 65_536;

/// Duplicate ACKs required to trigger a fast retransmit.
pub const DUP_ACK_THRESHOLD: u32 = 3;

/// One logical tick, equal to one nominal round-trip time.
pub const TICK: Duration = Duration::from_secs(1);

/// Retransmission timeout before the first RTT sample, in ticks.
pub const INITIAL_RTO_TICKS: u32 = 3;

/// Upper bound on the retransmission timeout, in ticks.
pub const MAX_RTO_TICKS: u32 = 240;

/// Idle-connection timeout, in ticks.
pub const IDLE_TIMEOUT_TICKS: u32 = 30;

/// Shared router buffer capacity, in bytes.
pub const DEFAULT_BUFFER_CAPACITY: u32 = 6 * MSS + 100;

/// Transmission time on the sender-side link, in simulated time.
pub const LINK1_TX_TIME: Duration = Duration::from_micros(1_000);

/// Transmission time on the receiver-side link (the slow output port).
pub const LINK2_TX_TIME: Duration = Duration::from_micros(10_000);

/// One-way propagation time, identical for both links and directions.
pub const PROP_TIME: Duration = Duration::from_micros(1_000);

/// Router forwarding-table capacity.
pub const ROUTER_MAX_ROUTES: usize = 8;

/// Router output-port capacity.
pub const ROUTER_MAX_PORTS: usize = 4;
