//! The TCP layer: sender state machine, receiver, and RTO estimation.

mod receiver;
mod rtte;
mod sender;

pub use self::receiver::TcpReceiver;
pub use self::rtte::RttEstimator;
pub use self::sender::{CongState, TcpSender, TcpVariant};
