//! Pacing of outgoing media: token-bucket budgets, bitrate probing and the
//! process loop that drains packets at the target rate.

pub mod interval_budget;
pub mod pacer;
pub mod prober;

pub use interval_budget::IntervalBudget;
pub use pacer::{PacedPacket, Pacer, PacingInfo, PacketRouter};
pub use prober::BitrateProber;
