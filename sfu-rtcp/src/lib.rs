#![warn(rust_2018_idioms)]

pub mod compound_packet;
pub mod extended_report;
pub mod goodbye;
pub mod header;
pub mod packet;
pub mod payload_feedbacks;
pub mod raw_packet;
pub mod reception_report;
pub mod receiver_report;
pub mod sender_report;
pub mod source_description;
pub mod transport_feedbacks;

pub use header::is_rtcp;
pub use packet::{unmarshal, Packet};
