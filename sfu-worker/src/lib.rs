#![warn(rust_2018_idioms)]

pub mod bwe;
pub mod data_counter;
pub mod listener;
pub mod monitor;
pub mod nack_generator;
pub mod pacing;
pub mod rtcp_scheduler;
pub mod rtp_stream;
pub mod seq_unwrapper;
pub mod transport;

pub use listener::{ProducerId, RtpListener};
pub use rtp_stream::recv::RtpStreamRecv;
pub use rtp_stream::send::RtpStreamSend;
pub use rtp_stream::{MimeType, StreamParams};
