#![warn(rust_2018_idioms)]

pub mod extension;
pub mod header;
pub mod packet;
pub mod rtx;

pub use extension::{ExtensionMap, ExtensionUri};
pub use header::{Extension, Header};
pub use packet::Packet;
