//! Transport layer feedback messages (RFC 4585 §6.2, RFC 5104 §4.2,
//! draft-holmer-rmcat-transport-wide-cc-extensions).

pub mod ecn;
pub mod rapid_resynchronization_request;
pub mod tmmb;
pub mod transport_layer_cc;
pub mod transport_layer_lei;
pub mod transport_layer_nack;
