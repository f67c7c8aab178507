//! Payload-specific feedback messages (RFC 4585 §6.3, RFC 5104 §4.3).

pub mod application_layer_feedback;
pub mod full_intra_request;
pub mod payload_specific_lei;
pub mod picture_loss_indication;
pub mod receiver_estimated_maximum_bitrate;
pub mod reference_picture_selection_indication;
pub mod slice_loss_indication;
pub mod temporal_spatial_trade_off;
pub mod video_back_channel_message;
