//! Telephony media gateway: carrier-side websocket handling and wire types.

pub mod handler;
pub mod messages;

pub use handler::media_ws_handler;
