//! WebSocket handlers.

pub mod media;
