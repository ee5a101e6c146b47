//! Core subsystems: audio codec, turn detection, the AI realtime leg, and
//! tool dispatch.

pub mod audio;
pub mod realtime;
pub mod tools;
pub mod vad;
