//! Call lifecycle: the per-call state machine and the registry that makes
//! live calls addressable by id.

pub mod call;
pub mod registry;

pub use registry::{SessionHandle, SessionRegistry, SessionResolution};
