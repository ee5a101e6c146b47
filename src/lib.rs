pub mod collaborators;
pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod session;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use core::realtime::RealtimeGateway;
pub use errors::{CollaboratorError, ConfigError, RealtimeError};
pub use session::SessionRegistry;
pub use state::AppState;
