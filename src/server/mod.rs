//! HTTP server
//!
//! [`AudioServer`] binds the listen socket, starts the relay and supervisor
//! tasks and serves `GET /audio`.

pub mod config;
pub mod http;
pub mod listener;

pub use config::ServerConfig;
pub use http::{router, AppState};
pub use listener::AudioServer;
