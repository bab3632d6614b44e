//! Live audio re-encoding relay
//!
//! One upstream audio input is encoded once and broadcast to any number of
//! HTTP listeners. Each listener receives an identical copy of the encoded
//! stream from the moment it joins.
//!
//! - [`supervisor`] starts the single encode run when the first listener
//!   arrives and stops it when the last one leaves
//! - [`relay`] reads the encoder output in whole frames and fans each frame
//!   out to every listener without blocking on any of them
//! - [`engine`] is the encoder interface, with an `ffmpeg` implementation
//! - [`server`] serves `GET /audio` and ties the tasks together
//!
//! # Example
//!
//! ```no_run
//! use audio_relay::engine::{InputFormat, InputSpec};
//! use audio_relay::{AudioServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> audio_relay::Result<()> {
//!     let input = InputSpec::new(InputFormat::Capture { demuxer: "pulse".into() }, "default");
//!     let config = ServerConfig::with_input(input).bind("0.0.0.0:8080");
//!
//!     AudioServer::new(config)
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod engine;
pub mod error;
pub mod relay;
pub mod server;
pub mod supervisor;

pub use error::{EngineError, Error, RelayError, Result};
pub use relay::{ClientSession, Frame, RelayConfig, RelayHandle};
pub use server::{AudioServer, ServerConfig};
pub use supervisor::{SupervisorConfig, SupervisorHandle};
