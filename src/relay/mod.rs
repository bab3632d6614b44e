//! Frame-synchronized broadcast relay
//!
//! The relay turns the encoder's byte stream into whole frames and fans
//! each one out to every connected listener without ever blocking on one.
//!
//! # Architecture
//!
//! ```text
//!    [Active run]
//!    FrameSink::write_frame()
//!         │  size, then bytes
//!         ▼
//!    ┌──────────────────────────┐        RelayHandle::subscribe()
//!    │ Relay (single task)      │ ◄────── rendezvous registration
//!    │   FrameReader            │
//!    │   SubscriberRegistry     │
//!    └────────────┬─────────────┘
//!                 │ try_send (never blocks)
//!      ┌──────────┼──────────┐
//!      ▼          ▼          ▼
//!  [Session]  [Session]  [Session] ──► HTTP body
//! ```
//!
//! # Backpressure
//!
//! Each session has its own bounded queue. A session whose queue is full is
//! evicted rather than waited for, so one slow listener never delays the
//! others or the encoder. Evicted listeners see their response end.

pub mod config;
pub mod frame;
pub mod hub;
pub mod registry;
pub mod session;

pub use config::RelayConfig;
pub use frame::{frame_stream, Frame, FrameReader, FrameSink};
pub use hub::{Relay, RelayHandle};
pub use registry::{BroadcastReport, Eviction, EvictionReason, SubscriberRegistry};
pub use session::{ClientSession, Delivery, DisconnectSignal, Subscriber};
