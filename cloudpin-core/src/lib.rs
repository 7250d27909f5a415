//! CloudPin: a bidirectional ZeroMQ-over-WebSocket bridge.
//!
//! A Client instance dials a Server instance over WebSocket (optionally
//! TLS, authenticated by an `x-api-key` header) and relays messages
//! between its local ZeroMQ bus and the connection, in both directions, at
//! most one connection at a time.

pub mod bus;
pub mod config;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod pump;
pub mod service;
pub mod supervisor;
pub mod timings;
pub mod ws;

pub use config::{ClientServiceConfig, ServerServiceConfig};
pub use error::CloudPinError;
pub use frame::Frame;
pub use service::{ClientService, ServerService};
