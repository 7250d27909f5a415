//! Connection supervisor (C5): owns the at-most-one active transport and
//! (re)establishes it, with a Client variant that dials out and a Server
//! variant that listens and accepts.

pub mod client;
pub mod connection;
pub mod server;

pub use client::ClientSupervisor;
pub use connection::{spawn_connection_actor, ActiveConnection, ConnectionSlot};
