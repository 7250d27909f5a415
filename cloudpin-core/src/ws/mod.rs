//! WebSocket-facing plumbing shared by the Client and Server connection
//! supervisors (C5): TLS context construction, the `x-api-key` handshake
//! header, and a transport seam the pumps talk through.

pub mod auth;
pub mod tls;
pub mod transport;

pub use transport::{close_code, ClientTransport, Incoming, ServerTransport, WsTransport};
