//! C2: local bus endpoints.
//!
//! `zmq`'s socket API is blocking, so a ROUTER/DEALER pair is driven from a
//! dedicated OS thread and exposed to the async pumps through bounded
//! channels -- the same shape `savant_cloudpin.zmq.NonBlockingReader` /
//! `NonBlockingWriter` gave their own non-blocking facade over a blocking
//! `savant_rs.zmq` socket.

mod zmq_adapter;

pub use zmq_adapter::{ZmqReader, ZmqWriter};

use crate::error::CloudPinError;
use crate::frame::Frame;

/// A message read off the local bus, still attached to its ZeroMQ routing id
/// so a reply can be addressed back to the same peer.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub routing_id: bytes::Bytes,
    pub frame: Frame,
}

/// The read half of a local bus endpoint (ROUTER socket).
///
/// Mirrors `NonBlockingReader`: `try_receive` never blocks the caller (it is
/// backed by a bounded channel fed from the dedicated ZeroMQ thread);
/// `has_capacity`/`is_shutdown` expose backpressure and lifecycle state.
pub trait LocalReader: Send {
    /// Number of messages currently queued and not yet handed to a caller.
    fn enqueued_results(&self) -> usize;

    /// Non-blocking receive of the next queued message, if any.
    fn try_receive(&mut self) -> Result<Option<BusMessage>, CloudPinError>;

    /// `true` once [`LocalReader::start`] has been called.
    fn is_started(&self) -> bool;

    /// Begin accepting messages. Idempotent.
    fn start(&mut self);

    /// `true` once the reader has stopped accepting new messages.
    fn is_shutdown(&self) -> bool;

    /// Begin shutdown. Per the ZeroMQ reader shutdown workaround, this
    /// drains a bounded number of in-flight messages on a background
    /// thread before tearing down the socket.
    fn shutdown(&mut self);
}

/// The write half of a local bus endpoint (DEALER socket).
///
/// Mirrors `NonBlockingWriter`: `has_capacity` gates whether `send_message`
/// should be attempted (bounded by `max_inflight_messages`).
pub trait LocalWriter: Send {
    /// Number of sends handed to the background writer thread but not yet
    /// acknowledged as delivered.
    fn inflight_messages(&self) -> usize;

    fn has_capacity(&self) -> bool;

    fn send_message(&mut self, routing_id: bytes::Bytes, frame: Frame) -> Result<(), CloudPinError>;

    /// `true` once [`LocalWriter::start`] has been called.
    fn is_started(&self) -> bool;

    /// Begin accepting sends. Idempotent.
    fn start(&mut self);

    fn is_shutdown(&self) -> bool;

    fn shutdown(&mut self);
}
