//! C4: flush frames arriving over the active WebSocket connection into the
//! local writer. Frame intake itself (binary-only, drop-when-full,
//! `ws_read_drops`) happens inside the connection actor
//! (`supervisor::connection`) which feeds the bounded channel this pump
//! drains; this module is the flush half only.

use crate::bus::LocalWriter;
use crate::error::CloudPinError;
use crate::frame::Frame;
use crate::metrics::{Measurements, Socket};
use crate::supervisor::ConnectionSlot;
use crate::ws::close_code;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Consecutive idle `pump_many` calls where the writer stayed over capacity
/// and a payload was left waiting, before closing the connection with
/// `TRY_AGAIN_LATER` to propagate backpressure to the peer, per §4.4's
/// optional "supervisor may close the connection" clause.
const STALL_CLOSE_THRESHOLD: u32 = 50;

pub struct InboundPump {
    sink_rx: mpsc::Receiver<Bytes>,
    held: Option<Bytes>,
    max_frame_size: usize,
    slot: Arc<ConnectionSlot>,
    stalled_ticks: u32,
    metrics: Measurements,
}

impl InboundPump {
    pub fn new(
        sink_rx: mpsc::Receiver<Bytes>,
        max_frame_size: usize,
        slot: Arc<ConnectionSlot>,
        metrics: Measurements,
    ) -> Self {
        Self {
            sink_rx,
            held: None,
            max_frame_size,
            slot,
            stalled_ticks: 0,
            metrics,
        }
    }

    /// Drain as many queued payloads as the writer currently has capacity
    /// for, unpacking each and handing it to `writer.send_message`. Returns
    /// the number moved. A malformed payload is logged and dropped without
    /// stopping the flush.
    ///
    /// The bridge forwards frames between two independent local buses, so
    /// the ZeroMQ routing id the original sender attached on its own ROUTER
    /// socket has no meaning on this side; delivery here always uses an
    /// empty routing id, matching the sink's DEALER role.
    pub fn pump_many(&mut self, writer: &mut dyn LocalWriter) -> Result<usize, CloudPinError> {
        let mut moved = 0;
        loop {
            if !writer.has_capacity() {
                break;
            }
            let payload = match self.held.take() {
                Some(payload) => payload,
                None => match self.sink_rx.try_recv() {
                    Ok(payload) => payload,
                    Err(_) => return Ok(moved),
                },
            };
            let wire_len = payload.len() as u64;
            match Frame::unpack(payload, self.max_frame_size) {
                Ok(frame) => {
                    writer.send_message(Bytes::new(), frame)?;
                    moved += 1;
                    self.stalled_ticks = 0;
                    self.metrics.record_message(Socket::Sink, wire_len);
                    self.metrics.record_consumed_ws_reading_capacity();
                }
                Err(err) => {
                    warn!(error = %err, "dropped a malformed inbound frame");
                }
            }
        }

        // The writer is over capacity. Peek one payload (if any) so we can
        // tell "queue empty, nothing to do" from "queue backed up" without
        // blocking.
        if self.held.is_none() {
            self.held = self.sink_rx.try_recv().ok();
        }
        if self.held.is_some() {
            self.stalled_ticks += 1;
            if self.stalled_ticks >= STALL_CLOSE_THRESHOLD {
                if let Some(conn) = self.slot.current() {
                    conn.request_close(close_code::TRY_AGAIN_LATER, "local writer over capacity");
                }
                self.stalled_ticks = 0;
            }
        }
        Ok(moved)
    }

    pub async fn run(&mut self, writer: &mut dyn LocalWriter, running: &AtomicBool, io_timeout: Duration) {
        while running.load(Ordering::SeqCst) {
            if let Err(err) = self.pump_many(writer) {
                warn!(error = %err, "inbound pump flush failed");
            }
            tokio::time::sleep(io_timeout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;

    struct FakeWriter {
        capacity: usize,
        sent: Vec<Frame>,
    }

    impl LocalWriter for FakeWriter {
        fn inflight_messages(&self) -> usize {
            self.sent.len()
        }

        fn has_capacity(&self) -> bool {
            self.sent.len() < self.capacity
        }

        fn send_message(&mut self, _routing_id: Bytes, frame: Frame) -> Result<(), CloudPinError> {
            if !self.has_capacity() {
                return Err(CloudPinError::Bus(BusError::new("writer at capacity")));
            }
            self.sent.push(frame);
            Ok(())
        }

        fn is_started(&self) -> bool {
            true
        }

        fn start(&mut self) {}

        fn is_shutdown(&self) -> bool {
            false
        }

        fn shutdown(&mut self) {}
    }

    fn packed(topic: &str, message: &str) -> Bytes {
        Frame::new(
            Bytes::copy_from_slice(topic.as_bytes()),
            Bytes::copy_from_slice(message.as_bytes()),
            Bytes::new(),
        )
        .pack(1024)
        .unwrap()
    }

    fn test_metrics() -> Measurements {
        Measurements::new(
            Arc::new(crate::metrics::Metrics::new(None, None)),
            crate::metrics::Service::Client,
        )
    }

    #[test]
    fn pump_many_flushes_while_writer_has_capacity() {
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(packed("a", "1")).unwrap();
        tx.try_send(packed("b", "2")).unwrap();
        let mut pump = InboundPump::new(rx, 1024, Arc::new(ConnectionSlot::new()), test_metrics());
        let mut writer = FakeWriter { capacity: 10, sent: Vec::new() };
        let moved = pump.pump_many(&mut writer).unwrap();
        assert_eq!(moved, 2);
        assert_eq!(writer.sent.len(), 2);
    }

    #[test]
    fn pump_many_stops_at_writer_capacity() {
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(packed("a", "1")).unwrap();
        tx.try_send(packed("b", "2")).unwrap();
        let mut pump = InboundPump::new(rx, 1024, Arc::new(ConnectionSlot::new()), test_metrics());
        let mut writer = FakeWriter { capacity: 1, sent: Vec::new() };
        let moved = pump.pump_many(&mut writer).unwrap();
        assert_eq!(moved, 1);
        // The second payload was peeked and held, not lost.
        assert!(pump.held.is_some());
    }
}
