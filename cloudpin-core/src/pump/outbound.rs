//! C3: move one local-reader message to the active WebSocket outbound slot
//! per call, driven by a loop that sleeps `io_timeout` whenever there was
//! nothing to do.

use crate::bus::LocalReader;
use crate::error::CloudPinError;
use crate::metrics::{Measurements, Socket};
use crate::supervisor::ConnectionSlot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct OutboundPump {
    slot: Arc<ConnectionSlot>,
    max_frame_size: usize,
    metrics: Measurements,
}

impl OutboundPump {
    pub fn new(slot: Arc<ConnectionSlot>, max_frame_size: usize, metrics: Measurements) -> Self {
        Self {
            slot,
            max_frame_size,
            metrics,
        }
    }

    /// One attempt to move a single message across. Returns whether it did
    /// any work, so the driver loop knows whether to yield or idle-sleep.
    pub fn pump_one(&self, reader: &mut dyn LocalReader) -> Result<bool, CloudPinError> {
        let Some(conn) = self.slot.current() else {
            return Ok(false);
        };
        if !conn.is_writable() {
            return Ok(false);
        }
        let enqueued = reader.enqueued_results();
        if enqueued == 0 {
            return Ok(false);
        }
        let Some(bus_message) = reader.try_receive()? else {
            return Ok(false);
        };
        self.metrics
            .record_zmq_capacity(Socket::Source, enqueued.saturating_sub(1) as i64, true);
        let payload = bus_message.frame.pack(self.max_frame_size)?;
        let wire_len = payload.len() as u64;
        let sent = conn.try_send(payload);
        if sent {
            self.metrics.record_message(Socket::Source, wire_len);
        }
        Ok(sent)
    }

    /// Runs until `running` is cleared. A send that is attempted but loses
    /// the race (the connection dropped between `pump_one`'s checks and its
    /// `try_send`) is not retried -- the message is gone, per §4.3's
    /// ordering guarantee.
    pub async fn run(&self, reader: &mut dyn LocalReader, running: &AtomicBool, io_timeout: Duration) {
        while running.load(Ordering::SeqCst) {
            match self.pump_one(reader) {
                Ok(true) => tokio::task::yield_now().await,
                Ok(false) => tokio::time::sleep(io_timeout).await,
                Err(err) => {
                    warn!(error = %err, "outbound pump dropped a malformed frame");
                    tokio::time::sleep(io_timeout).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusMessage;
    use crate::frame::Frame;
    use bytes::Bytes;

    struct FakeReader {
        queue: std::collections::VecDeque<BusMessage>,
        started: bool,
    }

    impl LocalReader for FakeReader {
        fn enqueued_results(&self) -> usize {
            self.queue.len()
        }

        fn try_receive(&mut self) -> Result<Option<BusMessage>, CloudPinError> {
            Ok(self.queue.pop_front())
        }

        fn is_started(&self) -> bool {
            self.started
        }

        fn start(&mut self) {
            self.started = true;
        }

        fn is_shutdown(&self) -> bool {
            false
        }

        fn shutdown(&mut self) {}
    }

    fn bus_message(topic: &str) -> BusMessage {
        BusMessage {
            routing_id: Bytes::new(),
            frame: Frame::new(Bytes::copy_from_slice(topic.as_bytes()), Bytes::from_static(b"body"), Bytes::new()),
        }
    }

    fn test_metrics() -> Measurements {
        Measurements::new(Arc::new(crate::metrics::Metrics::new(None, None)), crate::metrics::Service::Client)
    }

    #[test]
    fn pump_one_returns_false_with_no_active_connection() {
        let slot = Arc::new(ConnectionSlot::new());
        let pump = OutboundPump::new(slot, 1024, test_metrics());
        let mut reader = FakeReader { queue: [bus_message("t")].into(), started: true };
        assert!(!pump.pump_one(&mut reader).unwrap());
        // The message was not consumed: nothing could send it anywhere.
        assert_eq!(reader.enqueued_results(), 1);
    }

    #[test]
    fn pump_one_returns_false_on_an_empty_reader() {
        let slot = Arc::new(ConnectionSlot::new());
        let pump = OutboundPump::new(slot, 1024, test_metrics());
        let mut reader = FakeReader { queue: Default::default(), started: true };
        assert!(!pump.pump_one(&mut reader).unwrap());
    }
}
