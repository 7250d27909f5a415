//! [`ActiveConnection`] and the connection actor that owns a single
//! WebSocket transport exclusively, per the data model's "at most one
//! (transport, listener_state) per role" invariant.
//!
//! A dedicated task multiplexes the egress channel fed by the outbound pump
//! (C3) against the transport's own `recv()`, forwarding binary frames into
//! the inbound pump's (C4) sink queue -- the same `tokio::select!` shape as
//! `examples/ws_chat_server.rs`'s per-connection handler, generalized from
//! one fixed peer to "whichever transport is currently active."

use crate::metrics::Measurements;
use crate::ws::{close_code, Incoming, WsTransport};
use bytes::Bytes;
use rama::http::ws::{protocol::frame::coding::CloseCode, Utf8Bytes};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// A non-owning, cloneable handle to one live WebSocket connection.
///
/// Mirrors the data model's `ActiveConnection`: `disconnected` is `false`
/// exactly while the underlying actor task is alive, and `writable` is the
/// flag `pause_writing`/`resume_writing` flip.
#[derive(Clone)]
pub struct ActiveConnection {
    generation: u64,
    egress_tx: mpsc::Sender<Bytes>,
    close_tx: mpsc::Sender<(CloseCode, Utf8Bytes)>,
    writable: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
}

impl ActiveConnection {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn is_writable(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst) && self.writable.load(Ordering::SeqCst)
    }

    /// Outbound pump (C3) step 1+4: obtain the writable slot and hand it a
    /// packed frame. Returns `false` without enqueuing when there is no
    /// capacity (the connection is paused, busy, or gone) -- the caller
    /// must not retry the same frame, per §4.3's "a send that returns error
    /// is not retried, it is lost."
    pub fn try_send(&self, payload: Bytes) -> bool {
        if !self.is_writable() {
            return false;
        }
        self.egress_tx.try_send(payload).is_ok()
    }

    /// Ask the actor to close the transport with a specific status code,
    /// e.g. `close_code::TRY_AGAIN_LATER` when the inbound pump (C4) wants
    /// to propagate local-writer backpressure to the peer per §4.4. Best
    /// effort: if the actor is already gone this is a no-op.
    pub fn request_close(&self, code: CloseCode, reason: impl Into<Utf8Bytes>) {
        let _ = self.close_tx.try_send((code, reason.into()));
    }
}

/// Spawn the actor owning `transport` and return the handle the supervisor
/// installs as current. `sink_tx` is the bounded channel feeding the
/// inbound pump's sink queue; `on_exit` runs once, from inside the actor,
/// when the connection ends for any reason (peer close, send error, or the
/// egress channel being dropped on service stop).
pub fn spawn_connection_actor<T>(
    mut transport: T,
    sink_tx: mpsc::Sender<Bytes>,
    metrics: Measurements,
    mut read_drops: impl FnMut() + Send + 'static,
    on_exit: impl FnOnce() + Send + 'static,
) -> ActiveConnection
where
    T: WsTransport + 'static,
{
    let generation = NEXT_GENERATION.fetch_add(1, Ordering::SeqCst);
    let (egress_tx, mut egress_rx) = mpsc::channel::<Bytes>(1);
    let (close_tx, mut close_rx) = mpsc::channel::<(CloseCode, Utf8Bytes)>(1);
    let writable = Arc::new(AtomicBool::new(true));
    let disconnected = Arc::new(AtomicBool::new(false));

    let writable_actor = writable.clone();
    let disconnected_actor = disconnected.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                maybe_payload = egress_rx.recv() => {
                    let Some(payload) = maybe_payload else {
                        // Service stop: the outbound pump's handle was dropped.
                        break;
                    };
                    writable_actor.store(false, Ordering::SeqCst);
                    metrics.record_writing_paused();
                    let result = transport.send_binary(payload).await;
                    writable_actor.store(true, Ordering::SeqCst);
                    metrics.record_writing_resumed();
                    if result.is_err() {
                        break;
                    }
                }

                incoming = transport.recv() => {
                    match incoming {
                        Ok(Incoming::Binary(payload)) => {
                            if sink_tx.try_send(payload).is_err() {
                                metrics.record_read_drop();
                                read_drops();
                            }
                            metrics.record_left_ws_reading_capacity(sink_tx.capacity() as i64);
                        }
                        Ok(Incoming::Ignored) => {}
                        Ok(Incoming::Closed) | Err(_) => break,
                    }
                }

                maybe_close = close_rx.recv() => {
                    let (code, reason) = maybe_close
                        .unwrap_or((close_code::POLICY_VIOLATION, Utf8Bytes::from_static("connection ended")));
                    disconnected_actor.store(true, Ordering::SeqCst);
                    let _ = transport.close(code, reason).await;
                    on_exit();
                    return;
                }
            }
        }

        disconnected_actor.store(true, Ordering::SeqCst);
        let _ = transport
            .close(close_code::POLICY_VIOLATION, Utf8Bytes::from_static("connection ended"))
            .await;
        on_exit();
    });

    ActiveConnection {
        generation,
        egress_tx,
        close_tx,
        writable,
        disconnected,
    }
}

/// The single-slot "at most one active connection" owner shared between the
/// connect/accept path (writer) and the pumps (readers).
#[derive(Default)]
pub struct ConnectionSlot {
    inner: std::sync::Mutex<Option<ActiveConnection>>,
}

impl ConnectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ActiveConnection> {
        self.inner.lock().expect("connection slot mutex poisoned").clone()
    }

    /// `on_connected`: install `conn` as current if (and only if) no other
    /// non-disconnected connection is already installed. On conflict, the
    /// caller closes `conn` with `POLICY_VIOLATION` per §4.5's
    /// at-most-one-active-connection invariant ("first-seen wins").
    pub fn try_install(&self, conn: ActiveConnection) -> Result<(), ActiveConnection> {
        let mut guard = self.inner.lock().expect("connection slot mutex poisoned");
        if let Some(existing) = guard.as_ref() {
            if !existing.is_disconnected() {
                return Err(conn);
            }
        }
        *guard = Some(conn);
        Ok(())
    }

    /// `on_disconnected`: clear the slot, but only if it still refers to
    /// the connection generation that is reporting itself gone (an older
    /// connection racing its own teardown must not clear a newer one).
    pub fn clear_generation(&self, generation: u64) {
        let mut guard = self.inner.lock().expect("connection slot mutex poisoned");
        if guard.as_ref().is_some_and(|c| c.generation == generation) {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_connection(generation: u64) -> ActiveConnection {
        let (egress_tx, _egress_rx) = mpsc::channel(1);
        let (close_tx, _close_rx) = mpsc::channel::<(CloseCode, Utf8Bytes)>(1);
        ActiveConnection {
            generation,
            egress_tx,
            close_tx,
            writable: Arc::new(AtomicBool::new(true)),
            disconnected: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn slot_rejects_a_second_connection_while_first_is_active() {
        let slot = ConnectionSlot::new();
        slot.try_install(fake_connection(1)).unwrap();
        let rejected = slot.try_install(fake_connection(2)).unwrap_err();
        assert_eq!(rejected.generation(), 2);
        assert_eq!(slot.current().unwrap().generation(), 1);
    }

    #[test]
    fn slot_accepts_a_new_connection_after_the_first_disconnects() {
        let slot = ConnectionSlot::new();
        let first = fake_connection(1);
        first.disconnected.store(true, Ordering::SeqCst);
        slot.try_install(first).unwrap();
        slot.try_install(fake_connection(2)).unwrap();
        assert_eq!(slot.current().unwrap().generation(), 2);
    }

    #[test]
    fn clear_generation_ignores_stale_generations() {
        let slot = ConnectionSlot::new();
        slot.try_install(fake_connection(2)).unwrap();
        slot.clear_generation(1);
        assert!(slot.current().is_some());
        slot.clear_generation(2);
        assert!(slot.current().is_none());
    }
}
