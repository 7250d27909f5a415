//! C6: the service controller. Wires C2 (local bus), C3/C4 (pumps), C5
//! (connection supervisor) and C7 (measurements) together behind a single
//! `run()`/`stop()` lifecycle, per §4.6's invariants and run sequences.

use crate::bus::{LocalReader, LocalWriter, ZmqReader, ZmqWriter};
use crate::config::{ClientServiceConfig, ServerServiceConfig};
use crate::error::CloudPinError;
use crate::metrics::{Measurements, Metrics, Service as ServiceRole};
use crate::pump::{DropReporter, InboundPump, OutboundPump};
use crate::supervisor::{ClientSupervisor, ConnectionSlot};
use rama::graceful::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

/// One-second rate-limit window for the "N inbound frames dropped" warning,
/// matching `DropReporter`'s own default in the original `_REPORT_INTERVAL`.
const DROP_REPORT_WINDOW: Duration = Duration::from_secs(1);

/// `running`/`started`/`stopped` latch trio shared by both roles.
struct Lifecycle {
    running: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    stopped_notify: Arc<Notify>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            started: Arc::new(AtomicBool::new(false)),
            stopped_notify: Arc::new(Notify::new()),
        }
    }

    fn mark_running(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// The Client role: dials out, reconnecting until stopped.
pub struct ClientService {
    config: ClientServiceConfig,
    lifecycle: Lifecycle,
}

impl ClientService {
    pub fn new(config: ClientServiceConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle.is_started()
    }

    /// Request shutdown and wait for `run()` to finish tearing down.
    pub async fn stop(&self) {
        self.lifecycle.stop();
        self.lifecycle.stopped_notify.notified().await;
    }

    /// Run until stopped or a fatal error occurs. Per §4.6's run sequence:
    /// acquire and start the bus endpoints, spawn the outbound pump,
    /// inbound pump and reconnect loop, wait for the first to end, then
    /// tear everything down the same way regardless of why it ended.
    pub async fn run(&self) -> Result<(), CloudPinError> {
        self.config.validate()?;

        let mut reader = ZmqReader::bind(
            &self.config.source.url,
            self.config.source.receive_timeout,
            self.config.source.receive_hwm as i32,
        )?;
        let mut writer = ZmqWriter::connect(
            &self.config.sink.url,
            self.config.sink.send_timeout,
            self.config.sink.max_inflight_messages,
        )?;
        reader.start();
        writer.start();

        let metrics = Measurements::new(
            Arc::new(Metrics::new(
                self.config.histogram_boundaries.message_size.clone(),
                self.config.histogram_boundaries.delay.clone(),
            )),
            ServiceRole::Client,
        );

        let slot = Arc::new(ConnectionSlot::new());
        let supervisor = Arc::new(ClientSupervisor::new(self.config.clone(), self.lifecycle.running.clone()));
        let (sink_tx, sink_rx) = mpsc::channel(2 * self.config.sink.max_inflight_messages);
        let drop_reporter = Arc::new(Mutex::new(DropReporter::new(DROP_REPORT_WINDOW)));

        self.lifecycle.mark_running();

        let outbound = OutboundPump::new(slot.clone(), self.config.max_frame_size, metrics.clone());
        let outbound_running = self.lifecycle.running.clone();
        let outbound_io_timeout = self.config.io_timeout;
        let mut outbound_reader: Box<dyn LocalReader> = Box::new(reader);
        let mut outbound_task = tokio::spawn(async move {
            outbound.run(outbound_reader.as_mut(), &outbound_running, outbound_io_timeout).await;
            outbound_reader
        });

        let mut inbound_pump = InboundPump::new(sink_rx, self.config.max_frame_size, slot.clone(), metrics.clone());
        let inbound_running = self.lifecycle.running.clone();
        let inbound_io_timeout = self.config.io_timeout;
        let mut inbound_writer: Box<dyn LocalWriter> = Box::new(writer);
        let mut inbound_task = tokio::spawn(async move {
            inbound_pump.run(inbound_writer.as_mut(), &inbound_running, inbound_io_timeout).await;
            inbound_writer
        });

        let reconnect_supervisor = supervisor.clone();
        let reconnect_metrics = metrics.clone();
        let reconnect_drop_reporter = drop_reporter.clone();
        let mut reconnect_task = tokio::spawn(async move {
            reconnect_supervisor
                .run_reconnect_loop(sink_tx, reconnect_metrics, reconnect_drop_reporter)
                .await
        });

        self.lifecycle.mark_started();
        info!("client service started");

        // Wait for whichever of the three tasks ends first -- normally the
        // reconnect loop, on a fatal connect error or an external stop()
        // flipping `running` -- then tear the rest down the same way
        // regardless of which one it was.
        let reconnect_result = tokio::select! {
            result = &mut outbound_task => { self.lifecycle.stop(); result.map_err(join_err)?; None }
            result = &mut inbound_task => { self.lifecycle.stop(); result.map_err(join_err)?; None }
            result = &mut reconnect_task => { self.lifecycle.stop(); Some(result.map_err(join_err)?) }
        };
        let reconnect_result = match reconnect_result {
            Some(result) => result,
            None => reconnect_task.await.map_err(join_err)?,
        };

        let reader = outbound_task.await.map_err(join_err)?;
        let writer = inbound_task.await.map_err(join_err)?;

        if let Some(conn) = supervisor.current() {
            conn.request_close(crate::ws::close_code::POLICY_VIOLATION, "service stopping");
        }
        let mut reader = reader;
        let mut writer = writer;
        reader.shutdown();
        writer.shutdown();

        self.lifecycle.stopped_notify.notify_waiters();

        match reconnect_result {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(error = %err, "client service stopped due to a fatal connection error");
                Err(err)
            }
        }
    }
}

/// The Server role: listens, authenticates, accepts at most one connection.
pub struct ServerService {
    config: ServerServiceConfig,
    lifecycle: Lifecycle,
}

impl ServerService {
    pub fn new(config: ServerServiceConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle.is_started()
    }

    pub async fn stop(&self) {
        self.lifecycle.stop();
        self.lifecycle.stopped_notify.notified().await;
    }

    pub async fn run(&self) -> Result<(), CloudPinError> {
        self.config.validate()?;

        let mut reader = ZmqReader::bind(
            &self.config.source.url,
            self.config.source.receive_timeout,
            self.config.source.receive_hwm as i32,
        )?;
        let mut writer = ZmqWriter::connect(
            &self.config.sink.url,
            self.config.sink.send_timeout,
            self.config.sink.max_inflight_messages,
        )?;
        reader.start();
        writer.start();

        let metrics = Measurements::new(
            Arc::new(Metrics::new(
                self.config.histogram_boundaries.message_size.clone(),
                self.config.histogram_boundaries.delay.clone(),
            )),
            ServiceRole::Server,
        );

        let slot = Arc::new(ConnectionSlot::new());
        let (sink_tx, sink_rx) = mpsc::channel(2 * self.config.sink.max_inflight_messages);
        let drop_reporter = Arc::new(Mutex::new(DropReporter::new(DROP_REPORT_WINDOW)));

        self.lifecycle.mark_running();

        let shutdown = Shutdown::default();
        let serve_config = self.config.clone();
        let serve_slot = slot.clone();
        let serve_metrics = metrics.clone();
        let serve_drop_reporter = drop_reporter.clone();
        shutdown.spawn_task_fn(move |guard| async move {
            if let Err(err) = crate::supervisor::server::serve(
                &serve_config,
                serve_slot,
                sink_tx,
                serve_metrics,
                serve_drop_reporter,
                guard,
            )
            .await
            {
                error!(error = %err, "WebSocket listener exited with an error");
            }
        });

        let outbound = OutboundPump::new(slot.clone(), self.config.max_frame_size, metrics.clone());
        let outbound_running = self.lifecycle.running.clone();
        let outbound_io_timeout = self.config.io_timeout;
        let mut outbound_reader: Box<dyn LocalReader> = Box::new(reader);
        let mut outbound_task = tokio::spawn(async move {
            outbound.run(outbound_reader.as_mut(), &outbound_running, outbound_io_timeout).await;
            outbound_reader
        });

        let mut inbound_pump = InboundPump::new(sink_rx, self.config.max_frame_size, slot.clone(), metrics.clone());
        let inbound_running = self.lifecycle.running.clone();
        let inbound_io_timeout = self.config.io_timeout;
        let mut inbound_writer: Box<dyn LocalWriter> = Box::new(writer);
        let mut inbound_task = tokio::spawn(async move {
            inbound_pump.run(inbound_writer.as_mut(), &inbound_running, inbound_io_timeout).await;
            inbound_writer
        });

        self.lifecycle.mark_started();
        info!("server service started, listening on {}", self.config.endpoint);

        while self.lifecycle.running.load(Ordering::SeqCst) {
            tokio::time::sleep(self.config.io_timeout).await;
        }

        if let Err(err) = shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
            warn!(error = %err, "listener did not shut down within the grace period");
        }

        let reader = outbound_task.await.map_err(join_err)?;
        let writer = inbound_task.await.map_err(join_err)?;

        if let Some(conn) = slot.current() {
            conn.request_close(crate::ws::close_code::POLICY_VIOLATION, "service stopping");
        }
        let mut reader = reader;
        let mut writer = writer;
        reader.shutdown();
        writer.shutdown();

        self.lifecycle.stopped_notify.notify_waiters();
        Ok(())
    }
}

fn join_err(err: tokio::task::JoinError) -> CloudPinError {
    CloudPinError::Other(Box::new(err))
}
