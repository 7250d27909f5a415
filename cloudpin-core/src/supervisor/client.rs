//! Client variant of the connection supervisor (C5): dial, authenticate,
//! reconnect on loss. Grounded in `savant_cloudpin/services/_client.py`'s
//! `_connect`/`_reconnect_loop` and `rama-cli/src/cmd/send/http/ws/client.rs`
//! for the handshake call shape.

use super::connection::{spawn_connection_actor, ActiveConnection, ConnectionSlot};
use crate::config::ClientServiceConfig;
use crate::error::{AuthError, CloudPinError, TransientNetworkError};
use crate::metrics::Measurements;
use crate::pump::DropReporter;
use crate::ws::{auth, tls, ClientTransport};
use rama::http::client::EasyHttpWebClient;
use rama::http::ws::handshake::client::HttpClientWebSocketExt;
use rama::http::Request;
use rama::tls::rustls::client::TlsConnectorLayer;
use rama::Context;
use rama::Layer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owns the at-most-one active outbound connection for the Client role and
/// keeps redialling until told to stop.
pub struct ClientSupervisor {
    config: ClientServiceConfig,
    slot: ConnectionSlot,
    running: Arc<AtomicBool>,
    cached_tls: Mutex<Option<Arc<rama::tls::rustls::dep::rustls::ClientConfig>>>,
}

impl ClientSupervisor {
    pub fn new(config: ClientServiceConfig, running: Arc<AtomicBool>) -> Self {
        Self {
            config,
            slot: ConnectionSlot::new(),
            running,
            cached_tls: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<ActiveConnection> {
        self.slot.current()
    }

    fn tls_config(&self) -> Result<Option<Arc<rama::tls::rustls::dep::rustls::ClientConfig>>, CloudPinError> {
        if self.config.tls.insecure {
            return Ok(None);
        }
        let mut cached = self.cached_tls.lock().expect("tls cache mutex poisoned");
        if cached.is_none() {
            *cached = Some(tls::build_client_tls_config(&self.config.tls)?);
        }
        Ok(cached.clone())
    }

    /// One connect attempt. Builds (or reuses the cached) TLS config, dials
    /// the configured `server_url`, performs the WS handshake with the
    /// `x-api-key` header attached, and classifies failure per §4.5's error
    /// table.
    async fn connect_once(
        &self,
        sink_tx: mpsc::Sender<bytes::Bytes>,
        metrics: Measurements,
        drop_reporter: Arc<std::sync::Mutex<DropReporter>>,
    ) -> Result<ActiveConnection, CloudPinError> {
        metrics.record_connection_attempt();

        let tls = self.tls_config()?;
        let client = match tls {
            Some(tls_config) => EasyHttpWebClient::builder()
                .with_default_transport_connector()
                .without_tls_proxy_support()
                .without_proxy_support()
                .layer(TlsConnectorLayer::new(tls_config))
                .build(),
            None => EasyHttpWebClient::builder()
                .with_default_transport_connector()
                .without_tls_proxy_support()
                .without_proxy_support()
                .build(),
        };

        let req = Request::builder()
            .uri(self.config.server_url.as_str())
            .body(rama::http::Body::empty())
            .map_err(|e| CloudPinError::Config(crate::error::ConfigError::new(format!("build WS request: {e}"))))?;
        let req = auth::with_api_key_header(req, &self.config.api_key)?;

        let ws = client
            .websocket_with_request(req)
            .handshake(rama::extensions::Extensions::default())
            .await
            .map_err(classify_connect_error)?;

        let metrics_for_exit = metrics.clone();
        let conn = spawn_connection_actor(
            ClientTransport(ws),
            sink_tx,
            metrics.clone(),
            {
                let drop_reporter = drop_reporter.clone();
                move || {
                    if let Some(count) = drop_reporter.lock().expect("drop reporter mutex poisoned").record() {
                        warn!(dropped = count, "inbound frames dropped in the last second");
                    }
                }
            },
            move || {
                metrics_for_exit.record_disconnected();
            },
        );

        match self.slot.try_install(conn.clone()) {
            Ok(()) => {
                metrics.record_connected();
                Ok(conn)
            }
            Err(rejected) => {
                // Lost the race against another dial. Dropping the handle
                // drops its egress sender, which makes the actor's select
                // observe a closed channel and close the socket itself.
                drop(rejected);
                Err(CloudPinError::Transient(TransientNetworkError::new(
                    "a connection was already active; closing the newly dialed one",
                )))
            }
        }
    }

    /// The reconnect loop: while `running`, keep dialling, sleeping
    /// `reconnect_timeout` between attempts, until a fatal error is hit
    /// (auth/TLS) which propagates and ends `run()`.
    pub async fn run_reconnect_loop(
        &self,
        sink_tx: mpsc::Sender<bytes::Bytes>,
        metrics: Measurements,
        drop_reporter: Arc<std::sync::Mutex<DropReporter>>,
    ) -> Result<(), CloudPinError> {
        while self.running.load(Ordering::SeqCst) {
            match self.connect_once(sink_tx.clone(), metrics.clone(), drop_reporter.clone()).await {
                Ok(conn) => {
                    info!("connected to {}", self.config.server_url);
                    // Wait out the connection's lifetime before trying again.
                    while self.running.load(Ordering::SeqCst) && !conn.is_disconnected() {
                        tokio::time::sleep(self.config.io_timeout).await;
                    }
                    self.slot.clear_generation(conn.generation());
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(err) if err.is_transient() => {
                    metrics.record_connection_error();
                    debug!(error = %err, "transient connect failure, retrying");
                    tokio::time::sleep(self.config.reconnect_timeout).await;
                }
                Err(err) => {
                    metrics.record_connection_error();
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

fn classify_connect_error(err: rama::error::BoxError) -> CloudPinError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("x509") {
        CloudPinError::Auth(AuthError::new(format!("certificate problems: {message}")))
    } else if lowered.contains("401")
        || lowered.contains("403")
        || lowered.contains("unauthorized")
        || lowered.contains("handshake")
    {
        CloudPinError::Auth(AuthError::new(format!("auth problems: {message}")))
    } else if lowered.contains("refused") || lowered.contains("reset") || lowered.contains("unreachable") {
        CloudPinError::Transient(TransientNetworkError::new(message))
    } else {
        CloudPinError::Transient(TransientNetworkError::new(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(message: &str) -> rama::error::BoxError {
        Box::new(std::io::Error::other(message.to_owned()))
    }

    #[test]
    fn certificate_failures_classify_as_auth() {
        let err = classify_connect_error(boxed("invalid peer certificate: UnknownIssuer"));
        assert!(matches!(err, CloudPinError::Auth(_)));
        assert!(err.to_string().contains("certificate problems"));
    }

    #[test]
    fn tls_handshake_alerts_classify_as_auth() {
        let err = classify_connect_error(boxed("TLS handshake failed"));
        assert!(matches!(err, CloudPinError::Auth(_)));
    }

    #[test]
    fn http_401_classifies_as_auth() {
        let err = classify_connect_error(boxed("unexpected response status: 401 Unauthorized"));
        assert!(matches!(err, CloudPinError::Auth(_)));
        assert!(err.to_string().contains("auth problems"));
    }

    #[test]
    fn connection_refused_classifies_as_transient() {
        let err = classify_connect_error(boxed("connection refused (os error 111)"));
        assert!(err.is_transient());
    }

    #[test]
    fn unrecognized_errors_fall_back_to_transient() {
        let err = classify_connect_error(boxed("some unexpected condition"));
        assert!(err.is_transient());
    }
}
