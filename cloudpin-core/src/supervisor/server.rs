//! Server variant of the connection supervisor (C5): listen, authenticate
//! the upgrade request by `x-api-key` (and optionally by client
//! certificate), accept the first valid connection as the active one.
//! Grounded in `examples/ws_chat_server.rs` (`HttpServer`, `Router`,
//! `WebSocketAcceptor`, `TcpListener::serve_graceful`) and
//! `examples/mtls_tunnel_and_service.rs` (`TlsAcceptorLayer` composed in
//! front of the HTTP server).

use super::connection::{spawn_connection_actor, ActiveConnection, ConnectionSlot};
use crate::config::ServerServiceConfig;
use crate::error::{AuthError, CloudPinError};
use crate::metrics::Measurements;
use crate::pump::DropReporter;
use crate::ws::{auth, tls, ServerTransport};
use rama::graceful::ShutdownGuard;
use rama::http::server::HttpServer;
use rama::http::service::web::Router;
use rama::http::ws::handshake::server::{ServerWebSocket, WebSocketAcceptor};
use rama::http::{Request, Response, StatusCode};
use rama::rt::Executor;
use rama::service::service_fn;
use rama::tcp::server::TcpListener;
use rama::tls::rustls::server::TlsAcceptorLayer;
use rama::Context;
use rama::Layer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// State handed to every accepted connection's handler task.
#[derive(Clone)]
struct ServerState {
    slot: Arc<ConnectionSlot>,
    api_key: Arc<str>,
    sink_tx: mpsc::Sender<bytes::Bytes>,
    metrics: Measurements,
    drop_reporter: Arc<std::sync::Mutex<DropReporter>>,
}

/// Rejects (with `401`) any upgrade request whose `x-api-key` header does
/// not match, before the inner [`WebSocketAcceptor`] ever runs.
struct ApiKeyLayer;

struct ApiKeyService<S> {
    inner: S,
}

impl<S> Layer<S> for ApiKeyLayer {
    type Service = ApiKeyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyService { inner }
    }
}

impl<S> rama::Service<ServerState, Request> for ApiKeyService<S>
where
    S: rama::Service<ServerState, Request, Response = Response, Error = rama::error::BoxError>,
{
    type Response = Response;
    type Error = rama::error::BoxError;

    async fn serve(
        &self,
        ctx: Context<ServerState>,
        req: Request,
    ) -> Result<Response, rama::error::BoxError> {
        let expected = ctx.state().api_key.clone();
        match auth::check_api_key(&req, &expected) {
            Ok(()) => self.inner.serve(ctx, req).await,
            Err(CloudPinError::Auth(_)) => {
                warn!("rejected WebSocket upgrade: invalid API key");
                Ok(Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .body(rama::http::Body::from("Invalid API key"))
                    .expect("build 401 response"))
            }
            Err(other) => Err(Box::new(other)),
        }
    }
}

async fn handle_connection(ctx: Context<ServerState>, ws: ServerWebSocket) -> Result<(), std::convert::Infallible> {
    let state = ctx.state().clone();

    let (sink_tx, read_drops) = (state.sink_tx.clone(), state.drop_reporter.clone());
    let slot = state.slot.clone();
    let metrics_for_exit = state.metrics.clone();
    let slot_for_exit = slot.clone();

    let conn = spawn_connection_actor(
        ServerTransport(ws),
        sink_tx,
        state.metrics.clone(),
        move || {
            if let Some(count) = read_drops.lock().expect("drop reporter mutex poisoned").record() {
                warn!(dropped = count, "inbound frames dropped in the last second");
            }
        },
        move || {
            metrics_for_exit.record_disconnected();
        },
    );

    match slot.try_install(conn.clone()) {
        Ok(()) => {
            state.metrics.record_connected();
            info!("accepted new client connection");
        }
        Err(_rejected) => {
            warn!("rejecting additional connection: one is already active");
            slot_for_exit.clear_generation(conn.generation());
        }
    }

    Ok(())
}

/// Serve the Client-facing WebSocket endpoint until `guard` requests a
/// graceful shutdown. Returns once the listener stops accepting and all
/// in-flight connections have drained.
pub async fn serve(
    config: &ServerServiceConfig,
    slot: Arc<ConnectionSlot>,
    sink_tx: mpsc::Sender<bytes::Bytes>,
    metrics: Measurements,
    drop_reporter: Arc<std::sync::Mutex<DropReporter>>,
    guard: ShutdownGuard,
) -> Result<(), CloudPinError> {
    let tls_enabled = !config.tls.insecure;
    let bind_addr = config.endpoint;

    let state = ServerState {
        slot,
        api_key: Arc::from(config.api_key.as_str()),
        sink_tx,
        metrics,
        drop_reporter,
    };

    let router = Router::new().with_get(
        "/",
        ApiKeyLayer.into_layer(WebSocketAcceptor::new().into_service(service_fn(handle_connection))),
    );

    let http_server = HttpServer::auto(Executor::graceful(guard.clone())).service(router);

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| CloudPinError::Bus(crate::error::BusError::new(format!("bind {bind_addr}: {e}"))))?
        .with_state(state);

    if tls_enabled {
        let tls_config = tls::build_server_tls_config(&config.tls)?;
        let tcp_service = TlsAcceptorLayer::new(tls_config).into_layer(http_server);
        listener.serve_graceful(guard, tcp_service).await;
    } else {
        warn!("serving the WebSocket endpoint without TLS (tls.insecure = true)");
        listener.serve_graceful(guard, http_server).await;
    }

    Ok(())
}

/// Reject an upgrade with `auth::check_api_key`'s error mapped to the
/// supervisor's `AuthError` kind, for callers (e.g. tests) that want to
/// exercise the check without spinning up a TCP listener.
pub fn authenticate(req: &Request, expected: &str) -> Result<(), CloudPinError> {
    auth::check_api_key(req, expected).map_err(|_| CloudPinError::Auth(AuthError::new("Invalid API key")))
}

pub fn current(slot: &ConnectionSlot) -> Option<ActiveConnection> {
    slot.current()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rama::http::Request;

    #[test]
    fn authenticate_rejects_missing_or_wrong_key() {
        let req = Request::builder()
            .uri("http://example.test/")
            .body(rama::http::Body::empty())
            .unwrap();
        assert!(authenticate(&req, "expected-key").is_err());
    }
}
