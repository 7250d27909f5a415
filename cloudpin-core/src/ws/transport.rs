//! A small `WsTransport` seam over `rama`'s client/server WebSocket
//! handles, so the supervisor and pumps (C3/C4/C5) do not need to know
//! which side of the handshake they are on.
//!
//! Grounded in `examples/ws_chat_server.rs`'s `ws.recv_message()` /
//! `ws.send_message(msg)` loop (`ServerWebSocket`) and
//! `rama-cli/src/cmd/send/http/ws/client.rs`'s `ClientWebSocket` produced by
//! `HttpClientWebSocketExt::websocket_with_request(..).handshake(..)`.

use crate::error::{CloudPinError, TransientNetworkError};
use bytes::Bytes;
use rama::http::ws::{
    handshake::{client::ClientWebSocket, server::ServerWebSocket},
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message, ProtocolError, Utf8Bytes,
};

/// Close codes CloudPin issues itself, per §4.4/§4.5.
pub mod close_code {
    use rama::http::ws::protocol::frame::coding::CloseCode;

    pub const POLICY_VIOLATION: CloseCode = CloseCode::Policy;
    pub const TRY_AGAIN_LATER: CloseCode = CloseCode::Again;
}

/// What [`WsTransport::recv`] handed back for one incoming WS frame.
#[derive(Debug)]
pub enum Incoming {
    /// A binary frame -- the only kind the inbound pump (C4) keeps.
    Binary(Bytes),
    /// Anything else (text, ping/pong, a received close): dropped by the
    /// caller, per §4.4's "If frame is not binary: drop."
    Ignored,
    /// The peer closed the connection, or the underlying transport errored
    /// in a way that means this connection is over.
    Closed,
}

fn classify_protocol_error(err: ProtocolError) -> CloudPinError {
    if err.is_connection_error() {
        CloudPinError::Transient(TransientNetworkError::new(format!(
            "websocket connection dropped: {err}"
        )))
    } else {
        CloudPinError::Other(Box::new(err))
    }
}

/// One WebSocket connection, from the supervisor's point of view: send a
/// binary frame, receive the next frame, or close with a status code.
pub trait WsTransport: Send {
    async fn send_binary(&mut self, payload: Bytes) -> Result<(), CloudPinError>;
    async fn recv(&mut self) -> Result<Incoming, CloudPinError>;
    async fn close(&mut self, code: CloseCode, reason: Utf8Bytes) -> Result<(), CloudPinError>;
}

fn close_message(code: CloseCode, reason: Utf8Bytes) -> Message {
    Message::Close(Some(CloseFrame { code, reason }))
}

/// Client-dialed WebSocket handle.
pub struct ClientTransport(pub ClientWebSocket);

impl WsTransport for ClientTransport {
    async fn send_binary(&mut self, payload: Bytes) -> Result<(), CloudPinError> {
        self.0
            .send_message(Message::Binary(payload))
            .await
            .map_err(classify_protocol_error)
    }

    async fn recv(&mut self) -> Result<Incoming, CloudPinError> {
        match self.0.recv_message().await {
            Ok(Message::Binary(payload)) => Ok(Incoming::Binary(payload)),
            Ok(Message::Close(_)) => Ok(Incoming::Closed),
            Ok(_) => Ok(Incoming::Ignored),
            Err(err) if err.is_connection_error() => Ok(Incoming::Closed),
            Err(err) => Err(classify_protocol_error(err)),
        }
    }

    async fn close(&mut self, code: CloseCode, reason: Utf8Bytes) -> Result<(), CloudPinError> {
        let _ = self.0.send_message(close_message(code, reason)).await;
        Ok(())
    }
}

/// Server-accepted WebSocket handle.
pub struct ServerTransport(pub ServerWebSocket);

impl WsTransport for ServerTransport {
    async fn send_binary(&mut self, payload: Bytes) -> Result<(), CloudPinError> {
        self.0
            .send_message(Message::Binary(payload))
            .await
            .map_err(classify_protocol_error)
    }

    async fn recv(&mut self) -> Result<Incoming, CloudPinError> {
        match self.0.recv_message().await {
            Ok(Message::Binary(payload)) => Ok(Incoming::Binary(payload)),
            Ok(Message::Close(_)) => Ok(Incoming::Closed),
            Ok(_) => Ok(Incoming::Ignored),
            Err(err) if err.is_connection_error() => Ok(Incoming::Closed),
            Err(err) => Err(classify_protocol_error(err)),
        }
    }

    async fn close(&mut self, code: CloseCode, reason: Utf8Bytes) -> Result<(), CloudPinError> {
        let _ = self.0.send_message(close_message(code, reason)).await;
        Ok(())
    }
}
