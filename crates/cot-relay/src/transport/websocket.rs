//! WebSocket listener using tokio-tungstenite.
//!
//! Subscribers join a broadcast room by the path they upgrade on:
//! `ws://host:port/debugger` joins `/debugger`. Paths that are not a known
//! room are refused with 404 during the handshake. Each connection receives a
//! `connected` welcome followed by one JSON text frame per relayed event.

use crate::relay::RoomHub;
use cot_core::{BroadcastFrame, ClientMessage, RelayError, RelayResult, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Maximum size of a message accepted from a subscriber (1 MiB).
const MAX_CLIENT_MESSAGE_SIZE: usize = 1_048_576;

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
    /// Room selected by the upgrade request path.
    pub room: String,
}

/// Start the WebSocket listener.
///
/// Returns a receiver that yields accepted connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
    hub: Arc<RoomHub>,
) -> RelayResult<mpsc::Receiver<WebSocketConnection>> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| RelayError::Transport(format!("WS bind failed: {e}")))?;

    info!(addr = %bind_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let hub = Arc::clone(&hub);
                    tokio::spawn(async move {
                        match accept(stream, &hub).await {
                            Ok((ws_stream, room)) => {
                                debug!(remote = %addr, room = %room, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                    room,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok(rx)
}

/// Complete the upgrade, capturing the request path as the room. Paths
/// that do not name a known room get a 404.
async fn accept(
    stream: TcpStream,
    hub: &RoomHub,
) -> Result<(WebSocketStream<TcpStream>, String), tokio_tungstenite::tungstenite::Error> {
    let mut room = String::new();
    let callback = |req: &Request, resp: Response| {
        room = room_from_path(req.uri().path());
        if hub.is_known(&room) {
            Ok(resp)
        } else {
            let mut refused = ErrorResponse::new(Some(format!("unknown room: {room}")));
            *refused.status_mut() = StatusCode::NOT_FOUND;
            Err(refused)
        }
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    Ok((ws_stream, room))
}

/// Normalise an upgrade path into a room name.
pub fn room_from_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Serve one subscriber until it disconnects, then release its room.
pub async fn handle_subscriber(conn: WebSocketConnection, hub: Arc<RoomHub>) {
    let WebSocketConnection {
        mut ws_stream,
        remote_addr,
        room,
    } = conn;

    let rx = match hub.subscribe(&room) {
        Ok(rx) => rx,
        Err(e) => {
            warn!(remote = %remote_addr, room = %room, error = %e, "subscribe failed");
            let _ = ws_stream.close(None).await;
            return;
        }
    };
    info!(
        remote = %remote_addr,
        room = %room,
        subscribers = hub.subscriber_count(&room),
        "subscriber connected"
    );

    serve(&mut ws_stream, rx, remote_addr, &room).await;

    if let Err(e) = hub.release(&room) {
        warn!(room = %room, error = %e, "room release failed");
    }
    info!(remote = %remote_addr, room = %room, "subscriber disconnected");
}

/// Forward room frames and answer client messages. Consumes the receiver so
/// the subscription ends with the connection.
async fn serve(
    ws_stream: &mut WebSocketStream<TcpStream>,
    mut rx: broadcast::Receiver<BroadcastFrame>,
    remote_addr: SocketAddr,
    room: &str,
) {
    let welcome = ServerMessage::Connected {
        room: room.to_string(),
    };
    if send_json(ws_stream, &welcome).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(frame) => {
                        if send_frame(ws_stream, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(remote = %remote_addr, room = %room, skipped, "subscriber lagging, frames dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_CLIENT_MESSAGE_SIZE {
                            warn!(remote = %remote_addr, bytes = text.len(), "client message too large");
                            break;
                        }
                        match ClientMessage::parse(&text) {
                            ClientMessage::Ping => {
                                if send_json(ws_stream, &ServerMessage::Pong).await.is_err() {
                                    break;
                                }
                            }
                            ClientMessage::Message { data } => {
                                info!(remote = %remote_addr, room = %room, message = %data, "message received");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Pings are answered by tungstenite; binary and pong
                        // frames carry nothing for the relay.
                        continue;
                    }
                    Some(Err(e)) => {
                        debug!(remote = %remote_addr, error = %e, "WS recv failed");
                        break;
                    }
                }
            }
        }
    }
}

async fn send_frame(ws: &mut WebSocketStream<TcpStream>, frame: &BroadcastFrame) -> RelayResult<()> {
    send_json(ws, frame).await
}

/// Helper: send a value as one JSON text message.
async fn send_json<T: serde::Serialize>(
    ws: &mut WebSocketStream<TcpStream>,
    value: &T,
) -> RelayResult<()> {
    let json = serde_json::to_string(value)?;
    ws.send(Message::Text(json))
        .await
        .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
}
