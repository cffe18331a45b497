//! WebSocket event server.
//!
//! This module hosts the terminal engine behind a WebSocket endpoint. Each
//! accepted connection gets an opaque connection ID, an outbound event
//! queue, and a handler task that decodes inbound JSON events and routes
//! them into the session registry. Closing the socket, however it happens,
//! tears the connection's session down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use protocol::{ClientEvent, ConnectionId, ErrorEvent, ServerEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::router::EventRouter;
use crate::session::{OutputSender, SessionRegistry};

/// WebSocket server hosting the terminal event channel.
pub struct EventServer {
    listener: TcpListener,
    router: Arc<EventRouter>,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

impl EventServer {
    /// Binds the listener and wires it to the given registry.
    pub async fn bind(addr: &str, registry: Arc<SessionRegistry>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let router = Arc::new(EventRouter::new(Arc::clone(&registry)));

        let local = listener.local_addr()?;
        info!(addr = %local, "Event server listening");

        Ok(Self {
            listener,
            router,
            registry,
            shutdown: CancellationToken::new(),
        })
    }

    /// Returns the bound address (useful when binding port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns a token that stops the accept loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accepts connections until the shutdown token fires.
    ///
    /// Each connection is served on its own task; a connection failure
    /// never takes the accept loop down.
    pub async fn run(self) -> io::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Event server shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let router = Arc::clone(&self.router);
                            let registry = Arc::clone(&self.registry);
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, peer, router, registry, shutdown).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Serves one client connection until it disconnects.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<EventRouter>,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let conn_id: ConnectionId = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, %peer, "Client connected");

    let (mut ws_sink, mut ws_stream) = ws.split();
    let (output, mut outbound_rx) = OutputSender::channel(conn_id.clone());

    // Outbound pump: drain the connection's event queue into the socket.
    let pump_conn_id = conn_id.clone();
    let pump = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            match event.to_json() {
                Ok(json) => {
                    if let Err(e) = ws_sink.send(WsMessage::Text(json)).await {
                        debug!(conn_id = %pump_conn_id, error = %e, "Outbound send failed");
                        break;
                    }
                }
                Err(e) => {
                    warn!(conn_id = %pump_conn_id, error = %e, "Failed to encode event");
                }
            }
        }
        let _ = ws_sink.close().await;
    });

    // Inbound loop: decode and route until disconnect or shutdown.
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = ws_stream.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        handle_event(&conn_id, &text, &router, &output).await;
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {
                        // Binary, ping and pong frames carry no events
                    }
                    Err(e) => {
                        debug!(conn_id = %conn_id, error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        }
    }

    // Disconnect: tear down the session before forgetting the connection.
    registry.remove(&conn_id).await;

    drop(output);
    let _ = pump.await;

    info!(conn_id = %conn_id, "Client disconnected");
}

/// Decodes one inbound frame and routes it.
async fn handle_event(
    conn_id: &ConnectionId,
    text: &str,
    router: &EventRouter,
    output: &OutputSender,
) {
    let event = match ClientEvent::from_json(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(conn_id = %conn_id, error = %e, "Ignoring malformed event");
            output.send(ServerEvent::Error(ErrorEvent {
                message: e.to_string(),
            }));
            return;
        }
    };

    match router.route(conn_id, event, output).await {
        Ok(Some(response)) => {
            output.send(response);
        }
        Ok(None) => {}
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "Request failed");
            output.send(ServerEvent::Error(e.to_error_event()));
        }
    }
}
