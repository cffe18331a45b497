//! Event router for dispatching inbound client events.
//!
//! This module provides the `EventRouter` struct that receives decoded
//! client events and routes them to the session registry, producing the
//! response event to deliver back to the client where the contract calls
//! for one.

use std::sync::Arc;

use protocol::{ClientEvent, ConnectionId, ErrorEvent, ServerEvent, TerminalCreated};
use tracing::{debug, info};

use crate::session::{OutputSender, SessionError, SessionRegistry};

/// Result type for router operations.
pub type RouterResult = Result<Option<ServerEvent>, RouterError>;

/// Errors that can occur during event routing.
///
/// Only session launch problems ever surface here; input and resize faults
/// are absorbed inside the registry per the best-effort contract.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Session-related error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

impl RouterError {
    /// Convert the error to an outbound `error` event.
    pub fn to_error_event(&self) -> ErrorEvent {
        ErrorEvent {
            message: self.to_string(),
        }
    }
}

/// Routes client events to the session registry.
///
/// The router is stateless apart from the registry handle; one instance
/// serves every connection.
pub struct EventRouter {
    /// Session registry for terminal operations.
    registry: Arc<SessionRegistry>,
}

impl EventRouter {
    /// Create a new event router backed by the given registry.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the registry this router dispatches into.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Route one inbound event for a connection.
    ///
    /// Returns `Ok(Some(response))` if a response should be sent back,
    /// `Ok(None)` if no response is needed, or `Err(error)` if the request
    /// failed in a way the client should hear about.
    ///
    /// The `output` sender is handed to newly created sessions so their
    /// reader loops can address events to this connection.
    pub async fn route(
        &self,
        conn_id: &ConnectionId,
        event: ClientEvent,
        output: &OutputSender,
    ) -> RouterResult {
        debug!(?event, %conn_id, "Routing event");

        match event {
            ClientEvent::CreateTerminal => self.handle_create_terminal(conn_id, output).await,
            ClientEvent::TerminalInput(input) => {
                self.registry.dispatch_input(conn_id, &input.input).await;
                Ok(None)
            }
            ClientEvent::TerminalResize(resize) => {
                self.registry
                    .dispatch_resize(conn_id, resize.rows, resize.cols)
                    .await;
                Ok(None)
            }
        }
    }

    async fn handle_create_terminal(
        &self,
        conn_id: &ConnectionId,
        output: &OutputSender,
    ) -> RouterResult {
        let session_id = self
            .registry
            .get_or_create(conn_id, output.clone())
            .await?;

        info!(%conn_id, %session_id, "Terminal ready");

        Ok(Some(ServerEvent::TerminalCreated(TerminalCreated {
            session_id,
        })))
    }
}
