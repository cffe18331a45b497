//! Event definitions for the ttybridge channel.
//!
//! This module defines the named events exchanged between a client and the
//! daemon over the duplex event channel. Events are serialized as JSON
//! objects tagged with the event name:
//!
//! ```json
//! {"event": "terminal_input", "data": {"input": "ls -la\n"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Opaque identifier for one client connection.
///
/// Assigned by the transport when the connection is accepted and stable for
/// the connection's lifetime. The session registry keys sessions by it.
pub type ConnectionId = String;

/// Unique identifier for a terminal session.
pub type SessionId = String;

/// Events sent from a client to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Request a shell session for this connection. Idempotent: a repeat
    /// request is acknowledged with the existing session's identifier.
    CreateTerminal,
    /// Raw keyboard input for the session's shell.
    TerminalInput(TerminalInput),
    /// Terminal window size change.
    TerminalResize(TerminalResize),
}

/// Events sent from the daemon back to a client.
///
/// Outbound events are addressed: each is delivered only to the connection
/// that owns the session named by `session_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Acknowledgment of `create_terminal`.
    TerminalCreated(TerminalCreated),
    /// A chunk of terminal output.
    TerminalOutput(TerminalOutput),
    /// The session's shell process has gone away.
    TerminalClosed(TerminalClosed),
    /// A request could not be carried out.
    Error(ErrorEvent),
}

/// Keyboard input payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalInput {
    /// Text to feed to the shell as keystrokes, UTF-8.
    pub input: String,
}

/// Window size change payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalResize {
    /// Terminal height in rows.
    pub rows: u16,
    /// Terminal width in columns.
    pub cols: u16,
}

/// Session creation acknowledgment payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalCreated {
    /// Identifier of the (new or already existing) session.
    pub session_id: SessionId,
}

/// Terminal output payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalOutput {
    /// Output text, decoded from the shell's byte stream as lossy UTF-8.
    pub data: String,
    /// Session the output belongs to.
    pub session_id: SessionId,
}

/// Session termination notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalClosed {
    /// Session that terminated.
    pub session_id: SessionId,
}

/// Failure notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Human-readable description of the failure.
    pub message: String,
}

// ============================================================================
// Serialization helpers
// ============================================================================

impl ClientEvent {
    /// Serialize the event to its JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize an event from its JSON wire form.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text.trim()).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

impl ServerEvent {
    /// Serialize the event to its JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize an event from its JSON wire form.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text.trim()).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
