//! # ttybridge Protocol Library
//!
//! This crate defines the event-channel contract between ttybridge clients
//! and the daemon: the named events, their payloads, and the JSON encoding
//! used on the wire.
//!
//! ## Overview
//!
//! A client drives an interactive shell by exchanging tagged JSON events
//! with the daemon over a duplex channel:
//!
//! ```text
//! client ──── create_terminal ───────────────▶ daemon
//! client ◀─── terminal_created{session_id} ─── daemon
//! client ──── terminal_input{input} ─────────▶ daemon
//! client ◀─── terminal_output{data, id} ────── daemon
//! client ──── terminal_resize{rows, cols} ───▶ daemon
//! client ◀─── terminal_closed{session_id} ──── daemon
//! ```
//!
//! The transport (how bytes move) is not this crate's concern; any channel
//! that carries UTF-8 text frames and reports connect/disconnect can host
//! the contract.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientEvent, TerminalInput};
//!
//! let event = ClientEvent::TerminalInput(TerminalInput {
//!     input: "echo hi\n".to_string(),
//! });
//! let json = event.to_json().unwrap();
//! let decoded = ClientEvent::from_json(&json).unwrap();
//! assert_eq!(event, decoded);
//! ```
//!
//! ## Modules
//!
//! - [`events`]: Event definitions and JSON helpers
//! - [`error`]: Error types

pub mod error;
pub mod events;

pub use error::{ProtocolError, Result};
pub use events::{
    ClientEvent, ConnectionId, ErrorEvent, ServerEvent, SessionId, TerminalClosed,
    TerminalCreated, TerminalInput, TerminalOutput, TerminalResize,
};
