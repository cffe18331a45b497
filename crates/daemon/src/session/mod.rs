//! Terminal session engine.
//!
//! This module provides PTY-backed shell sessions, the per-connection
//! output queue, and the registry that routes events for many concurrent
//! connections to the right session.

pub mod output;
pub mod pty;
pub mod registry;

pub use output::OutputSender;
pub use pty::{SessionError, TerminalSession};
pub use registry::SessionRegistry;
