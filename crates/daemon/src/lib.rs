//! # ttybridge Daemon Library
//!
//! This crate provides the daemon (server) side of ttybridge: an engine
//! that gives each connected client an interactive shell on a
//! pseudo-terminal, multiplexed over a WebSocket event channel.
//!
//! ## Overview
//!
//! The daemon owns one terminal session per connection:
//!
//! - **Session Engine**: spawn a shell on a PTY, stream its output, apply
//!   input and resize events, tear it down on disconnect
//! - **Session Registry**: route events for many concurrent connections to
//!   the right session
//! - **Event Server**: WebSocket host speaking the `protocol` crate's
//!   JSON event contract
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Event Server                          │
//! │   one task per connection: decode → route → reply            │
//! ├──────────────────────────────────────────────────────────────┤
//! │                        Event Router                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                      Session Registry                        │
//! │        ConnectionId ──▶ TerminalSession (guarded map)        │
//! ├──────────────────────────────────────────────────────────────┤
//! │   TerminalSession            TerminalSession                 │
//! │   ├── PTY controller         ├── PTY controller              │
//! │   ├── shell process          ├── shell process               │
//! │   └── reader task ──▶ per-connection outbound event queue    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use daemon::config::Config;
//! use daemon::server::EventServer;
//! use daemon::session::SessionRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let registry = Arc::new(SessionRegistry::new(config.terminal.clone()));
//!     let server = EventServer::bind(&config.server.listen_addr, Arc::clone(&registry)).await?;
//!     server.run().await?;
//!
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`session`]: PTY sessions, output queues, and the registry
//! - [`router`]: Inbound event dispatch
//! - [`server`]: WebSocket event host

pub mod config;
pub mod router;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{OutputSender, SessionError, SessionRegistry, TerminalSession};

// Re-export router types for convenience
pub use router::{EventRouter, RouterError, RouterResult};

// Re-export server types for convenience
pub use server::EventServer;
