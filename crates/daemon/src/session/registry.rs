//! Connection-to-session registry.
//!
//! The registry is the single source of truth for which connection owns
//! which terminal session, and the only entry point the transport layer
//! calls into. It guards the mapping against concurrent handler contexts
//! and owns session destruction.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use protocol::{ConnectionId, SessionId};
use tokio::sync::Mutex;

use super::output::OutputSender;
use super::pty::{SessionError, TerminalSession};
use crate::config::TerminalConfig;

/// Thread-safe registry mapping connections to live sessions.
///
/// Lookup and insert are made atomic by a creation mutex, so concurrent
/// `create_terminal` events for one connection spawn exactly one shell.
/// Individual sessions own their handles exclusively; the registry only
/// ever touches them through the session API.
pub struct SessionRegistry {
    /// Map of connection ID to session.
    sessions: DashMap<ConnectionId, Arc<TerminalSession>>,

    /// Serializes the lookup-and-insert in get_or_create.
    create_lock: Mutex<()>,

    /// Session settings applied to every spawn.
    config: TerminalConfig,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(config: TerminalConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            create_lock: Mutex::new(()),
            config,
        }
    }

    /// Returns the session for a connection, if one exists.
    fn get(&self, conn_id: &ConnectionId) -> Option<Arc<TerminalSession>> {
        self.sessions
            .get(conn_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the existing session's ID for this connection, or spawns a
    /// new session and starts its reader.
    ///
    /// Safe under concurrent invocation: the second caller for the same
    /// connection gets the first caller's session, never a second shell.
    pub async fn get_or_create(
        &self,
        conn_id: &ConnectionId,
        output: OutputSender,
    ) -> Result<SessionId, SessionError> {
        if let Some(existing) = self.get(conn_id) {
            tracing::debug!(
                conn_id = %conn_id,
                session_id = %existing.id(),
                "Session already exists"
            );
            return Ok(existing.id().clone());
        }

        let _guard = self.create_lock.lock().await;

        // Re-check under the lock: another handler may have won the race
        if let Some(existing) = self.get(conn_id) {
            return Ok(existing.id().clone());
        }

        if self.sessions.len() >= self.config.max_sessions {
            return Err(SessionError::MaxSessions(self.sessions.len()));
        }

        let session = Arc::new(TerminalSession::spawn(conn_id.clone(), &self.config)?);
        session.start_reader(output).await;

        let session_id = session.id().clone();
        self.sessions.insert(conn_id.clone(), session);

        tracing::info!(
            conn_id = %conn_id,
            session_id = %session_id,
            "Registered terminal session"
        );

        Ok(session_id)
    }

    /// Forwards keyboard input to a connection's session.
    ///
    /// Stale connection IDs and write faults are absorbed here: a dropped
    /// keystroke must not take the channel down.
    pub async fn dispatch_input(&self, conn_id: &ConnectionId, input: &str) {
        let Some(session) = self.get(conn_id) else {
            tracing::debug!(conn_id = %conn_id, "Input for unknown session ignored");
            return;
        };

        if let Err(e) = session.write(input.as_bytes()).await {
            tracing::debug!(conn_id = %conn_id, error = %e, "Dropped terminal input");
        }
    }

    /// Forwards a window size change to a connection's session.
    ///
    /// Same no-op semantics as input dispatch.
    pub async fn dispatch_resize(&self, conn_id: &ConnectionId, rows: u16, cols: u16) {
        let Some(session) = self.get(conn_id) else {
            tracing::debug!(conn_id = %conn_id, "Resize for unknown session ignored");
            return;
        };

        if let Err(e) = session.resize(rows, cols).await {
            tracing::debug!(conn_id = %conn_id, error = %e, "Dropped terminal resize");
        }
    }

    /// Tears down a connection's session and forgets the mapping.
    ///
    /// The entry is deleted only after the session has released its handle
    /// and signaled its shell. Safe to call for connections that never
    /// created a session.
    pub async fn remove(&self, conn_id: &ConnectionId) {
        let Some(session) = self.get(conn_id) else {
            return;
        };

        session.close().await;
        self.sessions.remove(conn_id);

        tracing::info!(
            conn_id = %conn_id,
            session_id = %session.id(),
            "Session removed"
        );
    }

    /// Removes sessions whose reader loop has terminated.
    ///
    /// The reader never mutates the registry itself; this sweep is how the
    /// registry observes end-of-stream and I/O-fault terminations. Closing
    /// the dead session releases its handle and reaps the shell.
    pub async fn sweep(&self) {
        let dead: Vec<(ConnectionId, Arc<TerminalSession>)> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_open())
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (conn_id, session) in dead {
            session.close().await;
            self.sessions.remove(&conn_id);
            tracing::info!(
                conn_id = %conn_id,
                session_id = %session.id(),
                "Swept terminated session"
            );
        }
    }

    /// Starts a background task that periodically sweeps terminated
    /// sessions.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                registry.sweep().await;
            }
        });
    }

    /// Closes every session and drains the registry. Called at daemon
    /// shutdown.
    pub async fn shutdown(&self) {
        let all: Vec<(ConnectionId, Arc<TerminalSession>)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (conn_id, session) in all {
            session.close().await;
            self.sessions.remove(&conn_id);
        }

        tracing::info!("Session registry drained");
    }

    /// Returns whether a connection currently owns a session.
    pub fn contains(&self, conn_id: &ConnectionId) -> bool {
        self.sessions.contains_key(conn_id)
    }

    /// Returns the number of registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}
