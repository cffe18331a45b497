//! PTY-backed terminal sessions.
//!
//! This module provides the core of the engine: one session owns a
//! pseudo-terminal controller handle and the shell process bound to its
//! follower end, and supervises the background task that streams the
//! shell's output onto the connection's event queue.

use std::io::{Read, Write};
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use protocol::{ConnectionId, ServerEvent, SessionId, TerminalClosed, TerminalOutput};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::output::OutputSender;
use crate::config::TerminalConfig;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Pseudo-terminal allocation or shell spawn failure.
    #[error("failed to launch shell: {0}")]
    Launch(String),

    /// Failed to write input to the terminal.
    #[error("failed to write to terminal: {0}")]
    Write(String),

    /// Failed to resize the terminal.
    #[error("failed to resize terminal: {0}")]
    Resize(String),

    /// The session cap has been reached.
    #[error("session limit reached ({0} active)")]
    MaxSessions(usize),
}

/// How long the shell gets to exit after SIGTERM before the reaper gives up.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// One reader-loop iteration's result.
enum ReadOutcome {
    /// Poll timed out or the read would block; check the flag and re-poll.
    Idle,
    /// A chunk of output.
    Data(Vec<u8>),
    /// The process side of the terminal closed.
    Eof,
}

/// A terminal session: one pseudo-terminal and one shell process.
///
/// The session exposes write, resize and close to the inbound-event side,
/// and runs a background reader task that forwards output to the owning
/// connection's event queue. The controller handle is invalidated exactly
/// once, on close or when the reader observes end-of-stream, and every
/// operation after that is a no-op.
pub struct TerminalSession {
    /// Unique session identifier, returned in `terminal_created`.
    id: SessionId,

    /// Connection that owns this session.
    conn_id: ConnectionId,

    /// The PTY controller handle. None once closed.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,

    /// Writer for the controller side. None once closed.
    writer: Mutex<Option<Box<dyn Write + Send>>>,

    /// The shell process.
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,

    /// Shell process ID, used only for termination signaling.
    pid: Option<u32>,

    /// Raw controller descriptor for readiness polling.
    raw_fd: Option<RawFd>,

    /// Handle validity flag, shared with the reader loop. Cleared by close
    /// and by the reader on end-of-stream; checked before every write,
    /// resize and read.
    open: Arc<AtomicBool>,

    /// Close-once guard, separate from `open` so that a close following a
    /// reader-observed EOF still releases the handle and reaps the shell.
    closed: AtomicBool,

    /// Last applied terminal size as (rows, cols).
    size: std::sync::Mutex<(u16, u16)>,

    /// The reader task, joined on close.
    reader: Mutex<Option<JoinHandle<()>>>,

    /// Reader poll timeout; bounds how long close waits for the reader.
    poll_interval: Duration,

    /// Chunk size for terminal reads.
    read_buffer_size: usize,
}

impl TerminalSession {
    /// Spawns a shell on a fresh pseudo-terminal for the given connection.
    ///
    /// The shell runs in its own session group with the follower end as its
    /// controlling terminal. Its environment is inherited from the daemon
    /// with `TERM` overridden and, if configured, an auxiliary tool
    /// directory appended to `PATH`. The follower end is released in the
    /// parent and the controller descriptor is switched to non-blocking.
    ///
    /// The reader task is not started here; call [`start_reader`] once the
    /// connection's output queue exists.
    ///
    /// [`start_reader`]: TerminalSession::start_reader
    pub fn spawn(conn_id: ConnectionId, config: &TerminalConfig) -> Result<Self, SessionError> {
        let id = Uuid::new_v4().to_string();

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.shell);
        cmd.env("TERM", &config.term);
        if let Some(extra) = &config.extra_path {
            let path = std::env::var("PATH").unwrap_or_default();
            cmd.env("PATH", format!("{}:{}", path, extra.display()));
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        // The follower end belongs to the shell now.
        drop(pair.slave);

        let pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let raw_fd = pair.master.as_raw_fd();
        if let Some(fd) = raw_fd {
            set_nonblocking(fd);
        }

        tracing::info!(
            session_id = %id,
            conn_id = %conn_id,
            pid = ?pid,
            shell = %config.shell,
            "Spawned shell on pseudo-terminal"
        );

        Ok(TerminalSession {
            id,
            conn_id,
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(writer)),
            child: Arc::new(Mutex::new(child)),
            pid,
            raw_fd,
            open: Arc::new(AtomicBool::new(true)),
            closed: AtomicBool::new(false),
            size: std::sync::Mutex::new((config.rows, config.cols)),
            reader: Mutex::new(None),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            read_buffer_size: config.read_buffer_size,
        })
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the owning connection's ID.
    pub fn conn_id(&self) -> &ConnectionId {
        &self.conn_id
    }

    /// Returns the shell's process ID, if known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the last applied terminal size as (rows, cols).
    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap()
    }

    /// Returns the reader's poll timeout.
    ///
    /// Cleanup after close is bounded by a small multiple of this value.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns whether the controller handle is still valid.
    ///
    /// False once the session was closed or the reader observed
    /// end-of-stream.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queries the live window size of the pseudo-terminal.
    ///
    /// Returns None once the session is closed.
    pub async fn pty_size(&self) -> Option<(u16, u16)> {
        let guard = self.master.lock().await;
        let master = guard.as_ref()?;
        master.get_size().ok().map(|s| (s.rows, s.cols))
    }

    /// Writes raw bytes to the terminal; they appear to the shell as
    /// keyboard input.
    ///
    /// A closed session swallows the write: post-close input is a no-op,
    /// not an error.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.is_open() {
            return Ok(());
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };

        writer
            .write_all(data)
            .and_then(|()| writer.flush())
            .map_err(|e| SessionError::Write(e.to_string()))
    }

    /// Applies a new window size to the pseudo-terminal.
    ///
    /// No-op once the session is closed.
    pub async fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        if !self.is_open() {
            return Ok(());
        }

        let guard = self.master.lock().await;
        let Some(master) = guard.as_ref() else {
            return Ok(());
        };

        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Resize(e.to_string()))?;

        *self.size.lock().unwrap() = (rows, cols);

        tracing::debug!(
            session_id = %self.id,
            rows = rows,
            cols = cols,
            "Resized terminal"
        );

        Ok(())
    }

    /// Starts the output reader task.
    ///
    /// The task polls the controller descriptor with a bounded timeout,
    /// forwards output chunks to the connection's event queue as lossy
    /// UTF-8 text, and exits on end-of-stream, I/O error, or invalidation
    /// of the handle. On exit it clears the validity flag and emits a final
    /// `terminal_closed` notification; removing the registry entry is the
    /// registry's job, not the reader's.
    pub async fn start_reader(&self, output: OutputSender) {
        let reader = {
            let guard = self.master.lock().await;
            let Some(master) = guard.as_ref() else {
                return;
            };
            match master.try_clone_reader() {
                Ok(reader) => reader,
                Err(e) => {
                    tracing::error!(
                        session_id = %self.id,
                        error = %e,
                        "Failed to clone terminal reader"
                    );
                    self.open.store(false, Ordering::SeqCst);
                    return;
                }
            }
        };

        let session_id = self.id.clone();
        let open = Arc::clone(&self.open);
        let raw_fd = self.raw_fd;
        let poll_ms = self.poll_interval.as_millis().min(1000) as u16;
        let buffer_size = self.read_buffer_size;

        let handle = tokio::spawn(async move {
            // Wrap the reader for the blocking iterations
            let reader = Arc::new(std::sync::Mutex::new(reader));

            loop {
                if !open.load(Ordering::SeqCst) {
                    tracing::debug!(session_id = %session_id, "Reader stopping: handle closed");
                    break;
                }

                let reader_clone = Arc::clone(&reader);
                let result = tokio::task::spawn_blocking(move || {
                    read_chunk(reader_clone, raw_fd, poll_ms, buffer_size)
                })
                .await;

                match result {
                    Ok(Ok(ReadOutcome::Idle)) => continue,
                    Ok(Ok(ReadOutcome::Data(data))) => {
                        let text = String::from_utf8_lossy(&data).into_owned();
                        output.send(ServerEvent::TerminalOutput(TerminalOutput {
                            data: text,
                            session_id: session_id.clone(),
                        }));
                    }
                    Ok(Ok(ReadOutcome::Eof)) => {
                        tracing::info!(session_id = %session_id, "Terminal EOF - shell exited");
                        break;
                    }
                    Ok(Err(e)) => {
                        if open.load(Ordering::SeqCst) {
                            tracing::error!(
                                session_id = %session_id,
                                error = %e,
                                "Error reading from terminal"
                            );
                        }
                        break;
                    }
                    Err(e) => {
                        tracing::error!(
                            session_id = %session_id,
                            error = %e,
                            "Reader task panicked"
                        );
                        break;
                    }
                }
            }

            open.store(false, Ordering::SeqCst);
            output.send(ServerEvent::TerminalClosed(TerminalClosed {
                session_id: session_id.clone(),
            }));
        });

        *self.reader.lock().await = Some(handle);
    }

    /// Tears the session down. Idempotent.
    ///
    /// Signals the shell with SIGTERM (once, and only if it has not already
    /// exited), waits for the reader to observe the invalidated handle,
    /// releases the controller handle, and reaps the process off the async
    /// path. Concurrent writes and resizes observe the cleared flag and
    /// become no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Invalidate the handle first so every other context sees it.
        self.open.store(false, Ordering::SeqCst);

        // Graceful termination signal, unless the shell is already gone.
        {
            let mut child = self.child.lock().await;
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(
                        session_id = %self.id,
                        code = status.exit_code(),
                        "Shell already exited"
                    );
                }
                _ => {
                    if let Some(pid) = self.pid {
                        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                            tracing::debug!(
                                session_id = %self.id,
                                error = %e,
                                "SIGTERM delivery failed"
                            );
                        }
                    }
                }
            }
        }

        // The reader observes the cleared flag within one poll interval.
        if let Some(handle) = self.reader.lock().await.take() {
            let grace = self.poll_interval * 4 + Duration::from_millis(100);
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!(session_id = %self.id, "Reader did not stop in time, detaching");
            }
        }

        // Release the controller side. The handle is never touched again.
        self.writer.lock().await.take();
        self.master.lock().await.take();

        // Reap the shell without stalling the close path.
        let child = Arc::clone(&self.child);
        let session_id = self.id.clone();
        tokio::task::spawn_blocking(move || {
            let mut child = child.blocking_lock();
            let deadline = std::time::Instant::now() + REAP_TIMEOUT;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        tracing::debug!(
                            session_id = %session_id,
                            code = status.exit_code(),
                            "Shell reaped"
                        );
                        break;
                    }
                    Ok(None) => {
                        if std::time::Instant::now() >= deadline {
                            tracing::warn!(
                                session_id = %session_id,
                                "Shell did not exit after SIGTERM"
                            );
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    Err(e) => {
                        tracing::debug!(
                            session_id = %session_id,
                            error = %e,
                            "Failed to reap shell"
                        );
                        break;
                    }
                }
            }
        });

        tracing::info!(session_id = %self.id, conn_id = %self.conn_id, "Session closed");
    }
}

/// One bounded-poll read iteration against the terminal.
///
/// Waits for readability for at most `poll_ms`, then reads a single chunk.
fn read_chunk(
    reader: Arc<std::sync::Mutex<Box<dyn Read + Send>>>,
    raw_fd: Option<RawFd>,
    poll_ms: u16,
    buffer_size: usize,
) -> std::io::Result<ReadOutcome> {
    if let Some(fd) = raw_fd {
        // SAFETY: the descriptor stays open until the master handle is
        // dropped, which happens only after the reader task has exited.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(poll_ms)) {
            Ok(0) => return Ok(ReadOutcome::Idle),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                if !revents.intersects(PollFlags::POLLIN) {
                    // POLLHUP/POLLERR with no pending data: the process
                    // side is gone
                    return Ok(ReadOutcome::Eof);
                }
            }
            Err(Errno::EINTR) => return Ok(ReadOutcome::Idle),
            Err(e) => return Err(std::io::Error::from(e)),
        }
    }

    let mut buffer = vec![0u8; buffer_size];
    let mut reader = reader.lock().unwrap();
    match reader.read(&mut buffer) {
        Ok(0) => Ok(ReadOutcome::Eof),
        Ok(n) => {
            buffer.truncate(n);
            Ok(ReadOutcome::Data(buffer))
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(ReadOutcome::Idle),
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(ReadOutcome::Idle),
        // Linux reports EIO on the controller side once the follower closes
        Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => Ok(ReadOutcome::Eof),
        Err(e) => Err(e),
    }
}

/// Switches a descriptor to non-blocking mode, preserving its other flags.
fn set_nonblocking(fd: RawFd) {
    // SAFETY: fcntl on a descriptor we own; preserves existing flags and
    // adds O_NONBLOCK.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}
