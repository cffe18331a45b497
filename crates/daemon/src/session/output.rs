//! Per-connection outbound event queue.
//!
//! Each connection owns one bounded channel through which its session's
//! events reach the transport task that writes to the client. Sending never
//! blocks: when the client cannot keep up and the queue fills, chunks are
//! dropped rather than stalling the session's reader loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use protocol::{ConnectionId, ServerEvent};
use tokio::sync::mpsc;

/// Default queue capacity for outbound events.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Sending half of a connection's outbound event queue.
///
/// Cheap to clone; every clone feeds the same connection. Held by the
/// session's reader loop and by the inbound handler that produces
/// acknowledgments.
#[derive(Clone)]
pub struct OutputSender {
    /// Connection the queue delivers to.
    conn_id: ConnectionId,
    /// Bounded sender for outbound events.
    tx: mpsc::Sender<ServerEvent>,
    /// Events dropped because the queue was full.
    dropped: Arc<AtomicU64>,
    /// Whether the connection is currently experiencing backpressure.
    backpressured: Arc<AtomicBool>,
}

impl OutputSender {
    /// Creates a queue with the default capacity.
    ///
    /// Returns the sender and the receiver the transport drains.
    pub fn channel(conn_id: ConnectionId) -> (Self, mpsc::Receiver<ServerEvent>) {
        Self::with_capacity(conn_id, DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a queue with a specific capacity.
    pub fn with_capacity(
        conn_id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sender = OutputSender {
            conn_id,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            backpressured: Arc::new(AtomicBool::new(false)),
        };
        (sender, rx)
    }

    /// Returns the connection this queue delivers to.
    pub fn conn_id(&self) -> &ConnectionId {
        &self.conn_id
    }

    /// Attempts to enqueue an event for delivery.
    ///
    /// Uses try_send to avoid blocking. If the queue is full, the event is
    /// dropped and the backpressure flag is set.
    ///
    /// Returns true if the event was enqueued, false if dropped.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                if self.backpressured.load(Ordering::Relaxed) {
                    self.backpressured.store(false, Ordering::Relaxed);
                    tracing::debug!(
                        conn_id = %self.conn_id,
                        "Connection recovered from backpressure"
                    );
                }
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.backpressured.load(Ordering::Relaxed) {
                    self.backpressured.store(true, Ordering::Relaxed);
                    tracing::warn!(
                        conn_id = %self.conn_id,
                        dropped = self.dropped.load(Ordering::Relaxed),
                        "Connection is backpressured, dropping events"
                    );
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Client gone; the session will be torn down shortly
                tracing::trace!(conn_id = %self.conn_id, "Outbound queue closed");
                false
            }
        }
    }

    /// Number of events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the connection is currently backpressured.
    pub fn is_backpressured(&self) -> bool {
        self.backpressured.load(Ordering::Relaxed)
    }

    /// Whether the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{ErrorEvent, TerminalOutput};

    fn output_event(data: &str) -> ServerEvent {
        ServerEvent::TerminalOutput(TerminalOutput {
            data: data.to_string(),
            session_id: "s1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (sender, mut rx) = OutputSender::channel("conn-1".to_string());
        assert_eq!(sender.conn_id(), "conn-1");

        assert!(sender.send(output_event("hello")));
        let received = rx.recv().await.unwrap();
        assert_eq!(received, output_event("hello"));
        assert_eq!(sender.dropped(), 0);
    }

    #[tokio::test]
    async fn test_ordering_preserved() {
        let (sender, mut rx) = OutputSender::channel("conn-1".to_string());

        for i in 0..10 {
            sender.send(output_event(&format!("chunk-{}", i)));
        }
        for i in 0..10 {
            let received = rx.recv().await.unwrap();
            assert_eq!(received, output_event(&format!("chunk-{}", i)));
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (sender, _rx) = OutputSender::with_capacity("conn-1".to_string(), 2);

        assert!(sender.send(output_event("a")));
        assert!(sender.send(output_event("b")));
        assert!(!sender.send(output_event("c")));

        assert_eq!(sender.dropped(), 1);
        assert!(sender.is_backpressured());
    }

    #[tokio::test]
    async fn test_backpressure_recovery() {
        let (sender, mut rx) = OutputSender::with_capacity("conn-1".to_string(), 1);

        sender.send(output_event("a"));
        sender.send(output_event("b")); // dropped
        assert!(sender.is_backpressured());

        let _ = rx.recv().await;
        assert!(sender.send(output_event("c")));
        assert!(!sender.is_backpressured());
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let (sender, rx) = OutputSender::channel("conn-1".to_string());
        drop(rx);

        assert!(sender.is_closed());
        assert!(!sender.send(ServerEvent::Error(ErrorEvent {
            message: "nobody listening".to_string(),
        })));
        // Closed sends are not counted as drops
        assert_eq!(sender.dropped(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_queue() {
        let (sender, mut rx) = OutputSender::channel("conn-1".to_string());
        let clone = sender.clone();

        clone.send(output_event("via clone"));
        assert_eq!(rx.recv().await.unwrap(), output_event("via clone"));
    }
}
