use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vyn_types::events::ServerFrame;
use vyn_types::models::UserId;

use crate::error::TransportError;

/// Frames queued per connection before senders start waiting.
const OUTBOUND_QUEUE: usize = 256;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// A frame for a connection's writer task. If `written` is set, the writer
/// signals it once the socket accepted the frame.
#[derive(Debug)]
pub struct Outbound {
    pub frame: ServerFrame,
    pub written: Option<oneshot::Sender<()>>,
}

/// Sending half of one live connection. Cheap to clone; the writer task owns the receiver.
///
/// Closing goes through a separate token, not the frame queue, so a full
/// queue can never swallow the close request.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
                closed: CancellationToken::new(),
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Token the connection's tasks watch; cancelled by `close`.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Queue a frame without waiting for the write. Drops it if the queue is full.
    pub fn enqueue(&self, frame: ServerFrame) -> Result<(), TransportError> {
        self.tx
            .try_send(Outbound { frame, written: None })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Timeout,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    /// Queue a frame, waiting for queue space but not for the write itself.
    pub async fn send(&self, frame: ServerFrame) -> Result<(), TransportError> {
        self.tx
            .send(Outbound { frame, written: None })
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Queue a frame and wait until the writer confirms it reached the socket.
    pub async fn deliver(&self, frame: ServerFrame, timeout: Duration) -> Result<(), TransportError> {
        let (written_tx, written_rx) = oneshot::channel();

        let attempt = async {
            self.tx
                .send(Outbound {
                    frame,
                    written: Some(written_tx),
                })
                .await
                .map_err(|_| TransportError::Closed)?;
            written_rx.await.map_err(|_| TransportError::WriteFailed)?;
            Ok::<_, TransportError>(())
        };

        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Ask the connection to close its socket and stop reading. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

/// Who is online, and how to reach them. At most one connection per user:
/// a newer registration displaces the older one.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// user_id -> live connection
    connections: RwLock<HashMap<UserId, ConnectionHandle>>,

    /// Upper bound on how long `try_send` waits for a recipient's writer
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: RwLock::new(HashMap::new()),
                send_timeout,
            }),
        }
    }

    /// Make `handle` the connection for `user_id`. Returns the displaced
    /// connection, which the caller should close.
    pub async fn register(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.inner.connections.write().await.insert(user_id, handle);
        if let Some(prev) = &previous {
            info!("User {} reconnected, displacing connection {}", user_id, prev.conn_id);
        }
        previous
    }

    /// Remove the mapping, but only if `conn_id` is still the registered connection.
    pub async fn unregister(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.conn_id == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.inner.connections.read().await.get(&user_id).cloned()
    }

    pub async fn online_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// Push a frame to `user_id` and wait for the write. Returns false if the
    /// user is offline or the write failed; a failed connection is evicted.
    pub async fn try_send(&self, user_id: UserId, frame: ServerFrame) -> bool {
        let Some(handle) = self.lookup(user_id).await else {
            return false;
        };

        match handle.deliver(frame, self.inner.send_timeout).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Push to user {} failed ({}), evicting connection {}", user_id, e, handle.conn_id);
                self.evict(user_id, &handle).await;
                false
            }
        }
    }

    /// Fire-and-forget push. Dropped silently when the user is offline.
    pub async fn relay(&self, user_id: UserId, frame: ServerFrame) {
        let Some(handle) = self.lookup(user_id).await else {
            return;
        };

        match handle.enqueue(frame) {
            Ok(()) => {}
            Err(TransportError::Closed) => self.evict(user_id, &handle).await,
            Err(e) => debug!("Dropping relay to user {}: {}", user_id, e),
        }
    }

    async fn evict(&self, user_id: UserId, handle: &ConnectionHandle) {
        if self.unregister(user_id, handle.conn_id).await {
            handle.close();
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Stand-in for a socket writer: confirms every write and forwards the frame.
    pub(crate) fn spawn_writer(mut rx: mpsc::Receiver<Outbound>) -> mpsc::UnboundedReceiver<ServerFrame> {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(Outbound { frame, written }) = rx.recv().await {
                let _ = frames_tx.send(frame);
                if let Some(written) = written {
                    let _ = written.send(());
                }
            }
        });
        frames_rx
    }

    fn typing(from: UserId) -> ServerFrame {
        ServerFrame::Typing {
            from,
            is_typing: true,
        }
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = ConnectionRegistry::default();
        let (first, _first_rx) = ConnectionHandle::new();
        let (second, _second_rx) = ConnectionHandle::new();

        assert!(registry.register(5, first.clone()).await.is_none());
        let displaced = registry.register(5, second.clone()).await.unwrap();
        assert_eq!(displaced.conn_id(), first.conn_id());
        displaced.close();

        assert_eq!(registry.lookup(5).await.unwrap().conn_id(), second.conn_id());
        assert_eq!(registry.online_count().await, 1);
        assert!(first.is_closed());
        assert!(!second.is_closed());
    }

    /// Fill a connection's queue so nothing more can be enqueued.
    fn saturate(handle: &ConnectionHandle) {
        for _ in 0..OUTBOUND_QUEUE {
            handle.enqueue(typing(1)).unwrap();
        }
        assert!(matches!(handle.enqueue(typing(1)), Err(TransportError::Timeout)));
    }

    #[tokio::test]
    async fn displaced_connection_closes_with_full_queue() {
        let registry = ConnectionRegistry::default();
        let (old, _old_rx) = ConnectionHandle::new();
        let signal = old.close_signal();
        registry.register(5, old.clone()).await;
        saturate(&old);

        let (new, _new_rx) = ConnectionHandle::new();
        registry.register(5, new).await.unwrap().close();

        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("displaced connection was not told to close");
    }

    #[tokio::test]
    async fn evicted_connection_closes_with_full_queue() {
        let registry = ConnectionRegistry::new(Duration::from_millis(50));
        let (handle, _rx) = ConnectionHandle::new();
        registry.register(2, handle.clone()).await;
        saturate(&handle);

        assert!(!registry.try_send(2, typing(1)).await);
        assert!(registry.lookup(2).await.is_none());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn stale_unregister_keeps_newer_connection() {
        let registry = ConnectionRegistry::default();
        let (old, _old_rx) = ConnectionHandle::new();
        let (new, _new_rx) = ConnectionHandle::new();

        registry.register(5, old.clone()).await;
        registry.register(5, new.clone()).await;

        assert!(!registry.unregister(5, old.conn_id()).await);
        assert_eq!(registry.lookup(5).await.unwrap().conn_id(), new.conn_id());

        assert!(registry.unregister(5, new.conn_id()).await);
        assert!(registry.lookup(5).await.is_none());
    }

    #[tokio::test]
    async fn racing_registrations_leave_one_winner() {
        let registry = ConnectionRegistry::default();
        let mut tasks = Vec::new();
        let mut receivers = Vec::new();

        for _ in 0..32 {
            let (handle, rx) = ConnectionHandle::new();
            receivers.push(rx);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let id = handle.conn_id();
                (id, registry.register(5, handle).await.map(|h| h.conn_id()))
            }));
        }

        let mut registered = Vec::new();
        let mut displaced = Vec::new();
        for task in tasks {
            let (id, prev) = task.await.unwrap();
            registered.push(id);
            displaced.extend(prev);
        }

        assert_eq!(registry.online_count().await, 1);
        assert_eq!(displaced.len(), registered.len() - 1);

        let winner = registry.lookup(5).await.unwrap().conn_id();
        assert!(registered.contains(&winner));
        assert!(!displaced.contains(&winner));
    }

    #[tokio::test]
    async fn try_send_to_offline_user() {
        let registry = ConnectionRegistry::default();
        assert!(!registry.try_send(9, typing(1)).await);
    }

    #[tokio::test]
    async fn try_send_waits_for_write() {
        let registry = ConnectionRegistry::default();
        let (handle, rx) = ConnectionHandle::new();
        let mut frames = spawn_writer(rx);
        registry.register(2, handle).await;

        assert!(registry.try_send(2, typing(1)).await);
        assert_eq!(frames.recv().await.unwrap(), typing(1));
    }

    #[tokio::test]
    async fn dead_connection_is_evicted() {
        let registry = ConnectionRegistry::default();
        let (handle, rx) = ConnectionHandle::new();
        registry.register(2, handle).await;
        drop(rx);

        assert!(!registry.try_send(2, typing(1)).await);
        assert!(registry.lookup(2).await.is_none());
    }

    #[tokio::test]
    async fn unresponsive_connection_times_out() {
        let registry = ConnectionRegistry::new(Duration::from_millis(50));
        // Receiver kept alive but never drained
        let (handle, _rx) = ConnectionHandle::new();
        registry.register(2, handle).await;

        let started = std::time::Instant::now();
        assert!(!registry.try_send(2, typing(1)).await);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(registry.lookup(2).await.is_none());
    }

    #[tokio::test]
    async fn relay_drops_silently_when_offline() {
        let registry = ConnectionRegistry::default();
        registry.relay(3, typing(1)).await;

        let (handle, rx) = ConnectionHandle::new();
        let mut frames = spawn_writer(rx);
        registry.register(3, handle).await;
        registry.relay(3, typing(1)).await;
        assert_eq!(frames.recv().await.unwrap(), typing(1));
    }
}
