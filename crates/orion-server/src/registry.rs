//! Live connection registry and broadcast fan-out.
//!
//! The registry keeps two disjoint sets of connections, one per [`Role`].
//! Its lock is only ever held to copy or edit those sets, never across a
//! network write: a broadcast snapshots the target set, releases the lock,
//! writes to every peer, and then takes the write lock once to drop every
//! peer whose write failed. One slow peer can therefore never stall
//! registration or unregistration from other sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use orion_shared::{PushMessage, Role};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connection closed")]
    Closed,

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Write half of a duplex channel.
///
/// The WebSocket session implements this over the socket's sink; tests use
/// an in-memory recorder.
pub trait FrameSink: Send + 'static {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), SinkError>>;

    /// Low-level liveness ping.
    fn send_ping(&mut self) -> BoxFuture<'_, Result<(), SinkError>>;
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A live duplex connection as seen by the registry.
///
/// Writes are serialized through an async mutex so that a bootstrap, a
/// broadcast frame and a keepalive ping never interleave on the wire.
pub struct Connection {
    id: Uuid,
    writer: AsyncMutex<Box<dyn FrameSink>>,
    write_timeout: Duration,
    last_seen: Mutex<Instant>,
    closed: AtomicBool,
    close_notify: Notify,
}

impl Connection {
    pub fn new(sink: impl FrameSink, write_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            writer: AsyncMutex::new(Box::new(sink)),
            write_timeout,
            last_seen: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Exclusive access to the write half. Frames sent by other tasks wait
    /// until the returned guard is dropped.
    pub async fn writer(&self) -> ConnectionWriter<'_> {
        ConnectionWriter {
            sink: self.writer.lock().await,
            timeout: self.write_timeout,
        }
    }

    pub async fn send_text(&self, text: String) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.writer().await.send_text(text).await
    }

    pub async fn send_ping(&self) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.writer().await.send_ping().await
    }

    /// Record a liveness acknowledgment from the peer.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// Ask the owning session to tear the connection down.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Locked write half of a [`Connection`]; every frame is bounded by the
/// connection's write timeout.
pub struct ConnectionWriter<'a> {
    sink: AsyncMutexGuard<'a, Box<dyn FrameSink>>,
    timeout: Duration,
}

impl ConnectionWriter<'_> {
    pub async fn send_text(&mut self, text: String) -> Result<(), SinkError> {
        tokio::time::timeout(self.timeout, self.sink.send_text(text))
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))?
    }

    pub async fn send_ping(&mut self) -> Result<(), SinkError> {
        tokio::time::timeout(self.timeout, self.sink.send_ping())
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))?
    }

    pub async fn send_message(&mut self, message: &PushMessage) -> Result<(), SinkError> {
        let text = message
            .to_json()
            .map_err(|e| SinkError::Transport(format!("encode {}: {e}", message.kind())))?;
        self.send_text(text).await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Identifies one registration. Cheap to copy; unregistering with a stale
/// handle is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub role: Role,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Default)]
struct RoleSets {
    desktop: HashMap<Uuid, Arc<Connection>>,
    mobile: HashMap<Uuid, Arc<Connection>>,
}

impl RoleSets {
    fn set(&self, role: Role) -> &HashMap<Uuid, Arc<Connection>> {
        match role {
            Role::Desktop => &self.desktop,
            Role::Mobile => &self.mobile,
        }
    }

    fn set_mut(&mut self, role: Role) -> &mut HashMap<Uuid, Arc<Connection>> {
        match role {
            Role::Desktop => &mut self.desktop,
            Role::Mobile => &mut self.mobile,
        }
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    sets: RwLock<RoleSets>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to the set for `role`.
    pub fn register(&self, role: Role, conn: Arc<Connection>) -> ConnectionHandle {
        let handle = ConnectionHandle {
            id: conn.id(),
            role,
        };
        let mut sets = self.sets.write();
        sets.set_mut(role).insert(handle.id, conn);
        info!(
            conn = %handle.id,
            %role,
            total = sets.set(role).len(),
            "Connection registered"
        );
        handle
    }

    /// Like [`register`](Self::register), but unregisters automatically
    /// when the returned guard is dropped.
    pub fn register_guarded(self: &Arc<Self>, role: Role, conn: Arc<Connection>) -> Registration {
        let handle = self.register(role, conn);
        Registration {
            registry: Arc::clone(self),
            handle,
        }
    }

    /// Remove a registration. Returns whether anything was removed.
    pub fn unregister(&self, handle: ConnectionHandle) -> bool {
        let mut sets = self.sets.write();
        let removed = sets.set_mut(handle.role).remove(&handle.id).is_some();
        if removed {
            info!(
                conn = %handle.id,
                role = %handle.role,
                total = sets.set(handle.role).len(),
                "Connection unregistered"
            );
        }
        removed
    }

    #[cfg(test)]
    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        self.sets.read().set(handle.role).contains_key(&handle.id)
    }

    pub fn count(&self, role: Role) -> usize {
        self.sets.read().set(role).len()
    }

    pub async fn broadcast_to_all(&self, message: &PushMessage) -> BroadcastReport {
        self.broadcast(&[Role::Desktop, Role::Mobile], message).await
    }

    pub async fn broadcast_to_role(&self, role: Role, message: &PushMessage) -> BroadcastReport {
        self.broadcast(&[role], message).await
    }

    /// Copy the target sets out from under the read lock.
    fn snapshot(&self, roles: &[Role]) -> Vec<(ConnectionHandle, Arc<Connection>)> {
        let sets = self.sets.read();
        roles
            .iter()
            .flat_map(|&role| {
                sets.set(role)
                    .iter()
                    .map(move |(&id, conn)| (ConnectionHandle { id, role }, Arc::clone(conn)))
            })
            .collect()
    }

    async fn broadcast(&self, roles: &[Role], message: &PushMessage) -> BroadcastReport {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(kind = message.kind(), error = %e, "Failed to encode broadcast");
                return BroadcastReport::default();
            }
        };

        let targets = self.snapshot(roles);
        if targets.is_empty() {
            debug!(kind = message.kind(), "No connections to broadcast to");
            return BroadcastReport::default();
        }

        // No lock is held past this point until reconciliation.
        let results = join_all(targets.iter().map(|(handle, conn)| {
            let text = text.clone();
            async move { (*handle, conn, conn.send_text(text).await) }
        }))
        .await;

        let mut dead = Vec::new();
        for (handle, conn, result) in results {
            if let Err(e) = result {
                warn!(conn = %handle.id, role = %handle.role, error = %e, "Dropping unreachable connection");
                conn.close();
                dead.push(handle);
            }
        }

        if !dead.is_empty() {
            let mut sets = self.sets.write();
            for handle in &dead {
                sets.set_mut(handle.role).remove(&handle.id);
            }
        }

        let report = BroadcastReport {
            delivered: targets.len() - dead.len(),
            dropped: dead.len(),
        };
        debug!(
            kind = message.kind(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast complete"
        );
        report
    }
}

/// Registration that is released on drop, whatever path the owning session
/// exits through.
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
}

impl Registration {
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.handle);
    }
}

// ---------------------------------------------------------------------------
// In-memory sink for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Frame {
        Text(String),
        Ping,
    }

    pub struct RecordingSink {
        tx: mpsc::UnboundedSender<Frame>,
        fail: Arc<AtomicBool>,
    }

    impl RecordingSink {
        fn record(&self, frame: Frame) -> Result<(), SinkError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SinkError::Transport("broken pipe".into()));
            }
            self.tx.send(frame).map_err(|_| SinkError::Closed)
        }
    }

    impl FrameSink for RecordingSink {
        fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), SinkError>> {
            let result = self.record(Frame::Text(text));
            Box::pin(async move { result })
        }

        fn send_ping(&mut self) -> BoxFuture<'_, Result<(), SinkError>> {
            let result = self.record(Frame::Ping);
            Box::pin(async move { result })
        }
    }

    /// Receiving end of a [`RecordingSink`].
    pub struct Tap {
        rx: mpsc::UnboundedReceiver<Frame>,
        fail: Arc<AtomicBool>,
    }

    impl Tap {
        /// Make every further write fail.
        pub fn break_pipe(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        /// Drain everything written so far.
        pub fn frames(&mut self) -> Vec<Frame> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                out.push(frame);
            }
            out
        }

        /// Drain and decode the text frames written so far.
        pub fn messages(&mut self) -> Vec<PushMessage> {
            self.frames()
                .into_iter()
                .filter_map(|frame| match frame {
                    Frame::Text(text) => Some(PushMessage::from_json(&text).unwrap()),
                    Frame::Ping => None,
                })
                .collect()
        }
    }

    pub fn recording_connection() -> (Arc<Connection>, Tap) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fail = Arc::new(AtomicBool::new(false));
        let sink = RecordingSink {
            tx,
            fail: fail.clone(),
        };
        (
            Connection::new(sink, Duration::from_secs(1)),
            Tap { rx, fail },
        )
    }
}
