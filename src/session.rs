//! Session coordinator (component G, §4.G): one actor per document,
//! serializing every mutating operation through a single `mpsc` inbox.
//!
//! Grounded on `document_consumer.py`'s `DocumentConsumer`: `connect`,
//! `receive`'s `operation`/`cursor_update`/`sync_request` dispatch, and
//! `disconnect` map onto [`CoordinatorMessage`] variants one-to-one. The
//! teacher's `Editor<Id>` (a single mutable state behind one serialization
//! point, reached only through its public methods) is the model for owning
//! `current` exclusively inside the actor task rather than behind a mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::diff::Op;
use crate::error::{ChannelError, CoreError};
use crate::merge::MergeEngine;
use crate::snapshot::{DocumentSnapshot, SnapshotWire};
use crate::version::Version;
use crate::version_log::{DocumentId, Store, VersionLog};

/// Identifies one connected subscriber within a single coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

impl SubscriberId {
    /// Allocates a fresh, process-wide unique subscriber id.
    pub fn next() -> Self {
        SubscriberId(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Delivers outbound messages to one subscriber. Stands in for the
/// WebSocket send half the teacher's `ws`-backed binaries used directly;
/// here it is abstract so the core never depends on a transport.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), ChannelError>;
}

/// A [`Channel`] backed by a `tokio::sync::mpsc` unbounded sender. The
/// receiving half is owned by whatever task is actually writing frames to
/// the subscriber's transport; tests read it directly.
pub struct MpscChannel {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl MpscChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MpscChannel { tx }, rx)
    }
}

#[async_trait]
impl Channel for MpscChannel {
    async fn send(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        self.tx.send(message).map_err(|e| ChannelError(e.to_string()))
    }
}

/// Outbound subscriber messages, per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    DocumentState {
        content: SnapshotWire,
        version: f64,
        active_users: Vec<String>,
    },
    DocumentChange {
        change: Op,
        user_id: String,
        new_version: f64,
    },
    SyncRequired {
        #[serde(rename = "currentVersion")]
        current_version: f64,
    },
    SyncResponse {
        content: SnapshotWire,
        version: f64,
    },
    CursorPosition {
        user_id: String,
        position: usize,
    },
    UserDisconnected {
        user_id: String,
    },
    /// Not part of §6's table; surfaces a non-fatal per-subscriber error
    /// (`DecodeError`) without breaking the connection (§7 propagation
    /// policy: "connection remains open").
    Error {
        reason: String,
    },
}

/// Messages the coordinator's inbox accepts, one per §4.G input kind plus
/// `join`/`leave` for subscriber lifecycle.
pub enum CoordinatorMessage {
    Join {
        subscriber_id: SubscriberId,
        user_id: String,
        channel: Arc<dyn Channel>,
    },
    Leave {
        subscriber_id: SubscriberId,
    },
    Operation {
        subscriber_id: SubscriberId,
        source_version: Version,
        op: Op,
    },
    CursorUpdate {
        subscriber_id: SubscriberId,
        position: usize,
    },
    SyncRequest {
        subscriber_id: SubscriberId,
    },
}

/// A handle callers use to talk to a running coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorMessage>,
}

impl CoordinatorHandle {
    pub async fn send(&self, message: CoordinatorMessage) -> Result<(), ChannelError> {
        self.tx.send(message).await.map_err(|_| ChannelError("coordinator task has stopped".into()))
    }
}

struct Subscriber {
    user_id: String,
    channel: Arc<dyn Channel>,
    last_seen: Instant,
}

/// One actor per document (§4.G, §5 "Scheduling"). Owns the document's
/// mutable current snapshot exclusively; subscribers never touch it
/// directly, only through [`CoordinatorHandle`].
pub struct SessionCoordinator<S: Store> {
    document_id: DocumentId,
    store: Arc<S>,
    idle_timeout: Duration,
}

impl<S: Store + 'static> SessionCoordinator<S> {
    /// Spawns the coordinator as a `tokio::task` and returns a handle to it.
    pub fn spawn(document_id: DocumentId, store: Arc<S>, idle_timeout: Duration) -> CoordinatorHandle {
        let (tx, rx) = mpsc::channel(256);
        let coordinator = SessionCoordinator { document_id, store, idle_timeout };
        tokio::spawn(coordinator.run(rx));
        CoordinatorHandle { tx }
    }

    async fn run(self, mut rx: mpsc::Receiver<CoordinatorMessage>) {
        let mut current = match self.store.get_document(&self.document_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                // Freshly created document: seed the log with its initial
                // version so the first operation's `sourceVersion` resolves
                // to a real base (§3 "Lifecycle": a document starts at 1.0
                // with an empty snapshot already on record).
                let initial = DocumentSnapshot::empty();
                if let Err(err) = self.store.append_version(&self.document_id, initial.clone()).await {
                    warn!(document_id = %self.document_id, %err, "failed to seed initial version, terminating coordinator");
                    return;
                }
                initial
            }
            Err(err) => {
                warn!(document_id = %self.document_id, %err, "failed to load document, terminating coordinator");
                return;
            }
        };
        let mut subscribers: HashMap<SubscriberId, Subscriber> = HashMap::new();

        loop {
            match tokio::time::timeout(self.idle_timeout, rx.recv()).await {
                Ok(Some(message)) => {
                    if let Err(err) = self.handle(&mut current, &mut subscribers, message).await {
                        if err.is_fatal() {
                            warn!(document_id = %self.document_id, %err, "fatal error, terminating coordinator");
                            return;
                        }
                    }
                }
                Ok(None) => {
                    info!(document_id = %self.document_id, "all handles dropped, terminating coordinator");
                    return;
                }
                Err(_elapsed) => {
                    self.sweep_idle_subscribers(&mut subscribers).await;
                }
            }
        }
    }

    async fn sweep_idle_subscribers(&self, subscribers: &mut HashMap<SubscriberId, Subscriber>) {
        let timed_out: Vec<SubscriberId> = subscribers
            .iter()
            .filter(|(_, s)| s.last_seen.elapsed() >= self.idle_timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in timed_out {
            if let Some(subscriber) = subscribers.remove(&id) {
                info!(document_id = %self.document_id, subscriber = ?id, "subscriber idle timeout");
                Self::broadcast(subscribers, OutboundMessage::UserDisconnected { user_id: subscriber.user_id }).await;
            }
        }
    }

    async fn handle(
        &self,
        current: &mut DocumentSnapshot,
        subscribers: &mut HashMap<SubscriberId, Subscriber>,
        message: CoordinatorMessage,
    ) -> Result<(), CoreError> {
        match message {
            CoordinatorMessage::Join { subscriber_id, user_id, channel } => {
                let active_users: Vec<String> = subscribers.values().map(|s| s.user_id.clone()).collect();
                let reply = OutboundMessage::DocumentState {
                    content: current.to_wire(),
                    version: current.version().to_wire(),
                    active_users,
                };
                let _ = channel.send(reply).await;
                subscribers.insert(subscriber_id, Subscriber { user_id, channel, last_seen: Instant::now() });
                Ok(())
            }
            CoordinatorMessage::Leave { subscriber_id } => {
                if let Some(subscriber) = subscribers.remove(&subscriber_id) {
                    Self::broadcast(subscribers, OutboundMessage::UserDisconnected { user_id: subscriber.user_id }).await;
                }
                Ok(())
            }
            CoordinatorMessage::SyncRequest { subscriber_id } => {
                if let Some(subscriber) = subscribers.get_mut(&subscriber_id) {
                    subscriber.last_seen = Instant::now();
                    let reply = OutboundMessage::SyncResponse {
                        content: current.to_wire(),
                        version: current.version().to_wire(),
                    };
                    let _ = subscriber.channel.send(reply).await;
                }
                Ok(())
            }
            CoordinatorMessage::CursorUpdate { subscriber_id, position } => {
                let user_id = match subscribers.get_mut(&subscriber_id) {
                    Some(subscriber) => {
                        subscriber.last_seen = Instant::now();
                        subscriber.user_id.clone()
                    }
                    None => return Ok(()),
                };
                Self::broadcast_except(subscribers, subscriber_id, OutboundMessage::CursorPosition { user_id, position }).await;
                Ok(())
            }
            CoordinatorMessage::Operation { subscriber_id, source_version, op } => {
                self.handle_operation(current, subscribers, subscriber_id, source_version, op).await
            }
        }
    }

    async fn handle_operation(
        &self,
        current: &mut DocumentSnapshot,
        subscribers: &mut HashMap<SubscriberId, Subscriber>,
        subscriber_id: SubscriberId,
        source_version: Version,
        op: Op,
    ) -> Result<(), CoreError> {
        let user_id = match subscribers.get_mut(&subscriber_id) {
            Some(subscriber) => {
                subscriber.last_seen = Instant::now();
                subscriber.user_id.clone()
            }
            None => return Ok(()),
        };

        // A base ahead of the current version can't resolve to anything in
        // the log — the client is referencing a version this coordinator
        // hasn't produced yet. Anything at or behind current is a candidate
        // for a real merge; `log.get` below is what actually decides
        // whether that base is still on record.
        if source_version > current.version() {
            self.reply_sync_required(subscribers, subscriber_id, current).await;
            return Ok(());
        }

        let log = VersionLog::new(self.document_id.clone(), self.store.as_ref());
        let base = match log.get(source_version).await? {
            Some(base) => base,
            None => {
                // UnknownBaseVersion (§7): the client's base has aged out of
                // the log. Prompt a resync instead of erroring the whole
                // coordinator, which would disconnect every other subscriber.
                self.reply_sync_required(subscribers, subscriber_id, current).await;
                return Ok(());
            }
        };

        let applied_op = match MergeEngine::merge(&base, current, &op) {
            Ok(op) => op,
            Err(err) if err.requires_sync() => {
                self.reply_sync_required(subscribers, subscriber_id, current).await;
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let mut next = current.with_next_version();
        crate::diff::DiffEngine::apply(&mut next, std::slice::from_ref(&applied_op))?;

        log.append(next.clone(), applied_op.clone(), source_version).await?;
        self.store.put_document(&self.document_id, next.clone()).await?;

        *current = next;
        Self::broadcast_except(
            subscribers,
            subscriber_id,
            OutboundMessage::DocumentChange {
                change: applied_op,
                user_id,
                new_version: current.version().to_wire(),
            },
        )
        .await;
        Ok(())
    }

    async fn reply_sync_required(&self, subscribers: &HashMap<SubscriberId, Subscriber>, subscriber_id: SubscriberId, current: &DocumentSnapshot) {
        if let Some(subscriber) = subscribers.get(&subscriber_id) {
            let _ = subscriber
                .channel
                .send(OutboundMessage::SyncRequired { current_version: current.version().to_wire() })
                .await;
        }
    }

    async fn broadcast(subscribers: &HashMap<SubscriberId, Subscriber>, message: OutboundMessage) {
        for subscriber in subscribers.values() {
            let _ = subscriber.channel.send(message.clone()).await;
        }
    }

    async fn broadcast_except(subscribers: &HashMap<SubscriberId, Subscriber>, sender: SubscriberId, message: OutboundMessage) {
        for (id, subscriber) in subscribers.iter() {
            if *id != sender {
                let _ = subscriber.channel.send(message.clone()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version_log::InMemoryStore;
    use std::time::Duration;

    async fn join(handle: &CoordinatorHandle, user_id: &str) -> (SubscriberId, mpsc::UnboundedReceiver<OutboundMessage>) {
        let id = SubscriberId::next();
        let (channel, rx) = MpscChannel::new();
        handle
            .send(CoordinatorMessage::Join { subscriber_id: id, user_id: user_id.to_string(), channel: Arc::new(channel) })
            .await
            .unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn happy_insert_bumps_version_and_replies_only_to_sender() {
        let store = Arc::new(InMemoryStore::new());
        let handle = SessionCoordinator::spawn("doc-1".to_string(), store, Duration::from_secs(60));

        let (alice, mut alice_rx) = join(&handle, "alice").await;
        let state = alice_rx.recv().await.unwrap();
        assert!(matches!(state, OutboundMessage::DocumentState { .. }));

        handle
            .send(CoordinatorMessage::Operation {
                subscriber_id: alice,
                source_version: Version::INITIAL,
                op: Op::Insert { position: 0, content: "hi".into() },
            })
            .await
            .unwrap();

        // alone in the document: no document_change broadcast to herself.
        assert!(tokio::time::timeout(Duration::from_millis(50), alice_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_operation_broadcasts_to_others_not_sender() {
        let store = Arc::new(InMemoryStore::new());
        let handle = SessionCoordinator::spawn("doc-2".to_string(), store, Duration::from_secs(60));

        let (alice, mut alice_rx) = join(&handle, "alice").await;
        let _ = alice_rx.recv().await.unwrap(); // document_state
        let (bob, mut bob_rx) = join(&handle, "bob").await;
        let _ = bob_rx.recv().await.unwrap(); // document_state
        let _ = alice_rx.recv().await; // nothing broadcast on join in this design

        handle
            .send(CoordinatorMessage::Operation {
                subscriber_id: alice,
                source_version: Version::INITIAL,
                op: Op::Insert { position: 0, content: "hi".into() },
            })
            .await
            .unwrap();

        let change = bob_rx.recv().await.unwrap();
        match change {
            OutboundMessage::DocumentChange { user_id, .. } => assert_eq!(user_id, "alice"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_source_version_yields_sync_required_without_broadcast() {
        let store = Arc::new(InMemoryStore::new());
        let handle = SessionCoordinator::spawn("doc-3".to_string(), store, Duration::from_secs(60));

        let (alice, mut alice_rx) = join(&handle, "alice").await;
        let _ = alice_rx.recv().await.unwrap();

        handle
            .send(CoordinatorMessage::Operation {
                subscriber_id: alice,
                source_version: Version::from_tenths(999),
                op: Op::Insert { position: 0, content: "hi".into() },
            })
            .await
            .unwrap();

        let reply = alice_rx.recv().await.unwrap();
        assert!(matches!(reply, OutboundMessage::SyncRequired { .. }));
    }

    #[tokio::test]
    async fn leave_broadcasts_user_disconnected() {
        let store = Arc::new(InMemoryStore::new());
        let handle = SessionCoordinator::spawn("doc-4".to_string(), store, Duration::from_secs(60));

        let (alice, mut alice_rx) = join(&handle, "alice").await;
        let _ = alice_rx.recv().await.unwrap();
        let (bob, mut bob_rx) = join(&handle, "bob").await;
        let _ = bob_rx.recv().await.unwrap();

        handle.send(CoordinatorMessage::Leave { subscriber_id: bob }).await.unwrap();
        let notice = alice_rx.recv().await.unwrap();
        match notice {
            OutboundMessage::UserDisconnected { user_id } => assert_eq!(user_id, "bob"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
