//! Minimal illustrative wiring of the core: an `InMemoryStore`, a
//! `SessionCoordinator`, and two `MpscChannel` subscribers exchanging a few
//! operations. There is no network transport here — HTTP/WebSocket framing
//! is outside this crate's scope; a real deployment decodes §6's wire
//! messages into `CoordinatorMessage`s and relays `OutboundMessage`s back
//! out over its own transport.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use scriptorium_core::diff::Op;
use scriptorium_core::session::{CoordinatorMessage, MpscChannel, SessionCoordinator, SubscriberId};
use scriptorium_core::version::Version;
use scriptorium_core::version_log::InMemoryStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scriptorium-demo", version, about = "Demonstrates the collaborative document core")]
struct Args {
    /// Document id to operate on.
    #[arg(long, default_value = "demo-document")]
    document_id: String,

    /// Subscriber idle timeout, in seconds.
    #[arg(long, default_value_t = 300)]
    idle_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let store = Arc::new(InMemoryStore::new());
    let handle = SessionCoordinator::spawn(
        args.document_id.clone(),
        store,
        Duration::from_secs(args.idle_timeout_secs),
    );

    let alice = SubscriberId::next();
    let (alice_channel, mut alice_rx) = MpscChannel::new();
    handle
        .send(CoordinatorMessage::Join {
            subscriber_id: alice,
            user_id: "alice".into(),
            channel: Arc::new(alice_channel),
        })
        .await
        .expect("coordinator accepts join");
    info!("alice joined");

    let bob = SubscriberId::next();
    let (bob_channel, mut bob_rx) = MpscChannel::new();
    handle
        .send(CoordinatorMessage::Join {
            subscriber_id: bob,
            user_id: "bob".into(),
            channel: Arc::new(bob_channel),
        })
        .await
        .expect("coordinator accepts join");

    // drain the document_state replies both subscribers receive on join.
    let _ = alice_rx.recv().await;
    let _ = bob_rx.recv().await;

    handle
        .send(CoordinatorMessage::Operation {
            subscriber_id: alice,
            source_version: Version::INITIAL,
            op: Op::Insert { position: 0, content: "hello, scriptorium".into() },
        })
        .await
        .expect("coordinator accepts operation");

    if let Some(change) = bob_rx.recv().await {
        info!(?change, "bob observed alice's change");
    }
}
