//! Directory of live socket connections, keyed by thread.
//!
//! One concurrency-safe map owned by this component and injected where it is
//! needed; registrations are tied to connection open/close, never discovered
//! through ambient globals. A restart drops everything; clients reattach.

use std::{collections::HashMap, sync::Arc};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use shared::models::{Party, PartyKind, ServerFrame};

/// A frame serialized once, shared across every peer queue it is pushed to.
#[derive(Debug, Clone)]
pub struct WireFrame {
    text: Arc<str>,
    ephemeral: bool,
}

impl WireFrame {
    #[must_use]
    pub fn encode(frame: &ServerFrame) -> Self {
        let text = serde_json::to_string(frame).unwrap_or_else(|err| {
            error!("failed to serialize server frame: {err}");
            r#"{"type":"error","code":"internal_error","message":"event serialization failed"}"#
                .to_string()
        });
        Self {
            text: text.into(),
            ephemeral: frame.is_ephemeral(),
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Droppable under backpressure; see the dispatcher's full-queue policy.
    #[must_use]
    pub const fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }
}

/// One live connection as the registry sees it.
#[derive(Debug, Clone)]
pub struct Peer {
    registration_id: Uuid,
    pub party: Party,
    pub sender: mpsc::Sender<WireFrame>,
    pub cancel: CancellationToken,
}

impl Peer {
    #[must_use]
    pub const fn registration_id(&self) -> Uuid {
        self.registration_id
    }
}

/// Returned from [`ConnectionRegistry::register`]; the gateway holds it for
/// the life of the connection and passes it back on close.
#[derive(Debug)]
pub struct RegistrationHandle {
    pub thread_id: Uuid,
    pub registration_id: Uuid,
    /// Cancelled when the connection must terminate: guest eviction,
    /// capacity overflow on a non-droppable event, or thread deletion.
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    threads: RwLock<HashMap<Uuid, Vec<Peer>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection against a thread.
    ///
    /// A thread has at most one live guest connection: a visitor only has one
    /// open tab's worth of live state that matters, so a new guest connection
    /// evicts the previous one. Members may hold any number of connections.
    pub async fn register(
        &self,
        thread_id: Uuid,
        party: Party,
        sender: mpsc::Sender<WireFrame>,
    ) -> RegistrationHandle {
        let cancel = CancellationToken::new();
        let peer = Peer {
            registration_id: Uuid::new_v4(),
            party,
            sender,
            cancel: cancel.clone(),
        };
        let registration_id = peer.registration_id;

        let mut threads = self.threads.write().await;
        let peers = threads.entry(thread_id).or_default();

        if party.kind() == PartyKind::Guest {
            for existing in peers.iter().filter(|p| p.party.kind() == PartyKind::Guest) {
                existing.cancel.cancel();
                metrics::counter!("parley_guest_evictions_total").increment(1);
                metrics::gauge!("parley_open_connections").decrement(1.0);
            }
            peers.retain(|p| p.party.kind() != PartyKind::Guest);
        }

        peers.push(peer);
        metrics::gauge!("parley_open_connections").increment(1.0);

        RegistrationHandle {
            thread_id,
            registration_id,
            cancel,
        }
    }

    pub async fn unregister(&self, handle: &RegistrationHandle) {
        let mut threads = self.threads.write().await;
        if let Some(peers) = threads.get_mut(&handle.thread_id) {
            let before = peers.len();
            peers.retain(|peer| peer.registration_id != handle.registration_id);
            if peers.len() < before {
                metrics::gauge!("parley_open_connections").decrement(1.0);
            }
            if peers.is_empty() {
                threads.remove(&handle.thread_id);
            }
        }
    }

    /// Connections attached to the thread, excluding the caller's own.
    pub async fn peers_of(&self, thread_id: Uuid, exclude: Option<Uuid>) -> Vec<Peer> {
        let threads = self.threads.read().await;
        threads
            .get(&thread_id)
            .map(|peers| {
                peers
                    .iter()
                    .filter(|peer| Some(peer.registration_id) != exclude)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Cancels every connection attached to a thread; used when the thread
    /// itself goes away. Each gateway unregisters as its token fires.
    pub async fn close_thread(&self, thread_id: Uuid) {
        let threads = self.threads.read().await;
        if let Some(peers) = threads.get(&thread_id) {
            for peer in peers {
                peer.cancel.cancel();
            }
        }
    }

    #[cfg(test)]
    pub async fn connection_count(&self, thread_id: Uuid) -> usize {
        self.threads
            .read()
            .await
            .get(&thread_id)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<WireFrame>, mpsc::Receiver<WireFrame>) {
        mpsc::channel(8)
    }

    #[tokio::test]
    async fn peers_of_excludes_the_caller() {
        let registry = ConnectionRegistry::new();
        let thread_id = Uuid::new_v4();

        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        let a = registry
            .register(thread_id, Party::Member(Uuid::new_v4()), tx_a)
            .await;
        let _b = registry
            .register(thread_id, Party::Member(Uuid::new_v4()), tx_b)
            .await;

        let peers = registry.peers_of(thread_id, Some(a.registration_id)).await;
        assert_eq!(peers.len(), 1);
        assert_ne!(peers[0].registration_id(), a.registration_id);

        let all = registry.peers_of(thread_id, None).await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn a_new_guest_connection_evicts_the_old_one() {
        let registry = ConnectionRegistry::new();
        let thread_id = Uuid::new_v4();
        let guest_id = Uuid::new_v4();

        let (tx_old, _rx_old) = channel();
        let old = registry
            .register(thread_id, Party::Guest(guest_id), tx_old)
            .await;
        assert!(!old.cancel.is_cancelled());

        let (tx_new, _rx_new) = channel();
        let new = registry
            .register(thread_id, Party::Guest(guest_id), tx_new)
            .await;

        assert!(old.cancel.is_cancelled());
        assert!(!new.cancel.is_cancelled());
        assert_eq!(registry.connection_count(thread_id).await, 1);
    }

    #[tokio::test]
    async fn members_are_not_evicted_by_guests_or_each_other() {
        let registry = ConnectionRegistry::new();
        let thread_id = Uuid::new_v4();
        let member_id = Uuid::new_v4();

        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        let (tx_g, _rx_g) = channel();
        let a = registry
            .register(thread_id, Party::Member(member_id), tx_a)
            .await;
        let b = registry
            .register(thread_id, Party::Member(member_id), tx_b)
            .await;
        registry
            .register(thread_id, Party::Guest(Uuid::new_v4()), tx_g)
            .await;

        assert!(!a.cancel.is_cancelled());
        assert!(!b.cancel.is_cancelled());
        assert_eq!(registry.connection_count(thread_id).await, 3);
    }

    #[tokio::test]
    async fn unregister_removes_the_connection_and_empty_threads() {
        let registry = ConnectionRegistry::new();
        let thread_id = Uuid::new_v4();

        let (tx, _rx) = channel();
        let handle = registry
            .register(thread_id, Party::Member(Uuid::new_v4()), tx)
            .await;
        assert_eq!(registry.connection_count(thread_id).await, 1);

        registry.unregister(&handle).await;
        assert_eq!(registry.connection_count(thread_id).await, 0);
        assert!(registry.peers_of(thread_id, None).await.is_empty());
    }

    #[tokio::test]
    async fn close_thread_cancels_everyone() {
        let registry = ConnectionRegistry::new();
        let thread_id = Uuid::new_v4();

        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        let a = registry
            .register(thread_id, Party::Member(Uuid::new_v4()), tx_a)
            .await;
        let b = registry
            .register(thread_id, Party::Guest(Uuid::new_v4()), tx_b)
            .await;

        registry.close_thread(thread_id).await;
        assert!(a.cancel.is_cancelled());
        assert!(b.cancel.is_cancelled());
    }
}
