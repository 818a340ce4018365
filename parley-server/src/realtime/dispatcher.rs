//! Fan-out of domain events to every connection attached to a thread.
//!
//! Dispatch is fire-and-forget from the writer's perspective: the store
//! append is the durability guarantee, and a failure to push to a peer never
//! rolls the write back. Each peer owns a bounded outbound queue, and the
//! full-queue policy differs by event class: ephemeral events are dropped
//! (superseded by newer state), while dropping a message would break the
//! conversation log guarantee, so the connection is terminated instead and
//! the client re-syncs over REST.

use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use shared::models::ServerFrame;

use super::registry::{ConnectionRegistry, WireFrame};

pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish()
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Serializes `frame` once and pushes it to every peer of the thread,
    /// excluding the originating connection when there is one.
    pub async fn dispatch(&self, thread_id: Uuid, frame: &ServerFrame, exclude: Option<Uuid>) {
        let wire = WireFrame::encode(frame);
        let peers = self.registry.peers_of(thread_id, exclude).await;

        for peer in peers {
            match peer.sender.try_send(wire.clone()) {
                Ok(()) => {
                    metrics::counter!("parley_dispatched_events_total").increment(1);
                }
                Err(TrySendError::Full(frame)) => {
                    if frame.is_ephemeral() {
                        metrics::counter!("parley_dropped_ephemeral_events_total").increment(1);
                        debug!(
                            %thread_id,
                            registration = %peer.registration_id(),
                            "dropping ephemeral event for slow consumer"
                        );
                    } else {
                        metrics::counter!("parley_connections_terminated_total").increment(1);
                        warn!(
                            %thread_id,
                            registration = %peer.registration_id(),
                            "outbound queue full on message event, terminating connection"
                        );
                        peer.cancel.cancel();
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    // The gateway unregisters on close; this is a race, not a leak.
                    debug!(
                        %thread_id,
                        registration = %peer.registration_id(),
                        "peer queue already closed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::models::{Message, Party, PartyKind};
    use tokio::sync::mpsc;

    fn new_message_frame(thread_id: Uuid, body: &str) -> ServerFrame {
        ServerFrame::NewMessage {
            message: Message {
                id: Uuid::new_v4(),
                thread_id,
                author: PartyKind::Guest,
                body: body.to_string(),
                seen: false,
                created: Utc::now(),
                attachments: vec![],
            },
        }
    }

    fn typing_frame(thread_id: Uuid) -> ServerFrame {
        ServerFrame::Typing {
            thread_id,
            party: PartyKind::Guest,
            typing_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn every_member_connection_receives_the_event_exactly_once() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&registry));
        let thread_id = Uuid::new_v4();
        let member_id = Uuid::new_v4();

        let (tx_guest, mut rx_guest) = mpsc::channel(8);
        let guest = registry
            .register(thread_id, Party::Guest(Uuid::new_v4()), tx_guest)
            .await;

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry
            .register(thread_id, Party::Member(member_id), tx_a)
            .await;
        registry
            .register(thread_id, Party::Member(member_id), tx_b)
            .await;

        dispatcher
            .dispatch(
                thread_id,
                &new_message_frame(thread_id, "hello"),
                Some(guest.registration_id),
            )
            .await;

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.try_recv().expect("one event per tab");
            assert!(frame.text().contains("\"new_message\""));
            assert!(frame.text().contains("hello"));
            assert!(rx.try_recv().is_err(), "exactly once per tab");
        }
        assert!(rx_guest.try_recv().is_err(), "sender is excluded");
    }

    #[tokio::test]
    async fn full_queue_terminates_the_connection_on_a_message_event() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&registry));
        let thread_id = Uuid::new_v4();

        let (tx, mut rx) = mpsc::channel(1);
        let handle = registry
            .register(thread_id, Party::Member(Uuid::new_v4()), tx)
            .await;

        dispatcher
            .dispatch(thread_id, &new_message_frame(thread_id, "first"), None)
            .await;
        assert!(!handle.cancel.is_cancelled());

        // The consumer stalls; the queue is now full.
        dispatcher
            .dispatch(thread_id, &new_message_frame(thread_id, "second"), None)
            .await;

        assert!(handle.cancel.is_cancelled(), "never silently drop a message");
        let delivered = rx.try_recv().unwrap();
        assert!(delivered.text().contains("first"));
    }

    #[tokio::test]
    async fn full_queue_drops_typing_events_without_terminating() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&registry));
        let thread_id = Uuid::new_v4();

        let (tx, mut rx) = mpsc::channel(1);
        let handle = registry
            .register(thread_id, Party::Member(Uuid::new_v4()), tx)
            .await;

        dispatcher
            .dispatch(thread_id, &typing_frame(thread_id), None)
            .await;
        dispatcher
            .dispatch(thread_id, &typing_frame(thread_id), None)
            .await;
        dispatcher
            .dispatch(thread_id, &typing_frame(thread_id), None)
            .await;

        assert!(!handle.cancel.is_cancelled(), "typing is expendable");
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_outlives_closed_receivers() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&registry));
        let thread_id = Uuid::new_v4();

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = registry
            .register(thread_id, Party::Member(Uuid::new_v4()), tx)
            .await;

        dispatcher
            .dispatch(thread_id, &new_message_frame(thread_id, "into the void"), None)
            .await;
        assert!(!handle.cancel.is_cancelled());
    }
}
