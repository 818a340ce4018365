//! The conversation gateway: one WebSocket per attached client.
//!
//! A connection walks Connecting → Attached → Streaming → Closed. The first
//! frame must attach it to a thread: a guest presents its thread secret, a
//! member presents a session token plus a thread it owns. Once attached, one
//! reader task translates inbound frames into store writes and dispatches,
//! while one writer task drains the bounded outbound queue the dispatcher
//! pushes into. No state survives the socket: a reconnect starts over at
//! Connecting and re-syncs over REST.

use std::{ops::ControlFlow, sync::Arc};

use axum::{
    extract::{
        Extension, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared::models::{AttachFrame, ClientFrame, Party, ServerFrame, Thread};

use crate::{
    app_state::AppState,
    handlers::validate_message_body,
    http::error::ApiError,
    realtime::registry::{RegistrationHandle, WireFrame},
};

#[instrument(skip_all)]
pub async fn socket_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

fn error_frame(code: &str, message: impl Into<String>) -> ServerFrame {
    ServerFrame::Error {
        code: code.to_string(),
        message: message.into(),
    }
}

async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Connecting: the attach frame must arrive within the handshake window.
    let attach = match wait_for_attach(&mut ws_rx, &state).await {
        Ok(attach) => attach,
        Err(frame) => {
            reject(&mut ws_tx, frame).await;
            return;
        }
    };

    let (thread, party) = match resolve_attach(&state, attach).await {
        Ok(resolved) => resolved,
        Err(frame) => {
            metrics::counter!("parley_socket_attach_failures_total").increment(1);
            reject(&mut ws_tx, frame).await;
            return;
        }
    };

    // Attached: register with the thread's peer set and ack.
    let (out_tx, out_rx) = mpsc::channel(state.config.chat.outbound_capacity);
    let handle = state.registry.register(thread.id, party, out_tx.clone()).await;
    info!(thread = %thread.id, party = %party.kind(), "socket attached");

    let _ = out_tx
        .send(WireFrame::encode(&ServerFrame::Attached {
            thread_id: thread.id,
        }))
        .await;

    // Streaming: exactly one writer and one reader per connection.
    let writer = tokio::spawn(write_loop(ws_tx, out_rx));

    let conn = Connection {
        state: Arc::clone(&state),
        thread,
        party,
        handle,
        out: out_tx,
    };
    conn.read_loop(&mut ws_rx).await;

    // Closed: drop the registration; the peer reattaches from scratch.
    state.registry.unregister(&conn.handle).await;
    writer.abort();
    info!(thread = %conn.thread.id, "socket closed");
}

async fn reject(ws_tx: &mut SplitSink<WebSocket, WsMessage>, frame: ServerFrame) {
    let wire = WireFrame::encode(&frame);
    let _ = ws_tx.send(WsMessage::Text(wire.text().to_string().into())).await;
    let _ = ws_tx.close().await;
}

async fn wait_for_attach(
    ws_rx: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> Result<AttachFrame, ServerFrame> {
    let deadline = tokio::time::Instant::now() + state.config.chat.handshake_timeout();

    loop {
        let next = tokio::time::timeout_at(deadline, ws_rx.next())
            .await
            .map_err(|_| error_frame("validation_failed", "attach frame timed out"))?;

        let text = match next {
            None => return Err(error_frame("validation_failed", "connection closed")),
            Some(Err(_)) => return Err(error_frame("validation_failed", "socket error")),
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) => {
                return Err(error_frame("validation_failed", "connection closed"));
            }
            Some(Ok(_)) => continue,
        };

        return match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Attach(attach)) => Ok(attach),
            Ok(_) => Err(error_frame(
                "validation_failed",
                "expected an attach frame first",
            )),
            Err(err) => Err(error_frame(
                "validation_failed",
                format!("malformed frame: {err}"),
            )),
        };
    }
}

/// Credential check for both attach paths. Invalid credentials always read
/// as `unauthorized`; there is no silent reattach under another identity.
async fn resolve_attach(
    state: &AppState,
    attach: AttachFrame,
) -> Result<(Thread, Party), ServerFrame> {
    match attach {
        AttachFrame::Guest {
            website_id,
            thread_secret,
        } => match state.store.thread_by_secret(&thread_secret).await {
            Ok(Some(thread)) if thread.website_id == website_id => {
                let party = Party::Guest(thread.guest_id);
                Ok((thread, party))
            }
            Ok(_) => Err(error_frame("unauthorized", "unknown thread secret")),
            Err(err) => {
                warn!("attach lookup failed: {err}");
                Err(error_frame("persistence_error", "store unavailable"))
            }
        },
        AttachFrame::Member { thread_id, token } => {
            let identity = match state.identity.authenticate(&token).await {
                Ok(Some(identity)) => identity,
                Ok(None) => {
                    return Err(error_frame("unauthorized", "invalid session token"));
                }
                Err(err) => {
                    warn!("attach authentication failed: {err}");
                    return Err(error_frame("persistence_error", "store unavailable"));
                }
            };

            match state
                .store
                .thread_for_member(thread_id, identity.member_id)
                .await
            {
                Ok(Some(thread)) => Ok((thread, Party::Member(identity.member_id))),
                Ok(None) => Err(error_frame("unauthorized", "not your thread")),
                Err(err) => {
                    warn!("attach lookup failed: {err}");
                    Err(error_frame("persistence_error", "store unavailable"))
                }
            }
        }
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut out_rx: mpsc::Receiver<WireFrame>,
) {
    while let Some(frame) = out_rx.recv().await {
        if ws_tx
            .send(WsMessage::Text(frame.text().to_string().into()))
            .await
            .is_err()
        {
            debug!("socket write failed, peer gone");
            break;
        }
    }
    let _ = ws_tx.close().await;
}

struct Connection {
    state: Arc<AppState>,
    thread: Thread,
    party: Party,
    handle: RegistrationHandle,
    out: mpsc::Sender<WireFrame>,
}

impl Connection {
    async fn read_loop(&self, ws_rx: &mut SplitStream<WebSocket>) {
        let idle = self.state.config.chat.idle_timeout();

        loop {
            let next = tokio::select! {
                () = self.handle.cancel.cancelled() => {
                    // Evicted, capacity overflow, or thread deleted.
                    debug!(thread = %self.thread.id, "connection cancelled");
                    return;
                }
                next = tokio::time::timeout(idle, ws_rx.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    info!(thread = %self.thread.id, "idle timeout");
                    return;
                }
                Ok(None) => return,
                Ok(Some(Err(err))) => {
                    debug!(thread = %self.thread.id, "socket error: {err}");
                    return;
                }
                Ok(Some(Ok(message))) => message,
            };

            let text = match message {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => return,
                // Keepalive traffic counts as activity and nothing more.
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                WsMessage::Binary(_) => {
                    self.send_error("validation_failed", "binary frames are not supported");
                    continue;
                }
            };

            let frame = match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => frame,
                Err(err) => {
                    self.send_error("validation_failed", &format!("malformed frame: {err}"));
                    continue;
                }
            };

            if self.handle_frame(frame).await.is_break() {
                return;
            }
        }
    }

    async fn handle_frame(&self, frame: ClientFrame) -> ControlFlow<()> {
        match frame {
            ClientFrame::Attach(_) => {
                self.send_error("validation_failed", "already attached");
                ControlFlow::Continue(())
            }
            ClientFrame::SendMessage { body, attachments } => {
                self.send_message(&body, &attachments).await
            }
            ClientFrame::Typing { typing_id } => {
                self.typing(typing_id).await;
                ControlFlow::Continue(())
            }
            ClientFrame::MarkSeen => {
                self.mark_seen().await;
                ControlFlow::Continue(())
            }
        }
    }

    async fn send_message(&self, body: &str, attachments: &[String]) -> ControlFlow<()> {
        let body = match validate_message_body(body, self.state.config.chat.message_max_chars) {
            Ok(body) => body,
            Err(err) => {
                self.send_error(err.code(), err.message());
                return ControlFlow::Continue(());
            }
        };

        match self
            .state
            .store
            .append_message(self.thread.id, self.party.kind(), &body, attachments)
            .await
        {
            Ok(message) => {
                // The append is the durability guarantee; everything after
                // this is fan-out and never rolls the write back.
                if !self.push(&ServerFrame::MessageAccepted {
                    message: message.clone(),
                }) {
                    return ControlFlow::Break(());
                }

                self.state
                    .dispatcher
                    .dispatch(
                        self.thread.id,
                        &ServerFrame::NewMessage { message },
                        Some(self.handle.registration_id),
                    )
                    .await;
                self.state.unseen.invalidate(self.thread.member_id).await;
                ControlFlow::Continue(())
            }
            Err(err) => {
                // Surfaced to the sender; the client owns the retry, the
                // gateway never resends on its own.
                warn!(thread = %self.thread.id, "message append failed: {err}");
                let api = ApiError::from(err);
                self.send_error(api.code(), api.message());
                ControlFlow::Continue(())
            }
        }
    }

    async fn typing(&self, typing_id: Option<Uuid>) {
        let Some(typing_id) = self
            .state
            .presence
            .signal(self.thread.id, self.party.kind(), typing_id)
            .await
        else {
            // Best-effort: the tracker already logged the failure.
            return;
        };

        let _ = self
            .out
            .try_send(WireFrame::encode(&ServerFrame::TypingAccepted { typing_id }));

        self.state
            .dispatcher
            .dispatch(
                self.thread.id,
                &ServerFrame::Typing {
                    thread_id: self.thread.id,
                    party: self.party.kind(),
                    typing_id,
                },
                Some(self.handle.registration_id),
            )
            .await;
    }

    async fn mark_seen(&self) {
        match self
            .state
            .store
            .mark_seen(self.thread.id, self.party.kind())
            .await
        {
            Ok(updated) => {
                let frame = ServerFrame::SeenChanged {
                    thread_id: self.thread.id,
                    seen_by: self.party.kind(),
                    updated,
                };
                if updated > 0 {
                    self.state
                        .dispatcher
                        .dispatch(self.thread.id, &frame, Some(self.handle.registration_id))
                        .await;
                }
                let _ = self.push(&frame);
                self.state.unseen.invalidate(self.thread.member_id).await;
            }
            Err(err) => {
                warn!(thread = %self.thread.id, "mark seen failed: {err}");
                let api = ApiError::from(err);
                self.send_error(api.code(), api.message());
            }
        }
    }

    /// Pushes a non-droppable frame onto this connection's own queue. A full
    /// queue means the peer cannot keep up with its own receipts, which is
    /// the same capacity condition the dispatcher terminates on.
    fn push(&self, frame: &ServerFrame) -> bool {
        match self.out.try_send(WireFrame::encode(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                metrics::counter!("parley_connections_terminated_total").increment(1);
                warn!(thread = %self.thread.id, "own queue full, terminating connection");
                self.handle.cancel.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn send_error(&self, code: &str, message: &str) {
        let _ = self.out.try_send(WireFrame::encode(&error_frame(code, message)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::thread_store::ThreadStore;
    use crate::testing::{TEST_TOKEN, harness};
    use shared::models::PartyKind;
    use tokio::sync::mpsc::Receiver;

    async fn attach_peer(
        state: &Arc<AppState>,
        thread: &Thread,
        party: Party,
    ) -> (Connection, Receiver<WireFrame>) {
        let (out_tx, out_rx) = mpsc::channel(state.config.chat.outbound_capacity);
        let handle = state.registry.register(thread.id, party, out_tx.clone()).await;
        (
            Connection {
                state: Arc::clone(state),
                thread: thread.clone(),
                party,
                handle,
                out: out_tx,
            },
            out_rx,
        )
    }

    #[tokio::test]
    async fn guest_attach_resolves_to_the_original_thread() {
        let fx = harness().await;
        let thread = fx.open_thread().await;

        let (resolved, party) = resolve_attach(
            &fx.state,
            AttachFrame::Guest {
                website_id: fx.website_id,
                thread_secret: thread.secret.clone(),
            },
        )
        .await
        .expect("valid secret attaches");

        assert_eq!(resolved.id, thread.id);
        assert_eq!(party, Party::Guest(thread.guest_id));
    }

    #[tokio::test]
    async fn bad_secret_or_wrong_website_is_unauthorized() {
        let fx = harness().await;
        let thread = fx.open_thread().await;

        let bad_secret = resolve_attach(
            &fx.state,
            AttachFrame::Guest {
                website_id: fx.website_id,
                thread_secret: "forged".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(bad_secret, ServerFrame::Error { code, .. } if code == "unauthorized"));

        let wrong_site = resolve_attach(
            &fx.state,
            AttachFrame::Guest {
                website_id: Uuid::new_v4(),
                thread_secret: thread.secret,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(wrong_site, ServerFrame::Error { code, .. } if code == "unauthorized"));
    }

    #[tokio::test]
    async fn member_attach_requires_token_and_ownership() {
        let fx = harness().await;
        let thread = fx.open_thread().await;

        let (resolved, party) = resolve_attach(
            &fx.state,
            AttachFrame::Member {
                thread_id: thread.id,
                token: TEST_TOKEN.into(),
            },
        )
        .await
        .expect("owner attaches");
        assert_eq!(resolved.id, thread.id);
        assert_eq!(party, Party::Member(fx.member_id));

        let bad_token = resolve_attach(
            &fx.state,
            AttachFrame::Member {
                thread_id: thread.id,
                token: "wrong".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(bad_token, ServerFrame::Error { code, .. } if code == "unauthorized"));

        let foreign_thread = resolve_attach(
            &fx.state,
            AttachFrame::Member {
                thread_id: Uuid::new_v4(),
                token: TEST_TOKEN.into(),
            },
        )
        .await
        .unwrap_err();
        assert!(
            matches!(foreign_thread, ServerFrame::Error { code, .. } if code == "unauthorized")
        );
    }

    #[tokio::test]
    async fn guest_message_reaches_the_member_connection() {
        let fx = harness().await;
        let thread = fx.open_thread().await;

        let (guest, mut guest_rx) =
            attach_peer(&fx.state, &thread, Party::Guest(thread.guest_id)).await;
        let (_member, mut member_rx) =
            attach_peer(&fx.state, &thread, Party::Member(fx.member_id)).await;

        let flow = guest
            .handle_frame(ClientFrame::SendMessage {
                body: "hello".into(),
                attachments: vec![],
            })
            .await;
        assert!(flow.is_continue());

        let receipt = guest_rx.try_recv().expect("sender gets a receipt");
        assert!(receipt.text().contains("\"message_accepted\""));

        let event = member_rx.try_recv().expect("member gets the event");
        assert!(event.text().contains("\"new_message\""));
        assert!(event.text().contains("hello"));
        assert!(member_rx.try_recv().is_err(), "exactly one event");

        // The log is the source of truth and the message is not yet seen.
        let page = fx.store.list_messages(thread.id, 1, 50).await.unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].body, "hello");
        assert!(!page.messages[0].seen);
    }

    #[tokio::test]
    async fn member_mark_seen_flips_guest_messages_once() {
        let fx = harness().await;
        let thread = fx.open_thread().await;

        fx.store
            .append_message(thread.id, PartyKind::Guest, "ping", &[])
            .await
            .unwrap();

        let (_guest, mut guest_rx) =
            attach_peer(&fx.state, &thread, Party::Guest(thread.guest_id)).await;
        let (member, mut member_rx) =
            attach_peer(&fx.state, &thread, Party::Member(fx.member_id)).await;

        let _ = member.handle_frame(ClientFrame::MarkSeen).await;

        let event = guest_rx.try_recv().expect("guest sees the seen change");
        assert!(event.text().contains("\"seen_changed\""));
        assert!(event.text().contains("\"updated\":1"));

        let own = member_rx.try_recv().expect("member gets its own count");
        assert!(own.text().contains("\"updated\":1"));

        // Second call is a no-op: nothing to fan out, count is zero.
        let _ = member.handle_frame(ClientFrame::MarkSeen).await;
        assert!(guest_rx.try_recv().is_err());
        let own = member_rx.try_recv().expect("zero-count receipt");
        assert!(own.text().contains("\"updated\":0"));

        let page = fx.store.list_messages(thread.id, 1, 50).await.unwrap();
        assert!(page.messages[0].seen);
    }

    #[tokio::test]
    async fn invalid_bodies_are_rejected_without_closing() {
        let fx = harness().await;
        let thread = fx.open_thread().await;

        let (guest, mut guest_rx) =
            attach_peer(&fx.state, &thread, Party::Guest(thread.guest_id)).await;

        let flow = guest
            .handle_frame(ClientFrame::SendMessage {
                body: "   ".into(),
                attachments: vec![],
            })
            .await;
        assert!(flow.is_continue(), "validation failures keep the socket open");

        let error = guest_rx.try_recv().expect("sender is told");
        assert!(error.text().contains("validation_failed"));
        assert!(!guest.handle.cancel.is_cancelled());

        let page = fx.store.list_messages(thread.id, 1, 50).await.unwrap();
        assert!(page.messages.is_empty());
    }

    #[tokio::test]
    async fn typing_frames_fan_out_and_ack_the_sender() {
        let fx = harness().await;
        let thread = fx.open_thread().await;

        let (guest, mut guest_rx) =
            attach_peer(&fx.state, &thread, Party::Guest(thread.guest_id)).await;
        let (_member, mut member_rx) =
            attach_peer(&fx.state, &thread, Party::Member(fx.member_id)).await;

        let _ = guest
            .handle_frame(ClientFrame::Typing { typing_id: None })
            .await;

        let ack = guest_rx.try_recv().expect("sender gets the session id");
        assert!(ack.text().contains("typing_accepted"));

        let event = member_rx.try_recv().expect("member sees the indicator");
        assert!(event.text().contains("\"typing\""));

        assert!(
            fx.state
                .presence
                .is_typing(thread.id, PartyKind::Guest)
                .await
        );
    }

    #[tokio::test]
    async fn reattach_attempts_are_rejected_in_place() {
        let fx = harness().await;
        let thread = fx.open_thread().await;

        let (guest, mut guest_rx) =
            attach_peer(&fx.state, &thread, Party::Guest(thread.guest_id)).await;

        let flow = guest
            .handle_frame(ClientFrame::Attach(AttachFrame::Guest {
                website_id: fx.website_id,
                thread_secret: thread.secret.clone(),
            }))
            .await;
        assert!(flow.is_continue());

        let error = guest_rx.try_recv().unwrap();
        assert!(error.text().contains("already attached"));
    }
}
