use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use coderoom_protocol::{ClientMessage, ParticipantId, ServerMessage, SessionId};
use futures_util::{SinkExt, StreamExt};
use libcoderoom::{CoderoomError, Joined, LeaveOutcome, Subscription, TreeOp};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::AppState;

const OUTBOUND_QUEUE: usize = 256;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The session this connection joined.
struct Membership {
    session_id: SessionId,
    participant_id: ParticipantId,
    forwarder: JoinHandle<()>,
}

type Outbound = mpsc::Sender<Arc<ServerMessage>>;

/// Handle one WebSocket connection.
///
/// A write task owns the socket sink and drains an mpsc queue. Direct replies
/// and the session event forwarder both feed that queue, so the snapshot sent
/// on join is always ahead of the first forwarded event.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<ServerMessage>>(OUTBOUND_QUEUE);

    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(message.as_ref()) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode server message: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut membership: Option<Membership> = None;
    while let Some(frame) = ws_receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("ws read error: {e}");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                handle_text(&state, &tx, &mut membership, text.as_str()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(Membership {
        session_id,
        participant_id,
        forwarder,
    }) = membership.take()
    {
        forwarder.abort();
        match state.registry.leave(&session_id, &participant_id).await {
            Ok(LeaveOutcome::Destroyed) => {
                debug!(%session_id, "last participant disconnected");
            }
            Ok(_) => {}
            Err(e) => debug!(%session_id, error = %e, "leave on disconnect"),
        }
    }
    drop(tx);
    write_task.abort();
}

async fn handle_text(
    state: &AppState,
    tx: &Outbound,
    membership: &mut Option<Membership>,
    text: &str,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            send_error(tx, format!("invalid message: {e}")).await;
            return;
        }
    };

    if let ClientMessage::Join { session_id, name } = message {
        if let Some(current) = membership.as_ref() {
            let err = CoderoomError::AlreadyJoined(current.session_id.clone());
            send_error(tx, err.to_string()).await;
            return;
        }
        match state.registry.join(&session_id, &name).await {
            Ok(joined) => *membership = Some(start_membership(tx, &session_id, joined).await),
            Err(e) => send_error(tx, e.to_string()).await,
        }
        return;
    }

    let Some(current) = membership.as_ref() else {
        send_error(tx, "join a session first".to_string()).await;
        return;
    };
    if message.session_id() != current.session_id {
        send_error(
            tx,
            format!(
                "this connection is joined to session {}, not {}",
                current.session_id,
                message.session_id()
            ),
        )
        .await;
        return;
    }

    let (session_id, participant_id) = (&current.session_id, &current.participant_id);
    let outcome = match message {
        ClientMessage::MoveCursor { position, .. } => {
            state
                .registry
                .move_cursor(session_id, participant_id, position)
                .await
        }
        other => match tree_op(other) {
            Some(op) => state
                .registry
                .apply(session_id, participant_id, op)
                .await
                .map(|_| ()),
            None => Ok(()),
        },
    };
    if let Err(e) = outcome {
        send_error(tx, e.to_string()).await;
    }
}

async fn start_membership(tx: &Outbound, session_id: &str, joined: Joined) -> Membership {
    let Joined {
        participant,
        snapshot,
        roster,
        subscription,
    } = joined;

    let _ = tx
        .send(Arc::new(ServerMessage::TreeSnapshot {
            session_id: session_id.to_string(),
            entries: snapshot,
        }))
        .await;
    let _ = tx
        .send(Arc::new(ServerMessage::Roster {
            participants: roster,
            joined: Some(participant.clone()),
            left: None,
        }))
        .await;

    info!(session_id, participant_id = %participant.id, "connection joined session");
    Membership {
        session_id: session_id.to_string(),
        participant_id: participant.id,
        forwarder: tokio::spawn(forward_events(subscription, tx.clone())),
    }
}

/// Copy session events onto the connection's outbound queue.
async fn forward_events(mut subscription: Subscription, tx: Outbound) {
    while let Some(message) = subscription.recv().await {
        if tx.send(message).await.is_err() {
            break;
        }
    }
    debug!(participant_id = subscription.participant_id(), "event forwarding stopped");
}

fn tree_op(message: ClientMessage) -> Option<TreeOp> {
    let op = match message {
        ClientMessage::EditContent { path, content, .. } => TreeOp::UpdateContent { path, content },
        ClientMessage::CreateFile { path, content, .. } => TreeOp::CreateFile { path, content },
        ClientMessage::CreateFolder { path, .. } => TreeOp::CreateFolder { path },
        ClientMessage::DeleteItem { path, .. } => TreeOp::Delete { path },
        ClientMessage::RenameItem {
            old_path, new_path, ..
        } => TreeOp::Rename { old_path, new_path },
        ClientMessage::ToggleFolder { path, .. } => TreeOp::ToggleFolder { path },
        ClientMessage::Join { .. } | ClientMessage::MoveCursor { .. } => return None,
    };
    Some(op)
}

async fn send_error(tx: &Outbound, message: String) {
    let _ = tx.send(Arc::new(ServerMessage::Error { message })).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_map_to_tree_ops() {
        let message: ClientMessage = serde_json::from_str(
            r#"{"type":"rename-item","sessionId":"s","oldPath":"a","newPath":"b"}"#,
        )
        .expect("parse json");
        assert_eq!(
            tree_op(message),
            Some(TreeOp::Rename {
                old_path: "a".into(),
                new_path: "b".into()
            })
        );

        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"create-file","sessionId":"s","path":"x.py"}"#)
                .expect("parse json");
        assert_eq!(
            tree_op(message),
            Some(TreeOp::CreateFile {
                path: "x.py".into(),
                content: String::new()
            })
        );

        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"join","sessionId":"s","name":"n"}"#).expect("parse json");
        assert_eq!(tree_op(message), None);
    }
}
