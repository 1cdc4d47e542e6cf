//! Session socket: authentication, then relay of annotation and viewport
//! events between the participants of one session.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use teleconsult_core::protocol::{DocumentChange, Message, ParticipantId, Presence, now_millis};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::rooms::SERVER_SENDER;

type WsSender = SplitSink<WebSocket, ws::Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Why a socket was refused before joining its session.
#[derive(Debug, PartialEq, Eq)]
enum AuthFailure {
    Timeout,
    Closed,
    NotAuthenticate,
    Rejected,
}

impl AuthFailure {
    fn message(&self) -> &'static str {
        match self {
            AuthFailure::Timeout => "Authentication timed out",
            AuthFailure::Closed => "Connection closed before authenticating",
            AuthFailure::NotAuthenticate => "First message must be authenticate",
            AuthFailure::Rejected => "Authentication rejected: invalid token",
        }
    }
}

/// Who is connecting, from the socket URL query.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "usuarioId")]
    pub participant_id: Option<String>,
    #[serde(rename = "nombre")]
    pub name: Option<String>,
}

impl ConnectParams {
    /// Presence announced for this connection. Falls back to the connection
    /// id when the client did not say who it is.
    fn presence(&self, peer_id: &str) -> Presence {
        let participant_id = self
            .participant_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(peer_id);
        Presence {
            participant_id: ParticipantId::from(participant_id),
            name: self.name.clone().filter(|n| !n.trim().is_empty()),
        }
    }
}

/// `GET /sesiones/{session_id}/ws?usuarioId=...&nombre=...`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, params, state))
}

async fn handle_socket(socket: WebSocket, session_id: String, params: ConnectParams, state: Arc<AppState>) {
    // Room membership and echo suppression key on the connection id.
    let peer_id = Uuid::new_v4().to_string();
    let presence = params.presence(&peer_id);
    debug!(
        "New connection {} ({}) for session {}",
        peer_id,
        presence.participant_id.as_str(),
        session_id
    );

    let (mut sender, mut receiver) = socket.split();

    if let Err(failure) = authenticate(&mut receiver, &state, state.config.auth_timeout()).await {
        warn!("Peer {} refused: {:?}", peer_id, failure);
        if failure != AuthFailure::Closed {
            let _ = send(&mut sender, &Message::error(failure.message())).await;
            let _ = sender.send(ws::Message::Close(None)).await;
        }
        return;
    }

    let mut room_rx = state.rooms.join(&session_id, &peer_id);
    info!(
        "Peer {} joined session {} ({} connected)",
        peer_id,
        session_id,
        state.rooms.peer_count(&session_id)
    );

    // Late joiners start on the document everyone else is looking at.
    if let Some(document) = state.documents.active(&session_id) {
        let change = DocumentChange {
            document_id: document.id.clone(),
            document: Some(document),
            timestamp: now_millis(),
            participant_id: ParticipantId::from(SERVER_SENDER),
        };
        if send(&mut sender, &Message::DocumentChanged(change)).await.is_err() {
            leave(&state, &session_id, &peer_id, presence);
            return;
        }
    }

    state.rooms.broadcast(
        &session_id,
        &peer_id,
        Message::ParticipantJoined(presence.clone()),
    );

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(ws::Message::Text(text))) => {
                        if let Some(reply) = handle_text(&state, &session_id, &peer_id, text.as_str()) {
                            if send(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(ws::Message::Binary(_))) => {
                        warn!("Binary frame from {} ignored", peer_id);
                        if send(&mut sender, &Message::error("Binary frames are not supported")).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(ws::Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                }
            }

            relayed = room_rx.recv() => {
                match relayed {
                    Ok((from, message)) => {
                        if from != peer_id && send(&mut sender, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Peer {} lagged, {} messages skipped", peer_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    leave(&state, &session_id, &peer_id, presence);
}

/// Wait for the `authenticate` message and check its token.
async fn authenticate(receiver: &mut WsReceiver, state: &AppState, timeout: Duration) -> Result<(), AuthFailure> {
    let first_text = async {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(ws::Message::Text(text)) => return Some(text),
                Ok(ws::Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    };

    let text = match tokio::time::timeout(timeout, first_text).await {
        Err(_) => return Err(AuthFailure::Timeout),
        Ok(None) => return Err(AuthFailure::Closed),
        Ok(Some(text)) => text,
    };

    match Message::from_json(text.as_str()) {
        Ok(Message::Authenticate(auth)) if state.config.accepts_token(&auth.token) => Ok(()),
        Ok(Message::Authenticate(_)) => Err(AuthFailure::Rejected),
        _ => Err(AuthFailure::NotAuthenticate),
    }
}

/// Route one client frame. Returns a reply for the sender, if any.
fn handle_text(state: &AppState, session_id: &str, peer_id: &str, text: &str) -> Option<Message> {
    match Message::from_json(text) {
        Ok(message @ (Message::Annotation(_) | Message::Viewport(_))) => {
            state.rooms.broadcast(session_id, peer_id, message);
            None
        }
        Ok(Message::Authenticate(_)) => {
            debug!("Peer {} re-sent authenticate, ignored", peer_id);
            None
        }
        Ok(other) => {
            let kind = other.kind().wire_name();
            warn!("Peer {} sent server-only message {}", peer_id, kind);
            Some(Message::error(format!("Unexpected message type: {}", kind)))
        }
        Err(e) => {
            warn!("Invalid message from {}: {}", peer_id, e);
            Some(Message::error(format!("Invalid message: {}", e)))
        }
    }
}

fn leave(state: &AppState, session_id: &str, peer_id: &str, presence: Presence) {
    state.rooms.leave(session_id, peer_id);
    info!(
        "Peer {} ({}) left session {}",
        peer_id,
        presence.participant_id.as_str(),
        session_id
    );
    state
        .rooms
        .broadcast(session_id, peer_id, Message::ParticipantLeft(presence));
}

async fn send(sender: &mut WsSender, message: &Message) -> Result<(), axum::Error> {
    match message.to_json() {
        Ok(json) => sender.send(ws::Message::Text(json.into())).await,
        Err(e) => {
            warn!("Dropping unserializable {}: {}", message.kind().wire_name(), e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn state() -> AppState {
        AppState::new(ServerConfig::default())
    }

    #[test]
    fn test_annotation_is_relayed() {
        let state = state();
        let mut rx = state.rooms.join("s1", "other");
        let json = r##"{"type":"evento-anotacion","data":{"tipo":"draw","datos":{"puntos":[{"x":1,"y":2}],"color":"#ff0000","grosor":3},"timestamp":1,"usuarioId":"u1"}}"##;
        assert!(handle_text(&state, "s1", "peer", json).is_none());
        let (from, message) = rx.try_recv().unwrap();
        assert_eq!(from, "peer");
        assert!(matches!(message, Message::Annotation(_)));
    }

    #[test]
    fn test_viewport_is_relayed() {
        let state = state();
        let mut rx = state.rooms.join("s1", "other");
        let json = r#"{"type":"evento-viewport","data":{"zoom":1.2,"panX":0,"panY":0,"timestamp":1,"usuarioId":"u1"}}"#;
        assert!(handle_text(&state, "s1", "peer", json).is_none());
        assert!(matches!(rx.try_recv().unwrap().1, Message::Viewport(_)));
    }

    #[test]
    fn test_malformed_gets_error_reply() {
        let state = state();
        let mut rx = state.rooms.join("s1", "other");
        let reply = handle_text(&state, "s1", "peer", "{not json");
        assert!(matches!(reply, Some(Message::Error(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_server_only_message_refused() {
        let state = state();
        let mut rx = state.rooms.join("s1", "other");
        let json = r#"{"type":"usuario-conectado","data":{"usuarioId":"x"}}"#;
        match handle_text(&state, "s1", "peer", json) {
            Some(Message::Error(e)) => assert!(e.message.contains("usuario-conectado")),
            other => panic!("Expected error reply, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_presence_uses_announced_participant() {
        let params = ConnectParams {
            participant_id: Some("dr-ruiz".to_string()),
            name: Some("Dra. Ruiz".to_string()),
        };
        let presence = params.presence("3f1c-peer");
        assert_eq!(presence.participant_id, ParticipantId::from("dr-ruiz"));
        assert_eq!(presence.name.as_deref(), Some("Dra. Ruiz"));

        let blank = ConnectParams {
            participant_id: Some("  ".to_string()),
            name: Some(String::new()),
        };
        let presence = blank.presence("3f1c-peer");
        assert_eq!(presence.participant_id, ParticipantId::from("3f1c-peer"));
        assert!(presence.name.is_none());

        assert_eq!(
            ConnectParams::default().presence("3f1c-peer").participant_id,
            ParticipantId::from("3f1c-peer")
        );
    }

    #[test]
    fn test_repeated_authenticate_ignored() {
        let state = state();
        let json = Message::authenticate("tok").to_json().unwrap();
        assert!(handle_text(&state, "s1", "peer", &json).is_none());
    }
}
