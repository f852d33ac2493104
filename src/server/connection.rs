//! Per-connection WebSocket handling
//!
//! Each connection gets a reader loop (this task) and a writer task fed by
//! the connection's bounded outbound queue. Malformed input is logged and
//! ignored; the connection survives. Disconnection, however it happens,
//! funnels into the registry's teardown scan exactly once.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::protocol::{ClientMessage, ConnectionId, FrameEnvelope, ServerMessage};
use crate::server::outbound::{Outbound, OutboundQueue};
use crate::server::registry::SessionRegistry;
use crate::server::{relay, sync};

pub async fn handle_socket(
    socket: WebSocket,
    registry: Arc<SessionRegistry>,
    outbound_capacity: usize,
) {
    let conn = ConnectionId::new();
    let queue = OutboundQueue::new(outbound_capacity);
    registry.register_peer(conn, queue.clone());
    info!("Connection opened: {}", conn);

    let (mut sink, mut stream) = socket.split();

    let writer_queue = queue.clone();
    let writer = tokio::spawn(async move {
        while let Some(payload) = writer_queue.pop().await {
            let message = match payload {
                Outbound::Text(text) => Message::Text(text),
                Outbound::Binary(bytes) => Message::Binary(bytes.to_vec()),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                warn!("WebSocket error: conn={} err={}", conn, e);
                break;
            }
        };

        match message {
            Message::Text(text) => handle_text(&registry, conn, &text),
            Message::Binary(bytes) => handle_frame(&registry, conn, &bytes),
            Message::Close(_) => break,
            _ => {}
        }
    }

    registry.remove_connection(conn);
    registry.unregister_peer(conn);
    queue.close();
    let _ = writer.await;
    info!("Connection closed: {}", conn);
}

/// Dispatch one text message. Failures that belong to the request surface
/// as an `error` message; malformed payloads are dropped with a log line.
fn handle_text(registry: &SessionRegistry, conn: ConnectionId, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            let err = ProtocolError::MalformedMessage(e.to_string());
            warn!("Bad message: conn={} err={}", conn, err);
            return;
        }
    };

    match message {
        ClientMessage::CreateRoom { room_code } => {
            if let Err(e) = registry.create_room(&room_code, conn) {
                registry.send_to(
                    conn,
                    &ServerMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
        ClientMessage::JoinRoom { room_code } => {
            if let Err(e) = registry.join_room(&room_code, conn) {
                registry.send_to(
                    conn,
                    &ServerMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
        ClientMessage::SyncState { room_code, state } => {
            // Rejections are silent for the sender
            sync::publish_state(registry, &room_code, conn, state);
        }
    }
}

/// Dispatch one binary frame envelope
fn handle_frame(registry: &SessionRegistry, conn: ConnectionId, bytes: &[u8]) {
    match FrameEnvelope::decode(bytes) {
        Ok(envelope) => relay::relay_frame(
            registry,
            &envelope.room_code,
            conn,
            Bytes::from(envelope.payload),
        ),
        Err(e) => {
            debug!("Bad frame: conn={} err={}", conn, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::OUTBOUND_QUEUE_CAPACITY;
    use crate::protocol::encode_samples;

    fn connect(registry: &SessionRegistry) -> (ConnectionId, Arc<OutboundQueue>) {
        let conn = ConnectionId::new();
        let queue = OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY);
        registry.register_peer(conn, queue.clone());
        (conn, queue)
    }

    fn messages(queue: &OutboundQueue) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Some(payload) = queue.try_pop() {
            if let Outbound::Text(json) = payload {
                out.push(serde_json::from_str(&json).unwrap());
            }
        }
        out
    }

    #[test]
    fn test_join_unknown_room_yields_error_message() {
        let registry = SessionRegistry::new();
        let (conn, queue) = connect(&registry);

        handle_text(&registry, conn, r#"{"type":"join-room","roomCode":"NOPE"}"#);

        assert_eq!(
            messages(&queue),
            vec![ServerMessage::Error {
                message: "Room not found".to_string()
            }]
        );
    }

    #[test]
    fn test_create_collision_yields_error_message() {
        let registry = SessionRegistry::new();
        let (first, _) = connect(&registry);
        let (second, second_queue) = connect(&registry);

        handle_text(&registry, first, r#"{"type":"create-room","roomCode":"X"}"#);
        handle_text(&registry, second, r#"{"type":"create-room","roomCode":"X"}"#);

        assert_eq!(
            messages(&second_queue),
            vec![ServerMessage::Error {
                message: "Room code already in use".to_string()
            }]
        );
    }

    #[test]
    fn test_malformed_text_ignored() {
        let registry = SessionRegistry::new();
        let (conn, queue) = connect(&registry);

        handle_text(&registry, conn, "garbage");
        handle_text(&registry, conn, r#"{"type":"no-such-op"}"#);

        assert!(messages(&queue).is_empty());
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_malformed_frame_ignored() {
        let registry = SessionRegistry::new();
        let (conn, queue) = connect(&registry);

        handle_frame(&registry, conn, &[0xff; 12]);
        assert!(messages(&queue).is_empty());
    }

    #[test]
    fn test_frame_envelope_relayed_to_listener() {
        let registry = SessionRegistry::new();
        let (host, _) = connect(&registry);
        let (listener, listener_queue) = connect(&registry);

        handle_text(&registry, host, r#"{"type":"create-room","roomCode":"R"}"#);
        handle_text(&registry, listener, r#"{"type":"join-room","roomCode":"R"}"#);
        while listener_queue.try_pop().is_some() {}

        let payload = encode_samples(&[0.5f32; 64]);
        let envelope = FrameEnvelope::new("R", payload.clone());
        handle_frame(&registry, host, &envelope.encode().unwrap());

        match listener_queue.try_pop() {
            Some(Outbound::Binary(bytes)) => assert_eq!(bytes.as_ref(), payload.as_slice()),
            other => panic!("expected relayed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_sync_state_from_non_host_is_silent() {
        let registry = SessionRegistry::new();
        let (host, host_queue) = connect(&registry);
        let (listener, listener_queue) = connect(&registry);

        handle_text(&registry, host, r#"{"type":"create-room","roomCode":"R"}"#);
        handle_text(&registry, listener, r#"{"type":"join-room","roomCode":"R"}"#);
        while host_queue.try_pop().is_some() {}
        while listener_queue.try_pop().is_some() {}

        handle_text(
            &registry,
            listener,
            r#"{"type":"sync-state","roomCode":"R","state":{"isPlaying":true,"position":1.0}}"#,
        );

        assert!(messages(&host_queue).is_empty());
        assert!(messages(&listener_queue).is_empty());
    }
}
