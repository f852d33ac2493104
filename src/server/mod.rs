//! Relay server
//!
//! One axum router: a `/ws` upgrade endpoint carrying the whole protocol
//! and a small JSON status API. Frame size is bounded at the transport
//! layer before the protocol ever sees a payload.

pub mod connection;
pub mod outbound;
pub mod registry;
pub mod relay;
pub mod sync;

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::{AppConfig, TransportConfig};
use crate::error::Result;

pub use registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub transport: TransportConfig,
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Server occupancy summary
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub rooms: usize,
    pub connections: usize,
    pub uptime_seconds: u64,
}

async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<ServerStatus>> {
    let status = ServerStatus {
        rooms: state.registry.room_count(),
        connections: state.registry.connection_count(),
        uptime_seconds: state.registry.uptime_seconds(),
    };
    Json(ApiResponse::ok(status))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let max_bytes = state.transport.max_frame_bytes;
    let capacity = state.transport.outbound_queue;
    ws.max_message_size(max_bytes)
        .max_frame_size(max_bytes)
        .on_upgrade(move |socket| {
            connection::handle_socket(socket, state.registry.clone(), capacity)
        })
}

/// Build the application router
pub fn router(registry: Arc<SessionRegistry>, transport: TransportConfig) -> Router {
    let state = AppState {
        registry,
        transport,
    };
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and run the relay server until the task is cancelled
pub async fn serve(config: AppConfig) -> Result<()> {
    serve_with(config, Arc::new(SessionRegistry::new())).await
}

/// Run the relay server against an existing registry
pub async fn serve_with(config: AppConfig, registry: Arc<SessionRegistry>) -> Result<()> {
    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server running on port {}", config.server.port);
    axum::serve(listener, router(registry, config.transport)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_samples, FrameEnvelope, ServerMessage};
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    type WsClient = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn start_server() -> (String, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let app = router(registry.clone(), TransportConfig::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{}/ws", addr), registry)
    }

    async fn connect(url: &str) -> WsClient {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    async fn next_server_message(ws: &mut WsClient) -> ServerMessage {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for message")
                .expect("connection ended")
                .expect("websocket error");
            if let WsMessage::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn next_binary(ws: &mut WsClient) -> Vec<u8> {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection ended")
                .expect("websocket error");
            if let WsMessage::Binary(bytes) = message {
                return bytes;
            }
        }
    }

    async fn wait_for_room(registry: &SessionRegistry, room_code: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.has_room(room_code) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("room never appeared");
    }

    #[tokio::test]
    async fn test_room_lifecycle_over_websocket() {
        let (url, registry) = start_server().await;

        let mut host = connect(&url).await;
        host.send(WsMessage::Text(
            r#"{"type":"create-room","roomCode":"ABCDEF"}"#.to_string(),
        ))
        .await
        .unwrap();
        wait_for_room(&registry, "ABCDEF").await;

        let mut client = connect(&url).await;
        client
            .send(WsMessage::Text(
                r#"{"type":"join-room","roomCode":"ABCDEF"}"#.to_string(),
            ))
            .await
            .unwrap();

        // Joiner: confirmation then occupancy
        assert_eq!(
            next_server_message(&mut client).await,
            ServerMessage::RoomJoined {
                room_code: "ABCDEF".to_string()
            }
        );
        assert_eq!(
            next_server_message(&mut client).await,
            ServerMessage::RoomCountUpdate { count: 2 }
        );

        // Host: membership notification then occupancy
        assert!(matches!(
            next_server_message(&mut host).await,
            ServerMessage::ParticipantJoined { .. }
        ));
        assert_eq!(
            next_server_message(&mut host).await,
            ServerMessage::RoomCountUpdate { count: 2 }
        );

        // Audio fan-out reaches the listener unmodified
        let payload = encode_samples(&[0.5f32; 1024]);
        let envelope = FrameEnvelope::new("ABCDEF", payload.clone());
        host.send(WsMessage::Binary(envelope.encode().unwrap().to_vec()))
            .await
            .unwrap();
        assert_eq!(next_binary(&mut client).await, payload);

        // Host departure closes the room for the listener
        host.close(None).await.unwrap();
        assert_eq!(
            next_server_message(&mut client).await,
            ServerMessage::RoomClosed
        );

        // The code is unreachable immediately afterwards
        let mut late = connect(&url).await;
        late.send(WsMessage::Text(
            r#"{"type":"join-room","roomCode":"ABCDEF"}"#.to_string(),
        ))
        .await
        .unwrap();
        assert_eq!(
            next_server_message(&mut late).await,
            ServerMessage::Error {
                message: "Room not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_state_update_reaches_listener_only() {
        let (url, registry) = start_server().await;

        let mut host = connect(&url).await;
        host.send(WsMessage::Text(
            r#"{"type":"create-room","roomCode":"SYNC"}"#.to_string(),
        ))
        .await
        .unwrap();
        wait_for_room(&registry, "SYNC").await;

        let mut client = connect(&url).await;
        client
            .send(WsMessage::Text(
                r#"{"type":"join-room","roomCode":"SYNC"}"#.to_string(),
            ))
            .await
            .unwrap();
        // room-joined + count
        next_server_message(&mut client).await;
        next_server_message(&mut client).await;

        host.send(WsMessage::Text(
            r#"{"type":"sync-state","roomCode":"SYNC","state":{"isPlaying":true,"position":7.25}}"#
                .to_string(),
        ))
        .await
        .unwrap();

        match next_server_message(&mut client).await {
            ServerMessage::StateUpdate { state } => {
                assert!(state.is_playing);
                assert_eq!(state.position, 7.25);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
