use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::registry::ActorKind;
use crate::error::AppError;
use crate::protocol;
use crate::state::AppState;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
pub struct UserSocketQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
struct RiderHello {
    rider_id: Uuid,
}

pub async fn rider_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_rider_socket(socket, state))
}

pub async fn user_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<UserSocketQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    if query.user_id.is_nil() {
        return Err(AppError::BadRequest("user_id is required".to_string()));
    }

    let user_id = query.user_id;
    Ok(ws.on_upgrade(move |socket| handle_user_socket(socket, state, user_id)))
}

async fn handle_rider_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();

    let rider_id = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_rider_hello(&mut receiver)).await {
        Ok(Some(rider_id)) => rider_id,
        Ok(None) => {
            warn!("rider socket closed without identifying");
            return;
        }
        Err(_) => {
            warn!("rider socket handshake timed out");
            return;
        }
    };

    serve_connection(sender, receiver, state, ActorKind::Rider, rider_id).await;
}

async fn handle_user_socket(socket: WebSocket, state: Arc<AppState>, user_id: Uuid) {
    let (sender, receiver) = socket.split();
    serve_connection(sender, receiver, state, ActorKind::Customer, user_id).await;
}

/// Waits for the first text frame, which must name the rider.
async fn read_rider_hello(receiver: &mut SplitStream<WebSocket>) -> Option<Uuid> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                return match serde_json::from_str::<RiderHello>(&text) {
                    Ok(hello) if !hello.rider_id.is_nil() => Some(hello.rider_id),
                    _ => {
                        debug!("rider hello frame did not carry a rider_id");
                        None
                    }
                };
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn serve_connection(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    state: Arc<AppState>,
    kind: ActorKind,
    actor_id: Uuid,
) {
    let (tx, rx) = mpsc::channel::<String>(state.config.connection_buffer);
    let connection_id = state.connections.register(kind, actor_id, tx);

    info!(kind = %kind, actor_id = %actor_id, "websocket client connected");

    let mut send_task = tokio::spawn(async move {
        let mut outbound = ReceiverStream::new(rx);
        while let Some(text) = outbound.next().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let inbound_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match kind {
                    ActorKind::Rider => {
                        protocol::handle_rider_message(&inbound_state, actor_id, &text).await
                    }
                    ActorKind::Customer => {
                        protocol::handle_customer_message(&inbound_state, actor_id, &text).await
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let reader_done = tokio::select! {
        _ = &mut recv_task => true,
        _ = &mut send_task => false,
    };
    if !reader_done {
        // let an in-flight message finish before tearing down
        let _ = recv_task.await;
    }

    state
        .connections
        .unregister_connection(kind, actor_id, connection_id);
    send_task.abort();

    info!(kind = %kind, actor_id = %actor_id, "websocket client disconnected");
}
