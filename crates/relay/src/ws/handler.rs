use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use livenb_core::protocol::{validate_session_id, GroupKey, Role};
use livenb_core::types::DbId;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::AppResult;
use crate::relay::{ClientSession, Relay};
use crate::state::AppState;
use crate::ws::GroupManager;

#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    /// Relay address spawned workers should connect back to.
    pub server_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerQuery {
    /// Address of the machine the worker runs on.
    pub machine: Option<String>,
}

/// GET /ws/client/{notebook_id}/{session_id}
pub async fn client_ws_handler(
    ws: WebSocketUpgrade,
    Path((notebook_id, session_id)): Path<(DbId, String)>,
    Query(query): Query<ClientQuery>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    validate_session_id(&session_id)?;
    Ok(ws.on_upgrade(move |socket| {
        handle_client_socket(socket, state.relay, notebook_id, session_id, query.server_address)
    }))
}

/// GET /ws/worker/{notebook_id}/{session_id}/{worker_id}
pub async fn worker_ws_handler(
    ws: WebSocketUpgrade,
    Path((notebook_id, session_id, worker_id)): Path<(DbId, String, DbId)>,
    Query(query): Query<WorkerQuery>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    validate_session_id(&session_id)?;
    Ok(ws.on_upgrade(move |socket| {
        handle_worker_socket(socket, state.relay, notebook_id, session_id, worker_id, query.machine)
    }))
}

/// Forward channel messages to the WebSocket sink until either side closes.
fn spawn_sender(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    conn_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %conn_id, "WebSocket sink closed");
                break;
            }
        }
    })
}

async fn attach(
    groups: &GroupManager,
    socket: WebSocket,
    key: &GroupKey,
    conn_id: &str,
) -> (futures::stream::SplitStream<WebSocket>, tokio::task::JoinHandle<()>) {
    let rx = groups.join(key, conn_id.to_string()).await;
    let (sink, stream) = socket.split();
    (stream, spawn_sender(sink, rx, conn_id.to_string()))
}

async fn handle_client_socket(
    socket: WebSocket,
    relay: Arc<Relay>,
    notebook_id: DbId,
    session_id: String,
    server_address: Option<String>,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut session = ClientSession::new(&conn_id, notebook_id, session_id, server_address);
    let key = session.group();
    tracing::info!(conn_id = %conn_id, group = %key, "Client connected");

    let (mut stream, send_task) = attach(relay.groups(), socket, &key, &conn_id).await;

    if let Err(e) = relay.client_opened(&session).await {
        tracing::error!(conn_id = %conn_id, error = %e, "Failed to ensure a worker on open");
    }

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Err(e) = relay.handle_client_text(&mut session, text.as_str()).await {
                    tracing::error!(conn_id = %conn_id, error = %e, "Failed to handle client frame");
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    relay.groups().leave(&key, &conn_id).await;
    send_task.abort();
    relay.client_closed(&session).await;
    tracing::info!(conn_id = %conn_id, group = %key, "Client disconnected");
}

async fn handle_worker_socket(
    socket: WebSocket,
    relay: Arc<Relay>,
    notebook_id: DbId,
    session_id: String,
    worker_id: DbId,
    machine: Option<String>,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let key = GroupKey::new(Role::Worker, notebook_id, session_id.clone());
    tracing::info!(conn_id = %conn_id, group = %key, worker_id, "Worker connected");

    let session = relay
        .worker_opened(&conn_id, notebook_id, session_id, worker_id, machine)
        .await;
    let (mut stream, send_task) = attach(relay.groups(), socket, &key, &conn_id).await;

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                relay.handle_worker_text(&session, text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    relay.groups().leave(&key, &conn_id).await;
    send_task.abort();
    relay.worker_closed(&session).await;
    tracing::info!(conn_id = %conn_id, group = %key, worker_id, "Worker disconnected");
}
