use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use imagegen_core::error::CoreError;
use imagegen_core::messages::TaskMessage;
use imagegen_core::task::Task;
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::ws::heartbeat::Heartbeat;

type WsSink = SplitSink<WebSocket, Message>;

/// HTTP handler that upgrades the connection to a task subscription.
///
/// Unknown tasks are rejected with 404 before the upgrade.
pub async fn task_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Response> {
    if state.tasks.find(&task_id).await?.is_none() {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Task",
            id: task_id,
        }));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, task_id)))
}

/// Manage a single subscription after upgrade.
///
/// One loop merges pushed messages, the store poll, pings, inbound frames,
/// and the pong deadline. The first terminal message ends it; a Close
/// frame is always sent on the way out.
async fn handle_socket(socket: WebSocket, state: AppState, task_id: String) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(task_id = %task_id, conn_id = %conn_id, "Task subscriber connected");

    let mut rx = state.subscribers.subscribe(&task_id, &conn_id).await;
    let (mut sink, mut stream) = socket.split();

    // Re-read after subscribing: a transition that happened before the
    // subscription existed is only visible in the store.
    let mut last = match state.tasks.find(&task_id).await {
        Ok(Some(task)) => Some(task),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to load subscribed task");
            None
        }
    };

    let finished = match last.as_ref().and_then(TaskMessage::for_task) {
        Some(message) => {
            let terminal = message.is_terminal();
            send_message(&mut sink, &message).await.is_err() || terminal
        }
        None => last.is_none(),
    };

    if !finished {
        let mut heartbeat = Heartbeat::from_config(&state.config);
        loop {
            let message = tokio::select! {
                biased;

                pushed = rx.recv() => match pushed {
                    Some(message) => message,
                    // Subscription dropped by shutdown.
                    None => break,
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Pong(_))) => {
                        heartbeat.pong();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                        break;
                    }
                },
                () = &mut heartbeat.deadline => {
                    tracing::debug!(conn_id = %conn_id, "Pong deadline exceeded");
                    break;
                }
                _ = heartbeat.ping.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                    continue;
                }
                _ = heartbeat.poll.tick() => {
                    match poll_change(&state, &task_id, &mut last).await {
                        Some(polled) if polled.is_terminal() => {
                            match flush_pending(&mut rx, &mut sink).await {
                                Ok(Some(pushed)) => pushed,
                                Ok(None) => polled,
                                Err(_) => break,
                            }
                        }
                        Some(polled) => polled,
                        None => continue,
                    }
                }
            };

            let terminal = message.is_terminal();
            if send_message(&mut sink, &message).await.is_err() || terminal {
                break;
            }
        }
    }

    state.subscribers.unsubscribe(&task_id, &conn_id).await;
    let _ = sink.send(Message::Close(None)).await;
    tracing::info!(task_id = %task_id, conn_id = %conn_id, "Task subscriber disconnected");
}

/// Re-read the task and report a status or `completed_at` change.
async fn poll_change(
    state: &AppState,
    task_id: &str,
    last: &mut Option<Task>,
) -> Option<TaskMessage> {
    let task = match state.tasks.find(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(task_id, error = %e, "Subscriber poll failed");
            return None;
        }
    };

    let changed = last
        .as_ref()
        .is_none_or(|prev| prev.status != task.status || prev.completed_at != task.completed_at);
    if !changed {
        return None;
    }

    let message = TaskMessage::for_task(&task);
    *last = Some(task);
    message
}

/// Send pushed messages that arrived before the store showed a terminal
/// state. Returns the first pushed terminal message without sending it.
async fn flush_pending(
    rx: &mut mpsc::UnboundedReceiver<TaskMessage>,
    sink: &mut WsSink,
) -> Result<Option<TaskMessage>, axum::Error> {
    while let Ok(message) = rx.try_recv() {
        if message.is_terminal() {
            return Ok(Some(message));
        }
        send_message(sink, &message).await?;
    }
    Ok(None)
}

async fn send_message(sink: &mut WsSink, message: &TaskMessage) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize task message");
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await
}
