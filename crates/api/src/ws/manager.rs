use std::collections::HashMap;

use async_trait::async_trait;
use imagegen_core::messages::TaskMessage;
use imagegen_core::types::TaskId;
use imagegen_pipeline::TaskNotifier;
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing messages to one subscribed connection.
pub type TaskSender = mpsc::UnboundedSender<TaskMessage>;

/// Tracks which WebSocket connections watch which task.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared between the HTTP layer and the dispatcher (as its
/// [`TaskNotifier`]).
pub struct TaskSubscribers {
    tasks: RwLock<HashMap<TaskId, HashMap<String, TaskSender>>>,
}

impl TaskSubscribers {
    /// Create a new, empty subscriber set.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Register `conn_id` as a subscriber of `task_id`.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink. Re-subscribing the same
    /// connection replaces its previous channel.
    pub async fn subscribe(
        &self,
        task_id: &str,
        conn_id: &str,
    ) -> mpsc::UnboundedReceiver<TaskMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tasks
            .write()
            .await
            .entry(task_id.to_string())
            .or_default()
            .insert(conn_id.to_string(), tx);
        rx
    }

    /// Remove one subscription. The task entry is dropped with its last
    /// subscriber.
    pub async fn unsubscribe(&self, task_id: &str, conn_id: &str) {
        let mut tasks = self.tasks.write().await;
        if let Some(conns) = tasks.get_mut(task_id) {
            conns.remove(conn_id);
            if conns.is_empty() {
                tasks.remove(task_id);
            }
        }
    }

    /// Deliver a message to every subscriber of `task_id`.
    ///
    /// Subscribers whose channels are closed are pruned in the same pass.
    /// Returns the number of connections the message was delivered to.
    pub async fn broadcast(&self, task_id: &str, message: &TaskMessage) -> usize {
        let mut tasks = self.tasks.write().await;
        let Some(conns) = tasks.get_mut(task_id) else {
            return 0;
        };

        conns.retain(|conn_id, sender| {
            let delivered = sender.send(message.clone()).is_ok();
            if !delivered {
                tracing::debug!(task_id, conn_id = %conn_id, "Pruned closed subscriber");
            }
            delivered
        });
        let delivered = conns.len();

        if conns.is_empty() {
            tasks.remove(task_id);
        }
        delivered
    }

    /// Number of connections currently watching `task_id`.
    pub async fn subscriber_count(&self, task_id: &str) -> usize {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map_or(0, HashMap::len)
    }

    /// Number of tasks with at least one subscriber.
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Total number of subscriptions across all tasks.
    pub async fn connection_count(&self) -> usize {
        self.tasks.read().await.values().map(HashMap::len).sum()
    }

    /// Drop every subscription.
    ///
    /// Each connection's receiver then yields `None`, which makes its
    /// handler send a Close frame and exit.
    pub async fn shutdown_all(&self) {
        let mut tasks = self.tasks.write().await;
        let count: usize = tasks.values().map(HashMap::len).sum();
        tasks.clear();
        tracing::info!(count, "Closed all task subscriptions");
    }
}

impl Default for TaskSubscribers {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskNotifier for TaskSubscribers {
    async fn publish(&self, task_id: &str, message: TaskMessage) {
        let delivered = self.broadcast(task_id, &message).await;
        tracing::trace!(task_id, delivered, "Task message published");
    }
}
