//! Outbound lifecycle notifications.

use async_trait::async_trait;
use imagegen_core::messages::{ArtifactInfo, TaskMessage};
use imagegen_core::task::Task;

/// Receives task lifecycle events from workers and the dispatcher.
///
/// Implementations must not block: delivery happens on the worker's task.
#[async_trait]
pub trait TaskNotifier: Send + Sync {
    /// Push a message to everyone watching `task_id`.
    async fn publish(&self, task_id: &str, message: TaskMessage);

    async fn notify_progress(
        &self,
        task_id: &str,
        completed_count: i32,
        total_count: i32,
        latest_image: Option<ArtifactInfo>,
    ) {
        self.publish(
            task_id,
            TaskMessage::Progress {
                completed_count,
                total_count,
                latest_image,
            },
        )
        .await;
    }

    async fn notify_complete(&self, task: &Task) {
        self.publish(&task.task_id, TaskMessage::complete(task)).await;
    }

    async fn notify_error(&self, task_id: &str, message: &str) {
        self.publish(task_id, TaskMessage::error(message)).await;
    }
}

/// Discards every notification.
pub struct NoopNotifier;

#[async_trait]
impl TaskNotifier for NoopNotifier {
    async fn publish(&self, _task_id: &str, _message: TaskMessage) {}
}
