//! Push-channel message shapes for task subscribers.
//!
//! Serialized as JSON text frames:
//!
//! ```text
//! {"type":"progress","completedCount":1,"totalCount":4,"latestImage":{...}}
//! {"type":"complete","completedCount":4,"totalCount":4,"latestImage":{...}}
//! {"type":"error","message":"rate limited"}
//! ```

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskStatus};
use crate::types::TaskId;

/// Descriptor of one stored output image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub id: String,
    pub task_id: TaskId,
    pub file_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub image_url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

/// A lifecycle notification delivered to the subscribers of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum TaskMessage {
    Progress {
        completed_count: i32,
        total_count: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        latest_image: Option<ArtifactInfo>,
    },
    Complete {
        completed_count: i32,
        total_count: i32,
        #[serde(default)]
        latest_image: Option<ArtifactInfo>,
    },
    Error {
        message: String,
    },
}

impl TaskMessage {
    /// Completion message for a finished task (`completedCount = totalCount`).
    pub fn complete(task: &Task) -> Self {
        TaskMessage::Complete {
            completed_count: task.total_count,
            total_count: task.total_count,
            latest_image: task.artifact(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        TaskMessage::Error {
            message: message.into(),
        }
    }

    /// The message matching a task's persisted state, if any is due.
    ///
    /// Queued tasks have nothing to report; processing tasks report their
    /// stored counters.
    pub fn for_task(task: &Task) -> Option<Self> {
        match task.status {
            TaskStatus::Queued => None,
            TaskStatus::Processing => Some(TaskMessage::Progress {
                completed_count: task.completed_count,
                total_count: task.total_count,
                latest_image: None,
            }),
            TaskStatus::Completed => Some(TaskMessage::complete(task)),
            TaskStatus::Failed => Some(TaskMessage::error(
                task.error_message.clone().unwrap_or_default(),
            )),
        }
    }

    /// `complete` and `error` end a subscription.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskMessage::Progress { .. })
    }
}
