//! Generation task records and their lifecycle.
//!
//! A task moves `queued -> processing -> {completed | failed}`. The
//! `completed_at` timestamp is set exactly once, on entry into a terminal
//! status, so `completed_at.is_some() == status.is_terminal()` holds for
//! every persisted snapshot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::messages::ArtifactInfo;
use crate::types::{TaskId, Timestamp};

/// Upper bound on images a single task may request.
pub const MAX_IMAGES_PER_TASK: i32 = 4;

/// Maximum length of a caller-chosen task id.
const MAX_TASK_ID_LEN: usize = 64;

/// Maximum length of a resolved model id.
const MAX_MODEL_ID_LEN: usize = 128;

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LEN: usize = 8000;

/// Maximum page size for task listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for task listing.
const DEFAULT_LIMIT: i64 = 50;

/// Aspect ratios accepted by the bundled providers.
pub const SUPPORTED_ASPECT_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Storage representation (also the JSON representation).
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completed and failed tasks never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(CoreError::Validation(format!("Unknown task status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A reference image attached to a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceImage {
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Base64-encoded image bytes (standard alphabet, no data-URL prefix).
    pub data: String,
}

/// Provider-facing parameters persisted with the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<ReferenceImage>,
    /// Free-form caller parameters, also consulted by the model resolver.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A row from the `generation_tasks` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub provider_name: String,
    pub model_id: String,
    pub prompt: String,
    pub params: TaskParams,
    pub total_count: i32,
    pub completed_count: i32,
    pub local_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub image_url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Task {
    /// Build a freshly queued task from its creation input.
    pub fn queued(input: NewTask, now: Timestamp) -> Self {
        Self {
            task_id: input.task_id,
            status: TaskStatus::Queued,
            provider_name: input.provider_name,
            model_id: input.model_id,
            prompt: input.prompt,
            params: input.params,
            total_count: input.total_count,
            completed_count: 0,
            local_path: None,
            thumbnail_path: None,
            image_url: None,
            width: None,
            height: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Descriptor of the stored result image, if the task produced one.
    pub fn artifact(&self) -> Option<ArtifactInfo> {
        if self.local_path.is_none() && self.image_url.is_none() {
            return None;
        }
        Some(ArtifactInfo {
            id: self.task_id.clone(),
            task_id: self.task_id.clone(),
            file_path: self.local_path.clone(),
            thumbnail_path: self.thumbnail_path.clone(),
            image_url: self.image_url.clone(),
            width: self.width,
            height: self.height,
        })
    }
}

/// Input for creating a queued task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_id: TaskId,
    pub provider_name: String,
    pub model_id: String,
    pub prompt: String,
    pub params: TaskParams,
    pub total_count: i32,
}

/// Result fields written when a task completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskResult {
    pub local_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub image_url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

impl From<&ArtifactInfo> for TaskResult {
    fn from(artifact: &ArtifactInfo) -> Self {
        Self {
            local_path: artifact.file_path.clone(),
            thumbnail_path: artifact.thumbnail_path.clone(),
            image_url: artifact.image_url.clone(),
            width: artifact.width,
            height: artifact.height,
        }
    }
}

/// Query parameters for `GET /api/v1/tasks`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

impl TaskListQuery {
    /// Effective `(limit, offset)` after applying defaults and caps.
    pub fn page(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a caller-chosen task id.
///
/// Rules: 1..=64 characters, ASCII alphanumeric, hyphen or underscore.
pub fn validate_task_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation("Task id must not be empty".to_string()));
    }
    if id.len() > MAX_TASK_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Task id must not exceed {MAX_TASK_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(
            "Task id may only contain alphanumeric, hyphen, or underscore characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate a resolved model id.
///
/// Model ids end up in provider URL paths, so they must be a single plain
/// path segment: 1..=128 characters, ASCII alphanumeric, dot, hyphen or
/// underscore, starting with an alphanumeric.
pub fn validate_model_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() || id.len() > MAX_MODEL_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Model id must be 1 to {MAX_MODEL_ID_LEN} characters"
        )));
    }
    let starts_alphanumeric = id.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts_alphanumeric
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(CoreError::Validation(format!("Invalid model id '{id}'")));
    }
    Ok(())
}

/// Validate the requested image count.
pub fn validate_count(count: i32) -> Result<(), CoreError> {
    if !(1..=MAX_IMAGES_PER_TASK).contains(&count) {
        return Err(CoreError::Validation(format!(
            "Image count must be between 1 and {MAX_IMAGES_PER_TASK}, got {count}"
        )));
    }
    Ok(())
}

/// Validate the prompt text.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".to_string()));
    }
    if prompt.chars().count() > MAX_PROMPT_LEN {
        return Err(CoreError::Validation(format!(
            "Prompt must not exceed {MAX_PROMPT_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate an optional aspect ratio against [`SUPPORTED_ASPECT_RATIOS`].
pub fn validate_aspect_ratio(ratio: Option<&str>) -> Result<(), CoreError> {
    match ratio {
        None => Ok(()),
        Some(r) if SUPPORTED_ASPECT_RATIOS.contains(&r) => Ok(()),
        Some(r) => Err(CoreError::Validation(format!(
            "Unsupported aspect ratio '{r}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
