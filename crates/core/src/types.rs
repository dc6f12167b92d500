/// Externally visible task identifier (UUID v4 unless chosen by the caller).
pub type TaskId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
