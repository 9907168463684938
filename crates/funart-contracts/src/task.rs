use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    /// Paused by the vendor; resumes on its own.
    Suspended,
    Succeeded,
    Failed,
    Canceled,
    /// The vendor no longer knows the task, usually because it expired.
    Unknown,
    /// Any status string this crate does not know. Polled like a live task until the timeout.
    #[serde(other)]
    Unrecognized,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            TaskStatus::Pending
                | TaskStatus::Running
                | TaskStatus::Suspended
                | TaskStatus::Unrecognized
        )
    }

    pub fn is_success(self) -> bool {
        self == TaskStatus::Succeeded
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Suspended => "SUSPENDED",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
            TaskStatus::Unknown => "UNKNOWN",
            TaskStatus::Unrecognized => "UNRECOGNIZED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote job handle for video modalities. Only polling mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTask {
    pub task_id: String,
    pub status: TaskStatus,
}

impl GenerationTask {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResult {
    pub result_urls: Vec<String>,
    pub expanded_prompt: Option<String>,
    pub request_id: Option<String>,
}
