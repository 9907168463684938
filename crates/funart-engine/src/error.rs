use std::fmt;

use funart_contracts::TaskStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GenerationError>;

/// Which vendor exchange an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStage {
    Synthesis,
    Submit,
    Poll,
    Download,
}

impl fmt::Display for ApiStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ApiStage::Synthesis => "synthesis call",
            ApiStage::Submit => "task submit",
            ApiStage::Poll => "task poll",
            ApiStage::Download => "result download",
        };
        f.write_str(label)
    }
}

/// Coarse classification used by callers that only care about the failure family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Transport,
    EmptyResult,
    Local,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{stage} failed ({status}): {code} - {message}")]
    Api {
        stage: ApiStage,
        status: u16,
        code: String,
        message: String,
    },

    #[error("task {task_id} ended with status {status}: {code} - {message}")]
    TaskFailed {
        task_id: String,
        status: TaskStatus,
        code: String,
        message: String,
    },

    #[error("{stage} request failed: {source}")]
    Network {
        stage: ApiStage,
        #[source]
        source: reqwest::Error,
    },

    #[error("empty result: {0}")]
    EmptyResult(String),

    #[error("task {task_id} still {status} after {waited_s:.1}s")]
    TimedOut {
        task_id: String,
        status: TaskStatus,
        waited_s: f64,
    },

    #[error("task {task_id} wait cancelled")]
    Cancelled { task_id: String },

    #[error("media codec error: {0}")]
    Codec(String),

    #[error("vendor payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenerationError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn empty_result(msg: impl Into<String>) -> Self {
        Self::EmptyResult(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Configuration(_) => ErrorKind::Configuration,
            GenerationError::Validation(_) => ErrorKind::Validation,
            GenerationError::Api { .. }
            | GenerationError::TaskFailed { .. }
            | GenerationError::Network { .. }
            | GenerationError::TimedOut { .. }
            | GenerationError::Cancelled { .. } => ErrorKind::Transport,
            GenerationError::EmptyResult(_) => ErrorKind::EmptyResult,
            GenerationError::Codec(_) | GenerationError::Decode(_) | GenerationError::Io(_) => {
                ErrorKind::Local
            }
        }
    }
}

impl From<image::ImageError> for GenerationError {
    fn from(value: image::ImageError) -> Self {
        Self::Codec(value.to_string())
    }
}

impl From<hound::Error> for GenerationError {
    fn from(value: hound::Error) -> Self {
        Self::Codec(value.to_string())
    }
}

impl From<funart_contracts::ShapeError> for GenerationError {
    fn from(value: funart_contracts::ShapeError) -> Self {
        Self::Validation(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use funart_contracts::TaskStatus;

    use super::{ApiStage, ErrorKind, GenerationError};

    #[test]
    fn api_error_renders_vendor_code_and_message() {
        let err = GenerationError::Api {
            stage: ApiStage::Submit,
            status: 401,
            code: "InvalidApiKey".to_string(),
            message: "Invalid API-key provided.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "task submit failed (401): InvalidApiKey - Invalid API-key provided."
        );
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn kinds_keep_empty_result_apart_from_transport() {
        assert_eq!(
            GenerationError::empty_result("no images").kind(),
            ErrorKind::EmptyResult
        );
        assert_eq!(
            GenerationError::TaskFailed {
                task_id: "abc".to_string(),
                status: TaskStatus::Failed,
                code: "InternalError".to_string(),
                message: "boom".to_string(),
            }
            .kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            GenerationError::validation("bad size").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            GenerationError::configuration("no key").kind(),
            ErrorKind::Configuration
        );
    }
}
