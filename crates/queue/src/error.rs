//! Error types for the upload queue.

use serde::{Deserialize, Serialize};

/// Reason a submitted file was refused admission to the queue.
///
/// Admission failures are data: they are attached to the rejected
/// [`Transfer`](crate::Transfer) and reported through the unaccepted-files
/// listeners, never returned as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileError {
    #[error("The upload queue is full")]
    QueueFull,

    #[error("The file is too large")]
    FileTooLarge,

    #[error("That type of file is not accepted")]
    UnacceptedMimeType,

    #[error("File is empty, or is a folder")]
    ZeroByteFile,
}

impl FileError {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Self::QueueFull => "QUEUE_FULL",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::UnacceptedMimeType => "UNACCEPTED_MIME_TYPE",
            Self::ZeroByteFile => "ZERO_BYTE_FILE",
        }
    }
}

/// Errors produced while building an [`UploadQueue`](crate::UploadQueue).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid accepted MIME type pattern: {0}")]
    InvalidMimePattern(#[from] regex::Error),

    #[error("environment not supported: {0}")]
    Unsupported(String),

    #[error("no uploader configured")]
    MissingUploader,

    #[error("no tokio runtime available to run transfers")]
    NoRuntime,
}

/// Errors produced while sending a single transfer.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("upload aborted")]
    Aborted,

    #[error("server responded {status}: {body}")]
    Http { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

impl SendError {
    /// Short failure status handed to send-fail hooks.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Aborted => "abort",
            _ => "error",
        }
    }

    /// HTTP status code, when the server answered at all.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
