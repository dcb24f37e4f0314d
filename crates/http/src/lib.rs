//! HTTP transport for the upload queue.
//!
//! Posts each file as a `multipart/form-data` body with `reqwest`,
//! streaming the file contents and reporting progress as the body is
//! consumed by the connection.

mod uploader;

pub use uploader::HttpUploader;

/// Size of each chunk read from the file while streaming the body.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Errors produced while setting up the HTTP transport.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}
