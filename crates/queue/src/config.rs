//! Queue configuration.
//!
//! Every field is optional when deserialized; missing fields take the
//! defaults below.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Upload queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of files waiting in the queue.
    #[serde(default = "default_maximum_queue_size")]
    pub maximum_queue_size: usize,

    /// Files of this many bytes or more are refused.
    #[serde(default = "default_maximum_file_size")]
    pub maximum_file_size: u64,

    /// Total byte budget for queued files. `None` or `0` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_bytes_in_queue: Option<u64>,

    /// Number of simultaneous transfers.
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// MIME type patterns (regular expressions). Empty accepts everything.
    #[serde(default)]
    pub accepted_mime_types: Vec<String>,

    /// Endpoint every file is posted to.
    #[serde(default = "default_post_url")]
    pub post_url: String,

    /// Multipart field name carrying the file.
    #[serde(default = "default_field_name")]
    pub field_name: String,

    /// Additional form fields sent with every file.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_fields: BTreeMap<String, String>,

    /// Accept zero-byte files instead of rejecting them. Dropped folders
    /// show up as zero-byte entries, so this defaults to `true`.
    #[serde(default = "default_true")]
    pub silence_zero_byte_errors: bool,
}

fn default_maximum_queue_size() -> usize {
    10
}

fn default_maximum_file_size() -> u64 {
    1_048_576
}

fn default_upload_concurrency() -> usize {
    2
}

fn default_post_url() -> String {
    "http://localhost/upload.php".into()
}

fn default_field_name() -> String {
    "filesinput".into()
}

fn default_true() -> bool {
    true
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            maximum_queue_size: default_maximum_queue_size(),
            maximum_file_size: default_maximum_file_size(),
            maximum_bytes_in_queue: None,
            upload_concurrency: default_upload_concurrency(),
            accepted_mime_types: Vec::new(),
            post_url: default_post_url(),
            field_name: default_field_name(),
            extra_fields: BTreeMap::new(),
            silence_zero_byte_errors: default_true(),
        }
    }
}

impl QueueConfig {
    /// Checks values that would leave the queue unable to operate.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.upload_concurrency == 0 {
            return Err(QueueError::InvalidConfig(
                "upload_concurrency must be at least 1".into(),
            ));
        }
        if self.post_url.trim().is_empty() {
            return Err(QueueError::InvalidConfig("post_url is empty".into()));
        }
        Ok(())
    }

    /// Effective byte budget, treating `Some(0)` as unbounded.
    pub fn byte_budget(&self) -> Option<u64> {
        self.maximum_bytes_in_queue.filter(|&b| b > 0)
    }
}
