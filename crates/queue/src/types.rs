//! Data types shared by the queue, transfers and uploaders.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Handle to the bytes of a file. Cloning never copies the contents.
#[derive(Clone)]
pub enum FileSource {
    /// File on disk, opened when the transfer starts.
    Path(PathBuf),
    /// Bytes already held in memory.
    Memory(Arc<[u8]>),
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Memory(b) => write!(f, "Memory({} bytes)", b.len()),
        }
    }
}

/// A file descriptor as handed over by whatever selected the files.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub source: FileSource,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl RawFile {
    /// Creates a descriptor from its parts.
    pub fn new(
        source: FileSource,
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            source,
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }

    /// In-memory descriptor; `size` is the buffer length.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::new(FileSource::Memory(data), name, size, mime_type)
    }

    /// Stats a file on disk and guesses its MIME type from the extension.
    ///
    /// Directories come back as zero-byte entries with an empty MIME type,
    /// which is how file pickers report dropped folders.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (size, mime_type) = if metadata.is_dir() {
            (0, String::new())
        } else {
            let mime = mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string();
            (metadata.len(), mime)
        };

        Ok(Self::new(
            FileSource::Path(path.to_path_buf()),
            name,
            size,
            mime_type,
        ))
    }
}

/// Environment features the queue depends on.
///
/// Detection is the caller's job; the result is handed to
/// [`QueueBuilder::capabilities`](crate::QueueBuilder::capabilities).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// File contents can be read as a byte stream.
    pub byte_streams: bool,
    /// Uploads can report progress while the body is being sent.
    pub upload_progress: bool,
}

impl Capabilities {
    /// Both capabilities present.
    pub const FULL: Self = Self {
        byte_streams: true,
        upload_progress: true,
    };

    pub fn is_supported(&self) -> bool {
        self.byte_streams && self.upload_progress
    }

    /// Names of the missing capabilities, comma separated.
    pub fn missing(&self) -> String {
        let mut missing = Vec::new();
        if !self.byte_streams {
            missing.push("byte streams");
        }
        if !self.upload_progress {
            missing.push("upload progress");
        }
        missing.join(", ")
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::FULL
    }
}

/// Lifecycle of a [`Transfer`](crate::Transfer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Created, waiting in the queue.
    Queued,
    /// Refused by admission control.
    Rejected,
    /// Taken out of the queue before it was sent.
    Removed,
    /// Request outstanding.
    Sending,
    Succeeded,
    Failed,
    Cancelled,
}

impl TransferState {
    /// Returns `true` once the state can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Removed | Self::Succeeded | Self::Failed | Self::Cancelled
        )
    }
}

/// Raw upload progress as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Bytes of the file sent so far.
    pub loaded: u64,
    /// Total bytes to send.
    pub total: u64,
}

/// Everything an [`Uploader`](crate::Uploader) needs to post one file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub endpoint: String,
    pub field_name: String,
    pub extra_fields: BTreeMap<String, String>,
    pub source: FileSource,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Successful server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}
