//! Client-side upload queue with admission control and bounded concurrency.
//!
//! Files are submitted as [`RawFile`] descriptors, checked against the
//! [`QueueConfig`] policy and appended to a FIFO queue. Starting the upload
//! keeps at most `upload_concurrency` transfers in flight, pulling the next
//! queued file whenever one finishes, fails or is cancelled.
//!
//! The network side is abstracted behind [`Uploader`]; `upqueue-http`
//! provides the HTTP implementation.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use upqueue_core::{QueueConfig, RawFile, UploadQueue, Uploader};
//! # async fn run(uploader: Arc<dyn Uploader>) -> Result<(), upqueue_core::QueueError> {
//! let queue = UploadQueue::builder(QueueConfig::default())
//!     .uploader(uploader)
//!     .on_unaccepted_files(|_, files| {
//!         for t in files {
//!             eprintln!("{}: {}", t.name(), t.error().unwrap());
//!         }
//!     })
//!     .build()?;
//!
//! queue.submit([RawFile::from_bytes("a.txt", "text/plain", b"hi".to_vec())]);
//! queue.begin_upload();
//! queue.wait_until_idle().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod admission;
pub mod config;
pub mod error;
pub mod listeners;
pub mod queue;
pub mod rate;
pub mod transfer;
pub mod types;
pub mod uploader;

pub use admission::{AdmissionPolicy, Occupancy};
pub use config::QueueConfig;
pub use error::{FileError, QueueError, SendError};
pub use queue::{QueueBuilder, SubmitSummary, UploadQueue};
pub use rate::RateSampler;
pub use transfer::Transfer;
pub use types::{
    Capabilities, FileSource, ProgressEvent, RawFile, TransferState, UploadRequest,
    UploadResponse,
};
pub use uploader::Uploader;

/// Locks a std mutex, recovering the data if a listener panicked while
/// holding it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
