//! Transport seam between transfers and the network.
//!
//! The queue never talks to HTTP directly. Production code plugs in
//! `upqueue-http`; tests plug in scripted mocks.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::types::{ProgressEvent, UploadRequest, UploadResponse};

/// Sends one file to a remote endpoint.
pub trait Uploader: Send + Sync {
    /// Posts `request` and resolves with the server reply.
    ///
    /// Progress is reported on `progress` as the body is written. Delivery is
    /// best effort: implementations should `try_send` and drop events when
    /// the channel is full. Dropping the returned future aborts the request.
    fn send(
        &self,
        request: UploadRequest,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse, SendError>> + Send + '_>>;
}
