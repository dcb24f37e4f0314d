//! A single file moving through the queue.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{FileError, SendError};
use crate::lock;
use crate::queue::{Shared, UploadQueue};
use crate::rate::RateSampler;
use crate::types::{
    FileSource, ProgressEvent, RawFile, TransferState, UploadRequest, UploadResponse,
};
use crate::uploader::Uploader;

/// Buffered progress events per transfer; extra events are dropped.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Hook fired right before the request is dispatched.
pub type BeginSendHook = Arc<dyn Fn(&Transfer) + Send + Sync>;
/// Hook fired per progress event with the instantaneous bytes/second.
pub type ProgressHook = Arc<dyn Fn(&Transfer, ProgressEvent, f64) + Send + Sync>;
/// Hook fired when the server accepted the upload.
pub type EndSendHook = Arc<dyn Fn(&Transfer, &UploadResponse) + Send + Sync>;
/// Hook fired when the upload failed or was aborted.
pub type SendFailHook = Arc<dyn Fn(&Transfer, &SendError) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    begin_send: Vec<BeginSendHook>,
    progress: Vec<ProgressHook>,
    end_send: Vec<EndSendHook>,
    send_fail: Vec<SendFailHook>,
}

/// Where and how the scheduler asks a transfer to send itself.
#[derive(Debug, Clone)]
pub(crate) struct SendTarget {
    pub endpoint: String,
    pub field_name: String,
    pub extra_fields: BTreeMap<String, String>,
}

/// One file's upload unit, from submission to completion.
///
/// Identity matters: two transfers with the same name and size are still
/// different transfers. Compare with [`Arc::ptr_eq`] or [`Transfer::id`].
pub struct Transfer {
    id: Uuid,
    source: FileSource,
    name: String,
    size: u64,
    mime_type: String,
    error: OnceLock<FileError>,
    state: Mutex<TransferState>,
    hooks: Mutex<Hooks>,
    abort: CancellationToken,
    queue: Weak<Shared>,
}

impl Transfer {
    pub(crate) fn new(file: RawFile, queue: Weak<Shared>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: file.source,
            name: file.name,
            size: file.size,
            mime_type: file.mime_type,
            error: OnceLock::new(),
            state: Mutex::new(TransferState::Queued),
            hooks: Mutex::new(Hooks::default()),
            abort: CancellationToken::new(),
            queue,
        }
    }

    /// Creates a transfer that belongs to no queue.
    ///
    /// Useful for feeding extra entries through a file-list filter.
    pub fn detached(file: RawFile) -> Self {
        Self::new(file, Weak::new())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Admission error, if this transfer was rejected.
    pub fn error(&self) -> Option<FileError> {
        self.error.get().copied()
    }

    pub fn state(&self) -> TransferState {
        *lock(&self.state)
    }

    // -- hooks -------------------------------------------------------------

    pub fn on_begin_send(&self, hook: impl Fn(&Transfer) + Send + Sync + 'static) {
        lock(&self.hooks).begin_send.push(Arc::new(hook));
    }

    pub fn on_progress(&self, hook: impl Fn(&Transfer, ProgressEvent, f64) + Send + Sync + 'static) {
        lock(&self.hooks).progress.push(Arc::new(hook));
    }

    pub fn on_end_send(&self, hook: impl Fn(&Transfer, &UploadResponse) + Send + Sync + 'static) {
        lock(&self.hooks).end_send.push(Arc::new(hook));
    }

    pub fn on_send_fail(&self, hook: impl Fn(&Transfer, &SendError) + Send + Sync + 'static) {
        lock(&self.hooks).send_fail.push(Arc::new(hook));
    }

    // -- public operations -------------------------------------------------

    /// Aborts the outstanding request.
    ///
    /// Does nothing unless the transfer is currently sending. The abort is
    /// reported through the send-fail hooks and frees the slot like any
    /// other failure.
    pub fn cancel(&self) {
        if self.state() == TransferState::Sending {
            debug!(transfer = %self.id, name = %self.name, "cancelling transfer");
            self.abort.cancel();
        }
    }

    /// Removes this transfer from its queue. Returns `false` unless it was
    /// still pending there.
    pub fn remove_from_queue(&self) -> bool {
        match self.queue.upgrade() {
            Some(shared) => UploadQueue::from_shared(shared).remove(self),
            None => false,
        }
    }

    // -- state transitions driven by the queue -----------------------------

    /// Records the admission error. The first error sticks.
    pub(crate) fn reject(&self, error: FileError) {
        let _ = self.error.set(error);
        self.transition(TransferState::Queued, TransferState::Rejected);
    }

    pub(crate) fn mark_removed(&self) {
        self.transition(TransferState::Queued, TransferState::Removed);
    }

    pub(crate) fn mark_sending(&self) {
        self.transition(TransferState::Queued, TransferState::Sending);
    }

    fn transition(&self, from: TransferState, to: TransferState) {
        let mut state = lock(&self.state);
        if *state == from {
            *state = to;
        }
    }

    fn request(&self, target: &SendTarget) -> UploadRequest {
        UploadRequest {
            endpoint: target.endpoint.clone(),
            field_name: target.field_name.clone(),
            extra_fields: target.extra_fields.clone(),
            source: self.source.clone(),
            file_name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
        }
    }

    /// Sends the file and fires the hooks in order: begin-send, progress,
    /// then exactly one of end-send or send-fail.
    ///
    /// The caller is responsible for advancing the scheduler afterwards.
    pub(crate) async fn send(&self, uploader: &dyn Uploader, target: &SendTarget) {
        self.fire_begin_send();

        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let mut sampler = RateSampler::new();
        let mut request = uploader.send(self.request(target), progress_tx);

        let result = loop {
            tokio::select! {
                biased;
                _ = self.abort.cancelled() => break Err(SendError::Aborted),
                Some(event) = progress_rx.recv() => {
                    let rate = sampler.sample(event.loaded);
                    self.fire_progress(event, rate);
                }
                result = &mut request => break result,
            }
        };
        // Abort the request if it is still running.
        drop(request);

        while let Ok(event) = progress_rx.try_recv() {
            let rate = sampler.sample(event.loaded);
            self.fire_progress(event, rate);
        }

        match result {
            Ok(response) => {
                *lock(&self.state) = TransferState::Succeeded;
                debug!(transfer = %self.id, name = %self.name, status = response.status, "transfer sent");
                self.fire_end_send(&response);
            }
            Err(err) => {
                *lock(&self.state) = if matches!(err, SendError::Aborted) {
                    TransferState::Cancelled
                } else {
                    TransferState::Failed
                };
                warn!(transfer = %self.id, name = %self.name, error = %err, "transfer failed");
                self.fire_send_fail(&err);
            }
        }
    }

    fn fire_begin_send(&self) {
        let hooks = lock(&self.hooks).begin_send.clone();
        for hook in hooks {
            hook(self);
        }
    }

    fn fire_progress(&self, event: ProgressEvent, rate: f64) {
        let hooks = lock(&self.hooks).progress.clone();
        for hook in hooks {
            hook(self, event, rate);
        }
    }

    fn fire_end_send(&self, response: &UploadResponse) {
        let hooks = lock(&self.hooks).end_send.clone();
        for hook in hooks {
            hook(self, response);
        }
    }

    fn fire_send_fail(&self, err: &SendError) {
        let hooks = lock(&self.hooks).send_fail.clone();
        for hook in hooks {
            hook(self, err);
        }
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("error", &self.error())
            .field("state", &self.state())
            .finish()
    }
}
