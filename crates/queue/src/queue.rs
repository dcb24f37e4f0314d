//! The upload queue: admission control and the bounded-concurrency scheduler.
//!
//! # Scheduling
//!
//! The queue owns a fixed number of slots (`upload_concurrency`). Starting
//! an upload occupies every slot and runs the advance step once per slot.
//! The advance step frees one slot, pops the oldest pending transfer and,
//! if there was one, re-occupies the slot and spawns the send. Each send
//! task runs the advance step again when it finishes, whatever the
//! outcome. The slot counter alone decides when the run is over, so
//! transfers that complete instantly never recurse into the scheduler.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::admission::{AdmissionPolicy, Occupancy};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::listeners::Listeners;
use crate::lock;
use crate::transfer::{SendTarget, Transfer};
use crate::types::{Capabilities, RawFile, TransferState};
use crate::uploader::Uploader;

/// Mutable queue bookkeeping, guarded by one lock.
#[derive(Default)]
struct QueueState {
    pending: VecDeque<Arc<Transfer>>,
    total_bytes: u64,
    in_flight: usize,
    /// Admitted by a `submit` call but not appended yet.
    reserved: Occupancy,
}

impl QueueState {
    fn is_pending(&self, transfer: &Arc<Transfer>) -> bool {
        self.pending.iter().any(|t| Arc::ptr_eq(t, transfer))
    }
}

pub(crate) struct Shared {
    config: QueueConfig,
    policy: AdmissionPolicy,
    target: SendTarget,
    uploader: Arc<dyn Uploader>,
    listeners: Listeners,
    runtime: Handle,
    state: Mutex<QueueState>,
    /// `true` while an upload run is in progress.
    uploading: watch::Sender<bool>,
}

/// Outcome of one [`UploadQueue::submit`] call.
#[derive(Debug, Default)]
pub struct SubmitSummary {
    pub accepted: Vec<Arc<Transfer>>,
    pub rejected: Vec<Arc<Transfer>>,
}

/// What the advance step decided while holding the lock.
enum Advance {
    Launch(Arc<Transfer>),
    Finished,
    Draining,
}

/// A file-upload queue bound to one endpoint.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct UploadQueue {
    shared: Arc<Shared>,
}

impl UploadQueue {
    /// Starts building a queue with the given configuration.
    pub fn builder(config: QueueConfig) -> QueueBuilder {
        QueueBuilder::new(config)
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    // -- queries -----------------------------------------------------------

    /// Number of pending transfers.
    pub fn len(&self) -> usize {
        lock(&self.shared.state).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the sizes of all pending transfers.
    pub fn total_bytes_in_queue(&self) -> u64 {
        lock(&self.shared.state).total_bytes
    }

    /// Number of occupied slots.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.shared.state).in_flight
    }

    pub fn is_upload_in_progress(&self) -> bool {
        self.in_flight_count() > 0
    }

    /// Snapshot of the pending transfers in upload order.
    pub fn pending(&self) -> Vec<Arc<Transfer>> {
        lock(&self.shared.state).pending.iter().cloned().collect()
    }

    /// Resolves once no upload is in progress.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.shared.uploading.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|uploading| !*uploading).await;
    }

    // -- admission ---------------------------------------------------------

    /// Wraps, filters and admits a batch of files.
    ///
    /// Rejected files are reported together through the unaccepted-files
    /// listeners before any accepted file is appended. Accepted files keep
    /// their relative order; each append fires queue-add then queue-change.
    pub fn submit(&self, files: impl IntoIterator<Item = RawFile>) -> SubmitSummary {
        let shared = &self.shared;
        let candidates: Vec<Arc<Transfer>> = files
            .into_iter()
            .map(|file| Arc::new(Transfer::new(file, Arc::downgrade(shared))))
            .collect();
        let candidates = shared.listeners.process_file_list(self, candidates);

        // Checks and reservations happen under one lock so concurrent
        // submits cannot both claim the last free place.
        let mut summary = SubmitSummary::default();
        {
            let mut state = lock(&shared.state);
            let mut occupancy = Occupancy {
                files: state.pending.len() + state.reserved.files,
                bytes: state.total_bytes + state.reserved.bytes,
            };

            for transfer in candidates {
                let seen = summary
                    .accepted
                    .iter()
                    .chain(&summary.rejected)
                    .any(|t| Arc::ptr_eq(t, &transfer));
                let stale = transfer.state() != TransferState::Queued;
                if seen || stale || state.is_pending(&transfer) {
                    debug!(
                        transfer = %transfer.id(),
                        name = %transfer.name(),
                        "skipping resubmitted transfer"
                    );
                    continue;
                }

                match shared
                    .policy
                    .check(transfer.size(), transfer.mime_type(), occupancy)
                {
                    Ok(()) => {
                        occupancy.files += 1;
                        occupancy.bytes += transfer.size();
                        state.reserved.files += 1;
                        state.reserved.bytes += transfer.size();
                        summary.accepted.push(transfer);
                    }
                    Err(err) => {
                        debug!(
                            transfer = %transfer.id(),
                            name = %transfer.name(),
                            size = transfer.size(),
                            error = err.code(),
                            "file rejected"
                        );
                        transfer.reject(err);
                        summary.rejected.push(transfer);
                    }
                }
            }
        }

        if !summary.rejected.is_empty() {
            shared
                .listeners
                .emit_unaccepted_files(self, &summary.rejected);
        }

        for transfer in &summary.accepted {
            {
                let mut state = lock(&shared.state);
                state.reserved.files -= 1;
                state.reserved.bytes -= transfer.size();
                state.pending.push_back(Arc::clone(transfer));
                state.total_bytes += transfer.size();
            }
            debug!(transfer = %transfer.id(), name = %transfer.name(), "file queued");
            shared.listeners.emit_queue_add(self, transfer);
            shared.listeners.emit_queue_change(self);
        }

        summary
    }

    /// Removes a pending transfer, matched by identity.
    ///
    /// Returns `false` if the transfer is not pending, for example because
    /// it has already started sending.
    pub fn remove(&self, transfer: &Transfer) -> bool {
        let removed = {
            let mut state = lock(&self.shared.state);
            let index = state
                .pending
                .iter()
                .position(|t| std::ptr::eq(Arc::as_ptr(t), transfer));
            match index.and_then(|i| state.pending.remove(i)) {
                Some(t) => {
                    state.total_bytes -= t.size();
                    t
                }
                None => return false,
            }
        };

        removed.mark_removed();
        debug!(transfer = %removed.id(), name = %removed.name(), "file removed");
        self.shared.listeners.emit_queue_remove(self, &removed);
        self.shared.listeners.emit_queue_change(self);
        true
    }

    /// Drops every pending transfer. In-flight transfers keep going.
    pub fn clear(&self) {
        let dropped: Vec<Arc<Transfer>> = {
            let mut state = lock(&self.shared.state);
            state.total_bytes = 0;
            state.pending.drain(..).collect()
        };
        for transfer in &dropped {
            transfer.mark_removed();
        }
        debug!(count = dropped.len(), "queue cleared");
        self.shared.listeners.emit_queue_change(self);
    }

    // -- scheduling --------------------------------------------------------

    /// Starts uploading pending files, `upload_concurrency` at a time.
    ///
    /// Does nothing while an upload is already in progress.
    pub fn begin_upload(&self) {
        let concurrency = self.shared.config.upload_concurrency;
        {
            let mut state = lock(&self.shared.state);
            if state.in_flight > 0 {
                debug!("upload already in progress");
                return;
            }
            // Claim every slot before notifying so a re-entrant call is a
            // no-op. `is_upload_in_progress()` is already true inside
            // upload-start listeners.
            state.in_flight = concurrency;
            self.shared.uploading.send_replace(true);
        }

        info!(
            pending = self.len(),
            concurrency, "upload started"
        );
        self.shared.listeners.emit_upload_start(self);

        for _ in 0..concurrency {
            self.advance();
        }
    }

    /// Frees one slot and refills it from the head of the queue.
    fn advance(&self) {
        let step = {
            let mut state = lock(&self.shared.state);
            state.in_flight -= 1;
            match state.pending.pop_front() {
                Some(transfer) => {
                    state.total_bytes -= transfer.size();
                    state.in_flight += 1;
                    transfer.mark_sending();
                    Advance::Launch(transfer)
                }
                None if state.in_flight == 0 => Advance::Finished,
                None => Advance::Draining,
            }
        };

        match step {
            Advance::Launch(transfer) => {
                let slot = Slot(self.clone());
                self.shared.listeners.emit_queue_change(self);
                self.launch(transfer, slot);
            }
            Advance::Finished => {
                info!("upload finished");
                // Idle only once the finish listeners are done.
                let _idle = MarkIdle(self);
                self.shared.listeners.emit_upload_finish(self);
            }
            Advance::Draining => {}
        }
    }

    /// Spawns the send. The slot is released when the task ends, even if
    /// a transfer hook panicked.
    fn launch(&self, transfer: Arc<Transfer>, slot: Slot) {
        debug!(
            transfer = %transfer.id(),
            name = %transfer.name(),
            size = transfer.size(),
            "starting transfer"
        );
        self.shared.runtime.spawn(async move {
            let shared = &slot.0.shared;
            transfer.send(shared.uploader.as_ref(), &shared.target).await;
            drop(slot);
        });
    }
}

/// One occupied scheduler slot. Dropping it runs the advance step.
struct Slot(UploadQueue);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.advance();
    }
}

/// Clears the in-progress flag when dropped, unless a new run has
/// claimed slots in the meantime.
struct MarkIdle<'a>(&'a UploadQueue);

impl Drop for MarkIdle<'_> {
    fn drop(&mut self) {
        let state = lock(&self.0.shared.state);
        if state.in_flight == 0 {
            self.0.shared.uploading.send_replace(false);
        }
    }
}

/// Builds an [`UploadQueue`] and registers its listeners.
pub struct QueueBuilder {
    config: QueueConfig,
    uploader: Option<Arc<dyn Uploader>>,
    capabilities: Capabilities,
    runtime: Option<Handle>,
    listeners: Listeners,
}

impl QueueBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            uploader: None,
            capabilities: Capabilities::FULL,
            runtime: None,
            listeners: Listeners::default(),
        }
    }

    /// Transport used for every transfer.
    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Result of the environment capability check.
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Runtime that runs transfers. Defaults to the current runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn on_init(mut self, cb: impl Fn(&UploadQueue) + Send + Sync + 'static) -> Self {
        self.listeners.init.push(Box::new(cb));
        self
    }

    pub fn on_queue_add(
        mut self,
        cb: impl Fn(&UploadQueue, &Arc<Transfer>) + Send + Sync + 'static,
    ) -> Self {
        self.listeners.queue_add.push(Box::new(cb));
        self
    }

    pub fn on_queue_change(mut self, cb: impl Fn(&UploadQueue) + Send + Sync + 'static) -> Self {
        self.listeners.queue_change.push(Box::new(cb));
        self
    }

    pub fn on_queue_remove(
        mut self,
        cb: impl Fn(&UploadQueue, &Arc<Transfer>) + Send + Sync + 'static,
    ) -> Self {
        self.listeners.queue_remove.push(Box::new(cb));
        self
    }

    /// Called once per submitted batch that had at least one rejection.
    pub fn on_unaccepted_files(
        mut self,
        cb: impl Fn(&UploadQueue, &[Arc<Transfer>]) + Send + Sync + 'static,
    ) -> Self {
        self.listeners.unaccepted_files.push(Box::new(cb));
        self
    }

    pub fn on_upload_start(mut self, cb: impl Fn(&UploadQueue) + Send + Sync + 'static) -> Self {
        self.listeners.upload_start.push(Box::new(cb));
        self
    }

    pub fn on_upload_finish(mut self, cb: impl Fn(&UploadQueue) + Send + Sync + 'static) -> Self {
        self.listeners.upload_finish.push(Box::new(cb));
        self
    }

    /// Replaces the pre-filter applied to each batch before admission.
    /// It may reorder, drop or add transfers.
    pub fn process_file_list(
        mut self,
        filter: impl Fn(&UploadQueue, Vec<Arc<Transfer>>) -> Vec<Arc<Transfer>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.listeners.process_file_list = Some(Box::new(filter));
        self
    }

    /// Validates the configuration, builds the queue and fires the init
    /// listeners.
    pub fn build(self) -> Result<UploadQueue, QueueError> {
        self.config.validate()?;

        if !self.capabilities.is_supported() {
            return Err(QueueError::Unsupported(self.capabilities.missing()));
        }

        let uploader = self.uploader.ok_or(QueueError::MissingUploader)?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| QueueError::NoRuntime)?,
        };
        let policy = AdmissionPolicy::from_config(&self.config)?;
        let target = SendTarget {
            endpoint: self.config.post_url.clone(),
            field_name: self.config.field_name.clone(),
            extra_fields: self.config.extra_fields.clone(),
        };
        let (uploading, _) = watch::channel(false);

        let queue = UploadQueue {
            shared: Arc::new(Shared {
                config: self.config,
                policy,
                target,
                uploader,
                listeners: self.listeners,
                runtime,
                state: Mutex::new(QueueState::default()),
                uploading,
            }),
        };

        debug!(
            endpoint = %queue.shared.target.endpoint,
            concurrency = queue.shared.config.upload_concurrency,
            "upload queue ready"
        );
        queue.shared.listeners.emit_init(&queue);
        Ok(queue)
    }
}
