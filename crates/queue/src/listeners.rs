//! Callback registry for queue-level notifications.
//!
//! Listeners are registered on the [`QueueBuilder`](crate::QueueBuilder)
//! and frozen once the queue is built. They are always invoked with the
//! queue lock released, so a listener may call straight back into the
//! queue (remove a file, start the upload, ...).

use std::sync::Arc;

use crate::queue::UploadQueue;
use crate::transfer::Transfer;

/// Callback receiving only the queue.
pub type QueueCallback = Box<dyn Fn(&UploadQueue) + Send + Sync>;

/// Callback receiving the queue and one transfer.
pub type TransferCallback = Box<dyn Fn(&UploadQueue, &Arc<Transfer>) + Send + Sync>;

/// Callback receiving the queue and a batch of transfers.
pub type BatchCallback = Box<dyn Fn(&UploadQueue, &[Arc<Transfer>]) + Send + Sync>;

/// Pre-filter run over each submitted batch before admission checks.
pub type FileListFilter =
    Box<dyn Fn(&UploadQueue, Vec<Arc<Transfer>>) -> Vec<Arc<Transfer>> + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    pub init: Vec<QueueCallback>,
    pub queue_add: Vec<TransferCallback>,
    pub queue_change: Vec<QueueCallback>,
    pub queue_remove: Vec<TransferCallback>,
    pub unaccepted_files: Vec<BatchCallback>,
    pub upload_start: Vec<QueueCallback>,
    pub upload_finish: Vec<QueueCallback>,
    pub process_file_list: Option<FileListFilter>,
}

impl Listeners {
    pub fn emit_init(&self, queue: &UploadQueue) {
        for cb in &self.init {
            cb(queue);
        }
    }

    pub fn emit_queue_add(&self, queue: &UploadQueue, transfer: &Arc<Transfer>) {
        for cb in &self.queue_add {
            cb(queue, transfer);
        }
    }

    pub fn emit_queue_change(&self, queue: &UploadQueue) {
        for cb in &self.queue_change {
            cb(queue);
        }
    }

    pub fn emit_queue_remove(&self, queue: &UploadQueue, transfer: &Arc<Transfer>) {
        for cb in &self.queue_remove {
            cb(queue, transfer);
        }
    }

    pub fn emit_unaccepted_files(&self, queue: &UploadQueue, files: &[Arc<Transfer>]) {
        for cb in &self.unaccepted_files {
            cb(queue, files);
        }
    }

    pub fn emit_upload_start(&self, queue: &UploadQueue) {
        for cb in &self.upload_start {
            cb(queue);
        }
    }

    pub fn emit_upload_finish(&self, queue: &UploadQueue) {
        for cb in &self.upload_finish {
            cb(queue);
        }
    }

    /// Runs the file-list filter, or passes the batch through untouched.
    pub fn process_file_list(
        &self,
        queue: &UploadQueue,
        files: Vec<Arc<Transfer>>,
    ) -> Vec<Arc<Transfer>> {
        match &self.process_file_list {
            Some(filter) => filter(queue, files),
            None => files,
        }
    }
}
