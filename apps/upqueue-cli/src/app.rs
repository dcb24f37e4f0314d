//! Wires the queue, the HTTP transport and terminal logging together.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use upqueue_core::{Capabilities, QueueConfig, RawFile, Transfer, UploadQueue};
use upqueue_http::HttpUploader;

/// Outcome counts for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub succeeded: usize,
    pub failed: usize,
    pub rejected: usize,
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

/// What this build of the transport can do.
fn detect_capabilities() -> Capabilities {
    HttpUploader::capabilities()
}

/// Uploads `files` and waits for the queue to drain or for Ctrl-C.
pub async fn run(config: QueueConfig, files: Vec<PathBuf>) -> anyhow::Result<Report> {
    let uploader = Arc::new(HttpUploader::new()?);
    let counters = Arc::new(Counters::default());
    let hooks = Arc::clone(&counters);

    let queue = UploadQueue::builder(config)
        .uploader(uploader)
        .capabilities(detect_capabilities())
        .on_init(|q| tracing::debug!(url = %q.config().post_url, "queue ready"))
        .on_queue_add(move |_, transfer| attach_hooks(transfer, &hooks))
        .on_unaccepted_files(|_, rejected| {
            for t in rejected {
                let reason = t.error().map(|e| e.to_string()).unwrap_or_default();
                tracing::warn!(name = %t.name(), size = t.size(), "{reason}");
            }
        })
        .on_upload_start(|q| tracing::info!(files = q.len(), "uploading"))
        .build()?;

    let mut rejected = 0;
    let mut raw = Vec::with_capacity(files.len());
    for path in &files {
        match RawFile::from_path(path) {
            Ok(file) => raw.push(file),
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read file: {e}");
                rejected += 1;
            }
        }
    }

    let summary = queue.submit(raw);
    rejected += summary.rejected.len();

    queue.begin_upload();
    tokio::select! {
        _ = queue.wait_until_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, cancelling uploads");
            queue.clear();
            for t in &summary.accepted {
                t.cancel();
            }
            queue.wait_until_idle().await;
        }
    }

    Ok(Report {
        succeeded: counters.succeeded.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
        rejected,
    })
}

fn attach_hooks(transfer: &Arc<Transfer>, counters: &Arc<Counters>) {
    transfer.on_begin_send(|t| tracing::info!(name = %t.name(), size = t.size(), "sending"));

    transfer.on_progress(|t, ev, rate| {
        tracing::debug!(
            name = %t.name(),
            loaded = ev.loaded,
            total = ev.total,
            bytes_per_sec = rate as u64,
            "progress"
        );
    });

    let c = Arc::clone(counters);
    transfer.on_end_send(move |t, resp| {
        c.succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::info!(name = %t.name(), status = resp.status, "uploaded");
    });

    let c = Arc::clone(counters);
    transfer.on_send_fail(move |t, err| {
        c.failed.fetch_add(1, Ordering::Relaxed);
        tracing::error!(name = %t.name(), status = err.status(), "upload failed: {err}");
    });
}
