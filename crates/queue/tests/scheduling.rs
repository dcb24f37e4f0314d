//! End-to-end scheduling behaviour through the public API.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use upqueue_core::{
    FileError, ProgressEvent, QueueConfig, RawFile, SendError, TransferState, UploadQueue,
    UploadRequest, UploadResponse, Uploader,
};

/// Reports each started file, then holds it until the test adds a permit.
struct GatedUploader {
    started: mpsc::UnboundedSender<String>,
    gate: Arc<Semaphore>,
    failing: HashSet<String>,
}

impl Uploader for GatedUploader {
    fn send(
        &self,
        request: UploadRequest,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse, SendError>> + Send + '_>> {
        Box::pin(async move {
            let _ = self.started.send(request.file_name.clone());
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| SendError::Transport(e.to_string()))?;
            permit.forget();

            let _ = progress.try_send(ProgressEvent {
                loaded: request.size,
                total: request.size,
            });
            if self.failing.contains(&request.file_name) {
                return Err(SendError::Http {
                    status: 500,
                    body: "nope".into(),
                });
            }
            Ok(UploadResponse {
                status: 201,
                body: request.file_name,
            })
        })
    }
}

struct Harness {
    queue: UploadQueue,
    started: mpsc::UnboundedReceiver<String>,
    gate: Arc<Semaphore>,
    starts: Arc<Mutex<u32>>,
    finishes: Arc<Mutex<u32>>,
}

impl Harness {
    fn new(config: QueueConfig, failing: &[&str]) -> Self {
        let (tx, started) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let uploader = GatedUploader {
            started: tx,
            gate: Arc::clone(&gate),
            failing: failing.iter().map(|s| s.to_string()).collect(),
        };
        let starts = Arc::new(Mutex::new(0));
        let finishes = Arc::new(Mutex::new(0));
        let (s, f) = (Arc::clone(&starts), Arc::clone(&finishes));

        let queue = UploadQueue::builder(config)
            .uploader(Arc::new(uploader))
            .on_upload_start(move |_| *s.lock().unwrap() += 1)
            .on_upload_finish(move |_| *f.lock().unwrap() += 1)
            .build()
            .unwrap();

        Self {
            queue,
            started,
            gate,
            starts,
            finishes,
        }
    }

    async fn next_started(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.started.recv())
            .await
            .expect("timed out waiting for a transfer to start")
            .expect("uploader dropped")
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    async fn idle(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.queue.wait_until_idle())
            .await
            .expect("timed out waiting for the queue to go idle");
    }
}

fn text(name: &str, size: usize) -> RawFile {
    RawFile::from_bytes(name, "text/plain", vec![b'x'; size])
}

fn five_files() -> Vec<RawFile> {
    ["a", "b", "c", "d", "e"]
        .iter()
        .map(|n| text(&format!("{n}.txt"), 10))
        .collect()
}

#[tokio::test]
async fn keeps_exactly_two_in_flight() {
    let mut h = Harness::new(QueueConfig::default(), &[]);
    h.queue.submit(five_files());

    h.queue.begin_upload();
    assert_eq!(h.queue.in_flight_count(), 2);
    assert_eq!(h.queue.len(), 3);
    assert_eq!(h.queue.total_bytes_in_queue(), 30);

    let mut order = vec![h.next_started().await, h.next_started().await];
    order.sort();
    assert_eq!(order, vec!["a.txt", "b.txt"]);

    for (expected_next, remaining) in [("c.txt", 2), ("d.txt", 1), ("e.txt", 0)] {
        h.release(1);
        assert_eq!(h.next_started().await, expected_next);
        assert_eq!(h.queue.in_flight_count(), 2);
        assert_eq!(h.queue.len(), remaining);
    }

    h.release(2);
    h.idle().await;
    assert_eq!(h.queue.in_flight_count(), 0);
    assert!(!h.queue.is_upload_in_progress());
    assert_eq!(*h.starts.lock().unwrap(), 1);
    assert_eq!(*h.finishes.lock().unwrap(), 1);
}

#[tokio::test]
async fn failure_and_cancel_free_slots() {
    let mut h = Harness::new(QueueConfig::default(), &["b.txt"]);
    let summary = h.queue.submit(five_files());
    let a = Arc::clone(&summary.accepted[0]);

    let failures = Arc::new(Mutex::new(Vec::new()));
    for t in &summary.accepted {
        let f = Arc::clone(&failures);
        t.on_send_fail(move |t, err| {
            f.lock()
                .unwrap()
                .push(format!("{} {}", t.name(), err.status()));
        });
    }

    h.queue.begin_upload();
    h.next_started().await;
    h.next_started().await;

    // Cancel "a" while "b" is still gated.
    a.cancel();
    assert_eq!(h.next_started().await, "c.txt");

    // Let "b" through; it fails, and "d" takes its slot.
    h.release(1);
    let next = h.next_started().await;
    assert_eq!(next, "d.txt");

    h.release(3);
    h.idle().await;

    assert_eq!(a.state(), TransferState::Cancelled);
    assert_eq!(summary.accepted[1].state(), TransferState::Failed);
    let failures = failures.lock().unwrap();
    assert!(failures.contains(&"a.txt abort".to_string()));
    assert!(failures.contains(&"b.txt error".to_string()));
    assert_eq!(*h.finishes.lock().unwrap(), 1);
}

#[tokio::test]
async fn begin_upload_is_idempotent_while_running() {
    let mut h = Harness::new(QueueConfig::default(), &[]);
    h.queue.submit(five_files());

    h.queue.begin_upload();
    h.next_started().await;
    h.queue.begin_upload();
    h.queue.begin_upload();

    assert_eq!(*h.starts.lock().unwrap(), 1);
    assert_eq!(h.queue.in_flight_count(), 2);
    assert_eq!(h.queue.len(), 3);

    h.release(5);
    h.idle().await;
    assert_eq!(*h.finishes.lock().unwrap(), 1);
}

#[tokio::test]
async fn removing_in_flight_transfer_fails() {
    let mut h = Harness::new(QueueConfig::default(), &[]);
    let summary = h.queue.submit(five_files());
    h.queue.begin_upload();
    h.next_started().await;

    let in_flight = &summary.accepted[0];
    assert_eq!(in_flight.state(), TransferState::Sending);
    assert!(!h.queue.remove(in_flight));
    assert!(!in_flight.remove_from_queue());
    assert_eq!(h.queue.len(), 3);
    assert_eq!(h.queue.total_bytes_in_queue(), 30);

    // A still-pending one can be removed mid-run.
    assert!(summary.accepted[4].remove_from_queue());
    assert_eq!(h.queue.len(), 2);

    h.release(4);
    h.idle().await;
    assert_eq!(summary.accepted[4].state(), TransferState::Removed);
}

#[tokio::test]
async fn fewer_files_than_slots() {
    let mut h = Harness::new(
        QueueConfig {
            upload_concurrency: 4,
            ..QueueConfig::default()
        },
        &[],
    );
    h.queue.submit([text("only.txt", 1)]);
    h.queue.begin_upload();
    assert_eq!(h.queue.in_flight_count(), 1);
    assert_eq!(h.next_started().await, "only.txt");

    h.release(1);
    h.idle().await;
    assert_eq!(*h.finishes.lock().unwrap(), 1);
}

#[tokio::test]
async fn queue_can_run_again_after_finishing() {
    let mut h = Harness::new(QueueConfig::default(), &[]);
    h.release(10);

    h.queue.submit([text("first.txt", 1)]);
    h.queue.begin_upload();
    h.next_started().await;
    h.idle().await;

    h.queue.submit([text("second.txt", 1)]);
    h.queue.begin_upload();
    assert_eq!(h.next_started().await, "second.txt");
    h.idle().await;

    assert_eq!(*h.starts.lock().unwrap(), 2);
    assert_eq!(*h.finishes.lock().unwrap(), 2);
}

#[tokio::test]
async fn progress_and_end_hooks_fire() {
    let mut h = Harness::new(QueueConfig::default(), &[]);
    let summary = h.queue.submit([text("a.txt", 64)]);

    let events = Arc::new(Mutex::new(Vec::new()));
    let t = &summary.accepted[0];
    let e = Arc::clone(&events);
    t.on_begin_send(move |t| e.lock().unwrap().push(format!("begin {}", t.name())));
    let e = Arc::clone(&events);
    t.on_progress(move |_, ev, rate| {
        assert!(rate >= 0.0);
        e.lock().unwrap().push(format!("progress {}/{}", ev.loaded, ev.total));
    });
    let e = Arc::clone(&events);
    t.on_end_send(move |_, resp| {
        e.lock()
            .unwrap()
            .push(format!("end {} {}", resp.status, resp.body));
    });

    h.release(1);
    h.queue.begin_upload();
    h.next_started().await;
    h.idle().await;

    assert_eq!(
        *events.lock().unwrap(),
        vec!["begin a.txt", "progress 64/64", "end 201 a.txt"]
    );
    assert_eq!(t.state(), TransferState::Succeeded);
}

#[tokio::test]
async fn single_slot_queue_rejects_second_file() {
    let unaccepted = Arc::new(Mutex::new(Vec::new()));
    let u = Arc::clone(&unaccepted);
    let queue = UploadQueue::builder(QueueConfig {
        maximum_queue_size: 1,
        accepted_mime_types: vec!["text/plain".into()],
        ..QueueConfig::default()
    })
    .uploader(Arc::new(GatedUploader {
        started: mpsc::unbounded_channel().0,
        gate: Arc::new(Semaphore::new(0)),
        failing: HashSet::new(),
    }))
    .on_unaccepted_files(move |_, files| {
        u.lock().unwrap().push(
            files
                .iter()
                .map(|t| (t.name().to_string(), t.error()))
                .collect::<Vec<_>>(),
        );
    })
    .build()
    .unwrap();

    queue.submit([text("one.txt", 100), text("two.txt", 100)]);

    assert_eq!(queue.len(), 1);
    assert_eq!(queue.total_bytes_in_queue(), 100);
    let calls = unaccepted.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0],
        vec![("two.txt".to_string(), Some(FileError::QueueFull))]
    );
}

#[tokio::test]
async fn mime_mismatch_rejected_regardless_of_size() {
    let queue = UploadQueue::builder(QueueConfig {
        accepted_mime_types: vec!["text/plain".into()],
        silence_zero_byte_errors: true,
        ..QueueConfig::default()
    })
    .uploader(Arc::new(GatedUploader {
        started: mpsc::unbounded_channel().0,
        gate: Arc::new(Semaphore::new(0)),
        failing: HashSet::new(),
    }))
    .build()
    .unwrap();

    let summary = queue.submit([
        RawFile::from_bytes("a.css", "text/css", vec![1u8; 10]),
        RawFile::from_bytes("b.css", "text/css", Vec::new()),
        RawFile::from_bytes("c.css", "text/css", vec![1u8; 2_000_000]),
    ]);
    assert!(summary.accepted.is_empty());
    assert!(
        summary
            .rejected
            .iter()
            .all(|t| t.error() == Some(FileError::UnacceptedMimeType))
    );
}

#[tokio::test]
async fn panicking_hook_still_frees_its_slot() {
    let mut h = Harness::new(
        QueueConfig {
            upload_concurrency: 1,
            ..QueueConfig::default()
        },
        &[],
    );
    let summary = h.queue.submit([text("a.txt", 1), text("b.txt", 1)]);
    summary.accepted[0].on_end_send(|_, _| panic!("end hook failed"));

    h.release(2);
    h.queue.begin_upload();
    assert_eq!(h.next_started().await, "a.txt");
    assert_eq!(h.next_started().await, "b.txt");
    h.idle().await;

    assert_eq!(summary.accepted[1].state(), TransferState::Succeeded);
    assert_eq!(h.queue.in_flight_count(), 0);
    assert_eq!(*h.finishes.lock().unwrap(), 1);

    // The queue still accepts a new run.
    h.release(1);
    h.queue.submit([text("c.txt", 1)]);
    h.queue.begin_upload();
    assert_eq!(h.next_started().await, "c.txt");
    h.idle().await;
    assert_eq!(*h.starts.lock().unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_waits_for_finish_listeners() {
    let done = Arc::new(AtomicBool::new(false));
    let d = Arc::clone(&done);
    let queue = UploadQueue::builder(QueueConfig::default())
        .uploader(Arc::new(GatedUploader {
            started: mpsc::unbounded_channel().0,
            gate: Arc::new(Semaphore::new(1)),
            failing: HashSet::new(),
        }))
        .on_upload_finish(move |_| {
            std::thread::sleep(Duration::from_millis(200));
            d.store(true, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    queue.submit([text("a.txt", 1)]);
    queue.begin_upload();
    tokio::time::timeout(Duration::from_secs(5), queue.wait_until_idle())
        .await
        .expect("timed out waiting for the queue to go idle");

    assert!(done.load(Ordering::SeqCst));
    assert!(!queue.is_upload_in_progress());
}
