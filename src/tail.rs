//! Log tail watcher
//!
//! Follows a growing file (the daemon's debug log) by polling its size,
//! queueing byte ranges for each observed append, and splitting the streamed
//! bytes into lines. Truncation resets the model at the new size without
//! replaying earlier content. Completed lines are batched and flushed to the
//! consumer on a fixed interval rather than per line.

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Events delivered to the tail consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// Batch of completed lines, in write order
    Lines(Vec<String>),
    /// Degraded-continue error (read failure) or fatal unfollowable rename
    Error(String),
}

/// Tail watcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Idle,
    Watching,
    /// A queued byte range is currently being read
    Draining,
    /// Unfollowable rename; the watcher is dead
    Errored,
}

/// Tail behavior knobs
#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Line separator; a trailing `\r` is stripped when this is `"\n"`
    pub separator: String,
    /// Re-arm the watch when the file is renamed or unlinked
    pub follow: bool,
    /// Start at offset 0 instead of the current file size
    pub from_beginning: bool,
    /// Size poll cadence
    pub poll_interval: Duration,
    /// Consumer batch flush cadence
    pub flush_interval: Duration,
    /// Retry cadence while the file does not exist yet
    pub exists_interval: Duration,
    /// Delay before re-arming after a followable rename
    pub retry_delay: Duration,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            separator: "\n".to_string(),
            follow: true,
            from_beginning: false,
            poll_interval: Duration::from_secs(1),
            flush_interval: Duration::from_secs(1),
            exists_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
        }
    }
}

struct TailShared {
    path: PathBuf,
    options: TailOptions,
    state: Mutex<TailState>,
    watching: AtomicBool,
    paused: AtomicBool,
    batch: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<TailEvent>,
    cancel: Notify,
}

impl TailShared {
    fn set_state(&self, next: TailState) {
        *self.state.lock().unwrap() = next;
    }

    fn live(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }
}

/// Handle to a running tail watch
pub struct TailWatcher {
    shared: Arc<TailShared>,
    read_task: JoinHandle<()>,
    flush_task: JoinHandle<()>,
}

impl TailWatcher {
    /// Start watching `path`; events arrive on the returned receiver
    pub fn spawn(path: PathBuf, options: TailOptions) -> (Self, mpsc::UnboundedReceiver<TailEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(TailShared {
            path,
            options,
            state: Mutex::new(TailState::Idle),
            watching: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            batch: Mutex::new(Vec::new()),
            events,
            cancel: Notify::new(),
        });
        let read_task = tokio::spawn(run(shared.clone()));
        let flush_task = tokio::spawn(flush_loop(shared.clone()));
        (
            Self {
                shared,
                read_task,
                flush_task,
            },
            rx,
        )
    }

    pub fn state(&self) -> TailState {
        *self.shared.state.lock().unwrap()
    }

    pub fn is_watching(&self) -> bool {
        self.shared.live()
    }

    /// Suspend batch flushes; lines keep accumulating
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    /// Stop watching. Idempotent; pending ranges and unflushed lines are
    /// dropped and no in-flight callback reschedules further work.
    pub fn unwatch(&self) {
        if !self.shared.watching.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.cancel.notify_waiters();
        self.read_task.abort();
        self.flush_task.abort();
        self.shared.batch.lock().unwrap().clear();
        self.shared.set_state(TailState::Idle);
        log::info!("Unwatched {}", self.shared.path.display());
    }
}

impl Drop for TailWatcher {
    fn drop(&mut self) {
        self.unwatch();
    }
}

/// Sleep that can be cut short by `unwatch`
async fn cancellable_sleep(shared: &TailShared, duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shared.cancel.notified() => {}
    }
}

enum CheckOutcome {
    Continue,
    /// File went away and follow is enabled: re-arm the watch
    Rewatch,
    /// File went away and follow is disabled
    Fatal,
}

async fn run(shared: Arc<TailShared>) {
    let mut from_beginning = shared.options.from_beginning;

    'watch: loop {
        if !shared.live() {
            break;
        }

        // Wait for the file to exist before arming the watch
        let size = loop {
            match fs::metadata(&shared.path).await {
                Ok(meta) => break meta.len(),
                Err(_) => {
                    cancellable_sleep(&shared, shared.options.exists_interval).await;
                    if !shared.live() {
                        break 'watch;
                    }
                }
            }
        };

        shared.set_state(TailState::Watching);
        let mut offset = if from_beginning { 0 } else { size };
        // Re-arms after a rename pick up at the then-current size
        from_beginning = false;
        let mut queue: VecDeque<(u64, u64)> = VecDeque::new();
        let mut partial = String::new();

        // Offset 0 means pre-existing content may already be pending
        if offset == 0 {
            match check(&shared, &mut offset, &mut queue, &mut partial).await {
                CheckOutcome::Continue => {}
                CheckOutcome::Rewatch => {
                    cancellable_sleep(&shared, shared.options.retry_delay).await;
                    continue 'watch;
                }
                CheckOutcome::Fatal => break 'watch,
            }
        }

        loop {
            cancellable_sleep(&shared, shared.options.poll_interval).await;
            if !shared.live() {
                break 'watch;
            }
            match check(&shared, &mut offset, &mut queue, &mut partial).await {
                CheckOutcome::Continue => {}
                CheckOutcome::Rewatch => {
                    log::info!(
                        "{} went away, retrying watch",
                        shared.path.display()
                    );
                    cancellable_sleep(&shared, shared.options.retry_delay).await;
                    continue 'watch;
                }
                CheckOutcome::Fatal => break 'watch,
            }
        }
    }
}

/// One change-detection pass: compare size against offset, queue appends,
/// reset on truncation, then drain whatever is queued
async fn check(
    shared: &TailShared,
    offset: &mut u64,
    queue: &mut VecDeque<(u64, u64)>,
    partial: &mut String,
) -> CheckOutcome {
    let size = match fs::metadata(&shared.path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if shared.options.follow {
                return CheckOutcome::Rewatch;
            }
            let _ = shared.events.send(TailEvent::Error(format!(
                "{} is no longer available",
                shared.path.display()
            )));
            shared.set_state(TailState::Errored);
            return CheckOutcome::Fatal;
        }
        Err(e) => {
            log::warn!("stat {} failed: {}", shared.path.display(), e);
            return CheckOutcome::Continue;
        }
    };

    if size < *offset {
        // Truncation: restart the range model at the new size, no replay of
        // content written before the truncation was detected
        log::info!(
            "{} truncated to {} bytes, resetting offset",
            shared.path.display(),
            size
        );
        *offset = size;
        queue.clear();
        partial.clear();
    } else if size > *offset {
        queue.push_back((*offset, size));
        *offset = size;
    }

    if !queue.is_empty() {
        drain(shared, queue, partial).await;
    }
    CheckOutcome::Continue
}

/// Stream queued ranges in order, splitting completed lines into the batch
/// and retaining the trailing partial line across reads
async fn drain(shared: &TailShared, queue: &mut VecDeque<(u64, u64)>, partial: &mut String) {
    shared.set_state(TailState::Draining);
    while let Some(&(start, end)) = queue.front() {
        match read_range(&shared.path, start, end).await {
            Ok(bytes) => {
                partial.push_str(&String::from_utf8_lossy(&bytes));
                split_lines(shared, partial);
                queue.pop_front();
            }
            Err(e) => {
                // Halt draining; the range stays queued for the next pass
                let _ = shared
                    .events
                    .send(TailEvent::Error(format!("tail read error: {}", e)));
                break;
            }
        }
    }
    shared.set_state(TailState::Watching);
}

fn split_lines(shared: &TailShared, partial: &mut String) {
    let separator = shared.options.separator.as_str();
    let mut batch = shared.batch.lock().unwrap();
    while let Some(pos) = partial.find(separator) {
        let mut line: String = partial.drain(..pos + separator.len()).collect();
        line.truncate(pos);
        if separator == "\n" && line.ends_with('\r') {
            line.pop();
        }
        batch.push(line);
    }
}

async fn read_range(path: &PathBuf, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
    let mut file = fs::File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = vec![0u8; (end - start) as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Flush accumulated lines to the consumer on a fixed cadence, skipping while
/// the consumer is paused
async fn flush_loop(shared: Arc<TailShared>) {
    loop {
        cancellable_sleep(&shared, shared.options.flush_interval).await;
        if !shared.live() {
            break;
        }
        if shared.paused.load(Ordering::SeqCst) {
            continue;
        }
        let lines = {
            let mut batch = shared.batch.lock().unwrap();
            if batch.is_empty() {
                continue;
            }
            std::mem::take(&mut *batch)
        };
        if shared.events.send(TailEvent::Lines(lines)).is_err() {
            // Consumer is gone
            break;
        }
    }
}
