//! Scheduling primitives for the I/O coordinator.
//!
//! A single-thread scheduled executor (immediate and delayed tasks, FIFO
//! among tasks due at the same instant) plus a named reader-thread launcher.
//! The coordinator serializes all PTY writes, resizes, and shutdown through
//! one of these; the reader loop gets its own plain blocking thread.

use std::collections::BinaryHeap;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::error;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Job {
    run_at: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: Task,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the earliest deadline (then
        // lowest sequence number) pops first
        other
            .run_at
            .cmp(&self.run_at)
            .then(other.seq.cmp(&self.seq))
    }
}

/// Cancellation handle for a scheduled task. Cancelling is idempotent and
/// a no-op once the task has started running.
#[derive(Clone)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn done() -> Self {
        let task = Self::new();
        task.cancel();
        task
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct Queue {
    heap: BinaryHeap<Job>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// Single-thread scheduled executor
pub struct SingleThreadScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    seq: AtomicU64,
}

impl SingleThreadScheduler {
    pub fn new(thread_name: &str) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                heap: BinaryHeap::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || Self::run(worker_shared))?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            seq: AtomicU64::new(0),
        })
    }

    fn run(shared: Arc<Shared>) {
        loop {
            let job = {
                let mut queue = shared.queue.lock();
                loop {
                    if queue.shutdown && queue.heap.is_empty() {
                        return;
                    }
                    match queue.heap.peek() {
                        Some(job) => {
                            let now = Instant::now();
                            if job.run_at <= now {
                                break queue.heap.pop().expect("peeked job");
                            }
                            let wait = job.run_at - now;
                            let _ = shared.available.wait_for(&mut queue, wait);
                        }
                        None => {
                            shared.available.wait(&mut queue);
                        }
                    }
                }
            };
            if job.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(job.task)).is_err() {
                error!("scheduled task panicked");
            }
        }
    }

    /// Enqueue for immediate execution, after everything already due
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        self.schedule(Duration::ZERO, task);
    }

    /// Enqueue after `delay`; the handle cancels it if it has not started
    pub fn schedule(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> ScheduledTask {
        let handle = ScheduledTask::new();
        let job = Job {
            run_at: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            cancelled: handle.cancelled.clone(),
            task: Box::new(task),
        };
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return ScheduledTask::done();
            }
            queue.heap.push(job);
        }
        self.shared.available.notify_one();
        handle
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.queue.lock().shutdown
    }

    /// Stop accepting work, run what is already queued, join the worker
    pub fn shutdown(&self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.available.notify_one();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

/// Owns the scheduling primitives the coordinator needs: the single-thread
/// scheduled executor and a launcher for the reader thread. Lifecycle belongs
/// to the host; dropping without `shutdown` leaves queued tasks unexecuted.
pub struct ExecutorServiceManager {
    scheduler: Arc<SingleThreadScheduler>,
}

impl ExecutorServiceManager {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            scheduler: Arc::new(SingleThreadScheduler::new("terminal-coordinator")?),
        })
    }

    pub fn scheduler(&self) -> Arc<SingleThreadScheduler> {
        self.scheduler.clone()
    }

    /// Spawn the named blocking reader thread
    pub fn spawn_reader(
        &self,
        name: String,
        body: impl FnOnce() + Send + 'static,
    ) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new().name(name).spawn(body)
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
