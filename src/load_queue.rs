//! The [LoadQueue] reads assets on a background thread so that the thread asking for them doesn't wait on the disk.
//!
//! Each call to [LoadQueue::submit] registers a task and returns a [PendingLoad] immediately.  A single worker thread
//! runs tasks one at a time, most urgent first: lower priorities run earlier, and equal priorities run in submission
//! order.  No lock is held while a task reads, so submitting never waits on I/O.
//!
//! Failures never cross the thread boundary as panics.  They travel inside the [PendingLoad], which
//! [LoadQueue::resolve_as_buffer] turns into an empty buffer and [LoadQueue::resolve_as_stream] turns into `None`.
//!
//! Stopping the queue lets the task in flight finish, then drops every task which hasn't started.  Their
//! [PendingLoad]s resolve to [LoadError::Cancelled] rather than blocking forever.
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io::{Cursor, Error as IoError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use ahash::RandomState;
use crossbeam_channel::Receiver;
use log::{debug, trace, warn};

use crate::*;

pub type LoadResult = Result<Vec<u8>, LoadError>;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unable to load asset {name}")]
    Resolve { name: String, source: IoError },
    #[error("the load was cancelled before it ran")]
    Cancelled,
}

#[derive(Debug, Clone, derive_builder::Builder)]
pub struct LoadQueueConfig {
    /// Name given to the worker thread.
    #[builder(default = "\"asset-loader\".to_string()", setter(into))]
    pub thread_name: String,
}

impl Default for LoadQueueConfig {
    fn default() -> Self {
        LoadQueueConfig {
            thread_name: "asset-loader".to_string(),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Ids double as submission sequence numbers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct TaskId(u64);

struct LoadTask {
    name: String,
    priority: i32,
    /// Taken by the worker when the task starts.
    job: Option<Job>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WorkerState {
    /// Never started.  Submissions queue up.
    Idle,
    Running,
    /// Submissions are cancelled immediately.
    Stopped,
}

struct ReadyQueue {
    /// Pops the smallest `(priority, id)` first.
    heap: BinaryHeap<Reverse<(i32, TaskId)>>,
    state: WorkerState,
}

struct Shared {
    /// Every task which hasn't finished.  A superset of what is in `ready`.
    tasks: Mutex<HashMap<TaskId, LoadTask, RandomState>>,
    ready: Mutex<ReadyQueue>,
    wakeup: Condvar,
    next_id: AtomicU64,
}

/// The result of a submitted load, which may not have happened yet.
///
/// Dropping this without waiting is fine; the load still runs.
#[derive(Debug)]
pub struct PendingLoad {
    name: String,
    receiver: Receiver<LoadResult>,
}

impl PendingLoad {
    /// The normalized name of the asset being loaded.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the load completes.
    pub fn wait(self) -> LoadResult {
        // The sender lives in the task, so a disconnect means the task was dropped without running.
        self.receiver.recv().unwrap_or(Err(LoadError::Cancelled))
    }
}

pub struct LoadQueue<ResolverImpl: AssetResolver> {
    config: LoadQueueConfig,
    resolver: Arc<ResolverImpl>,
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<ResolverImpl: AssetResolver> LoadQueue<ResolverImpl> {
    /// Make a queue.  Nothing runs until [LoadQueue::start].
    pub fn new(resolver: ResolverImpl, config: LoadQueueConfig) -> LoadQueue<ResolverImpl> {
        LoadQueue {
            config,
            resolver: Arc::new(resolver),
            shared: Arc::new(Shared {
                tasks: Mutex::new(Default::default()),
                ready: Mutex::new(ReadyQueue {
                    heap: BinaryHeap::new(),
                    state: WorkerState::Idle,
                }),
                wakeup: Condvar::new(),
                next_id: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn resolver(&self) -> &ResolverImpl {
        &self.resolver
    }

    /// Spawn the worker thread.
    ///
    /// Tasks submitted before this point start running now.  A stopped queue may be started again.
    pub fn start(&self) -> Result<(), IoError> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            warn!("Asset loader is already running");
            return Ok(());
        }

        let previous = {
            let mut ready = self.shared.ready.lock().unwrap();
            std::mem::replace(&mut ready.state, WorkerState::Running)
        };

        let shared = self.shared.clone();
        match thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || worker_main(shared))
        {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.ready.lock().unwrap().state = previous;
                Err(e)
            }
        }
    }

    /// Stop the worker thread and wait for it to exit.
    ///
    /// The task in flight, if any, finishes first.  Everything else is cancelled.  Once this returns, no task runs
    /// until the queue is started again.
    pub fn stop(&self) {
        let mut worker = self.worker.lock().unwrap();
        let handle = match worker.take() {
            Some(h) => h,
            None => {
                warn!("Asset loader was stopped without running");
                return;
            }
        };

        {
            let mut ready = self.shared.ready.lock().unwrap();
            ready.state = WorkerState::Stopped;
            self.shared.wakeup.notify_all();
        }

        if handle.join().is_err() {
            warn!("Asset loader thread panicked");
        }

        self.shared.ready.lock().unwrap().heap.clear();
        // Dropping the tasks drops their senders, which is what resolves the waiters.
        let cancelled = std::mem::take(&mut *self.shared.tasks.lock().unwrap());
        debug!(
            "Asset loader stopped, cancelled {} pending loads",
            cancelled.len()
        );
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().unwrap().is_some()
    }

    /// Number of tasks submitted but not yet finished.
    pub fn pending_count(&self) -> usize {
        self.shared.tasks.lock().unwrap().len()
    }

    /// Ask for an asset to be read in the background.  Lower priorities are more urgent.
    pub fn submit(&self, name: &str, priority: i32) -> PendingLoad {
        let key = normalize_name(name);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));

        let resolver = self.resolver.clone();
        let task_name = key.clone();
        let job: Job = Box::new(move || {
            let result = match resolver.load_buffer(&task_name) {
                Ok(bytes) => {
                    debug!("Loaded {}: {} bytes", task_name, bytes.len());
                    Ok(bytes)
                }
                Err(source) => {
                    warn!("Unable to load {}: {}", task_name, source);
                    Err(LoadError::Resolve {
                        name: task_name,
                        source,
                    })
                }
            };
            // Nobody may be waiting.
            let _ = sender.send(result);
        });

        self.shared.tasks.lock().unwrap().insert(
            id,
            LoadTask {
                name: key.clone(),
                priority,
                job: Some(job),
            },
        );

        let mut ready = self.shared.ready.lock().unwrap();
        if ready.state == WorkerState::Stopped {
            drop(ready);
            self.shared.tasks.lock().unwrap().remove(&id);
            debug!("Asset loader is stopped, cancelling {}", key);
        } else {
            ready.heap.push(Reverse((priority, id)));
            self.shared.wakeup.notify_one();
            trace!("Queued {} as {:?} with priority {}", key, id, priority);
        }

        PendingLoad {
            name: key,
            receiver,
        }
    }

    /// Block until a load completes and return its bytes, or an empty buffer if it failed.
    pub fn resolve_as_buffer(&self, pending: PendingLoad) -> Vec<u8> {
        pending.wait().unwrap_or_default()
    }

    /// Block until a load completes and return a stream over its bytes, or `None` if it failed.
    pub fn resolve_as_stream(&self, pending: PendingLoad) -> Option<Cursor<Vec<u8>>> {
        pending.wait().ok().map(Cursor::new)
    }
}

impl<ResolverImpl: AssetResolver> Drop for LoadQueue<ResolverImpl> {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

fn worker_main(shared: Arc<Shared>) {
    debug!("Asset loader thread started");

    loop {
        let next = {
            let mut ready = shared.ready.lock().unwrap();
            loop {
                if ready.state != WorkerState::Running {
                    break None;
                }
                if let Some(Reverse((_, id))) = ready.heap.pop() {
                    break Some(id);
                }
                ready = shared.wakeup.wait(ready).unwrap();
            }
        };
        let id = match next {
            Some(x) => x,
            None => break,
        };

        let job = shared
            .tasks
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(|task| {
                trace!("Running {} (priority {})", task.name, task.priority);
                task.job.take()
            });

        // Run without holding any lock.  A panicking resolver drops the task's sender on unwind, so its waiter sees
        // `Cancelled` and the worker carries on with the rest of the queue.
        if let Some(job) = job {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                warn!("Asset load {:?} panicked", id);
            }
        }

        shared.tasks.lock().unwrap().remove(&id);
    }

    debug!("Asset loader thread stopped");
}
