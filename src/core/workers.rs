//! Background thread pool for frame prefetching.
//!
//! Jobs go into a shared crossbeam `Injector`; idle workers steal from it.
//! Every job is tagged with the epoch current at enqueue time. Bumping the
//! epoch (new loop anchor, source switch) turns all queued jobs into no-ops,
//! so a stale prefetch never competes with the frames actually needed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::deque::Injector;
use log::trace;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    epoch: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Spawn `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> std::io::Result<Self> {
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        for worker_id in 0..num_threads.max(1) {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);

            let handle = thread::Builder::new()
                .name(format!("radarloop-prefetch-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    loop {
                        if let Some(job) = injector.steal().success() {
                            job();
                            continue;
                        }
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        // Prefetch is network bound, a short nap costs nothing
                        thread::sleep(Duration::from_millis(2));
                    }
                    trace!("Worker {} stopped", worker_id);
                })?;
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads", handles.len());

        Ok(Self {
            injector,
            handles,
            epoch: Arc::new(AtomicU64::new(0)),
            shutdown,
        })
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Invalidate all queued jobs and return the new epoch.
    pub fn bump_epoch(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Worker epoch -> {}", epoch);
        epoch
    }

    /// Run `f` on a worker unless the epoch moved on before it was picked up.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current = Arc::clone(&self.epoch);
        self.injector.push(Box::new(move || {
            if current.load(Ordering::Acquire) == epoch {
                f();
            }
        }));
    }

    /// Jobs waiting to be picked up.
    pub fn queued(&self) -> usize {
        self.injector.len()
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }
}

impl std::fmt::Debug for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workers")
            .field("threads", &self.handles.len())
            .field("queued", &self.queued())
            .field("epoch", &self.current_epoch())
            .finish()
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        // Skip whatever is still queued
        self.bump_epoch();
        self.shutdown.store(true, Ordering::SeqCst);

        // A worker stuck in a slow download is left to die with the process
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Worker shutdown timeout reached");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All workers stopped");
    }
}
