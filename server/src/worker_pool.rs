//! Fixed pool of worker threads draining the [`JobQueue`]
//!
//! Each worker runs one job at a time to completion. Workers wake at least once
//! per dequeue timeout so a shutdown request is noticed even with no traffic.
//! Workers never touch the entity registry; jobs report back to the tick thread
//! through the simulation command channel.

use crate::job_queue::JobQueue;
use log::{debug, error, info, warn};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct WorkerStats {
    executed: AtomicU64,
    failed: AtomicU64,
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    /// Spawns `thread_count` named worker threads.
    pub fn start(
        thread_count: usize,
        queue: Arc<JobQueue>,
        dequeue_timeout: Duration,
    ) -> io::Result<Self> {
        let stats = Arc::new(WorkerStats::default());
        let mut handles = Vec::with_capacity(thread_count);

        for worker_id in 0..thread_count {
            let queue = Arc::clone(&queue);
            let stats = Arc::clone(&stats);
            let handle = thread::Builder::new()
                .name(format!("worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, &queue, dequeue_timeout, &stats))?;
            handles.push(handle);
        }

        info!("Started {} worker threads", thread_count);
        Ok(Self {
            queue,
            handles,
            stats,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    /// Jobs that ran to completion successfully.
    pub fn jobs_executed(&self) -> u64 {
        self.stats.executed.load(Ordering::Relaxed)
    }

    /// Jobs that returned an error or panicked.
    pub fn jobs_failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Asks every worker to exit at its next timeout boundary.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Blocks until every worker has exited.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

fn worker_loop(worker_id: usize, queue: &JobQueue, timeout: Duration, stats: &WorkerStats) {
    debug!("Worker {} running", worker_id);

    while !queue.is_shutdown() {
        let Some(job) = queue.dequeue(timeout) else {
            continue;
        };

        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => {
                stats.executed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Worker {} job failed: {}", worker_id, e);
            }
            Err(payload) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Worker {} job panicked: {}",
                    worker_id,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    debug!("Worker {} exiting", worker_id);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
