//! Shared queue of deferred work for the worker pool
//!
//! Any thread may enqueue; any worker may dequeue. Enqueueing never blocks the
//! producer. Once [`JobQueue::shutdown`] has been called new jobs are dropped
//! without notifying the producer, and jobs still waiting in the queue are
//! dropped with it when the pool exits.

use crate::error::JobError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A unit of work executed on a worker thread.
pub type Job = Box<dyn FnOnce() -> Result<(), JobError> + Send + 'static>;

pub struct JobQueue {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    shutdown: AtomicBool,
    soft_capacity: usize,
    over_capacity: AtomicBool,
}

impl JobQueue {
    pub fn new(soft_capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            shutdown: AtomicBool::new(false),
            soft_capacity,
            over_capacity: AtomicBool::new(false),
        }
    }

    /// Queues a job. Returns false if the queue is shutting down, in which case
    /// the job has been dropped.
    pub fn enqueue(&self, job: Job) -> bool {
        if self.is_shutdown() {
            debug!("Job queue shut down, dropping job");
            return false;
        }

        // We own a receiver, so the channel cannot be disconnected here.
        if self.sender.send(job).is_err() {
            return false;
        }

        let queued = self.sender.len();
        if queued > self.soft_capacity && !self.over_capacity.swap(true, Ordering::Relaxed) {
            warn!(
                "Job queue above soft capacity ({} > {})",
                queued, self.soft_capacity
            );
        }
        true
    }

    /// Convenience wrapper that boxes a closure.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        self.enqueue(Box::new(job))
    }

    /// Waits up to `timeout` for a job.
    pub fn dequeue(&self, timeout: Duration) -> Option<Job> {
        match self.receiver.recv_timeout(timeout) {
            Ok(job) => {
                if self.receiver.len() <= self.soft_capacity {
                    self.over_capacity.store(false, Ordering::Relaxed);
                }
                Some(job)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
