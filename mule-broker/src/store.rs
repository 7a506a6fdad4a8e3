use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::error::{BrokerError, BrokerResult};
use crate::types::{Job, JobId};

/// Authoritative in-memory mapping from job id to job record.
///
/// The store owns all job records; everything outside refers to jobs by id
/// and works on clones. One mutex guards the whole map, and the wake-up
/// primitive for blocked polls is coupled to it: a waiter registers interest
/// before scanning under the lock, so a signal sent between the scan and the
/// await is never lost. Nothing may block on I/O while the lock is held.
#[derive(Debug, Default)]
pub struct JobStore {
    pub(crate) jobs: Mutex<HashMap<JobId, Job>>,
    wakeup: Notify,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly created job. The id must not be present yet.
    pub fn insert(&self, job: Job) -> BrokerResult<()> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(BrokerError::Internal(format!(
                "duplicate job id {}",
                job.id
            )));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Get a copy of a job record.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.lock().get(id).cloned()
    }

    /// Run a transformation on a job while the store is locked.
    pub fn update_with<F, R>(&self, id: &JobId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Job) -> R,
    {
        self.jobs.lock().get_mut(id).map(f)
    }

    /// Copy out every job matching `filter`, for inspection endpoints.
    pub fn snapshot<F>(&self, filter: F) -> HashMap<JobId, Job>
    where
        F: Fn(&Job) -> bool,
    {
        self.jobs
            .lock()
            .iter()
            .filter(|(_, job)| filter(job))
            .map(|(id, job)| (id.clone(), job.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Wake one blocked poll. If nobody is waiting the permit is stored and
    /// consumed by the next waiter, so the signal cannot be lost.
    pub(crate) fn signal_one(&self) {
        self.wakeup.notify_one();
    }

    /// Wake every blocked poll.
    pub(crate) fn signal_all(&self) {
        self.wakeup.notify_waiters();
    }

    /// Future resolving on the next signal. Callers must `enable` it before
    /// scanning the store, then await it only if the scan came up empty.
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.wakeup.notified()
    }
}
