use parking_lot::Mutex;
use std::collections::HashMap;

use crate::types::JobId;

/// Outcome of reserving an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// Key was absent; it is now held by this request.
    Fresh,

    /// Another request reserved the key and has not committed yet.
    InFlight,

    /// A job was already created under this key.
    Committed(JobId),
}

#[derive(Debug, Clone)]
enum IdemEntry {
    Pending,
    Committed(JobId),
}

/// Registry deduplicating retried create-requests.
///
/// A key goes through reserve -> commit on the happy path, or
/// reserve -> release when the request turns out to be invalid. Entries are
/// kept for the life of the process; there is no retention window.
#[derive(Debug, Default)]
pub struct IdempotencyRegistry {
    entries: Mutex<HashMap<String, IdemEntry>>,
}

impl IdempotencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `key` for the calling request.
    pub fn reserve(&self, key: &str) -> Reservation {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(IdemEntry::Committed(job_id)) => Reservation::Committed(job_id.clone()),
            Some(IdemEntry::Pending) => Reservation::InFlight,
            None => {
                entries.insert(key.to_string(), IdemEntry::Pending);
                Reservation::Fresh
            }
        }
    }

    /// Record the job created under a reserved key.
    ///
    /// Lenient on purpose: the committed id simply replaces whatever is
    /// there, so a caller that skipped `reserve` still gets deduplicated on
    /// the next request.
    pub fn commit(&self, key: &str, job_id: JobId) {
        self.entries
            .lock()
            .insert(key.to_string(), IdemEntry::Committed(job_id));
    }

    /// Drop a pending reservation after a failed request.
    ///
    /// Committed entries are left alone; only the reserving request's own
    /// `Pending` marker is removed.
    pub fn release(&self, key: &str) {
        let mut entries = self.entries.lock();
        if matches!(entries.get(key), Some(IdemEntry::Pending)) {
            entries.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
