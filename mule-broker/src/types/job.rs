use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, LeaseId, WorkerId};

/// Job lifecycle states.
///
/// `Done` and `Dead` are terminal: once a job reaches either, no operation
/// moves it out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Waiting to be leased (possibly held back by a retry delay).
    Queued,

    /// Handed to a worker under a time-bounded lease.
    Leased,

    /// Acknowledged as successfully processed.
    Done,

    /// Retry budget exhausted; retained for inspection only.
    Dead,
}

impl JobState {
    /// Check whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Dead)
    }

    /// Get the state name as a lowercase string, for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::Done => "done",
            Self::Dead => "dead",
        }
    }
}

/// A job record - the broker's single unit of state.
///
/// The payload is opaque to the broker; only the lifecycle fields are ever
/// interpreted. While a job is `Leased`, `lease_owner` and `lease_expires_at`
/// are always set; in every other state both are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, assigned at creation.
    pub id: JobId,

    /// Opaque payload, carried verbatim to the worker.
    pub payload: String,

    /// Current position in the lifecycle.
    pub state: JobState,

    /// Current lease holder, if leased.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<WorkerId>,

    /// Instant after which the current lease counts as expired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Fencing token; increments on every successful lease.
    pub lease_id: LeaseId,

    /// Number of recorded failures so far.
    pub attempts: u32,

    /// Failure count at which the job goes to `Dead` instead of retrying.
    pub max_tries: u32,

    /// Earliest instant the job may be leased again. `None` means
    /// immediately eligible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_available_at: Option<DateTime<Utc>>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When the job was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh job in `Queued` with an unleased fencing token.
    pub fn new(payload: String, max_tries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            payload,
            state: JobState::Queued,
            lease_owner: None,
            lease_expires_at: None,
            lease_id: LeaseId::UNLEASED,
            attempts: 0,
            max_tries,
            next_available_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the job may be leased at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Queued && self.next_available_at.map_or(true, |at| at <= now)
    }

    /// Check whether the job holds a lease that has expired by `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Leased && self.lease_expires_at.map_or(false, |at| at <= now)
    }

    /// Check whether `worker` holds the current lease.
    pub fn leased_to(&self, worker: &WorkerId) -> bool {
        self.state == JobState::Leased && self.lease_owner.as_ref() == Some(worker)
    }

    /// Issue a new lease to `worker`, bumping the fencing token.
    pub fn lease_to(&mut self, worker: WorkerId, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.state = JobState::Leased;
        self.lease_owner = Some(worker);
        self.lease_expires_at = Some(expires_at);
        self.lease_id = self.lease_id.next();
        self.updated_at = now;
    }

    /// Commit successful processing.
    ///
    /// `attempts` and `lease_id` are kept for inspection; `next_available_at`
    /// is left untouched.
    pub fn mark_done(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Done;
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.updated_at = now;
    }

    /// Exhausted retry budget: park the job for inspection.
    pub fn mark_dead(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Dead;
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.next_available_at = None;
        self.updated_at = now;
    }

    /// Put the job back in the queue with a retry hold-back.
    pub fn schedule_retry(&mut self, next_available_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.state = JobState::Queued;
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.next_available_at = Some(next_available_at);
        self.updated_at = now;
    }

    /// Reclaim an expired lease: back to the queue, immediately eligible.
    ///
    /// Expiration is not a failure, so `attempts` is untouched and any
    /// retry hold-back is cleared. The fencing token is not bumped here; it
    /// increments on the next successful lease, which is all fencing needs.
    pub fn release_expired_lease(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Queued;
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.next_available_at = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job_at(now: DateTime<Utc>) -> Job {
        Job::new("payload".to_string(), 3, now)
    }

    #[test]
    fn fresh_job_is_eligible() {
        let now = Utc::now();
        let job = job_at(now);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.lease_id, LeaseId::UNLEASED);
        assert_eq!(job.attempts, 0);
        assert!(job.is_eligible(now));
    }

    #[test]
    fn retry_hold_back_gates_eligibility() {
        let now = Utc::now();
        let mut job = job_at(now);
        job.schedule_retry(now + Duration::seconds(10), now);

        assert!(!job.is_eligible(now));
        assert!(job.is_eligible(now + Duration::seconds(10)));
    }

    #[test]
    fn lease_bumps_fencing_token() {
        let now = Utc::now();
        let mut job = job_at(now);

        job.lease_to(WorkerId::from("w1"), now + Duration::seconds(30), now);
        assert_eq!(job.lease_id, LeaseId(1));
        assert!(job.leased_to(&WorkerId::from("w1")));
        assert!(!job.lease_expired(now));
        assert!(job.lease_expired(now + Duration::seconds(30)));

        job.release_expired_lease(now);
        job.lease_to(WorkerId::from("w2"), now + Duration::seconds(30), now);
        assert_eq!(job.lease_id, LeaseId(2));
    }

    #[test]
    fn expired_lease_release_clears_hold_back_and_keeps_attempts() {
        let now = Utc::now();
        let mut job = job_at(now);
        job.attempts = 1;
        job.next_available_at = Some(now + Duration::seconds(20));
        job.lease_to(WorkerId::from("w1"), now + Duration::seconds(30), now);

        job.release_expired_lease(now);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.next_available_at, None);
        assert_eq!(job.lease_id, LeaseId(1));
    }

    #[test]
    fn state_serializes_in_wire_casing() {
        let now = Utc::now();
        let mut job = job_at(now);
        job.mark_dead(now);

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["state"], "DEAD");
        assert!(value.get("lease_owner").is_none());
        assert!(value.get("lease_expires_at").is_none());
    }
}
