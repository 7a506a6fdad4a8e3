use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backoff::RetryPolicy;
use crate::clock::{Clock, SystemClock};
use crate::error::{BrokerError, BrokerResult};
use crate::idempotency::{IdempotencyRegistry, Reservation};
use crate::store::JobStore;
use crate::types::{Job, JobEvent, JobId, JobState, LeaseId, RejectReason, WorkerId};

/// Type alias for boxed event streams (stable Rust compatible).
pub type EventStream = Pin<Box<dyn Stream<Item = JobEvent> + Send + 'static>>;

/// Tunables for a broker instance.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long a worker holds a job after a successful poll.
    pub lease_duration: chrono::Duration,

    /// How long a poll blocks before returning "no job available".
    pub poll_deadline: Duration,

    /// How often the sweeper looks for expired leases.
    pub sweep_interval: Duration,

    /// Failure count at which a job is dead-lettered.
    pub max_tries: u32,

    /// Backoff policy for failed jobs.
    pub retry: RetryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            lease_duration: chrono::Duration::seconds(30),
            poll_deadline: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            max_tries: 3,
            retry: RetryPolicy::default(),
        }
    }
}

/// The job broker: single coordinator over the job store, the idempotency
/// registry, and the long-poll waiters.
///
/// Producers enqueue; workers poll, then ack or fail under a fenced lease.
/// Every instance is fully independent, so tests construct as many brokers
/// as they like. All state transitions happen under the store lock, and the
/// only operation that suspends is the long-poll wait itself.
pub struct Broker {
    store: JobStore,
    idempotency: IdempotencyRegistry,
    events: broadcast::Sender<JobEvent>,
    clock: Arc<dyn Clock>,
    config: BrokerConfig,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    pub fn with_config(config: BrokerConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            store: JobStore::new(),
            idempotency: IdempotencyRegistry::new(),
            events,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Swap the time source; tests pass a `ManualClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Lifecycle events as a boxed stream.
    pub fn event_stream(&self) -> EventStream {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    /// Claim an idempotency key before building the job it deduplicates.
    ///
    /// Returns `Ok(Some(id))` when a job was already committed under the
    /// key, `Ok(None)` when the key is now reserved for this request, and
    /// `ReservationInFlight` when another request holds the reservation.
    /// A caller that reserves and then fails validation must call
    /// [`release_key`](Self::release_key).
    pub fn reserve_key(&self, key: &str) -> BrokerResult<Option<JobId>> {
        match self.idempotency.reserve(key) {
            Reservation::Committed(job_id) => {
                debug!(idempotency_key = key, job_id = %job_id, "idempotent enqueue replay");
                Ok(Some(job_id))
            }
            Reservation::InFlight => Err(BrokerError::ReservationInFlight(key.to_string())),
            Reservation::Fresh => Ok(None),
        }
    }

    /// Drop a reservation taken by [`reserve_key`](Self::reserve_key) after
    /// the request failed validation.
    pub fn release_key(&self, key: &str) {
        self.idempotency.release(key);
    }

    /// Accept a job into the queue.
    ///
    /// The job starts in `Queued` with zero attempts and an unleased fencing
    /// token. When an idempotency key is supplied it is committed after the
    /// job is in the store, so a replay that observes the committed key
    /// always finds the job. One waiter is signalled per new job.
    pub fn enqueue(
        &self,
        payload: impl Into<String>,
        idempotency_key: Option<&str>,
    ) -> BrokerResult<JobId> {
        let now = self.clock.now();
        let job = Job::new(payload.into(), self.config.max_tries, now);
        let job_id = job.id.clone();
        let payload_len = job.payload.len();

        self.store.insert(job)?;
        if let Some(key) = idempotency_key {
            self.idempotency.commit(key, job_id.clone());
        }
        self.store.signal_one();

        info!(
            job_id = %job_id,
            payload_len,
            idempotency_key = idempotency_key.unwrap_or(""),
            "job enqueued"
        );
        self.emit(JobEvent::Enqueued {
            job_id: job_id.clone(),
            payload_len,
            idempotency_key: idempotency_key.map(str::to_owned),
            at: now,
        });

        Ok(job_id)
    }

    /// Long-poll for a job with the configured deadline.
    pub async fn poll(&self, worker: &WorkerId) -> BrokerResult<Option<Job>> {
        self.poll_with_deadline(worker, self.config.poll_deadline)
            .await
    }

    /// Long-poll for a job, blocking up to `timeout`.
    ///
    /// Scans for any eligible job and leases it on the spot. When nothing is
    /// eligible the call parks on the store's wake-up primitive and re-scans
    /// on every signal; wake-ups are allowed to be spurious because every
    /// pass re-checks eligibility under the lock. At the deadline the call
    /// resolves to `Ok(None)`.
    pub async fn poll_with_deadline(
        &self,
        worker: &WorkerId,
        timeout: Duration,
    ) -> BrokerResult<Option<Job>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before scanning so a signal arriving between
            // the scan and the await still wakes this waiter.
            let notified = self.store.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_lease(worker) {
                return Ok(Some(job));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    /// Single non-blocking lease attempt: any eligible job, map order.
    pub fn try_lease(&self, worker: &WorkerId) -> Option<Job> {
        let leased = {
            let mut jobs = self.store.jobs.lock();
            let now = self.clock.now();
            let job = jobs.values_mut().find(|job| job.is_eligible(now))?;
            job.lease_to(worker.clone(), now + self.config.lease_duration, now);
            job.clone()
        };

        info!(
            job_id = %leased.id,
            worker_id = %worker,
            lease_id = %leased.lease_id,
            "job leased"
        );
        self.emit(JobEvent::Leased {
            job_id: leased.id.clone(),
            worker_id: worker.clone(),
            lease_id: leased.lease_id,
            lease_expires_at: leased
                .lease_expires_at
                .expect("freshly leased job carries an expiry"),
            at: leased.updated_at,
        });

        Some(leased)
    }

    /// Commit successful processing of a leased job.
    ///
    /// Acking an already `Done` job is a success, so workers can retry an
    /// ack that raced a crash. Everything else that is not "this worker,
    /// this lease, still live" is a conflict.
    pub fn ack(&self, worker: &WorkerId, job_id: &JobId, lease_id: LeaseId) -> BrokerResult<()> {
        let now = self.clock.now();
        {
            let mut jobs = self.store.jobs.lock();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| BrokerError::JobNotFound(job_id.to_string()))?;

            if job.state == JobState::Done {
                return Ok(());
            }
            self.check_lease(job, worker, lease_id, now)?;

            job.mark_done(now);
        }

        info!(job_id = %job_id, worker_id = %worker, lease_id = %lease_id, "job acked");
        self.emit(JobEvent::Acked {
            job_id: job_id.clone(),
            worker_id: worker.clone(),
            lease_id,
            at: now,
        });

        Ok(())
    }

    /// Record a failure reported by the lease holder.
    ///
    /// Validation is identical to [`ack`](Self::ack). Below the retry budget
    /// the job is re-queued behind a full-jitter hold-back and one waiter is
    /// signalled; at the budget it is dead-lettered.
    pub fn fail(&self, worker: &WorkerId, job_id: &JobId, lease_id: LeaseId) -> BrokerResult<()> {
        let now = self.clock.now();
        let (attempts, outcome) = {
            let mut jobs = self.store.jobs.lock();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| BrokerError::JobNotFound(job_id.to_string()))?;

            if job.state == JobState::Done {
                return Ok(());
            }
            self.check_lease(job, worker, lease_id, now)?;

            job.attempts += 1;
            if job.attempts >= job.max_tries {
                job.mark_dead(now);
                (job.attempts, None)
            } else {
                let delay = self.config.retry.delay(job.attempts, &mut rand::thread_rng());
                let next_available_at = now + delay;
                job.schedule_retry(next_available_at, now);
                (job.attempts, Some(next_available_at))
            }
        };

        self.emit(JobEvent::Failed {
            job_id: job_id.clone(),
            worker_id: worker.clone(),
            lease_id,
            attempts,
            at: now,
        });

        match outcome {
            None => {
                warn!(job_id = %job_id, attempts, "job dead-lettered");
                self.emit(JobEvent::Dead {
                    job_id: job_id.clone(),
                    attempts,
                    at: now,
                });
            }
            Some(next_available_at) => {
                self.store.signal_one();
                info!(
                    job_id = %job_id,
                    attempts,
                    next_available_at = %next_available_at,
                    "retry scheduled"
                );
                self.emit(JobEvent::RetryScheduled {
                    job_id: job_id.clone(),
                    attempts,
                    next_available_at,
                    at: now,
                });
            }
        }

        Ok(())
    }

    /// Re-queue every job whose lease has expired; returns how many.
    ///
    /// Expiration is not a failure: attempts are untouched, the job becomes
    /// immediately eligible again, and the fencing token stays put until the
    /// next successful lease. When anything was re-queued every blocked poll
    /// is woken, since all of them may now find work.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<JobId> = {
            let mut jobs = self.store.jobs.lock();
            jobs.values_mut()
                .filter(|job| job.lease_expired(now))
                .map(|job| {
                    job.release_expired_lease(now);
                    job.id.clone()
                })
                .collect()
        };

        if !expired.is_empty() {
            self.store.signal_all();
        }
        for job_id in &expired {
            info!(job_id = %job_id, "lease expired, job re-queued");
            self.emit(JobEvent::LeaseExpired {
                job_id: job_id.clone(),
                at: now,
            });
        }

        expired.len()
    }

    /// Copy of a single job record.
    pub fn get_job(&self, job_id: &JobId) -> Option<Job> {
        self.store.get(job_id)
    }

    /// Snapshot of every job, for the inspection surface.
    pub fn snapshot_all(&self) -> std::collections::HashMap<JobId, Job> {
        self.store.snapshot(|_| true)
    }

    /// Snapshot of the dead-letter set.
    pub fn snapshot_dead(&self) -> std::collections::HashMap<JobId, Job> {
        self.store.snapshot(|job| job.state == JobState::Dead)
    }

    /// Lease validation shared by ack and fail, in precedence order:
    /// ownership, fencing token, expiry. Runs under the store lock.
    fn check_lease(
        &self,
        job: &Job,
        worker: &WorkerId,
        lease_id: LeaseId,
        now: DateTime<Utc>,
    ) -> BrokerResult<()> {
        if !job.leased_to(worker) {
            self.reject(job, worker, RejectReason::NotCurrentLeaseOwner, now);
            return Err(BrokerError::NotLeaseHolder);
        }
        if lease_id != job.lease_id {
            self.reject(job, worker, RejectReason::StaleLeaseId, now);
            return Err(BrokerError::StaleLease {
                presented: lease_id,
                current: job.lease_id,
            });
        }
        if job.lease_expired(now) {
            self.reject(job, worker, RejectReason::LeaseExpired, now);
            return Err(BrokerError::LeaseExpired);
        }
        Ok(())
    }

    fn reject(&self, job: &Job, worker: &WorkerId, reason: RejectReason, now: DateTime<Utc>) {
        warn!(
            job_id = %job.id,
            worker_id = %worker,
            reason = reason.as_str(),
            "ack rejected"
        );
        self.emit(JobEvent::AckRejected {
            job_id: job.id.clone(),
            worker_id: worker.clone(),
            reason,
            at: now,
        });
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
