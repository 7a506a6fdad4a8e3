use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, LeaseId, WorkerId};

/// Minimal stable event protocol for structured observability.
///
/// One event per state transition, plus `AckRejected` for refused commits.
/// Consumers subscribe through the broker's broadcast channel; a slow
/// consumer may miss events, never block the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Job was accepted into the queue.
    Enqueued {
        job_id: JobId,
        payload_len: usize,
        idempotency_key: Option<String>,
        at: DateTime<Utc>,
    },

    /// Job was leased to a worker.
    Leased {
        job_id: JobId,
        worker_id: WorkerId,
        lease_id: LeaseId,
        lease_expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// Worker committed successful processing.
    Acked {
        job_id: JobId,
        worker_id: WorkerId,
        lease_id: LeaseId,
        at: DateTime<Utc>,
    },

    /// Worker reported a failure.
    Failed {
        job_id: JobId,
        worker_id: WorkerId,
        lease_id: LeaseId,
        attempts: u32,
        at: DateTime<Utc>,
    },

    /// Failed job was re-queued with a backoff hold-back.
    RetryScheduled {
        job_id: JobId,
        attempts: u32,
        next_available_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// Sweeper reclaimed an expired lease.
    LeaseExpired { job_id: JobId, at: DateTime<Utc> },

    /// Job exhausted its retry budget.
    Dead {
        job_id: JobId,
        attempts: u32,
        at: DateTime<Utc>,
    },

    /// An ack or fail was refused.
    AckRejected {
        job_id: JobId,
        worker_id: WorkerId,
        reason: RejectReason,
        at: DateTime<Utc>,
    },
}

/// Why an ack or fail was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotCurrentLeaseOwner,
    StaleLeaseId,
    LeaseExpired,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotCurrentLeaseOwner => "not_current_lease_owner",
            Self::StaleLeaseId => "stale_lease_id",
            Self::LeaseExpired => "lease_expired",
        }
    }
}

impl JobEvent {
    /// Get the event type name as a string.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Leased { .. } => "leased",
            Self::Acked { .. } => "acked",
            Self::Failed { .. } => "failed",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::LeaseExpired { .. } => "lease_expired",
            Self::Dead { .. } => "dead",
            Self::AckRejected { .. } => "ack_rejected",
        }
    }

    /// Get the job ID from any event.
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. } => job_id,
            Self::Leased { job_id, .. } => job_id,
            Self::Acked { job_id, .. } => job_id,
            Self::Failed { job_id, .. } => job_id,
            Self::RetryScheduled { job_id, .. } => job_id,
            Self::LeaseExpired { job_id, .. } => job_id,
            Self::Dead { job_id, .. } => job_id,
            Self::AckRejected { job_id, .. } => job_id,
        }
    }

    /// Get the timestamp from any event.
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. } => at,
            Self::Leased { at, .. } => at,
            Self::Acked { at, .. } => at,
            Self::Failed { at, .. } => at,
            Self::RetryScheduled { at, .. } => at,
            Self::LeaseExpired { at, .. } => at,
            Self::Dead { at, .. } => at,
            Self::AckRejected { at, .. } => at,
        }
    }
}
