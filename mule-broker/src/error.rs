use thiserror::Error;

use crate::types::LeaseId;

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors surfaced to producers and workers.
///
/// Every error is local to the offending request; nothing here propagates
/// across jobs or workers. "No job available" from a poll is not an error,
/// it is an `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("not the current lease holder")]
    NotLeaseHolder,

    #[error("stale lease token: presented {presented}, current {current}")]
    StaleLease {
        presented: LeaseId,
        current: LeaseId,
    },

    #[error("lease has expired")]
    LeaseExpired,

    #[error("enqueue with idempotency key {0:?} is already in flight")]
    ReservationInFlight(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Check whether this error is one of the lease-conflict conditions a
    /// worker must treat as "the broker has moved on from this lease".
    pub fn is_lease_conflict(&self) -> bool {
        matches!(
            self,
            Self::NotLeaseHolder | Self::StaleLease { .. } | Self::LeaseExpired
        )
    }
}
