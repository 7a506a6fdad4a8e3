//! # mule-broker: single-node job broker core
//!
//! The broker mediates between producers, which submit opaque payloads, and
//! workers, which execute them. It guarantees at-least-once delivery,
//! exactly-once effects for job creation, and bounded retry with
//! dead-lettering:
//!
//! - **Fenced leases**: every successful poll issues a lease with a strictly
//!   increasing token; a stale worker's ack or fail can never overtake a
//!   later lease.
//! - **Idempotent enqueue**: reserve-and-commit semantics on a client
//!   supplied key make retried create-requests produce exactly one job.
//! - **Bounded retry**: failed jobs are re-queued behind exponential backoff
//!   with full jitter until the retry budget moves them to the dead letter
//!   set.
//! - **Long-poll dispatch**: polls block until a job becomes eligible or the
//!   deadline passes; enqueues, retries, and lease expirations wake them.
//!
//! State lives purely in memory: a restart loses all jobs and idempotency
//! entries.
//!
//! ```no_run
//! use mule_broker::{Broker, LeaseSweeper, WorkerId};
//! use std::sync::Arc;
//!
//! # async fn demo() -> mule_broker::BrokerResult<()> {
//! let broker = Arc::new(Broker::new());
//! LeaseSweeper::spawn(Arc::clone(&broker));
//!
//! let job_id = broker.enqueue("encode video 42", None)?;
//!
//! let worker = WorkerId::from("worker-1");
//! if let Some(job) = broker.poll(&worker).await? {
//!     // ... process the payload ...
//!     broker.ack(&worker, &job.id, job.lease_id)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod broker;
pub mod clock;
pub mod error;
pub mod idempotency;
pub mod store;
pub mod sweeper;
pub mod types;

pub use backoff::RetryPolicy;
pub use broker::{Broker, BrokerConfig, EventStream};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BrokerError, BrokerResult};
pub use idempotency::{IdempotencyRegistry, Reservation};
pub use store::JobStore;
pub use sweeper::LeaseSweeper;
pub use types::{Job, JobEvent, JobId, JobState, LeaseId, RejectReason, WorkerId};

/// Everything a producer- or worker-facing integration usually needs.
pub mod prelude {
    pub use crate::{
        Broker, BrokerConfig, BrokerError, BrokerResult, Job, JobEvent, JobId, JobState,
        LeaseId, LeaseSweeper, WorkerId,
    };
}
