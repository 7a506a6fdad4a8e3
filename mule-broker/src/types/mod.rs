pub mod events;
pub mod ids;
pub mod job;

pub use events::{JobEvent, RejectReason};
pub use ids::{JobId, LeaseId, WorkerId};
pub use job::{Job, JobState};
