mod job;
mod scheduler;
mod sync_job;

pub use job::{
    Job, JobContext, JobInput, JobKind, JobRegistry, JobState, ProgressReporter,
};
pub use scheduler::{
    ConflictPolicy, Constraints, JobHandle, JobRegistration, NetworkRequirement,
    RegistrationResult, RetryPolicy, Scheduler,
};
pub use sync_job::{SyncJob, SyncOutcome, SyncReport};

#[cfg(test)]
pub(crate) use sync_job::tests as fixtures;
