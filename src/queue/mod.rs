mod backoff;
mod job;
mod state;

pub use backoff::{Backoff, DEFAULT_BACKOFF_BASE};
pub use job::{Job, JobState, truncate_output};
pub use state::{FailureKind, JobOutcome, StateMachine, Transition};
