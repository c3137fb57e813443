use thiserror::Error;

use crate::queue::JobState;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Malformed submission payload. The job is never persisted.
    #[error("Job validation failed: {0}")]
    Validation(String),

    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Job {id} is not in the dead letter queue (current state: {state})")]
    Precondition { id: String, state: JobState },

    #[error("Job {0} already exists")]
    DuplicateId(String),

    /// The claimed row changed underneath its owner between claim and outcome.
    #[error("Job {0} is no longer owned by this worker")]
    LostOwnership(String),

    #[error("Store stayed busy after {attempts} attempts: {source}")]
    Contention {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl QueueError {
    /// True for the transient lock errors SQLite reports under write contention.
    pub fn is_busy(err: &rusqlite::Error) -> bool {
        matches!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_display_names_state() {
        let err = QueueError::Precondition {
            id: "job-1".into(),
            state: JobState::Completed,
        };
        assert_eq!(
            err.to_string(),
            "Job job-1 is not in the dead letter queue (current state: completed)"
        );
    }

    #[test]
    fn not_found_display() {
        let err = QueueError::NotFound("abc".into());
        assert_eq!(err.to_string(), "Job abc not found");
    }

    #[test]
    fn busy_detection_ignores_other_errors() {
        assert!(!QueueError::is_busy(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<QueueError>();
    }
}
