use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Maximum number of characters kept in `Job::output`.
pub const OUTPUT_LIMIT: usize = 1000;

/// Lifecycle states of a queued job.
///
/// pending → processing → completed | failed | dead, with failed → processing
/// on retry and dead → pending on operator retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| QueueError::Validation(format!("unknown job state '{s}'")))
    }
}

/// Untrusted submission payload: `{"id"?, "command", "max_retries"?}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl NewJob {
    pub fn from_json(payload: &str) -> Result<Self, QueueError> {
        serde_json::from_str(payload).map_err(|e| QueueError::Validation(format!("invalid JSON: {e}")))
    }
}

/// A single item in the work queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Validates a payload into a pending job. Never touches storage.
    ///
    /// A missing or empty `id` is replaced by a fresh UUID; a missing or zero
    /// `max_retries` falls back to `default_max_retries`.
    pub fn from_payload(payload: NewJob, default_max_retries: u32) -> Result<Self, QueueError> {
        let command = payload
            .command
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| QueueError::Validation("missing 'command'".into()))?;

        let id = payload
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let max_retries = payload
            .max_retries
            .filter(|&n| n > 0)
            .unwrap_or(default_max_retries);

        // Stored timestamps carry microseconds.
        let now = Utc::now().trunc_subsecs(6);
        Ok(Self {
            id,
            command,
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            next_retry_at: None,
            output: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn from_json(payload: &str, default_max_retries: u32) -> Result<Self, QueueError> {
        Self::from_payload(NewJob::from_json(payload)?, default_max_retries)
    }
}

/// Keeps at most [`OUTPUT_LIMIT`] characters of captured text.
pub fn truncate_output(text: &str) -> String {
    text.chars().take(OUTPUT_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_payload_gets_defaults() {
        let job = Job::from_json(r#"{"command":"echo hi"}"#, 3).unwrap();
        assert_eq!(job.command, "echo hi");
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.next_retry_at.is_none());
        assert!(job.output.is_none());
        assert_eq!(job.created_at, job.updated_at);
        assert!(Uuid::parse_str(&job.id).is_ok());
    }

    #[test]
    fn explicit_id_and_retries_are_kept() {
        let job = Job::from_json(r#"{"id":"job1","command":"ls","max_retries":5}"#, 3).unwrap();
        assert_eq!(job.id, "job1");
        assert_eq!(job.max_retries, 5);
    }

    #[test]
    fn zero_max_retries_falls_back_to_default() {
        let job = Job::from_json(r#"{"command":"ls","max_retries":0}"#, 4).unwrap();
        assert_eq!(job.max_retries, 4);
    }

    #[test]
    fn empty_id_is_regenerated() {
        let job = Job::from_json(r#"{"id":"","command":"ls"}"#, 3).unwrap();
        assert!(!job.id.is_empty());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = Job::from_json(r#"{"command":"ls"}"#, 3).unwrap();
        let b = Job::from_json(r#"{"command":"ls"}"#, 3).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = Job::from_json(r#"{"command":""}"#, 3).unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[test]
    fn missing_command_is_rejected() {
        let err = Job::from_json(r#"{"id":"x"}"#, 3).unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = Job::from_json("{command: echo", 3).unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[test]
    fn negative_max_retries_is_rejected() {
        let err = Job::from_json(r#"{"command":"ls","max_retries":-1}"#, 3).unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[test]
    fn state_parses_from_its_name() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("running".parse::<JobState>().is_err());
    }

    #[test]
    fn job_serializes_with_lowercase_state() {
        let job = Job::from_json(r#"{"id":"job1","command":"ls"}"#, 3).unwrap();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["id"], "job1");
        assert_eq!(value["state"], "pending");
        assert_eq!(value["attempts"], 0);
        assert!(value["next_retry_at"].is_null());
        assert!(value["output"].is_null());
    }

    #[test]
    fn truncate_output_counts_chars() {
        let long = "é".repeat(OUTPUT_LIMIT + 10);
        let truncated = truncate_output(&long);
        assert_eq!(truncated.chars().count(), OUTPUT_LIMIT);
        assert_eq!(truncate_output("short"), "short");
    }
}
