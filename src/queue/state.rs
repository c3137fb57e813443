use std::fmt;

use chrono::{DateTime, Utc};

use super::backoff::Backoff;
use super::job::{Job, JobState, truncate_output};

/// Why an execution attempt failed.
///
/// All kinds drive the same state transition; the distinction only shows up
/// in the recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Command ran and exited non-zero (`None` when killed by a signal).
    Exit { code: Option<i32>, stderr: String },
    /// Command exceeded its wall-clock budget and was killed.
    TimedOut { secs: u64 },
    /// Command could not be started at all.
    Spawn(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Exit { code, stderr } => {
                match code {
                    Some(code) => write!(f, "exit code {code}")?,
                    None => write!(f, "terminated by signal")?,
                }
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            FailureKind::TimedOut { secs } => write!(f, "timed out after {secs}s"),
            FailureKind::Spawn(msg) => write!(f, "failed to spawn: {msg}"),
        }
    }
}

/// The result of executing a claimed job's command once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Exit status 0, with captured standard output.
    Success(String),
    Failure(FailureKind),
}

/// The state change to record for a claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// processing → completed.
    Complete { output: String },
    /// processing → failed, claimable again at `next_retry_at`.
    Retry {
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        output: String,
    },
    /// processing → dead; retry budget exhausted.
    Dead { attempts: u32, output: String },
}

impl Transition {
    pub fn target_state(&self) -> JobState {
        match self {
            Transition::Complete { .. } => JobState::Completed,
            Transition::Retry { .. } => JobState::Failed,
            Transition::Dead { .. } => JobState::Dead,
        }
    }

    /// Applies the transition to an in-memory copy of the job.
    pub fn apply(&self, job: &mut Job, now: DateTime<Utc>) {
        job.state = self.target_state();
        job.updated_at = now;
        match self {
            Transition::Complete { output } => {
                job.next_retry_at = None;
                job.output = Some(output.clone());
            }
            Transition::Retry {
                attempts,
                next_retry_at,
                output,
            } => {
                job.attempts = *attempts;
                job.next_retry_at = Some(*next_retry_at);
                job.output = Some(output.clone());
            }
            Transition::Dead { attempts, output } => {
                job.attempts = *attempts;
                job.next_retry_at = None;
                job.output = Some(output.clone());
            }
        }
    }
}

/// Decides how a claimed job moves once its command has run.
pub struct StateMachine;

impl StateMachine {
    /// Compute the transition for a `processing` job given its execution outcome.
    ///
    /// Success completes the job. Failure increments `attempts`; reaching
    /// `max_retries` dead-letters the job, otherwise it is scheduled for retry
    /// after `backoff.delay_secs(attempts)`.
    pub fn next(job: &Job, outcome: JobOutcome, backoff: Backoff, now: DateTime<Utc>) -> Transition {
        match outcome {
            JobOutcome::Success(stdout) => Transition::Complete {
                output: truncate_output(&stdout),
            },
            JobOutcome::Failure(kind) => {
                let attempts = job.attempts.saturating_add(1);
                if attempts >= job.max_retries {
                    Transition::Dead {
                        attempts,
                        output: truncate_output(&format!("Failed after {attempts} attempts: {kind}")),
                    }
                } else {
                    Transition::Retry {
                        attempts,
                        next_retry_at: backoff.retry_at(now, attempts),
                        output: truncate_output(&kind.to_string()),
                    }
                }
            }
        }
    }

    /// Operator retry of a dead-lettered job: back to pending with a clean slate.
    pub fn reset(job: &mut Job, now: DateTime<Utc>) {
        job.state = JobState::Pending;
        job.attempts = 0;
        job.next_retry_at = None;
        job.output = None;
        job.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::OUTPUT_LIMIT;
    use chrono::{Duration, TimeZone};

    fn make_job(max_retries: u32) -> Job {
        let mut job = Job::from_json(r#"{"command":"false"}"#, max_retries).unwrap();
        job.state = JobState::Processing;
        job
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn failure() -> JobOutcome {
        JobOutcome::Failure(FailureKind::Exit {
            code: Some(1),
            stderr: String::new(),
        })
    }

    #[test]
    fn success_completes_with_output() {
        let mut job = make_job(3);
        let t = StateMachine::next(&job, JobOutcome::Success("hi\n".into()), Backoff::default(), now());
        assert_eq!(t, Transition::Complete { output: "hi\n".into() });

        t.apply(&mut job, now());
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.output.as_deref(), Some("hi\n"));
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn success_output_is_truncated() {
        let job = make_job(3);
        let long = "x".repeat(OUTPUT_LIMIT * 2);
        let t = StateMachine::next(&job, JobOutcome::Success(long), Backoff::default(), now());
        match t {
            Transition::Complete { output } => assert_eq!(output.len(), OUTPUT_LIMIT),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn three_failures_dead_letter_a_three_retry_job() {
        let mut job = make_job(3);

        let t = StateMachine::next(&job, failure(), Backoff::default(), now());
        assert!(matches!(t, Transition::Retry { attempts: 1, .. }));
        t.apply(&mut job, now());
        job.state = JobState::Processing;

        let t = StateMachine::next(&job, failure(), Backoff::default(), now());
        assert!(matches!(t, Transition::Retry { attempts: 2, .. }));
        t.apply(&mut job, now());
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 2);
        assert!(job.next_retry_at.unwrap() > now());
        job.state = JobState::Processing;

        let t = StateMachine::next(&job, failure(), Backoff::default(), now());
        t.apply(&mut job, now());
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 3);
        assert!(job.next_retry_at.is_none());
        assert_eq!(
            job.output.as_deref(),
            Some("Failed after 3 attempts: exit code 1")
        );
    }

    #[test]
    fn retry_is_scheduled_with_backoff() {
        let mut job = make_job(5);
        job.attempts = 1;
        let t = StateMachine::next(&job, failure(), Backoff::new(2), now());
        match t {
            Transition::Retry {
                attempts,
                next_retry_at,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(next_retry_at - now(), Duration::seconds(4));
            }
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[test]
    fn single_retry_budget_dies_on_first_failure() {
        let job = make_job(1);
        let t = StateMachine::next(
            &job,
            JobOutcome::Failure(FailureKind::TimedOut { secs: 30 }),
            Backoff::default(),
            now(),
        );
        assert_eq!(
            t,
            Transition::Dead {
                attempts: 1,
                output: "Failed after 1 attempts: timed out after 30s".into(),
            }
        );
    }

    #[test]
    fn reset_clears_retry_bookkeeping() {
        let mut job = make_job(3);
        job.state = JobState::Dead;
        job.attempts = 3;
        job.output = Some("Failed after 3 attempts".into());

        StateMachine::reset(&mut job, now());
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.next_retry_at.is_none());
        assert!(job.output.is_none());
        assert_eq!(job.updated_at, now());
    }

    #[test]
    fn failure_kind_display() {
        let exit = FailureKind::Exit {
            code: Some(2),
            stderr: "no such file\n".into(),
        };
        assert_eq!(exit.to_string(), "exit code 2: no such file");

        let signal = FailureKind::Exit {
            code: None,
            stderr: String::new(),
        };
        assert_eq!(signal.to_string(), "terminated by signal");

        assert_eq!(
            FailureKind::Spawn("not found".into()).to_string(),
            "failed to spawn: not found"
        );
    }
}
