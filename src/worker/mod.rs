//! Worker loop: claim, execute, record, repeat.
//!
//! One [`Worker`] runs per process. Workers never talk to each other; the
//! store's atomic claim is the only coordination point, and the command runs
//! outside any store transaction.

mod executor;

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::queue::{Backoff, Job, StateMachine, Transition};
use crate::store::{ConfigProvider, Store};

pub use executor::{CommandRunner, ShellRunner};

/// Pause between attempts to record an outcome while the store stays busy.
const RECORD_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Timing knobs for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle time between claim attempts when nothing is eligible.
    pub poll_interval: Duration,
    /// Wall-clock budget for a single command execution.
    pub command_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            command_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Worker<R> {
    name: String,
    store: Store,
    runner: R,
    config: WorkerConfig,
}

impl<R: CommandRunner> Worker<R> {
    pub fn new(name: impl Into<String>, store: Store, runner: R, config: WorkerConfig) -> Self {
        Self {
            name: name.into(),
            store,
            runner,
            config,
        }
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// The token is checked before every iteration and while idling; a
    /// command already running is allowed to finish (or time out) first.
    /// Failed jobs and store errors never end the loop.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker = %self.name, "worker started");

        while !shutdown.is_cancelled() {
            match self.process_next(&shutdown).await {
                Ok(Some(_)) => continue,
                Ok(None) => debug!(worker = %self.name, "no eligible job"),
                Err(e) => error!(worker = %self.name, error = %e, "worker iteration failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(worker = %self.name, "worker stopped");
    }

    /// Claims the next eligible job, if any, and runs it to a recorded outcome.
    pub async fn process_next(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<Job>, QueueError> {
        let Some(job) = self.store.claim_next(Utc::now())? else {
            return Ok(None);
        };
        self.execute_claimed(job, shutdown).await.map(Some)
    }

    /// Executes a job this worker has claimed and persists the resulting transition.
    pub async fn execute_claimed(
        &self,
        job: Job,
        shutdown: &CancellationToken,
    ) -> Result<Job, QueueError> {
        info!(
            worker = %self.name,
            job_id = %job.id,
            attempts = job.attempts,
            command = %job.command,
            "executing job"
        );

        let outcome = self.runner.run(&job.command, self.config.command_timeout).await;

        // Base is read at failure time so config changes apply immediately.
        let now = Utc::now().trunc_subsecs(6);
        let backoff = Backoff::new(self.store.backoff_base());
        let transition = StateMachine::next(&job, outcome, backoff, now);
        let recorded = self.record_owned(&job, &transition, now, shutdown).await?;

        match &transition {
            Transition::Complete { .. } => {
                info!(worker = %self.name, job_id = %recorded.id, "job completed");
            }
            Transition::Retry {
                attempts,
                next_retry_at,
                output,
            } => {
                warn!(
                    worker = %self.name,
                    job_id = %recorded.id,
                    attempts,
                    max_retries = recorded.max_retries,
                    next_retry_at = %next_retry_at,
                    reason = %output,
                    "job failed, retry scheduled"
                );
            }
            Transition::Dead { attempts, output } => {
                error!(
                    worker = %self.name,
                    job_id = %recorded.id,
                    attempts,
                    reason = %output,
                    "job moved to dead letter queue"
                );
            }
        }

        Ok(recorded)
    }

    /// Persists the outcome of a job only this worker owns, retrying while the
    /// store is busy. Gives up only once `shutdown` is cancelled.
    async fn record_owned(
        &self,
        job: &Job,
        transition: &Transition,
        now: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> Result<Job, QueueError> {
        let mut retries: u32 = 0;
        loop {
            match self.store.record(job, transition, now) {
                Err(QueueError::Contention { .. }) if !shutdown.is_cancelled() => {
                    retries += 1;
                    warn!(
                        worker = %self.name,
                        job_id = %job.id,
                        retries,
                        "store busy while recording outcome, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(RECORD_RETRY_DELAY) => {}
                    }
                }
                result => return result,
            }
        }
    }
}
