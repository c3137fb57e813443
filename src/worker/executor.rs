use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::queue::{FailureKind, JobOutcome, truncate_output};

/// Runs a job's command and reports how it went.
///
/// Implementations never return an error: every way a command can go wrong
/// becomes a [`JobOutcome::Failure`].
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    async fn run(&self, command: &str, timeout: Duration) -> JobOutcome;
}

/// Runs commands through the platform shell as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl ShellRunner {
    fn shell(command: &str) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Duration) -> JobOutcome {
        let child = match Self::shell(command).spawn() {
            Ok(child) => child,
            Err(e) => return JobOutcome::Failure(FailureKind::Spawn(e.to_string())),
        };

        // Dropping the child on timeout kills it (kill_on_drop).
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return JobOutcome::Failure(FailureKind::Spawn(e.to_string())),
            Err(_) => {
                return JobOutcome::Failure(FailureKind::TimedOut {
                    secs: timeout.as_secs(),
                });
            }
        };

        if output.status.success() {
            JobOutcome::Success(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            JobOutcome::Failure(FailureKind::Exit {
                code: output.status.code(),
                stderr: truncate_output(&String::from_utf8_lossy(&output.stderr)),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let outcome = ShellRunner.run("echo hi", TIMEOUT).await;
        assert_eq!(outcome, JobOutcome::Success("hi\n".into()));
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_with_stderr() {
        let outcome = ShellRunner.run("echo oops >&2; exit 3", TIMEOUT).await;
        assert_eq!(
            outcome,
            JobOutcome::Failure(FailureKind::Exit {
                code: Some(3),
                stderr: "oops\n".into(),
            })
        );
    }

    #[tokio::test]
    async fn unknown_command_is_failure() {
        let outcome = ShellRunner
            .run("definitely-not-a-real-command-queuectl", TIMEOUT)
            .await;
        assert!(matches!(
            outcome,
            JobOutcome::Failure(FailureKind::Exit { code: Some(127), .. })
        ));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let started = std::time::Instant::now();
        let outcome = ShellRunner.run("sleep 5", Duration::from_millis(200)).await;
        assert_eq!(outcome, JobOutcome::Failure(FailureKind::TimedOut { secs: 0 }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
