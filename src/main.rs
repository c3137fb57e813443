mod cli;
mod config;
mod error;
mod logging;
mod queue;
mod store;
mod ui;
mod worker;

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cli::{Cli, Command, ConfigCommand, DlqCommand, WorkerCommand};
use config::QueueConfig;
use error::QueueError;
use queue::Job;
use store::{ConfigProvider, Store};
use ui::Ui;
use worker::{ShellRunner, Worker};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let ui = Ui::default();
    if let Err(e) = run(cli, &ui).await {
        ui.error(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, ui: &Ui) -> Result<()> {
    let mut config = QueueConfig::load()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let store = Store::open(&config.db_path, config.busy_timeout())
        .with_context(|| format!("failed to open job store at {}", config.db_path.display()))?;

    match cli.command {
        Command::Enqueue { job_json } => {
            let job = Job::from_json(&job_json, store.max_retries())?;
            store.insert(&job)?;
            ui.enqueued(&job);
        }
        Command::Status => ui.status(&store.counts()?),
        Command::List { state } => ui.job_list(state, &store.list(state)?),
        Command::Show { job_id, json } => {
            let job = store.find(&job_id)?.ok_or(QueueError::NotFound(job_id))?;
            if json {
                ui.job_json(&job)?;
            } else {
                ui.job_detail(&job);
            }
        }
        Command::Dlq(DlqCommand::List) => ui.dlq(&store.list_dead()?),
        Command::Dlq(DlqCommand::Retry { job_id }) => {
            ui.retried(&store.retry_dead(&job_id, Utc::now())?);
        }
        Command::Config(ConfigCommand::Get { key }) => {
            ui.config_value(&key, store.get(&key)?.as_deref());
        }
        Command::Config(ConfigCommand::Set { key, value }) => {
            store.set(&key, &value)?;
            ui.config_set(&key, &value);
        }
        Command::Worker(WorkerCommand::Run) => run_worker(store, &config).await,
        Command::Worker(WorkerCommand::Start { count }) => {
            start_workers(count, &config, cli.verbose, ui).await?;
        }
    }

    Ok(())
}

/// Runs one worker loop in this process until Ctrl-C or SIGTERM.
async fn run_worker(store: Store, config: &QueueConfig) {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested, finishing current job");
        trigger.cancel();
    });

    let name = format!("worker-{}", std::process::id());
    let worker = Worker::new(name, store, ShellRunner, config.worker());
    worker.run(shutdown).await;
}

/// Spawns `count` `worker run` child processes and waits for all of them.
///
/// Ctrl-C in the terminal already reaches the whole process group. A signal
/// aimed only at this process (`kill <pid>`, a service manager) is forwarded
/// to every worker as SIGTERM, and each one stops after its current job.
async fn start_workers(count: u32, config: &QueueConfig, verbose: bool, ui: &Ui) -> Result<()> {
    let exe = std::env::current_exe().context("failed to locate queuectl executable")?;

    let mut children: Vec<Child> = Vec::new();
    for i in 0..count {
        match spawn_worker(&exe, i, config, verbose) {
            Ok(child) => children.push(child),
            Err(e) => {
                warn!(worker = i, "spawn failed, stopping workers already started");
                stop_workers(&worker_pids(&children)).await;
                for child in &mut children {
                    let _ = child.wait().await;
                }
                return Err(e);
            }
        }
    }

    let pids = worker_pids(&children);
    ui.workers_started(&pids);

    let mut shutdown = std::pin::pin!(shutdown_signal());
    let mut forwarded = false;
    for (i, child) in children.iter_mut().enumerate() {
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = &mut shutdown, if !forwarded => {
                    forwarded = true;
                    info!("shutdown requested, stopping workers after their current jobs");
                    // Earlier workers are already reaped; their pids may be reused.
                    stop_workers(pids.get(i..).unwrap_or_default()).await;
                }
            }
        };
        if status.success() {
            info!(worker = i, "worker exited");
        } else {
            warn!(worker = i, %status, "worker exited abnormally");
        }
    }
    Ok(())
}

fn spawn_worker(exe: &Path, i: u32, config: &QueueConfig, verbose: bool) -> Result<Child> {
    let log_path = format!("worker_{i}.log");
    let log =
        std::fs::File::create(&log_path).with_context(|| format!("failed to create {log_path}"))?;

    let mut cmd = tokio::process::Command::new(exe);
    cmd.arg("--db").arg(&config.db_path);
    if verbose {
        cmd.arg("--verbose");
    }
    cmd.args(["worker", "run"])
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log)
        .spawn()
        .with_context(|| format!("failed to spawn worker {i}"))
}

fn worker_pids(children: &[Child]) -> Vec<u32> {
    children.iter().filter_map(Child::id).collect()
}

/// Asks each worker to shut down cooperatively.
#[cfg(unix)]
async fn stop_workers(pids: &[u32]) {
    for pid in pids {
        let result = tokio::process::Command::new("kill")
            .arg("-15")
            .arg(pid.to_string())
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => debug!(pid, "sent SIGTERM to worker"),
            Ok(out) => warn!(pid, status = %out.status, "kill failed for worker"),
            Err(e) => warn!(pid, error = %e, "failed to run kill"),
        }
    }
}

#[cfg(not(unix))]
async fn stop_workers(pids: &[u32]) {
    // Console workers already receive Ctrl-C from the shared console.
    debug!(?pids, "no signal forwarding on this platform");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn stop_workers_terminates_running_children() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let started = Instant::now();

        stop_workers(&worker_pids(std::slice::from_ref(&child))).await;

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.signal(), Some(15));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
