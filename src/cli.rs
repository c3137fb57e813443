//! Interface de linha de comando do queuectl baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (enqueue, status,
//! list, show, dlq, config, worker) e flags globais (--db, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::queue::JobState;

/// queuectl — fila de jobs de shell com retentativas e dead letter queue.
#[derive(Debug, Parser)]
#[command(name = "queuectl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do banco SQLite (sobrepõe queuectl.toml e QUEUECTL_DB).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Enfileira um job a partir de um payload JSON: {"id"?, "command", "max_retries"?}.
    Enqueue {
        /// Payload JSON do job.
        job_json: String,
    },

    /// Mostra a contagem de jobs por estado.
    Status,

    /// Lista os jobs de um estado, do mais antigo ao mais novo.
    List {
        /// Estado a listar.
        #[arg(long, default_value = "pending", value_parser = parse_state)]
        state: JobState,
    },

    /// Mostra um job pelo id.
    Show {
        /// Identificador do job.
        job_id: String,

        /// Imprime o job como JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Operações sobre a dead letter queue.
    #[command(subcommand)]
    Dlq(DlqCommand),

    /// Lê ou altera a configuração da fila.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Executa workers.
    #[command(subcommand)]
    Worker(WorkerCommand),
}

#[derive(Debug, Subcommand)]
pub enum DlqCommand {
    /// Lista os jobs mortos, do mais recente ao mais antigo.
    List,

    /// Devolve um job morto para a fila com as tentativas zeradas.
    Retry {
        /// Identificador do job.
        job_id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Lê o valor de uma chave.
    Get { key: String },

    /// Define o valor de uma chave (max_retries, backoff_base, ...).
    Set { key: String, value: String },
}

#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Executa um worker em primeiro plano até Ctrl-C ou SIGTERM.
    Run,

    /// Inicia N processos worker e aguarda o término de todos.
    Start {
        /// Número de processos worker.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
    },
}

fn parse_state(raw: &str) -> Result<JobState, String> {
    raw.parse().map_err(|e: crate::error::QueueError| e.to_string())
}
