//! Configuração do queuectl carregada a partir de `queuectl.toml`.
//!
//! A struct [`QueueConfig`] contém os parâmetros do processo (banco, tempos
//! de espera). Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `QUEUECTL_DB` tem precedência sobre o arquivo.
//!
//! Os parâmetros da fila em si (`max_retries`, `backoff_base`) ficam na
//! tabela `config` do banco; veja [`crate::store::ConfigProvider`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::worker::WorkerConfig;

/// Configuração de nível superior carregada de `queuectl.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Caminho do banco SQLite compartilhado pelos workers.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Intervalo de espera do worker quando não há job elegível.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Tempo máximo de execução de um comando.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Tempo máximo de espera por um lock do banco.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("queue.db")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_busy_timeout_secs() -> u64 {
    10
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            poll_interval_ms: default_poll_interval_ms(),
            command_timeout_secs: default_command_timeout_secs(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl QueueConfig {
    /// Carrega a configuração de `queuectl.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("queuectl.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<QueueConfig>(&contents)
                .with_context(|| format!("invalid config in {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(db) = std::env::var("QUEUECTL_DB")
            && !db.is_empty()
        {
            config.db_path = PathBuf::from(db);
        }

        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = QueueConfig::default();
        assert_eq!(config.db_path, PathBuf::from("queue.db"));
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.command_timeout_secs, 30);
        assert_eq!(config.busy_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            db_path = "/var/lib/queuectl/jobs.db"
            command_timeout_secs = 5
        "#;
        let config: QueueConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/queuectl/jobs.db"));
        assert_eq!(config.command_timeout_secs, 5);
        assert_eq!(config.poll_interval_ms, 1000);

        let worker = config.worker();
        assert_eq!(worker.command_timeout, Duration::from_secs(5));
        assert_eq!(worker.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queuectl.toml");
        std::fs::write(&path, "poll_interval_ms = 250\n").unwrap();

        let config = QueueConfig::load_from(&path).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queuectl.toml");
        std::fs::write(&path, "poll_interval_ms = \"soon\"\n").unwrap();

        assert!(QueueConfig::load_from(&path).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = QueueConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.command_timeout_secs, 30);
    }
}
