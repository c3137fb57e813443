//! Interface de terminal do queuectl — saída colorida dos comandos.
//!
//! Usa a crate `console` para estilização com cores. O [`Ui`] concentra a
//! formatação de todos os resultados impressos em stdout.

use console::Style;

use crate::queue::{Job, JobState};
use crate::store::StateCounts;

/// Formatador de saída dos comandos.
///
/// Sucesso em verde, falha em vermelho, estados intermediários em amarelo.
pub struct Ui {
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para falhas e jobs mortos.
    red: Style,
    // Estilo amarelo para jobs pendentes ou em retentativa.
    yellow: Style,
    // Estilo esmaecido para separadores e rótulos.
    dim: Style,
}

impl Default for Ui {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl Ui {
    fn state_style(&self, state: JobState) -> &Style {
        match state {
            JobState::Completed => &self.green,
            JobState::Failed | JobState::Dead => &self.red,
            JobState::Pending | JobState::Processing => &self.yellow,
        }
    }

    fn rule(&self, width: usize) {
        println!("{}", self.dim.apply_to("─".repeat(width)));
    }

    /// Confirma o enfileiramento de um job.
    pub fn enqueued(&self, job: &Job) {
        println!("{} Job {} enqueued successfully.", self.green.apply_to("✓"), job.id);
    }

    /// Imprime a contagem por estado, incluindo estados vazios.
    pub fn status(&self, counts: &StateCounts) {
        println!("Job Queue Status:");
        self.rule(40);
        for state in JobState::ALL {
            let label = capitalize(state.as_str());
            println!(
                "  {label:12} : {}",
                self.state_style(state).apply_to(counts.get(state))
            );
        }
        self.rule(40);
        println!("  {:12} : {}", "Total", counts.total());
    }

    /// Lista resumida de jobs, uma linha por job.
    pub fn job_list(&self, state: JobState, jobs: &[Job]) {
        if jobs.is_empty() {
            println!("No {state} jobs.");
            return;
        }
        println!("{} job(s) in state {}:", jobs.len(), self.state_style(state).apply_to(state));
        self.rule(80);
        for job in jobs {
            println!(
                "{}  attempts={}/{}  {}",
                job.id,
                job.attempts,
                job.max_retries,
                preview(&job.command, 50)
            );
        }
    }

    /// Detalhe completo de um job.
    pub fn job_detail(&self, job: &Job) {
        println!("ID:          {}", job.id);
        println!("Command:     {}", job.command);
        println!("State:       {}", self.state_style(job.state).apply_to(job.state));
        println!("Attempts:    {}/{}", job.attempts, job.max_retries);
        if let Some(at) = job.next_retry_at {
            println!("Next retry:  {}", at.to_rfc3339());
        }
        println!("Created:     {}", job.created_at.to_rfc3339());
        println!("Updated:     {}", job.updated_at.to_rfc3339());
        if let Some(output) = &job.output {
            println!("Output:");
            println!("{output}");
        }
    }

    /// Imprime o job formatado em JSON.
    pub fn job_json(&self, job: &Job) -> serde_json::Result<()> {
        println!("{}", serde_json::to_string_pretty(job)?);
        Ok(())
    }

    /// Imprime a dead letter queue.
    pub fn dlq(&self, jobs: &[Job]) {
        if jobs.is_empty() {
            println!("Dead Letter Queue is empty.");
            return;
        }
        println!("Dead Letter Queue ({} jobs):", jobs.len());
        self.rule(80);
        for job in jobs {
            println!("ID: {}", self.red.apply_to(&job.id));
            println!("  Command: {}", preview(&job.command, 50));
            println!("  Attempts: {}", job.attempts);
            println!("  Created: {}", job.created_at.to_rfc3339());
            if let Some(output) = &job.output {
                println!("  Output: {}", preview(output, 100));
            }
            println!();
        }
    }

    pub fn retried(&self, job: &Job) {
        println!("{} Job {} moved back to queue.", self.green.apply_to("✓"), job.id);
    }

    pub fn config_value(&self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => println!("{key} = {value}"),
            None => eprintln!("Config key '{key}' not found."),
        }
    }

    pub fn config_set(&self, key: &str, value: &str) {
        println!("{} Config '{key}' set to '{value}'", self.green.apply_to("✓"));
    }

    pub fn workers_started(&self, pids: &[u32]) {
        let pids: Vec<String> = pids.iter().map(u32::to_string).collect();
        println!(
            "{} Started {} worker(s) with PIDs: {}",
            self.green.apply_to("✓"),
            pids.len(),
            pids.join(", ")
        );
        println!("  Logs: worker_0.log, worker_1.log, ...");
    }

    /// Exibe um erro em vermelho no stderr.
    pub fn error(&self, err: &anyhow::Error) {
        eprintln!("{} Error: {err:#}", self.red.apply_to("✗"));
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Primeiros `max` caracteres, com reticências se houver corte.
fn preview(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_text() {
        assert_eq!(preview("short", 50), "short");
        assert_eq!(preview(&"a".repeat(60), 50), format!("{}...", "a".repeat(50)));
    }

    #[test]
    fn capitalize_first_letter() {
        assert_eq!(capitalize("pending"), "Pending");
        assert_eq!(capitalize(""), "");
    }
}
