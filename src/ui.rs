//! Interface de terminal do carrier-lookup: spinner e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! a execução de um lote no comando `run`.

use std::path::Path;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::state_machine::{JobSnapshot, JobStatus};

/// Indicador visual de progresso para a execução de um lote no terminal.
///
/// Exibe um spinner animado durante o processamento e mensagens
/// coloridas para sucesso (verde) e falha (vermelho).
pub struct JobProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo esmaecido para detalhes secundários.
    dim: Style,
}

impl JobProgress {
    /// Inicia o spinner para um lote de `total` chaves.
    pub fn start(job_id: &str, total: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("PROCESSING: 0/{total} ({job_id})"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Atualiza a mensagem do spinner com os contadores atuais.
    pub fn update(&self, snapshot: &JobSnapshot) {
        self.pb.set_message(progress_line(snapshot));
    }

    /// Finaliza o spinner e exibe o resultado final do lote.
    ///
    /// Sucesso é mostrado em verde com checkmark; falha em vermelho com X.
    pub fn complete(&self, snapshot: &JobSnapshot, output: Option<&Path>) {
        self.pb.finish_and_clear();
        match snapshot.status {
            JobStatus::Completed => println!(
                "  {} {} of {} carriers matched",
                self.green.apply_to("✓"),
                snapshot.matched,
                snapshot.total
            ),
            _ => println!(
                "  {} Job failed after {} of {} carriers",
                self.red.apply_to("✗"),
                snapshot.processed,
                snapshot.total
            ),
        }
        if let Some(output) = output {
            println!("  {}", self.dim.apply_to(format!("→ {}", output.display())));
        }
    }
}

fn progress_line(snapshot: &JobSnapshot) -> String {
    format!(
        "PROCESSING: {}/{} · {} matched",
        snapshot.processed, snapshot.total, snapshot.matched
    )
}
