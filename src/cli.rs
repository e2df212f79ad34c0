//! Interface de linha de comando do carrier-lookup baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, run, sweep)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Consulta em lote de transportadores por número MC.
#[derive(Debug, Parser)]
#[command(name = "carrier-lookup", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./carrier-lookup.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia o servidor HTTP.
    Serve {
        /// Porta de escuta; sobrepõe a configuração e a variável PORT.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Processa um CSV local e grava a planilha de resultados.
    Run {
        /// CSV com a coluna MC_NUMBER.
        input: PathBuf,

        /// Onde copiar o artefato final.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Remove artefatos antigos do diretório de resultados.
    Sweep {
        /// Idade mínima, em segundos, para remoção (padrão: retenção configurada).
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
}
