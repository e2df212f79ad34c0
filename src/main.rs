mod artifact;
mod cli;
mod config;
mod error;
mod intake;
mod maintenance;
mod orchestrator;
mod pool;
mod protocol;
mod rate_limit;
mod rest;
mod session;
mod state_machine;
#[cfg(test)]
mod testing;
mod ui;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use artifact::ArtifactStore;
use cli::{Cli, Command};
use config::AppConfig;
use orchestrator::JobOrchestrator;
use pool::SessionPool;
use protocol::RetrievalProtocol;
use rate_limit::RateLimiter;
use rest::AppState;
use session::HttpSessionFactory;
use state_machine::{JobStatus, StatusPredicate};
use ui::JobProgress;

const POLL_EVERY: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Serve { port } => serve(config, port).await,
        Command::Run { input, output } => run_batch(config, &input, output.as_deref()).await,
        Command::Sweep { max_age_secs } => sweep(config, max_age_secs).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "carrier_lookup=debug"
    } else {
        "carrier_lookup=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn build_orchestrator(config: &AppConfig) -> Result<JobOrchestrator> {
    let profile = Arc::new(config.site.clone());
    let factory = Arc::new(HttpSessionFactory::new(
        Arc::clone(&profile),
        config.timeouts.page_load(),
    ));
    let pool = SessionPool::start(
        factory,
        config.pool.size,
        config.pool.policy,
        config.timeouts.pool_acquire(),
    )
    .await
    .context("failed to start session pool")?;

    let protocol = RetrievalProtocol::new(
        profile,
        config.timeouts.clone(),
        StatusPredicate::containing(&config.jobs.status_phrase),
    );
    let artifacts = ArtifactStore::new(&config.artifacts.dir, config.artifacts.format);
    let limiter = RateLimiter::from_config(&config.rate_limit);

    Ok(JobOrchestrator::new(
        Arc::new(pool),
        Arc::new(protocol),
        Arc::new(artifacts),
        Arc::new(limiter),
        config.pacing(),
    ))
}

async fn serve(config: AppConfig, port: Option<u16>) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(&config).await?);

    let shutdown = Arc::new(Notify::new());
    let maintenance = maintenance::spawn(
        Arc::clone(&orchestrator),
        config.sweep_interval(),
        config.retention(),
        Arc::clone(&shutdown),
    );

    let state = Arc::new(AppState {
        orchestrator: Arc::clone(&orchestrator),
        admin_token: config.admin_token.clone(),
        retention: config.retention(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.port)));
    let served = rest::start(addr, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown requested");
    })
    .await;

    shutdown.notify_one();
    if let Err(e) = maintenance.await {
        tracing::warn!("maintenance loop ended abnormally: {e}");
    }
    orchestrator.shutdown().await;
    served
}

async fn run_batch(config: AppConfig, input: &Path, output: Option<&Path>) -> Result<()> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let keys = intake::keys_from_csv(&bytes)?;

    let orchestrator = build_orchestrator(&config).await?;
    let ticket = orchestrator.submit("cli", &keys)?;

    let progress = JobProgress::start(&ticket.job_id, ticket.total);
    let snapshot = orchestrator
        .wait(&ticket.job_id, POLL_EVERY, |snapshot| progress.update(snapshot))
        .await?;

    let written = snapshot
        .artifact
        .as_ref()
        .map(|file| orchestrator.artifacts().dir().join(file));
    let shown = match (written, output) {
        (Some(written), Some(output)) => {
            tokio::fs::copy(&written, output)
                .await
                .with_context(|| format!("failed to copy artifact to {}", output.display()))?;
            Some(output.to_path_buf())
        }
        (written, _) => written,
    };
    progress.complete(&snapshot, shown.as_deref());
    orchestrator.shutdown().await;

    if snapshot.status == JobStatus::Failed {
        bail!("job {} failed", snapshot.job_id);
    }
    Ok(())
}

async fn sweep(config: AppConfig, max_age_secs: Option<u64>) -> Result<()> {
    let store = ArtifactStore::new(&config.artifacts.dir, config.artifacts.format);
    let max_age = max_age_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.retention());

    // Fora do servidor não há jobs em andamento para proteger.
    let report = store.sweep(max_age, &HashSet::new()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
