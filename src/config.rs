//! Configuração do carrier-lookup carregada a partir de `carrier-lookup.toml`.
//!
//! A struct [`AppConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `PORT` e `CARRIER_LOOKUP_ADMIN_TOKEN` têm
//! precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::artifact::ArtifactFormat;
use crate::pool::PoolPolicy;
use crate::protocol::Timeouts;
use crate::rate_limit::RateLimitConfig;
use crate::session::SiteProfile;

/// Arquivo procurado no diretório atual quando `--config` não é informado.
pub const CONFIG_FILE: &str = "carrier-lookup.toml";

/// Configuração de nível superior carregada de `carrier-lookup.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Porta HTTP do servidor.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Token exigido pela varredura sob demanda; sem token o endpoint fica desativado.
    #[serde(default)]
    pub admin_token: Option<String>,

    #[serde(default)]
    pub site: SiteProfile,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

/// Tamanho e política do pool de sessões.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub size: usize,
    pub policy: PoolPolicy,
}

/// Parâmetros do laço de execução de cada job.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Pausa entre chaves consecutivas, limitando a carga na fonte.
    pub pacing_ms: u64,
    /// Trecho exigido (sem diferenciar maiúsculas) no status do transportador.
    pub status_phrase: String,
}

/// Onde e por quanto tempo os artefatos ficam guardados.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
    pub format: ArtifactFormat,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

// Valor padrão para a porta: 5000.
fn default_port() -> u16 {
    5000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 2,
            policy: PoolPolicy::Reuse,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 2000,
            status_phrase: "AUTHORIZED FOR".to_string(),
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("temp_results"),
            format: ArtifactFormat::Xlsx,
            retention_secs: 3600,
            sweep_interval_secs: 600,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            admin_token: None,
            site: SiteProfile::default(),
            timeouts: Timeouts::default(),
            pool: PoolConfig::default(),
            jobs: JobsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            artifacts: ArtifactsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Carrega a configuração de `path`, ou de `carrier-lookup.toml` no
    /// diretório atual. Um caminho explícito inexistente é erro; o arquivo
    /// padrão ausente resulta nos valores padrão.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };

        // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
        if let Ok(port) = std::env::var("PORT")
            && !port.is_empty()
        {
            config.port = port
                .parse()
                .with_context(|| format!("invalid PORT value: {port}"))?;
        }
        if let Ok(token) = std::env::var("CARRIER_LOOKUP_ADMIN_TOKEN")
            && !token.is_empty()
        {
            config.admin_token = Some(token);
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Rejeita combinações que travariam os jobs.
    pub fn validate(&self) -> Result<()> {
        if self.pool.size == 0 {
            bail!("pool.size must be at least 1");
        }
        if self.rate_limit.max_requests == 0 {
            bail!("rate_limit.max_requests must be at least 1");
        }
        if self.rate_limit.window_secs == 0 {
            bail!("rate_limit.window_secs must be at least 1");
        }
        if self.jobs.status_phrase.trim().is_empty() {
            bail!("jobs.status_phrase must not be empty");
        }
        if self.artifacts.sweep_interval_secs == 0 {
            bail!("artifacts.sweep_interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.jobs.pacing_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.artifacts.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.artifacts.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.pool.policy, PoolPolicy::Reuse);
        assert_eq!(config.jobs.status_phrase, "AUTHORIZED FOR");
        assert_eq!(config.artifacts.format, ArtifactFormat::Xlsx);
        assert_eq!(config.artifacts.dir, PathBuf::from("temp_results"));
        assert!(config.admin_token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            port = 8080

            [pool]
            size = 1
            policy = "per-call"

            [timeouts]
            not_found_probe_ms = 500

            [artifacts]
            format = "csv"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.pool.size, 1);
        assert_eq!(config.pool.policy, PoolPolicy::PerCall);
        assert_eq!(config.timeouts.not_found_probe_ms, 500);
        assert_eq!(config.timeouts.page_load_ms, 30_000);
        assert_eq!(config.artifacts.format, ArtifactFormat::Csv);
        assert_eq!(config.artifacts.retention_secs, 3600);
        assert_eq!(config.jobs.pacing_ms, 2000);
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let config: AppConfig = toml::from_str("[pool]\nsize = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn load_reads_explicit_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[jobs]\npacing_ms = 0\n").unwrap();
        let config = AppConfig::load(Some(tmp.path())).unwrap();
        assert_eq!(config.pacing(), Duration::ZERO);
    }
}
