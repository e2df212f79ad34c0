//! Tipos de erro da sessão remota.
//!
//! [`SessionError`] cobre as falhas de uma sessão de formulário: rede,
//! status HTTP inesperado e elementos ausentes na página.

use thiserror::Error;

/// Erros que podem ocorrer ao conduzir uma sessão remota.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Falha de rede subjacente (DNS, conexão recusada, timeout do cliente).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A fonte respondeu com um status HTTP fora da faixa 2xx.
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// O controle esperado não existe na página carregada.
    #[error("element not found: {0}")]
    ElementMissing(String),

    /// Uma etapa exigiu uma página antes de qualquer navegação.
    #[error("no page loaded")]
    NoPage,
}
