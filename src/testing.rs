//! Scripted in-memory sessions shared by the pool, protocol,
//! orchestrator and HTTP tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::artifact::{ArtifactFormat, ArtifactStore};
use crate::orchestrator::JobOrchestrator;
use crate::pool::{PoolPolicy, SessionPool};
use crate::protocol::{RetrievalProtocol, Timeouts};
use crate::rate_limit::RateLimiter;
use crate::session::profile::FieldLabels;
use crate::session::{RemoteSession, SessionError, SessionFactory, SiteProfile};
use crate::state_machine::{ProtocolStep, StatusPredicate};

const HANG: Duration = Duration::from_secs(60);

/// How the fake source answers a given key.
#[derive(Debug, Clone)]
pub enum Outcome {
    NotFound,
    Carrier {
        status: String,
        name: Option<String>,
        phone: Option<String>,
        address: Option<String>,
    },
    /// A result page with neither the not-found marker nor any labelled field.
    BlankPage,
    FailOn(ProtocolStep),
    HangOn(ProtocolStep),
}

impl Outcome {
    pub fn carrier(status: &str) -> Self {
        Outcome::Carrier {
            status: status.to_string(),
            name: Some(format!("{status} CARRIER")),
            phone: Some("(555) 010-0000".to_string()),
            address: Some("1 MAIN ST".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    outcomes: HashMap<String, Outcome>,
    step_delay: Duration,
    hang_navigation: bool,
    missing_search_mode: bool,
    slow_probe: bool,
    fail_extraction: bool,
}

impl Script {
    pub fn with(mut self, key: &str, outcome: Outcome) -> Self {
        self.outcomes.insert(key.to_string(), outcome);
        self
    }

    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn hang_navigation(mut self) -> Self {
        self.hang_navigation = true;
        self
    }

    pub fn missing_search_mode(mut self) -> Self {
        self.missing_search_mode = true;
        self
    }

    /// The "not found" probe never answers.
    pub fn slow_probe(mut self) -> Self {
        self.slow_probe = true;
        self
    }

    /// Every non-status field read errors.
    pub fn fail_extraction(mut self) -> Self {
        self.fail_extraction = true;
        self
    }
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

pub struct ScriptedFactory {
    script: Arc<Script>,
    counters: Arc<Counters>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            counters: Arc::default(),
        }
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Highest number of sessions ever observed working at the same time.
    pub fn peak_active(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self) -> Result<Box<dyn RemoteSession>, SessionError> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            script: Arc::clone(&self.script),
            counters: Arc::clone(&self.counters),
            labels: FieldLabels::default(),
            key: None,
        }))
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    counters: Arc<Counters>,
    labels: FieldLabels,
    key: Option<String>,
}

impl ScriptedSession {
    async fn work(&self) {
        let now = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.script.step_delay).await;
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn outcome(&self) -> Outcome {
        self.key
            .as_ref()
            .and_then(|k| self.script.outcomes.get(k).cloned())
            .unwrap_or(Outcome::NotFound)
    }

    async fn scripted(&self, step: ProtocolStep) -> Result<(), SessionError> {
        match self.outcome() {
            Outcome::FailOn(s) if s == step => Err(SessionError::Status {
                status: 500,
                url: format!("scripted://{step}"),
            }),
            Outcome::HangOn(s) if s == step => {
                tokio::time::sleep(HANG).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn navigate_home(&mut self) -> Result<(), SessionError> {
        self.key = None;
        self.work().await;
        if self.script.hang_navigation {
            tokio::time::sleep(HANG).await;
        }
        Ok(())
    }

    async fn select_search_mode(&mut self) -> Result<(), SessionError> {
        if self.script.missing_search_mode {
            return Err(SessionError::ElementMissing("searchType".into()));
        }
        Ok(())
    }

    async fn enter_key(&mut self, key: &str) -> Result<(), SessionError> {
        self.key = Some(key.to_string());
        Ok(())
    }

    async fn submit(&mut self) -> Result<(), SessionError> {
        self.work().await;
        self.scripted(ProtocolStep::Submit).await
    }

    async fn not_found_indicator(&mut self) -> Result<bool, SessionError> {
        if self.script.slow_probe {
            tokio::time::sleep(HANG).await;
        }
        self.scripted(ProtocolStep::ShortCircuitCheck).await?;
        Ok(matches!(self.outcome(), Outcome::NotFound))
    }

    async fn read_field(&mut self, label: &str) -> Result<Option<String>, SessionError> {
        let step = if label == self.labels.status {
            ProtocolStep::VerifyStatus
        } else {
            ProtocolStep::ExtractRecord
        };
        self.scripted(step).await?;
        if step == ProtocolStep::ExtractRecord && self.script.fail_extraction {
            return Err(SessionError::NoPage);
        }

        let Outcome::Carrier {
            status,
            name,
            phone,
            address,
        } = self.outcome()
        else {
            return Ok(None);
        };
        let value = if label == self.labels.status {
            Some(status)
        } else if label == self.labels.name {
            name
        } else if label == self.labels.phone {
            phone
        } else if label == self.labels.address {
            address
        } else {
            None
        };
        Ok(value)
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A single-session orchestrator with short timeouts and CSV artifacts in `dir`.
pub async fn orchestrator(script: Script, dir: &Path, limiter: RateLimiter) -> JobOrchestrator {
    let factory = Arc::new(ScriptedFactory::new(script));
    let pool = SessionPool::start(factory, 1, PoolPolicy::Reuse, Duration::from_millis(500))
        .await
        .unwrap();
    let protocol = RetrievalProtocol::new(
        Arc::new(SiteProfile::default()),
        Timeouts {
            page_load_ms: 1000,
            element_wait_ms: 200,
            not_found_probe_ms: 50,
            pool_acquire_ms: 500,
        },
        StatusPredicate::default(),
    );
    JobOrchestrator::new(
        Arc::new(pool),
        Arc::new(protocol),
        Arc::new(ArtifactStore::new(dir, ArtifactFormat::Csv)),
        Arc::new(limiter),
        Duration::ZERO,
    )
}
