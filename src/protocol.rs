use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::StepError;
use crate::session::{RemoteSession, SessionError, SiteProfile};
use crate::state_machine::{
    CarrierRecord, LookupKey, NOT_FOUND, ProtocolStep, RetrievalResult, StatusPredicate,
    Transition,
};

/// Per-step time limits, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Navigation and form submission.
    pub page_load_ms: u64,
    /// Locating a control or a field.
    pub element_wait_ms: u64,
    /// The "not found" probe; kept short so absent records exit fast.
    pub not_found_probe_ms: u64,
    /// Waiting for a free session.
    pub pool_acquire_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            page_load_ms: 30_000,
            element_wait_ms: 10_000,
            not_found_probe_ms: 2_000,
            pool_acquire_ms: 60_000,
        }
    }
}

impl Timeouts {
    pub fn page_load(&self) -> Duration {
        Duration::from_millis(self.page_load_ms)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_millis(self.element_wait_ms)
    }

    pub fn not_found_probe(&self) -> Duration {
        Duration::from_millis(self.not_found_probe_ms)
    }

    pub fn pool_acquire(&self) -> Duration {
        Duration::from_millis(self.pool_acquire_ms)
    }
}

/// Drives one session through the search for one key.
pub struct RetrievalProtocol {
    profile: Arc<SiteProfile>,
    timeouts: Timeouts,
    predicate: StatusPredicate,
}

impl RetrievalProtocol {
    pub fn new(profile: Arc<SiteProfile>, timeouts: Timeouts, predicate: StatusPredicate) -> Self {
        Self {
            profile,
            timeouts,
            predicate,
        }
    }

    /// Runs every step for `key`. Always yields exactly one result; step
    /// failures become [`RetrievalResult::TransientFailure`].
    pub async fn run(&self, session: &mut dyn RemoteSession, key: &LookupKey) -> RetrievalResult {
        let mut step = ProtocolStep::NavigateHome;
        let mut status = String::new();

        loop {
            let transition = match self.advance(session, key, step, &mut status).await {
                Ok(transition) => transition,
                Err(cause) => {
                    tracing::warn!(key = %key, %step, cause = %cause, "retrieval failed");
                    Transition::Finish(RetrievalResult::TransientFailure(cause))
                }
            };
            match transition {
                Transition::Next(next) => {
                    tracing::trace!(key = %key, from = %step, to = %next, "step complete");
                    step = next;
                }
                Transition::Finish(result) => {
                    tracing::debug!(key = %key, %step, result = result.label(), "retrieval finished");
                    return result;
                }
            }
        }
    }

    async fn advance(
        &self,
        session: &mut dyn RemoteSession,
        key: &LookupKey,
        step: ProtocolStep,
        status: &mut String,
    ) -> Result<Transition, StepError> {
        let profile = &self.profile;
        match step {
            ProtocolStep::NavigateHome => {
                self.page_load(step, session.navigate_home()).await?;
            }
            ProtocolStep::SelectSearchMode => {
                self.element(step, &profile.search_mode_field, session.select_search_mode())
                    .await?;
            }
            ProtocolStep::EnterKey => {
                self.element(step, &profile.query_field, session.enter_key(key.as_str()))
                    .await?;
            }
            ProtocolStep::Submit => {
                self.page_load(step, session.submit()).await?;
            }
            ProtocolStep::ShortCircuitCheck => {
                let probe =
                    tokio::time::timeout(self.timeouts.not_found_probe(), session.not_found_indicator())
                        .await;
                match probe {
                    Ok(Ok(true)) => return Ok(Transition::Finish(RetrievalResult::NotFound)),
                    Ok(Ok(false)) | Err(_) => {}
                    Ok(Err(source)) => return Err(StepError::Session { step, source }),
                }
            }
            ProtocolStep::VerifyStatus => {
                let label = &profile.labels.status;
                // Unlike the record fields, a page without a status is not a result.
                let Some(value) = self.element(step, label, session.read_field(label)).await? else {
                    return Err(StepError::ElementTimeout {
                        step,
                        element: label.clone(),
                        after: self.timeouts.element_wait(),
                    });
                };
                *status = value;
                if !self.predicate.matches(status) {
                    return Ok(Transition::Finish(RetrievalResult::NoMatch {
                        status: std::mem::take(status),
                    }));
                }
            }
            ProtocolStep::ExtractRecord => {
                let labels = &profile.labels;
                let name = self.tolerant_field(session, key, &labels.name).await;
                let phone = self.tolerant_field(session, key, &labels.phone).await;
                let address = self.tolerant_field(session, key, &labels.address).await;
                return Ok(Transition::Finish(RetrievalResult::Match(CarrierRecord {
                    identifier: key.to_string(),
                    name,
                    phone,
                    address,
                    status: std::mem::take(status),
                })));
            }
        }

        let Some(next) = step.next() else {
            unreachable!("{step} always finishes the retrieval");
        };
        Ok(Transition::Next(next))
    }

    async fn page_load<T>(
        &self,
        step: ProtocolStep,
        fut: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, StepError> {
        let after = self.timeouts.page_load();
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result.map_err(|source| StepError::Session { step, source }),
            Err(_) => Err(StepError::NavigationTimeout { step, after }),
        }
    }

    async fn element<T>(
        &self,
        step: ProtocolStep,
        element: &str,
        fut: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, StepError> {
        let after = self.timeouts.element_wait();
        let timed_out = || StepError::ElementTimeout {
            step,
            element: element.to_string(),
            after,
        };
        match tokio::time::timeout(after, fut).await {
            Ok(Err(SessionError::ElementMissing(_))) | Err(_) => Err(timed_out()),
            Ok(result) => result.map_err(|source| StepError::Session { step, source }),
        }
    }

    /// Field read that never fails the record: anything short of a value
    /// becomes the sentinel.
    async fn tolerant_field(
        &self,
        session: &mut dyn RemoteSession,
        key: &LookupKey,
        label: &str,
    ) -> String {
        let read = self
            .element(ProtocolStep::ExtractRecord, label, session.read_field(label))
            .await;
        match read {
            Ok(Some(value)) => value,
            Ok(None) => NOT_FOUND.to_string(),
            Err(e) => {
                tracing::debug!(key = %key, label, error = %e, "field unavailable");
                NOT_FOUND.to_string()
            }
        }
    }
}
