//! Fixed-size pool of remote sessions.
//!
//! A counting semaphore bounds how many sessions can be checked out at once;
//! the idle stack is only touched while holding a permit. Sessions go back to
//! the pool when the [`PooledSession`] guard drops, so a checkout can never be
//! released twice or leaked on an early return.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::PoolError;
use crate::session::{RemoteSession, SessionFactory};

/// How sessions are recycled between retrievals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoolPolicy {
    /// Sessions are built once at startup and handed out repeatedly.
    Reuse,
    /// A fresh session is built on acquire and discarded on release.
    PerCall,
}

impl fmt::Display for PoolPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolPolicy::Reuse => write!(f, "reuse"),
            PoolPolicy::PerCall => write!(f, "per-call"),
        }
    }
}

impl FromStr for PoolPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reuse" => Ok(PoolPolicy::Reuse),
            "per-call" | "per_call" => Ok(PoolPolicy::PerCall),
            other => Err(format!("unknown pool policy: {other}")),
        }
    }
}

struct Shared {
    idle: Mutex<Vec<Box<dyn RemoteSession>>>,
    closed: AtomicBool,
    checked_out: AtomicUsize,
    peak: AtomicUsize,
}

impl Shared {
    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn RemoteSession>>> {
        // A panic while holding this lock cannot leave the Vec half-updated.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounded set of sessions shared by every running job.
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    policy: PoolPolicy,
    size: usize,
    acquire_timeout: Duration,
    permits: Arc<Semaphore>,
    shared: Arc<Shared>,
}

impl SessionPool {
    /// Builds the pool. With [`PoolPolicy::Reuse`] every session is opened
    /// up front; a failure here is a startup error.
    pub async fn start(
        factory: Arc<dyn SessionFactory>,
        size: usize,
        policy: PoolPolicy,
        acquire_timeout: Duration,
    ) -> Result<Self, PoolError> {
        let size = size.max(1);
        let mut idle = Vec::with_capacity(size);
        if policy == PoolPolicy::Reuse {
            for _ in 0..size {
                idle.push(factory.open().await?);
            }
        }
        tracing::info!(size, %policy, "session pool started");

        Ok(Self {
            factory,
            policy,
            size,
            acquire_timeout,
            permits: Arc::new(Semaphore::new(size)),
            shared: Arc::new(Shared {
                idle: Mutex::new(idle),
                closed: AtomicBool::new(false),
                checked_out: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of sessions currently checked out.
    pub fn in_use(&self) -> usize {
        self.shared.checked_out.load(Ordering::Acquire)
    }

    /// Highest number of sessions ever checked out at the same time.
    pub fn peak_in_use(&self) -> usize {
        self.shared.peak.load(Ordering::Acquire)
    }

    /// Waits up to the acquire timeout for a free session.
    pub async fn acquire(&self) -> Result<PooledSession, PoolError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::Exhausted {
            waited: self.acquire_timeout,
        })?
        .map_err(|_| PoolError::Closed)?;

        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let reused = match self.policy {
            PoolPolicy::Reuse => self.shared.idle().pop(),
            PoolPolicy::PerCall => None,
        };
        // Holding a permit while the idle stack is empty means every other
        // session is checked out, so opening one stays within the ceiling.
        let session = match reused {
            Some(session) => session,
            None => self.factory.open().await?,
        };

        let checked_out = self.shared.checked_out.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.peak.fetch_max(checked_out, Ordering::AcqRel);

        Ok(PooledSession {
            session: Some(session),
            policy: self.policy,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Refuses further checkouts and closes every idle session.
    pub async fn close_all(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.permits.close();
        let sessions: Vec<_> = self.shared.idle().drain(..).collect();
        let count = sessions.len();
        for session in sessions {
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "failed to close session");
            }
        }
        tracing::info!(closed = count, "session pool shut down");
    }
}

/// A checked-out session. Dropping it returns the session to the pool.
pub struct PooledSession {
    session: Option<Box<dyn RemoteSession>>,
    policy: PoolPolicy,
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledSession {
    type Target = dyn RemoteSession;

    fn deref(&self) -> &Self::Target {
        self.session
            .as_deref()
            .unwrap_or_else(|| unreachable!("session taken before drop"))
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("session taken before drop"))
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.shared.checked_out.fetch_sub(1, Ordering::AcqRel);
        let keep = self.policy == PoolPolicy::Reuse && !self.shared.closed.load(Ordering::Acquire);
        if keep {
            // Pushed before the permit is released, so the next acquirer sees it.
            self.shared.idle().push(session);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        tracing::warn!(error = %e, "failed to close session");
                    }
                });
            }
            Err(_) => drop(session),
        }
    }
}
