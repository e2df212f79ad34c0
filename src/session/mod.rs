//! Remote session abstraction.
//!
//! Defines the `RemoteSession` and `SessionFactory` traits the pool and the
//! retrieval protocol work against. The shipped implementation drives the
//! search form over plain HTTP; tests substitute scripted sessions.

pub mod error;
pub mod http;
pub mod profile;

use async_trait::async_trait;

pub use error::SessionError;
pub use http::HttpSessionFactory;
pub use profile::SiteProfile;

/// A stateful handle to the external search form. Used by one retrieval at
/// a time; the page state carries over between calls.
#[async_trait]
pub trait RemoteSession: Send {
    /// Load the search entry page.
    async fn navigate_home(&mut self) -> Result<(), SessionError>;
    /// Activate the "search by MC number" control.
    async fn select_search_mode(&mut self) -> Result<(), SessionError>;
    /// Clear the search input and type `key`.
    async fn enter_key(&mut self, key: &str) -> Result<(), SessionError>;
    /// Activate the search button and wait for the result page.
    async fn submit(&mut self) -> Result<(), SessionError>;
    /// Whether the current page shows the "no record" indicator.
    async fn not_found_indicator(&mut self) -> Result<bool, SessionError>;
    /// Text of the field labelled `label`, or `None` when it is absent.
    async fn read_field(&mut self, label: &str) -> Result<Option<String>, SessionError>;
    /// Release any external resources held by the session.
    async fn close(self: Box<Self>) -> Result<(), SessionError>;
}

/// Builds sessions bound to one site.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RemoteSession>, SessionError>;
}
