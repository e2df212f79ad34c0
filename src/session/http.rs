use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};

use super::error::SessionError;
use super::profile::SiteProfile;
use super::{RemoteSession, SessionFactory};

const USER_AGENT: &str = concat!("carrier-lookup/", env!("CARGO_PKG_VERSION"));

/// Opens [`HttpFormSession`]s, each with its own cookie jar.
pub struct HttpSessionFactory {
    profile: Arc<SiteProfile>,
    request_timeout: Duration,
}

impl HttpSessionFactory {
    pub fn new(profile: Arc<SiteProfile>, request_timeout: Duration) -> Self {
        Self {
            profile,
            request_timeout,
        }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self) -> Result<Box<dyn RemoteSession>, SessionError> {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(self.request_timeout)
            .build()?;
        Ok(Box::new(HttpFormSession::new(client, Arc::clone(&self.profile))))
    }
}

/// Drives the search form with plain HTTP requests.
///
/// The entry page's hidden inputs (view state and friends) are captured on
/// navigation and posted back together with the search mode and key, the
/// same way a browser submits the form.
pub struct HttpFormSession {
    client: Client,
    profile: Arc<SiteProfile>,
    page: Option<String>,
    hidden: Vec<(String, String)>,
    mode_selected: bool,
    query: Option<String>,
}

impl HttpFormSession {
    pub fn new(client: Client, profile: Arc<SiteProfile>) -> Self {
        Self {
            client,
            profile,
            page: None,
            hidden: Vec::new(),
            mode_selected: false,
            query: None,
        }
    }

    fn page(&self) -> Result<&str, SessionError> {
        self.page.as_deref().ok_or(SessionError::NoPage)
    }

    async fn load(&mut self, response: reqwest::Response) -> Result<(), SessionError> {
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        self.page = Some(response.text().await?);
        Ok(())
    }

    fn form_pairs(&self) -> Vec<(String, String)> {
        let profile = &self.profile;
        let mut pairs = self.hidden.clone();
        if self.mode_selected {
            pairs.push((
                profile.search_mode_field.clone(),
                profile.search_mode_value.clone(),
            ));
        }
        if let Some(query) = &self.query {
            pairs.push((profile.query_field.clone(), query.clone()));
        }
        pairs.push((profile.submit_field.clone(), profile.submit_value.clone()));
        pairs
    }
}

#[async_trait]
impl RemoteSession for HttpFormSession {
    async fn navigate_home(&mut self) -> Result<(), SessionError> {
        self.page = None;
        self.hidden.clear();
        self.mode_selected = false;
        self.query = None;

        let response = self.client.get(&self.profile.url).send().await?;
        self.load(response).await?;
        self.hidden = hidden_inputs(self.page()?);
        Ok(())
    }

    async fn select_search_mode(&mut self) -> Result<(), SessionError> {
        let field = &self.profile.search_mode_field;
        if !has_input(self.page()?, field) {
            return Err(SessionError::ElementMissing(field.clone()));
        }
        self.mode_selected = true;
        Ok(())
    }

    async fn enter_key(&mut self, key: &str) -> Result<(), SessionError> {
        let field = &self.profile.query_field;
        if !has_input(self.page()?, field) {
            return Err(SessionError::ElementMissing(field.clone()));
        }
        self.query = Some(key.to_string());
        Ok(())
    }

    async fn submit(&mut self) -> Result<(), SessionError> {
        self.page()?;
        let pairs = self.form_pairs();
        let response = self
            .client
            .post(&self.profile.url)
            .form(&pairs)
            .send()
            .await?;
        self.load(response).await
    }

    async fn not_found_indicator(&mut self) -> Result<bool, SessionError> {
        let marker = self.profile.not_found_marker.to_lowercase();
        Ok(self.page()?.to_lowercase().contains(&marker))
    }

    async fn read_field(&mut self, label: &str) -> Result<Option<String>, SessionError> {
        Ok(field_value(self.page()?, label))
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        Ok(())
    }
}

fn hidden_inputs(html: &str) -> Vec<(String, String)> {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse(r#"input[type="hidden"]"#) else {
        return Vec::new();
    };
    doc.select(&sel)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

fn has_input(html: &str, name: &str) -> bool {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse("input, select") else {
        return false;
    };
    doc.select(&sel)
        .any(|el| el.value().attr("name") == Some(name))
}

/// Value cell following the first label cell containing `label`.
///
/// Cells wrapping a nested table are layout containers and are skipped so
/// the outer table never shadows the row that actually carries the label.
fn field_value(html: &str, label: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let cells = Selector::parse("th, td").ok()?;
    let nested = Selector::parse("table").ok()?;

    for cell in doc.select(&cells) {
        if cell.select(&nested).next().is_some() {
            continue;
        }
        if !collapse(cell).contains(label) {
            continue;
        }
        let value = cell
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|sibling| sibling.value().name() == "td")
            .map(collapse);
        return value.filter(|v| !v.is_empty());
    }
    None
}

fn collapse(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
