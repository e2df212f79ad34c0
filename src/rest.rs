//! HTTP front end.
//!
//! Batches are uploaded as a CSV file, processed in the background and
//! downloaded once their job reaches a terminal status. Every error is
//! returned as `{"success": false, "error": "..."}`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};

use crate::error::LookupError;
use crate::intake;
use crate::orchestrator::JobOrchestrator;
use crate::state_machine::JobSnapshot;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Shared by every handler.
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
    /// Bearer token for `/admin/sweep`; the route answers 404 while unset.
    pub admin_token: Option<String>,
    pub retention: Duration,
}

/// Build the axum Router with all endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/scrape", post(handle_scrape))
        .route("/jobs/:job_id", get(handle_job_status))
        .route("/download/:file", get(handle_download))
        .route("/admin/sweep", post(handle_admin_sweep))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves. Peer addresses feed the rate limiter.
pub async fn start(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP API listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

// ── Errors ──────────────────────────────────────────────────────

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        let status = match &err {
            LookupError::EmptyBatch | LookupError::Validation(_) | LookupError::Csv(_) => {
                StatusCode::BAD_REQUEST
            }
            LookupError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            LookupError::JobNotFound(_) | LookupError::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {err}");
        }
        let retry_after_secs = match err {
            LookupError::RateLimitExceeded { retry_after_secs } => Some(retry_after_secs),
            _ => None,
        };
        Self {
            status,
            message: err.to_string(),
            retry_after_secs,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "error": self.message }));
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

// ── Handlers ────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.orchestrator.sessions(),
        "jobs": state.orchestrator.tracked_jobs(),
    }))
}

async fn handle_scrape(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        upload = Some((file_name, bytes));
        break;
    }

    let Some((file_name, bytes)) = upload else {
        return Err(ApiError::bad_request("No file uploaded"));
    };
    if file_name.is_empty() {
        return Err(ApiError::bad_request("No file uploaded"));
    }
    if !file_name.to_ascii_lowercase().ends_with(".csv") {
        return Err(ApiError::bad_request("Only CSV files supported"));
    }

    let keys = intake::keys_from_csv(&bytes)?;
    let identity = peer
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let ticket = state.orchestrator.submit(&identity, &keys)?;

    let artifact = state.orchestrator.artifacts().file_name(&ticket.job_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "job_id": ticket.job_id,
            "total": ticket.total,
            "message": format!("Processing {} MC numbers", ticket.total),
            "status_url": format!("/jobs/{}", ticket.job_id),
            "download_url": format!("/download/{artifact}"),
        })),
    ))
}

#[derive(Serialize)]
struct JobStatusBody {
    success: bool,
    #[serde(flatten)]
    job: JobSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_url: Option<String>,
}

async fn handle_job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusBody>, ApiError> {
    let job = state.orchestrator.status(&job_id)?;
    let download_url = job
        .artifact
        .as_ref()
        .map(|file| format!("/download/{file}"));
    Ok(Json(JobStatusBody {
        success: true,
        job,
        download_url,
    }))
}

async fn handle_download(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.orchestrator.fetch(&file).await?;

    let store = state.orchestrator.artifacts();
    let extension = format!(".{}", store.format().extension());
    let file_name = if file.ends_with(&extension) {
        file
    } else {
        store.file_name(&file)
    };
    let headers = [
        (header::CONTENT_TYPE, store.format().content_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        ),
    ];
    Ok((headers, bytes))
}

#[derive(Debug, Deserialize)]
struct SweepParams {
    max_age_secs: Option<u64>,
}

async fn handle_admin_sweep(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SweepParams>,
) -> Result<Json<Value>, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Not found"));
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if presented != Some(expected) {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    let max_age = params
        .max_age_secs
        .map(Duration::from_secs)
        .unwrap_or(state.retention);
    let report = state.orchestrator.sweep(max_age).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimiter;
    use crate::testing::{self, Outcome, Script};
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "carrier-lookup-test-boundary";

    async fn build(script: Script, limiter: RateLimiter, token: Option<&str>) -> (Router, TempDir) {
        let tmp = TempDir::new().unwrap();
        let orchestrator = testing::orchestrator(script, tmp.path(), limiter).await;
        let state = Arc::new(AppState {
            orchestrator: Arc::new(orchestrator),
            admin_token: token.map(str::to_string),
            retention: Duration::from_secs(3600),
        });
        (router(state), tmp)
    }

    fn roomy() -> RateLimiter {
        RateLimiter::new(100, Duration::from_secs(60))
    }

    fn upload(file_name: &str, contents: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: text/csv\r\n\r\n\
             {contents}\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/scrape")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, _, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _tmp) = build(Script::default(), roomy(), None).await;
        let (status, body) = send_json(&app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"]["size"], 1);
        assert_eq!(body["sessions"]["peak"], 0);
        assert_eq!(body["jobs"], 0);
    }

    #[tokio::test]
    async fn upload_runs_job_to_a_downloadable_artifact() {
        let script = Script::default().with("MC100", Outcome::carrier("AUTHORIZED FOR Property"));
        let (app, _tmp) = build(script, roomy(), None).await;

        let (status, body) = send_json(&app, upload("carriers.csv", "MC_NUMBER\nMC100\nMC200\n")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Processing 2 MC numbers");
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let snapshot = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let (status, body) = send_json(&app, get_request(&format!("/jobs/{job_id}"))).await;
                assert_eq!(status, StatusCode::OK);
                if body["status"] != "processing" {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(snapshot["status"], "completed");
        assert_eq!(snapshot["processed"], 2);
        assert_eq!(snapshot["matched"], 1);

        let download_url = snapshot["download_url"].as_str().unwrap();
        assert_eq!(download_url, format!("/download/{job_id}.csv"));
        let (status, headers, bytes) = send(&app, get_request(download_url)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
        assert!(
            headers[header::CONTENT_DISPOSITION]
                .to_str()
                .unwrap()
                .contains(&format!("{job_id}.csv"))
        );
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("MC Number,Company Name,Phone,Address,Status"));
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_bad_request() {
        let (app, _tmp) = build(Script::default(), roomy(), None).await;
        let request = Request::builder()
            .method("POST")
            .uri("/scrape")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"note\"\r\n\r\n\
                 hello\r\n\
                 --{BOUNDARY}--\r\n"
            )))
            .unwrap();
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn non_csv_upload_is_rejected() {
        let (app, _tmp) = build(Script::default(), roomy(), None).await;
        let (status, body) = send_json(&app, upload("carriers.txt", "MC_NUMBER\nMC1\n")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Only CSV files supported");
    }

    #[tokio::test]
    async fn csv_without_keys_is_rejected() {
        let (app, _tmp) = build(Script::default(), roomy(), None).await;

        let (status, body) = send_json(&app, upload("c.csv", "MC_NUMBER\n  \n")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No valid MC numbers found");

        let (status, _) = send_json(&app, upload("c.csv", "DOT\n123\n")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rate_limited_upload_is_429() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let (app, _tmp) = build(Script::default(), limiter, None).await;

        let (status, _) = send_json(&app, upload("c.csv", "MC_NUMBER\nMC1\n")).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, headers, body) = send(&app, upload("c.csv", "MC_NUMBER\nMC1\n")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers[header::RETRY_AFTER], "60");
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn unknown_job_and_file_are_404() {
        let (app, _tmp) = build(Script::default(), roomy(), None).await;
        let (status, body) = send_json(&app, get_request("/jobs/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = send_json(&app, get_request("/download/nope.csv")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(&app, get_request("/download/..%2Fsecret.csv")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_sweep_requires_token() {
        let sweep = |token: Option<&str>| {
            let mut builder = Request::builder()
                .method("POST")
                .uri("/admin/sweep?max_age_secs=0");
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            builder.body(Body::empty()).unwrap()
        };

        let (disabled, _tmp) = build(Script::default(), roomy(), None).await;
        let (status, _) = send_json(&disabled, sweep(Some("anything"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (app, tmp) = build(Script::default(), roomy(), Some("s3cret")).await;
        std::fs::write(tmp.path().join("old.xlsx"), b"x").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (status, _) = send_json(&app, sweep(None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send_json(&app, sweep(Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send_json(&app, sweep(Some("s3cret"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["removed"], 1);
        assert!(!tmp.path().join("old.xlsx").exists());
    }
}
