//! HTTP surface for the dashboard.
//!
//! Every data endpoint reads the store or the archive directory on demand. Archiving failures
//! never show up here, readers get live data or the default reading.
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::archive::{ArchiverStatus, SharedStatus};
use crate::directory::ArchiveDirectory;
use crate::error::ArchiveError;
use crate::lifecycle::Lifecycle;
use crate::reading::Reading;
use crate::store::StateStore;

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters for the HTTP listener.
pub struct HttpParameters {
    /// The ip address the server should listen on.
    pub address: String,
    /// The port the server should listen on.
    pub port: u16,
    /// Directory holding the dashboard front end.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StateStore>,
    pub directory: Arc<ArchiveDirectory>,
    pub status: SharedStatus,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum HttpError {
    NotFound(String),
    Internal(String),
}

impl From<ArchiveError> for HttpError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::InvalidName(name) => {
                HttpError::NotFound(format!("No record named '{}'", name))
            }
            ArchiveError::Io { path, source } if source.kind() == ErrorKind::NotFound => {
                HttpError::NotFound(format!("No record at '{}'", path.display()))
            }
            other => HttpError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for HttpError {
    fn from(err: tokio::task::JoinError) -> Self {
        HttpError::Internal(err.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found"),
            HttpError::Internal(msg) => {
                log::error!(target: "irrigd::http", "Request failed: \'{}\'", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg, "internal_error")
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

async fn reading_handler(State(state): State<AppState>) -> Result<Json<Reading>, HttpError> {
    let store = Arc::clone(&state.store);
    let reading = tokio::task::spawn_blocking(move || store.load()).await?;
    Ok(Json(reading))
}

/// Lists the archived records. An unreadable archive directory lists as empty.
async fn records_handler(State(state): State<AppState>) -> Result<Json<Vec<String>>, HttpError> {
    let directory = Arc::clone(&state.directory);
    let records = match tokio::task::spawn_blocking(move || directory.list()).await? {
        Ok(records) => records,
        Err(err) => {
            log::warn!(target: "irrigd::http", "Listing no records: \'{}\'", err);
            Vec::new()
        }
    };
    Ok(Json(records))
}

async fn archiver_handler(State(state): State<AppState>) -> Json<ArchiverStatus> {
    Json(state.status.snapshot())
}

async fn record_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, HttpError> {
    let path = state.directory.resolve(&name)?;
    let content = tokio::fs::read(&path)
        .await
        .map_err(|source| ArchiveError::Io { path, source })?;

    let disposition = format!("attachment; filename=\"{}\"", name);
    Ok((
        [
            (header::CONTENT_TYPE, String::from("application/octet-stream")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response())
}

/// Builds the dashboard router.
pub fn router(state: AppState, static_dir: PathBuf) -> Router {
    Router::new()
        .route("/api/irrigation-data", get(reading_handler))
        .route("/api/records", get(records_handler))
        .route("/api/archiver", get(archiver_handler))
        .route("/records/:name", get(record_handler))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}

/// Serves `app` on `listener` until the lifecycle requests termination.
///
/// In-flight requests are completed before this returns.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    lifecycle: Lifecycle,
) -> std::io::Result<()> {
    if let Ok(address) = listener.local_addr() {
        log::info!(target: "irrigd::http", "Serving dashboard on \'{}\'", address);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(lifecycle.shutdown_signal())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{uptime_thread, TerminationPolicy, TerminationReason};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::fs;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        dir: TempDir,
        state: AppState,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let directory = Arc::new(ArchiveDirectory::new(dir.path().join("records"), "txt"));
        directory.ensure_exists().unwrap();
        fs::create_dir(dir.path().join("static")).unwrap();
        fs::write(dir.path().join("static").join("index.html"), "<h1>dashboard</h1>").unwrap();

        let state = AppState {
            store: Arc::new(StateStore::new(dir.path().join("irrigation_data.json"))),
            directory,
            status: SharedStatus::default(),
        };
        Fixture { dir, state }
    }

    fn app(fixture: &Fixture) -> Router {
        router(fixture.state.clone(), fixture.dir.path().join("static"))
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn irrigation_data_defaults_without_document() {
        let fixture = fixture();

        let (status, body) = get_body(app(&fixture), "/api/irrigation-data").await;

        assert_eq!(status, StatusCode::OK);
        let reading: Reading = serde_json::from_slice(&body).unwrap();
        assert_eq!(reading, Reading::default());
    }

    #[tokio::test]
    async fn irrigation_data_reflects_saved_reading() {
        let fixture = fixture();
        let reading = Reading {
            soil_moisture: 12.0,
            anomaly: true,
            ..Reading::default()
        };
        fixture.state.store.save(&reading).unwrap();

        let (status, body) = get_body(app(&fixture), "/api/irrigation-data").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["soilMoisture"], 12.0);
        assert_eq!(json["anomaly"], true);
    }

    #[tokio::test]
    async fn records_are_listed_and_downloadable() {
        let fixture = fixture();
        let records = fixture.state.directory.path();
        fs::write(records.join("record_2024_01_01_10_20_00.txt"), "second").unwrap();
        fs::write(records.join("record_2024_01_01_10_00_00.txt"), "first").unwrap();

        let (status, body) = get_body(app(&fixture), "/api/records").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(names, vec!["record_2024_01_01_10_00_00.txt", "record_2024_01_01_10_20_00.txt"]);

        let uri = "/records/record_2024_01_01_10_00_00.txt";
        let (status, body) = get_body(app(&fixture), uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"first".to_vec());
    }

    #[tokio::test]
    async fn unknown_or_foreign_record_is_not_found() {
        let fixture = fixture();
        fs::write(fixture.dir.path().join("irrigation_data.json"), "{}").unwrap();

        let (status, _) = get_body(app(&fixture), "/records/record_2030_01_01_00_00_00.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get_body(app(&fixture), "/records/irrigation_data.json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "not_found");
    }

    #[tokio::test]
    async fn missing_archive_directory_lists_no_records() {
        let fixture = fixture();
        fs::remove_dir(fixture.state.directory.path()).unwrap();

        let (status, body) = get_body(app(&fixture), "/api/records").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!([]));
    }

    #[tokio::test]
    async fn archiver_status_is_exposed() {
        let fixture = fixture();

        let (status, body) = get_body(app(&fixture), "/api/archiver").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["runs"], 0);
    }

    #[tokio::test]
    async fn front_end_is_served_from_static_dir() {
        let fixture = fixture();

        let (status, body) = get_body(app(&fixture), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<h1>dashboard</h1>".to_vec());

        let (status, _) = get_body(app(&fixture), "/missing.js").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    static BUDGET_EXIT: AtomicI32 = AtomicI32::new(-1);

    fn record_budget_exit(code: i32) {
        BUDGET_EXIT.store(code, Ordering::SeqCst);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_stops_answering_after_uptime_budget() {
        let fixture = fixture();
        let lifecycle = Lifecycle::new();
        let budget = Duration::from_millis(500);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, app(&fixture), lifecycle.clone()));

        let thread_lifecycle = lifecycle.clone();
        std::thread::spawn(move || {
            uptime_thread(
                budget,
                TerminationPolicy::Graceful,
                Duration::from_secs(30),
                thread_lifecycle,
                record_budget_exit,
            )
        });

        let url = format!("http://{}/api/irrigation-data", address);
        let status = reqwest::get(&url).await.unwrap().status();
        assert_eq!(status, reqwest::StatusCode::OK);

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let stopped_after = lifecycle.started().elapsed();

        assert!(stopped_after >= budget);
        assert!(stopped_after < budget + Duration::from_secs(2));
        assert_eq!(lifecycle.reason(), TerminationReason::UptimeBudget);
        assert!(reqwest::get(&url).await.is_err());
        assert_eq!(BUDGET_EXIT.load(Ordering::SeqCst), -1);
    }
}
