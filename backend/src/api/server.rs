//! HTTP Server for the fieldmap API.
//!
//! # API Endpoints
//!
//! | Method | Path          | Description                                   |
//! |--------|---------------|-----------------------------------------------|
//! | GET    | `/health`     | Health check                                  |
//! | POST   | `/api/map`    | Upload CSV (+ rules or rulesId), get rows     |
//! | POST   | `/api/export` | Same inputs, get the mapped CSV as a download |
//! | GET    | `/api/rules`  | List stored rule sets                         |
//! | GET    | `/api/logs`   | SSE stream for real-time logs                 |
//!
//! Multipart fields: `file` (required), `rules` (rules document JSON) or
//! `rulesId` (stored rule set). Without either, the registry is searched
//! for a compatible rule set.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::{log_info, LOG_BROADCASTER};
use super::types::{error_response, MapResponse, RulesSummary};
use crate::config::{Config, MAX_UPLOAD_BYTES};
use crate::error::{PipelineError, RegistryError, ServerError, ServerResult};
use crate::parser::parse_bytes_auto;
use crate::registry::RulesRegistry;
use crate::rules::MappingRules;
use crate::transform::pipeline::{enrich_bytes, enrich_with_rules, EnrichOptions, EnrichResult};

/// Shared, read-only server state
#[derive(Debug, Clone)]
pub struct AppState {
    pub rules_dir: PathBuf,
}

/// Build the router (also used by tests).
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/map", post(map_upload))
        .route("/api/export", post(export_upload))
        .route("/api/rules", get(list_rules))
        .route("/api/logs", get(sse_logs))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(Arc::new(state))
}

/// Start the HTTP server
pub async fn start_server(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(AppState {
        rules_dir: config.rules_dir.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, rules_dir = %config.rules_dir.display(), "fieldmap server listening");
    eprintln!("🚀 fieldmap server running on http://localhost:{}", config.port);
    eprintln!("   POST /api/map     - Map a CSV upload");
    eprintln!("   POST /api/export  - Map and download CSV");
    eprintln!("   GET  /api/rules   - Stored rule sets");
    eprintln!("   GET  /api/logs    - SSE log stream");
    eprintln!("   GET  /health      - Health check");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "fieldmap",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "map": "POST /api/map",
            "export": "POST /api/export",
            "rules": "GET /api/rules",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    // lagged receivers drop entries rather than the connection
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let entry = result.ok()?;
        let json = serde_json::to_string(&entry).ok()?;
        Some(Ok(Event::default().data(json)))
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn list_rules(State(state): State<Arc<AppState>>) -> Json<Vec<RulesSummary>> {
    let registry = RulesRegistry::with_dir(&state.rules_dir);
    Json(registry.list().into_iter().map(RulesSummary::from).collect())
}

/// Map CSV endpoint
async fn map_upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ServerResult<Json<MapResponse>> {
    let upload = Upload::read(multipart).await?;
    let result = run_blocking(move || upload.enrich(&state)).await?;
    Ok(Json(MapResponse::from(result)))
}

/// Export CSV endpoint
async fn export_upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ServerResult<Response> {
    let upload = Upload::read(multipart).await?;
    let filename = upload.export_name();
    let result = run_blocking(move || upload.enrich(&state)).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        result.csv,
    )
        .into_response())
}

/// Run CPU-bound mapping on the blocking pool.
async fn run_blocking<T, F>(job: F) -> ServerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ServerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| ServerError::Internal(format!("mapping task failed: {}", e)))?
}

/// Multipart fields of a map/export request
#[derive(Debug, Default)]
struct Upload {
    file: Option<Vec<u8>>,
    file_name: Option<String>,
    rules: Option<String>,
    rules_id: Option<String>,
}

impl Upload {
    async fn read(mut multipart: Multipart) -> ServerResult<Self> {
        let mut upload = Upload::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "file" => {
                    upload.file_name = field.file_name().map(str::to_string);
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
                    upload.file = Some(bytes.to_vec());
                }
                "rules" | "rulesId" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
                    if name == "rules" {
                        upload.rules = Some(text);
                    } else {
                        upload.rules_id = Some(text.trim().to_string()).filter(|s| !s.is_empty());
                    }
                }
                _ => {}
            }
        }

        Ok(upload)
    }

    fn enrich(self, state: &AppState) -> ServerResult<EnrichResult> {
        let bytes = self
            .file
            .ok_or_else(|| ServerError::BadRequest("No file provided".to_string()))?;

        log_info(format!(
            "📄 New upload: {} ({} bytes)",
            self.file_name.as_deref().unwrap_or("unknown"),
            bytes.len()
        ));

        if let Some(text) = self.rules {
            let rules = MappingRules::load(&text).map_err(PipelineError::from)?;
            let parsed = parse_bytes_auto(&bytes).map_err(PipelineError::from)?;
            if parsed.records.is_empty() {
                return Err(PipelineError::EmptyInput.into());
            }
            return Ok(enrich_with_rules(&parsed, &rules));
        }

        let options = EnrichOptions {
            rules_id: self.rules_id,
            registry_dir: Some(state.rules_dir.clone()),
            ..Default::default()
        };
        Ok(enrich_bytes(&bytes, &options)?)
    }

    fn export_name(&self) -> String {
        let stem = self
            .file_name
            .as_deref()
            .and_then(|n| std::path::Path::new(n).file_stem())
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("export");
        let safe: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}-mapped.csv", safe)
    }
}

impl ServerError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Pipeline(e) => match e {
                PipelineError::Csv(_) | PipelineError::EmptyInput => StatusCode::BAD_REQUEST,
                PipelineError::Registry(RegistryError::NotFound(_)) => StatusCode::BAD_REQUEST,
                PipelineError::Registry(RegistryError::InvalidRules(_)) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                PipelineError::Rules(_) | PipelineError::NoRules(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                PipelineError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, %status, "request rejected");
        }
        (status, Json(error_response(&self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RulesParseError;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ServerError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::from(PipelineError::EmptyInput).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::from(PipelineError::Rules(RulesParseError::NotAnObject)).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServerError::from(PipelineError::NoRules(vec![])).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServerError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_blocking_job_result_is_returned() {
        let value = run_blocking(|| Ok(42)).await.unwrap();
        assert_eq!(value, 42);

        let err = run_blocking(|| -> ServerResult<()> { Err(PipelineError::EmptyInput.into()) })
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_panicking_job_is_internal_error() {
        let err = run_blocking(|| -> ServerResult<()> { panic!("mapping blew up") })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Internal(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_export_name() {
        let upload = Upload {
            file_name: Some("supplier feed.csv".into()),
            ..Default::default()
        };
        assert_eq!(upload.export_name(), "supplier_feed-mapped.csv");
        assert_eq!(Upload::default().export_name(), "export-mapped.csv");
    }

    #[test]
    fn test_inline_rules_upload() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState {
            rules_dir: dir.path().to_path_buf(),
        };
        let rules = MappingRules::new(&["title"])
            .with_mapping("p_name", &["title"])
            .require("title");
        let upload = Upload {
            file: Some(b"p_name,sku\nBattery AA,1\n,2\n".to_vec()),
            rules: Some(rules.to_json().unwrap()),
            ..Default::default()
        };

        let result = upload.enrich(&state).unwrap();
        assert_eq!(result.batch.stats.valid_rows, 1);
        assert_eq!(result.csv, "title\nBattery AA");
    }

    #[test]
    fn test_missing_file_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState {
            rules_dir: dir.path().to_path_buf(),
        };
        let err = Upload::default().enrich(&state).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_bad_inline_rules_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState {
            rules_dir: dir.path().to_path_buf(),
        };
        let upload = Upload {
            file: Some(b"a\n1\n".to_vec()),
            rules: Some("{ \"mapping\": {} }".into()),
            ..Default::default()
        };
        let err = upload.enrich(&state).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
