//! HTTP server for the ledgermerge API.
//!
//! # API Endpoints
//!
//! | Method | Path                 | Description                          |
//! |--------|----------------------|--------------------------------------|
//! | GET    | `/health`            | Health check                         |
//! | GET    | `/api/fields`        | Standard fields in output order      |
//! | GET    | `/api/files`         | Imported-files registry              |
//! | POST   | `/api/rules/parse`   | Parse a natural-language rule        |
//! | GET    | `/api/rules/{scope}` | Rules of one bank scope              |
//! | POST   | `/api/merge`         | Merge files and write the output     |
//! | GET    | `/api/logs`          | SSE stream for real-time logs        |

use axum::{
    extract::{Path, State},
    http::{header, Method},
    response::{sse::Event, Json, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::{log_info, LOG_BROADCASTER};
use super::types::{
    FieldsResponse, FilesResponse, MergeRequest, ParseRuleRequest, ParseRuleResponse, RuleListResponse,
};
use crate::config::AppConfig;
use crate::error::{ServerError, ServerResult};
use crate::rules::{RuleParser, RuleStore};
use crate::schema::SchemaRegistry;
use crate::store::FileRegistry;
use crate::transform::pipeline::{merge_files, MergeOptions, MergeOutcome};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub schema: Arc<SchemaRegistry>,
    pub parser: Arc<RuleParser>,
    /// Serializes store mutation and merges.
    store_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: AppConfig, schema: Arc<SchemaRegistry>) -> Self {
        let parser = RuleParser::from_config(schema.clone(), &config.ai);
        Self::with_parser(config, schema, parser)
    }

    pub fn with_parser(config: AppConfig, schema: Arc<SchemaRegistry>, parser: RuleParser) -> Self {
        Self {
            config: Arc::new(config),
            schema,
            parser: Arc::new(parser),
            store_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Build the router with all endpoints.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/fields", get(list_fields))
        .route("/api/files", get(list_files))
        .route("/api/rules/parse", post(parse_rule))
        .route("/api/rules/{scope}", get(list_rules))
        .route("/api/merge", post(merge))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: AppConfig, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let schema = Arc::new(config.load_schema()?);
    let state = AppState::new(config, schema);
    let delegated = state.parser.has_delegate();
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 Ledgermerge server running on http://localhost:{}", port);
    println!("   GET  /api/fields        - Standard fields");
    println!("   GET  /api/files         - Imported files");
    println!("   POST /api/rules/parse   - Parse a rule");
    println!("   GET  /api/rules/{{scope}} - Rules of a bank");
    println!("   POST /api/merge         - Merge files");
    println!("   GET  /api/logs          - SSE log stream");
    println!("   GET  /health            - Health check");
    println!();
    println!(
        "🤖 Rule parsing: {}",
        if delegated { "model with heuristic fallback" } else { "heuristic only" }
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "ledgermerge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_fields(State(state): State<AppState>) -> Json<FieldsResponse> {
    Json(FieldsResponse {
        fields: state.schema.fields().to_vec(),
    })
}

async fn list_files(State(state): State<AppState>) -> ServerResult<Json<FilesResponse>> {
    let registry = FileRegistry::open(state.config.files_path()).map_err(internal)?;
    Ok(Json(FilesResponse {
        files: registry.list().to_vec(),
    }))
}

async fn parse_rule(
    State(state): State<AppState>,
    Json(request): Json<ParseRuleRequest>,
) -> ServerResult<Json<ParseRuleResponse>> {
    let text = request.text.trim();
    let scope = request.bank_scope.trim();
    if text.is_empty() || scope.is_empty() {
        return Err(ServerError::BadRequest("text and bankScope are required".into()));
    }

    let rule = state.parser.parse(text, scope).await;
    if request.save {
        let _guard = state.store_lock.lock().await;
        let mut store = RuleStore::open(state.config.rules_path()).map_err(internal)?;
        store.upsert(rule.clone()).map_err(internal)?;
        log_info(format!("Saved rule {} for {}", rule.id, scope));
    }

    Ok(Json(ParseRuleResponse {
        description: rule.describe(),
        rule,
        saved: request.save,
    }))
}

async fn list_rules(
    State(state): State<AppState>,
    Path(scope): Path<String>,
) -> ServerResult<Json<RuleListResponse>> {
    let store = RuleStore::open(state.config.rules_path()).map_err(internal)?;
    Ok(Json(RuleListResponse {
        rules: store.rules_for(&scope).to_vec(),
        bank_scope: scope,
    }))
}

/// Runs the merge on the blocking pool; files are still processed one by one.
async fn merge(State(state): State<AppState>, Json(request): Json<MergeRequest>) -> ServerResult<Json<MergeOutcome>> {
    let _guard = state.store_lock.lock().await;
    let options = MergeOptions {
        strict: request.strict.unwrap_or(state.config.strict),
    };
    let config = state.config.clone();
    let schema = state.schema.clone();

    let outcome = tokio::task::spawn_blocking(move || merge_files(&config, schema, &request.paths, options))
        .await
        .map_err(internal)??;
    Ok(Json(outcome))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn internal(e: impl std::fmt::Display) -> ServerError {
    ServerError::Internal(e.to_string())
}
