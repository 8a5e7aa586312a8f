//! REST API server.
//!
//! Exposes the catalogue over a JSON HTTP API: browsing and data entry for
//! sources, books, chapters, hadiths and narrators, musnad views and export,
//! and isnad analysis.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/stats` | Catalogue counts |
//! | `GET` `POST` | `/api/sources` | List / create sources |
//! | `GET`  | `/api/sources/{id}/books` | Books of a source |
//! | `POST` | `/api/books` | Create a book |
//! | `GET`  | `/api/books/{id}/chapters` | Chapters of a book |
//! | `POST` | `/api/chapters` | Create a chapter |
//! | `GET` `POST` | `/api/hadiths` | List (filtered, paginated) / create |
//! | `POST` | `/api/hadiths/batch` | Create many hadiths in one transaction |
//! | `GET` `DELETE` | `/api/hadiths/{id}` | Hadith with chain / delete |
//! | `GET` `POST` | `/api/narrators` | List / create narrators |
//! | `GET`  | `/api/narrators/search` | Fuzzy name search |
//! | `GET` `DELETE` | `/api/narrators/{id}` | Narrator detail / delete |
//! | `GET`  | `/api/narrators/{id}/musnad` | Hadiths the narrator heads |
//! | `GET`  | `/api/narrators/{id}/hadiths` | Hadiths the narrator appears in |
//! | `GET`  | `/api/narrators/{id}/export` | Musnad download |
//! | `POST` | `/api/isnad/analyze` | Extract and match an isnad |
//! | `POST` | `/api/relations/rebuild` | Recompute teacher/student counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "narrator 7 not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `conflict` (409), `upstream` (502), `internal` (500).
//!
//! # Authentication
//!
//! When `[server].admin_token` is set, mutating routes and isnad analysis
//! require `Authorization: Bearer <token>`. Read routes stay open.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db;
use crate::error::CatalogError;
use crate::export::{self, ExportFormat};
use crate::hadiths::{self, HadithFilter};
use crate::llm::{create_extractor, IsnadExtractor};
use crate::matching;
use crate::migrate;
use crate::models::{
    BatchHadiths, BatchResult, Book, Chapter, HadithDetail, HadithSummary, HadithType,
    NarratorDetail, NarratorMatch, NarratorSummary, NewBook, NewChapter, NewHadith,
    NewNarrator, NewSource, Source,
};
use crate::narrators;
use crate::pagination::{Page, PageRequest};
use crate::relations;
use crate::sources;
use crate::stats::{self, CatalogStats};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub extractor: Arc<dyn IsnadExtractor>,
}

/// Starts the API server on `[server].bind`.
///
/// Opens the database, applies the schema, and selects the isnad extractor
/// from `[llm]`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let extractor: Arc<dyn IsnadExtractor> = Arc::from(create_extractor(&config.llm)?);
    run_server_with_extractor(config, extractor).await
}

/// Like [`run_server`], but with a caller-supplied isnad extractor.
pub async fn run_server_with_extractor(
    config: &Config,
    extractor: Arc<dyn IsnadExtractor>,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let bind_addr = config.server.bind.clone();
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        extractor,
    };

    tracing::info!(
        extractor = state.extractor.name(),
        auth = state.config.server.admin_token.is_some(),
        "starting isnad catalog server"
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);
    axum::serve(listener, build_router(state)).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/stats", get(handle_stats))
        .route("/api/sources", get(handle_list_sources).post(handle_create_source))
        .route("/api/sources/{id}/books", get(handle_list_books))
        .route("/api/books", post(handle_create_book))
        .route("/api/books/{id}/chapters", get(handle_list_chapters))
        .route("/api/chapters", post(handle_create_chapter))
        .route("/api/hadiths", get(handle_list_hadiths).post(handle_create_hadith))
        .route("/api/hadiths/batch", post(handle_create_batch))
        .route(
            "/api/hadiths/{id}",
            get(handle_get_hadith).delete(handle_delete_hadith),
        )
        .route(
            "/api/narrators",
            get(handle_list_narrators).post(handle_create_narrator),
        )
        .route("/api/narrators/search", get(handle_search_narrators))
        .route(
            "/api/narrators/{id}",
            get(handle_get_narrator).delete(handle_delete_narrator),
        )
        .route("/api/narrators/{id}/musnad", get(handle_musnad))
        .route("/api/narrators/{id}/hadiths", get(handle_narrator_hadiths))
        .route("/api/narrators/{id}/export", get(handle_export))
        .route("/api/isnad/analyze", post(handle_analyze))
        .route("/api/relations/rebuild", post(handle_rebuild_relations))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized() -> AppError {
    app_error(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "missing or invalid bearer token",
    )
}

/// Maps domain errors to their status code; everything else is a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        match err.downcast_ref::<CatalogError>() {
            Some(CatalogError::NotFound(_)) => {
                app_error(StatusCode::NOT_FOUND, "not_found", message)
            }
            Some(CatalogError::Invalid(_)) => bad_request(message),
            Some(CatalogError::Conflict(_)) => {
                app_error(StatusCode::CONFLICT, "conflict", message)
            }
            Some(CatalogError::Upstream(_)) => {
                tracing::warn!(error = %message, "upstream failure");
                app_error(StatusCode::BAD_GATEWAY, "upstream", message)
            }
            None => {
                tracing::error!(error = %message, "request failed");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

type ApiResult<T> = Result<T, AppError>;

/// Unwraps a JSON body, turning extractor rejections into the error envelope.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

/// Same as [`body`] for query strings.
fn query<T>(params: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

/// Enforces the admin bearer token when one is configured.
fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.config.server.admin_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(unauthorized()),
    }
}

#[derive(Serialize)]
struct Created {
    id: i64,
}

fn created(id: i64) -> (StatusCode, Json<Created>) {
    (StatusCode::CREATED, Json(Created { id }))
}

// ============ GET /health, /api/stats ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_stats(State(state): State<AppState>) -> ApiResult<Json<CatalogStats>> {
    Ok(Json(stats::collect_stats(&state.pool).await?))
}

// ============ Sources, books, chapters ============

async fn handle_list_sources(State(state): State<AppState>) -> ApiResult<Json<Vec<Source>>> {
    Ok(Json(sources::list_sources(&state.pool).await?))
}

async fn handle_create_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewSource>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers)?;
    let input = body(payload)?;
    Ok(created(sources::create_source(&state.pool, &input).await?))
}

async fn handle_list_books(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Book>>> {
    Ok(Json(sources::list_books(&state.pool, id).await?))
}

async fn handle_create_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewBook>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers)?;
    let input = body(payload)?;
    Ok(created(sources::create_book(&state.pool, &input).await?))
}

async fn handle_list_chapters(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Chapter>>> {
    Ok(Json(sources::list_chapters(&state.pool, id).await?))
}

async fn handle_create_chapter(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewChapter>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers)?;
    let input = body(payload)?;
    Ok(created(sources::create_chapter(&state.pool, &input).await?))
}

// ============ Hadiths ============

/// Query string for `GET /api/hadiths`.
#[derive(Debug, Default, Deserialize)]
struct HadithQuery {
    q: Option<String>,
    source_id: Option<i64>,
    book_id: Option<i64>,
    chapter_id: Option<i64>,
    #[serde(alias = "type")]
    hadith_type: Option<String>,
    narrator_id: Option<i64>,
    page: Option<i64>,
    limit: Option<i64>,
}

impl HadithQuery {
    fn into_parts(self) -> ApiResult<(HadithFilter, PageRequest)> {
        let hadith_type = self
            .hadith_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(str::parse::<HadithType>)
            .transpose()
            .map_err(|e| bad_request(e.to_string()))?;
        let filter = HadithFilter {
            q: self.q,
            source_id: self.source_id,
            book_id: self.book_id,
            chapter_id: self.chapter_id,
            hadith_type,
            narrator_id: self.narrator_id,
            first_narrator_id: None,
        };
        Ok((filter, PageRequest::new(self.page, self.limit)))
    }
}

async fn handle_list_hadiths(
    State(state): State<AppState>,
    params: Result<Query<HadithQuery>, QueryRejection>,
) -> ApiResult<Json<Page<HadithSummary>>> {
    let query = query(params)?;
    let (filter, page) = query.into_parts()?;
    Ok(Json(
        hadiths::list_hadiths(&state.pool, &filter, page, &state.config.pagination).await?,
    ))
}

async fn handle_get_hadith(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<HadithDetail>> {
    Ok(Json(hadiths::get_hadith(&state.pool, id).await?))
}

async fn handle_create_hadith(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewHadith>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers)?;
    let input = body(payload)?;
    Ok(created(hadiths::create_hadith(&state.pool, &input).await?))
}

async fn handle_create_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<BatchHadiths>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BatchResult>)> {
    require_admin(&state, &headers)?;
    let batch = body(payload)?;
    let result = hadiths::create_hadiths_batch(&state.pool, &batch).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn handle_delete_hadith(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_admin(&state, &headers)?;
    hadiths::delete_hadith(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Narrators ============

#[derive(Debug, Default, Deserialize)]
struct NarratorQuery {
    q: Option<String>,
    tabaqa: Option<i64>,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn handle_list_narrators(
    State(state): State<AppState>,
    params: Result<Query<NarratorQuery>, QueryRejection>,
) -> ApiResult<Json<Page<NarratorSummary>>> {
    let query = query(params)?;
    Ok(Json(
        narrators::list_narrators(
            &state.pool,
            query.q.as_deref(),
            query.tabaqa,
            PageRequest::new(query.page, query.limit),
            &state.config.pagination,
        )
        .await?,
    ))
}

async fn handle_create_narrator(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewNarrator>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers)?;
    let input = body(payload)?;
    Ok(created(narrators::create_narrator(&state.pool, &input).await?))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    name: String,
    limit: Option<usize>,
}

async fn handle_search_narrators(
    State(state): State<AppState>,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<NarratorMatch>>> {
    let query = query(params)?;
    let max = state.config.pagination.max_limit.max(1) as usize;
    let limit = query
        .limit
        .unwrap_or(state.config.matching.max_candidates)
        .clamp(1, max);
    Ok(Json(
        matching::search_narrators(&state.pool, &query.name, limit).await?,
    ))
}

async fn handle_get_narrator(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<NarratorDetail>> {
    Ok(Json(narrators::get_narrator(&state.pool, id).await?))
}

async fn handle_delete_narrator(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_admin(&state, &headers)?;
    narrators::delete_narrator(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_musnad(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    params: Result<Query<PageRequest>, QueryRejection>,
) -> ApiResult<Json<Page<HadithSummary>>> {
    let page = query(params)?;
    Ok(Json(
        narrators::musnad(&state.pool, id, page, &state.config.pagination).await?,
    ))
}

async fn handle_narrator_hadiths(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    params: Result<Query<PageRequest>, QueryRejection>,
) -> ApiResult<Json<Page<HadithSummary>>> {
    let page = query(params)?;
    Ok(Json(
        narrators::narrator_hadiths(&state.pool, id, page, &state.config.pagination).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

async fn handle_export(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    params: Result<Query<ExportQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let query = query(params)?;
    let format: ExportFormat = query
        .format
        .as_deref()
        .unwrap_or("docx")
        .parse()
        .map_err(|e: CatalogError| bad_request(e.to_string()))?;

    let file = export::export_musnad(&state.pool, id, format).await?;
    let headers = [
        (header::CONTENT_TYPE, file.content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.filename),
        ),
    ];
    Ok((headers, file.bytes).into_response())
}

// ============ Isnad analysis, relations ============

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    text: String,
    /// Attach stored-narrator candidates to every extracted name.
    #[serde(default = "default_true", rename = "match")]
    with_matches: bool,
}

fn default_true() -> bool {
    true
}

async fn handle_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<Json<matching::AnalysisReport>> {
    require_admin(&state, &headers)?;
    let req = body(payload)?;
    let report = matching::analyze_isnad(
        &state.pool,
        state.extractor.as_ref(),
        &req.text,
        req.with_matches,
        &state.config.matching,
    )
    .await?;
    Ok(Json(report))
}

#[derive(Serialize)]
struct RebuildResponse {
    relations: u64,
}

async fn handle_rebuild_relations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<RebuildResponse>> {
    require_admin(&state, &headers)?;
    let relations = relations::rebuild_relations(&state.pool).await?;
    Ok(Json(RebuildResponse { relations }))
}
