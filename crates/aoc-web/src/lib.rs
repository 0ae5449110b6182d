//! Axum JSON API over the tender service.
//!
//! Endpoints expose the listing, portal registry and the three report
//! dimensions, plus a sync endpoint ingesting a raw portal payload. When a
//! static bearer token is configured it gates everything except the health
//! route and the portal registry.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::warn;

use aoc_core::{ClosingWindow, SearchField, SortKey, StatsDimension, TenderFilter};
use aoc_store::StoreError;
use aoc_sync::{QueryError, TenderService};

pub const CRATE_NAME: &str = "aoc-web";

#[derive(Clone)]
pub struct AppState {
    pub service: TenderService,
    /// When set, the tenders, report and sync endpoints require
    /// `Authorization: Bearer <token>`; `/` and `/api/portals` stay open.
    pub api_token: Option<String>,
}

impl AppState {
    pub fn new(service: TenderService, api_token: Option<String>) -> Self {
        Self { service, api_token }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/tenders", get(tenders_handler))
        .route("/api/portals", get(portals_handler))
        .route("/api/report/categories", get(report_categories_handler))
        .route("/api/report/keywords", get(report_keywords_handler))
        .route("/api/report/portals", get(report_portals_handler))
        .route("/api/sync/{portal_code}", post(sync_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Query-string shape shared by the listing and report endpoints. Field
/// values reuse the core enums' snake_case encodings.
#[derive(Debug, Default, Deserialize)]
struct TendersQuery {
    country: Option<String>,
    portal: Option<String>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
    closing: Option<ClosingWindow>,
    q: Option<String>,
    field: Option<SearchField>,
    #[serde(default)]
    ats_only: bool,
    sort: Option<SortKey>,
    order: Option<String>,
    limit: Option<usize>,
    top: Option<usize>,
}

/// `country=ALL` / `portal=ALL` are sentinels for "no restriction".
fn not_all(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .filter(|v| !v.eq_ignore_ascii_case("ALL"))
        .cloned()
}

impl TendersQuery {
    fn filter(&self) -> TenderFilter {
        TenderFilter {
            country: not_all(&self.country),
            portal: not_all(&self.portal),
            date_from: self.date_from,
            date_to: self.date_to,
            closing_window: self.closing.unwrap_or_default(),
            query: self.q.clone(),
            search_field: self.field.unwrap_or_default(),
            ats_only: self.ats_only,
        }
    }

    fn descending(&self) -> bool {
        // published_at listings default to newest-first.
        !matches!(self.order.as_deref(), Some("asc"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PortalsQuery {
    #[serde(default)]
    all: bool,
    country: Option<String>,
}

async fn index_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "ao-collector",
        "endpoints": [
            "/api/tenders",
            "/api/portals",
            "/api/report/categories",
            "/api/report/keywords",
            "/api/report/portals",
            "/api/sync/{portal_code}",
        ],
    }))
}

async fn tenders_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TendersQuery>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let filter = query.filter();
    let sort = query.sort.unwrap_or_default();
    match state
        .service
        .list_tenders(&filter, sort, query.descending(), query.limit)
        .await
    {
        Ok(listing) => Json(listing).into_response(),
        Err(err) => error_response(err),
    }
}

async fn portals_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PortalsQuery>,
) -> Response {
    match state
        .service
        .list_portals(!query.all, query.country.as_deref())
        .await
    {
        Ok(portals) => Json(portals).into_response(),
        Err(err) => error_response(err),
    }
}

async fn report_categories_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TendersQuery>,
) -> Response {
    report(&state, &headers, &query, StatsDimension::Category).await
}

async fn report_keywords_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TendersQuery>,
) -> Response {
    report(&state, &headers, &query, StatsDimension::Keyword).await
}

async fn report_portals_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TendersQuery>,
) -> Response {
    report(&state, &headers, &query, StatsDimension::Portal).await
}

async fn report(
    state: &AppState,
    headers: &HeaderMap,
    query: &TendersQuery,
    dimension: StatsDimension,
) -> Response {
    if !authorized(state, headers) {
        return unauthorized();
    }
    match state.service.stats(&query.filter(), dimension, query.top).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => error_response(err),
    }
}

async fn sync_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(portal_code): AxumPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    match state
        .service
        .sync_raw_payload(&portal_code, &body, Utc::now())
        .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => error_response(err),
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "missing or invalid bearer token"})),
    )
        .into_response()
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.api_token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn error_response(err: QueryError) -> Response {
    let (status, message) = match &err {
        QueryError::NoAdapter(_) => (StatusCode::NOT_FOUND, err.to_string()),
        QueryError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        QueryError::Adapter(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        QueryError::Store(StoreError::Unavailable(_)) => {
            warn!(error = %err, "store unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable".to_string())
        }
        QueryError::Store(_) => {
            warn!(error = %err, "store error");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    };
    (status, Json(serde_json::json!({"error": message}))).into_response()
}
