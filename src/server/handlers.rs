use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{LifecycleConfig, RtoConfig};
use crate::documents::DocumentKind;
use crate::errors::RtoResult;
use crate::jobs::{run_status_reconciliation, ReconcileReport};
use crate::lifecycle::{classify_display_date, parse_display_date, Status};
use crate::server::api_error::ApiError;
use crate::server::auth::{AuthState, AuthenticatedUser};
use crate::server::database::{Database, DocumentStatistics, Page, TransferStatistics};
use crate::server::logging::HealthResponse;

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub auth: AuthState,
    pub lifecycle: LifecycleConfig,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: &RtoConfig) -> RtoResult<Self> {
        Ok(Self {
            db,
            auth: AuthState::from_config(&config.auth)?,
            lifecycle: config.lifecycle.clone(),
            bcrypt_cost: config.auth.bcrypt_cost,
        })
    }

    pub fn today(&self) -> NaiveDate {
        self.lifecycle.today()
    }

    pub fn window_days(&self, kind: DocumentKind) -> u32 {
        self.lifecycle.window_days(kind)
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Resolve a `:kind` path segment.
pub fn parse_kind(slug: &str) -> Result<DocumentKind, ApiError> {
    DocumentKind::from_slug(slug).ok_or_else(|| ApiError::unknown_kind(slug))
}

pub(crate) fn default_page() -> u32 {
    1
}

pub(crate) fn default_per_page() -> u32 {
    20
}

/// One page of results.
#[derive(Debug, Serialize)]
pub struct PagedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u64,
}

impl<T> PagedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: Page) -> Self {
        Self {
            items,
            total,
            page: page.page,
            per_page: page.per_page,
            total_pages: page.total_pages(total),
        }
    }
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = state.db.ping().await;
    Json(HealthResponse::healthy(connected, state.db.backend()))
}

#[derive(Debug, Deserialize)]
pub struct ClassifyQuery {
    pub valid_to: String,
    /// Kind whose window applies; defaults to the 15-day window when absent
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub valid_to: String,
    pub parsed: Option<NaiveDate>,
    pub today: NaiveDate,
    pub window_days: u32,
    pub status: Status,
}

/// `GET /api/v1/lifecycle/classify?valid_to=DD-MM-YYYY&kind=puc`
///
/// Malformed dates are not an error: they classify as `unknown`.
pub async fn classify_handler(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<ClassifyQuery>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    let window_days = match query.kind.as_deref() {
        Some(slug) => state.window_days(parse_kind(slug)?),
        None => DocumentKind::Puc.default_window_days(),
    };
    let today = state.today();

    Ok(Json(ClassifyResponse {
        parsed: parse_display_date(&query.valid_to),
        status: classify_display_date(&query.valid_to, today, window_days),
        valid_to: query.valid_to,
        today,
        window_days,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    /// Admin only; other users always get their own numbers
    pub owner_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KindStatistics {
    pub kind: String,
    pub label: &'static str,
    pub window_days: u32,
    #[serde(flatten)]
    pub stats: DocumentStatistics,
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub today: NaiveDate,
    pub documents: Vec<KindStatistics>,
    pub transfers: TransferStatistics,
}

async fn kind_statistics(
    state: &AppState,
    kind: DocumentKind,
    owner_id: Option<&str>,
    today: NaiveDate,
) -> Result<KindStatistics, ApiError> {
    let window_days = state.window_days(kind);
    let stats = state
        .db
        .document_statistics(kind, owner_id, today, window_days)
        .await?;

    Ok(KindStatistics {
        kind: kind.slug().to_string(),
        label: kind.label(),
        window_days,
        stats,
    })
}

/// `GET /api/v1/statistics`
pub async fn statistics_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<StatisticsResponse>, ApiError> {
    let owner_id = user.owner_scope(query.owner_id);
    let today = state.today();

    let mut documents = Vec::with_capacity(DocumentKind::ALL.len());
    for kind in DocumentKind::ALL {
        documents.push(kind_statistics(&state, kind, owner_id.as_deref(), today).await?);
    }
    let transfers = state.db.transfer_statistics(owner_id.as_deref()).await?;

    Ok(Json(StatisticsResponse {
        today,
        documents,
        transfers,
    }))
}

/// `GET /api/v1/statistics/:kind`
pub async fn kind_statistics_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(slug): Path<String>,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<KindStatistics>, ApiError> {
    let kind = parse_kind(&slug)?;
    let owner_id = user.owner_scope(query.owner_id);
    let stats = kind_statistics(&state, kind, owner_id.as_deref(), state.today()).await?;
    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
    pub today: NaiveDate,
    pub reports: Vec<ReconcileReport>,
    pub updated: u64,
}

/// `POST /api/v1/jobs/status-reconciliation` (admin)
pub async fn status_reconciliation_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    user.require_admin()?;

    let today = state.today();
    info!("Manual status reconciliation requested by {}", user.username);

    let reports = run_status_reconciliation(&state.db, &state.lifecycle, today).await;
    let updated = reports.iter().map(|r| r.updated).sum();

    Ok(Json(ReconciliationResponse {
        today,
        reports,
        updated,
    }))
}
