//! Document endpoints, shared by every kind.
//!
//! `/api/v1/documents/:kind` where `:kind` is a slug such as `insurance`,
//! `puc` or `temporary-permits`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::documents::{DocumentKind, Fees};
use crate::lifecycle::Status;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::AuthenticatedUser;
use crate::server::database::{Document, DocumentFilter, Page};
use crate::server::handlers::{default_page, default_per_page, parse_kind, AppState, PagedResponse};
use crate::server::logging::{log_kind_event, DocumentEvent};
use crate::server::validation::{
    clean_optional, validate_date, validate_date_range, validate_fees, validate_length,
    validate_mobile, validate_vehicle_number, ValidationError, ValidationErrors,
};

/// Payload for creating a document.
#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub vehicle_number: String,
    pub reference_number: Option<String>,
    /// Insurer, issuing office or testing centre
    pub issuer: Option<String>,
    pub holder_name: Option<String>,
    pub mobile: Option<String>,
    pub remarks: Option<String>,
    /// `DD-MM-YYYY`, `DD/MM/YYYY` or `YYYY-MM-DD`
    pub valid_from: String,
    pub valid_to: String,
    #[serde(default)]
    pub total_fee: i64,
    #[serde(default)]
    pub paid: i64,
    /// Admins may file a record for another user
    pub owner_id: Option<String>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateDocumentRequest {
    pub vehicle_number: Option<String>,
    pub reference_number: Option<String>,
    pub issuer: Option<String>,
    pub holder_name: Option<String>,
    pub mobile: Option<String>,
    pub remarks: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub total_fee: Option<i64>,
    pub paid: Option<i64>,
}

/// Payload for renewing a document. Unset descriptive fields are carried
/// over from the record being renewed.
#[derive(Debug, Deserialize)]
pub struct RenewDocumentRequest {
    /// Defaults to today
    pub valid_from: Option<String>,
    pub valid_to: String,
    pub reference_number: Option<String>,
    pub issuer: Option<String>,
    pub remarks: Option<String>,
    #[serde(default)]
    pub total_fee: i64,
    #[serde(default)]
    pub paid: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    /// Admin only
    pub owner_id: Option<String>,
    pub search: Option<String>,
    /// active, expiring_soon or expired
    pub status: Option<String>,
    pub vehicle_number: Option<String>,
    #[serde(default)]
    pub needs_renewal: bool,
    /// Set to false to hide records that were already renewed
    pub include_renewed: Option<bool>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// A document as returned by the API.
///
/// `status` is evaluated against today at response time; `balance` is
/// derived from the fee fields.
#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub kind: &'static str,
    pub owner_id: String,
    pub vehicle_number: String,
    pub reference_number: Option<String>,
    pub issuer: Option<String>,
    pub holder_name: Option<String>,
    pub mobile: Option<String>,
    pub remarks: Option<String>,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub status: Status,
    pub total_fee: i64,
    pub paid: i64,
    pub balance: i64,
    pub renewed: bool,
    pub renewed_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DocumentResponse {
    pub fn new(kind: DocumentKind, doc: Document, today: NaiveDate, window_days: u32) -> Self {
        Self {
            status: doc.current_status(today, window_days),
            balance: doc.balance(),
            kind: kind.slug(),
            id: doc.id,
            owner_id: doc.owner_id,
            vehicle_number: doc.vehicle_number,
            reference_number: doc.reference_number,
            issuer: doc.issuer,
            holder_name: doc.holder_name,
            mobile: doc.mobile,
            remarks: doc.remarks,
            valid_from: doc.valid_from,
            valid_to: doc.valid_to,
            total_fee: doc.total_fee,
            paid: doc.paid,
            renewed: doc.renewed,
            renewed_by: doc.renewed_by,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

fn respond(state: &AppState, kind: DocumentKind, doc: Document) -> Json<DocumentResponse> {
    Json(DocumentResponse::new(
        kind,
        doc,
        state.today(),
        state.window_days(kind),
    ))
}

/// Optional free-text fields and their length limits.
fn check_text(errors: &mut ValidationErrors, value: Option<&str>, max: usize, field: &str) {
    if let Some(v) = value {
        errors.check(validate_length(v, 0, max, field));
    }
}

fn check_descriptive(
    errors: &mut ValidationErrors,
    reference_number: Option<&str>,
    issuer: Option<&str>,
    holder_name: Option<&str>,
    remarks: Option<&str>,
) {
    check_text(errors, reference_number, 64, "reference_number");
    check_text(errors, issuer, 128, "issuer");
    check_text(errors, holder_name, 128, "holder_name");
    check_text(errors, remarks, 1000, "remarks");
}

/// Load a document the caller may see. Records of other owners look missing.
async fn load_document(
    state: &AppState,
    kind: DocumentKind,
    id: &str,
    user: &AuthenticatedUser,
) -> Result<Document, ApiError> {
    match state.db.get_document(kind, id).await? {
        Some(doc) if user.can_access(&doc.owner_id) => Ok(doc),
        _ => Err(ApiError::not_found(kind.label())),
    }
}

/// Owner for a new record: admins may name an existing user.
pub(crate) async fn resolve_owner(
    state: &AppState,
    user: &AuthenticatedUser,
    requested: Option<String>,
    errors: &mut ValidationErrors,
) -> Result<String, ApiError> {
    match user.owner_scope(requested) {
        Some(owner_id) if owner_id != user.user_id => {
            if state.db.get_user(&owner_id).await?.is_none() {
                errors.push(ValidationError::new("owner_id", "no such user"));
            }
            Ok(owner_id)
        }
        _ => Ok(user.user_id.clone()),
    }
}

/// `POST /api/v1/documents/:kind`
pub async fn create_document_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(slug): Path<String>,
    Json(payload): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), ApiError> {
    let kind = parse_kind(&slug)?;
    let mut errors = ValidationErrors::new();

    let vehicle_number =
        errors.check(validate_vehicle_number(&payload.vehicle_number, "vehicle_number"));
    let valid_from = errors.check(validate_date(&payload.valid_from, "valid_from"));
    let valid_to = errors.check(validate_date(&payload.valid_to, "valid_to"));
    if let (Some(from), Some(to)) = (valid_from, valid_to) {
        errors.check(validate_date_range(from, to));
    }
    let fees = Fees::new(payload.total_fee, payload.paid);
    for problem in validate_fees(fees) {
        errors.push(problem);
    }
    let mobile = errors
        .check(validate_mobile(payload.mobile.as_deref(), "mobile"))
        .flatten();
    check_descriptive(
        &mut errors,
        payload.reference_number.as_deref(),
        payload.issuer.as_deref(),
        payload.holder_name.as_deref(),
        payload.remarks.as_deref(),
    );
    let owner_id = resolve_owner(&state, &user, payload.owner_id, &mut errors).await?;

    errors.into_result()?;
    let (Some(vehicle_number), Some(valid_from), Some(valid_to)) =
        (vehicle_number, valid_from, valid_to)
    else {
        return Err(ApiError::new(ErrorCode::InvalidRequest));
    };

    let now = Utc::now().naive_utc();
    let mut doc = Document {
        id: Uuid::new_v4().to_string(),
        owner_id,
        vehicle_number,
        reference_number: clean_optional(payload.reference_number),
        issuer: clean_optional(payload.issuer),
        holder_name: clean_optional(payload.holder_name),
        mobile,
        remarks: clean_optional(payload.remarks),
        valid_from,
        valid_to,
        total_fee: fees.total,
        paid: fees.paid,
        status: String::new(),
        renewed: false,
        renewed_by: None,
        created_at: now,
        updated_at: now,
    };
    doc.refresh_status(state.today(), state.window_days(kind));

    state.db.insert_document(kind, &doc).await?;
    log_kind_event(DocumentEvent::Created, kind, &doc.id, &user.username);

    Ok((StatusCode::CREATED, respond(&state, kind, doc)))
}

/// `GET /api/v1/documents/:kind/:id`
pub async fn get_document_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((slug, id)): Path<(String, String)>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let kind = parse_kind(&slug)?;
    let doc = load_document(&state, kind, &id, &user).await?;
    Ok(respond(&state, kind, doc))
}

/// `GET /api/v1/documents/:kind`
pub async fn list_documents_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(slug): Path<String>,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Json<PagedResponse<DocumentResponse>>, ApiError> {
    let kind = parse_kind(&slug)?;

    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(label) => match Status::parse(label) {
            // stored dates are always valid, so nothing lists as unknown
            Some(status) if status != Status::Unknown => Some(status),
            _ => {
                return Err(ApiError::with_details(
                    ErrorCode::InvalidRequest,
                    format!("unknown status '{label}'"),
                    serde_json::json!({ "errors": [ValidationError::new(
                        "status",
                        "expected active, expiring_soon or expired",
                    )] }),
                ))
            }
        },
        None => None,
    };

    let filter = DocumentFilter {
        owner_id: user.owner_scope(query.owner_id),
        vehicle_number: query
            .vehicle_number
            .as_deref()
            .map(crate::documents::normalize_vehicle_number)
            .filter(|v| !v.is_empty()),
        search: query.search,
        status,
        needs_renewal: query.needs_renewal,
        renewed: match query.include_renewed {
            Some(false) => Some(false),
            _ => None,
        },
    };

    let page = Page::new(query.page, query.per_page);
    let today = state.today();
    let window_days = state.window_days(kind);
    let (docs, total) = state
        .db
        .list_documents(kind, &filter, today, window_days, page)
        .await?;

    let items = docs
        .into_iter()
        .map(|doc| DocumentResponse::new(kind, doc, today, window_days))
        .collect();

    Ok(Json(PagedResponse::new(items, total, page)))
}

/// `PATCH /api/v1/documents/:kind/:id`
pub async fn update_document_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((slug, id)): Path<(String, String)>,
    Json(payload): Json<UpdateDocumentRequest>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let kind = parse_kind(&slug)?;
    let mut doc = load_document(&state, kind, &id, &user).await?;
    let mut errors = ValidationErrors::new();

    if let Some(raw) = &payload.vehicle_number {
        if let Some(v) = errors.check(validate_vehicle_number(raw, "vehicle_number")) {
            doc.vehicle_number = v;
        }
    }
    if let Some(raw) = &payload.valid_from {
        if let Some(d) = errors.check(validate_date(raw, "valid_from")) {
            doc.valid_from = d;
        }
    }
    if let Some(raw) = &payload.valid_to {
        if let Some(d) = errors.check(validate_date(raw, "valid_to")) {
            doc.valid_to = d;
        }
    }
    if errors.is_empty() {
        errors.check(validate_date_range(doc.valid_from, doc.valid_to));
    }

    let fees = Fees::new(
        payload.total_fee.unwrap_or(doc.total_fee),
        payload.paid.unwrap_or(doc.paid),
    );
    for problem in validate_fees(fees) {
        errors.push(problem);
    }

    if payload.mobile.is_some() {
        if let Some(mobile) = errors.check(validate_mobile(payload.mobile.as_deref(), "mobile")) {
            doc.mobile = mobile;
        }
    }
    check_descriptive(
        &mut errors,
        payload.reference_number.as_deref(),
        payload.issuer.as_deref(),
        payload.holder_name.as_deref(),
        payload.remarks.as_deref(),
    );

    errors.into_result()?;

    if payload.reference_number.is_some() {
        doc.reference_number = clean_optional(payload.reference_number);
    }
    if payload.issuer.is_some() {
        doc.issuer = clean_optional(payload.issuer);
    }
    if payload.holder_name.is_some() {
        doc.holder_name = clean_optional(payload.holder_name);
    }
    if payload.remarks.is_some() {
        doc.remarks = clean_optional(payload.remarks);
    }
    doc.total_fee = fees.total;
    doc.paid = fees.paid;
    doc.refresh_status(state.today(), state.window_days(kind));
    doc.updated_at = Utc::now().naive_utc();

    if !state.db.update_document(kind, &doc).await? {
        return Err(ApiError::not_found(kind.label()));
    }
    log_kind_event(DocumentEvent::Updated, kind, &doc.id, &user.username);

    Ok(respond(&state, kind, doc))
}

/// `DELETE /api/v1/documents/:kind/:id`
pub async fn delete_document_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((slug, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&slug)?;
    let doc = load_document(&state, kind, &id, &user).await?;

    if !state.db.delete_document(kind, &doc.id).await? {
        return Err(ApiError::not_found(kind.label()));
    }
    log_kind_event(DocumentEvent::Deleted, kind, &doc.id, &user.username);

    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/documents/:kind/:id/renew`
///
/// Creates the successor record and flags the old one as renewed in a
/// single transaction. A record can only be renewed once.
pub async fn renew_document_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((slug, id)): Path<(String, String)>,
    Json(payload): Json<RenewDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), ApiError> {
    let kind = parse_kind(&slug)?;
    let previous = load_document(&state, kind, &id, &user).await?;

    if previous.renewed {
        return Err(ApiError::with_message(
            ErrorCode::Conflict,
            format!("{} has already been renewed", kind.label()),
        ));
    }

    let today = state.today();
    let mut errors = ValidationErrors::new();
    let valid_from = match payload.valid_from.as_deref() {
        Some(raw) => errors.check(validate_date(raw, "valid_from")),
        None => Some(today),
    };
    let valid_to = errors.check(validate_date(&payload.valid_to, "valid_to"));
    if let (Some(from), Some(to)) = (valid_from, valid_to) {
        errors.check(validate_date_range(from, to));
    }
    let fees = Fees::new(payload.total_fee, payload.paid);
    for problem in validate_fees(fees) {
        errors.push(problem);
    }
    check_descriptive(
        &mut errors,
        payload.reference_number.as_deref(),
        payload.issuer.as_deref(),
        None,
        payload.remarks.as_deref(),
    );

    errors.into_result()?;
    let (Some(valid_from), Some(valid_to)) = (valid_from, valid_to) else {
        return Err(ApiError::new(ErrorCode::InvalidRequest));
    };

    let now = Utc::now().naive_utc();
    let mut successor = Document {
        id: Uuid::new_v4().to_string(),
        owner_id: previous.owner_id.clone(),
        vehicle_number: previous.vehicle_number.clone(),
        reference_number: clean_optional(payload.reference_number)
            .or_else(|| previous.reference_number.clone()),
        issuer: clean_optional(payload.issuer).or_else(|| previous.issuer.clone()),
        holder_name: previous.holder_name.clone(),
        mobile: previous.mobile.clone(),
        remarks: clean_optional(payload.remarks),
        valid_from,
        valid_to,
        total_fee: fees.total,
        paid: fees.paid,
        status: String::new(),
        renewed: false,
        renewed_by: None,
        created_at: now,
        updated_at: now,
    };
    successor.refresh_status(today, state.window_days(kind));

    if !state.db.renew_document(kind, &previous.id, &successor).await? {
        return Err(ApiError::with_message(
            ErrorCode::Conflict,
            format!("{} has already been renewed", kind.label()),
        ));
    }

    info!(
        "{} {} renewed by {} (valid until {})",
        kind.label(),
        previous.id,
        successor.id,
        successor.valid_to
    );
    log_kind_event(DocumentEvent::Renewed, kind, &previous.id, &user.username);

    Ok((StatusCode::CREATED, respond(&state, kind, successor)))
}
