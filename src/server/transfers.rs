//! Ownership transfer endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::documents::Fees;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::AuthenticatedUser;
use crate::server::database::{Page, VehicleTransfer};
use crate::server::documents::resolve_owner;
use crate::server::handlers::{default_page, default_per_page, AppState, PagedResponse};
use crate::server::logging::{log_document_event, DocumentEvent};
use crate::server::validation::{
    clean_optional, validate_date, validate_fees, validate_length, validate_mobile,
    validate_not_empty, validate_vehicle_number, ValidationErrors,
};

#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    pub vehicle_number: String,
    pub seller_name: String,
    pub buyer_name: String,
    pub buyer_mobile: Option<String>,
    pub transfer_date: String,
    #[serde(default)]
    pub total_fee: i64,
    #[serde(default)]
    pub paid: i64,
    pub remarks: Option<String>,
    /// Admin only
    pub owner_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTransferRequest {
    pub vehicle_number: Option<String>,
    pub seller_name: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_mobile: Option<String>,
    pub transfer_date: Option<String>,
    pub total_fee: Option<i64>,
    pub paid: Option<i64>,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTransfersQuery {
    pub owner_id: Option<String>,
    /// Matches vehicle number, seller or buyer
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub id: String,
    pub owner_id: String,
    pub vehicle_number: String,
    pub seller_name: String,
    pub buyer_name: String,
    pub buyer_mobile: Option<String>,
    pub transfer_date: NaiveDate,
    pub total_fee: i64,
    pub paid: i64,
    pub balance: i64,
    pub remarks: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<VehicleTransfer> for TransferResponse {
    fn from(t: VehicleTransfer) -> Self {
        Self {
            balance: t.balance(),
            id: t.id,
            owner_id: t.owner_id,
            vehicle_number: t.vehicle_number,
            seller_name: t.seller_name,
            buyer_name: t.buyer_name,
            buyer_mobile: t.buyer_mobile,
            transfer_date: t.transfer_date,
            total_fee: t.total_fee,
            paid: t.paid,
            remarks: t.remarks,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

fn check_name(errors: &mut ValidationErrors, value: &str, field: &str) {
    if errors.check(validate_not_empty(value, field)).is_some() {
        errors.check(validate_length(value.trim(), 1, 128, field));
    }
}

async fn load_transfer(
    state: &AppState,
    id: &str,
    user: &AuthenticatedUser,
) -> Result<VehicleTransfer, ApiError> {
    match state.db.get_transfer(id).await? {
        Some(transfer) if user.can_access(&transfer.owner_id) => Ok(transfer),
        _ => Err(ApiError::not_found("transfer")),
    }
}

/// `POST /api/v1/transfers`
pub async fn create_transfer_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), ApiError> {
    let mut errors = ValidationErrors::new();

    let vehicle_number =
        errors.check(validate_vehicle_number(&payload.vehicle_number, "vehicle_number"));
    check_name(&mut errors, &payload.seller_name, "seller_name");
    check_name(&mut errors, &payload.buyer_name, "buyer_name");
    let buyer_mobile = errors
        .check(validate_mobile(payload.buyer_mobile.as_deref(), "buyer_mobile"))
        .flatten();
    let transfer_date = errors.check(validate_date(&payload.transfer_date, "transfer_date"));
    let fees = Fees::new(payload.total_fee, payload.paid);
    for problem in validate_fees(fees) {
        errors.push(problem);
    }
    if let Some(remarks) = payload.remarks.as_deref() {
        errors.check(validate_length(remarks, 0, 1000, "remarks"));
    }
    let owner_id = resolve_owner(&state, &user, payload.owner_id, &mut errors).await?;

    errors.into_result()?;
    let (Some(vehicle_number), Some(transfer_date)) = (vehicle_number, transfer_date) else {
        return Err(ApiError::new(ErrorCode::InvalidRequest));
    };

    let now = Utc::now().naive_utc();
    let transfer = VehicleTransfer {
        id: Uuid::new_v4().to_string(),
        owner_id,
        vehicle_number,
        seller_name: payload.seller_name.trim().to_string(),
        buyer_name: payload.buyer_name.trim().to_string(),
        buyer_mobile,
        transfer_date,
        total_fee: fees.total,
        paid: fees.paid,
        remarks: clean_optional(payload.remarks),
        created_at: now,
        updated_at: now,
    };

    state.db.insert_transfer(&transfer).await?;
    log_document_event(
        DocumentEvent::Created,
        "vehicle_transfers",
        &transfer.id,
        &user.username,
        Some(&transfer.vehicle_number),
    );

    Ok((StatusCode::CREATED, Json(transfer.into())))
}

/// `GET /api/v1/transfers/:id`
pub async fn get_transfer_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<TransferResponse>, ApiError> {
    Ok(Json(load_transfer(&state, &id, &user).await?.into()))
}

/// `GET /api/v1/transfers`
pub async fn list_transfers_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListTransfersQuery>,
) -> Result<Json<PagedResponse<TransferResponse>>, ApiError> {
    let owner_id = user.owner_scope(query.owner_id);
    let page = Page::new(query.page, query.per_page);

    let (transfers, total) = state
        .db
        .list_transfers(owner_id.as_deref(), query.search.as_deref(), page)
        .await?;

    let items = transfers.into_iter().map(TransferResponse::from).collect();
    Ok(Json(PagedResponse::new(items, total, page)))
}

/// `PATCH /api/v1/transfers/:id`
pub async fn update_transfer_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateTransferRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let mut transfer = load_transfer(&state, &id, &user).await?;
    let mut errors = ValidationErrors::new();

    if let Some(raw) = &payload.vehicle_number {
        if let Some(v) = errors.check(validate_vehicle_number(raw, "vehicle_number")) {
            transfer.vehicle_number = v;
        }
    }
    if let Some(name) = &payload.seller_name {
        check_name(&mut errors, name, "seller_name");
    }
    if let Some(name) = &payload.buyer_name {
        check_name(&mut errors, name, "buyer_name");
    }
    if payload.buyer_mobile.is_some() {
        if let Some(mobile) =
            errors.check(validate_mobile(payload.buyer_mobile.as_deref(), "buyer_mobile"))
        {
            transfer.buyer_mobile = mobile;
        }
    }
    if let Some(raw) = &payload.transfer_date {
        if let Some(d) = errors.check(validate_date(raw, "transfer_date")) {
            transfer.transfer_date = d;
        }
    }
    let fees = Fees::new(
        payload.total_fee.unwrap_or(transfer.total_fee),
        payload.paid.unwrap_or(transfer.paid),
    );
    for problem in validate_fees(fees) {
        errors.push(problem);
    }
    if let Some(remarks) = payload.remarks.as_deref() {
        errors.check(validate_length(remarks, 0, 1000, "remarks"));
    }

    errors.into_result()?;

    if let Some(name) = payload.seller_name {
        transfer.seller_name = name.trim().to_string();
    }
    if let Some(name) = payload.buyer_name {
        transfer.buyer_name = name.trim().to_string();
    }
    if payload.remarks.is_some() {
        transfer.remarks = clean_optional(payload.remarks);
    }
    transfer.total_fee = fees.total;
    transfer.paid = fees.paid;
    transfer.updated_at = Utc::now().naive_utc();

    if !state.db.update_transfer(&transfer).await? {
        return Err(ApiError::not_found("transfer"));
    }
    log_document_event(
        DocumentEvent::Updated,
        "vehicle_transfers",
        &transfer.id,
        &user.username,
        None,
    );

    Ok(Json(transfer.into()))
}

/// `DELETE /api/v1/transfers/:id`
pub async fn delete_transfer_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let transfer = load_transfer(&state, &id, &user).await?;

    if !state.db.delete_transfer(&transfer.id).await? {
        return Err(ApiError::not_found("transfer"));
    }
    log_document_event(
        DocumentEvent::Deleted,
        "vehicle_transfers",
        &transfer.id,
        &user.username,
        None,
    );

    Ok(StatusCode::NO_CONTENT)
}
