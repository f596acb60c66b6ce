//! Vehicle registry endpoints.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::documents::DocumentKind;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::AuthenticatedUser;
use crate::server::database::{Page, Vehicle};
use crate::server::documents::{resolve_owner, DocumentResponse};
use crate::server::handlers::{default_page, default_per_page, AppState, PagedResponse};
use crate::server::logging::{log_document_event, DocumentEvent};
use crate::server::validation::{
    clean_optional, validate_length, validate_mobile, validate_vehicle_number, ValidationErrors,
};

#[derive(Debug, Deserialize)]
pub struct CreateVehicleRequest {
    pub vehicle_number: String,
    pub owner_name: Option<String>,
    pub mobile: Option<String>,
    pub chassis_number: Option<String>,
    pub engine_number: Option<String>,
    /// e.g. LMV, HGV, MCWG
    pub vehicle_class: Option<String>,
    /// Admin only
    pub owner_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateVehicleRequest {
    pub vehicle_number: Option<String>,
    pub owner_name: Option<String>,
    pub mobile: Option<String>,
    pub chassis_number: Option<String>,
    pub engine_number: Option<String>,
    pub vehicle_class: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListVehiclesQuery {
    pub owner_id: Option<String>,
    /// Matches vehicle number, owner name or mobile
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// A vehicle with every document recorded against it, grouped by kind slug.
#[derive(Debug, Serialize)]
pub struct VehicleDocumentsResponse {
    pub vehicle: Vehicle,
    pub documents: BTreeMap<&'static str, Vec<DocumentResponse>>,
}

fn check_details(
    errors: &mut ValidationErrors,
    owner_name: Option<&str>,
    chassis_number: Option<&str>,
    engine_number: Option<&str>,
    vehicle_class: Option<&str>,
) {
    for (value, max, field) in [
        (owner_name, 128, "owner_name"),
        (chassis_number, 32, "chassis_number"),
        (engine_number, 32, "engine_number"),
        (vehicle_class, 32, "vehicle_class"),
    ] {
        if let Some(v) = value {
            errors.check(validate_length(v, 0, max, field));
        }
    }
}

async fn load_vehicle(
    state: &AppState,
    id: &str,
    user: &AuthenticatedUser,
) -> Result<Vehicle, ApiError> {
    match state.db.get_vehicle(id).await? {
        Some(vehicle) if user.can_access(&vehicle.owner_id) => Ok(vehicle),
        _ => Err(ApiError::not_found("vehicle")),
    }
}

/// `POST /api/v1/vehicles`
pub async fn create_vehicle_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateVehicleRequest>,
) -> Result<(StatusCode, Json<Vehicle>), ApiError> {
    let mut errors = ValidationErrors::new();

    let vehicle_number =
        errors.check(validate_vehicle_number(&payload.vehicle_number, "vehicle_number"));
    let mobile = errors
        .check(validate_mobile(payload.mobile.as_deref(), "mobile"))
        .flatten();
    check_details(
        &mut errors,
        payload.owner_name.as_deref(),
        payload.chassis_number.as_deref(),
        payload.engine_number.as_deref(),
        payload.vehicle_class.as_deref(),
    );
    let owner_id = resolve_owner(&state, &user, payload.owner_id, &mut errors).await?;

    errors.into_result()?;
    let Some(vehicle_number) = vehicle_number else {
        return Err(ApiError::new(ErrorCode::InvalidRequest));
    };

    let now = Utc::now().naive_utc();
    let vehicle = Vehicle {
        id: Uuid::new_v4().to_string(),
        owner_id,
        vehicle_number,
        owner_name: clean_optional(payload.owner_name),
        mobile,
        chassis_number: clean_optional(payload.chassis_number).map(|c| c.to_uppercase()),
        engine_number: clean_optional(payload.engine_number).map(|e| e.to_uppercase()),
        vehicle_class: clean_optional(payload.vehicle_class),
        created_at: now,
        updated_at: now,
    };

    state.db.insert_vehicle(&vehicle).await?;
    log_document_event(
        DocumentEvent::Created,
        "vehicles",
        &vehicle.id,
        &user.username,
        Some(&vehicle.vehicle_number),
    );

    Ok((StatusCode::CREATED, Json(vehicle)))
}

/// `GET /api/v1/vehicles/:id`
pub async fn get_vehicle_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<Vehicle>, ApiError> {
    Ok(Json(load_vehicle(&state, &id, &user).await?))
}

/// `GET /api/v1/vehicles`
pub async fn list_vehicles_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListVehiclesQuery>,
) -> Result<Json<PagedResponse<Vehicle>>, ApiError> {
    let owner_id = user.owner_scope(query.owner_id);
    let page = Page::new(query.page, query.per_page);

    let (vehicles, total) = state
        .db
        .list_vehicles(owner_id.as_deref(), query.search.as_deref(), page)
        .await?;

    Ok(Json(PagedResponse::new(vehicles, total, page)))
}

/// `PATCH /api/v1/vehicles/:id`
pub async fn update_vehicle_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateVehicleRequest>,
) -> Result<Json<Vehicle>, ApiError> {
    let mut vehicle = load_vehicle(&state, &id, &user).await?;
    let mut errors = ValidationErrors::new();

    if let Some(raw) = &payload.vehicle_number {
        if let Some(v) = errors.check(validate_vehicle_number(raw, "vehicle_number")) {
            vehicle.vehicle_number = v;
        }
    }
    if payload.mobile.is_some() {
        if let Some(mobile) = errors.check(validate_mobile(payload.mobile.as_deref(), "mobile")) {
            vehicle.mobile = mobile;
        }
    }
    check_details(
        &mut errors,
        payload.owner_name.as_deref(),
        payload.chassis_number.as_deref(),
        payload.engine_number.as_deref(),
        payload.vehicle_class.as_deref(),
    );

    errors.into_result()?;

    if payload.owner_name.is_some() {
        vehicle.owner_name = clean_optional(payload.owner_name);
    }
    if payload.chassis_number.is_some() {
        vehicle.chassis_number = clean_optional(payload.chassis_number).map(|c| c.to_uppercase());
    }
    if payload.engine_number.is_some() {
        vehicle.engine_number = clean_optional(payload.engine_number).map(|e| e.to_uppercase());
    }
    if payload.vehicle_class.is_some() {
        vehicle.vehicle_class = clean_optional(payload.vehicle_class);
    }
    vehicle.updated_at = Utc::now().naive_utc();

    if !state.db.update_vehicle(&vehicle).await? {
        return Err(ApiError::not_found("vehicle"));
    }
    log_document_event(
        DocumentEvent::Updated,
        "vehicles",
        &vehicle.id,
        &user.username,
        None,
    );

    Ok(Json(vehicle))
}

/// `DELETE /api/v1/vehicles/:id`
///
/// Documents filed against the vehicle number are kept.
pub async fn delete_vehicle_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let vehicle = load_vehicle(&state, &id, &user).await?;

    if !state.db.delete_vehicle(&vehicle.id).await? {
        return Err(ApiError::not_found("vehicle"));
    }
    log_document_event(
        DocumentEvent::Deleted,
        "vehicles",
        &vehicle.id,
        &user.username,
        Some(&vehicle.vehicle_number),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/v1/vehicles/:id/documents`
pub async fn vehicle_documents_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<VehicleDocumentsResponse>, ApiError> {
    let vehicle = load_vehicle(&state, &id, &user).await?;
    let today = state.today();

    let mut documents = BTreeMap::new();
    for kind in DocumentKind::ALL {
        let window_days = state.window_days(kind);
        let docs = state
            .db
            .documents_for_vehicle(kind, &vehicle.owner_id, &vehicle.vehicle_number)
            .await?;
        documents.insert(
            kind.slug(),
            docs.into_iter()
                .map(|doc| DocumentResponse::new(kind, doc, today, window_days))
                .collect(),
        );
    }

    Ok(Json(VehicleDocumentsResponse { vehicle, documents }))
}
