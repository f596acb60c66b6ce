use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::accounts::{
    create_user_handler, list_users_handler, login_handler, logout_handler, me_handler,
};
use crate::server::documents::{
    create_document_handler, delete_document_handler, get_document_handler,
    list_documents_handler, renew_document_handler, update_document_handler,
};
use crate::server::export::export_handler;
use crate::server::handlers::{
    classify_handler, health_handler, kind_statistics_handler, statistics_handler,
    status_reconciliation_handler, AppState,
};
use crate::server::logging::request_logging_middleware;
use crate::server::transfers::{
    create_transfer_handler, delete_transfer_handler, get_transfer_handler,
    list_transfers_handler, update_transfer_handler,
};
use crate::server::vehicles::{
    create_vehicle_handler, delete_vehicle_handler, get_vehicle_handler, list_vehicles_handler,
    update_vehicle_handler, vehicle_documents_handler,
};

/// Build the application router.
///
/// `main.rs` and the integration tests both go through here.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Liveness and database check
/// - `POST /api/v1/auth/login` - Start a session (sets the cookie)
///
/// ## Session required
/// - `POST /api/v1/auth/logout`, `GET /api/v1/auth/me`
/// - `GET|POST /api/v1/documents/:kind` - List / create
/// - `GET|PATCH|DELETE /api/v1/documents/:kind/:id`
/// - `POST /api/v1/documents/:kind/:id/renew` - Create successor, flag old
/// - `GET /api/v1/statistics`, `GET /api/v1/statistics/:kind`
/// - `GET /api/v1/lifecycle/classify?valid_to=DD-MM-YYYY`
/// - `GET|POST /api/v1/vehicles`, `GET|PATCH|DELETE /api/v1/vehicles/:id`
/// - `GET /api/v1/vehicles/:id/documents`
/// - `GET|POST /api/v1/transfers`, `GET|PATCH|DELETE /api/v1/transfers/:id`
///
/// ## Admin only
/// - `GET|POST /api/v1/users`
/// - `GET /api/v1/export?group_by=kind|user`
/// - `POST /api/v1/jobs/status-reconciliation`
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Accounts
        .route("/api/v1/auth/login", post(login_handler))
        .route("/api/v1/auth/logout", post(logout_handler))
        .route("/api/v1/auth/me", get(me_handler))
        .route(
            "/api/v1/users",
            get(list_users_handler).post(create_user_handler),
        )
        // Documents
        .route(
            "/api/v1/documents/:kind",
            get(list_documents_handler).post(create_document_handler),
        )
        .route(
            "/api/v1/documents/:kind/:id",
            get(get_document_handler)
                .patch(update_document_handler)
                .delete(delete_document_handler),
        )
        .route(
            "/api/v1/documents/:kind/:id/renew",
            post(renew_document_handler),
        )
        .route("/api/v1/statistics", get(statistics_handler))
        .route("/api/v1/statistics/:kind", get(kind_statistics_handler))
        .route("/api/v1/lifecycle/classify", get(classify_handler))
        // Vehicles and transfers
        .route(
            "/api/v1/vehicles",
            get(list_vehicles_handler).post(create_vehicle_handler),
        )
        .route(
            "/api/v1/vehicles/:id",
            get(get_vehicle_handler)
                .patch(update_vehicle_handler)
                .delete(delete_vehicle_handler),
        )
        .route(
            "/api/v1/vehicles/:id/documents",
            get(vehicle_documents_handler),
        )
        .route(
            "/api/v1/transfers",
            get(list_transfers_handler).post(create_transfer_handler),
        )
        .route(
            "/api/v1/transfers/:id",
            get(get_transfer_handler)
                .patch(update_transfer_handler)
                .delete(delete_transfer_handler),
        )
        // Admin
        .route("/api/v1/export", get(export_handler))
        .route(
            "/api/v1/jobs/status-reconciliation",
            post(status_reconciliation_handler),
        )
        .layer(middleware::from_fn(request_logging_middleware))
        .with_state(state)
}
