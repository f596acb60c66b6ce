// src/server/mod.rs

//! Server-side components of the document desk.
//!
//! This module contains:
//! - `database`    → DB abstraction over SQLite/Postgres
//! - `handlers`    → Shared state, health, statistics and classification
//! - `documents`   → Document CRUD and renewal, one table per kind
//! - `vehicles`    → Vehicle registry
//! - `transfers`   → Ownership transfers
//! - `accounts`    → Login, logout and user administration
//! - `export`      → JSON export of every collection
//! - `routes`      → Router builder
//! - `auth`        → Cookie/JWT session extraction
//! - `logging`     → Subscriber setup, request middleware, audit events
//! - `validation`  → Request validation utilities

pub mod accounts;
pub mod api_error;
pub mod auth;
pub mod database;
pub mod documents;
pub mod export;
pub mod handlers;
pub mod logging;
pub mod routes;
pub mod transfers;
pub mod validation;
pub mod vehicles;

// Re-exports so callers can write `rto::server::X`.

pub use accounts::{bootstrap_admin_from_env, BOOTSTRAP_ADMIN_ENV};
pub use api_error::{ApiError, ErrorCode};
pub use auth::{AuthError, AuthState, AuthenticatedUser, Claims, JwtValidator, Role};
pub use database::{Database, Document, DocumentFilter, Page, User, Vehicle, VehicleTransfer};
pub use handlers::AppState;
pub use logging::init_tracing;
pub use routes::build_router;
pub use validation::{ValidationError, ValidationErrors, ValidationResult};
