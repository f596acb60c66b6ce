//! rto - Document tracking backend for an RTO agent's desk
//!
//! Tracks vehicles, ownership transfers and the validity-bearing documents
//! attached to them (insurance, PUC, permits, tax, fitness). Every document
//! carries a lifecycle status (`active`, `expiring_soon`, `expired`) derived
//! from its validity end date; a daily job keeps the stored copy in step.
//!
//! # Features
//!
//! - `server` - HTTP API, database layer and auth. Enabled by default.
//! - `sqlite` - SQLite database backend. Enabled by default.
//! - `postgres` - PostgreSQL database backend.
//! - `background-jobs` - Cron-driven status reconciliation. Enabled by default.
//!
//! # Example
//!
//! ```toml
//! # Classifier and document model only
//! rto-docs = { path = "../rto-docs", default-features = false }
//!
//! # Server with PostgreSQL
//! rto-docs = { path = "../rto-docs", features = ["server", "postgres"] }
//! ```

#[cfg(all(feature = "server", not(any(feature = "sqlite", feature = "postgres"))))]
compile_error!("the `server` feature needs a database backend: enable `sqlite` or `postgres`");

// Core modules (always available)
pub mod config;
pub mod documents;
pub mod errors;
pub mod lifecycle;

// Server-related modules (requires "server" feature)
#[cfg(feature = "server")]
#[path = "server/mod.rs"]
pub mod server;

#[cfg(feature = "server")]
pub mod jobs;
