//! Logging for the RTO document service.
//!
//! - Subscriber setup ([`init_tracing`]): console output filtered by
//!   `logging.level` (or `RUST_LOG`), plus warnings and errors appended to a
//!   daily `error-YYYY-MM-DD.log` file.
//! - Request middleware: request id, timing, method, path and status.
//! - Audit helpers for document and account events.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Response},
    middleware::Next,
};
use tracing::{info, info_span, warn, Instrument, Level};
use tracing_subscriber::{
    fmt::{self, writer::MakeWriterExt, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use uuid::Uuid;

use crate::config::LoggingConfig;
use crate::documents::DocumentKind;
use crate::errors::{RtoError, RtoResult};
use crate::lifecycle::today_at_offset;

/// Appends log lines to `<dir>/error-YYYY-MM-DD.log`.
///
/// The file is chosen per write, so output rolls over at midnight (at the
/// configured offset). A write failure is reported on stderr once and
/// otherwise dropped.
#[derive(Debug, Clone)]
pub struct DailyErrorFile {
    dir: PathBuf,
    utc_offset_minutes: i32,
    reported: Arc<AtomicBool>,
}

impl DailyErrorFile {
    pub fn new(dir: impl Into<PathBuf>, utc_offset_minutes: i32) -> Self {
        Self {
            dir: dir.into(),
            utc_offset_minutes,
            reported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Path of today's file.
    pub fn current_path(&self) -> PathBuf {
        let today = today_at_offset(self.utc_offset_minutes);
        self.dir.join(format!("error-{}.log", today.format("%Y-%m-%d")))
    }
}

pub struct DailyErrorWriter {
    file: DailyErrorFile,
}

impl Write for DailyErrorWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let path = self.file.current_path();
        let result = fs::create_dir_all(&self.file.dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
            .and_then(|mut f| f.write_all(buf));

        if let Err(e) = result {
            if !self.file.reported.swap(true, Ordering::Relaxed) {
                eprintln!("cannot write error log {}: {e}", path.display());
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DailyErrorFile {
    type Writer = DailyErrorWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DailyErrorWriter { file: self.clone() }
    }
}

/// Install the global tracing subscriber.
pub fn init_tracing(config: &LoggingConfig, utc_offset_minutes: i32) -> RtoResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = (!config.error_log_dir.is_empty()).then(|| {
        let sink = DailyErrorFile::new(&config.error_log_dir, utc_offset_minutes);
        fmt::layer()
            .with_ansi(false)
            .with_writer(sink.with_max_level(Level::WARN))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| RtoError::ConfigError(format!("failed to initialize logging: {e}")))
}

/// Document change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEvent {
    Created,
    Updated,
    Deleted,
    Renewed,
    /// Stored status changed by reconciliation
    StatusRecomputed,
}

impl std::fmt::Display for DocumentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentEvent::Created => "created",
            DocumentEvent::Updated => "updated",
            DocumentEvent::Deleted => "deleted",
            DocumentEvent::Renewed => "renewed",
            DocumentEvent::StatusRecomputed => "status_recomputed",
        };
        write!(f, "{}", s)
    }
}

/// Log a change to a document (or vehicle/transfer, passing its table name).
pub fn log_document_event(
    event: DocumentEvent,
    record: &str,
    id: &str,
    actor: &str,
    details: Option<&str>,
) {
    let span = info_span!(
        "document_event",
        event = %event,
        record = %record,
        id = %id,
        actor = %actor,
    );
    let _enter = span.enter();

    if let Some(d) = details {
        info!(details = %d, "Document event occurred");
    } else {
        info!("Document event occurred");
    }
}

/// Shorthand for document kinds.
pub fn log_kind_event(event: DocumentEvent, kind: DocumentKind, id: &str, actor: &str) {
    log_document_event(event, kind.table(), id, actor, None);
}

/// Account events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountEvent {
    LoginSucceeded,
    LoginFailed,
    LoggedOut,
    UserCreated,
}

impl std::fmt::Display for AccountEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccountEvent::LoginSucceeded => "login_succeeded",
            AccountEvent::LoginFailed => "login_failed",
            AccountEvent::LoggedOut => "logged_out",
            AccountEvent::UserCreated => "user_created",
        };
        write!(f, "{}", s)
    }
}

pub fn log_account_event(event: AccountEvent, username: &str) {
    match event {
        AccountEvent::LoginFailed => {
            warn!(event = %event, username = %username, "Account event occurred")
        }
        _ => info!(event = %event, username = %username, "Account event occurred"),
    }
}

/// Header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Logging middleware that tracks request timing and generates request IDs.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response<Body> {
    let request_id = generate_request_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let start = Instant::now();

    let response = next.run(request).instrument(span.clone()).await;

    let duration = start.elapsed();
    let status = response.status();

    let _enter = span.enter();
    if status.is_server_error() {
        warn!(
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request failed"
        );
    } else {
        info!(
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, header_value);
    }

    Response::from_parts(parts, body)
}

/// Health check response structure.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub service: String,
    pub version: String,
    pub database: DatabaseHealth,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    /// sqlite or postgres
    pub db_type: String,
}

impl HealthResponse {
    pub fn healthy(db_connected: bool, db_type: &str) -> Self {
        Self {
            status: if db_connected { "healthy" } else { "degraded" }.to_string(),
            service: "rto-docs".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: DatabaseHealth {
                connected: db_connected,
                db_type: db_type.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rto-log-{name}-{}", Uuid::new_v4()))
    }

    #[test]
    fn request_id_is_valid_uuid() {
        let id = generate_request_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn health_response_healthy() {
        let health = HealthResponse::healthy(true, "sqlite");
        assert_eq!(health.status, "healthy");
        assert_eq!(health.service, "rto-docs");
        assert!(health.database.connected);
    }

    #[test]
    fn health_response_degraded() {
        let health = HealthResponse::healthy(false, "postgres");
        assert_eq!(health.status, "degraded");
        assert!(!health.database.connected);
    }

    #[test]
    fn daily_file_is_named_by_date() {
        let sink = DailyErrorFile::new("/var/log/rto", 330);
        let name = sink.current_path();
        let name = name.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("error-"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "error-2025-01-01.log".len());
    }

    #[test]
    fn daily_file_appends() {
        let dir = scratch_dir("append");
        let sink = DailyErrorFile::new(&dir, 0);

        sink.make_writer().write_all(b"first\n").unwrap();
        sink.make_writer().write_all(b"second\n").unwrap();

        let contents = fs::read_to_string(sink.current_path()).unwrap();
        assert_eq!(contents, "first\nsecond\n");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn unwritable_file_is_swallowed() {
        let dir = scratch_dir("blocked");
        // a regular file where the directory should be
        fs::write(&dir, b"").unwrap();

        let sink = DailyErrorFile::new(&dir, 0);
        let mut writer = sink.make_writer();
        assert_eq!(writer.write(b"lost\n").unwrap(), 5);
        assert_eq!(writer.write(b"lost\n").unwrap(), 5);
        assert!(sink.reported.load(Ordering::Relaxed));
        fs::remove_file(dir).unwrap();
    }

    #[test]
    fn warnings_reach_the_file_sink() {
        let dir = scratch_dir("levels");
        let sink = DailyErrorFile::new(&dir, 0);
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(sink.clone().with_max_level(Level::WARN))
            .with_max_level(Level::TRACE)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("routine message");
            tracing::warn!("disk almost full");
            tracing::error!("write failed");
        });

        let contents = fs::read_to_string(sink.current_path()).unwrap();
        assert!(!contents.contains("routine message"));
        assert!(contents.contains("disk almost full"));
        assert!(contents.contains("write failed"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn event_labels() {
        assert_eq!(DocumentEvent::StatusRecomputed.to_string(), "status_recomputed");
        assert_eq!(AccountEvent::LoginFailed.to_string(), "login_failed");
    }
}
