//! Persistence for documents, vehicles, transfers and users.
//!
//! Every document kind lives in its own table with the same column layout.
//! The schema is portable between SQLite and PostgreSQL, so every method
//! writes its SQL once with `?` placeholders and [`Database::sql`] rewrites
//! them to `$n` for Postgres.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::{query, query_as, query_scalar, FromRow};
use tracing::{debug, error, info};

#[cfg(feature = "sqlite")]
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

#[cfg(feature = "postgres")]
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::{get_config, DatabaseConfig};
use crate::documents::{DocumentKind, Fees};
use crate::errors::{RtoError, RtoResult};
use crate::lifecycle::{classify, expiring_until, Status};

/// Run `$body` against whichever pool backs `$db`, binding it to `$pool`.
macro_rules! on_pool {
    ($db:expr, $pool:ident => $body:expr) => {
        match $db {
            #[cfg(feature = "sqlite")]
            Database::SQLite($pool) => $body,
            #[cfg(feature = "postgres")]
            Database::Postgres($pool) => $body,
        }
    };
}

/// Bind a list of [`SqlValue`]s onto a query in order.
macro_rules! bind_values {
    ($query:expr, $values:expr) => {{
        let mut q = $query;
        for value in $values {
            q = match value {
                SqlValue::Text(v) => q.bind(v.clone()),
                SqlValue::Date(v) => q.bind(*v),
                SqlValue::Int(v) => q.bind(*v),
                SqlValue::Bool(v) => q.bind(*v),
            };
        }
        q
    }};
}

/// Largest number of ids placed in one `IN (...)` list.
const UPDATE_CHUNK: usize = 500;

const DOCUMENT_COLUMNS: &str = "id, owner_id, vehicle_number, reference_number, issuer, \
     holder_name, mobile, remarks, valid_from, valid_to, total_fee, paid, status, renewed, \
     renewed_by, created_at, updated_at";

const VEHICLE_COLUMNS: &str = "id, owner_id, vehicle_number, owner_name, mobile, \
     chassis_number, engine_number, vehicle_class, created_at, updated_at";

const TRANSFER_COLUMNS: &str = "id, owner_id, vehicle_number, seller_name, buyer_name, \
     buyer_mobile, transfer_date, total_fee, paid, remarks, created_at, updated_at";

// ============================================================================
// Records
// ============================================================================

/// A validity-bearing document of any kind.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub vehicle_number: String,
    pub reference_number: Option<String>,
    pub issuer: Option<String>,
    pub holder_name: Option<String>,
    pub mobile: Option<String>,
    pub remarks: Option<String>,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub total_fee: i64,
    pub paid: i64,
    /// Stored label, correct as of the last write or reconciliation run.
    pub status: String,
    pub renewed: bool,
    pub renewed_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Document {
    pub fn fees(&self) -> Fees {
        Fees::new(self.total_fee, self.paid)
    }

    pub fn balance(&self) -> i64 {
        self.fees().balance()
    }

    /// Status as of `today`, regardless of what is stored.
    pub fn current_status(&self, today: NaiveDate, window_days: u32) -> Status {
        classify(self.valid_to, today, window_days)
    }

    /// Recompute the stored label from `valid_to`.
    pub fn refresh_status(&mut self, today: NaiveDate, window_days: u32) {
        self.status = self.current_status(today, window_days).to_string();
    }
}

/// Minimal projection read by the reconciliation job.
#[derive(Debug, Clone, FromRow)]
pub struct StatusRow {
    pub id: String,
    pub valid_to: NaiveDate,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Vehicle {
    pub id: String,
    pub owner_id: String,
    pub vehicle_number: String,
    pub owner_name: Option<String>,
    pub mobile: Option<String>,
    pub chassis_number: Option<String>,
    pub engine_number: Option<String>,
    pub vehicle_class: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A change of ownership handled by the desk.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct VehicleTransfer {
    pub id: String,
    pub owner_id: String,
    pub vehicle_number: String,
    pub seller_name: String,
    pub buyer_name: String,
    pub buyer_mobile: Option<String>,
    pub transfer_date: NaiveDate,
    pub total_fee: i64,
    pub paid: i64,
    pub remarks: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl VehicleTransfer {
    pub fn balance(&self) -> i64 {
        Fees::new(self.total_fee, self.paid).balance()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: NaiveDateTime,
}

/// Aggregated counts for one document kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct DocumentStatistics {
    pub total: i64,
    pub active: i64,
    pub expiring_soon: i64,
    pub expired: i64,
    pub needs_renewal: i64,
    pub renewed: i64,
    pub pending_count: i64,
    pub pending_balance: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct TransferStatistics {
    pub total: i64,
    pub pending_count: i64,
    pub pending_balance: i64,
}

// ============================================================================
// Query helpers
// ============================================================================

/// A bind parameter for dynamically built queries.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Date(NaiveDate),
    Int(i64),
    Bool(bool),
}

/// 1-based pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    pub const MAX_PER_PAGE: u32 = 100;

    /// Clamp into a usable range (page >= 1, 1 <= per_page <= 100).
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.per_page))
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// Filters for listing documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub owner_id: Option<String>,
    pub vehicle_number: Option<String>,
    /// Matches vehicle number, reference number or holder name.
    pub search: Option<String>,
    /// Evaluated against `valid_to` and today, never against the stored label.
    pub status: Option<Status>,
    /// Expired or expiring records that nobody has renewed yet.
    pub needs_renewal: bool,
    pub renewed: Option<bool>,
}

impl DocumentFilter {
    /// Build the `WHERE` clause (without the keyword) and its bind values.
    pub fn where_clause(&self, today: NaiveDate, window_days: u32) -> (String, Vec<SqlValue>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values = Vec::new();
        let horizon = expiring_until(today, window_days);

        if let Some(owner_id) = &self.owner_id {
            clauses.push("owner_id = ?".to_string());
            values.push(SqlValue::Text(owner_id.clone()));
        }

        if let Some(vehicle_number) = &self.vehicle_number {
            clauses.push("vehicle_number = ?".to_string());
            values.push(SqlValue::Text(vehicle_number.clone()));
        }

        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.to_uppercase());
            clauses.push(
                "(vehicle_number LIKE ? OR UPPER(COALESCE(reference_number, '')) LIKE ? \
                 OR UPPER(COALESCE(holder_name, '')) LIKE ?)"
                    .to_string(),
            );
            for _ in 0..3 {
                values.push(SqlValue::Text(pattern.clone()));
            }
        }

        match self.status {
            Some(Status::Expired) => {
                clauses.push("valid_to < ?".to_string());
                values.push(SqlValue::Date(today));
            }
            Some(Status::ExpiringSoon) => {
                clauses.push("valid_to >= ? AND valid_to <= ?".to_string());
                values.push(SqlValue::Date(today));
                values.push(SqlValue::Date(horizon));
            }
            Some(Status::Active) => {
                clauses.push("valid_to > ?".to_string());
                values.push(SqlValue::Date(horizon));
            }
            // Stored dates are always valid, so nothing is unknown.
            Some(Status::Unknown) => clauses.push("1 = 0".to_string()),
            None => {}
        }

        if self.needs_renewal {
            clauses.push("valid_to <= ? AND renewed = ?".to_string());
            values.push(SqlValue::Date(horizon));
            values.push(SqlValue::Bool(false));
        }

        if let Some(renewed) = self.renewed {
            clauses.push("renewed = ?".to_string());
            values.push(SqlValue::Bool(renewed));
        }

        if clauses.is_empty() {
            ("1 = 1".to_string(), values)
        } else {
            (clauses.join(" AND "), values)
        }
    }
}

/// Build `owner_id = ?` / free-text clauses shared by vehicles and transfers.
fn owner_search_clause(
    owner_id: Option<&str>,
    search: Option<&str>,
    search_columns: &[&str],
) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(owner_id) = owner_id {
        clauses.push("owner_id = ?".to_string());
        values.push(SqlValue::Text(owner_id.to_string()));
    }

    if let Some(search) = search.map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.to_uppercase());
        let ors: Vec<String> = search_columns
            .iter()
            .map(|c| format!("UPPER(COALESCE({c}, '')) LIKE ?"))
            .collect();
        clauses.push(format!("({})", ors.join(" OR ")));
        for _ in search_columns {
            values.push(SqlValue::Text(pattern.clone()));
        }
    }

    if clauses.is_empty() {
        ("1 = 1".to_string(), values)
    } else {
        (clauses.join(" AND "), values)
    }
}

/// Rewrite `?` placeholders as `$1, $2, ...`.
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
fn numbered_placeholders(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 16);
    let mut n = 0;
    for c in raw.chars() {
        if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Map a sqlx error, turning unique violations into a readable conflict.
fn map_db_error(op: &str, e: sqlx::Error, conflict: impl FnOnce() -> String) -> RtoError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            return RtoError::Conflict(conflict());
        }
    }
    error!("{op} failed: {e}");
    RtoError::DatabaseError(format!("{op}: {e}"))
}

fn db_err(op: &'static str) -> impl Fn(sqlx::Error) -> RtoError {
    move |e| map_db_error(op, e, || "record already exists".to_string())
}

fn document_table_ddl(table: &str) -> Vec<String> {
    vec![
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id               TEXT PRIMARY KEY,
                owner_id         TEXT NOT NULL,
                vehicle_number   TEXT NOT NULL,
                reference_number TEXT,
                issuer           TEXT,
                holder_name      TEXT,
                mobile           TEXT,
                remarks          TEXT,
                valid_from       DATE NOT NULL,
                valid_to         DATE NOT NULL,
                total_fee        BIGINT NOT NULL DEFAULT 0,
                paid             BIGINT NOT NULL DEFAULT 0,
                status           TEXT NOT NULL,
                renewed          BOOLEAN NOT NULL DEFAULT FALSE,
                renewed_by       TEXT,
                created_at       TIMESTAMP NOT NULL,
                updated_at       TIMESTAMP NOT NULL
            )
            "#
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_owner ON {table} (owner_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_vehicle ON {table} (vehicle_number)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_valid_to ON {table} (valid_to)"),
    ]
}

const BASE_DDL: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id            TEXT PRIMARY KEY,
        username      TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role          TEXT NOT NULL,
        created_at    TIMESTAMP NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vehicles (
        id             TEXT PRIMARY KEY,
        owner_id       TEXT NOT NULL,
        vehicle_number TEXT NOT NULL,
        owner_name     TEXT,
        mobile         TEXT,
        chassis_number TEXT,
        engine_number  TEXT,
        vehicle_class  TEXT,
        created_at     TIMESTAMP NOT NULL,
        updated_at     TIMESTAMP NOT NULL,
        UNIQUE (owner_id, vehicle_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vehicle_transfers (
        id             TEXT PRIMARY KEY,
        owner_id       TEXT NOT NULL,
        vehicle_number TEXT NOT NULL,
        seller_name    TEXT NOT NULL,
        buyer_name     TEXT NOT NULL,
        buyer_mobile   TEXT,
        transfer_date  DATE NOT NULL,
        total_fee      BIGINT NOT NULL DEFAULT 0,
        paid           BIGINT NOT NULL DEFAULT 0,
        remarks        TEXT,
        created_at     TIMESTAMP NOT NULL,
        updated_at     TIMESTAMP NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_vehicles_owner ON vehicles (owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_vehicle_transfers_owner ON vehicle_transfers (owner_id)",
];

// ============================================================================
// Database
// ============================================================================

/// Unified database abstraction over SQLite and Postgres.
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl Database {
    /// Connect using the global configuration.
    pub async fn new() -> RtoResult<Arc<Self>> {
        let config = get_config()?;
        Self::connect(&config.database).await
    }

    /// Connect using an explicit database configuration.
    pub async fn connect(db_config: &DatabaseConfig) -> RtoResult<Arc<Self>> {
        match db_config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let pool = SqlitePoolOptions::new()
                    .max_connections(db_config.max_connections)
                    .connect(&db_config.sqlite_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to SQLite: {e}");
                        RtoError::DatabaseError(format!("failed to connect to SQLite: {e}"))
                    })?;

                Ok(Arc::new(Database::SQLite(pool)))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(RtoError::ConfigError(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPoolOptions::new()
                    .max_connections(db_config.max_connections)
                    .connect(&db_config.postgres_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to PostgreSQL: {e}");
                        RtoError::DatabaseError(format!("failed to connect to PostgreSQL: {e}"))
                    })?;

                Ok(Arc::new(Database::Postgres(pool)))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(RtoError::ConfigError(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(RtoError::ConfigError(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    /// Backend name, as reported by the health endpoint.
    pub fn backend(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => "postgres",
        }
    }

    /// Adapt `?` placeholders to the backend.
    fn sql(&self, raw: &str) -> String {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => raw.to_string(),
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => numbered_placeholders(raw),
        }
    }

    /// Create every table and index if missing.
    pub async fn run_migrations(&self) -> RtoResult<()> {
        let mut statements: Vec<String> = BASE_DDL.iter().map(|s| s.to_string()).collect();
        for kind in DocumentKind::ALL {
            statements.extend(document_table_ddl(kind.table()));
        }

        for statement in &statements {
            on_pool!(self, pool => {
                query(statement)
                    .execute(pool)
                    .await
                    .map_err(db_err("run_migrations"))?;
            });
        }

        info!("Database schema is up to date ({} statements)", statements.len());
        Ok(())
    }

    /// Cheap connectivity probe.
    pub async fn ping(&self) -> bool {
        on_pool!(self, pool => query("SELECT 1").execute(pool).await.is_ok())
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    pub async fn insert_document(&self, kind: DocumentKind, doc: &Document) -> RtoResult<()> {
        let sql = self.sql(&format!(
            "INSERT INTO {} ({DOCUMENT_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            kind.table()
        ));

        on_pool!(self, pool => {
            query(&sql)
                .bind(&doc.id)
                .bind(&doc.owner_id)
                .bind(&doc.vehicle_number)
                .bind(&doc.reference_number)
                .bind(&doc.issuer)
                .bind(&doc.holder_name)
                .bind(&doc.mobile)
                .bind(&doc.remarks)
                .bind(doc.valid_from)
                .bind(doc.valid_to)
                .bind(doc.total_fee)
                .bind(doc.paid)
                .bind(&doc.status)
                .bind(doc.renewed)
                .bind(&doc.renewed_by)
                .bind(doc.created_at)
                .bind(doc.updated_at)
                .execute(pool)
                .await
                .map_err(db_err("insert_document"))?;
        });

        Ok(())
    }

    /// Fetch a document by id.
    ///
    /// Returns `Ok(None)` when no row matches.
    pub async fn get_document(&self, kind: DocumentKind, id: &str) -> RtoResult<Option<Document>> {
        let sql = self.sql(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM {} WHERE id = ?",
            kind.table()
        ));

        on_pool!(self, pool => {
            query_as::<_, Document>(&sql)
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(db_err("get_document"))
        })
    }

    /// Overwrite every mutable field of an existing document.
    ///
    /// Returns `Ok(false)` when the id does not exist.
    pub async fn update_document(&self, kind: DocumentKind, doc: &Document) -> RtoResult<bool> {
        let sql = self.sql(&format!(
            "UPDATE {} SET vehicle_number = ?, reference_number = ?, issuer = ?, \
             holder_name = ?, mobile = ?, remarks = ?, valid_from = ?, valid_to = ?, \
             total_fee = ?, paid = ?, status = ?, renewed = ?, renewed_by = ?, updated_at = ? \
             WHERE id = ?",
            kind.table()
        ));

        let rows = on_pool!(self, pool => {
            query(&sql)
                .bind(&doc.vehicle_number)
                .bind(&doc.reference_number)
                .bind(&doc.issuer)
                .bind(&doc.holder_name)
                .bind(&doc.mobile)
                .bind(&doc.remarks)
                .bind(doc.valid_from)
                .bind(doc.valid_to)
                .bind(doc.total_fee)
                .bind(doc.paid)
                .bind(&doc.status)
                .bind(doc.renewed)
                .bind(&doc.renewed_by)
                .bind(doc.updated_at)
                .bind(&doc.id)
                .execute(pool)
                .await
                .map_err(db_err("update_document"))?
                .rows_affected()
        });

        Ok(rows > 0)
    }

    pub async fn delete_document(&self, kind: DocumentKind, id: &str) -> RtoResult<bool> {
        let sql = self.sql(&format!("DELETE FROM {} WHERE id = ?", kind.table()));

        let rows = on_pool!(self, pool => {
            query(&sql)
                .bind(id)
                .execute(pool)
                .await
                .map_err(db_err("delete_document"))?
                .rows_affected()
        });

        Ok(rows > 0)
    }

    /// One page of documents matching `filter`, newest first, plus the total
    /// number of matches.
    pub async fn list_documents(
        &self,
        kind: DocumentKind,
        filter: &DocumentFilter,
        today: NaiveDate,
        window_days: u32,
        page: Page,
    ) -> RtoResult<(Vec<Document>, u64)> {
        let total = self
            .count_documents(kind, filter, today, window_days)
            .await?;

        let (where_sql, values) = filter.where_clause(today, window_days);
        let page_sql = self.sql(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM {} WHERE {where_sql} \
             ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            kind.table()
        ));

        let rows = on_pool!(self, pool => {
            bind_values!(query_as::<_, Document>(&page_sql), &values)
                .bind(page.limit())
                .bind(page.offset())
                .fetch_all(pool)
                .await
                .map_err(db_err("list_documents"))?
        });

        Ok((rows, total))
    }

    /// Number of documents matching `filter`.
    pub async fn count_documents(
        &self,
        kind: DocumentKind,
        filter: &DocumentFilter,
        today: NaiveDate,
        window_days: u32,
    ) -> RtoResult<u64> {
        let (where_sql, values) = filter.where_clause(today, window_days);
        let sql = self.sql(&format!(
            "SELECT COUNT(*) FROM {} WHERE {where_sql}",
            kind.table()
        ));

        let count: i64 = on_pool!(self, pool => {
            bind_values!(query_scalar::<_, i64>(&sql), &values)
                .fetch_one(pool)
                .await
                .map_err(db_err("count_documents"))?
        });

        Ok(count.max(0) as u64)
    }

    /// Every document of a kind, oldest first. Used by the export.
    pub async fn all_documents(&self, kind: DocumentKind) -> RtoResult<Vec<Document>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM {} ORDER BY created_at, id",
            kind.table()
        );

        on_pool!(self, pool => {
            query_as::<_, Document>(&sql)
                .fetch_all(pool)
                .await
                .map_err(db_err("all_documents"))
        })
    }

    /// All documents of a kind attached to one vehicle of one owner.
    pub async fn documents_for_vehicle(
        &self,
        kind: DocumentKind,
        owner_id: &str,
        vehicle_number: &str,
    ) -> RtoResult<Vec<Document>> {
        let sql = self.sql(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM {} WHERE owner_id = ? AND vehicle_number = ? \
             ORDER BY valid_to DESC, id",
            kind.table()
        ));

        on_pool!(self, pool => {
            query_as::<_, Document>(&sql)
                .bind(owner_id)
                .bind(vehicle_number)
                .fetch_all(pool)
                .await
                .map_err(db_err("documents_for_vehicle"))
        })
    }

    /// Insert `successor` and flag `previous_id` as renewed in one transaction.
    ///
    /// Returns `Ok(false)` (and writes nothing) when `previous_id` is missing
    /// or was already renewed.
    pub async fn renew_document(
        &self,
        kind: DocumentKind,
        previous_id: &str,
        successor: &Document,
    ) -> RtoResult<bool> {
        let insert_sql = self.sql(&format!(
            "INSERT INTO {} ({DOCUMENT_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            kind.table()
        ));
        let flag_sql = self.sql(&format!(
            "UPDATE {} SET renewed = ?, renewed_by = ?, updated_at = ? \
             WHERE id = ? AND renewed = ?",
            kind.table()
        ));
        let now = Utc::now().naive_utc();

        on_pool!(self, pool => {
            let mut tx = pool.begin().await.map_err(db_err("renew_document"))?;

            let flagged = query(&flag_sql)
                .bind(true)
                .bind(&successor.id)
                .bind(now)
                .bind(previous_id)
                .bind(false)
                .execute(&mut *tx)
                .await
                .map_err(db_err("renew_document"))?
                .rows_affected();

            if flagged == 0 {
                tx.rollback().await.map_err(db_err("renew_document"))?;
                return Ok(false);
            }

            query(&insert_sql)
                .bind(&successor.id)
                .bind(&successor.owner_id)
                .bind(&successor.vehicle_number)
                .bind(&successor.reference_number)
                .bind(&successor.issuer)
                .bind(&successor.holder_name)
                .bind(&successor.mobile)
                .bind(&successor.remarks)
                .bind(successor.valid_from)
                .bind(successor.valid_to)
                .bind(successor.total_fee)
                .bind(successor.paid)
                .bind(&successor.status)
                .bind(successor.renewed)
                .bind(&successor.renewed_by)
                .bind(successor.created_at)
                .bind(successor.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(db_err("renew_document"))?;

            tx.commit().await.map_err(db_err("renew_document"))?;
        });

        Ok(true)
    }

    /// Counts by live status plus outstanding balances.
    pub async fn document_statistics(
        &self,
        kind: DocumentKind,
        owner_id: Option<&str>,
        today: NaiveDate,
        window_days: u32,
    ) -> RtoResult<DocumentStatistics> {
        let horizon = expiring_until(today, window_days);
        let (where_sql, owner_values) = owner_search_clause(owner_id, None, &[]);
        let sql = self.sql(&format!(
            "SELECT \
                COUNT(*) AS total, \
                CAST(COALESCE(SUM(CASE WHEN valid_to > ? THEN 1 ELSE 0 END), 0) AS BIGINT) AS active, \
                CAST(COALESCE(SUM(CASE WHEN valid_to >= ? AND valid_to <= ? THEN 1 ELSE 0 END), 0) AS BIGINT) AS expiring_soon, \
                CAST(COALESCE(SUM(CASE WHEN valid_to < ? THEN 1 ELSE 0 END), 0) AS BIGINT) AS expired, \
                CAST(COALESCE(SUM(CASE WHEN valid_to <= ? AND renewed = ? THEN 1 ELSE 0 END), 0) AS BIGINT) AS needs_renewal, \
                CAST(COALESCE(SUM(CASE WHEN renewed = ? THEN 1 ELSE 0 END), 0) AS BIGINT) AS renewed, \
                CAST(COALESCE(SUM(CASE WHEN total_fee > paid THEN 1 ELSE 0 END), 0) AS BIGINT) AS pending_count, \
                CAST(COALESCE(SUM(CASE WHEN total_fee > paid THEN total_fee - paid ELSE 0 END), 0) AS BIGINT) AS pending_balance \
             FROM {} WHERE {where_sql}",
            kind.table()
        ));

        let mut values = vec![
            SqlValue::Date(horizon),
            SqlValue::Date(today),
            SqlValue::Date(horizon),
            SqlValue::Date(today),
            SqlValue::Date(horizon),
            SqlValue::Bool(false),
            SqlValue::Bool(true),
        ];
        values.extend(owner_values);

        on_pool!(self, pool => {
            bind_values!(query_as::<_, DocumentStatistics>(&sql), &values)
                .fetch_one(pool)
                .await
                .map_err(db_err("document_statistics"))
        })
    }

    /// `(id, valid_to, status)` for every row of a kind.
    pub async fn status_snapshot(&self, kind: DocumentKind) -> RtoResult<Vec<StatusRow>> {
        let sql = format!("SELECT id, valid_to, status FROM {}", kind.table());

        on_pool!(self, pool => {
            query_as::<_, StatusRow>(&sql)
                .fetch_all(pool)
                .await
                .map_err(db_err("status_snapshot"))
        })
    }

    /// Write new status labels in one transaction.
    ///
    /// Ids are grouped by target status so each group becomes a single
    /// `UPDATE ... WHERE id IN (...)` (chunked). Returns the rows touched.
    pub async fn apply_status_updates(
        &self,
        kind: DocumentKind,
        changes: &[(String, Status)],
    ) -> RtoResult<u64> {
        if changes.is_empty() {
            return Ok(0);
        }

        let mut groups: HashMap<Status, Vec<&str>> = HashMap::new();
        for (id, status) in changes {
            groups.entry(*status).or_default().push(id.as_str());
        }

        let mut statements = Vec::new();
        for (status, ids) in &groups {
            for chunk in ids.chunks(UPDATE_CHUNK) {
                let sql = self.sql(&format!(
                    "UPDATE {} SET status = ? WHERE id IN ({})",
                    kind.table(),
                    placeholders(chunk.len())
                ));
                let mut values = vec![SqlValue::Text(status.to_string())];
                values.extend(chunk.iter().map(|id| SqlValue::Text(id.to_string())));
                statements.push((sql, values));
            }
        }

        debug!(
            "Applying {} status changes to {} in {} statements",
            changes.len(),
            kind.table(),
            statements.len()
        );

        on_pool!(self, pool => {
            let mut tx = pool.begin().await.map_err(db_err("apply_status_updates"))?;
            let mut touched = 0;
            for (sql, values) in &statements {
                touched += bind_values!(query(sql), values)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err("apply_status_updates"))?
                    .rows_affected();
            }
            tx.commit().await.map_err(db_err("apply_status_updates"))?;
            Ok(touched)
        })
    }

    // ------------------------------------------------------------------------
    // Vehicles
    // ------------------------------------------------------------------------

    pub async fn insert_vehicle(&self, vehicle: &Vehicle) -> RtoResult<()> {
        let sql = self.sql(&format!(
            "INSERT INTO vehicles ({VEHICLE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ));

        on_pool!(self, pool => {
            query(&sql)
                .bind(&vehicle.id)
                .bind(&vehicle.owner_id)
                .bind(&vehicle.vehicle_number)
                .bind(&vehicle.owner_name)
                .bind(&vehicle.mobile)
                .bind(&vehicle.chassis_number)
                .bind(&vehicle.engine_number)
                .bind(&vehicle.vehicle_class)
                .bind(vehicle.created_at)
                .bind(vehicle.updated_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    map_db_error("insert_vehicle", e, || {
                        format!("vehicle {} is already registered", vehicle.vehicle_number)
                    })
                })?;
        });

        Ok(())
    }

    pub async fn get_vehicle(&self, id: &str) -> RtoResult<Option<Vehicle>> {
        let sql = self.sql(&format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id = ?"));

        on_pool!(self, pool => {
            query_as::<_, Vehicle>(&sql)
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(db_err("get_vehicle"))
        })
    }

    pub async fn update_vehicle(&self, vehicle: &Vehicle) -> RtoResult<bool> {
        let sql = self.sql(
            "UPDATE vehicles SET vehicle_number = ?, owner_name = ?, mobile = ?, \
             chassis_number = ?, engine_number = ?, vehicle_class = ?, updated_at = ? \
             WHERE id = ?",
        );

        let rows = on_pool!(self, pool => {
            query(&sql)
                .bind(&vehicle.vehicle_number)
                .bind(&vehicle.owner_name)
                .bind(&vehicle.mobile)
                .bind(&vehicle.chassis_number)
                .bind(&vehicle.engine_number)
                .bind(&vehicle.vehicle_class)
                .bind(vehicle.updated_at)
                .bind(&vehicle.id)
                .execute(pool)
                .await
                .map_err(|e| {
                    map_db_error("update_vehicle", e, || {
                        format!("vehicle {} is already registered", vehicle.vehicle_number)
                    })
                })?
                .rows_affected()
        });

        Ok(rows > 0)
    }

    pub async fn delete_vehicle(&self, id: &str) -> RtoResult<bool> {
        let sql = self.sql("DELETE FROM vehicles WHERE id = ?");

        let rows = on_pool!(self, pool => {
            query(&sql)
                .bind(id)
                .execute(pool)
                .await
                .map_err(db_err("delete_vehicle"))?
                .rows_affected()
        });

        Ok(rows > 0)
    }

    pub async fn list_vehicles(
        &self,
        owner_id: Option<&str>,
        search: Option<&str>,
        page: Page,
    ) -> RtoResult<(Vec<Vehicle>, u64)> {
        let (where_sql, values) =
            owner_search_clause(owner_id, search, &["vehicle_number", "owner_name", "mobile"]);
        let count_sql = self.sql(&format!("SELECT COUNT(*) FROM vehicles WHERE {where_sql}"));
        let page_sql = self.sql(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE {where_sql} \
             ORDER BY created_at DESC, id LIMIT ? OFFSET ?"
        ));

        on_pool!(self, pool => {
            let total: i64 = bind_values!(query_scalar::<_, i64>(&count_sql), &values)
                .fetch_one(pool)
                .await
                .map_err(db_err("count_vehicles"))?;

            let rows = bind_values!(query_as::<_, Vehicle>(&page_sql), &values)
                .bind(page.limit())
                .bind(page.offset())
                .fetch_all(pool)
                .await
                .map_err(db_err("list_vehicles"))?;

            Ok((rows, total.max(0) as u64))
        })
    }

    pub async fn all_vehicles(&self) -> RtoResult<Vec<Vehicle>> {
        let sql = format!("SELECT {VEHICLE_COLUMNS} FROM vehicles ORDER BY created_at, id");

        on_pool!(self, pool => {
            query_as::<_, Vehicle>(&sql)
                .fetch_all(pool)
                .await
                .map_err(db_err("all_vehicles"))
        })
    }

    // ------------------------------------------------------------------------
    // Vehicle transfers
    // ------------------------------------------------------------------------

    pub async fn insert_transfer(&self, transfer: &VehicleTransfer) -> RtoResult<()> {
        let sql = self.sql(&format!(
            "INSERT INTO vehicle_transfers ({TRANSFER_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ));

        on_pool!(self, pool => {
            query(&sql)
                .bind(&transfer.id)
                .bind(&transfer.owner_id)
                .bind(&transfer.vehicle_number)
                .bind(&transfer.seller_name)
                .bind(&transfer.buyer_name)
                .bind(&transfer.buyer_mobile)
                .bind(transfer.transfer_date)
                .bind(transfer.total_fee)
                .bind(transfer.paid)
                .bind(&transfer.remarks)
                .bind(transfer.created_at)
                .bind(transfer.updated_at)
                .execute(pool)
                .await
                .map_err(db_err("insert_transfer"))?;
        });

        Ok(())
    }

    pub async fn get_transfer(&self, id: &str) -> RtoResult<Option<VehicleTransfer>> {
        let sql = self.sql(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM vehicle_transfers WHERE id = ?"
        ));

        on_pool!(self, pool => {
            query_as::<_, VehicleTransfer>(&sql)
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(db_err("get_transfer"))
        })
    }

    pub async fn update_transfer(&self, transfer: &VehicleTransfer) -> RtoResult<bool> {
        let sql = self.sql(
            "UPDATE vehicle_transfers SET vehicle_number = ?, seller_name = ?, buyer_name = ?, \
             buyer_mobile = ?, transfer_date = ?, total_fee = ?, paid = ?, remarks = ?, \
             updated_at = ? WHERE id = ?",
        );

        let rows = on_pool!(self, pool => {
            query(&sql)
                .bind(&transfer.vehicle_number)
                .bind(&transfer.seller_name)
                .bind(&transfer.buyer_name)
                .bind(&transfer.buyer_mobile)
                .bind(transfer.transfer_date)
                .bind(transfer.total_fee)
                .bind(transfer.paid)
                .bind(&transfer.remarks)
                .bind(transfer.updated_at)
                .bind(&transfer.id)
                .execute(pool)
                .await
                .map_err(db_err("update_transfer"))?
                .rows_affected()
        });

        Ok(rows > 0)
    }

    pub async fn delete_transfer(&self, id: &str) -> RtoResult<bool> {
        let sql = self.sql("DELETE FROM vehicle_transfers WHERE id = ?");

        let rows = on_pool!(self, pool => {
            query(&sql)
                .bind(id)
                .execute(pool)
                .await
                .map_err(db_err("delete_transfer"))?
                .rows_affected()
        });

        Ok(rows > 0)
    }

    pub async fn list_transfers(
        &self,
        owner_id: Option<&str>,
        search: Option<&str>,
        page: Page,
    ) -> RtoResult<(Vec<VehicleTransfer>, u64)> {
        let (where_sql, values) = owner_search_clause(
            owner_id,
            search,
            &["vehicle_number", "seller_name", "buyer_name"],
        );
        let count_sql = self.sql(&format!(
            "SELECT COUNT(*) FROM vehicle_transfers WHERE {where_sql}"
        ));
        let page_sql = self.sql(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM vehicle_transfers WHERE {where_sql} \
             ORDER BY transfer_date DESC, id LIMIT ? OFFSET ?"
        ));

        on_pool!(self, pool => {
            let total: i64 = bind_values!(query_scalar::<_, i64>(&count_sql), &values)
                .fetch_one(pool)
                .await
                .map_err(db_err("count_transfers"))?;

            let rows = bind_values!(query_as::<_, VehicleTransfer>(&page_sql), &values)
                .bind(page.limit())
                .bind(page.offset())
                .fetch_all(pool)
                .await
                .map_err(db_err("list_transfers"))?;

            Ok((rows, total.max(0) as u64))
        })
    }

    pub async fn all_transfers(&self) -> RtoResult<Vec<VehicleTransfer>> {
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM vehicle_transfers ORDER BY created_at, id"
        );

        on_pool!(self, pool => {
            query_as::<_, VehicleTransfer>(&sql)
                .fetch_all(pool)
                .await
                .map_err(db_err("all_transfers"))
        })
    }

    pub async fn transfer_statistics(&self, owner_id: Option<&str>) -> RtoResult<TransferStatistics> {
        let (where_sql, values) = owner_search_clause(owner_id, None, &[]);
        let sql = self.sql(&format!(
            "SELECT \
                COUNT(*) AS total, \
                CAST(COALESCE(SUM(CASE WHEN total_fee > paid THEN 1 ELSE 0 END), 0) AS BIGINT) AS pending_count, \
                CAST(COALESCE(SUM(CASE WHEN total_fee > paid THEN total_fee - paid ELSE 0 END), 0) AS BIGINT) AS pending_balance \
             FROM vehicle_transfers WHERE {where_sql}"
        ));

        on_pool!(self, pool => {
            bind_values!(query_as::<_, TransferStatistics>(&sql), &values)
                .fetch_one(pool)
                .await
                .map_err(db_err("transfer_statistics"))
        })
    }

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    pub async fn create_user(&self, user: &User) -> RtoResult<()> {
        let sql = self.sql(
            "INSERT INTO users (id, username, password_hash, role, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        );

        on_pool!(self, pool => {
            query(&sql)
                .bind(&user.id)
                .bind(&user.username)
                .bind(&user.password_hash)
                .bind(&user.role)
                .bind(user.created_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    map_db_error("create_user", e, || {
                        format!("username '{}' is already taken", user.username)
                    })
                })?;
        });

        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> RtoResult<Option<User>> {
        let sql = self.sql(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE id = ?",
        );

        on_pool!(self, pool => {
            query_as::<_, User>(&sql)
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(db_err("get_user"))
        })
    }

    pub async fn get_user_by_username(&self, username: &str) -> RtoResult<Option<User>> {
        let sql = self.sql(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE username = ?",
        );

        on_pool!(self, pool => {
            query_as::<_, User>(&sql)
                .bind(username)
                .fetch_optional(pool)
                .await
                .map_err(db_err("get_user_by_username"))
        })
    }

    pub async fn list_users(&self) -> RtoResult<Vec<User>> {
        let sql = "SELECT id, username, password_hash, role, created_at FROM users \
                   ORDER BY username";

        on_pool!(self, pool => {
            query_as::<_, User>(sql)
                .fetch_all(pool)
                .await
                .map_err(db_err("list_users"))
        })
    }

    pub async fn count_users(&self) -> RtoResult<u64> {
        let count: i64 = on_pool!(self, pool => {
            query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
                .fetch_one(pool)
                .await
                .map_err(db_err("count_users"))?
        });

        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn numbered_placeholders_rewrites_in_order() {
        assert_eq!(
            numbered_placeholders("UPDATE t SET a = ? WHERE id IN (?, ?)"),
            "UPDATE t SET a = $1 WHERE id IN ($2, $3)"
        );
        assert_eq!(numbered_placeholders("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn placeholder_list() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(1), "?");
    }

    #[test]
    fn empty_filter_matches_everything() {
        let (sql, values) = DocumentFilter::default().where_clause(date(2025, 1, 1), 15);
        assert_eq!(sql, "1 = 1");
        assert!(values.is_empty());
    }

    #[test]
    fn status_filter_uses_date_ranges() {
        let today = date(2025, 1, 1);
        let filter = DocumentFilter {
            status: Some(Status::ExpiringSoon),
            ..Default::default()
        };
        let (sql, values) = filter.where_clause(today, 15);
        assert_eq!(sql, "valid_to >= ? AND valid_to <= ?");
        assert_eq!(
            values,
            vec![SqlValue::Date(today), SqlValue::Date(date(2025, 1, 16))]
        );
    }

    #[test]
    fn combined_filter_orders_binds_with_clauses() {
        let filter = DocumentFilter {
            owner_id: Some("u1".to_string()),
            search: Some("cg04".to_string()),
            needs_renewal: true,
            ..Default::default()
        };
        let (sql, values) = filter.where_clause(date(2025, 1, 1), 30);
        assert!(sql.starts_with("owner_id = ? AND (vehicle_number LIKE ?"));
        assert!(sql.ends_with("valid_to <= ? AND renewed = ?"));
        assert_eq!(values.len(), 1 + 3 + 2);
        assert_eq!(values[1], SqlValue::Text("%CG04%".to_string()));
        assert_eq!(values[4], SqlValue::Date(date(2025, 1, 31)));
        assert_eq!(values[5], SqlValue::Bool(false));
    }

    #[test]
    fn unknown_status_filter_matches_nothing() {
        let filter = DocumentFilter {
            status: Some(Status::Unknown),
            ..Default::default()
        };
        let (sql, values) = filter.where_clause(date(2025, 1, 1), 15);
        assert_eq!(sql, "1 = 0");
        assert!(values.is_empty());
    }

    #[test]
    fn blank_search_is_ignored() {
        let (sql, values) = owner_search_clause(None, Some("   "), &["a", "b"]);
        assert_eq!(sql, "1 = 1");
        assert!(values.is_empty());
    }

    #[test]
    fn page_clamps_and_computes_offsets() {
        let page = Page::new(0, 500);
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, Page::MAX_PER_PAGE);
        assert_eq!(page.offset(), 0);

        let page = Page::new(3, 20);
        assert_eq!(page.offset(), 40);
        assert_eq!(page.limit(), 20);
        assert_eq!(page.total_pages(41), 3);
        assert_eq!(page.total_pages(0), 0);
    }

    #[test]
    fn document_refresh_status_tracks_valid_to() {
        let now = Utc::now().naive_utc();
        let mut doc = Document {
            id: "d1".to_string(),
            owner_id: "u1".to_string(),
            vehicle_number: "CG04AB1234".to_string(),
            reference_number: None,
            issuer: None,
            holder_name: None,
            mobile: None,
            remarks: None,
            valid_from: date(2024, 1, 1),
            valid_to: date(2025, 1, 10),
            total_fee: 1200,
            paid: 700,
            status: "active".to_string(),
            renewed: false,
            renewed_by: None,
            created_at: now,
            updated_at: now,
        };

        doc.refresh_status(date(2025, 1, 1), 15);
        assert_eq!(doc.status, "expiring_soon");
        assert_eq!(doc.balance(), 500);

        doc.refresh_status(date(2025, 2, 1), 15);
        assert_eq!(doc.status, "expired");
    }
}
