//! Status reconciliation job.
//!
//! Stored status labels drift as days pass. This job re-derives the label of
//! every record from its `valid_to` and writes back only the rows whose label
//! changed, in one transaction per document kind.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::LifecycleConfig;
use crate::documents::DocumentKind;
use crate::lifecycle::{classify, Status};
use crate::server::database::Database;
use crate::server::logging::{log_document_event, DocumentEvent};

use super::JobError;

/// Outcome of reconciling one document kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub kind: DocumentKind,
    pub scanned: usize,
    pub updated: u64,
}

/// Recompute stored statuses for every record of `kind`.
///
/// Rows whose stored label already matches are left untouched, so a second
/// run on the same day writes nothing.
pub async fn reconcile_document_statuses(
    db: &Database,
    kind: DocumentKind,
    today: NaiveDate,
    window_days: u32,
) -> Result<ReconcileReport, JobError> {
    let rows = db.status_snapshot(kind).await?;
    let scanned = rows.len();

    let changes: Vec<(String, Status)> = rows
        .into_iter()
        .filter_map(|row| {
            let status = classify(row.valid_to, today, window_days);
            (row.status != status.as_str()).then_some((row.id, status))
        })
        .collect();

    debug!(
        "{}: {} of {} records need a new status",
        kind,
        changes.len(),
        scanned
    );

    let updated = db.apply_status_updates(kind, &changes).await?;
    for (id, status) in &changes {
        log_document_event(
            DocumentEvent::StatusRecomputed,
            kind.table(),
            id,
            "status-reconciliation",
            Some(status.as_str()),
        );
    }

    Ok(ReconcileReport {
        kind,
        scanned,
        updated,
    })
}

/// Reconcile every document kind.
///
/// A failure in one kind is logged and does not stop the others; only
/// successful kinds appear in the returned reports.
pub async fn run_status_reconciliation(
    db: &Database,
    lifecycle: &LifecycleConfig,
    today: NaiveDate,
) -> Vec<ReconcileReport> {
    let mut reports = Vec::with_capacity(DocumentKind::ALL.len());

    for kind in DocumentKind::ALL {
        match reconcile_document_statuses(db, kind, today, lifecycle.window_days(kind)).await {
            Ok(report) => {
                if report.updated > 0 {
                    info!(
                        kind = %kind,
                        scanned = report.scanned,
                        updated = report.updated,
                        "Status reconciliation updated records"
                    );
                }
                reports.push(report);
            }
            Err(e) => {
                error!("Status reconciliation for {} failed: {}", kind, e);
            }
        }
    }

    reports
}
