//! Integration tests for status reconciliation.

#![cfg(feature = "sqlite")]

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rto::config::LifecycleConfig;
use rto::documents::DocumentKind;
use rto::jobs::{reconcile_document_statuses, run_status_reconciliation};
use rto::server::database::{Database, Document};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

/// Helper to create a migrated in-memory database.
async fn setup_test_db() -> Arc<Database> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");

    let db = Arc::new(Database::SQLite(pool));
    db.run_migrations().await.expect("migrations failed");
    db
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

/// A document whose stored label is `stored`, regardless of its dates.
fn stale_document(valid_to: NaiveDate, stored: &str) -> Document {
    let now = Utc::now().naive_utc();
    Document {
        id: Uuid::new_v4().to_string(),
        owner_id: "u1".to_string(),
        vehicle_number: "MH12AB1234".to_string(),
        reference_number: None,
        issuer: None,
        holder_name: None,
        mobile: None,
        remarks: None,
        valid_from: valid_to - Duration::days(180),
        valid_to,
        total_fee: 0,
        paid: 0,
        status: stored.to_string(),
        renewed: false,
        renewed_by: None,
        created_at: now,
        updated_at: now,
    }
}

async fn stored_status(db: &Database, kind: DocumentKind, id: &str) -> String {
    db.get_document(kind, id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn reconcile_rewrites_only_stale_labels() {
    let db = setup_test_db().await;
    let kind = DocumentKind::Puc;

    let expired = stale_document(NaiveDate::from_ymd_opt(2024, 12, 10).unwrap(), "active");
    let soon = stale_document(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(), "active");
    let active = stale_document(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), "active");
    for doc in [&expired, &soon, &active] {
        db.insert_document(kind, doc).await.unwrap();
    }

    let report = reconcile_document_statuses(&db, kind, today(), 15)
        .await
        .unwrap();

    assert_eq!(report.kind, kind);
    assert_eq!(report.scanned, 3);
    assert_eq!(report.updated, 2);
    assert_eq!(stored_status(&db, kind, &expired.id).await, "expired");
    assert_eq!(stored_status(&db, kind, &soon.id).await, "expiring_soon");
    assert_eq!(stored_status(&db, kind, &active.id).await, "active");
}

#[tokio::test]
async fn second_run_writes_nothing() {
    let db = setup_test_db().await;
    let kind = DocumentKind::Insurance;
    for offset in [-30, -1, 0, 10, 30, 31, 400] {
        let doc = stale_document(today() + Duration::days(offset), "active");
        db.insert_document(kind, &doc).await.unwrap();
    }

    let first = reconcile_document_statuses(&db, kind, today(), 30)
        .await
        .unwrap();
    let second = reconcile_document_statuses(&db, kind, today(), 30)
        .await
        .unwrap();

    // -30, -1 expired; 0, 10, 30 expiring; 31 and 400 stay active
    assert_eq!(first.updated, 5);
    assert_eq!(second.scanned, 7);
    assert_eq!(second.updated, 0);
}

#[tokio::test]
async fn window_boundary_is_inclusive() {
    let db = setup_test_db().await;
    let kind = DocumentKind::Tax;
    let last_day = stale_document(today() + Duration::days(15), "active");
    let day_after = stale_document(today() + Duration::days(16), "expiring_soon");
    let today_doc = stale_document(today(), "expired");
    for doc in [&last_day, &day_after, &today_doc] {
        db.insert_document(kind, doc).await.unwrap();
    }

    reconcile_document_statuses(&db, kind, today(), 15)
        .await
        .unwrap();

    assert_eq!(stored_status(&db, kind, &last_day.id).await, "expiring_soon");
    assert_eq!(stored_status(&db, kind, &day_after.id).await, "active");
    assert_eq!(stored_status(&db, kind, &today_doc.id).await, "expiring_soon");
}

#[tokio::test]
async fn run_covers_every_kind_with_its_own_window() {
    let db = setup_test_db().await;
    let lifecycle = LifecycleConfig::default();

    // 20 days out: inside the 30-day windows, outside the 15-day ones
    let valid_to = today() + Duration::days(20);
    let mut ids = Vec::new();
    for kind in DocumentKind::ALL {
        let doc = stale_document(valid_to, "unknown");
        db.insert_document(kind, &doc).await.unwrap();
        ids.push((kind, doc.id));
    }

    let reports = run_status_reconciliation(&db, &lifecycle, today()).await;
    assert_eq!(reports.len(), DocumentKind::ALL.len());
    assert!(reports.iter().all(|r| r.scanned == 1 && r.updated == 1));

    for (kind, id) in ids {
        let expected = if lifecycle.window_days(kind) >= 20 {
            "expiring_soon"
        } else {
            "active"
        };
        assert_eq!(stored_status(&db, kind, &id).await, expected, "{kind}");
    }

    let again = run_status_reconciliation(&db, &lifecycle, today()).await;
    assert_eq!(again.iter().map(|r| r.updated).sum::<u64>(), 0);
}

#[tokio::test]
async fn empty_tables_reconcile_cleanly() {
    let db = setup_test_db().await;
    let reports = run_status_reconciliation(&db, &LifecycleConfig::default(), today()).await;

    assert_eq!(reports.len(), DocumentKind::ALL.len());
    assert!(reports.iter().all(|r| r.scanned == 0 && r.updated == 0));
}

#[tokio::test]
async fn large_batches_are_chunked() {
    let db = setup_test_db().await;
    let kind = DocumentKind::Fitness;
    let expired_on = today() - Duration::days(2);
    for _ in 0..1200 {
        db.insert_document(kind, &stale_document(expired_on, "active"))
            .await
            .unwrap();
    }

    let report = reconcile_document_statuses(&db, kind, today(), 30)
        .await
        .unwrap();
    assert_eq!(report.updated, 1200);

    let snapshot = db.status_snapshot(kind).await.unwrap();
    assert!(snapshot.iter().all(|row| row.status == "expired"));
}

#[cfg(feature = "background-jobs")]
#[tokio::test]
async fn scheduler_runs_on_demand() {
    use rto::jobs::{JobConfig, JobScheduler};

    let db = setup_test_db().await;
    let doc = stale_document(today() - Duration::days(400), "active");
    db.insert_document(DocumentKind::NationalPermit, &doc)
        .await
        .unwrap();

    let scheduler = JobScheduler::new(Arc::clone(&db), JobConfig::default())
        .await
        .expect("scheduler should build");
    let reports = scheduler.run_status_reconciliation_now().await;

    assert_eq!(reports.iter().map(|r| r.updated).sum::<u64>(), 1);
    assert_eq!(
        stored_status(&db, DocumentKind::NationalPermit, &doc.id).await,
        "expired"
    );
}
