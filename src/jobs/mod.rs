//! Background jobs for the document desk.
//!
//! # Available Jobs
//!
//! - **Status Reconciliation**: re-derives the stored status of every
//!   document from its validity end date, once a day and optionally at
//!   startup.
//!
//! The reconciliation routine itself is always available (the admin API can
//! trigger it). The cron scheduler requires the `background-jobs` feature.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rto::jobs::{JobConfig, JobScheduler};
//! use rto::server::Database;
//!
//! let db = Database::connect(&config.database).await?;
//! let scheduler = JobScheduler::new(db, JobConfig::default()).await?;
//! scheduler.start().await?;
//! ```

use crate::config::{JobsConfig, LifecycleConfig};

mod status_reconcile;

pub use status_reconcile::{
    reconcile_document_statuses, run_status_reconciliation, ReconcileReport,
};

#[cfg(feature = "background-jobs")]
pub use scheduler::JobScheduler;

/// Configuration for background jobs.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Cron expression (with seconds) for status reconciliation
    pub status_cron: String,
    /// Windows and offset used to classify records
    pub lifecycle: LifecycleConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::from_config(&JobsConfig::default(), &LifecycleConfig::default())
    }
}

impl JobConfig {
    pub fn from_config(jobs: &JobsConfig, lifecycle: &LifecycleConfig) -> Self {
        Self {
            status_cron: jobs.status_cron.clone(),
            lifecycle: lifecycle.clone(),
        }
    }
}

#[cfg(feature = "background-jobs")]
mod scheduler {
    use std::sync::Arc;

    use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
    use tracing::info;

    use super::{run_status_reconciliation, JobConfig, JobError, ReconcileReport};
    use crate::server::database::Database;

    /// Cron-driven scheduler for background jobs.
    pub struct JobScheduler {
        scheduler: TokioJobScheduler,
        db: Arc<Database>,
        config: JobConfig,
    }

    impl JobScheduler {
        pub async fn new(db: Arc<Database>, config: JobConfig) -> Result<Self, JobError> {
            let scheduler = TokioJobScheduler::new()
                .await
                .map_err(|e| JobError::SchedulerError(e.to_string()))?;

            Ok(Self {
                scheduler,
                db,
                config,
            })
        }

        /// Register all jobs and start ticking.
        pub async fn start(&self) -> Result<(), JobError> {
            info!("Starting job scheduler");

            self.add_status_reconciliation_job().await?;

            self.scheduler
                .start()
                .await
                .map_err(|e| JobError::SchedulerError(e.to_string()))?;

            info!("Job scheduler started");

            Ok(())
        }

        pub async fn shutdown(&mut self) -> Result<(), JobError> {
            info!("Shutting down job scheduler");
            self.scheduler
                .shutdown()
                .await
                .map_err(|e| JobError::SchedulerError(e.to_string()))?;
            Ok(())
        }

        async fn add_status_reconciliation_job(&self) -> Result<(), JobError> {
            let db = Arc::clone(&self.db);
            let lifecycle = self.config.lifecycle.clone();

            let job = Job::new_async(self.config.status_cron.as_str(), move |_uuid, _l| {
                let db = Arc::clone(&db);
                let lifecycle = lifecycle.clone();
                Box::pin(async move {
                    let today = lifecycle.today();
                    info!("Running status reconciliation for {}", today);

                    let reports = run_status_reconciliation(&db, &lifecycle, today).await;
                    let updated: u64 = reports.iter().map(|r| r.updated).sum();
                    info!(
                        "Status reconciliation finished: {} kinds, {} records updated",
                        reports.len(),
                        updated
                    );
                })
            })
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

            self.scheduler
                .add(job)
                .await
                .map_err(|e| JobError::SchedulerError(e.to_string()))?;

            info!(
                "Added status reconciliation job (schedule: {})",
                self.config.status_cron
            );

            Ok(())
        }

        /// Run the reconciliation immediately.
        pub async fn run_status_reconciliation_now(&self) -> Vec<ReconcileReport> {
            let today = self.config.lifecycle.today();
            run_status_reconciliation(&self.db, &self.config.lifecycle, today).await
        }
    }
}

/// Errors that can occur in background jobs.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<crate::errors::RtoError> for JobError {
    fn from(err: crate::errors::RtoError) -> Self {
        JobError::DatabaseError(err.to_string())
    }
}
