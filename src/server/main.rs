use std::net::SocketAddr;
use std::process::ExitCode;

use tracing::{error, info, warn};

use rto::config::{init_config, RtoConfig};
use rto::errors::{RtoError, RtoResult};
use rto::jobs::run_status_reconciliation;
use rto::server::{bootstrap_admin_from_env, build_router, init_tracing, AppState, Database};

#[cfg(feature = "background-jobs")]
use rto::jobs::{JobConfig, JobScheduler};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match init_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config.logging, config.lifecycle.utc_offset_minutes) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server stopped: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &'static RtoConfig) -> RtoResult<()> {
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    info!("Database ready ({})", db.backend());

    if let Some(admin) = bootstrap_admin_from_env(&db, config.auth.bcrypt_cost).await? {
        info!("Created initial admin {}", admin.username);
    }

    if config.jobs.run_on_startup {
        let today = config.lifecycle.today();
        let reports = run_status_reconciliation(&db, &config.lifecycle, today).await;
        let updated: u64 = reports.iter().map(|r| r.updated).sum();
        info!("Startup status reconciliation updated {} records", updated);
    }

    #[cfg(feature = "background-jobs")]
    let mut scheduler = if config.jobs.enabled {
        let scheduler = JobScheduler::new(
            db.clone(),
            JobConfig::from_config(&config.jobs, &config.lifecycle),
        )
        .await
        .map_err(|e| RtoError::ServerError(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| RtoError::ServerError(e.to_string()))?;
        Some(scheduler)
    } else {
        info!("Background jobs disabled");
        None
    };

    let state = AppState::new(db, config)?;
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| RtoError::ConfigError(format!("invalid bind address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RtoError::ServerError(format!("failed to bind {addr}: {e}")))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RtoError::ServerError(e.to_string()))?;

    #[cfg(feature = "background-jobs")]
    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            warn!("Job scheduler did not stop cleanly: {e}");
        }
    }

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
