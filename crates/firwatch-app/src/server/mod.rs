//! HTTP entrypoints. The router itself lives in `firwatch-server`; this module
//! wires it to the extraction service and the backstop sweep.

use std::sync::Arc;
use std::time::Duration;

pub use firwatch_server::{ServerError, build_api_router, build_router};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::services::{FirwatchService, SweepConfig, spawn_sweeper};

/// Run the HTTP server until shutdown, with the sweep running alongside.
pub async fn serve(config: AppConfig) -> Result<(), AppError> {
    let service = Arc::new(FirwatchService::from_config(&config)?);
    let sweeper = spawn_sweeper(
        service.tracker(),
        service.paths().clone(),
        SweepConfig {
            interval: Duration::from_secs(config.jobs.sweep_interval_secs.max(1)),
            max_age: Duration::from_secs(config.jobs.max_age_secs),
        },
    );

    let result = firwatch_server::serve(config.server.clone(), service).await;
    sweeper.abort();
    result.map_err(AppError::from)
}
