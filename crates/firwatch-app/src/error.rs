//! Application-level error type shared across the binary and services.

use std::path::PathBuf;

use thiserror::Error;

use crate::config;
use crate::districts::DistrictError;
use crate::paths::PathError;
use crate::pipeline::RunError;
use crate::server;
use crate::services::reaper::ReaperError;
use crate::services::validation::ValidationError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] config::AppConfigError),
    #[error(transparent)]
    Server(#[from] server::ServerError),
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error(transparent)]
    Districts(#[from] DistrictError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Reaper(#[from] ReaperError),
    #[error("failed to copy archive to {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to resolve current working directory: {0}")]
    WorkingDir(#[source] std::io::Error),
}
