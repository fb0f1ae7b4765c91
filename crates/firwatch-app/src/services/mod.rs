//! Orchestration layer around the pipeline: job bookkeeping, archive
//! packaging, cleanup and the `JobService` the HTTP layer talks to.

pub mod archive;
pub mod jobs;
pub mod reaper;
pub mod service;
pub mod validation;

pub use archive::{ArchiveError, ArchiveInfo, write_archive};
pub use jobs::{AdmissionError, Job, JobProgress, JobTracker, current_timestamp_ms};
pub use reaper::{
    ReaperError, SweepConfig, SweepReport, cleanup_job, remove_job_artifacts, spawn_sweeper,
    sweep,
};
pub use service::{
    FirwatchService, ServiceSettings, archive_download_name, extraction_settings, launch_options,
};
pub use validation::{DEFAULT_MAX_RANGE_DAYS, SubmissionValidator, ValidationError, parse_date};
