//! `JobService` implementation: validation, admission, background runs and
//! per-job cleanup timers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use firwatch_server::{
    ArtifactHandle, JobService, JobServiceError, JobSnapshot, JobStatus, JobTicket,
    SubmitJobParams,
};
use tokio::fs;

use crate::config::AppConfig;
use crate::districts::DistrictDirectory;
use crate::error::AppError;
use crate::paths::AppPaths;
use crate::pipeline::{
    Extraction, ExtractionSettings, RunError, RunObserver, RunParams, WatchOptions,
    sanitize_segment,
};
use crate::portal::{ChromiumLauncher, LaunchOptions, PortalLauncher};
use crate::services::jobs::{AdmissionError, JobTracker};
use crate::services::reaper::cleanup_job;
use crate::services::validation::SubmissionValidator;

const DOWNLOAD_NAME_DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub completed_ttl: Duration,
    pub failed_ttl: Duration,
    pub max_range_days: i64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            completed_ttl: Duration::from_secs(30 * 60),
            failed_ttl: Duration::from_secs(5 * 60),
            max_range_days: 90,
        }
    }
}

pub struct FirwatchService {
    tracker: Arc<JobTracker>,
    extraction: Arc<Extraction>,
    districts: Arc<DistrictDirectory>,
    paths: AppPaths,
    settings: ServiceSettings,
}

impl FirwatchService {
    pub fn new(
        launcher: Arc<dyn PortalLauncher>,
        extraction: ExtractionSettings,
        districts: DistrictDirectory,
        paths: AppPaths,
        settings: ServiceSettings,
    ) -> Result<Self, RunError> {
        let tracker = Arc::new(JobTracker::new());
        let observer: Arc<dyn RunObserver> = tracker.clone();
        let extraction = Extraction::new(launcher, extraction, paths.clone(), observer)?;
        Ok(Self {
            tracker,
            extraction: Arc::new(extraction),
            districts: Arc::new(districts),
            paths,
            settings,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let paths = AppPaths::new(&config.storage.path)?;
        let districts = DistrictDirectory::load(config.portal.district_file.as_deref())?;
        let launcher: Arc<dyn PortalLauncher> =
            Arc::new(ChromiumLauncher::new(launch_options(config)));
        let settings = ServiceSettings {
            completed_ttl: Duration::from_secs(config.jobs.completed_ttl_secs),
            failed_ttl: Duration::from_secs(config.jobs.failed_ttl_secs),
            max_range_days: config.jobs.max_range_days,
        };
        tracing::info!(
            data_dir = %paths.data_dir().display(),
            districts = districts.len(),
            portal = %config.portal.base_url,
            "job service configured"
        );
        Ok(Self::new(
            launcher,
            extraction_settings(config),
            districts,
            paths,
            settings,
        )?)
    }

    pub fn tracker(&self) -> Arc<JobTracker> {
        self.tracker.clone()
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    fn spawn_run(&self, job_id: String, params: RunParams) {
        let tracker = self.tracker.clone();
        let extraction = self.extraction.clone();
        let paths = self.paths.clone();
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let ttl = match extraction.run(&job_id, &params).await {
                Ok(summary) => {
                    tracker.complete(&job_id, &summary);
                    settings.completed_ttl
                }
                Err(err) => {
                    tracker.fail(&job_id, &err.to_string());
                    settings.failed_ttl
                }
            };

            tokio::time::sleep(ttl).await;
            match cleanup_job(&tracker, &paths, &job_id).await {
                Ok(()) => tracing::info!(job_id = %job_id, "job cleaned up"),
                Err(err) => {
                    tracing::warn!(job_id = %job_id, error = %err, "job cleanup failed");
                }
            }
        });
    }
}

#[async_trait]
impl JobService for FirwatchService {
    async fn submit(&self, params: SubmitJobParams) -> Result<JobTicket, JobServiceError> {
        let run = SubmissionValidator::new(&self.districts, self.settings.max_range_days)
            .validate(&params.from_date, &params.to_date, &params.district_name)?;

        let job_id = self
            .tracker
            .admit(&params.requester, run.clone())
            .map_err(|err| match err {
                AdmissionError::AlreadyActive { job_id } => JobServiceError::already_active(job_id),
            })?;
        tracing::info!(
            job_id = %job_id,
            requester = %params.requester,
            district = %run.district.name,
            "job admitted"
        );

        self.spawn_run(job_id.clone(), run);
        Ok(JobTicket {
            job_id,
            status: JobStatus::Started,
        })
    }

    async fn status(&self, job_id: &str) -> Result<JobSnapshot, JobServiceError> {
        self.tracker
            .snapshot(job_id)
            .ok_or_else(|| JobServiceError::not_found(job_id))
    }

    async fn artifact(&self, job_id: &str) -> Result<ArtifactHandle, JobServiceError> {
        let job = self
            .tracker
            .get(job_id)
            .ok_or_else(|| JobServiceError::not_found(job_id))?;
        if job.status != JobStatus::Completed {
            return Err(JobServiceError::not_completed(job_id));
        }
        let Some(archive) = job.archive else {
            return Err(JobServiceError::gone(job_id));
        };
        if !fs::try_exists(&archive.path).await.unwrap_or(false) {
            return Err(JobServiceError::gone(job_id));
        }
        Ok(ArtifactHandle {
            path: archive.path,
            download_name: archive_download_name(&job.params),
        })
    }

    fn districts(&self) -> Vec<String> {
        self.districts.names()
    }
}

/// `FIR_<DISTRICT>_<dd-mm-yyyy>_to_<dd-mm-yyyy>.zip`
pub fn archive_download_name(params: &RunParams) -> String {
    let district = sanitize_segment(&params.district.name).replace(' ', "_");
    format!(
        "FIR_{district}_{}_to_{}.zip",
        params.from_date.format(DOWNLOAD_NAME_DATE_FORMAT),
        params.to_date.format(DOWNLOAD_NAME_DATE_FORMAT)
    )
}

pub fn launch_options(config: &AppConfig) -> LaunchOptions {
    LaunchOptions::builder()
        .headless(config.portal.headless)
        .sandbox(config.portal.sandbox)
        .maybe_chrome_executable(config.portal.chrome_executable.clone())
        .extra_args(config.portal.launch_args.clone())
        .request_timeout(config.portal.page_load_timeout())
        .build()
}

pub fn extraction_settings(config: &AppConfig) -> ExtractionSettings {
    let downloads = &config.downloads;
    ExtractionSettings::builder()
        .base_url(config.portal.base_url.clone())
        .selectors(config.portal.selectors.clone())
        .page_size(config.portal.page_size)
        .page_timeout(config.portal.page_load_timeout())
        .watch(
            WatchOptions::builder()
                .poll_interval(Duration::from_millis(downloads.poll_interval_ms))
                .stable_checks(downloads.stable_checks)
                .timeout(Duration::from_secs(downloads.timeout_secs))
                .build(),
        )
        .pacing_interval(Duration::from_millis(downloads.pacing_ms))
        .pacing_jitter(Duration::from_millis(downloads.pacing_jitter_ms))
        .max_filename_bytes(downloads.max_filename_bytes)
        .target_phrases(config.portal.target_phrases.clone())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::districts::District;
    use chrono::NaiveDate;

    #[test]
    fn download_name_uses_district_and_dashed_dates() {
        let params = RunParams {
            from_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
            to_date: NaiveDate::from_ymd_opt(2024, 3, 15).expect("date"),
            district: District {
                name: "PUNE CITY".to_string(),
                code: "19393".to_string(),
            },
        };
        assert_eq!(
            archive_download_name(&params),
            "FIR_PUNE_CITY_01-01-2024_to_15-03-2024.zip"
        );
    }
}
