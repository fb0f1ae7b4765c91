//! In-memory job registry: admission, progress accounting, terminal states.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use firwatch_server::{EndReason, JobSnapshot, JobStatus};
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::{PORTAL_DATE_FORMAT, RunEvent, RunObserver, RunParams, RunState, RunSummary};
use crate::services::archive::ArchiveInfo;

pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("requester already has job `{job_id}` in progress")]
    AlreadyActive { job_id: String },
}

/// Monotonic run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub current_page: u64,
    pub files_downloaded: u64,
    pub rows_scanned: u64,
    pub rows_matched: u64,
    pub rows_skipped: u64,
    pub total_records: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
    pub requester: String,
    pub params: RunParams,
    pub progress: JobProgress,
    pub end_reason: Option<EndReason>,
    pub archive: Option<ArchiveInfo>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub completed_at_ms: Option<i64>,
    started: Instant,
}

impl Job {
    fn new(job_id: String, requester: String, params: RunParams) -> Self {
        let now = current_timestamp_ms();
        Self {
            job_id,
            status: JobStatus::Started,
            message: "queued".to_string(),
            requester,
            params,
            progress: JobProgress::default(),
            end_reason: None,
            archive: None,
            created_at_ms: now,
            updated_at_ms: now,
            completed_at_ms: None,
            started: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.updated_at_ms = current_timestamp_ms().max(self.updated_at_ms);
    }

    fn apply(&mut self, event: &RunEvent) {
        let progress = &mut self.progress;
        match event {
            RunEvent::State(state) => {
                if let RunState::Paging(page) = state {
                    progress.current_page = progress.current_page.max(*page);
                }
                // Terminal messages are written by `complete` / `fail`.
                if !matches!(state, RunState::Done | RunState::Failed) {
                    self.message = state.to_string();
                }
            }
            RunEvent::TotalRecords(total) => {
                progress.total_records = Some(*total);
            }
            RunEvent::RowScanned { matched, .. } => {
                progress.rows_scanned += 1;
                if *matched {
                    progress.rows_matched += 1;
                }
            }
            RunEvent::FileSaved { page, file_name } => {
                progress.files_downloaded += 1;
                self.message = format!("page {page}: saved {file_name}");
            }
            RunEvent::RowSkipped { page, reason } => {
                progress.rows_skipped += 1;
                self.message = format!("page {page}: skipped row ({reason})");
            }
            RunEvent::Ended(reason) => {
                self.end_reason = Some(*reason);
            }
        }
        self.touch();
    }

    fn files_per_minute(&self) -> Option<f64> {
        let minutes = self.started.elapsed().as_secs_f64() / 60.0;
        if self.progress.files_downloaded == 0 || minutes <= 0.0 {
            return None;
        }
        Some(self.progress.files_downloaded as f64 / minutes)
    }

    /// Remaining rows divided by the observed row rate.
    fn eta_seconds(&self) -> Option<u64> {
        if self.status != JobStatus::Started {
            return None;
        }
        let total = self.progress.total_records?;
        let scanned = self.progress.rows_scanned;
        let elapsed = self.started.elapsed().as_secs_f64();
        if scanned == 0 || elapsed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(scanned) as f64;
        Some((remaining * elapsed / scanned as f64).round() as u64)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            status: self.status,
            message: self.message.clone(),
            from_date: self.params.from_date.format(PORTAL_DATE_FORMAT).to_string(),
            to_date: self.params.to_date.format(PORTAL_DATE_FORMAT).to_string(),
            district_name: self.params.district.name.clone(),
            files_downloaded: self.progress.files_downloaded,
            current_page: self.progress.current_page,
            rows_scanned: self.progress.rows_scanned,
            rows_matched: self.progress.rows_matched,
            rows_skipped: self.progress.rows_skipped,
            files_per_minute: self.files_per_minute(),
            eta_seconds: self.eta_seconds(),
            end_reason: self.end_reason,
            download_ready: self.status == JobStatus::Completed && self.archive.is_some(),
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
            completed_at_ms: self.completed_at_ms,
        }
    }
}

/// Owns every job record. All mutation goes through these methods; the map
/// lock is never held across an await point.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new job unless `requester` already has one running.
    pub fn admit(&self, requester: &str, params: RunParams) -> Result<String, AdmissionError> {
        let mut jobs = self.lock();
        if let Some(active) = jobs
            .values()
            .find(|job| job.requester == requester && job.status == JobStatus::Started)
        {
            return Err(AdmissionError::AlreadyActive {
                job_id: active.job_id.clone(),
            });
        }
        let job_id = Uuid::new_v4().to_string();
        jobs.insert(
            job_id.clone(),
            Job::new(job_id.clone(), requester.to_string(), params),
        );
        Ok(job_id)
    }

    /// Events for unknown or finished jobs are dropped.
    pub fn record_event(&self, job_id: &str, event: &RunEvent) {
        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(job_id) {
            if job.status == JobStatus::Started {
                job.apply(event);
            }
        }
    }

    /// Move a running job to `completed`. Returns false when the job is
    /// unknown or already terminal.
    pub fn complete(&self, job_id: &str, summary: &RunSummary) -> bool {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            return false;
        };
        if job.status != JobStatus::Started {
            return false;
        }
        job.status = JobStatus::Completed;
        job.end_reason = Some(summary.end_reason);
        job.archive = Some(summary.archive.clone());
        job.progress.files_downloaded = job.progress.files_downloaded.max(summary.files_downloaded);
        job.message = format!(
            "completed: {} file(s) from {} page(s), {} row(s) skipped",
            summary.files_downloaded, summary.pages_visited, summary.rows_skipped
        );
        job.touch();
        job.completed_at_ms = Some(job.updated_at_ms);
        true
    }

    pub fn fail(&self, job_id: &str, reason: &str) -> bool {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            return false;
        };
        if job.status != JobStatus::Started {
            return false;
        }
        job.status = JobStatus::Failed;
        job.message = format!("failed: {reason}");
        job.touch();
        job.completed_at_ms = Some(job.updated_at_ms);
        true
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.lock().get(job_id).cloned()
    }

    pub fn snapshot(&self, job_id: &str) -> Option<JobSnapshot> {
        self.lock().get(job_id).map(Job::snapshot)
    }

    pub fn remove(&self, job_id: &str) -> Option<Job> {
        self.lock().remove(job_id)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    /// Jobs created before `cutoff_ms`, regardless of status.
    pub fn created_before(&self, cutoff_ms: i64) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .values()
            .filter(|job| job.created_at_ms < cutoff_ms)
            .map(|job| job.job_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl RunObserver for JobTracker {
    fn on_event(&self, job_id: &str, event: RunEvent) {
        self.record_event(job_id, &event);
    }
}
