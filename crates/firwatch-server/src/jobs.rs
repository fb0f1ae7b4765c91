//! Contract between the HTTP layer and whatever runs extraction jobs.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle of a job. A job is implicitly running while `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Why the page loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The portal offered no further pager control.
    Exhausted,
    /// The first row of a page repeated an earlier page; the pager reset.
    LoopDetected,
    /// The search itself reported no matching records.
    NoRecords,
}

/// Raw submission as received from a client; validated by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitJobParams {
    pub from_date: String,
    pub to_date: String,
    pub district_name: String,
    pub requester: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobTicket {
    pub job_id: String,
    pub status: JobStatus,
}

/// Point-in-time view of a job returned by status polling.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
    pub from_date: String,
    pub to_date: String,
    pub district_name: String,
    pub files_downloaded: u64,
    pub current_page: u64,
    pub rows_scanned: u64,
    pub rows_matched: u64,
    pub rows_skipped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_per_minute: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    pub download_ready: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<i64>,
}

/// Location of a finished archive plus the name clients should save it as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub path: PathBuf,
    pub download_name: String,
}

#[async_trait]
pub trait JobService: Send + Sync + 'static {
    async fn submit(&self, params: SubmitJobParams) -> Result<JobTicket, JobServiceError>;
    async fn status(&self, job_id: &str) -> Result<JobSnapshot, JobServiceError>;
    async fn artifact(&self, job_id: &str) -> Result<ArtifactHandle, JobServiceError>;
    fn districts(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct JobServiceError {
    pub kind: JobServiceErrorKind,
    pub message: String,
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobServiceErrorKind {
    InvalidParameter,
    InvalidRange,
    UnknownDistrict,
    AlreadyActive { job_id: String },
    NotFound,
    NotCompleted,
    Gone,
    Internal,
}

impl JobServiceError {
    fn new(kind: JobServiceErrorKind, message: impl Into<String>) -> Self {
        JobServiceError {
            kind,
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_param(field: impl Into<String>, message: impl Into<String>) -> Self {
        JobServiceError {
            kind: JobServiceErrorKind::InvalidParameter,
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        let mut error = Self::new(JobServiceErrorKind::InvalidRange, message);
        error.field = Some("toDate".to_string());
        error
    }

    pub fn unknown_district(name: &str) -> Self {
        let mut error = Self::new(
            JobServiceErrorKind::UnknownDistrict,
            format!("district `{name}` is not recognised"),
        );
        error.field = Some("districtName".to_string());
        error
    }

    pub fn already_active(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self::new(
            JobServiceErrorKind::AlreadyActive {
                job_id: job_id.clone(),
            },
            format!("requester already has job `{job_id}` in progress"),
        )
    }

    pub fn not_found(job_id: &str) -> Self {
        Self::new(
            JobServiceErrorKind::NotFound,
            format!("job `{job_id}` not found"),
        )
    }

    pub fn not_completed(job_id: &str) -> Self {
        Self::new(
            JobServiceErrorKind::NotCompleted,
            format!("job `{job_id}` has not completed"),
        )
    }

    pub fn gone(job_id: &str) -> Self {
        Self::new(
            JobServiceErrorKind::Gone,
            format!("archive for job `{job_id}` has been cleaned up"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(JobServiceErrorKind::Internal, message)
    }
}

impl fmt::Display for JobServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for JobServiceError {}
