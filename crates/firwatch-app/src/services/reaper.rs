//! Job cleanup: per-job artifact removal and the periodic backstop sweep.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::task::JoinHandle;

use crate::paths::{AppPaths, PathError};
use crate::services::jobs::{JobTracker, current_timestamp_ms};

/// Configuration for the backstop sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Anything older than this is removed, whatever its status.
    pub max_age: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2 * 60 * 60),
            max_age: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Tracked jobs removed together with their artifacts.
    pub jobs_removed: Vec<String>,
    /// Untracked job directories deleted from disk.
    pub orphan_dirs: usize,
    /// Untracked archives (including partial writes) deleted from disk.
    pub orphan_archives: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.jobs_removed.is_empty() && self.orphan_dirs == 0 && self.orphan_archives == 0
    }
}

#[derive(Debug, Error)]
pub enum ReaperError {
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error("cleanup failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Delete a job's output directory and archive. Missing pieces are fine.
pub async fn remove_job_artifacts(paths: &AppPaths, job_id: &str) -> Result<(), ReaperError> {
    let dir = paths.job_dir(job_id);
    match fs::remove_dir_all(&dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(source) => return Err(ReaperError::Io { path: dir, source }),
    }
    let archive = paths.archive_path(job_id);
    remove_file_if_present(&archive).await
}

/// Forget a job and delete its artifacts.
pub async fn cleanup_job(
    tracker: &JobTracker,
    paths: &AppPaths,
    job_id: &str,
) -> Result<(), ReaperError> {
    tracker.remove(job_id);
    remove_job_artifacts(paths, job_id).await
}

/// Remove tracked jobs older than `max_age`, then on-disk leftovers of the
/// same age that no tracked job owns.
pub async fn sweep(
    tracker: &JobTracker,
    paths: &AppPaths,
    max_age: Duration,
) -> Result<SweepReport, ReaperError> {
    let mut report = SweepReport::default();

    let cutoff_ms = current_timestamp_ms() - max_age.as_millis() as i64;
    for job_id in tracker.created_before(cutoff_ms) {
        cleanup_job(tracker, paths, &job_id).await?;
        tracing::info!(job_id = %job_id, stage = "sweep", "removed expired job");
        report.jobs_removed.push(job_id);
    }

    let jobs_dir = paths.jobs_dir()?;
    for (name, path, is_dir) in stale_entries(&jobs_dir, max_age).await? {
        if !is_dir || tracker.contains(&name) {
            continue;
        }
        match fs::remove_dir_all(&path).await {
            Ok(()) => report.orphan_dirs += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(ReaperError::Io { path, source }),
        }
    }

    let archives_dir = paths.archives_dir()?;
    for (name, path, is_dir) in stale_entries(&archives_dir, max_age).await? {
        let owner = name.split('.').next().unwrap_or_default();
        if is_dir || tracker.contains(owner) {
            continue;
        }
        remove_file_if_present(&path).await?;
        report.orphan_archives += 1;
    }

    if !report.is_empty() {
        tracing::info!(
            jobs = report.jobs_removed.len(),
            orphan_dirs = report.orphan_dirs,
            orphan_archives = report.orphan_archives,
            "sweep finished"
        );
    }
    Ok(report)
}

/// Run [`sweep`] every `config.interval` until the task is aborted.
pub fn spawn_sweeper(
    tracker: Arc<JobTracker>,
    paths: AppPaths,
    config: SweepConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = sweep(&tracker, &paths, config.max_age).await {
                tracing::warn!(error = %err, "backstop sweep failed");
            }
        }
    })
}

async fn stale_entries(
    dir: &Path,
    max_age: Duration,
) -> Result<Vec<(String, PathBuf, bool)>, ReaperError> {
    let io_err = |source| ReaperError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir).await.map_err(io_err)?;
    let now = SystemTime::now();
    let mut stale = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(err)),
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age >= max_age {
            stale.push((name, entry.path(), metadata.is_dir()));
        }
    }
    Ok(stale)
}

async fn remove_file_if_present(path: &Path) -> Result<(), ReaperError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ReaperError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::districts::District;
    use crate::pipeline::RunParams;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn params() -> RunParams {
        RunParams {
            from_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
            to_date: NaiveDate::from_ymd_opt(2024, 1, 2).expect("date"),
            district: District {
                name: "PUNE CITY".to_string(),
                code: "19393".to_string(),
            },
        }
    }

    fn seed_artifacts(paths: &AppPaths, job_id: &str) {
        let dir = paths.job_dir(job_id);
        std::fs::create_dir_all(&dir).expect("job dir");
        std::fs::write(dir.join("a.pdf"), b"%PDF").expect("file");
        paths.archives_dir().expect("archives");
        std::fs::write(paths.archive_path(job_id), b"PK").expect("archive");
    }

    #[tokio::test]
    async fn removes_artifacts_and_tolerates_missing_ones() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("paths");
        seed_artifacts(&paths, "job-1");

        remove_job_artifacts(&paths, "job-1").await.expect("remove");
        assert!(!paths.job_dir("job-1").exists());
        assert!(!paths.archive_path("job-1").exists());
        remove_job_artifacts(&paths, "job-1").await.expect("second remove");
    }

    #[tokio::test]
    async fn sweep_keeps_young_entries() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("paths");
        let tracker = JobTracker::new();
        let id = tracker.admit("a", params()).expect("admit");
        seed_artifacts(&paths, &id);
        seed_artifacts(&paths, "orphan");

        let report = sweep(&tracker, &paths, Duration::from_secs(3600))
            .await
            .expect("sweep");
        assert!(report.is_empty(), "{report:?}");
        assert!(tracker.contains(&id));
        assert!(paths.job_dir("orphan").exists());
    }

    #[tokio::test]
    async fn sweep_removes_expired_jobs_and_orphans() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("paths");
        let tracker = JobTracker::new();
        let id = tracker.admit("a", params()).expect("admit");
        seed_artifacts(&paths, &id);
        seed_artifacts(&paths, "orphan");
        std::fs::write(
            paths.archives_dir().expect("archives").join("stray.zip.partial"),
            b"PK",
        )
        .expect("partial");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = sweep(&tracker, &paths, Duration::ZERO).await.expect("sweep");
        assert_eq!(report.jobs_removed, vec![id.clone()]);
        assert_eq!(report.orphan_dirs, 1);
        assert_eq!(report.orphan_archives, 2);
        assert!(tracker.is_empty());
        assert!(!paths.job_dir(&id).exists());
        assert!(!paths.archive_path("orphan").exists());
    }
}
