//! Download completion detection by size stability.
//!
//! The browser gives no completion signal for downloads, so a new file counts
//! as finished once its size has been observed unchanged (and non-zero) for a
//! number of consecutive polls.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use thiserror::Error;
use tokio::fs;
use tokio::time::{Instant, sleep};

const PARTIAL_SUFFIXES: &[&str] = &[".crdownload", ".part", ".tmp"];

#[derive(Debug, Clone, Builder)]
pub struct WatchOptions {
    #[builder(default = Duration::from_secs(1))]
    pub poll_interval: Duration,
    #[builder(default = 3)]
    pub stable_checks: u32,
    #[builder(default = Duration::from_secs(90))]
    pub timeout: Duration,
    /// Expected extension without the dot, compared case-insensitively.
    #[builder(into, default = "pdf".to_string())]
    pub extension: String,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Completed(String),
    TimedOut,
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to scan download directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Per-file consecutive equal-size counter.
#[derive(Debug)]
pub struct StabilityTracker {
    required: u32,
    observed: HashMap<String, (u64, u32)>,
}

impl StabilityTracker {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            observed: HashMap::new(),
        }
    }

    /// Record one size reading; true once the file is considered complete.
    pub fn observe(&mut self, name: &str, size: u64) -> bool {
        let entry = self
            .observed
            .entry(name.to_string())
            .or_insert((size, 0));
        if entry.0 == size {
            entry.1 += 1;
        } else {
            *entry = (size, 1);
        }
        size > 0 && entry.1 >= self.required
    }

    /// Forget files that vanished since the last poll.
    pub fn retain_present(&mut self, present: &HashSet<String>) {
        self.observed.retain(|name, _| present.contains(name));
    }
}

/// Names currently in `dir`; a missing directory yields an empty set.
pub async fn snapshot_dir(dir: &Path) -> Result<HashSet<String>, WatchError> {
    Ok(list_files(dir)
        .await?
        .into_iter()
        .map(|(name, _)| name)
        .collect())
}

/// Poll `dir` until a file absent from `snapshot` settles, or time runs out.
pub async fn watch_for_download(
    dir: &Path,
    snapshot: &HashSet<String>,
    opts: &WatchOptions,
) -> Result<WatchOutcome, WatchError> {
    let deadline = Instant::now() + opts.timeout;
    let mut tracker = StabilityTracker::new(opts.stable_checks);

    loop {
        let mut present = HashSet::new();
        for (name, size) in list_files(dir).await? {
            if snapshot.contains(&name) || !is_candidate(&name, &opts.extension) {
                continue;
            }
            if tracker.observe(&name, size) {
                tracing::debug!(dir = %dir.display(), file = %name, size, "download settled");
                return Ok(WatchOutcome::Completed(name));
            }
            present.insert(name);
        }
        tracker.retain_present(&present);

        if Instant::now() >= deadline {
            tracing::warn!(dir = %dir.display(), timeout_ms = opts.timeout.as_millis() as u64, "no completed download before timeout");
            return Ok(WatchOutcome::TimedOut);
        }
        sleep(opts.poll_interval).await;
    }
}

/// Remove every file in `dir` that is absent from `snapshot`.
///
/// Used after a row's download fails so browser-named or half-written files
/// never reach the archive. Returns the names removed.
pub async fn discard_new_files(
    dir: &Path,
    snapshot: &HashSet<String>,
) -> Result<Vec<String>, WatchError> {
    let mut removed = Vec::new();
    for (name, _) in list_files(dir).await? {
        if snapshot.contains(&name) {
            continue;
        }
        let path = dir.join(&name);
        match fs::remove_file(&path).await {
            Ok(()) => removed.push(name),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(WatchError::Scan { path, source }),
        }
    }
    Ok(removed)
}

/// Browser scratch file for a download still in flight.
pub fn is_partial_download(name: &str) -> bool {
    let lower = name.to_lowercase();
    PARTIAL_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

fn is_candidate(name: &str, extension: &str) -> bool {
    if is_partial_download(name) {
        return false;
    }
    let lower = name.to_lowercase();
    Path::new(&lower)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == extension.to_lowercase())
}

async fn list_files(dir: &Path) -> Result<Vec<(String, u64)>, WatchError> {
    let scan_err = |source| WatchError::Scan {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(scan_err(err)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        // Entries can disappear between listing and stat (partial renames).
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(scan_err(err)),
        };
        if metadata.is_file() {
            files.push((name, metadata.len()));
        }
    }
    files.sort();
    Ok(files)
}
