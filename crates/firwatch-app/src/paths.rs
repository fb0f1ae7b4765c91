//! Filesystem layout (XDG-aware) for per-job output directories and archives.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

const JOBS_DIR: &str = "jobs";
const ARCHIVES_DIR: &str = "archives";
const ARCHIVE_EXTENSION: &str = "zip";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Filesystem paths used by the application. In production this is rooted at
/// `storage.path` (default `$XDG_DATA_HOME/firwatch`); tests construct
/// instances over temp dirs.
#[derive(Debug, Clone)]
pub struct AppPaths {
    base_dir: PathBuf,
}

impl AppPaths {
    /// Construct paths rooted under the provided directory, ensuring it exists.
    pub fn new<P: AsRef<Path>>(base: P) -> Result<Self, PathError> {
        let base = base.as_ref().to_path_buf();
        ensure_dir(&base)?;
        Ok(Self { base_dir: base })
    }

    pub fn data_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Parent of every job output directory (`.../jobs`).
    pub fn jobs_dir(&self) -> Result<PathBuf, PathError> {
        self.ensure_child(JOBS_DIR)
    }

    /// Parent of every finished archive (`.../archives`).
    pub fn archives_dir(&self) -> Result<PathBuf, PathError> {
        self.ensure_child(ARCHIVES_DIR)
    }

    /// Output directory for a single job. Not created here; the orchestrator
    /// recreates it fresh at run start.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        debug_assert!(is_safe_id(job_id));
        self.base_dir.join(JOBS_DIR).join(job_id)
    }

    pub fn archive_path(&self, job_id: &str) -> PathBuf {
        debug_assert!(is_safe_id(job_id));
        self.base_dir
            .join(ARCHIVES_DIR)
            .join(format!("{job_id}.{ARCHIVE_EXTENSION}"))
    }

    fn ensure_child(&self, name: &str) -> Result<PathBuf, PathError> {
        let path = self.base_dir.join(name);
        ensure_dir(&path)?;
        Ok(path)
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

fn ensure_dir(path: &Path) -> Result<(), PathError> {
    fs::create_dir_all(path).map_err(|source| PathError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}
