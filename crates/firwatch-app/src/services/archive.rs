//! Packaging a job's output directory into a flat zip archive.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::pipeline::watcher::is_partial_download;

const PARTIAL_SUFFIX: &str = "partial";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write zip entry `{entry}`: {source}")]
    Zip {
        entry: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("archive task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Zip every regular file directly inside `source_dir` into `archive_path`,
/// entries named by bare file name. Unfinished browser downloads are left out. Written to a sibling temp file first so a
/// failed run never leaves a truncated archive behind.
pub async fn write_archive(source_dir: &Path, archive_path: &Path) -> Result<ArchiveInfo, ArchiveError> {
    let source_dir = source_dir.to_path_buf();
    let archive_path = archive_path.to_path_buf();
    tokio::task::spawn_blocking(move || write_archive_blocking(&source_dir, &archive_path)).await?
}

fn write_archive_blocking(source_dir: &Path, archive_path: &Path) -> Result<ArchiveInfo, ArchiveError> {
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(source_dir).map_err(io_err(source_dir))? {
        let entry = entry.map_err(io_err(source_dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_err(&path))?;
        if !file_type.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if is_partial_download(&name) {
            tracing::debug!(file = %name, "leaving unfinished download out of the archive");
            continue;
        }
        files.push((name, path));
    }
    files.sort();

    let partial_path = archive_path.with_extension(format!("zip.{PARTIAL_SUFFIX}"));
    write_zip_or_discard(&partial_path, &files)?;
    fs::rename(&partial_path, archive_path).map_err(io_err(archive_path))?;
    let bytes = fs::metadata(archive_path)
        .map_err(io_err(archive_path))?
        .len();

    Ok(ArchiveInfo {
        path: archive_path.to_path_buf(),
        entries: files.len(),
        bytes,
    })
}

/// A failed write never leaves its temp file behind; cleanup only knows the
/// final archive name.
fn write_zip_or_discard(partial_path: &Path, files: &[(String, PathBuf)]) -> Result<(), ArchiveError> {
    let result = write_zip(partial_path, files);
    if result.is_err() {
        if let Err(err) = fs::remove_file(partial_path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %partial_path.display(), error = %err, "failed to remove partial archive");
            }
        }
    }
    result
}

fn write_zip(partial_path: &Path, files: &[(String, PathBuf)]) -> Result<(), ArchiveError> {
    let output = File::create(partial_path).map_err(io_err(partial_path))?;
    let mut zip = ZipWriter::new(BufWriter::new(output));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, path) in files {
        zip.start_file(name.as_str(), options)
            .map_err(|source| ArchiveError::Zip {
                entry: name.clone(),
                source,
            })?;
        let mut input = File::open(path).map_err(io_err(path))?;
        io::copy(&mut input, &mut zip).map_err(io_err(path))?;
    }

    let writer = zip.finish().map_err(|source| ArchiveError::Zip {
        entry: "<central directory>".to_string(),
        source,
    })?;
    writer
        .into_inner()
        .map_err(|err| ArchiveError::Io {
            path: partial_path.to_path_buf(),
            source: err.into_error(),
        })?
        .sync_all()
        .map_err(io_err(partial_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[tokio::test]
    async fn archives_files_flat_and_skips_directories() {
        let temp = TempDir::new().expect("temp dir");
        let source = temp.path().join("jobs").join("job-1");
        fs::create_dir_all(source.join("nested")).expect("create dirs");
        fs::write(source.join("b.pdf"), b"second").expect("write b");
        fs::write(source.join("a.pdf"), b"first").expect("write a");
        fs::write(source.join("nested").join("c.pdf"), b"nested").expect("write c");

        let archive_path = temp.path().join("archives").join("job-1.zip");
        let info = write_archive(&source, &archive_path).await.expect("archive");

        assert_eq!(info.entries, 2);
        assert!(info.bytes > 0);
        assert!(!archive_path.with_extension("zip.partial").exists());

        let mut zip = zip::ZipArchive::new(File::open(&archive_path).expect("open")).expect("zip");
        let names: Vec<String> = zip.file_names().map(str::to_string).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["a.pdf".to_string(), "b.pdf".to_string()]);

        let mut contents = String::new();
        zip.by_name("a.pdf")
            .expect("entry")
            .read_to_string(&mut contents)
            .expect("read");
        assert_eq!(contents, "first");
    }

    #[tokio::test]
    async fn empty_directory_yields_empty_archive() {
        let temp = TempDir::new().expect("temp dir");
        let source = temp.path().join("empty");
        fs::create_dir_all(&source).expect("create");
        let archive_path = temp.path().join("out.zip");

        let info = write_archive(&source, &archive_path).await.expect("archive");
        assert_eq!(info.entries, 0);
        let zip = zip::ZipArchive::new(File::open(&archive_path).expect("open")).expect("zip");
        assert_eq!(zip.len(), 0);
    }

    #[tokio::test]
    async fn unfinished_downloads_stay_out_of_the_archive() {
        let temp = TempDir::new().expect("temp dir");
        let source = temp.path().join("job-2");
        fs::create_dir_all(&source).expect("create");
        fs::write(source.join("FIR_Copy.pdf.crdownload"), b"half").expect("write partial");
        fs::write(source.join("scratch.part"), b"half").expect("write part");
        fs::write(source.join("PUNE CITY_0001.pdf"), b"%PDF").expect("write final");

        let archive_path = temp.path().join("job-2.zip");
        let info = write_archive(&source, &archive_path).await.expect("archive");
        assert_eq!(info.entries, 1);
        let zip = zip::ZipArchive::new(File::open(&archive_path).expect("open")).expect("zip");
        let names: Vec<&str> = zip.file_names().collect();
        assert_eq!(names, vec!["PUNE CITY_0001.pdf"]);
    }

    #[test]
    fn failed_write_removes_the_temp_file() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("a.pdf"), b"first").expect("write a");
        let files = vec![
            ("a.pdf".to_string(), temp.path().join("a.pdf")),
            ("gone.pdf".to_string(), temp.path().join("gone.pdf")),
        ];
        let partial = temp.path().join("job-3.zip.partial");

        let err = write_zip_or_discard(&partial, &files).expect_err("missing entry");
        assert!(matches!(err, ArchiveError::Io { .. }));
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn missing_source_directory_fails() {
        let temp = TempDir::new().expect("temp dir");
        let err = write_archive(&temp.path().join("absent"), &temp.path().join("x.zip"))
            .await
            .expect_err("missing source");
        assert!(matches!(err, ArchiveError::Io { .. }));
    }
}
