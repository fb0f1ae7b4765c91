//! One end-to-end extraction run: session setup, search, page loop, archive.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use chrono::NaiveDate;
use firwatch_server::EndReason;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use thiserror::Error;
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::districts::District;
use crate::paths::AppPaths;
use crate::pipeline::extract::{
    DEFAULT_TARGET_PHRASES, ExtractError, FirRow, ResultSelectors, RowClassifier,
    extract_rows, first_row_fingerprint, has_no_records_marker, total_records_hint,
};
use crate::pipeline::filename::{DEFAULT_MAX_FILENAME_BYTES, FileNamer};
use crate::pipeline::pager::{AdvanceOutcome, PageCursor, PageVerdict, advance};
use crate::pipeline::watcher::{
    WatchError, WatchOptions, WatchOutcome, discard_new_files, snapshot_dir, watch_for_download,
};
use crate::portal::{
    DownloadSetup, PortalError, PortalLauncher, PortalSelectors, PortalSession,
    configure_downloads,
};
use crate::services::archive::{ArchiveError, ArchiveInfo, write_archive};

/// Date format of the portal's search inputs.
pub const PORTAL_DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Browsing,
    Searching,
    Paging(u64),
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Initializing => f.write_str("starting browser session"),
            RunState::Browsing => f.write_str("opening portal"),
            RunState::Searching => f.write_str("submitting search"),
            RunState::Paging(page) => write!(f, "processing page {page}"),
            RunState::Finalizing => f.write_str("packaging archive"),
            RunState::Done => f.write_str("done"),
            RunState::Failed => f.write_str("failed"),
        }
    }
}

/// Progress notifications emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    State(RunState),
    TotalRecords(u64),
    RowScanned { page: u64, matched: bool },
    FileSaved { page: u64, file_name: String },
    RowSkipped { page: u64, reason: String },
    Ended(EndReason),
}

pub trait RunObserver: Send + Sync {
    fn on_event(&self, job_id: &str, event: RunEvent);
}

/// Observer that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn on_event(&self, _job_id: &str, _event: RunEvent) {}
}

/// Validated search parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub district: District,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub job_id: String,
    pub archive: ArchiveInfo,
    pub end_reason: EndReason,
    pub download_setup: DownloadSetup,
    pub pages_visited: u64,
    pub advance_attempts: u64,
    pub rows_scanned: u64,
    pub rows_matched: u64,
    pub files_downloaded: u64,
    pub rows_skipped: u64,
    pub total_records: Option<u64>,
}

/// Job-fatal failures. The `Display` text becomes the job's failure message.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to prepare job directory {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("browser session could not be started: {0}")]
    Launch(#[source] PortalError),
    #[error("portal step `{stage}` failed: {source}")]
    Portal {
        stage: &'static str,
        #[source]
        source: PortalError,
    },
    #[error(transparent)]
    Selectors(#[from] ExtractError),
    #[error("packaging failed: {0}")]
    Archive(#[from] ArchiveError),
}

fn portal(stage: &'static str) -> impl FnOnce(PortalError) -> RunError {
    move |source| RunError::Portal { stage, source }
}

/// Row-level failures; logged and counted, never fatal.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("row has no download control")]
    MissingTrigger,
    #[error("download click failed: {0}")]
    Click(#[source] PortalError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("no completed download within {0:?}")]
    DownloadTimedOut(Duration),
    #[error("failed to list job directory for naming: {0}")]
    Naming(#[source] io::Error),
    #[error("failed to rename `{from}` to `{to}`: {source}")]
    Rename {
        from: String,
        to: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Builder)]
pub struct ExtractionSettings {
    #[builder(into)]
    pub base_url: String,
    #[builder(default)]
    pub selectors: PortalSelectors,
    #[builder(default = 50)]
    pub page_size: u32,
    #[builder(default = Duration::from_secs(60))]
    pub page_timeout: Duration,
    #[builder(default)]
    pub watch: WatchOptions,
    /// Minimum spacing between consecutive download triggers.
    #[builder(default = Duration::from_millis(1500))]
    pub pacing_interval: Duration,
    #[builder(default = Duration::from_millis(1000))]
    pub pacing_jitter: Duration,
    #[builder(default = DEFAULT_MAX_FILENAME_BYTES)]
    pub max_filename_bytes: usize,
    #[builder(default = DEFAULT_TARGET_PHRASES.iter().map(|p| p.to_string()).collect())]
    pub target_phrases: Vec<String>,
}

pub struct Extraction {
    launcher: Arc<dyn PortalLauncher>,
    settings: ExtractionSettings,
    classifier: RowClassifier,
    namer: FileNamer,
    paths: AppPaths,
    observer: Arc<dyn RunObserver>,
}

#[derive(Debug)]
struct CrawlTally {
    download_setup: DownloadSetup,
    end_reason: EndReason,
    pages_visited: u64,
    advance_attempts: u64,
    rows_scanned: u64,
    rows_matched: u64,
    files_downloaded: u64,
    rows_skipped: u64,
    total_records: Option<u64>,
}

struct Pacer {
    limiter: Option<DefaultDirectRateLimiter>,
    jitter_ms: u64,
}

impl Pacer {
    fn new(interval: Duration, jitter: Duration) -> Self {
        Self {
            limiter: Quota::with_period(interval).map(RateLimiter::direct),
            jitter_ms: jitter.as_millis() as u64,
        }
    }

    async fn pause(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        if self.jitter_ms > 0 {
            let wait = rand::thread_rng().gen_range(0..=self.jitter_ms);
            sleep(Duration::from_millis(wait)).await;
        }
    }
}

impl Extraction {
    pub fn new(
        launcher: Arc<dyn PortalLauncher>,
        settings: ExtractionSettings,
        paths: AppPaths,
        observer: Arc<dyn RunObserver>,
    ) -> Result<Self, RunError> {
        ResultSelectors::compile(&settings.selectors)?;
        let classifier = RowClassifier::new(settings.target_phrases.iter().cloned());
        let namer = FileNamer::new(settings.max_filename_bytes);
        Ok(Self {
            launcher,
            settings,
            classifier,
            namer,
            paths,
            observer,
        })
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub async fn run(&self, job_id: &str, params: &RunParams) -> Result<RunSummary, RunError> {
        info!(
            job_id,
            district = %params.district.name,
            code = %params.district.code,
            from = %params.from_date,
            to = %params.to_date,
            "extraction run starting"
        );
        let result = self.run_stages(job_id, params).await;
        match &result {
            Ok(summary) => {
                self.enter(job_id, RunState::Done);
                info!(
                    job_id,
                    files = summary.files_downloaded,
                    skipped = summary.rows_skipped,
                    pages = summary.pages_visited,
                    end_reason = ?summary.end_reason,
                    archive = %summary.archive.path.display(),
                    "extraction run finished"
                );
            }
            Err(err) => {
                self.enter(job_id, RunState::Failed);
                warn!(job_id, error = %err, "extraction run failed");
            }
        }
        result
    }

    async fn run_stages(&self, job_id: &str, params: &RunParams) -> Result<RunSummary, RunError> {
        self.enter(job_id, RunState::Initializing);
        let job_dir = self.prepare_job_dir(job_id).await?;
        let session = self.launcher.launch().await.map_err(RunError::Launch)?;

        let crawl = self.crawl(job_id, params, session.as_ref(), &job_dir).await;
        if let Err(err) = session.close().await {
            warn!(job_id, stage = "close", error = %err, "browser session did not close cleanly");
        }
        let tally = crawl?;

        self.enter(job_id, RunState::Finalizing);
        let archive = write_archive(&job_dir, &self.paths.archive_path(job_id)).await?;

        Ok(RunSummary {
            job_id: job_id.to_string(),
            archive,
            end_reason: tally.end_reason,
            download_setup: tally.download_setup,
            pages_visited: tally.pages_visited,
            advance_attempts: tally.advance_attempts,
            rows_scanned: tally.rows_scanned,
            rows_matched: tally.rows_matched,
            files_downloaded: tally.files_downloaded,
            rows_skipped: tally.rows_skipped,
            total_records: tally.total_records,
        })
    }

    /// Remove any stale directory for this id and create it fresh.
    async fn prepare_job_dir(&self, job_id: &str) -> Result<PathBuf, RunError> {
        let dir = self.paths.job_dir(job_id);
        let workspace = |source| RunError::Workspace {
            path: dir.clone(),
            source,
        };
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(job_id, dir = %dir.display(), "removed stale job directory"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(workspace(err)),
        }
        fs::create_dir_all(&dir).await.map_err(workspace)?;
        // The browser needs an absolute download path.
        fs::canonicalize(&dir).await.map_err(workspace)
    }

    async fn crawl(
        &self,
        job_id: &str,
        params: &RunParams,
        session: &dyn PortalSession,
        job_dir: &Path,
    ) -> Result<CrawlTally, RunError> {
        let selectors = &self.settings.selectors;
        let timeout = self.settings.page_timeout;

        let download_setup = configure_downloads(session, job_dir).await;
        if download_setup.is_configured() {
            info!(job_id, stage = "initializing", setup = ?download_setup, "download routing configured");
        } else {
            warn!(job_id, stage = "initializing", "download routing unavailable; rows will likely time out");
        }

        self.enter(job_id, RunState::Browsing);
        session
            .navigate(&self.settings.base_url, timeout)
            .await
            .map_err(portal("navigate"))?;
        session
            .wait_for_selector(&selectors.search_button, timeout)
            .await
            .map_err(portal("search_form"))?;

        self.enter(job_id, RunState::Searching);
        let page_size = self.settings.page_size.to_string();
        if let Err(err) = session
            .select_option(&selectors.page_size_select, &page_size)
            .await
        {
            warn!(job_id, stage = "page_size", error = %err, "could not set page size; using portal default");
        }
        session
            .select_option(&selectors.district_select, &params.district.code)
            .await
            .map_err(portal("select_district"))?;
        session
            .fill(
                &selectors.from_date_input,
                &params.from_date.format(PORTAL_DATE_FORMAT).to_string(),
            )
            .await
            .map_err(portal("fill_from_date"))?;
        session
            .fill(
                &selectors.to_date_input,
                &params.to_date.format(PORTAL_DATE_FORMAT).to_string(),
            )
            .await
            .map_err(portal("fill_to_date"))?;
        session
            .click(&selectors.search_button)
            .await
            .map_err(portal("submit_search"))?;
        session
            .wait_for_selector(&selectors.search_settled(), timeout)
            .await
            .map_err(portal("await_results"))?;

        let mut tally = CrawlTally {
            download_setup,
            end_reason: EndReason::Exhausted,
            pages_visited: 0,
            advance_attempts: 0,
            rows_scanned: 0,
            rows_matched: 0,
            files_downloaded: 0,
            rows_skipped: 0,
            total_records: None,
        };

        let html = session.page_html().await.map_err(portal("read_results"))?;
        let (no_records, total) = self.inspect_results(&html)?;
        if no_records {
            info!(job_id, stage = "searching", "portal reported no records");
            tally.end_reason = EndReason::NoRecords;
            self.emit(job_id, RunEvent::Ended(EndReason::NoRecords));
            return Ok(tally);
        }
        if let Some(total) = total {
            tally.total_records = Some(total);
            self.emit(job_id, RunEvent::TotalRecords(total));
        }

        let pacer = Pacer::new(self.settings.pacing_interval, self.settings.pacing_jitter);
        let mut cursor = PageCursor::new();
        let end_reason = loop {
            let page = cursor.current_page();
            self.enter(job_id, RunState::Paging(page));

            let html = session.page_html().await.map_err(portal("read_page"))?;
            let rows = self.rows_from(&html)?;
            let Some(fingerprint) = first_row_fingerprint(&rows) else {
                info!(job_id, page, "page has no result rows");
                break EndReason::Exhausted;
            };
            if cursor.observe(fingerprint) == PageVerdict::Repeated {
                warn!(job_id, page, %fingerprint, "first row repeats an earlier page; pager reset");
                break EndReason::LoopDetected;
            }
            tally.pages_visited += 1;

            self.process_page(job_id, page, &rows, session, job_dir, &pacer, &mut tally)
                .await;

            match advance(session, &mut cursor, selectors, timeout)
                .await
                .map_err(portal("advance_page"))?
            {
                AdvanceOutcome::Advanced(next) => debug!(job_id, page = next, "advanced"),
                AdvanceOutcome::Exhausted => break EndReason::Exhausted,
            }
        };

        tally.advance_attempts = cursor.advance_attempts();
        tally.end_reason = end_reason;
        self.emit(job_id, RunEvent::Ended(end_reason));
        Ok(tally)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_page(
        &self,
        job_id: &str,
        page: u64,
        rows: &[FirRow],
        session: &dyn PortalSession,
        job_dir: &Path,
        pacer: &Pacer,
        tally: &mut CrawlTally,
    ) {
        for (index, row) in rows.iter().enumerate() {
            let matched = self.classifier.is_relevant(row);
            tally.rows_scanned += 1;
            if matched {
                tally.rows_matched += 1;
            }
            self.emit(job_id, RunEvent::RowScanned { page, matched });
            if !matched {
                continue;
            }

            let row_no = index + 1;
            match self.download_row(session, job_dir, row).await {
                Ok(file_name) => {
                    tally.files_downloaded += 1;
                    info!(job_id, page, row = row_no, file = %file_name, "saved FIR document");
                    self.emit(job_id, RunEvent::FileSaved { page, file_name });
                }
                Err(err) => {
                    tally.rows_skipped += 1;
                    warn!(job_id, page, row = row_no, fir = %row.fir_number(), error = %err, "skipping row");
                    self.emit(
                        job_id,
                        RunEvent::RowSkipped {
                            page,
                            reason: err.to_string(),
                        },
                    );
                }
            }
            pacer.pause().await;
        }
    }

    async fn download_row(
        &self,
        session: &dyn PortalSession,
        job_dir: &Path,
        row: &FirRow,
    ) -> Result<String, PipelineError> {
        let trigger = row.trigger.as_ref().ok_or(PipelineError::MissingTrigger)?;
        let snapshot = snapshot_dir(job_dir).await?;
        session
            .click(&trigger.selector)
            .await
            .map_err(PipelineError::Click)?;

        let saved = self.settle_and_rename(job_dir, &snapshot, row).await;
        if saved.is_err() {
            // Whatever the click produced never got a final name.
            match discard_new_files(job_dir, &snapshot).await {
                Ok(removed) if !removed.is_empty() => {
                    debug!(dir = %job_dir.display(), ?removed, "discarded unfinished download");
                }
                Ok(_) => {}
                Err(err) => warn!(dir = %job_dir.display(), error = %err, "failed to discard unfinished download"),
            }
        }
        saved
    }

    async fn settle_and_rename(
        &self,
        job_dir: &Path,
        snapshot: &HashSet<String>,
        row: &FirRow,
    ) -> Result<String, PipelineError> {
        let downloaded = match watch_for_download(job_dir, snapshot, &self.settings.watch).await? {
            WatchOutcome::Completed(name) => name,
            WatchOutcome::TimedOut => {
                return Err(PipelineError::DownloadTimedOut(self.settings.watch.timeout));
            }
        };

        let final_name = self
            .namer
            .resolve_in_dir(job_dir, &row.file_name_parts(), Some(&downloaded))
            .await
            .map_err(PipelineError::Naming)?;
        if final_name != downloaded {
            fs::rename(job_dir.join(&downloaded), job_dir.join(&final_name))
                .await
                .map_err(|source| PipelineError::Rename {
                    from: downloaded.clone(),
                    to: final_name.clone(),
                    source,
                })?;
        }
        Ok(final_name)
    }

    fn inspect_results(&self, html: &str) -> Result<(bool, Option<u64>), RunError> {
        let compiled = ResultSelectors::compile(&self.settings.selectors)?;
        Ok((
            has_no_records_marker(html, &compiled),
            total_records_hint(html, &compiled),
        ))
    }

    fn rows_from(&self, html: &str) -> Result<Vec<FirRow>, RunError> {
        let compiled = ResultSelectors::compile(&self.settings.selectors)?;
        Ok(extract_rows(html, &compiled))
    }

    fn enter(&self, job_id: &str, state: RunState) {
        debug!(job_id, state = %state, "run state");
        self.emit(job_id, RunEvent::State(state));
    }

    fn emit(&self, job_id: &str, event: RunEvent) {
        self.observer.on_event(job_id, event);
    }
}
