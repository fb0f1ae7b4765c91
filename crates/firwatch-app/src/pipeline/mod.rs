//! Scraping pipeline: row extraction, naming, download detection, paging and
//! the orchestrator that drives them against a live portal session.
//!
//! Everything except `orchestrator` is side-effect free or touches only the
//! local job directory, so it can be exercised without a browser.

pub mod extract;
pub mod filename;
pub mod orchestrator;
pub mod pager;
pub mod watcher;

pub use extract::{
    DEFAULT_TARGET_PHRASES, DownloadTrigger, ExtractError, FirRow, ResultSelectors,
    RowClassifier, RowFingerprint, extract_rows, first_row_fingerprint,
};
pub use filename::{FileNameParts, FileNamer, sanitize_segment};
pub use orchestrator::{
    Extraction, ExtractionSettings, NoopObserver, PORTAL_DATE_FORMAT, PipelineError, RunError,
    RunEvent, RunObserver, RunParams, RunState, RunSummary,
};
pub use pager::{AdvanceOutcome, PageCursor, PageVerdict, PagerStep, advance, plan_step};
pub use watcher::{
    StabilityTracker, WatchError, WatchOptions, WatchOutcome, discard_new_files, is_partial_download,
    snapshot_dir, watch_for_download,
};
