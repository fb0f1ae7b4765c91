//! Browser-automation capability the extraction pipeline drives.
//!
//! The pipeline only talks to the portal through [`PortalSession`], so page
//! interaction can be replaced by a scripted fake in tests. [`ChromiumLauncher`]
//! is the production implementation.

mod chromium;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chromium::{ChromiumLauncher, LaunchOptions};

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("element `{selector}` not found")]
    ElementNotFound { selector: String },
    #[error("link `{text}` not found within `{scope}`")]
    LinkNotFound { scope: String, text: String },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("browser protocol error during `{stage}`: {message}")]
    Protocol {
        stage: &'static str,
        message: String,
    },
}

impl PortalError {
    pub fn protocol(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Protocol {
            stage,
            message: err.to_string(),
        }
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }
}

/// One live browser tab bound to the portal.
///
/// Every wait is bounded by the caller-provided timeout; implementations never
/// retry on their own.
#[async_trait]
pub trait PortalSession: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), PortalError>;

    /// Wait until an element matching `selector` exists and is visible.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
    -> Result<(), PortalError>;

    /// Set an input's value and dispatch `input` + `change` so page scripts see it.
    async fn fill(&self, selector: &str, value: &str) -> Result<(), PortalError>;

    /// Choose an option by value and dispatch `change`.
    async fn select_option(&self, selector: &str, value: &str) -> Result<(), PortalError>;

    async fn click(&self, selector: &str) -> Result<(), PortalError>;

    /// Click the last link inside `scope` whose trimmed text equals `text`.
    ///
    /// Pagers repeat `...` on both sides of the page numbers; the last one is
    /// the forward link.
    async fn click_link_text(&self, scope: &str, text: &str) -> Result<(), PortalError>;

    /// Serialized DOM of the current page.
    async fn page_html(&self) -> Result<String, PortalError>;

    /// Route downloads into `dir` through the browser-wide protocol call.
    async fn set_download_dir_browser(&self, dir: &Path) -> Result<(), PortalError>;

    /// Route downloads into `dir` through the page-level protocol call.
    async fn set_download_dir_page(&self, dir: &Path) -> Result<(), PortalError>;

    async fn close(&self) -> Result<(), PortalError>;
}

#[async_trait]
pub trait PortalLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PortalSession>, PortalError>;
}

/// How the session's download directory ended up being configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadSetup {
    ConfiguredViaPrimary,
    ConfiguredViaFallback,
    /// Neither call succeeded; downloads land wherever the browser defaults.
    Unconfigured,
}

impl DownloadSetup {
    pub fn is_configured(self) -> bool {
        !matches!(self, DownloadSetup::Unconfigured)
    }
}

/// Try the browser-level call, then the page-level call, then give up.
pub async fn configure_downloads(session: &dyn PortalSession, dir: &Path) -> DownloadSetup {
    match session.set_download_dir_browser(dir).await {
        Ok(()) => return DownloadSetup::ConfiguredViaPrimary,
        Err(err) => {
            tracing::warn!(stage = "download_setup", dir = %dir.display(), error = %err, "browser-level download routing failed");
        }
    }
    match session.set_download_dir_page(dir).await {
        Ok(()) => DownloadSetup::ConfiguredViaFallback,
        Err(err) => {
            tracing::warn!(stage = "download_setup", dir = %dir.display(), error = %err, "page-level download routing failed; continuing with browser defaults");
            DownloadSetup::Unconfigured
        }
    }
}

/// CSS selectors for the portal's search form, result grid and pager.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortalSelectors {
    pub district_select: String,
    pub from_date_input: String,
    pub to_date_input: String,
    pub page_size_select: String,
    pub search_button: String,
    pub results_table: String,
    pub result_row: String,
    /// Clickable element inside the last cell of a row.
    pub download_control: String,
    pub pager: String,
    pub pager_link: String,
    pub pager_current: String,
    pub total_records: String,
    pub no_records: String,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            district_select: "#ContentPlaceHolder1_ddlDistrict".to_string(),
            from_date_input: "#ContentPlaceHolder1_txtDateOfRegistrationFrom".to_string(),
            to_date_input: "#ContentPlaceHolder1_txtDateOfRegistrationTo".to_string(),
            page_size_select: "#ContentPlaceHolder1_ucRecordView_ddlPageSize".to_string(),
            search_button: "#ContentPlaceHolder1_btnSearch".to_string(),
            results_table: "#ContentPlaceHolder1_gdvDeadBody".to_string(),
            result_row: "#ContentPlaceHolder1_gdvDeadBody tr".to_string(),
            download_control: "input[type=image], input[type=submit], a".to_string(),
            pager: "#ContentPlaceHolder1_gdvDeadBody tr.pager".to_string(),
            pager_link: "a".to_string(),
            pager_current: "span".to_string(),
            total_records: "#ContentPlaceHolder1_lbltotalrecord".to_string(),
            no_records: "#ContentPlaceHolder1_lblNoRecord".to_string(),
        }
    }
}

impl PortalSelectors {
    /// Selector that matches once the search settled either way.
    pub fn search_settled(&self) -> String {
        format!("{}, {}", self.results_table, self.no_records)
    }
}
