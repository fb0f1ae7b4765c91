//! Configuration loading and XDG path helpers.
//!
//! Sources, lowest to highest precedence: built-in defaults,
//! `$FIRWATCH_ETC_CONFIG_DIR/firwatch/settings` (default `/etc`),
//! `$XDG_CONFIG_HOME/firwatch/settings`, `./config/settings`, the file named
//! by `FIRWATCH_CONFIG_FILE`, then `FIRWATCH__SECTION__KEY` variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use firwatch_server::ServerConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::DEFAULT_TARGET_PHRASES;
use crate::portal::PortalSelectors;

const APP_DIR: &str = "firwatch";
const SETTINGS_STEM: &str = "settings";
const LOCAL_CONFIG_FILE: &str = "config/settings";
const ETC_DIR_ENV: &str = "FIRWATCH_ETC_CONFIG_DIR";
const CONFIG_FILE_ENV: &str = "FIRWATCH_CONFIG_FILE";
const ENV_PREFIX: &str = "FIRWATCH";

pub const DEFAULT_PORTAL_URL: &str =
    "https://citizen.mahapolice.gov.in/Citizen/MH/PublishedFIRs.aspx";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("unable to resolve project directories")]
    MissingProjectDirs,
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub portal: PortalConfig,
    pub downloads: DownloadConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub headless: bool,
    pub sandbox: bool,
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
    #[serde(default)]
    pub launch_args: Vec<String>,
    pub page_size: u32,
    pub page_load_timeout_secs: u64,
    /// JSON object of district name -> portal code replacing the built-in table.
    #[serde(default)]
    pub district_file: Option<PathBuf>,
    pub target_phrases: Vec<String>,
    #[serde(default)]
    pub selectors: PortalSelectors,
}

impl PortalConfig {
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    pub poll_interval_ms: u64,
    pub stable_checks: u32,
    pub timeout_secs: u64,
    pub pacing_ms: u64,
    pub pacing_jitter_ms: u64,
    pub max_filename_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    pub completed_ttl_secs: u64,
    pub failed_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_age_secs: u64,
    pub max_range_days: i64,
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let default_storage = default_storage_path()?;
    let mut builder = Config::builder()
        .set_default("server.listen_addr", "127.0.0.1:8080")?
        .set_default(
            "storage.path",
            default_storage.to_string_lossy().to_string(),
        )?
        .set_default("portal.base_url", DEFAULT_PORTAL_URL)?
        .set_default("portal.headless", true)?
        .set_default("portal.sandbox", true)?
        .set_default("portal.page_size", 50)?
        .set_default("portal.page_load_timeout_secs", 60)?
        .set_default(
            "portal.target_phrases",
            DEFAULT_TARGET_PHRASES
                .iter()
                .map(|phrase| phrase.to_string())
                .collect::<Vec<_>>(),
        )?
        .set_default("downloads.poll_interval_ms", 1000)?
        .set_default("downloads.stable_checks", 3)?
        .set_default("downloads.timeout_secs", 90)?
        .set_default("downloads.pacing_ms", 1500)?
        .set_default("downloads.pacing_jitter_ms", 1000)?
        .set_default("downloads.max_filename_bytes", 240)?
        .set_default("jobs.completed_ttl_secs", 30 * 60)?
        .set_default("jobs.failed_ttl_secs", 5 * 60)?
        .set_default("jobs.sweep_interval_secs", 2 * 60 * 60)?
        .set_default("jobs.max_age_secs", 2 * 60 * 60)?
        .set_default("jobs.max_range_days", 90)?;

    builder = builder.add_source(File::from(etc_settings_path()).required(false));
    if let Some(xdg) = xdg_settings_path() {
        builder = builder.add_source(File::from(xdg).required(false));
    }
    builder = builder.add_source(File::with_name(LOCAL_CONFIG_FILE).required(false));
    if let Some(path) = env::var_os(CONFIG_FILE_ENV) {
        builder = builder.add_source(File::from(PathBuf::from(path)).required(true));
    }

    let cfg: AppConfig = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("portal.target_phrases")
                .with_list_parse_key("portal.launch_args")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &AppConfig) -> Result<(), AppConfigError> {
    if cfg.downloads.stable_checks == 0 {
        return Err(AppConfigError::Invalid(
            "downloads.stable_checks must be at least 1".to_string(),
        ));
    }
    if cfg.downloads.poll_interval_ms == 0 {
        return Err(AppConfigError::Invalid(
            "downloads.poll_interval_ms must be positive".to_string(),
        ));
    }
    if cfg.jobs.max_range_days < 0 {
        return Err(AppConfigError::Invalid(
            "jobs.max_range_days must not be negative".to_string(),
        ));
    }
    if cfg.portal.target_phrases.iter().all(|p| p.trim().is_empty()) {
        return Err(AppConfigError::Invalid(
            "portal.target_phrases needs at least one non-empty phrase".to_string(),
        ));
    }
    Ok(())
}

pub fn project_dirs() -> Result<ProjectDirs, AppConfigError> {
    ProjectDirs::from("dev", "firwatch", "firwatch").ok_or(AppConfigError::MissingProjectDirs)
}

fn default_storage_path() -> Result<PathBuf, AppConfigError> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

fn etc_settings_path() -> PathBuf {
    let root = env::var_os(ETC_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc"));
    root.join(APP_DIR).join(SETTINGS_STEM).with_extension("toml")
}

// `ProjectDirs` maps to a qualified name on macOS; the settings layer always
// uses the plain XDG-style directory.
fn xdg_settings_path() -> Option<PathBuf> {
    let base = BaseDirs::new()?;
    Some(
        base.config_dir()
            .join(APP_DIR)
            .join(SETTINGS_STEM)
            .with_extension("toml"),
    )
}
