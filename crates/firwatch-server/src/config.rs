use std::net::IpAddr;
use std::num::{NonZeroU32, NonZeroU64};

use axum::http::{Method, header::HeaderName};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    /// How the requester identity is derived when running behind a proxy.
    #[serde(default)]
    pub proxy_mode: ProxyMode,
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl ServerConfig {
    pub fn with_listen_addr(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            proxy_mode: ProxyMode::Off,
            trusted_proxies: Vec::new(),
        }
    }
}

/// Submission throttling, keyed by requester identity.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "RateLimitConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "RateLimitConfig::default_window_ms")]
    pub window_ms: NonZeroU64,
    #[serde(default = "RateLimitConfig::default_max_requests")]
    pub max_requests: NonZeroU32,
    #[serde(default = "RateLimitConfig::default_burst")]
    pub burst: NonZeroU32,
}

impl RateLimitConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_window_ms() -> NonZeroU64 {
        NonZeroU64::new(60_000).expect("non-zero window defaults to one minute")
    }

    fn default_max_requests() -> NonZeroU32 {
        NonZeroU32::new(6).expect("default submissions bound must be non-zero")
    }

    fn default_burst() -> NonZeroU32 {
        NonZeroU32::new(3).expect("default burst bound must be non-zero")
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            window_ms: Self::default_window_ms(),
            max_requests: Self::default_max_requests(),
            burst: Self::default_burst(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default = "CorsConfig::default_allow_methods")]
    pub allow_methods: Vec<String>,
    #[serde(default = "CorsConfig::default_allow_headers")]
    pub allow_headers: Vec<String>,
    #[serde(default = "CorsConfig::default_expose_headers")]
    pub expose_headers: Vec<String>,
    #[serde(default = "CorsConfig::default_max_age_secs")]
    pub max_age_secs: u64,
}

impl CorsConfig {
    fn default_allow_methods() -> Vec<String> {
        vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
    }

    fn default_allow_headers() -> Vec<String> {
        vec!["content-type".to_string()]
    }

    fn default_expose_headers() -> Vec<String> {
        vec!["content-disposition".to_string()]
    }

    fn default_max_age_secs() -> u64 {
        600
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origins: Vec::new(),
            allow_methods: Self::default_allow_methods(),
            allow_headers: Self::default_allow_headers(),
            expose_headers: Self::default_expose_headers(),
            max_age_secs: Self::default_max_age_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    #[default]
    Off,
    XForwardedFor,
    Forwarded,
}

pub fn parse_method(method: &str) -> Result<Method, String> {
    Method::from_bytes(method.as_bytes())
        .map_err(|_| format!("invalid HTTP method `{method}` in CORS allow_methods"))
}

pub fn parse_header(name: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| format!("invalid HTTP header `{name}` in CORS configuration"))
}
