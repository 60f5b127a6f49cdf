use std::{fmt, net::SocketAddr, time::Duration};

use serde::Deserialize;

/// Settings read from `PORKBUN_*` environment variables.
///
/// Immutable after startup. Constructors take it by reference so tests can
/// build independent providers with their own filters and credentials.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Porkbun API key (PORKBUN_API_KEY)
    pub api_key: String,

    /// Porkbun secret API key (PORKBUN_SECRET_KEY)
    pub secret_key: String,

    /// Comma-separated list of domain suffixes this webhook owns
    pub domain_filter: String,

    /// Log mutations instead of sending them
    #[serde(default)]
    pub dry_run: bool,

    /// Base URL of the Porkbun JSON API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Default TTL when the endpoint doesn't specify one
    #[serde(default = "default_ttl")]
    pub default_ttl: u32,

    /// Address the webhook listens on, `host:port` or `:port`
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// `logfmt` (plain text) or `json`
    #[serde(default)]
    pub log_format: LogFormat,

    /// Level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Attempts per registrar call, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Timeout of a single HTTP request to Porkbun
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Deadline for a whole webhook call (records listing or a change batch)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    #[serde(alias = "text")]
    Logfmt,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("PORKBUN_DOMAIN_FILTER must name at least one domain")]
    EmptyDomainFilter,
    #[error("{0} must not be empty")]
    MissingCredential(&'static str),
    #[error("PORKBUN_MAX_ATTEMPTS must be at least 1")]
    NoAttempts,
    #[error("PORKBUN_LISTEN_ADDRESS {0:?} is not a socket address")]
    BadListenAddress(String),
    #[error("PORKBUN_LOG_LEVEL {0:?} is not one of debug, info, warn, error")]
    BadLogLevel(String),
}

impl Config {
    /// Parse from environment variables (PORKBUN_API_KEY, PORKBUN_DOMAIN_FILTER, …)
    pub fn from_env() -> anyhow::Result<Self> {
        let cfg = envy::prefixed("PORKBUN_").from_env::<Config>()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build a config with every optional setting at its default.
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>, domain_filter: &[&str]) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            domain_filter: domain_filter.join(","),
            dry_run: false,
            api_url: default_api_url(),
            default_ttl: default_ttl(),
            listen_address: default_listen_address(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            http_timeout_secs: default_http_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("PORKBUN_API_KEY"));
        }
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("PORKBUN_SECRET_KEY"));
        }
        if self.domain_filter_list().is_empty() {
            return Err(ConfigError::EmptyDomainFilter);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        self.listen_addr()?;
        self.tracing_level()?;
        Ok(())
    }

    /// The listen address; a bare `:port` binds every interface.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = self.listen_address.trim();
        let full = match raw.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => raw.to_string(),
        };
        full.parse()
            .map_err(|_| ConfigError::BadListenAddress(self.listen_address.clone()))
    }

    /// `log_level` as a tracing level name. `warning`, `fatal` and `panic`
    /// are accepted for compatibility with older deployments.
    pub fn tracing_level(&self) -> Result<&'static str, ConfigError> {
        match self.log_level.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok("trace"),
            "debug" => Ok("debug"),
            "info" => Ok("info"),
            "warn" | "warning" => Ok("warn"),
            "error" | "fatal" | "panic" => Ok("error"),
            _ => Err(ConfigError::BadLogLevel(self.log_level.clone())),
        }
    }

    /// EnvFilter directives used when RUST_LOG is not set.
    pub fn default_log_filter(&self) -> String {
        let level = self.tracing_level().unwrap_or("info");
        format!("porkbun_webhook={level},server={level},tower_http={level}")
    }

    /// Return the domain filter as a Vec<String>, lowercased and without
    /// trailing dots. Order is kept, duplicates are dropped.
    pub fn domain_filter_list(&self) -> Vec<String> {
        let mut list: Vec<String> = Vec::new();
        for entry in self
            .domain_filter
            .split(',')
            .map(|s| s.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|s| !s.is_empty())
        {
            if !list.contains(&entry) {
                list.push(entry);
            }
        }
        list
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Credentials never reach the logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<REDACTED>")
            .field("secret_key", &"<REDACTED>")
            .field("domain_filter", &self.domain_filter)
            .field("dry_run", &self.dry_run)
            .field("api_url", &self.api_url)
            .field("default_ttl", &self.default_ttl)
            .field("listen_address", &self.listen_address)
            .field("log_format", &self.log_format)
            .field("log_level", &self.log_level)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn default_api_url()              -> String { "https://api.porkbun.com/api/json/v3".into() }
fn default_ttl()                  -> u32    { 600 }
fn default_listen_address()       -> String { ":8888".into() }
fn default_log_level()            -> String { "info".into() }
fn default_max_attempts()         -> u32    { 5 }
fn default_retry_base_delay_ms()  -> u64    { 500 }
fn default_retry_max_delay_ms()   -> u64    { 10_000 }
fn default_http_timeout_secs()    -> u64    { 30 }
fn default_request_timeout_secs() -> u64    { 120 }
