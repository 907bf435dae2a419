//! Server settings shared by the router, the link store and the TLS listener

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

/// Route prefixes owned by the server itself. The temp-link base may not shadow them.
pub const RESERVED_PREFIXES: &[&str] = &["/walk", "/download", "/gettemplink", "/favicon.ico"];

/// Default lifetime of a temporary link, in hours
pub const DEFAULT_TEMP_LINK_HOURS: i64 = 48;

/// Default interval between background sweeps of the link store
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Settings validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("temp link lifetime must be at least one hour, got {0}")]
    InvalidTempLinkHours(i64),

    #[error("temp link lifetime of {0} hours is too large")]
    TempLinkHoursTooLarge(i64),

    #[error("temp link base must be a non-root path starting with '/', got {0:?}")]
    InvalidTempLinkBase(String),

    #[error("temp link base {0:?} collides with a built-in route")]
    ReservedTempLinkBase(String),

    #[error("sweep interval must be greater than zero")]
    InvalidSweepInterval,
}

/// Basic auth credentials. Auth is disabled when either half is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Whether requests to protected routes must carry these credentials
    pub fn is_enabled(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Everything the file server needs to run
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Directory served to clients; every resolved path stays inside it
    pub root_dir: PathBuf,
    /// Address the TLS listener binds to
    pub listen_addr: SocketAddr,
    /// PEM certificate chain
    pub cert_file: PathBuf,
    /// PEM private key
    pub key_file: PathBuf,
    /// Lifetime of minted temp links, in hours
    pub temp_link_hours: i64,
    /// Route prefix under which temp links are served, e.g. `/temp`
    pub temp_link_base: String,
    /// Optional basic auth gate for protected routes
    pub credentials: Credentials,
    /// Public base URL used when printing temp links (e.g. `https://files.example.com`)
    pub public_url: Option<String>,
    /// Icon served at `/favicon.ico`
    pub favicon: PathBuf,
    /// Interval of the background link sweep
    pub sweep_interval: Duration,
}

impl ServerSettings {
    /// Settings with defaults for everything except the served root
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            cert_file: PathBuf::from("./localhost.crt"),
            key_file: PathBuf::from("./localhost.key"),
            temp_link_hours: DEFAULT_TEMP_LINK_HOURS,
            temp_link_base: "/temp".to_string(),
            credentials: Credentials::default(),
            public_url: None,
            favicon: PathBuf::from("./favicon.ico"),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Check the settings for values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temp_link_hours < 1 {
            return Err(ConfigError::InvalidTempLinkHours(self.temp_link_hours));
        }
        // Links minted now must still have a representable deadline
        let ttl = self
            .temp_link_ttl()
            .ok_or(ConfigError::TempLinkHoursTooLarge(self.temp_link_hours))?;
        if Utc::now().checked_add_signed(ttl).is_none() {
            return Err(ConfigError::TempLinkHoursTooLarge(self.temp_link_hours));
        }

        let base = self.temp_link_base.trim_end_matches('/');
        if base.is_empty() || !base.starts_with('/') || base[1..].contains('/') {
            return Err(ConfigError::InvalidTempLinkBase(self.temp_link_base.clone()));
        }
        if RESERVED_PREFIXES.contains(&base) {
            return Err(ConfigError::ReservedTempLinkBase(self.temp_link_base.clone()));
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidSweepInterval);
        }

        Ok(())
    }

    /// Lifetime of minted temp links, `None` if it does not fit a `chrono::Duration`
    pub fn temp_link_ttl(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_hours(self.temp_link_hours)
    }

    /// Temp link base without a trailing slash, e.g. `/temp`
    pub fn temp_link_route(&self) -> &str {
        self.temp_link_base.trim_end_matches('/')
    }
}
