//! Configuration types for the CNAME flattener
//!
//! This module defines all configuration structures used throughout the
//! workspace. Values are loaded once at process start and passed into
//! component constructors; nothing is reconfigured at runtime.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Lowest TTL the CloudFlare client API accepts other than "automatic"
pub const MIN_TTL: u32 = 120;

/// Highest TTL the CloudFlare client API accepts
pub const MAX_TTL: u32 = 86_400;

/// TTL value meaning "automatic" at the provider
pub const AUTO_TTL: u32 = 1;

/// Main flattener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenConfig {
    /// CNAME target to resolve (e.g. "myapp.herokuapp.com")
    pub cname: String,

    /// Domain whose A records are managed (usually the zone apex)
    pub domain: String,

    /// TTL for records created by the flattener
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Resolver settings
    #[serde(default)]
    pub resolver: ResolverSettings,

    /// DNS provider configuration
    pub provider: ProviderConfig,

    /// Reconciler settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// File touched after every fully successful pass
    #[serde(default)]
    pub liveness_marker: Option<PathBuf>,

    /// Lock file guarding against overlapping passes
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
}

impl FlattenConfig {
    /// Create a configuration with defaults for everything but the essentials
    pub fn new(
        cname: impl Into<String>,
        domain: impl Into<String>,
        provider: ProviderConfig,
    ) -> Self {
        Self {
            cname: cname.into(),
            domain: domain.into(),
            ttl: default_ttl(),
            resolver: ResolverSettings::default(),
            provider,
            engine: EngineConfig::default(),
            liveness_marker: None,
            lock_path: default_lock_path(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.cname.trim().is_empty() {
            return Err(crate::Error::config("CNAME target cannot be empty"));
        }
        if self.domain.trim().is_empty() {
            return Err(crate::Error::config("Domain cannot be empty"));
        }
        if normalize_name(&self.cname) == normalize_name(&self.domain) {
            return Err(crate::Error::config(format!(
                "CNAME target and managed domain are the same name: {}",
                self.domain
            )));
        }
        if self.ttl != AUTO_TTL && !(MIN_TTL..=MAX_TTL).contains(&self.ttl) {
            return Err(crate::Error::config(format!(
                "TTL must be {AUTO_TTL} (automatic) or between {MIN_TTL} and {MAX_TTL}. Got: {}",
                self.ttl
            )));
        }
        if self.lock_path.as_os_str().is_empty() {
            return Err(crate::Error::config("Lock path cannot be empty"));
        }

        self.resolver.validate()?;
        self.provider.validate()?;
        self.engine.validate()?;

        Ok(())
    }
}

/// Name resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Nameservers to query; empty means the host's system configuration
    #[serde(default)]
    pub nameservers: Vec<IpAddr>,

    /// Upper bound for one lookup, in seconds
    #[serde(default = "default_resolve_timeout_secs")]
    pub timeout_secs: u64,
}

impl ResolverSettings {
    /// Validate the resolver settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Resolver timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            timeout_secs: default_resolve_timeout_secs(),
        }
    }
}

/// DNS provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// CloudFlare client API
    Cloudflare {
        /// Account API key
        api_key: String,
        /// Account email address
        email: String,
        /// Zone the domain lives in
        zone: String,
        /// Override for the API endpoint
        #[serde(default)]
        endpoint: Option<String>,
        /// Upper bound for one API request, in seconds
        #[serde(default = "default_http_timeout_secs")]
        http_timeout_secs: u64,
        /// Perform reads, log writes instead of sending them
        #[serde(default)]
        dry_run: bool,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Cloudflare {
                api_key,
                email,
                zone,
                endpoint,
                http_timeout_secs,
                ..
            } => {
                if api_key.is_empty() {
                    return Err(crate::Error::config("CloudFlare API key cannot be empty"));
                }
                if email.is_empty() || !email.contains('@') {
                    return Err(crate::Error::config(
                        "CloudFlare account email must be an email address",
                    ));
                }
                if zone.is_empty() {
                    return Err(crate::Error::config("CloudFlare zone cannot be empty"));
                }
                if let Some(url) = endpoint
                    && !url.starts_with("https://")
                    && !url.starts_with("http://")
                {
                    return Err(crate::Error::config(format!(
                        "CloudFlare endpoint must use HTTP or HTTPS scheme. Got: {url}"
                    )));
                }
                if *http_timeout_secs == 0 {
                    return Err(crate::Error::config("HTTP timeout must be > 0"));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { .. } => "cloudflare",
        }
    }

    /// Whether writes are only logged
    pub fn is_dry_run(&self) -> bool {
        match self {
            ProviderConfig::Cloudflare { dry_run, .. } => *dry_run,
        }
    }
}

// Keeps the API key out of logs.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::Cloudflare {
                email,
                zone,
                endpoint,
                http_timeout_secs,
                dry_run,
                ..
            } => f
                .debug_struct("Cloudflare")
                .field("api_key", &"<REDACTED>")
                .field("email", email)
                .field("zone", zone)
                .field("endpoint", endpoint)
                .field("http_timeout_secs", http_timeout_secs)
                .field("dry_run", dry_run)
                .finish(),
        }
    }
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Extra attempts for retryable failures (0 disables retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay between retry attempts (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_retries > 10 {
            return Err(crate::Error::config(format!(
                "max_retries must be between 0 and 10. Got: {}",
                self.max_retries
            )));
        }
        if self.retry_delay_secs > 300 {
            return Err(crate::Error::config(format!(
                "retry_delay_secs must be at most 300. Got: {}",
                self.retry_delay_secs
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

/// Lowercase a DNS name and drop a trailing root dot
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn default_ttl() -> u32 {
    120
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("cname-flattener.lock")
}

fn default_resolve_timeout_secs() -> u64 {
    10
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    2
}

fn default_retry_delay_secs() -> u64 {
    5
}
