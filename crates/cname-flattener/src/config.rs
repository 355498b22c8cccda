// Environment configuration for the cname-flattener binary.
//
// Every setting comes from an environment variable. Values are read
// through a lookup function so tests can supply their own environment.

use anyhow::{Context, Result};
use flatten_core::config::{EngineConfig, FlattenConfig, ProviderConfig, ResolverSettings};
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::logging::{LogSettings, Rotation};

/// Binary configuration, as read from the environment
#[derive(Debug)]
pub struct Config {
    pub cname: String,
    pub domain: String,
    pub ttl: Option<u32>,
    pub nameservers: Vec<IpAddr>,
    pub resolve_timeout_secs: Option<u64>,
    pub api_key: String,
    pub email: String,
    pub zone: Option<String>,
    pub endpoint: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub max_retries: Option<usize>,
    pub retry_delay_secs: Option<u64>,
    pub liveness_marker: Option<PathBuf>,
    pub lock_path: Option<PathBuf>,
    pub dry_run: bool,
    pub bugsnag_api_key: Option<String>,
    pub bugsnag_release_stage: String,
    pub bugsnag_endpoint: Option<String>,
    pub log: LogSettings,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mode = var("FLATTEN_MODE").unwrap_or_else(|| "live".to_string());
        let dry_run = match mode.to_lowercase().as_str() {
            "live" => false,
            "dry-run" => true,
            other => anyhow::bail!("FLATTEN_MODE '{}' is not valid. Valid modes: live, dry-run", other),
        };

        let rotation = match var("LOG_ROTATION_PERIOD") {
            Some(period) => period.parse::<Rotation>()?,
            None => Rotation::Daily,
        };

        Ok(Self {
            cname: var("FLATTEN_CNAME").context(
                "FLATTEN_CNAME is required. Set it via: export FLATTEN_CNAME=myapp.herokuapp.com",
            )?,
            domain: var("FLATTEN_DOMAIN")
                .context("FLATTEN_DOMAIN is required. Set it via: export FLATTEN_DOMAIN=example.com")?,
            ttl: parse_opt(&var, "FLATTEN_TTL")?,
            nameservers: match var("FLATTEN_NAMESERVERS") {
                Some(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<IpAddr>().with_context(|| {
                            format!("FLATTEN_NAMESERVERS contains an invalid IP address: '{s}'")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            },
            resolve_timeout_secs: parse_opt(&var, "FLATTEN_RESOLVE_TIMEOUT_SECS")?,
            api_key: var("FLATTEN_CLOUDFLARE_API_KEY").unwrap_or_default(),
            email: var("FLATTEN_CLOUDFLARE_EMAIL").unwrap_or_default(),
            zone: var("FLATTEN_CLOUDFLARE_ZONE"),
            endpoint: var("FLATTEN_CLOUDFLARE_ENDPOINT"),
            http_timeout_secs: parse_opt(&var, "FLATTEN_HTTP_TIMEOUT_SECS")?,
            max_retries: parse_opt(&var, "FLATTEN_MAX_RETRIES")?,
            retry_delay_secs: parse_opt(&var, "FLATTEN_RETRY_DELAY_SECS")?,
            liveness_marker: var("FLATTEN_LIVENESS_MARKER").map(PathBuf::from),
            lock_path: var("FLATTEN_LOCK_PATH").map(PathBuf::from),
            dry_run,
            bugsnag_api_key: var("FLATTEN_BUGSNAG_API_KEY"),
            bugsnag_release_stage: var("FLATTEN_BUGSNAG_RELEASE_STAGE")
                .unwrap_or_else(|| "production".to_string()),
            bugsnag_endpoint: var("FLATTEN_BUGSNAG_ENDPOINT"),
            log: LogSettings {
                level: var("FLATTEN_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                path: PathBuf::from(var("LOG_PATH").unwrap_or_else(|| "cname-flattener.log".to_string())),
                rotation,
                max_files: parse_opt(&var, "FLATTEN_LOG_MAX_FILES")?.unwrap_or(7),
            },
        })
    }

    /// Validate the configuration
    ///
    /// Checks that both names are plausible DNS names and that the
    /// CloudFlare credentials are present, then runs the library-side
    /// validation on the assembled [`FlattenConfig`].
    pub fn validate(&self) -> Result<()> {
        validate_domain_name("FLATTEN_CNAME", &self.cname)?;
        validate_domain_name("FLATTEN_DOMAIN", &self.domain)?;
        if let Some(ref zone) = self.zone {
            validate_domain_name("FLATTEN_CLOUDFLARE_ZONE", zone)?;
        }

        if self.api_key.is_empty() {
            anyhow::bail!(
                "FLATTEN_CLOUDFLARE_API_KEY is required. \
                Set it via: export FLATTEN_CLOUDFLARE_API_KEY=your_key"
            );
        }

        // Check for obvious placeholder keys (common mistake)
        let key_lower = self.api_key.to_lowercase();
        if key_lower.contains("your_key") || key_lower.contains("replace_me") || key_lower == "key" {
            anyhow::bail!(
                "FLATTEN_CLOUDFLARE_API_KEY appears to be a placeholder. \
                Use the API key from your CloudFlare account."
            );
        }

        if self.email.is_empty() {
            anyhow::bail!(
                "FLATTEN_CLOUDFLARE_EMAIL is required. \
                Set it via: export FLATTEN_CLOUDFLARE_EMAIL=you@example.com"
            );
        }

        if let Some(ref endpoint) = self.endpoint
            && endpoint.starts_with("http://")
        {
            eprintln!(
                "WARNING: FLATTEN_CLOUDFLARE_ENDPOINT uses HTTP (not HTTPS). \
                Credentials will be sent in clear text."
            );
        }

        if let Some(ref endpoint) = self.bugsnag_endpoint
            && !endpoint.starts_with("https://")
            && !endpoint.starts_with("http://")
        {
            anyhow::bail!(
                "FLATTEN_BUGSNAG_ENDPOINT must use HTTP or HTTPS scheme. Got: {}",
                endpoint
            );
        }

        match self.log.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "FLATTEN_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log.level
            ),
        }

        if self.log.max_files == 0 {
            anyhow::bail!("FLATTEN_LOG_MAX_FILES must be at least 1");
        }

        if self.log.path.file_name().is_none() {
            anyhow::bail!(
                "LOG_PATH must name a file. Got: {}",
                self.log.path.display()
            );
        }

        self.to_flatten_config().validate()?;
        Ok(())
    }

    /// Assemble the library configuration
    pub fn to_flatten_config(&self) -> FlattenConfig {
        let provider = ProviderConfig::Cloudflare {
            api_key: self.api_key.clone(),
            email: self.email.clone(),
            zone: self.zone.clone().unwrap_or_else(|| self.domain.clone()),
            endpoint: self.endpoint.clone(),
            http_timeout_secs: self.http_timeout_secs.unwrap_or(30),
            dry_run: self.dry_run,
        };

        let mut config = FlattenConfig::new(self.cname.clone(), self.domain.clone(), provider);
        if let Some(ttl) = self.ttl {
            config.ttl = ttl;
        }

        let mut resolver = ResolverSettings {
            nameservers: self.nameservers.clone(),
            ..ResolverSettings::default()
        };
        if let Some(timeout) = self.resolve_timeout_secs {
            resolver.timeout_secs = timeout;
        }
        config.resolver = resolver;

        let mut engine = EngineConfig::default();
        if let Some(max_retries) = self.max_retries {
            engine.max_retries = max_retries;
        }
        if let Some(delay) = self.retry_delay_secs {
            engine.retry_delay_secs = delay;
        }
        config.engine = engine;

        config.liveness_marker = self.liveness_marker.clone();
        if let Some(ref lock_path) = self.lock_path {
            config.lock_path = lock_path.clone();
        }

        config
    }
}

/// Parse an optional numeric variable
fn parse_opt<T, V>(var: &V, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("{key} is not a valid number: '{value}'"))
        })
        .transpose()
}

/// Validate that a string is a valid domain name
///
/// This implements basic DNS domain name validation per RFC 1035.
/// It's not comprehensive but catches common errors.
fn validate_domain_name(var: &str, domain: &str) -> Result<()> {
    let domain = domain.strip_suffix('.').unwrap_or(domain);

    if domain.is_empty() {
        anyhow::bail!("{var}: domain name cannot be empty");
    }

    // Total length limit (RFC 1035: 253 chars max)
    if domain.len() > 253 {
        anyhow::bail!(
            "{var}: domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        );
    }

    for label in domain.split('.') {
        if label.is_empty() {
            anyhow::bail!("{var}: domain name has empty label: '{}'", domain);
        }

        if label.len() > 63 {
            anyhow::bail!(
                "{var}: domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            );
        }

        // Underscores show up in service names behind CNAMEs
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            anyhow::bail!(
                "{var}: domain label contains invalid characters. Label: '{}'. \
                Valid: alphanumeric, hyphen and underscore only.",
                label
            );
        }

        if label.starts_with('-') || label.ends_with('-') {
            anyhow::bail!(
                "{var}: domain label cannot start or end with hyphen. Label: '{}'",
                label
            );
        }
    }

    Ok(())
}
