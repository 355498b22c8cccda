// # hickory Name Resolver
//
// This crate resolves the CNAME target to its current IPv4 addresses
// using `hickory-resolver`.
//
// ## Behaviour
//
// - Queries the configured nameservers, or the host's system resolver
//   configuration when none are given
// - Builds a fresh resolver for every call, so nothing is cached between
//   passes
// - Keeps only `A` answers; the CNAME chain itself is followed by the
//   resolver and then ignored
// - Bounds every lookup with a timeout
//
// Retries are left to the reconciler.

use flatten_core::config::ResolverSettings;
use flatten_core::traits::{AddressSet, NameResolver};
use flatten_core::{Error, Result};

use hickory_resolver::TokioResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;

use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Standard DNS port
const DNS_PORT: u16 = 53;

/// Name resolver backed by hickory
#[derive(Debug, Clone)]
pub struct HickoryResolver {
    /// Explicit nameservers; empty means system configuration
    nameservers: Vec<IpAddr>,

    /// Upper bound for one lookup
    timeout: Duration,
}

impl HickoryResolver {
    /// Resolver using the host's system configuration
    pub fn system(timeout: Duration) -> Self {
        Self {
            nameservers: Vec::new(),
            timeout,
        }
    }

    /// Resolver querying only `nameservers`
    pub fn with_nameservers(nameservers: Vec<IpAddr>, timeout: Duration) -> Self {
        Self {
            nameservers,
            timeout,
        }
    }

    /// Build from validated resolver settings
    pub fn from_settings(settings: &ResolverSettings) -> Self {
        Self::with_nameservers(
            settings.nameservers.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    /// Lookup timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn options(&self) -> ResolverOpts {
        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.cache_size = 0;
        opts
    }

    /// Build a new resolver for one lookup
    fn build(&self) -> TokioResolver {
        if !self.nameservers.is_empty() {
            let config = ResolverConfig::from_parts(
                None,
                vec![],
                NameServerConfigGroup::from_ips_clear(&self.nameservers, DNS_PORT, true),
            );
            return TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
                .with_options(self.options())
                .build();
        }

        #[cfg(any(unix, target_os = "windows"))]
        {
            match TokioResolver::builder_tokio() {
                Ok(mut builder) => {
                    *builder.options_mut() = self.options();
                    return builder.build();
                }
                Err(e) => {
                    warn!("Failed to load system DNS configuration, using defaults: {}", e);
                }
            }
        }

        TokioResolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .with_options(self.options())
        .build()
    }
}

#[async_trait::async_trait]
impl NameResolver for HickoryResolver {
    async fn resolve(&self, name: &str) -> Result<AddressSet> {
        let resolver = self.build();

        let lookup = tokio::time::timeout(self.timeout, resolver.ipv4_lookup(name))
            .await
            .map_err(|_| Error::timeout(format!("lookup of {}", name), self.timeout))?;

        match lookup {
            Ok(answer) => {
                let addresses: AddressSet = answer.iter().map(|a| a.0).collect();
                debug!("{} answered with {} A record(s)", name, addresses.len());
                if addresses.is_empty() {
                    return Err(Error::EmptyResolution(name.to_string()));
                }
                Ok(addresses)
            }
            Err(e) if e.is_nx_domain() => {
                Err(Error::resolution(name, "name does not exist (NXDOMAIN)"))
            }
            Err(e) if e.is_no_records_found() => Err(Error::EmptyResolution(name.to_string())),
            Err(e) => Err(Error::resolution(name, e.to_string())),
        }
    }

    fn describe(&self) -> String {
        if self.nameservers.is_empty() {
            "system resolver".to_string()
        } else {
            let servers: Vec<String> = self.nameservers.iter().map(|ip| ip.to_string()).collect();
            format!("nameservers {}", servers.join(", "))
        }
    }
}
