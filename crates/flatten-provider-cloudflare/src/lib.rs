// # CloudFlare Record Store
//
// This crate manages the A records of one domain through the CloudFlare
// client API (`api_json.html`).
//
// ## Behaviour
//
// - Every call is a form-encoded POST carrying `a` (the action), `tkn`,
//   `email` and `z`, so credentials never appear in URLs
// - `rec_load_all` returns every record of the zone; filtering to the
//   domain's A records happens here, following `has_more` pages
// - Creating a record takes two calls: `rec_new` with `service_mode=1`,
//   then `rec_proxy` with `service_mode=0`. If the second call fails the
//   record exists but is proxied, which is reported as an incomplete create
// - A delete the provider answers with "record not found" is a success
// - Several records with the same address are all listed
// - The listed snapshot is cached until `invalidate()` and kept coherent
//   with this store's own writes
// - No retries; the reconciler owns the retry policy
//
// ## Security
//
// - The API key NEVER appears in logs or `Debug` output
//
// ## API Reference
//
// - `rec_load_all`: `z`, optional offset `o`
// - `rec_new`: `type`, `name`, `content`, `ttl`, `service_mode`
// - `rec_proxy`: `id`, `rtag`, `service_mode`
// - `rec_delete`: `id`

mod envelope;

use async_trait::async_trait;
use flatten_core::config::{FlattenConfig, ProviderConfig, normalize_name};
use flatten_core::traits::{DeleteOutcome, RecordEntry, RecordSnapshot, RecordStore, record_count};
use flatten_core::{Error, Result};
use serde_json::Value;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::Mutex;

/// CloudFlare client API endpoint
pub const CLOUDFLARE_CLIENT_API: &str = "https://www.cloudflare.com/api_json.html";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on `rec_load_all` pages for one listing
const MAX_PAGES: usize = 100;

/// `service_mode` for a record served through the proxy
const SERVICE_MODE_PROXIED: &str = "1";

/// `service_mode` for a plain DNS record
const SERVICE_MODE_DIRECT: &str = "0";

/// Record store backed by the CloudFlare client API
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the store will:
/// - Perform `rec_load_all` as usual
/// - Log the intended `rec_new` / `rec_proxy` / `rec_delete` calls
/// - **NOT** change any record
pub struct CloudflareRecordStore {
    /// Account API key
    /// ⚠️ NEVER log this value
    api_key: String,

    /// Account email
    email: String,

    /// Zone the domain lives in
    zone: String,

    /// Managed domain (normalized)
    domain: String,

    /// TTL for created records
    ttl: u32,

    /// API endpoint
    endpoint: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Request bound, reported in timeout errors
    http_timeout: Duration,

    /// Dry-run mode: read, but log writes instead of sending them
    dry_run: bool,

    /// Snapshot served by `list()` until invalidated
    cache: Mutex<Option<RecordSnapshot>>,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for CloudflareRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareRecordStore")
            .field("api_key", &"<REDACTED>")
            .field("email", &self.email)
            .field("zone", &self.zone)
            .field("domain", &self.domain)
            .field("ttl", &self.ttl)
            .field("endpoint", &self.endpoint)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareRecordStore {
    /// Create a new store against the public endpoint
    ///
    /// # Parameters
    ///
    /// - `api_key`: account API key
    /// - `email`: account email
    /// - `zone`: zone name (e.g. "example.com")
    /// - `domain`: name whose A records are managed
    /// - `ttl`: TTL for created records
    /// - `dry_run`: if true, log writes instead of sending them
    pub fn new(
        api_key: impl Into<String>,
        email: impl Into<String>,
        zone: impl Into<String>,
        domain: &str,
        ttl: u32,
        dry_run: bool,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::config("CloudFlare API key cannot be empty"));
        }

        Ok(Self {
            api_key,
            email: email.into(),
            zone: zone.into(),
            domain: normalize_name(domain),
            ttl,
            endpoint: CLOUDFLARE_CLIENT_API.to_string(),
            client: build_client(DEFAULT_HTTP_TIMEOUT)?,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            dry_run,
            cache: Mutex::new(None),
        })
    }

    /// Create a store from the flattener configuration
    pub fn from_config(config: &FlattenConfig) -> Result<Self> {
        match &config.provider {
            ProviderConfig::Cloudflare {
                api_key,
                email,
                zone,
                endpoint,
                http_timeout_secs,
                dry_run,
            } => {
                if *dry_run {
                    tracing::warn!(
                        "CloudFlare store running in DRY-RUN mode - no records will be changed"
                    );
                }

                let mut store = Self::new(
                    api_key.clone(),
                    email.clone(),
                    zone.clone(),
                    &config.domain,
                    config.ttl,
                    *dry_run,
                )?
                .with_http_timeout(Duration::from_secs(*http_timeout_secs))?;
                if let Some(endpoint) = endpoint {
                    store = store.with_endpoint(endpoint.clone());
                }
                Ok(store)
            }
        }
    }

    /// Send requests to another endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Bound every request by `timeout`
    pub fn with_http_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_client(timeout)?;
        self.http_timeout = timeout;
        Ok(self)
    }

    /// Whether writes are only logged
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// POST one action and return the envelope's `response` payload
    async fn call(&self, action: &str, params: &[(&str, String)]) -> Result<Value> {
        tracing::debug!("CloudFlare {} ({} parameter(s))", action, params.len());

        let mut form: Vec<(&str, &str)> = vec![
            ("a", action),
            ("tkn", self.api_key.as_str()),
            ("email", self.email.as_str()),
            ("z", self.zone.as_str()),
        ];
        form.extend(params.iter().map(|(key, value)| (*key, value.as_str())));

        let response = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| self.request_error(action, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.request_error(action, e))?;

        if !status.is_success() {
            return Err(envelope::status_error(action, status.as_u16(), &body));
        }

        envelope::parse(action, &body)
    }

    fn request_error(&self, action: &str, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::timeout(format!("CloudFlare {action}"), self.http_timeout)
        } else {
            Error::transport(format!("{action}: HTTP request failed: {err}"))
        }
    }

    /// Fetch every page of `rec_load_all` and keep the domain's A records
    async fn fetch_snapshot(&self) -> Result<RecordSnapshot> {
        let mut snapshot = RecordSnapshot::new();
        let mut offset = 0usize;

        for _ in 0..MAX_PAGES {
            let params = if offset == 0 {
                Vec::new()
            } else {
                vec![("o", offset.to_string())]
            };
            let page = envelope::record_page(self.call("rec_load_all", &params).await?)?;

            for raw in page.objs.iter().filter(|r| r.is_a_record_for(&self.domain)) {
                let entry = raw.to_entry()?;
                let records = snapshot.entry(entry.address).or_default();
                if !records.is_empty() {
                    tracing::warn!(
                        "Duplicate A record for {} => {} (record {}, {} already listed)",
                        self.domain,
                        entry.address,
                        entry.record_id,
                        records.len()
                    );
                }
                records.push(entry);
            }

            if !page.has_more {
                return Ok(snapshot);
            }
            if page.objs.is_empty() {
                return Err(Error::protocol(
                    "rec_load_all: has_more set on an empty page",
                ));
            }
            offset += page.objs.len();
        }

        Err(Error::protocol(format!(
            "rec_load_all: more than {MAX_PAGES} pages for zone {}",
            self.zone
        )))
    }

    /// Switch `record_id` to plain DNS
    async fn proxy_off(&self, record_id: &str, tag: &str) -> Result<()> {
        self.call(
            "rec_proxy",
            &[
                ("id", record_id.to_string()),
                ("rtag", tag.to_string()),
                ("service_mode", SERVICE_MODE_DIRECT.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn remember(&self, entry: &RecordEntry) {
        if let Some(snapshot) = self.cache.lock().await.as_mut() {
            let records = snapshot.entry(entry.address).or_default();
            match records.iter_mut().find(|r| r.record_id == entry.record_id) {
                Some(existing) => *existing = entry.clone(),
                None => records.push(entry.clone()),
            }
        }
    }

    async fn forget(&self, record_id: &str) {
        if let Some(snapshot) = self.cache.lock().await.as_mut() {
            for records in snapshot.values_mut() {
                records.retain(|entry| entry.record_id != record_id);
            }
            snapshot.retain(|_, records| !records.is_empty());
        }
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))
}

#[async_trait]
impl RecordStore for CloudflareRecordStore {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn list(&self) -> Result<RecordSnapshot> {
        let mut cache = self.cache.lock().await;
        if let Some(snapshot) = cache.as_ref() {
            tracing::debug!("Serving cached snapshot for {}", self.domain);
            return Ok(snapshot.clone());
        }

        let snapshot = self.fetch_snapshot().await?;
        tracing::debug!(
            "Loaded {} A record(s) for {} from zone {}",
            record_count(&snapshot),
            self.domain,
            self.zone
        );
        *cache = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// Create an unproxied A record
    ///
    /// # API Calls
    ///
    /// ```text
    /// a=rec_new&type=A&name=<domain>&content=<address>&ttl=<ttl>&service_mode=1
    /// a=rec_proxy&id=<rec_id>&rtag=<rec_tag>&service_mode=0
    /// ```
    async fn create(&self, address: Ipv4Addr) -> Result<RecordEntry> {
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would create A record {} => {} (ttl {})",
                self.domain,
                address,
                self.ttl
            );
            return Ok(RecordEntry::new(address, format!("dry-run-{address}")).with_ttl(self.ttl));
        }

        let response = self
            .call(
                "rec_new",
                &[
                    ("type", "A".to_string()),
                    ("name", self.domain.clone()),
                    ("content", address.to_string()),
                    ("ttl", self.ttl.to_string()),
                    ("service_mode", SERVICE_MODE_PROXIED.to_string()),
                ],
            )
            .await?;
        let created = envelope::single_record("rec_new", response)?;
        let record_id = created.rec_id;

        let Some(tag) = created.rec_tag else {
            return Err(Error::IncompleteCreate {
                address,
                record_id,
                message: "rec_new returned no rec_tag".to_string(),
            });
        };

        if let Err(e) = self.proxy_off(&record_id, &tag).await {
            tracing::error!(
                "Record {} for {} => {} was created but is still proxied: {}",
                record_id,
                self.domain,
                address,
                e
            );
            return Err(Error::IncompleteCreate {
                address,
                record_id,
                message: e.to_string(),
            });
        }

        let entry = RecordEntry::new(address, record_id)
            .with_tag(tag)
            .with_ttl(self.ttl);
        self.remember(&entry).await;
        Ok(entry)
    }

    async fn unproxy(&self, entry: &RecordEntry) -> Result<RecordEntry> {
        let tag = entry.tag.as_deref().ok_or_else(|| {
            Error::protocol(format!("record {} has no rec_tag", entry.record_id))
        })?;

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would set service_mode=0 on record {} ({} => {})",
                entry.record_id,
                self.domain,
                entry.address
            );
            return Ok(entry.clone().with_proxied(false));
        }

        self.proxy_off(&entry.record_id, tag).await?;

        let repaired = entry.clone().with_proxied(false);
        self.remember(&repaired).await;
        Ok(repaired)
    }

    async fn delete(&self, record_id: &str) -> Result<DeleteOutcome> {
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would delete record {} of {}",
                record_id,
                self.domain
            );
            return Ok(DeleteOutcome::Deleted);
        }

        let outcome = match self
            .call("rec_delete", &[("id", record_id.to_string())])
            .await
        {
            Ok(_) => DeleteOutcome::Deleted,
            Err(e) if envelope::is_missing_record(&e) => {
                tracing::debug!("Record {} already gone: {}", record_id, e);
                DeleteOutcome::AlreadyAbsent
            }
            Err(e) => return Err(e),
        };

        self.forget(record_id).await;
        Ok(outcome)
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}
