// # Record Store Trait
//
// Defines the interface for the provider-side A records of one domain.
//
// ## Implementations
//
// - CloudFlare client API: `flatten-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use flatten_core::RecordStore;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* RecordStore implementation */;
//
//     let records = store.list().await?;
//     for (address, entries) in &records {
//         for entry in entries {
//             println!("{} -> {}", address, entry.record_id);
//         }
//     }
//
//     let created = store.create("203.0.113.7".parse()?).await?;
//     store.delete(&created.record_id).await?;
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// One provider-side A record for the managed domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    /// Address the record points at
    pub address: Ipv4Addr,
    /// Provider-assigned record id
    pub record_id: String,
    /// Secondary token some provider calls require
    pub tag: Option<String>,
    /// TTL as reported by the provider
    pub ttl: Option<u32>,
    /// Whether the provider serves this record through its proxy
    pub proxied: bool,
}

impl RecordEntry {
    /// Create an unproxied entry without tag or TTL
    pub fn new(address: Ipv4Addr, record_id: impl Into<String>) -> Self {
        Self {
            address,
            record_id: record_id.into(),
            tag: None,
            ttl: None,
            proxied: false,
        }
    }

    /// Set the secondary token
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Set the TTL
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Mark the entry as proxied or not
    pub fn with_proxied(mut self, proxied: bool) -> Self {
        self.proxied = proxied;
        self
    }
}

/// Snapshot of the domain's A records, keyed by address
///
/// Providers allow several records with the same name and address, so every
/// address maps to all of its records in listing order. No list is empty.
pub type RecordSnapshot = BTreeMap<Ipv4Addr, Vec<RecordEntry>>;

/// Number of records in a snapshot
pub fn record_count(snapshot: &RecordSnapshot) -> usize {
    snapshot.values().map(Vec::len).sum()
}

/// Result of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The record existed and was removed
    Deleted,
    /// The provider reported the record as already gone
    AlreadyAbsent,
}

/// Trait for record store implementations
///
/// A store is scoped at construction to one zone, one domain and one set
/// of credentials.
///
/// # Snapshot Caching
///
/// `list()` may serve a snapshot cached by the instance. `invalidate()`
/// drops it so the next `list()` goes to the provider. Implementations
/// keep the cache coherent with their own successful writes.
///
/// # No Retries
///
/// Implementations make the calls they are asked to make and report the
/// outcome. Retry policy belongs to the reconciler.
///
/// # Errors
///
/// - `Error::ProviderAuth`: credentials rejected
/// - `Error::ProviderProtocol`: response did not match the expected envelope
/// - `Error::ProviderTransport`: the provider could not be reached
/// - `Error::ProviderThrottled`: rate limited, retry later
/// - `Error::ProviderRejected`: well-formed refusal
/// - `Error::Timeout`: request bound elapsed
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Domain this store manages
    fn domain(&self) -> &str;

    /// All A records whose name is exactly the managed domain, duplicates included
    async fn list(&self) -> Result<RecordSnapshot, crate::Error>;

    /// Drop any cached snapshot
    async fn invalidate(&self);

    /// Create an unproxied A record for `address`
    ///
    /// If the record is created but cannot be switched to unproxied mode,
    /// returns `Error::IncompleteCreate`; the record is left in place.
    async fn create(&self, address: Ipv4Addr) -> Result<RecordEntry, crate::Error>;

    /// Switch an existing record to unproxied mode
    async fn unproxy(&self, entry: &RecordEntry) -> Result<RecordEntry, crate::Error>;

    /// Delete a record by id; a record that is already gone is not an error
    async fn delete(&self, record_id: &str) -> Result<DeleteOutcome, crate::Error>;

    /// Provider name (for logging)
    fn provider_name(&self) -> &'static str;
}
