//! Test doubles and common utilities for reconciliation contract tests
//!
//! This module provides a scripted resolver and an in-memory provider
//! that record every call, so tests can assert on what the reconciler
//! asked for and in which order.

#![allow(dead_code)]

use flatten_core::error::{Error, Result};
use flatten_core::traits::{
    AddressSet, DeleteOutcome, NameResolver, RecordEntry, RecordSnapshot, RecordStore,
};
use flatten_core::{EngineConfig, Reconciler};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Parse an IPv4 literal
pub fn ip(s: &str) -> Ipv4Addr {
    s.parse().expect("valid IPv4 literal")
}

/// Build an address set from literals
pub fn addresses(list: &[&str]) -> AddressSet {
    list.iter().map(|s| ip(s)).collect()
}

/// A resolver that answers from a script, then repeats its fallback
pub struct ScriptedResolver {
    responses: Mutex<VecDeque<Result<AddressSet>>>,
    fallback: AddressSet,
    calls: Arc<AtomicUsize>,
}

impl ScriptedResolver {
    /// Always answer with `list`
    pub fn new(list: &[&str]) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: addresses(list),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer with `responses` first, in order
    pub fn scripted(responses: Vec<Result<AddressSet>>, fallback: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: addresses(fallback),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl NameResolver for ScriptedResolver {
    async fn resolve(&self, _name: &str) -> Result<AddressSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(self.fallback.clone()),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// A call the reconciler made against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List,
    Invalidate,
    Create(Ipv4Addr),
    Delete(String),
    Unproxy(String),
}

#[derive(Default)]
struct ProviderState {
    /// Records at the "provider", keyed by record id
    records: BTreeMap<String, RecordEntry>,
    /// Snapshot cached by the store instance
    cache: Option<RecordSnapshot>,
    next_id: usize,
    calls: Vec<StoreCall>,
    list_failures: VecDeque<Error>,
    create_failures: HashMap<Ipv4Addr, VecDeque<Error>>,
    /// Creates that land at the provider but still report these errors
    lost_create_replies: HashMap<Ipv4Addr, VecDeque<Error>>,
    delete_failures: HashMap<String, VecDeque<Error>>,
    vanish_on_delete: Vec<String>,
    provider_lists: usize,
}

/// In-memory record store; clones share the same provider state
#[derive(Clone)]
pub struct FakeRecordStore {
    domain: String,
    state: Arc<Mutex<ProviderState>>,
}

impl FakeRecordStore {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            state: Arc::new(Mutex::new(ProviderState::default())),
        }
    }

    /// Seed a record as if someone else created it
    pub fn with_record(self, address: &str, record_id: &str) -> Self {
        self.insert_external(RecordEntry::new(ip(address), record_id));
        self
    }

    /// Insert a record behind the store's back
    pub fn insert_external(&self, entry: RecordEntry) {
        let mut state = self.state.lock().unwrap();
        state.records.insert(entry.record_id.clone(), entry);
    }

    /// Remove a record behind the store's back
    pub fn remove_external(&self, record_id: &str) {
        self.state.lock().unwrap().records.remove(record_id);
    }

    /// Make the next `list` calls fail with these errors
    pub fn fail_list(&self, errors: Vec<Error>) {
        self.state.lock().unwrap().list_failures = errors.into();
    }

    /// Make the next creates for `address` fail with these errors
    pub fn fail_create(&self, address: &str, errors: Vec<Error>) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .insert(ip(address), errors.into());
    }

    /// Make the next creates for `address` reach the provider, leaving a
    /// proxied record, but answer with these errors
    pub fn lose_create_replies(&self, address: &str, errors: Vec<Error>) {
        self.state
            .lock()
            .unwrap()
            .lost_create_replies
            .insert(ip(address), errors.into());
    }

    /// Make the next deletes of `record_id` fail with these errors
    pub fn fail_delete(&self, record_id: &str, errors: Vec<Error>) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(record_id.to_string(), errors.into());
    }

    /// Have `record_id` disappear just before the store deletes it
    pub fn vanish_on_delete(&self, record_id: &str) {
        self.state
            .lock()
            .unwrap()
            .vanish_on_delete
            .push(record_id.to_string());
    }

    /// Addresses that currently have a record at the provider
    pub fn live_addresses(&self) -> AddressSet {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .map(|entry| entry.address)
            .collect()
    }

    /// Every live record for an address
    pub fn records_for(&self, address: &str) -> Vec<RecordEntry> {
        let address = ip(address);
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|entry| entry.address == address)
            .cloned()
            .collect()
    }

    /// Live record for an address
    pub fn record_for(&self, address: &str) -> Option<RecordEntry> {
        let address = ip(address);
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .find(|entry| entry.address == address)
            .cloned()
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of times the provider was actually asked for its records
    pub fn provider_list_count(&self) -> usize {
        self.state.lock().unwrap().provider_lists
    }

    /// Calls that changed records
    pub fn write_calls(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    StoreCall::Create(_) | StoreCall::Delete(_) | StoreCall::Unproxy(_)
                )
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl RecordStore for FakeRecordStore {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn list(&self) -> Result<RecordSnapshot> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::List);

        if let Some(err) = state.list_failures.pop_front() {
            return Err(err);
        }
        if let Some(ref cached) = state.cache {
            return Ok(cached.clone());
        }

        state.provider_lists += 1;
        let mut snapshot = RecordSnapshot::new();
        for entry in state.records.values() {
            snapshot.entry(entry.address).or_default().push(entry.clone());
        }
        state.cache = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn invalidate(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Invalidate);
        state.cache = None;
    }

    async fn create(&self, address: Ipv4Addr) -> Result<RecordEntry> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Create(address));

        if let Some(err) = state
            .create_failures
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        state.next_id += 1;
        let record_id = format!("rec-{}", state.next_id);

        if let Some(err) = state
            .lost_create_replies
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
        {
            let orphan = RecordEntry::new(address, record_id).with_proxied(true);
            state.records.insert(orphan.record_id.clone(), orphan);
            return Err(err);
        }

        let entry = RecordEntry::new(address, record_id);
        state.records.insert(entry.record_id.clone(), entry.clone());
        if let Some(ref mut cache) = state.cache {
            cache.entry(address).or_default().push(entry.clone());
        }
        Ok(entry)
    }

    async fn unproxy(&self, entry: &RecordEntry) -> Result<RecordEntry> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Unproxy(entry.record_id.clone()));

        let record = state
            .records
            .get_mut(&entry.record_id)
            .ok_or_else(|| Error::rejected("E_NOTFOUND", "no such record"))?;
        record.proxied = false;
        Ok(record.clone())
    }

    async fn delete(&self, record_id: &str) -> Result<DeleteOutcome> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Delete(record_id.to_string()));

        if let Some(err) = state
            .delete_failures
            .get_mut(record_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        if state.vanish_on_delete.iter().any(|id| id == record_id) {
            state.records.remove(record_id);
        }

        match state.records.remove(record_id) {
            Some(removed) => {
                if let Some(ref mut cache) = state.cache
                    && let Some(entries) = cache.get_mut(&removed.address)
                {
                    entries.retain(|entry| entry.record_id != record_id);
                    if entries.is_empty() {
                        cache.remove(&removed.address);
                    }
                }
                Ok(DeleteOutcome::Deleted)
            }
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// Engine settings with retries disabled
pub fn no_retries() -> EngineConfig {
    EngineConfig {
        max_retries: 0,
        retry_delay_secs: 0,
    }
}

/// Engine settings with immediate retries
pub fn immediate_retries(max_retries: usize) -> EngineConfig {
    EngineConfig {
        max_retries,
        retry_delay_secs: 0,
    }
}

/// Build a reconciler over a resolver and a shared fake store
pub fn reconciler(
    resolver: ScriptedResolver,
    store: &FakeRecordStore,
    config: &EngineConfig,
) -> Reconciler {
    Reconciler::new(Box::new(resolver), Box::new(store.clone()), config)
}
