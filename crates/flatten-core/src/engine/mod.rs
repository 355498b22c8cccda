//! Core reconciliation engine
//!
//! The Reconciler is responsible for one pass:
//! - Resolving the CNAME target via NameResolver
//! - Taking one snapshot of the domain's records via RecordStore
//! - Computing the plan (additions, removals, repairs)
//! - Applying it, one operation at a time
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   AddressSet    ┌──────────────┐   RecordSnapshot   ┌──────────────┐
//! │ NameResolver │ ──────────────▶ │  Reconciler  │ ◀───────────────── │ RecordStore  │
//! └──────────────┘                 └──────────────┘                    └──────────────┘
//!                                         │                                   ▲
//!                                         └──── create / delete / unproxy ────┘
//! ```
//!
//! ## Pass Flow
//!
//! 1. Resolve desired addresses D (abort on failure or on an empty answer)
//! 2. Invalidate and list provider records R (abort on failure)
//! 3. Plan: D \ keys(R) to add, keys(R) \ D to remove, extra copies of an
//!    address to remove
//! 4. Create additions, then delete removals, then repair proxied records
//!
//! Creates are not idempotent: a create that may have reached the provider
//! is never resent. Whatever it left behind is listed by the next pass.
//! 5. Return the report; per-item failures never stop sibling operations

pub mod plan;
pub mod report;

pub use plan::ReconciliationPlan;
pub use report::{ApplyFailure, ApplyOperation, ReconciliationReport, RemovedRecord};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::traits::{
    AddressSet, DeleteOutcome, NameResolver, RecordSnapshot, RecordStore, record_count,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Single-pass reconciler
///
/// Owns the retry policy: resolvers and stores never retry on their own.
///
/// ## Ordering
///
/// Additions run before removals so a short resolution answer never drops
/// serving capacity before the new records exist.
pub struct Reconciler {
    /// Resolver for the CNAME target
    resolver: Box<dyn NameResolver>,

    /// Provider records of the managed domain
    store: Box<dyn RecordStore>,

    /// Extra attempts for retryable failures
    max_retries: usize,

    /// Delay between attempts
    retry_delay: Duration,
}

impl Reconciler {
    /// Create a new reconciler
    pub fn new(
        resolver: Box<dyn NameResolver>,
        store: Box<dyn RecordStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }

    /// Domain of the underlying record store
    pub fn domain(&self) -> &str {
        self.store.domain()
    }

    /// Run one reconciliation pass for `cname`
    ///
    /// # Returns
    ///
    /// - `Ok(report)`: the pass ran to completion; check
    ///   [`ReconciliationReport::partial_apply_error`] for per-item failures
    /// - `Err(Error)`: the pass was aborted before changing anything
    pub async fn run(&self, cname: &str) -> Result<ReconciliationReport> {
        let domain = self.store.domain().to_string();
        info!(
            "Starting pass: {} -> {} (resolver: {}, provider: {})",
            cname,
            domain,
            self.resolver.describe(),
            self.store.provider_name()
        );

        let desired = self.resolve_desired(cname).await?;
        let actual = self.snapshot().await?;

        let plan = ReconciliationPlan::compute(&desired, &actual);
        debug!(
            "Plan: {} to add, {} to remove, {} to repair, {} unchanged",
            plan.to_add.len(),
            plan.to_remove.len(),
            plan.to_repair.len(),
            plan.unchanged
        );

        let mut report = ReconciliationReport::new(cname, domain, desired);
        report.unchanged = plan.unchanged;

        if plan.is_empty() {
            info!("A records for {} already match {}", report.domain, cname);
            return Ok(report);
        }

        self.apply(&plan, &mut report).await;

        if report.is_success() {
            info!("Pass complete: {}", report);
        } else {
            warn!("Pass complete with failures: {}", report);
        }

        Ok(report)
    }

    /// Resolve the desired address set, refusing an empty answer
    async fn resolve_desired(&self, cname: &str) -> Result<AddressSet> {
        let desired = self
            .with_retry("resolve", || self.resolver.resolve(cname))
            .await
            .inspect_err(|e| error!("Failed to resolve {}: {}", cname, e))?;

        // Deleting every record because of a resolution blackout would take
        // the domain offline.
        if desired.is_empty() {
            error!(
                "{} resolved to no addresses, leaving {} untouched",
                cname,
                self.store.domain()
            );
            return Err(Error::EmptyResolution(cname.to_string()));
        }

        debug!("{} resolves to {:?}", cname, desired);
        Ok(desired)
    }

    /// Take a fresh snapshot of the provider records
    async fn snapshot(&self) -> Result<RecordSnapshot> {
        self.store.invalidate().await;
        let actual = self
            .with_retry("list", || self.store.list())
            .await
            .inspect_err(|e| error!("Failed to list records for {}: {}", self.store.domain(), e))?;

        debug!(
            "{} has {} A record(s) at {}",
            self.store.domain(),
            record_count(&actual),
            self.store.provider_name()
        );
        Ok(actual)
    }

    /// Apply a plan, recording every outcome in the report
    async fn apply(&self, plan: &ReconciliationPlan, report: &mut ReconciliationReport) {
        let domain = self.store.domain();

        for &address in &plan.to_add {
            let created = self
                .retry_while("create", Error::is_safe_to_resend, || {
                    self.store.create(address)
                })
                .await;
            match created {
                Ok(entry) => {
                    info!(
                        "Added A record: {} => {} (record {})",
                        domain, address, entry.record_id
                    );
                    report.added.push(entry);
                }
                Err(e) => {
                    if e.may_have_applied() {
                        warn!(
                            "A record {} => {} may have been created anyway; the next pass will see it",
                            domain, address
                        );
                    }
                    let failure = ApplyFailure::new(ApplyOperation::Create, address, None, &e);
                    error!("Failed to add A record for {}: {}", domain, failure);
                    report.failures.push(failure);
                }
            }
        }

        for entry in &plan.to_remove {
            let record_id = entry.record_id.as_str();
            match self.with_retry("delete", || self.store.delete(record_id)).await {
                Ok(outcome) => {
                    match outcome {
                        DeleteOutcome::Deleted => info!(
                            "Deleted A record: {} => {} (record {})",
                            domain, entry.address, record_id
                        ),
                        DeleteOutcome::AlreadyAbsent => info!(
                            "A record {} => {} (record {}) was already gone",
                            domain, entry.address, record_id
                        ),
                    }
                    report.removed.push(RemovedRecord {
                        address: entry.address,
                        record_id: record_id.to_string(),
                        outcome,
                    });
                }
                Err(e) => {
                    let failure = ApplyFailure::new(
                        ApplyOperation::Delete,
                        entry.address,
                        Some(record_id.to_string()),
                        &e,
                    );
                    error!("Failed to delete A record for {}: {}", domain, failure);
                    report.failures.push(failure);
                }
            }
        }

        for entry in &plan.to_repair {
            match self.with_retry("unproxy", || self.store.unproxy(entry)).await {
                Ok(repaired) => {
                    info!(
                        "Unproxied A record: {} => {} (record {})",
                        domain, repaired.address, repaired.record_id
                    );
                    report.repaired.push(repaired);
                }
                Err(e) => {
                    let failure = ApplyFailure::new(
                        ApplyOperation::Unproxy,
                        entry.address,
                        Some(entry.record_id.clone()),
                        &e,
                    );
                    error!("Failed to unproxy A record for {}: {}", domain, failure);
                    report.failures.push(failure);
                }
            }
        }
    }

    /// Run `op`, retrying retryable errors up to `max_retries` extra times
    async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry_while(operation, Error::is_retryable, op).await
    }

    /// Run `op`, retrying errors accepted by `retry` up to `max_retries` extra times
    async fn retry_while<T, F, Fut>(
        &self,
        operation: &str,
        retry: fn(&Error) -> bool,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retry(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} attempt {} of {} failed: {}",
                        operation,
                        attempt,
                        self.max_retries + 1,
                        e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
