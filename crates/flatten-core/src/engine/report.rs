//! Reconciliation report
//!
//! Everything a pass did, logged at the end of every completed pass and
//! used by the binary to decide its exit code.

use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, ErrorKind};
use crate::traits::{AddressSet, DeleteOutcome, RecordEntry};

/// Provider operation a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOperation {
    Create,
    Delete,
    Unproxy,
}

impl fmt::Display for ApplyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApplyOperation::Create => "create",
            ApplyOperation::Delete => "delete",
            ApplyOperation::Unproxy => "unproxy",
        })
    }
}

/// A single create/delete/unproxy that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyFailure {
    /// Which operation failed
    pub operation: ApplyOperation,
    /// Address the operation was for
    pub address: Ipv4Addr,
    /// Record id involved, when one is known
    pub record_id: Option<String>,
    /// Failure classification
    pub kind: ErrorKind,
    /// Error message
    pub message: String,
    /// The provider refused an operation computed from the snapshot,
    /// so its records may have changed since `list` was called
    pub possibly_stale: bool,
}

impl ApplyFailure {
    /// Build a failure record from an error
    pub fn new(
        operation: ApplyOperation,
        address: Ipv4Addr,
        record_id: Option<String>,
        err: &Error,
    ) -> Self {
        // An incomplete create does know the id of the record it left behind.
        let record_id = match err {
            Error::IncompleteCreate { record_id, .. } => Some(record_id.clone()),
            _ => record_id,
        };

        Self {
            operation,
            address,
            record_id,
            kind: err.kind(),
            message: err.to_string(),
            possibly_stale: matches!(err.kind(), ErrorKind::ProviderRejected),
        }
    }
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.address)?;
        if let Some(ref id) = self.record_id {
            write!(f, " (record {id})")?;
        }
        write!(f, " failed [{}]: {}", self.kind, self.message)?;
        if self.possibly_stale {
            f.write_str(" (provider state may have changed since the snapshot)")?;
        }
        Ok(())
    }
}

/// A record removed by the pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedRecord {
    pub address: Ipv4Addr,
    pub record_id: String,
    pub outcome: DeleteOutcome,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// CNAME target that was resolved
    pub cname: String,
    /// Domain whose records were reconciled
    pub domain: String,
    /// Addresses the CNAME resolved to
    pub desired: AddressSet,
    /// Records created
    pub added: Vec<RecordEntry>,
    /// Records removed (including ones already gone)
    pub removed: Vec<RemovedRecord>,
    /// Records switched back to unproxied mode
    pub repaired: Vec<RecordEntry>,
    /// Records that needed no change
    pub unchanged: usize,
    /// Operations that failed
    pub failures: Vec<ApplyFailure>,
}

impl ReconciliationReport {
    /// Start an empty report for a pass
    pub fn new(cname: impl Into<String>, domain: impl Into<String>, desired: AddressSet) -> Self {
        Self {
            cname: cname.into(),
            domain: domain.into(),
            desired,
            added: Vec::new(),
            removed: Vec::new(),
            repaired: Vec::new(),
            unchanged: 0,
            failures: Vec::new(),
        }
    }

    pub fn added_count(&self) -> usize {
        self.added.len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// Number of provider operations attempted
    pub fn attempted(&self) -> usize {
        self.added.len() + self.removed.len() + self.repaired.len() + self.failures.len()
    }

    /// True when every attempted operation succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures for a given address
    pub fn failures_for(&self, address: Ipv4Addr) -> impl Iterator<Item = &ApplyFailure> {
        self.failures
            .iter()
            .filter(move |failure| failure.address == address)
    }

    /// `Error::PartialApply` if any operation failed
    pub fn partial_apply_error(&self) -> Option<Error> {
        if self.failures.is_empty() {
            None
        } else {
            Some(Error::PartialApply {
                failed: self.failures.len(),
                attempted: self.attempted(),
            })
        }
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}: {} desired, {} added, {} removed, {} repaired, {} unchanged, {} failed",
            self.cname,
            self.domain,
            self.desired.len(),
            self.added.len(),
            self.removed.len(),
            self.repaired.len(),
            self.unchanged,
            self.failures.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_clean_report_has_no_partial_error() {
        let mut report = ReconciliationReport::new(
            "myapp.herokuapp.com",
            "example.com",
            [ip("192.0.2.1")].into_iter().collect(),
        );
        report.added.push(RecordEntry::new(ip("192.0.2.1"), "new-1"));

        assert!(report.is_success());
        assert!(report.partial_apply_error().is_none());
        assert_eq!(report.attempted(), 1);
    }

    #[test]
    fn test_failures_produce_partial_apply() {
        let mut report = ReconciliationReport::new("a.example.net", "example.com", AddressSet::new());
        report.added.push(RecordEntry::new(ip("192.0.2.1"), "new-1"));
        report.failures.push(ApplyFailure::new(
            ApplyOperation::Create,
            ip("192.0.2.2"),
            None,
            &Error::throttled("E_MAXAPI"),
        ));

        match report.partial_apply_error() {
            Some(Error::PartialApply { failed, attempted }) => {
                assert_eq!(failed, 1);
                assert_eq!(attempted, 2);
            }
            other => panic!("expected PartialApply, got {other:?}"),
        }
        assert_eq!(report.failures_for(ip("192.0.2.2")).count(), 1);
        assert_eq!(report.failures_for(ip("192.0.2.1")).count(), 0);
    }

    #[test]
    fn test_incomplete_create_failure_keeps_record_id() {
        let err = Error::IncompleteCreate {
            address: ip("192.0.2.5"),
            record_id: "rec-77".to_string(),
            message: "rec_proxy failed".to_string(),
        };
        let failure = ApplyFailure::new(ApplyOperation::Create, ip("192.0.2.5"), None, &err);

        assert_eq!(failure.record_id.as_deref(), Some("rec-77"));
        assert_eq!(failure.kind, ErrorKind::IncompleteCreate);
        assert!(!failure.possibly_stale);
    }

    #[test]
    fn test_rejected_delete_is_flagged_possibly_stale() {
        let failure = ApplyFailure::new(
            ApplyOperation::Delete,
            ip("192.0.2.9"),
            Some("rec-9".to_string()),
            &Error::rejected("E_INVLDREC", "record is locked"),
        );

        assert!(failure.possibly_stale);
        let rendered = failure.to_string();
        assert!(rendered.contains("rec-9"));
        assert!(rendered.contains("may have changed"));
    }
}
