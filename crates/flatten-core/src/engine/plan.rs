//! Reconciliation plan
//!
//! Pure set arithmetic over one desired address set and one provider
//! snapshot. Nothing here performs I/O.

use serde::Serialize;

use crate::traits::{AddressSet, RecordEntry, RecordSnapshot};

/// What a pass has to change at the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    /// Desired addresses with no record at the provider
    pub to_add: AddressSet,
    /// Records whose address is no longer desired, plus extra copies of
    /// desired ones
    pub to_remove: Vec<RecordEntry>,
    /// Records that are desired but served through the provider proxy
    pub to_repair: Vec<RecordEntry>,
    /// Records already correct
    pub unchanged: usize,
}

impl ReconciliationPlan {
    /// Compute `desired \ keys(actual)` and `keys(actual) \ desired`
    ///
    /// Every record of an undesired address is removed. A desired address
    /// keeps exactly one record, an unproxied one when there is one; its
    /// other records are removed.
    pub fn compute(desired: &AddressSet, actual: &RecordSnapshot) -> Self {
        let to_add = desired
            .iter()
            .filter(|address| actual.get(*address).is_none_or(Vec::is_empty))
            .copied()
            .collect();

        let mut to_remove = Vec::new();
        let mut to_repair = Vec::new();
        let mut unchanged = 0;

        for (address, entries) in actual {
            if !desired.contains(address) {
                to_remove.extend(entries.iter().cloned());
                continue;
            }

            let keep = entries.iter().position(|entry| !entry.proxied).unwrap_or(0);
            for (index, entry) in entries.iter().enumerate() {
                if index != keep {
                    to_remove.push(entry.clone());
                } else if entry.proxied {
                    to_repair.push(entry.clone());
                } else {
                    unchanged += 1;
                }
            }
        }

        Self {
            to_add,
            to_remove,
            to_repair,
            unchanged,
        }
    }

    /// True when the provider already matches the desired set
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_repair.is_empty()
    }

    /// Record ids scheduled for deletion
    pub fn remove_ids(&self) -> Vec<&str> {
        self.to_remove
            .iter()
            .map(|entry| entry.record_id.as_str())
            .collect()
    }

    /// Number of provider operations the plan calls for
    pub fn operation_count(&self) -> usize {
        self.to_add.len() + self.to_remove.len() + self.to_repair.len()
    }
}
