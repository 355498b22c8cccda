//! Core traits for the CNAME flattener
//!
//! This module defines the abstract interfaces the reconciler drives.
//!
//! - [`NameResolver`]: Resolve the CNAME target to IPv4 addresses
//! - [`RecordStore`]: List, create and delete the domain's A records
//! - [`ErrorReporter`]: Forward failures to an external tracker

pub mod name_resolver;
pub mod record_store;
pub mod error_reporter;

pub use name_resolver::{AddressSet, NameResolver};
pub use record_store::{DeleteOutcome, RecordEntry, RecordSnapshot, RecordStore, record_count};
pub use error_reporter::{ErrorReporter, FailureNotice, NoopReporter};
