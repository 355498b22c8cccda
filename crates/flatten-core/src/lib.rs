// # flatten-core
//
// Core library for CNAME flattening.
//
// ## Architecture Overview
//
// This library keeps the A records of one domain at a DNS provider equal
// to the IPv4 addresses a CNAME target currently resolves to:
// - **NameResolver**: Trait for resolving the CNAME target
// - **RecordStore**: Trait for listing, creating and deleting the domain's A records
// - **ErrorReporter**: Trait for forwarding failures to an error tracker
// - **Reconciler**: Single-pass engine that resolves, diffs and applies
// - **PassLock** / **LivenessMarker**: Overlap guard and last-success marker
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Resolution and provider access live in their own crates
// 2. **Single Pass**: Each run takes one snapshot of both sides and applies one plan
// 3. **Fail Safe**: An empty resolution never deletes records
// 4. **Engine-Owned Retries**: Implementations report errors, the reconciler retries
// 5. **Library-First**: The binary is a thin layer over this crate

pub mod traits;
pub mod engine;
pub mod config;
pub mod error;
pub mod state;

// Re-export core types for convenience
pub use traits::{
    AddressSet, DeleteOutcome, ErrorReporter, FailureNotice, NameResolver, NoopReporter,
    RecordEntry, RecordSnapshot, RecordStore,
};
pub use engine::{ApplyFailure, ApplyOperation, ReconciliationPlan, ReconciliationReport, Reconciler};
pub use config::{EngineConfig, FlattenConfig, ProviderConfig, ResolverSettings};
pub use error::{Error, ErrorKind, Result};
pub use state::{LivenessMarker, PassLock};
