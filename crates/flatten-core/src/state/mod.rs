//! Filesystem state of the flattener
//!
//! - [`LivenessMarker`]: last-success marker for external monitors
//! - [`PassLock`]: guard against overlapping passes

pub mod lock;
pub mod marker;

pub use lock::PassLock;
pub use marker::{LivenessMarker, MarkerContents};
