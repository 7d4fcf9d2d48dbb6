//! The input resolution algorithm.
//!
//! A pure core: given a snapshot of resource versions and build provenance
//! plus the resolver view of a job's inputs, produce either a complete
//! mapping input → version or nothing. Unresolved is a normal outcome, not
//! an error.

pub mod candidates;
pub mod resolve;
pub mod snapshot;

pub use candidates::{VersionCandidates, VersionEntry};
pub use resolve::{algorithm_input_configs, resolve, InputConfig};
pub use snapshot::{
    BuildInputRow, BuildOutputRow, ResourceVersionRow, SnapshotSource, VersionsSnapshot,
};
