//! Desired-state model
//!
//! Pure computation of the desired object graph for one topology instance:
//! - [`labels`]: deterministic label sets and selectors
//! - [`storage_diff`]: the no-data-loss guard for storage edits
//! - [`quorum`]: the quorum model builder and object generators
//! - [`catalog`]: injected collaborators (image catalog, certificate authority)

pub mod catalog;
pub mod labels;
pub mod quorum;
pub mod storage_diff;

pub use catalog::{CertAndKey, CertificateAuthority, VersionCatalog};
pub use labels::Labels;
pub use quorum::{DesiredObjectGraph, QuorumCluster};
pub use storage_diff::{StorageDiff, StorageDiffEntry};
