//! Reconciliation engine
//!
//! - [`resource`]: the generic per-kind create/patch/delete/watch reconciler
//! - [`coordinator`]: fan-out/fan-in of one pass across all object kinds
//! - [`ca`]: the certificate authority adapter

pub mod ca;
pub mod coordinator;
pub mod resource;

pub use ca::SecretBackedCertificateAuthority;
pub use coordinator::{PassSummary, ReconciledObject, ReconciliationCoordinator};
pub use resource::{KubeResourceClient, ReconcileResult, ResourceClient, ResourceEvent, ResourceOperator};
