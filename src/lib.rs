//! StreamCluster Operator
//!
//! A Kubernetes operator that continuously reconciles declarative
//! `StreamCluster` topologies (brokers plus a quorum of coordination nodes)
//! into live Kubernetes objects, without data loss across upgrades.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Reconciliation Coordinator                   │
//! │     one pass per trigger, single-flight per topology instance    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────┐       ┌──────────────────────────────┐  │
//! │  │   QuorumCluster     │       │   ResourceOperator per kind  │  │
//! │  │   model builder     │ ────► │   (StatefulSet, Services,    │  │
//! │  │   (pure, gated by   │       │    ConfigMap, Secret,        │  │
//! │  │    StorageDiff)     │       │    NetworkPolicy, PDB)       │  │
//! │  └─────────────────────┘       └──────────────┬───────────────┘  │
//! │                                               │                  │
//! │                                 ┌─────────────┴───────────────┐  │
//! │                                 │  Kubernetes API             │  │
//! │                                 │  (CRUD + self-closing watch)│  │
//! │                                 └─────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`operator`]: generic reconciler and pass coordinator
//! - [`model`]: desired-state model builder and storage guard
//! - [`crd`]: Custom Resource Definitions
//! - [`config`]: operator configuration
//! - [`error`]: error types and handling

pub mod config;
pub mod crd;
pub mod error;
pub mod model;
pub mod operator;

// Re-export commonly used types
pub use config::OperatorConfig;

pub use crd::{
    BrokerSpec, ClusterPhase, QuorumSpec, Storage, StreamCluster, StreamClusterSpec,
    StreamClusterStatus,
};

pub use error::{Error, ErrorAction, ObjectFailure, Result};

pub use model::{
    CertAndKey, CertificateAuthority, DesiredObjectGraph, QuorumCluster, StorageDiff,
    VersionCatalog,
};

pub use operator::{
    PassSummary, ReconcileResult, ReconciliationCoordinator, ResourceClient, ResourceOperator,
    SecretBackedCertificateAuthority,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
