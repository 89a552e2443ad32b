//! Custom Resource Definitions for the StreamCluster operator
//!
//! This module contains the CRD types:
//! - StreamCluster: one declared deployment of the data platform
//! - Storage: the polymorphic storage declaration for quorum nodes

pub mod storage;
pub mod stream_cluster;

pub use storage::*;
pub use stream_cluster::*;
