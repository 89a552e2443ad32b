//! Label sets applied to generated objects
//!
//! Every object the operator generates carries the same deterministic label
//! set, keyed by the owning cluster instance. Selectors (pod selectors,
//! network policy peers) are derived from the same constants so that
//! generation and selection can never drift apart.

use std::collections::BTreeMap;

/// Name of the owning StreamCluster instance
pub const CLUSTER_LABEL: &str = "streamhouse.io/cluster";

/// Name of the generated component (e.g. "my-cluster-quorum")
pub const NAME_LABEL: &str = "streamhouse.io/name";

/// Kind of the owning resource ("StreamCluster") or operator role
pub const KIND_LABEL: &str = "streamhouse.io/kind";

/// Conventional application label
pub const APP_LABEL: &str = "app";

/// Immutable label set for generated objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Base labels for objects owned by the given cluster instance
    pub fn for_cluster(cluster: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert(CLUSTER_LABEL.to_string(), cluster.to_string());
        map.insert(KIND_LABEL.to_string(), "StreamCluster".to_string());
        map.insert(APP_LABEL.to_string(), "streamhouse".to_string());
        Labels(map)
    }

    /// Return a copy with the component name label set
    pub fn with_name(&self, name: &str) -> Self {
        let mut map = self.0.clone();
        map.insert(NAME_LABEL.to_string(), name.to_string());
        Labels(map)
    }

    /// Return a copy with the given extra labels merged in. Operator-owned
    /// keys win over template-supplied ones.
    pub fn with_additional(&self, extra: &BTreeMap<String, String>) -> Self {
        let mut map = extra.clone();
        for (k, v) in &self.0 {
            map.insert(k.clone(), v.clone());
        }
        Labels(map)
    }

    /// The label map used for pod selectors: only the component name label,
    /// so that selector identity survives label additions on the template.
    pub fn selector(name: &str) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(NAME_LABEL.to_string(), name.to_string());
        map
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}
