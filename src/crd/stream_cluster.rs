//! StreamCluster CRD
//!
//! The user-declared topology of one deployment of the data platform: broker
//! replicas plus the quorum of coordination nodes. The operator only reads
//! the spec; it is owned by the Kubernetes API.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crd::storage::Storage;

// =============================================================================
// StreamCluster CRD
// =============================================================================

/// StreamCluster declares one deployment of the distributed data platform:
/// a broker topology and the quorum of coordination nodes backing it.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "streamhouse.io",
    version = "v1",
    kind = "StreamCluster",
    plural = "streamclusters",
    shortname = "sc",
    status = "StreamClusterStatus",
    printcolumn = r#"{"name": "Quorum", "type": "integer", "jsonPath": ".spec.quorum.replicas"}"#,
    printcolumn = r#"{"name": "Brokers", "type": "integer", "jsonPath": ".spec.brokers.replicas"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StreamClusterSpec {
    /// Quorum (coordination node) topology
    #[serde(default)]
    pub quorum: QuorumSpec,

    /// Broker topology
    #[serde(default)]
    pub brokers: BrokerSpec,
}

// =============================================================================
// Quorum Spec
// =============================================================================

/// Declared configuration of the quorum nodes
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuorumSpec {
    /// Number of quorum nodes; non-positive values fall back to the default
    #[serde(default)]
    pub replicas: i32,

    /// Storage declaration for the quorum nodes
    #[serde(default)]
    pub storage: Storage,

    /// Container image; overrides the version-to-image catalog
    #[serde(default)]
    pub image: Option<String>,

    /// Platform version to deploy; resolved through the image catalog
    #[serde(default)]
    pub version: Option<String>,

    /// Additional node configuration, rendered into the config map
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Whether the metrics port is exposed
    #[serde(default)]
    pub metrics: bool,

    /// Compute resources for the quorum container
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,

    /// Pod affinity (legacy top-level field; `template.pod.affinity` wins)
    #[serde(default)]
    pub affinity: Option<Affinity>,

    /// Pod tolerations (legacy top-level field; `template.pod.tolerations` wins)
    #[serde(default)]
    pub tolerations: Option<Vec<Toleration>>,

    /// Structured per-object customization
    #[serde(default)]
    pub template: Option<QuorumTemplate>,
}

/// Structured customization of the generated objects
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuorumTemplate {
    /// Extra metadata for the StatefulSet
    #[serde(default)]
    pub statefulset: Option<MetadataTemplate>,

    /// Pod-level customization
    #[serde(default)]
    pub pod: Option<PodTemplate>,

    /// Extra metadata for the client service
    #[serde(default)]
    pub client_service: Option<MetadataTemplate>,

    /// Extra metadata for the headless nodes service
    #[serde(default)]
    pub nodes_service: Option<MetadataTemplate>,

    /// Disruption budget customization
    #[serde(default)]
    pub pod_disruption_budget: Option<PodDisruptionBudgetTemplate>,
}

/// Extra labels and annotations applied to a generated object
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetadataTemplate {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Pod-level template customization
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    /// Extra pod metadata
    #[serde(default)]
    pub metadata: Option<MetadataTemplate>,

    /// Pod affinity; takes precedence over the legacy top-level field
    #[serde(default)]
    pub affinity: Option<Affinity>,

    /// Pod tolerations; take precedence over the legacy top-level field
    #[serde(default)]
    pub tolerations: Option<Vec<Toleration>>,

    /// Grace period for pod termination in seconds
    #[serde(default)]
    pub termination_grace_period_seconds: Option<i64>,
}

/// Disruption budget template
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodDisruptionBudgetTemplate {
    /// Extra metadata for the PodDisruptionBudget
    #[serde(default)]
    pub metadata: Option<MetadataTemplate>,

    /// Maximum number of quorum pods down voluntarily at once
    #[serde(default)]
    pub max_unavailable: Option<i32>,
}

// =============================================================================
// Broker Spec
// =============================================================================

/// Declared configuration of the brokers. Only the fields the quorum model
/// depends on (image fallback, network policy peer) are modeled here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSpec {
    /// Number of broker nodes
    #[serde(default)]
    pub replicas: i32,

    /// Broker container image
    #[serde(default)]
    pub image: Option<String>,

    /// Broker platform version
    #[serde(default)]
    pub version: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of the StreamCluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StreamClusterStatus {
    /// Current phase
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Last reconcile time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_reconcile_time: Option<DateTime<Utc>>,

    /// Conditions
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

/// Cluster lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClusterPhase {
    #[default]
    Pending,
    Ready,
    Failed,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Pending => write!(f, "Pending"),
            ClusterPhase::Ready => write!(f, "Ready"),
            ClusterPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition for the cluster status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: String,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Implementations
// =============================================================================

impl StreamCluster {
    /// Get the instance name of this cluster
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Get the namespace of this cluster
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }
}

impl StreamClusterStatus {
    /// Set a condition, replacing existing if same type
    pub fn set_condition(&mut self, condition: ClusterCondition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }

    /// Check if the cluster is ready
    pub fn is_ready(&self) -> bool {
        self.phase == ClusterPhase::Ready
    }
}
