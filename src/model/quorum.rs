//! Desired-state model for the quorum topology
//!
//! `QuorumCluster` is a pure computation from the declared `StreamCluster`
//! spec, the version/image catalog and the previously observed storage state
//! to the full set of Kubernetes objects that should exist for the quorum:
//! StatefulSet, client and headless Services, ConfigMap, node certificate
//! Secret, NetworkPolicy and PodDisruptionBudget.
//!
//! Determinism matters here: the diff/patch layer classifies no-op versus
//! changed by comparing generated objects, so identical inputs must produce
//! identical objects (same label maps, same port/volume/env ordering).

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort,
    EmptyDirVolumeSource, EnvVar, ExecAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, Toleration, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort,
    NetworkPolicySpec,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use tracing::warn;

use crate::crd::storage::{JbodStorage, PersistentClaimStorage, Storage, STORAGE_ANNOTATION};
use crate::crd::stream_cluster::{MetadataTemplate, QuorumSpec, StreamCluster};
use crate::error::{Error, Result};
use crate::model::catalog::{CertAndKey, VersionCatalog};
use crate::model::labels::{Labels, KIND_LABEL, NAME_LABEL};
use crate::model::storage_diff::StorageDiff;

// =============================================================================
// Ports and Names
// =============================================================================

pub const CLIENT_PORT: i32 = 2181;
pub const CLIENT_PORT_NAME: &str = "tcp-clients";
pub const CLUSTERING_PORT: i32 = 2888;
pub const CLUSTERING_PORT_NAME: &str = "tcp-clustering";
pub const ELECTION_PORT: i32 = 3888;
pub const ELECTION_PORT_NAME: &str = "tcp-election";
pub const METRICS_PORT: i32 = 9404;
pub const METRICS_PORT_NAME: &str = "tcp-metrics";

const QUORUM_CONTAINER_NAME: &str = "quorum";
const DATA_VOLUME_NAME: &str = "data";
const DATA_MOUNT_PATH: &str = "/var/lib/quorum";
const CONFIG_VOLUME_NAME: &str = "quorum-config";
const CONFIG_MOUNT_PATH: &str = "/opt/streamhouse/custom-config/";
const CERTS_VOLUME_NAME: &str = "quorum-nodes-certs";
const CERTS_MOUNT_PATH: &str = "/etc/streamhouse/quorum-nodes/";
const HEALTHCHECK_PATH: &str = "/opt/streamhouse/quorum_healthcheck.sh";

pub const DEFAULT_REPLICAS: i32 = 3;

// Configuration keys (env variables)
pub const ENV_VAR_NODE_COUNT: &str = "QUORUM_NODE_COUNT";
pub const ENV_VAR_METRICS_ENABLED: &str = "QUORUM_METRICS_ENABLED";
pub const ENV_VAR_CONFIGURATION: &str = "QUORUM_CONFIGURATION";

/// Name of the quorum StatefulSet for the given cluster instance
pub fn quorum_name(cluster: &str) -> String {
    format!("{cluster}-quorum")
}

/// Name of the client-facing service
pub fn client_service_name(cluster: &str) -> String {
    format!("{cluster}-quorum-client")
}

/// Name of the headless service giving nodes stable identities
pub fn headless_service_name(cluster: &str) -> String {
    format!("{cluster}-quorum-nodes")
}

/// Name of the node configuration config map
pub fn config_map_name(cluster: &str) -> String {
    format!("{cluster}-quorum-config")
}

/// Name of the secret holding per-node certificates
pub fn nodes_secret_name(cluster: &str) -> String {
    format!("{cluster}-quorum-nodes")
}

/// Name of the quorum network policy
pub fn network_policy_name(cluster: &str) -> String {
    format!("{cluster}-network-policy-quorum")
}

/// Name of the quorum disruption budget
pub fn pod_disruption_budget_name(cluster: &str) -> String {
    format!("{cluster}-quorum")
}

/// Name of one quorum pod
pub fn pod_name(cluster: &str, node: i32) -> String {
    format!("{}-{node}", quorum_name(cluster))
}

/// Name of the broker stateful set, used as a network policy peer
pub fn broker_name(cluster: &str) -> String {
    format!("{cluster}-broker")
}

/// Name of the auxiliary operator deployment, used as a network policy peer
pub fn ops_deployment_name(cluster: &str) -> String {
    format!("{cluster}-ops")
}

// =============================================================================
// Desired Object Graph
// =============================================================================

/// The complete set of target objects for one quorum topology, computed
/// once per reconciliation pass and never partially applied.
#[derive(Debug, Clone)]
pub struct DesiredObjectGraph {
    pub stateful_set: StatefulSet,
    pub client_service: Service,
    pub headless_service: Service,
    pub config_map: ConfigMap,
    /// Absent when certificate issuance failed this pass; the live secret
    /// is then left untouched.
    pub nodes_secret: Option<Secret>,
    pub network_policy: NetworkPolicy,
    pub pod_disruption_budget: PodDisruptionBudget,
}

// =============================================================================
// QuorumCluster
// =============================================================================

/// Desired-state model of one quorum topology instance
#[derive(Debug, Clone)]
pub struct QuorumCluster {
    namespace: String,
    cluster: String,
    name: String,
    replicas: i32,
    image: String,
    storage: Storage,
    config: BTreeMap<String, String>,
    metrics_enabled: bool,
    resources: Option<ResourceRequirements>,
    affinity: Option<Affinity>,
    tolerations: Option<Vec<Toleration>>,
    labels: Labels,
    owner: OwnerReference,
    template_statefulset: Option<MetadataTemplate>,
    template_pod_metadata: Option<MetadataTemplate>,
    template_client_service: Option<MetadataTemplate>,
    template_nodes_service: Option<MetadataTemplate>,
    template_pdb_metadata: Option<MetadataTemplate>,
    pdb_max_unavailable: i32,
    termination_grace_period_seconds: Option<i64>,
}

impl QuorumCluster {
    /// Build the model from the declared spec, the image catalog and the
    /// storage declaration previously observed on the live StatefulSet.
    ///
    /// Pure modulo catalog lookups: identical inputs produce an identical
    /// model and therefore identical generated objects.
    pub fn from_spec(
        resource: &StreamCluster,
        catalog: &VersionCatalog,
        old_storage: Option<&Storage>,
    ) -> Result<Self> {
        let cluster = resource.name().to_string();
        let namespace = resource.namespace().to_string();
        let quorum = &resource.spec.quorum;

        if let Storage::Jbod(jbod) = &quorum.storage {
            validate_jbod_ids(jbod)?;
        }

        let replicas = if quorum.replicas <= 0 {
            DEFAULT_REPLICAS
        } else {
            quorum.replicas
        };

        let image = resolve_image(resource, catalog)?;
        let storage = resolve_storage(&cluster, quorum, old_storage);

        let template = quorum.template.as_ref();
        let pod_template = template.and_then(|t| t.pod.as_ref());
        let pdb_template = template.and_then(|t| t.pod_disruption_budget.as_ref());

        Ok(QuorumCluster {
            name: quorum_name(&cluster),
            labels: Labels::for_cluster(&cluster),
            owner: owner_reference(resource),
            replicas,
            image,
            storage,
            config: quorum.config.clone(),
            metrics_enabled: quorum.metrics,
            resources: quorum.resources.clone(),
            affinity: merged_affinity(quorum),
            tolerations: merged_tolerations(quorum),
            template_statefulset: template.and_then(|t| t.statefulset.clone()),
            template_pod_metadata: pod_template.and_then(|p| p.metadata.clone()),
            template_client_service: template.and_then(|t| t.client_service.clone()),
            template_nodes_service: template.and_then(|t| t.nodes_service.clone()),
            template_pdb_metadata: pdb_template.and_then(|p| p.metadata.clone()),
            pdb_max_unavailable: pdb_template.and_then(|p| p.max_unavailable).unwrap_or(1),
            termination_grace_period_seconds: pod_template
                .and_then(|p| p.termination_grace_period_seconds),
            cluster,
            namespace,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn replicas(&self) -> i32 {
        self.replicas
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// The storage declaration in effect after gating by the diff policy
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Pod names of all quorum nodes, in ordinal order
    pub fn node_names(&self) -> Vec<String> {
        (0..self.replicas)
            .map(|i| pod_name(&self.cluster, i))
            .collect()
    }

    /// Assemble the full desired object graph for one pass. `certs` is the
    /// outcome of the certificate authority collaborator; when absent the
    /// graph omits the secret so the live one is not overwritten.
    pub fn desired_graph(
        &self,
        certs: Option<&BTreeMap<String, CertAndKey>>,
        peer_namespace_selectors_supported: bool,
    ) -> DesiredObjectGraph {
        DesiredObjectGraph {
            stateful_set: self.generate_stateful_set(),
            client_service: self.generate_client_service(),
            headless_service: self.generate_headless_service(),
            config_map: self.generate_config_map(),
            nodes_secret: certs.map(|c| self.generate_nodes_secret(c)),
            network_policy: self.generate_network_policy(peer_namespace_selectors_supported),
            pod_disruption_budget: self.generate_pod_disruption_budget(),
        }
    }

    // =========================================================================
    // Object Generators
    // =========================================================================

    /// Client-facing ClusterIP service
    pub fn generate_client_service(&self) -> Service {
        let mut ports = Vec::with_capacity(2);
        if self.metrics_enabled {
            ports.push(service_port(METRICS_PORT_NAME, METRICS_PORT));
        }
        ports.push(service_port(CLIENT_PORT_NAME, CLIENT_PORT));

        Service {
            metadata: self.metadata(
                client_service_name(&self.cluster),
                self.template_client_service.as_ref(),
            ),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(Labels::selector(&self.name)),
                ports: Some(ports),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// Headless service giving each node a stable DNS identity
    pub fn generate_headless_service(&self) -> Service {
        Service {
            metadata: self.metadata(
                headless_service_name(&self.cluster),
                self.template_nodes_service.as_ref(),
            ),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                cluster_ip: Some("None".to_string()),
                selector: Some(Labels::selector(&self.name)),
                ports: Some(vec![
                    service_port(CLIENT_PORT_NAME, CLIENT_PORT),
                    service_port(CLUSTERING_PORT_NAME, CLUSTERING_PORT),
                    service_port(ELECTION_PORT_NAME, ELECTION_PORT),
                ]),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// Node configuration, rendered as properties
    pub fn generate_config_map(&self) -> ConfigMap {
        let mut data = BTreeMap::new();
        data.insert("quorum.properties".to_string(), self.render_config());

        ConfigMap {
            metadata: self.metadata(config_map_name(&self.cluster), None),
            data: Some(data),
            ..Default::default()
        }
    }

    fn render_config(&self) -> String {
        // BTreeMap iteration keeps the rendering deterministic
        let mut out = String::new();
        for (key, value) in &self.config {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// The quorum StatefulSet. The storage declaration in effect is recorded
    /// in an annotation so the next pass can recover it.
    pub fn generate_stateful_set(&self) -> StatefulSet {
        let mut metadata = self.metadata(self.name.clone(), self.template_statefulset.as_ref());
        let annotations = metadata.annotations.get_or_insert_with(BTreeMap::new);
        if let Ok(encoded) = self.storage.to_annotation() {
            annotations.insert(STORAGE_ANNOTATION.to_string(), encoded);
        }

        let pod_labels = match &self.template_pod_metadata {
            Some(tpl) => self
                .labels
                .with_name(&self.name)
                .with_additional(&tpl.labels)
                .to_map(),
            None => self.labels.with_name(&self.name).to_map(),
        };
        let pod_annotations = self
            .template_pod_metadata
            .as_ref()
            .filter(|tpl| !tpl.annotations.is_empty())
            .map(|tpl| tpl.annotations.clone());

        StatefulSet {
            metadata,
            spec: Some(StatefulSetSpec {
                replicas: Some(self.replicas),
                service_name: headless_service_name(&self.cluster),
                selector: LabelSelector {
                    match_labels: Some(Labels::selector(&self.name)),
                    match_expressions: None,
                },
                pod_management_policy: Some("Parallel".to_string()),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        annotations: pod_annotations,
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        affinity: self.affinity.clone(),
                        tolerations: self.tolerations.clone(),
                        termination_grace_period_seconds: self.termination_grace_period_seconds,
                        containers: vec![self.quorum_container()],
                        volumes: Some(self.pod_volumes()),
                        ..Default::default()
                    }),
                },
                volume_claim_templates: self.volume_claim_templates(),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn quorum_container(&self) -> Container {
        let mut ports = Vec::with_capacity(4);
        ports.push(container_port(CLIENT_PORT_NAME, CLIENT_PORT));
        ports.push(container_port(CLUSTERING_PORT_NAME, CLUSTERING_PORT));
        ports.push(container_port(ELECTION_PORT_NAME, ELECTION_PORT));
        if self.metrics_enabled {
            ports.push(container_port(METRICS_PORT_NAME, METRICS_PORT));
        }

        Container {
            name: QUORUM_CONTAINER_NAME.to_string(),
            image: Some(self.image.clone()),
            command: Some(vec!["/opt/streamhouse/quorum_run.sh".to_string()]),
            env: Some(self.env_vars()),
            ports: Some(ports),
            volume_mounts: Some(vec![
                volume_mount(DATA_VOLUME_NAME, DATA_MOUNT_PATH),
                volume_mount(CONFIG_VOLUME_NAME, CONFIG_MOUNT_PATH),
                volume_mount(CERTS_VOLUME_NAME, CERTS_MOUNT_PATH),
            ]),
            liveness_probe: Some(exec_probe(HEALTHCHECK_PATH)),
            readiness_probe: Some(exec_probe(HEALTHCHECK_PATH)),
            resources: self.resources.clone(),
            ..Default::default()
        }
    }

    fn env_vars(&self) -> Vec<EnvVar> {
        vec![
            env_var(ENV_VAR_NODE_COUNT, &self.replicas.to_string()),
            env_var(ENV_VAR_METRICS_ENABLED, &self.metrics_enabled.to_string()),
            env_var(ENV_VAR_CONFIGURATION, &self.render_config()),
        ]
    }

    fn pod_volumes(&self) -> Vec<Volume> {
        let mut volumes = Vec::with_capacity(3);
        if let Storage::Ephemeral(ephemeral) = &self.storage {
            volumes.push(Volume {
                name: DATA_VOLUME_NAME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource {
                    size_limit: ephemeral.size_limit.clone().map(Quantity),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        volumes.push(Volume {
            name: CONFIG_VOLUME_NAME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(config_map_name(&self.cluster)),
                ..Default::default()
            }),
            ..Default::default()
        });
        volumes.push(Volume {
            name: CERTS_VOLUME_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(nodes_secret_name(&self.cluster)),
                ..Default::default()
            }),
            ..Default::default()
        });
        volumes
    }

    fn volume_claim_templates(&self) -> Option<Vec<PersistentVolumeClaim>> {
        match &self.storage {
            Storage::Ephemeral(_) => None,
            Storage::PersistentClaim(claim) => {
                Some(vec![self.claim_template(DATA_VOLUME_NAME, claim)])
            }
            Storage::Jbod(jbod) => Some(
                jbod.volumes
                    .iter()
                    .filter_map(|claim| claim.id.map(|id| (id, claim)))
                    .map(|(id, claim)| {
                        self.claim_template(&format!("{DATA_VOLUME_NAME}-{id}"), claim)
                    })
                    .collect(),
            ),
        }
    }

    fn claim_template(&self, name: &str, claim: &PersistentClaimStorage) -> PersistentVolumeClaim {
        let requests = claim.size.clone().map(|size| {
            let mut map = BTreeMap::new();
            map.insert("storage".to_string(), Quantity(size));
            map
        });

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(self.labels.with_name(&self.name).to_map()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: claim.class.clone(),
                resources: Some(VolumeResourceRequirements {
                    requests,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// Per-node persistent volume claims as they will exist once the
    /// StatefulSet controller expands the claim templates.
    pub fn generate_persistent_volume_claims(&self) -> Vec<PersistentVolumeClaim> {
        let claims: Vec<(String, &PersistentClaimStorage)> = match &self.storage {
            Storage::Ephemeral(_) => Vec::new(),
            Storage::PersistentClaim(claim) => vec![(DATA_VOLUME_NAME.to_string(), claim)],
            Storage::Jbod(jbod) => jbod
                .volumes
                .iter()
                .filter_map(|c| c.id.map(|id| (format!("{DATA_VOLUME_NAME}-{id}"), c)))
                .collect(),
        };

        let mut pvcs = Vec::with_capacity(claims.len() * self.replicas as usize);
        for (volume, claim) in claims {
            for node in 0..self.replicas {
                let mut pvc = self.claim_template(&volume, claim);
                pvc.metadata.name = Some(format!("{volume}-{}", pod_name(&self.cluster, node)));
                pvc.metadata.namespace = Some(self.namespace.clone());
                pvcs.push(pvc);
            }
        }
        pvcs
    }

    /// Secret containing one certificate and key per quorum node, signed by
    /// the cluster CA. The cert map comes from the certificate authority
    /// collaborator, keyed by pod name.
    pub fn generate_nodes_secret(&self, certs: &BTreeMap<String, CertAndKey>) -> Secret {
        let mut data = BTreeMap::new();
        for node in self.node_names() {
            if let Some(cert) = certs.get(&node) {
                data.insert(format!("{node}.crt"), ByteString(cert.cert.clone()));
                data.insert(format!("{node}.key"), ByteString(cert.key.clone()));
            }
        }

        Secret {
            metadata: self.metadata(nodes_secret_name(&self.cluster), None),
            data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    /// Ingress rules per port:
    /// - clustering and election ports are open to quorum peers only
    /// - the client port is open to the enumerated trusted peers, plus a
    ///   cross-namespace operator peer when the platform supports combined
    ///   namespace and pod selection; without that capability the rule is
    ///   left unrestricted by peer
    /// - the metrics port, when enabled, gets its own unrestricted rule
    pub fn generate_network_policy(
        &self,
        peer_namespace_selectors_supported: bool,
    ) -> NetworkPolicy {
        let quorum_peer = pod_peer(&self.name);

        let clustering_rule = NetworkPolicyIngressRule {
            ports: Some(vec![
                policy_port(CLUSTERING_PORT),
                policy_port(ELECTION_PORT),
            ]),
            from: Some(vec![quorum_peer.clone()]),
        };

        let clients_from = if peer_namespace_selectors_supported {
            // There is no guarantee the operator namespace carries any
            // particular labels, so its peer matches every namespace.
            let operator_peer = NetworkPolicyPeer {
                pod_selector: Some(LabelSelector {
                    match_labels: Some(one_label(KIND_LABEL, "cluster-operator")),
                    match_expressions: None,
                }),
                namespace_selector: Some(LabelSelector::default()),
                ip_block: None,
            };
            Some(vec![
                pod_peer(&broker_name(&self.cluster)),
                quorum_peer,
                pod_peer(&ops_deployment_name(&self.cluster)),
                operator_peer,
            ])
        } else {
            None
        };

        let clients_rule = NetworkPolicyIngressRule {
            ports: Some(vec![policy_port(CLIENT_PORT)]),
            from: clients_from,
        };

        let mut rules = vec![clustering_rule, clients_rule];

        if self.metrics_enabled {
            rules.push(NetworkPolicyIngressRule {
                ports: Some(vec![policy_port(METRICS_PORT)]),
                from: None,
            });
        }

        NetworkPolicy {
            metadata: self.metadata(network_policy_name(&self.cluster), None),
            spec: Some(NetworkPolicySpec {
                pod_selector: LabelSelector {
                    match_labels: Some(Labels::selector(&self.name)),
                    match_expressions: None,
                },
                ingress: Some(rules),
                ..Default::default()
            }),
        }
    }

    /// Disruption budget for the quorum pods
    pub fn generate_pod_disruption_budget(&self) -> PodDisruptionBudget {
        PodDisruptionBudget {
            metadata: self.metadata(
                pod_disruption_budget_name(&self.cluster),
                self.template_pdb_metadata.as_ref(),
            ),
            spec: Some(PodDisruptionBudgetSpec {
                max_unavailable: Some(IntOrString::Int(self.pdb_max_unavailable)),
                selector: Some(LabelSelector {
                    match_labels: Some(Labels::selector(&self.name)),
                    match_expressions: None,
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn metadata(&self, name: String, template: Option<&MetadataTemplate>) -> ObjectMeta {
        let labels = match template {
            Some(tpl) => self
                .labels
                .with_name(&self.name)
                .with_additional(&tpl.labels)
                .to_map(),
            None => self.labels.with_name(&self.name).to_map(),
        };
        let annotations = template
            .filter(|tpl| !tpl.annotations.is_empty())
            .map(|tpl| tpl.annotations.clone());

        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            annotations,
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        }
    }
}

// =============================================================================
// Resolution Helpers
// =============================================================================

fn resolve_image(resource: &StreamCluster, catalog: &VersionCatalog) -> Result<String> {
    let quorum = &resource.spec.quorum;
    let brokers = &resource.spec.brokers;

    if let Some(image) = &quorum.image {
        return Ok(image.clone());
    }

    // No explicit quorum image: go through the catalog, falling back to the
    // broker image derivation when the quorum version has no mapping.
    catalog
        .resolve_image(None, quorum.version.as_deref())
        .or_else(|_| catalog.resolve_image(brokers.image.as_deref(), brokers.version.as_deref()))
}

/// Every JBOD volume must carry a distinct id: claim template names and the
/// storage diff are keyed by it, so id-less or duplicate volumes would
/// silently collapse into one.
fn validate_jbod_ids(jbod: &JbodStorage) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for volume in &jbod.volumes {
        let id = volume.id.ok_or_else(|| {
            Error::Configuration("every volume in a JBOD declaration requires an id".into())
        })?;
        if !seen.insert(id) {
            return Err(Error::Configuration(format!(
                "duplicate JBOD volume id {id}"
            )));
        }
    }
    Ok(())
}

/// Gate the requested storage declaration behind the diff policy. On any
/// disallowed difference the declaration in effect is kept and the rejected
/// changes are surfaced as warnings; this is a safety policy, not an error.
fn resolve_storage(cluster: &str, quorum: &QuorumSpec, old_storage: Option<&Storage>) -> Storage {
    let Some(old) = old_storage else {
        return quorum.storage.clone();
    };

    let diff = StorageDiff::new(old, &quorum.storage);
    if diff.is_empty() {
        quorum.storage.clone()
    } else {
        warn!(
            cluster,
            "Only deleteClaim flag changes and persistent claim size increases are allowed \
             for quorum storage; all requested storage changes will be ignored"
        );
        for entry in diff.disallowed() {
            warn!(cluster, "Rejected storage change: {entry}");
        }
        old.clone()
    }
}

fn merged_affinity(quorum: &QuorumSpec) -> Option<Affinity> {
    let template_affinity = quorum
        .template
        .as_ref()
        .and_then(|t| t.pod.as_ref())
        .and_then(|p| p.affinity.as_ref());

    match template_affinity {
        Some(affinity) => {
            if quorum.affinity.is_some() {
                warn!(
                    "Affinity given on both spec.quorum.affinity and \
                     spec.quorum.template.pod.affinity; latter takes precedence"
                );
            }
            Some(affinity.clone())
        }
        None => quorum.affinity.clone(),
    }
}

fn merged_tolerations(quorum: &QuorumSpec) -> Option<Vec<Toleration>> {
    let template_tolerations = quorum
        .template
        .as_ref()
        .and_then(|t| t.pod.as_ref())
        .and_then(|p| p.tolerations.as_ref());

    match template_tolerations {
        Some(tolerations) => {
            if quorum.tolerations.is_some() {
                warn!(
                    "Tolerations given on both spec.quorum.tolerations and \
                     spec.quorum.template.pod.tolerations; latter takes precedence"
                );
            }
            Some(tolerations.clone())
        }
        None => quorum.tolerations.clone(),
    }
}

fn owner_reference(resource: &StreamCluster) -> OwnerReference {
    OwnerReference {
        api_version: "streamhouse.io/v1".to_string(),
        kind: "StreamCluster".to_string(),
        name: resource.name().to_string(),
        uid: resource.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(false),
    }
}

// =============================================================================
// Object Construction Helpers
// =============================================================================

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn policy_port(port: i32) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        end_port: None,
    }
}

fn pod_peer(name: &str) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        pod_selector: Some(LabelSelector {
            match_labels: Some(one_label(NAME_LABEL, name)),
            match_expressions: None,
        }),
        namespace_selector: None,
        ip_block: None,
    }
}

fn one_label(key: &str, value: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), value.to_string());
    map
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn volume_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn exec_probe(path: &str) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![path.to_string()]),
        }),
        initial_delay_seconds: Some(15),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}
