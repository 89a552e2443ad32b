//! Reconciliation coordinator
//!
//! Runs one full pass for one topology instance: recover the observed
//! storage state, compute the desired object graph once, then fan out one
//! reconcile per object kind in parallel and join. A single object's
//! failure does not prevent attempting the others; all failures are
//! reported with per-object attribution. The coordinator performs no
//! retries itself: the external control loop reschedules failed passes.
//!
//! Two passes for the same named instance never run concurrently; admission
//! is a single-flight rule keyed by namespace/name. Passes for different
//! instances are fully independent.

use dashmap::DashMap;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::crd::storage::{Storage, STORAGE_ANNOTATION};
use crate::crd::stream_cluster::StreamCluster;
use crate::error::{Error, ObjectFailure, Result};
use crate::model::catalog::{CertificateAuthority, VersionCatalog};
use crate::model::quorum::{
    client_service_name, config_map_name, headless_service_name, network_policy_name,
    nodes_secret_name, pod_disruption_budget_name, quorum_name, DesiredObjectGraph, QuorumCluster,
};
use crate::operator::resource::{KubeResourceClient, ReconcileResult, ResourceOperator};

// =============================================================================
// Pass Summary
// =============================================================================

/// One reconciled object within a pass summary
#[derive(Debug, Clone)]
pub struct ReconciledObject {
    pub kind: String,
    pub name: String,
    /// "created", "patched", "deleted", "noop" or "skipped"
    pub outcome: &'static str,
}

/// Successful outcome of one reconciliation pass
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub instance: String,
    pub reconciled: Vec<ReconciledObject>,
}

// =============================================================================
// Single-flight Admission
// =============================================================================

/// Removes the instance key when the pass ends, however it ends
struct PassGuard<'a> {
    in_flight: &'a DashMap<String, ()>,
    key: String,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Drives one reconciliation pass per invocation across all object kinds
/// of one topology instance
pub struct ReconciliationCoordinator {
    stateful_sets: ResourceOperator<StatefulSet>,
    services: ResourceOperator<Service>,
    config_maps: ResourceOperator<ConfigMap>,
    secrets: ResourceOperator<Secret>,
    network_policies: ResourceOperator<NetworkPolicy>,
    disruption_budgets: ResourceOperator<PodDisruptionBudget>,
    catalog: VersionCatalog,
    certificate_authority: Arc<dyn CertificateAuthority>,
    peer_namespace_selectors_supported: bool,
    in_flight: DashMap<String, ()>,
}

impl ReconciliationCoordinator {
    /// Wire the coordinator against a live Kubernetes API
    pub fn new(
        client: kube::Client,
        namespace: &str,
        config: &OperatorConfig,
        certificate_authority: Arc<dyn CertificateAuthority>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.worker_pool_size));
        let timeout = config.operation_timeout;

        macro_rules! operator {
            ($kind:ty, $name:literal) => {
                ResourceOperator::new(
                    Arc::new(KubeResourceClient::<$kind>::new(client.clone(), namespace)),
                    $name,
                    permits.clone(),
                    timeout,
                )
            };
        }

        ReconciliationCoordinator {
            stateful_sets: operator!(StatefulSet, "StatefulSet"),
            services: operator!(Service, "Service"),
            config_maps: operator!(ConfigMap, "ConfigMap"),
            secrets: operator!(Secret, "Secret"),
            network_policies: operator!(NetworkPolicy, "NetworkPolicy"),
            disruption_budgets: operator!(PodDisruptionBudget, "PodDisruptionBudget"),
            catalog: VersionCatalog::new(
                config.default_version.clone(),
                config.image_map.clone(),
                config.default_image_repo.clone(),
            ),
            certificate_authority,
            peer_namespace_selectors_supported: config.peer_namespace_selectors_supported,
            in_flight: DashMap::new(),
        }
    }

    /// Wire the coordinator from pre-built per-kind operators, for tests
    #[allow(clippy::too_many_arguments)]
    pub fn with_operators(
        stateful_sets: ResourceOperator<StatefulSet>,
        services: ResourceOperator<Service>,
        config_maps: ResourceOperator<ConfigMap>,
        secrets: ResourceOperator<Secret>,
        network_policies: ResourceOperator<NetworkPolicy>,
        disruption_budgets: ResourceOperator<PodDisruptionBudget>,
        catalog: VersionCatalog,
        certificate_authority: Arc<dyn CertificateAuthority>,
        peer_namespace_selectors_supported: bool,
    ) -> Self {
        ReconciliationCoordinator {
            stateful_sets,
            services,
            config_maps,
            secrets,
            network_policies,
            disruption_budgets,
            catalog,
            certificate_authority,
            peer_namespace_selectors_supported,
            in_flight: DashMap::new(),
        }
    }

    /// Run one full reconciliation pass for the given instance.
    ///
    /// Reports success or failure exactly once; per-object failures are
    /// attributed in the returned error and do not abort sibling objects.
    pub async fn reconcile(&self, resource: &StreamCluster) -> Result<PassSummary> {
        let instance = instance_key(resource);

        if self.in_flight.insert(instance.clone(), ()).is_some() {
            return Err(Error::PassInProgress { instance });
        }
        let _guard = PassGuard {
            in_flight: &self.in_flight,
            key: instance.clone(),
        };

        info!("Reconciling quorum of {instance}");

        let old_storage = self.observed_storage(resource).await?;
        let model = QuorumCluster::from_spec(resource, &self.catalog, old_storage.as_ref())?;

        // Certificate issuance is a collaborator failure, not a pass
        // failure: skip the secret update and keep going.
        let certs = match self
            .certificate_authority
            .issue_or_renew(model.namespace(), &model.node_names())
            .await
        {
            Ok(certs) => Some(certs),
            Err(e) => {
                warn!("Certificate issuance for {instance} failed, skipping secret update: {e}");
                None
            }
        };

        // Built atomically before any mutation is issued
        let graph = model.desired_graph(certs.as_ref(), self.peer_namespace_selectors_supported);

        self.apply_graph(resource, graph, instance).await
    }

    /// Fan out one reconcile per object, join, and aggregate outcomes
    async fn apply_graph(
        &self,
        resource: &StreamCluster,
        graph: DesiredObjectGraph,
        instance: String,
    ) -> Result<PassSummary> {
        let cluster = resource.name();

        let secret_name = nodes_secret_name(cluster);
        let secret_task = async {
            if let Some(secret) = graph.nodes_secret {
                self.secrets
                    .reconcile(&secret_name, Some(secret))
                    .await
                    .map(|r| r.outcome())
            } else {
                Ok("skipped")
            }
        };

        let sts_name = quorum_name(cluster);
        let client_svc_name = client_service_name(cluster);
        let headless_svc_name = headless_service_name(cluster);
        let cm_name = config_map_name(cluster);
        let policy_name = network_policy_name(cluster);
        let pdb_name = pod_disruption_budget_name(cluster);

        let (sts, client_svc, headless_svc, cm, secret, policy, pdb) = tokio::join!(
            self.stateful_sets
                .reconcile(&sts_name, Some(graph.stateful_set)),
            self.services
                .reconcile(&client_svc_name, Some(graph.client_service)),
            self.services
                .reconcile(&headless_svc_name, Some(graph.headless_service)),
            self.config_maps
                .reconcile(&cm_name, Some(graph.config_map)),
            secret_task,
            self.network_policies
                .reconcile(&policy_name, Some(graph.network_policy)),
            self.disruption_budgets
                .reconcile(&pdb_name, Some(graph.pod_disruption_budget)),
        );

        let mut reconciled = Vec::new();
        let mut failures = Vec::new();

        let mut record = |kind: &str, name: String, outcome: Result<&'static str>| match outcome {
            Ok(outcome) => {
                debug!("{kind} {name}: {outcome}");
                reconciled.push(ReconciledObject {
                    kind: kind.to_string(),
                    name,
                    outcome,
                });
            }
            Err(e) => failures.push(ObjectFailure {
                kind: kind.to_string(),
                name,
                reason: e.to_string(),
            }),
        };

        record("StatefulSet", quorum_name(cluster), sts.map(outcome_of));
        record(
            "Service",
            client_service_name(cluster),
            client_svc.map(outcome_of),
        );
        record(
            "Service",
            headless_service_name(cluster),
            headless_svc.map(outcome_of),
        );
        record("ConfigMap", config_map_name(cluster), cm.map(outcome_of));
        record("Secret", secret_name.clone(), secret);
        record(
            "NetworkPolicy",
            network_policy_name(cluster),
            policy.map(outcome_of),
        );
        record(
            "PodDisruptionBudget",
            pod_disruption_budget_name(cluster),
            pdb.map(outcome_of),
        );

        if failures.is_empty() {
            info!("Reconciliation pass for {instance} succeeded");
            Ok(PassSummary {
                instance,
                reconciled,
            })
        } else {
            Err(Error::PassFailed { instance, failures })
        }
    }

    /// The storage configuration currently in effect, recovered from the
    /// live StatefulSet's annotation. Absent when the StatefulSet does not
    /// exist yet.
    pub async fn observed_storage(&self, resource: &StreamCluster) -> Result<Option<Storage>> {
        let name = quorum_name(resource.name());
        let Some(sts) = self.stateful_sets.get(&name).await? else {
            return Ok(None);
        };

        match sts
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(STORAGE_ANNOTATION))
        {
            Some(encoded) => Ok(Some(Storage::from_annotation(encoded)?)),
            None => Ok(None),
        }
    }

    /// Compute the desired object graph without issuing any mutation, for
    /// introspection and testing. Certificate issuance is not attempted;
    /// the graph omits the secret.
    pub async fn generate_desired_graph(
        &self,
        resource: &StreamCluster,
    ) -> Result<DesiredObjectGraph> {
        let old_storage = self.observed_storage(resource).await?;
        let model = QuorumCluster::from_spec(resource, &self.catalog, old_storage.as_ref())?;
        Ok(model.desired_graph(None, self.peer_namespace_selectors_supported))
    }
}

fn outcome_of<K>(result: ReconcileResult<K>) -> &'static str {
    result.outcome()
}

fn instance_key(resource: &StreamCluster) -> String {
    format!("{}/{}", resource.namespace(), resource.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::storage::{EphemeralStorage, PersistentClaimStorage};
    use crate::crd::stream_cluster::{BrokerSpec, QuorumSpec, StreamClusterSpec};
    use crate::error::Error;
    use crate::model::catalog::CertAndKey;
    use crate::operator::resource::{ResourceClient, ResourceEvent};
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::ResourceExt;
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use std::collections::{BTreeMap, HashMap};
    use std::fmt::Debug;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Shared in-memory store standing in for the platform API
    struct MemoryClient<K> {
        store: Arc<Mutex<HashMap<String, serde_json::Value>>>,
        fail_writes: bool,
        delay: Duration,
        _marker: std::marker::PhantomData<fn() -> K>,
    }

    impl<K> MemoryClient<K> {
        fn new(store: Arc<Mutex<HashMap<String, serde_json::Value>>>) -> Self {
            MemoryClient {
                store,
                fail_writes: false,
                delay: Duration::ZERO,
                _marker: std::marker::PhantomData,
            }
        }
    }

    #[async_trait]
    impl<K> ResourceClient<K> for MemoryClient<K>
    where
        K: kube::Resource<DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        async fn get(&self, name: &str) -> crate::error::Result<Option<K>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let key = format!("{}/{name}", K::kind(&()));
            Ok(self
                .store
                .lock()
                .unwrap()
                .get(&key)
                .map(|v| serde_json::from_value(v.clone()).unwrap()))
        }

        async fn create(&self, desired: &K) -> crate::error::Result<K> {
            if self.fail_writes {
                return Err(Error::Internal("simulated API failure".into()));
            }
            let mut created = desired.clone();
            created.meta_mut().resource_version = Some("1".to_string());
            let key = format!("{}/{}", K::kind(&()), created.name_any());
            self.store
                .lock()
                .unwrap()
                .insert(key, serde_json::to_value(&created).unwrap());
            Ok(created)
        }

        async fn patch(&self, name: &str, desired: &K) -> crate::error::Result<K> {
            if self.fail_writes {
                return Err(Error::Internal("simulated API failure".into()));
            }
            let mut patched = desired.clone();
            patched.meta_mut().resource_version = Some("2".to_string());
            let key = format!("{}/{name}", K::kind(&()));
            self.store
                .lock()
                .unwrap()
                .insert(key, serde_json::to_value(&patched).unwrap());
            Ok(patched)
        }

        async fn delete(&self, name: &str) -> crate::error::Result<()> {
            let key = format!("{}/{name}", K::kind(&()));
            self.store.lock().unwrap().remove(&key);
            Ok(())
        }

        async fn list(&self, _selector: Option<&str>) -> crate::error::Result<Vec<K>> {
            Ok(Vec::new())
        }

        async fn watch(&self, _name: &str) -> crate::error::Result<mpsc::Receiver<ResourceEvent<K>>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    struct StaticCa {
        fail: bool,
    }

    #[async_trait]
    impl CertificateAuthority for StaticCa {
        async fn issue_or_renew(
            &self,
            _namespace: &str,
            node_names: &[String],
        ) -> crate::error::Result<BTreeMap<String, CertAndKey>> {
            if self.fail {
                return Err(Error::CertificateIssuance("ca unreachable".into()));
            }
            Ok(node_names
                .iter()
                .map(|n| {
                    (
                        n.clone(),
                        CertAndKey {
                            cert: b"cert".to_vec(),
                            key: b"key".to_vec(),
                        },
                    )
                })
                .collect())
        }
    }

    struct Harness {
        store: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                store: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        fn client<K>(&self) -> MemoryClient<K> {
            MemoryClient::new(self.store.clone())
        }

        fn coordinator_with(
            &self,
            config_maps_fail: bool,
            ca_fail: bool,
            get_delay: Duration,
        ) -> ReconciliationCoordinator {
            let permits = Arc::new(Semaphore::new(8));
            let timeout = Duration::from_millis(500);

            macro_rules! op {
                ($kind:ty, $name:literal, $client:expr) => {
                    ResourceOperator::new(Arc::new($client), $name, permits.clone(), timeout)
                };
            }

            let mut cm_client = self.client::<ConfigMap>();
            cm_client.fail_writes = config_maps_fail;

            let mut sts_client = self.client::<StatefulSet>();
            sts_client.delay = get_delay;

            ReconciliationCoordinator::with_operators(
                op!(StatefulSet, "StatefulSet", sts_client),
                op!(Service, "Service", self.client::<Service>()),
                op!(ConfigMap, "ConfigMap", cm_client),
                op!(Secret, "Secret", self.client::<Secret>()),
                op!(NetworkPolicy, "NetworkPolicy", self.client::<NetworkPolicy>()),
                op!(
                    PodDisruptionBudget,
                    "PodDisruptionBudget",
                    self.client::<PodDisruptionBudget>()
                ),
                VersionCatalog::new("2.4.0", BTreeMap::new(), Some("repo/platform".to_string())),
                Arc::new(StaticCa { fail: ca_fail }),
                true,
            )
        }

        fn stored_kinds(&self) -> Vec<String> {
            let mut kinds: Vec<String> =
                self.store.lock().unwrap().keys().cloned().collect();
            kinds.sort();
            kinds
        }
    }

    fn cluster(quorum: QuorumSpec) -> StreamCluster {
        StreamCluster {
            metadata: ObjectMeta {
                name: Some("my-cluster".to_string()),
                namespace: Some("data".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            spec: StreamClusterSpec {
                quorum,
                brokers: BrokerSpec::default(),
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn test_full_pass_creates_all_objects() {
        let harness = Harness::new();
        let coordinator = harness.coordinator_with(false, false, Duration::ZERO);

        let summary = coordinator
            .reconcile(&cluster(QuorumSpec::default()))
            .await
            .unwrap();

        assert_eq!(summary.instance, "data/my-cluster");
        assert_eq!(summary.reconciled.len(), 7);
        assert!(summary.reconciled.iter().all(|r| r.outcome == "created"));

        let kinds = harness.stored_kinds();
        assert!(kinds.contains(&"StatefulSet/my-cluster-quorum".to_string()));
        assert!(kinds.contains(&"Service/my-cluster-quorum-client".to_string()));
        assert!(kinds.contains(&"Service/my-cluster-quorum-nodes".to_string()));
        assert!(kinds.contains(&"ConfigMap/my-cluster-quorum-config".to_string()));
        assert!(kinds.contains(&"Secret/my-cluster-quorum-nodes".to_string()));
        assert!(kinds.contains(&"NetworkPolicy/my-cluster-network-policy-quorum".to_string()));
        assert!(kinds.contains(&"PodDisruptionBudget/my-cluster-quorum".to_string()));
    }

    #[tokio::test]
    async fn test_fan_out_isolation() {
        let harness = Harness::new();
        let coordinator = harness.coordinator_with(true, false, Duration::ZERO);

        let err = coordinator
            .reconcile(&cluster(QuorumSpec::default()))
            .await
            .unwrap_err();

        // The config map failure is attributed; siblings still completed
        match err {
            Error::PassFailed { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].kind, "ConfigMap");
            }
            other => panic!("unexpected error: {other}"),
        }
        let kinds = harness.stored_kinds();
        assert!(kinds.contains(&"StatefulSet/my-cluster-quorum".to_string()));
        assert!(kinds.contains(&"Service/my-cluster-quorum-client".to_string()));
        assert!(!kinds.iter().any(|k| k.starts_with("ConfigMap/")));
    }

    #[tokio::test]
    async fn test_ca_failure_skips_secret() {
        let harness = Harness::new();
        let coordinator = harness.coordinator_with(false, true, Duration::ZERO);

        let summary = coordinator
            .reconcile(&cluster(QuorumSpec::default()))
            .await
            .unwrap();

        let secret = summary
            .reconciled
            .iter()
            .find(|r| r.kind == "Secret")
            .unwrap();
        assert_eq!(secret.outcome, "skipped");
        assert!(!harness.stored_kinds().iter().any(|k| k.starts_with("Secret/")));
    }

    #[tokio::test]
    async fn test_same_instance_passes_are_serialized() {
        let harness = Harness::new();
        let coordinator =
            Arc::new(harness.coordinator_with(false, false, Duration::from_millis(100)));

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.reconcile(&cluster(QuorumSpec::default())).await })
        };
        // Give the first pass time to take the admission slot
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = coordinator.reconcile(&cluster(QuorumSpec::default())).await;
        assert!(matches!(second, Err(Error::PassInProgress { .. })));

        first.await.unwrap().unwrap();

        // Once the first pass finished, the instance admits again
        let third = coordinator.reconcile(&cluster(QuorumSpec::default())).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_observed_storage_round_trip_gates_downgrade() {
        let harness = Harness::new();
        let coordinator = harness.coordinator_with(false, false, Duration::ZERO);

        let persistent = Storage::PersistentClaim(PersistentClaimStorage {
            id: None,
            size: Some("100Gi".into()),
            class: None,
            delete_claim: false,
        });
        coordinator
            .reconcile(&cluster(QuorumSpec {
                storage: persistent.clone(),
                ..Default::default()
            }))
            .await
            .unwrap();

        // A later pass requesting ephemeral storage must keep the old
        // declaration in the desired graph
        let downgraded = cluster(QuorumSpec {
            storage: Storage::Ephemeral(EphemeralStorage::default()),
            ..Default::default()
        });
        let observed = coordinator.observed_storage(&downgraded).await.unwrap();
        assert_eq!(observed, Some(persistent.clone()));

        let graph = coordinator.generate_desired_graph(&downgraded).await.unwrap();
        let annotations = graph.stateful_set.metadata.annotations.unwrap();
        let in_effect = Storage::from_annotation(&annotations[STORAGE_ANNOTATION]).unwrap();
        assert_eq!(in_effect, persistent);
    }
}
