//! Generic resource reconciler
//!
//! One `ResourceOperator` instance drives the create/patch/delete lifecycle
//! for one Kubernetes kind, identified by namespace+name. The platform API
//! is reached through the small [`ResourceClient`] capability trait, so the
//! same reconciler serves every managed kind and tests can substitute an
//! in-memory client.
//!
//! Decision table for `reconcile(name, desired)`:
//!
//! | current | desired | action                                     |
//! |---------|---------|--------------------------------------------|
//! | absent  | present | create                                     |
//! | present | present | patch, classify Patched vs NoOp            |
//! | present | absent  | delete, confirmed by a self-closing watch  |
//! | absent  | absent  | no-op                                      |

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchParams};
use kube::core::{NamespaceResourceScope, WatchEvent};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::error::{Error, Result};

// =============================================================================
// Reconcile Result
// =============================================================================

/// Outcome of reconciling one object. Exactly one variant per reconciled
/// object, never multiple, never none.
#[derive(Debug, Clone)]
pub enum ReconcileResult<K> {
    /// The object did not exist and was created
    Created(K),
    /// The object existed and the patch changed it
    Patched(K),
    /// The object existed, deletion was requested and confirmed
    Deleted,
    /// Nothing to do: either the patch changed nothing, or neither current
    /// nor desired state exists
    NoOp(Option<K>),
}

impl<K> ReconcileResult<K> {
    /// Short outcome name for logs and pass summaries
    pub fn outcome(&self) -> &'static str {
        match self {
            ReconcileResult::Created(_) => "created",
            ReconcileResult::Patched(_) => "patched",
            ReconcileResult::Deleted => "deleted",
            ReconcileResult::NoOp(_) => "noop",
        }
    }
}

// =============================================================================
// Resource Client Capability
// =============================================================================

/// Typed change event observed on a watched resource
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

/// The capability surface one managed kind needs from the platform API.
/// Supplied per kind instead of subclassing a template-method base.
#[async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: Send + Sync,
{
    /// Fetch by name; absent resources are `None`, not an error
    async fn get(&self, name: &str) -> Result<Option<K>>;

    /// Create the resource, returning the server's view of it
    async fn create(&self, desired: &K) -> Result<K>;

    /// Patch the named resource to the desired state, returning the result
    async fn patch(&self, name: &str, desired: &K) -> Result<K>;

    /// Issue deletion of the named resource
    async fn delete(&self, name: &str) -> Result<()>;

    /// List resources, optionally filtered by label selector. No ordering
    /// guarantee across API pages.
    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>>;

    /// Open a watch scoped to the named resource. The channel closes when
    /// the underlying watch ends or errors.
    async fn watch(&self, name: &str) -> Result<mpsc::Receiver<ResourceEvent<K>>>;
}

// =============================================================================
// Kubernetes-backed Client
// =============================================================================

/// [`ResourceClient`] implementation over a `kube::Api` handle
pub struct KubeResourceClient<K> {
    api: Api<K>,
}

impl<K> KubeResourceClient<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        KubeResourceClient {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl<K> ResourceClient<K> for KubeResourceClient<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<K>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, desired: &K) -> Result<K> {
        Ok(self.api.create(&PostParams::default(), desired).await?)
    }

    async fn patch(&self, name: &str, desired: &K) -> Result<K> {
        Ok(self
            .api
            .patch(name, &PatchParams::default(), &Patch::Merge(desired))
            .await?)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let _ = self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        Ok(self.api.list(&params).await?.items)
    }

    async fn watch(&self, name: &str) -> Result<mpsc::Receiver<ResourceEvent<K>>> {
        let params = WatchParams::default().fields(&format!("metadata.name={name}"));
        let mut stream = self.api.watch(&params, "0").await?.boxed();

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let mapped = match event {
                    Ok(WatchEvent::Added(obj)) => ResourceEvent::Added(obj),
                    Ok(WatchEvent::Modified(obj)) => ResourceEvent::Modified(obj),
                    Ok(WatchEvent::Deleted(obj)) => ResourceEvent::Deleted(obj),
                    Ok(WatchEvent::Bookmark(_)) => continue,
                    Ok(WatchEvent::Error(status)) => {
                        debug!("Watch stream error: {status:?}");
                        break;
                    }
                    Err(e) => {
                        debug!("Watch stream failed: {e}");
                        break;
                    }
                };
                if tx.send(mapped).await.is_err() {
                    // Receiver closed the watch; self-closing
                    break;
                }
            }
        });

        Ok(rx)
    }
}

// =============================================================================
// Deletion State Machine
// =============================================================================

/// Progress of one deletion: the delete call and the watch confirmation are
/// independent completion signals that must both be satisfied before the
/// deletion is reported complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeletionProgress {
    Pending,
    DeleteAcked,
    WatchConfirmed,
    Done,
    Failed,
}

impl DeletionProgress {
    fn on_delete_acked(self) -> Self {
        match self {
            DeletionProgress::Pending => DeletionProgress::DeleteAcked,
            DeletionProgress::WatchConfirmed => DeletionProgress::Done,
            other => other,
        }
    }

    fn on_watch_confirmed(self) -> Self {
        match self {
            DeletionProgress::Pending => DeletionProgress::WatchConfirmed,
            DeletionProgress::DeleteAcked => DeletionProgress::Done,
            other => other,
        }
    }
}

// =============================================================================
// Resource Operator
// =============================================================================

/// Uniform create/patch/delete/watch reconciler for one object kind
pub struct ResourceOperator<K> {
    client: Arc<dyn ResourceClient<K>>,
    kind: &'static str,
    /// Caps in-flight blocking API calls across all instances
    permits: Arc<Semaphore>,
    /// Bound on the delete-confirmation wait
    operation_timeout: Duration,
}

impl<K> ResourceOperator<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(
        client: Arc<dyn ResourceClient<K>>,
        kind: &'static str,
        permits: Arc<Semaphore>,
        operation_timeout: Duration,
    ) -> Self {
        ResourceOperator {
            client,
            kind,
            permits,
            operation_timeout,
        }
    }

    /// Reconcile the named resource to the desired state (or its absence).
    ///
    /// Validation happens before any API call: a desired object whose name
    /// differs from `name` fails fast.
    pub async fn reconcile(&self, name: &str, desired: Option<K>) -> Result<ReconcileResult<K>> {
        if let Some(desired) = &desired {
            let desired_name = desired.name_any();
            if desired_name != name {
                return Err(Error::NameMismatch {
                    requested: name.to_string(),
                    desired: desired_name,
                });
            }
        }

        let current = {
            let _permit = self.permits.acquire().await;
            self.client.get(name).await?
        };

        match (current, desired) {
            (None, Some(desired)) => {
                debug!("{} {} does not exist, creating it", self.kind, name);
                self.internal_create(name, desired).await
            }
            (Some(current), Some(desired)) => {
                debug!("{} {} already exists, patching it", self.kind, name);
                self.internal_patch(name, current, desired).await
            }
            (Some(_), None) => {
                debug!("{} {} exists, deleting it", self.kind, name);
                self.internal_delete(name).await
            }
            (None, None) => {
                debug!("{} {} does not exist, noop", self.kind, name);
                Ok(ReconcileResult::NoOp(None))
            }
        }
    }

    /// Read-only passthrough get
    pub async fn get(&self, name: &str) -> Result<Option<K>> {
        let _permit = self.permits.acquire().await;
        self.client.get(name).await
    }

    /// Read-only passthrough list with optional label-selector filtering.
    /// Results carry no ordering guarantee.
    pub async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>> {
        let _permit = self.permits.acquire().await;
        self.client.list(label_selector).await
    }

    async fn internal_create(&self, name: &str, desired: K) -> Result<ReconcileResult<K>> {
        let _permit = self.permits.acquire().await;
        match self.client.create(&desired).await {
            Ok(created) => {
                debug!("{} {} has been created", self.kind, name);
                Ok(ReconcileResult::Created(created))
            }
            Err(e) => {
                debug!("Caught error while creating {} {}: {e}", self.kind, name);
                Err(Error::CreateFailed {
                    kind: self.kind.to_string(),
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Patch unconditionally; classify as Patched only when the server
    /// assigned a new resource version, NoOp otherwise.
    async fn internal_patch(
        &self,
        name: &str,
        current: K,
        desired: K,
    ) -> Result<ReconcileResult<K>> {
        let _permit = self.permits.acquire().await;
        match self.client.patch(name, &desired).await {
            Ok(patched) => {
                debug!("{} {} has been patched", self.kind, name);
                if was_changed(&current, &patched) {
                    Ok(ReconcileResult::Patched(patched))
                } else {
                    Ok(ReconcileResult::NoOp(Some(patched)))
                }
            }
            Err(e) => {
                debug!("Caught error while patching {} {}: {e}", self.kind, name);
                Err(Error::PatchFailed {
                    kind: self.kind.to_string(),
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Delete with asynchronous confirmation: the watch is opened before the
    /// delete call is issued, and both the delete acknowledgement and the
    /// observed deletion event must arrive before the deletion is reported
    /// complete.
    async fn internal_delete(&self, name: &str) -> Result<ReconcileResult<K>> {
        let watch = {
            let _permit = self.permits.acquire().await;
            self.client.watch(name).await?
        };

        let delete = async {
            let _permit = self.permits.acquire().await;
            self.client.delete(name).await
        };
        let confirm = self.await_deletion_event(name, watch);
        tokio::pin!(delete);
        tokio::pin!(confirm);

        let mut progress = DeletionProgress::Pending;
        let mut delete_done = false;
        let mut confirm_done = false;
        let mut failure: Option<Error> = None;

        while progress != DeletionProgress::Done && progress != DeletionProgress::Failed {
            tokio::select! {
                result = &mut delete, if !delete_done => {
                    delete_done = true;
                    match result {
                        Ok(()) => progress = progress.on_delete_acked(),
                        Err(e) => {
                            failure = Some(Error::DeleteFailed {
                                kind: self.kind.to_string(),
                                name: name.to_string(),
                                reason: e.to_string(),
                            });
                            progress = DeletionProgress::Failed;
                        }
                    }
                }
                result = &mut confirm, if !confirm_done => {
                    confirm_done = true;
                    match result {
                        Ok(()) => progress = progress.on_watch_confirmed(),
                        Err(e) => {
                            failure = Some(e);
                            progress = DeletionProgress::Failed;
                        }
                    }
                }
            }
        }

        match progress {
            DeletionProgress::Done => {
                debug!("{} {} has been deleted", self.kind, name);
                Ok(ReconcileResult::Deleted)
            }
            _ => Err(failure.unwrap_or_else(|| {
                Error::Internal(format!("deletion of {} {name} failed", self.kind))
            })),
        }
    }

    /// Wait for the DELETED event on the given watch, bounded by the
    /// operation timeout. A channel that closes first is a watch failure,
    /// retryable by a later pass.
    async fn await_deletion_event(
        &self,
        name: &str,
        mut watch: mpsc::Receiver<ResourceEvent<K>>,
    ) -> Result<()> {
        let wait = async {
            while let Some(event) = watch.recv().await {
                match event {
                    ResourceEvent::Deleted(_) => {
                        debug!("Observed deletion of {} {}", self.kind, name);
                        return Ok(());
                    }
                    _ => continue,
                }
            }
            warn!(
                "Watch for {} {} closed before a deletion event was observed",
                self.kind, name
            );
            Err(Error::WatchClosed {
                kind: self.kind.to_string(),
                name: name.to_string(),
            })
        };

        match tokio::time::timeout(self.operation_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeletionTimeout {
                kind: self.kind.to_string(),
                name: name.to_string(),
                timeout: self.operation_timeout,
            }),
        }
    }
}

/// Change detection mirrors the server's optimistic concurrency token: a
/// patch that did not move the resource version changed nothing. Missing
/// versions on either side are conservatively treated as a change.
fn was_changed<K>(old: &K, new: &K) -> bool
where
    K: Resource<DynamicType = ()>,
{
    match (old.resource_version(), new.resource_version()) {
        (Some(old_version), Some(new_version)) => old_version != new_version,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// How the mock watch behaves after a delete is issued
    #[derive(Clone, Copy)]
    enum WatchMode {
        EmitDeleted,
        NeverEmit,
        CloseImmediately,
    }

    struct MockClient {
        store: Mutex<HashMap<String, ConfigMap>>,
        api_calls: AtomicUsize,
        fail_create: bool,
        fail_patch: bool,
        watch_mode: WatchMode,
    }

    impl MockClient {
        fn new() -> Self {
            MockClient {
                store: Mutex::new(HashMap::new()),
                api_calls: AtomicUsize::new(0),
                fail_create: false,
                fail_patch: false,
                watch_mode: WatchMode::EmitDeleted,
            }
        }

        fn with_existing(self, cm: ConfigMap) -> Self {
            self.store
                .lock()
                .unwrap()
                .insert(cm.name_any(), cm.clone());
            self
        }

        fn calls(&self) -> usize {
            self.api_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceClient<ConfigMap> for MockClient {
        async fn get(&self, name: &str) -> Result<Option<ConfigMap>> {
            self.api_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.store.lock().unwrap().get(name).cloned())
        }

        async fn create(&self, desired: &ConfigMap) -> Result<ConfigMap> {
            self.api_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(Error::Internal("server rejected create".into()));
            }
            let mut created = desired.clone();
            created.metadata.resource_version = Some("1".to_string());
            self.store
                .lock()
                .unwrap()
                .insert(created.name_any(), created.clone());
            Ok(created)
        }

        async fn patch(&self, name: &str, desired: &ConfigMap) -> Result<ConfigMap> {
            self.api_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_patch {
                return Err(Error::Internal("server rejected patch".into()));
            }
            let mut store = self.store.lock().unwrap();
            let current = store.get(name).cloned();
            let mut patched = desired.clone();
            // Only assign a new resource version when the patch changes data
            patched.metadata.resource_version = match &current {
                Some(current) if current.data == desired.data => {
                    current.metadata.resource_version.clone()
                }
                Some(current) => {
                    let old: u64 = current
                        .metadata
                        .resource_version
                        .as_deref()
                        .unwrap_or("0")
                        .parse()
                        .unwrap();
                    Some((old + 1).to_string())
                }
                None => Some("1".to_string()),
            };
            store.insert(name.to_string(), patched.clone());
            Ok(patched)
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.api_calls.fetch_add(1, Ordering::SeqCst);
            self.store.lock().unwrap().remove(name);
            Ok(())
        }

        async fn list(&self, _selector: Option<&str>) -> Result<Vec<ConfigMap>> {
            self.api_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.store.lock().unwrap().values().cloned().collect())
        }

        async fn watch(&self, name: &str) -> Result<mpsc::Receiver<ResourceEvent<ConfigMap>>> {
            let (tx, rx) = mpsc::channel(8);
            match self.watch_mode {
                WatchMode::EmitDeleted => {
                    let deleted = config_map(name);
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        let _ = tx.send(ResourceEvent::Deleted(deleted)).await;
                    });
                }
                WatchMode::NeverEmit => {
                    // Keep the sender alive without sending
                    tokio::spawn(async move {
                        let _tx = tx;
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    });
                }
                WatchMode::CloseImmediately => drop(tx),
            }
            Ok(rx)
        }
    }

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("test".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn operator(client: MockClient) -> (ResourceOperator<ConfigMap>, Arc<MockClient>) {
        let client = Arc::new(client);
        let op = ResourceOperator::new(
            client.clone(),
            "ConfigMap",
            Arc::new(Semaphore::new(4)),
            Duration::from_millis(200),
        );
        (op, client)
    }

    #[tokio::test]
    async fn test_create_when_absent() {
        let (op, client) = operator(MockClient::new());
        let result = op.reconcile("foo", Some(config_map("foo"))).await.unwrap();
        assert_matches!(result, ReconcileResult::Created(_));
        assert!(client.store.lock().unwrap().contains_key("foo"));
    }

    #[tokio::test]
    async fn test_idempotent_second_reconcile_is_noop() {
        let (op, _client) = operator(MockClient::new());

        let first = op.reconcile("foo", Some(config_map("foo"))).await.unwrap();
        assert_matches!(first, ReconcileResult::Created(_));

        // No external change in between: never Patched on the second call
        let second = op.reconcile("foo", Some(config_map("foo"))).await.unwrap();
        assert_matches!(second, ReconcileResult::NoOp(Some(_)));
    }

    #[tokio::test]
    async fn test_patch_classified_when_changed() {
        let (op, _client) = operator(MockClient::new());
        op.reconcile("foo", Some(config_map("foo"))).await.unwrap();

        let mut changed = config_map("foo");
        changed.data = Some([("k".to_string(), "v".to_string())].into());
        let result = op.reconcile("foo", Some(changed)).await.unwrap();
        assert_matches!(result, ReconcileResult::Patched(_));
    }

    #[tokio::test]
    async fn test_noop_when_both_absent() {
        let (op, client) = operator(MockClient::new());
        let result = op.reconcile("foo", None).await.unwrap();
        assert_matches!(result, ReconcileResult::NoOp(None));
        // Only the get was issued
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_name_mismatch_issues_zero_api_calls() {
        let (op, client) = operator(MockClient::new());
        let err = op
            .reconcile("foo", Some(config_map("bar")))
            .await
            .unwrap_err();
        assert_matches!(err, Error::NameMismatch { .. });
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_confirmed_by_watch() {
        let (op, client) = operator(MockClient::new().with_existing(config_map("foo")));
        let result = op.reconcile("foo", None).await.unwrap();
        assert_matches!(result, ReconcileResult::Deleted);
        assert!(!client.store.lock().unwrap().contains_key("foo"));
    }

    #[tokio::test]
    async fn test_delete_times_out_without_event() {
        let client = MockClient {
            watch_mode: WatchMode::NeverEmit,
            ..MockClient::new()
        }
        .with_existing(config_map("foo"));
        let (op, _client) = operator(client);

        let err = op.reconcile("foo", None).await.unwrap_err();
        assert_matches!(err, Error::DeletionTimeout { .. });
    }

    #[tokio::test]
    async fn test_delete_fails_when_watch_closes_early() {
        let client = MockClient {
            watch_mode: WatchMode::CloseImmediately,
            ..MockClient::new()
        }
        .with_existing(config_map("foo"));
        let (op, _client) = operator(client);

        let err = op.reconcile("foo", None).await.unwrap_err();
        assert_matches!(err, Error::WatchClosed { .. });
    }

    #[tokio::test]
    async fn test_create_failure_is_captured() {
        let client = MockClient {
            fail_create: true,
            ..MockClient::new()
        };
        let (op, _client) = operator(client);

        let err = op
            .reconcile("foo", Some(config_map("foo")))
            .await
            .unwrap_err();
        assert_matches!(err, Error::CreateFailed { .. });
    }

    #[tokio::test]
    async fn test_patch_failure_is_captured() {
        let client = MockClient {
            fail_patch: true,
            ..MockClient::new()
        }
        .with_existing(config_map("foo"));
        let (op, _client) = operator(client);

        let err = op
            .reconcile("foo", Some(config_map("foo")))
            .await
            .unwrap_err();
        assert_matches!(err, Error::PatchFailed { .. });
    }

    #[test]
    fn test_deletion_progress_requires_both_signals() {
        let progress = DeletionProgress::Pending;
        assert_eq!(progress.on_delete_acked(), DeletionProgress::DeleteAcked);
        assert_eq!(
            progress.on_delete_acked().on_watch_confirmed(),
            DeletionProgress::Done
        );
        assert_eq!(
            progress.on_watch_confirmed().on_delete_acked(),
            DeletionProgress::Done
        );
        // One signal alone never completes the deletion
        assert_ne!(progress.on_watch_confirmed(), DeletionProgress::Done);
    }
}
