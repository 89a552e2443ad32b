//! StreamCluster Operator
//!
//! Control loop entry point: watches StreamCluster resources in one
//! namespace and drives one reconciliation pass per change event or
//! periodic trigger. Failed passes are rescheduled with the requeue
//! policy derived from the error taxonomy; the coordinator itself never
//! retries.

use chrono::Utc;
use clap::Parser;
use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stream_cluster_operator::{
    ClusterPhase, ErrorAction, OperatorConfig, ReconciliationCoordinator,
    SecretBackedCertificateAuthority, StreamCluster,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// StreamCluster Operator - reconciles declarative data-platform topologies
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace to watch for StreamCluster resources
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Quorum image map as "version=image,version=image"
    #[arg(long, env = "QUORUM_IMAGE_MAP", default_value = "")]
    image_map: String,

    /// Version deployed when the spec does not request one
    #[arg(long, env = "DEFAULT_VERSION", default_value = "2.4.0")]
    default_version: String,

    /// Platform default image repository for derived image fallback
    #[arg(long, env = "DEFAULT_IMAGE_REPO")]
    default_image_repo: Option<String>,

    /// Whether network policy peers may combine namespace and pod selectors
    #[arg(long, env = "PEER_NAMESPACE_SELECTORS_SUPPORTED", default_value_t = true)]
    peer_namespace_selectors_supported: bool,

    /// Bound on any single API operation in seconds
    #[arg(long, env = "OPERATION_TIMEOUT_SECS", default_value = "300")]
    operation_timeout_secs: u64,

    /// Worker pool size capping in-flight blocking API calls
    #[arg(long, env = "WORKER_POOL_SIZE", default_value = "16")]
    worker_pool_size: usize,

    /// Requeue interval for successful passes in seconds
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value = "300")]
    resync_interval_secs: u64,

    /// Optional YAML configuration file; CLI flags win over its values
    #[arg(long, env = "CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn operator_config(&self) -> stream_cluster_operator::Result<OperatorConfig> {
        let mut config = match &self.config_file {
            Some(path) => OperatorConfig::from_file(path)?,
            None => OperatorConfig::default(),
        };

        config.peer_namespace_selectors_supported = self.peer_namespace_selectors_supported;
        config.operation_timeout = Duration::from_secs(self.operation_timeout_secs);
        config.worker_pool_size = self.worker_pool_size;
        config.default_version = self.default_version.clone();
        if !self.image_map.is_empty() {
            config.image_map = OperatorConfig::parse_image_map(&self.image_map)?;
        }
        if self.default_image_repo.is_some() {
            config.default_image_repo = self.default_image_repo.clone();
        }
        Ok(config)
    }
}

// =============================================================================
// Control Loop
// =============================================================================

struct Context {
    coordinator: ReconciliationCoordinator,
    clusters: Api<StreamCluster>,
    resync_interval: Duration,
}

async fn reconcile(
    resource: Arc<StreamCluster>,
    ctx: Arc<Context>,
) -> std::result::Result<Action, stream_cluster_operator::Error> {
    let summary = ctx.coordinator.reconcile(&resource).await?;

    for object in &summary.reconciled {
        info!(
            "  {} {}: {}",
            object.kind, object.name, object.outcome
        );
    }

    update_status(&ctx.clusters, &resource, ClusterPhase::Ready).await;
    Ok(Action::requeue(ctx.resync_interval))
}

fn error_policy(
    resource: Arc<StreamCluster>,
    err: &stream_cluster_operator::Error,
    ctx: Arc<Context>,
) -> Action {
    warn!("Reconciliation of {} failed: {err}", resource.name_any());

    tokio::spawn({
        let clusters = ctx.clusters.clone();
        let resource = resource.clone();
        async move {
            update_status(&clusters, &resource, ClusterPhase::Failed).await;
        }
    });

    match err.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(Duration::from_secs(15)),
        ErrorAction::RequeueAfter(duration) => Action::requeue(duration),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

async fn update_status(clusters: &Api<StreamCluster>, resource: &StreamCluster, phase: ClusterPhase) {
    let status = serde_json::json!({
        "status": {
            "phase": phase.to_string(),
            "lastReconcileTime": Utc::now(),
        }
    });
    if let Err(e) = clusters
        .patch_status(
            &resource.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&status),
        )
        .await
    {
        warn!("Failed to update status of {}: {e}", resource.name_any());
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> stream_cluster_operator::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting StreamCluster Operator");
    info!("  Version: {}", stream_cluster_operator::VERSION);
    info!("  Namespace: {}", args.namespace);
    info!("  Default platform version: {}", args.default_version);
    info!(
        "  Namespace+pod peer selection: {}",
        args.peer_namespace_selectors_supported
    );

    let config = args.operator_config()?;
    let client = Client::try_default().await?;

    let certificate_authority = Arc::new(SecretBackedCertificateAuthority::new(client.clone()));
    let coordinator = ReconciliationCoordinator::new(
        client.clone(),
        &args.namespace,
        &config,
        certificate_authority,
    );

    let clusters: Api<StreamCluster> = Api::namespaced(client, &args.namespace);
    let ctx = Arc::new(Context {
        coordinator,
        clusters: clusters.clone(),
        resync_interval: Duration::from_secs(args.resync_interval_secs),
    });

    Controller::new(clusters, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => info!("Reconciled {}", object.name),
                Err(e) => error!("Reconciliation error: {e}"),
            }
        })
        .await;

    Ok(())
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stream_cluster_operator={level},info")));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
