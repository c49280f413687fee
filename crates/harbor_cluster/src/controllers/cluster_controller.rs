use crate::api::v1beta1::harbor::Harbor;
use crate::api::v1beta1::harborcluster::{
    ClusterPhase, ConditionStatus, ConditionType, HarborCluster, HARBOR_CLUSTER_LABEL,
};
use crate::controllers::cache::{RedisController, RedisFailover};
use crate::controllers::database::{PostgresController, Postgresql};
use crate::controllers::dependency::{Component, ComponentCondition, DependencyController};
use crate::controllers::harbor::{
    apply_harbor, desired_harbor, service_condition, REASON_GENERATE_HARBOR_ERROR,
};
use crate::controllers::service_manager::ServiceManager;
use crate::controllers::storage::{MinIOController, Tenant};
use crate::util::client::{namespace_of, KubeClient, KubeClientImpl};
use crate::util::cluster_status::StatusTracker;
use crate::util::config::ControllerConfig;
use crate::util::dynamic::DependencyResource;
use crate::util::errors::{kube_error, Error, Result, StdError};
use crate::util::metrics::Metrics;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    core::DynamicObject,
    runtime::{
        controller::{self, Action, Controller},
        events::{EventType, Reporter},
        reflector::ObjectRef,
        watcher,
    },
};
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::RwLock, task::JoinSet, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::*;

pub const REPORTER: &str = "harbor-cluster-controller";

/// Requeue interval once a pass went all the way through.
const RESYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client, config: ControllerConfig) -> Result<Arc<Context>> {
        let metrics = Metrics::new()
            .and_then(|m| m.register(&self.registry))
            .map_err(StdError::MetricsError)?;
        let client: Arc<dyn KubeClient> = Arc::new(KubeClientImpl::new(client, REPORTER.into()));
        Ok(Arc::new(Context {
            diagnostics: self.diagnostics.clone(),
            ..Context::new(client, metrics, config)
        }))
    }
}

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Arc<dyn KubeClient>,
    pub cache: Arc<dyn DependencyController>,
    pub database: Arc<dyn DependencyController>,
    pub storage: Arc<dyn DependencyController>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    pub config: ControllerConfig,
}

impl Context {
    /// Wires the dependency controllers to the same client.
    pub fn new(client: Arc<dyn KubeClient>, metrics: Metrics, config: ControllerConfig) -> Self {
        Self {
            cache: Arc::new(RedisController::new(client.clone())),
            database: Arc::new(PostgresController::new(client.clone())),
            storage: Arc::new(MinIOController::new(client.clone())),
            client,
            diagnostics: Arc::default(),
            metrics,
            config,
        }
    }

    fn controller(&self, component: Component) -> Arc<dyn DependencyController> {
        match component {
            Component::Cache => self.cache.clone(),
            Component::Database => self.database.clone(),
            // ServiceManager rejects Harbor before the controller is used
            Component::Storage | Component::Harbor => self.storage.clone(),
        }
    }
}

#[instrument(
    skip(cluster, ctx),
    fields(name = %cluster.name_any(), namespace = %cluster.namespace().unwrap_or_default())
)]
pub async fn reconcile(cluster: Arc<HarborCluster>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("harborcluster");
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = namespace_of(cluster.as_ref())?; // harbor_cluster is namespace scoped
    let name = cluster.name_any();
    info!("Reconciling HarborCluster \"{name}\" in {ns}");

    match reconcile_cluster(&ns, &name, &ctx).await {
        Err(e) if e.is_throttled() => {
            warn!("throttled by the API server, retrying in {:?}", ctx.config.throttle_requeue());
            Ok(Action::requeue(ctx.config.throttle_requeue()))
        }
        Err(Error::ErrorWithRequeue(e)) => {
            warn!("reconcile deferred: {e}");
            Ok(Action::requeue(e.duration))
        }
        result => result,
    }
}

async fn reconcile_cluster(ns: &str, name: &str, ctx: &Context) -> Result<Action> {
    let Some(cluster) = ctx.client.get_harbor_cluster(ns, name).await? else {
        debug!("HarborCluster {ns}/{name} no longer exists");
        return Ok(Action::await_change());
    };
    if cluster.metadata.deletion_timestamp.is_some() {
        info!("HarborCluster {ns}/{name} is being deleted, children are garbage collected");
        return Ok(Action::await_change());
    }

    let cluster = Arc::new(cluster);
    let tracker = Arc::new(StatusTracker::new(&cluster));
    tracker.prepare().await;

    let instance = format!("{ns}/{name}");
    let errors = provision_dependencies(&cluster, &tracker, ctx).await;
    if !errors.is_empty() {
        return flush_failed(&tracker, ctx, &instance, errors).await;
    }

    if !tracker.depends_ready().await {
        let phase = tracker.flush(ctx.client.as_ref()).await?;
        ctx.metrics.set_phase(&instance, phase);
        info!("dependencies of {instance} are not ready yet, phase {phase}");
        return Ok(Action::await_change());
    }

    let outputs = tracker.dependencies().await;
    let desired = match desired_harbor(&cluster, &outputs) {
        Ok(desired) => desired,
        Err(e) => {
            tracker
                .update_condition(
                    ConditionType::ServiceReady,
                    &ComponentCondition::new(
                        ConditionStatus::False,
                        REASON_GENERATE_HARBOR_ERROR,
                        e.message(),
                    ),
                )
                .await;
            return flush_failed(&tracker, ctx, &instance, vec![e]).await;
        }
    };
    match apply_harbor(ctx.client.as_ref(), desired).await {
        Ok((harbor, applied)) => {
            debug!("Harbor {}: {applied:?}", harbor.name_any());
            tracker
                .update_condition(ConditionType::ServiceReady, &service_condition(&harbor))
                .await;
        }
        Err(failure) => {
            tracker
                .update_condition(
                    ConditionType::ServiceReady,
                    &ComponentCondition::new(
                        ConditionStatus::False,
                        failure.reason,
                        failure.source.message(),
                    ),
                )
                .await;
            return flush_failed(&tracker, ctx, &instance, vec![failure.source]).await;
        }
    }

    let phase = tracker.flush(ctx.client.as_ref()).await?;
    ctx.metrics.set_phase(&instance, phase);
    announce_phase(&cluster, tracker.persisted_phase(), phase, ctx).await;

    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Runs the cache, database and storage managers side by side.
///
/// The first failure cancels managers that have not started yet. The join
/// still waits for every task so the conditions they recorded make it into
/// the status.
async fn provision_dependencies(
    cluster: &Arc<HarborCluster>,
    tracker: &Arc<StatusTracker>,
    ctx: &Context,
) -> Vec<Error> {
    let token = CancellationToken::new();
    let mut tasks = JoinSet::new();
    for component in Component::DEPENDENCIES {
        let manager = ServiceManager::new(component)
            .with_cluster(cluster.clone())
            .with_controller(ctx.controller(component))
            .track_status(tracker.clone())
            .with_cancellation(token.clone());
        tasks.spawn(async move { manager.apply().await });
    }

    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|e| Error::from(StdError::TaskFailed(e.to_string())));
        if let Err(e) = result.and_then(|r| r) {
            token.cancel();
            errors.push(e);
        }
    }
    errors.retain(|e| !e.is_canceled());
    errors
}

/// Writes whatever the pass recorded and returns the pass errors, plus the
/// status write error if there was one.
async fn flush_failed(
    tracker: &StatusTracker,
    ctx: &Context,
    instance: &str,
    mut errors: Vec<Error>,
) -> Result<Action> {
    match tracker.flush(ctx.client.as_ref()).await {
        Ok(phase) => ctx.metrics.set_phase(instance, phase),
        Err(e) => errors.push(e),
    }
    Err(Error::aggregate(errors)
        .unwrap_or_else(|| StdError::Aggregate("reconcile failed".to_string()).into()))
}

async fn announce_phase(
    cluster: &HarborCluster,
    before: ClusterPhase,
    after: ClusterPhase,
    ctx: &Context,
) {
    if before == after {
        return;
    }
    let (type_, reason, note) = match after {
        ClusterPhase::Healthy => (
            EventType::Normal,
            "Healthy",
            "all components are ready".to_string(),
        ),
        ClusterPhase::Unhealthy => (
            EventType::Warning,
            "Unhealthy",
            format!("phase changed from {before} to {after}"),
        ),
        _ => return,
    };
    if let Err(e) = ctx.client.publish_event(cluster, type_, reason, note).await {
        warn!("failed to publish {reason} event for {}: {}", cluster.name_any(), e.message());
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: REPORTER.into(),
        }
    }
}

pub(crate) fn error_policy(
    cluster: Arc<HarborCluster>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&cluster, error);
    if error.is_permanent() {
        return Action::await_change();
    }
    Action::requeue(ctx.config.error_requeue())
}

/// Maps a labelled child back to the HarborCluster that caused it.
pub(crate) fn cluster_for_child(metadata: &ObjectMeta) -> Option<ObjectRef<HarborCluster>> {
    let name = metadata.labels.as_ref()?.get(HARBOR_CLUSTER_LABEL)?;
    Some(ObjectRef::new(name).within(metadata.namespace.as_deref()?))
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State, config: ControllerConfig) -> Result<()> {
    let client = Client::try_default().await.map_err(kube_error)?;

    let clusters = Api::<HarborCluster>::all(client.clone());
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        return Err(kube_error(e));
    }

    let redis = RedisFailover::api_resource();
    let postgres = Postgresql::api_resource();
    let tenant = Tenant::api_resource();
    let concurrency = config.max_concurrent_reconciliation;
    let ctx = state.to_context(client.clone(), config)?;

    Controller::new(clusters, watcher::Config::default().any_semantic())
        .owns(Api::<Harbor>::all(client.clone()), watcher::Config::default())
        .owns_with(
            Api::<DynamicObject>::all_with(client.clone(), &redis),
            redis,
            watcher::Config::default(),
        )
        .owns_with(
            Api::<DynamicObject>::all_with(client.clone(), &postgres),
            postgres,
            watcher::Config::default(),
        )
        .owns_with(
            Api::<DynamicObject>::all_with(client.clone(), &tenant),
            tenant,
            watcher::Config::default(),
        )
        // redis failover workloads inherit the cluster label but not our owner reference
        .watches(
            Api::<StatefulSet>::all(client.clone()),
            watcher::Config::default().labels(HARBOR_CLUSTER_LABEL),
            |sts| cluster_for_child(&sts.metadata),
        )
        .watches(
            Api::<Deployment>::all(client.clone()),
            watcher::Config::default().labels(HARBOR_CLUSTER_LABEL),
            |deployment| cluster_for_child(&deployment.metadata),
        )
        .with_config(controller::Config::default().concurrency(concurrency))
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
    Ok(())
}
