use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::ResourceExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::v1beta1::harborcluster::{
    ClusterPhase, ConditionStatus, ConditionType, HarborCluster, HarborClusterStatus,
};
use crate::controllers::dependency::{CRStatus, Component, ComponentCondition};
use crate::util::client::KubeClient;
use crate::util::errors::Result;
use crate::util::properties::Properties;
use crate::util::status::{find_status_condition, set_status_condition};

pub const REASON_HEALTHY: &str = "Healthy";
pub const REASON_UNHEALTHY: &str = "Unhealthy";
pub const REASON_PROVISIONING: &str = "Provisioning";

/// Computes the overall phase from the four dependency conditions.
///
/// `Ready` and `ConfigurationReady` never take part.
pub fn overall_phase(conditions: &[Condition]) -> ClusterPhase {
    let dependencies: Vec<Option<&Condition>> = ConditionType::DEPENDENCIES
        .iter()
        .map(|t| find_status_condition(conditions, t.as_str()))
        .collect();

    if dependencies.iter().all(Option::is_none) {
        return ClusterPhase::Unknown;
    }
    if dependencies
        .iter()
        .flatten()
        .any(|c| c.status == ConditionStatus::False.as_str())
    {
        return ClusterPhase::Unhealthy;
    }
    if dependencies
        .iter()
        .all(|c| c.is_some_and(|c| c.status == ConditionStatus::True.as_str()))
    {
        return ClusterPhase::Healthy;
    }
    ClusterPhase::Provisioning
}

/// Strictly greater than `current`, wall-clock nanoseconds when possible.
fn next_revision(current: i64) -> i64 {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
    now.max(current.saturating_add(1))
}

/// Properties and checksum annotations published by ready dependencies.
#[derive(Clone, Debug, Default)]
pub struct DependencyOutputs {
    pub properties: BTreeMap<Component, Properties>,
    pub checksums: BTreeMap<String, String>,
}

impl DependencyOutputs {
    pub fn properties(&self, component: Component) -> Option<&Properties> {
        self.properties.get(&component)
    }
}

struct TrackerState {
    status: HarborClusterStatus,
    outputs: DependencyOutputs,
}

/// Collects status changes from concurrent dependency tasks during one pass
/// and writes them back in a single status update.
pub struct StatusTracker {
    cluster: HarborCluster,
    persisted_revision: i64,
    persisted_phase: ClusterPhase,
    state: Mutex<TrackerState>,
}

impl StatusTracker {
    pub fn new(cluster: &HarborCluster) -> Self {
        let status = cluster.status.clone().unwrap_or_default();
        Self {
            cluster: cluster.clone(),
            persisted_revision: status.revision,
            persisted_phase: status.phase,
            state: Mutex::new(TrackerState {
                status,
                outputs: DependencyOutputs::default(),
            }),
        }
    }

    /// Points observedGeneration at the generation being reconciled.
    pub async fn prepare(&self) {
        let mut state = self.state.lock().await;
        let generation = self.cluster.metadata.generation;
        if state.status.observed_generation != generation {
            state.status.observed_generation = generation;
            state.status.revision = next_revision(state.status.revision);
        }
    }

    /// Records a condition, bumping the revision when its status, reason or
    /// message changed. Returns whether it changed.
    pub async fn update_condition(
        &self,
        condition_type: ConditionType,
        condition: &ComponentCondition,
    ) -> bool {
        let mut state = self.state.lock().await;
        let changed = set_status_condition(
            &mut state.status.conditions,
            condition.to_condition(condition_type, self.cluster.metadata.generation),
        );
        if changed {
            debug!(
                "{} condition {condition_type} -> {} ({})",
                self.cluster.name_any(),
                condition.status,
                condition.reason
            );
            state.status.revision = next_revision(state.status.revision);
        }
        changed
    }

    /// Stores what a dependency published for the Harbor spec.
    pub async fn track_dependencies(&self, component: Component, status: &CRStatus) {
        let mut state = self.state.lock().await;
        state.outputs.properties.insert(component, status.properties.clone());
        state
            .outputs
            .checksums
            .extend(status.checksums.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub async fn dependencies(&self) -> DependencyOutputs {
        self.state.lock().await.outputs.clone()
    }

    /// Cache, database and storage all report `True`.
    pub async fn depends_ready(&self) -> bool {
        let state = self.state.lock().await;
        Component::DEPENDENCIES.iter().all(|component| {
            find_status_condition(&state.status.conditions, component.condition_type().as_str())
                .is_some_and(|c| c.status == ConditionStatus::True.as_str())
        })
    }

    pub async fn overall_phase(&self) -> ClusterPhase {
        overall_phase(&self.state.lock().await.status.conditions)
    }

    pub async fn revision(&self) -> i64 {
        self.state.lock().await.status.revision
    }

    pub async fn status(&self) -> HarborClusterStatus {
        self.state.lock().await.status.clone()
    }

    /// The phase that was stored before this pass started.
    pub fn persisted_phase(&self) -> ClusterPhase {
        self.persisted_phase
    }

    /// Writes the status back if anything changed during this pass.
    ///
    /// The phase and the `Ready` condition are derived from the dependency
    /// conditions first. A conflicting write is dropped: the object changed
    /// under us and the next pass starts from the fresh copy.
    pub async fn flush(&self, client: &dyn KubeClient) -> Result<ClusterPhase> {
        let mut state = self.state.lock().await;
        let phase = overall_phase(&state.status.conditions);
        state.status.phase = phase;

        let ready = match phase {
            ClusterPhase::Healthy => ComponentCondition::new(
                ConditionStatus::True,
                REASON_HEALTHY,
                "all components are ready",
            ),
            ClusterPhase::Unhealthy => ComponentCondition::new(
                ConditionStatus::False,
                REASON_UNHEALTHY,
                "at least one component failed",
            ),
            _ => ComponentCondition::new(
                ConditionStatus::Unknown,
                REASON_PROVISIONING,
                "components are still being provisioned",
            ),
        };
        if set_status_condition(
            &mut state.status.conditions,
            ready.to_condition(ConditionType::Ready, self.cluster.metadata.generation),
        ) {
            state.status.revision = next_revision(state.status.revision);
        }

        if state.status.revision <= self.persisted_revision {
            debug!("status of {} unchanged", self.cluster.name_any());
            return Ok(phase);
        }

        let mut updated = self.cluster.clone();
        updated.status = Some(state.status.clone());
        match client.replace_harbor_cluster_status(&updated).await {
            Ok(_) => {
                info!(
                    "updated status of {}: phase {phase}, revision {}",
                    self.cluster.name_any(),
                    state.status.revision
                );
                Ok(phase)
            }
            Err(e) if e.is_conflict() => {
                warn!(
                    "status of {} changed concurrently, dropping this update: {}",
                    self.cluster.name_any(),
                    e.message()
                );
                Ok(phase)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::client::MockKubeClient;
    use crate::util::errors::api_error;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn cluster() -> HarborCluster {
        let mut cluster = HarborCluster::new("h", Default::default());
        cluster.metadata = ObjectMeta {
            name: Some("h".to_string()),
            namespace: Some("ns".to_string()),
            generation: Some(1),
            resource_version: Some("7".to_string()),
            ..Default::default()
        };
        cluster
    }

    fn condition(status: ConditionStatus) -> ComponentCondition {
        ComponentCondition::new(status, "Test", "test")
    }

    fn conditions(statuses: &[(ConditionType, ConditionStatus)]) -> Vec<Condition> {
        let mut conditions = Vec::new();
        for (t, s) in statuses {
            set_status_condition(&mut conditions, condition(*s).to_condition(*t, None));
        }
        conditions
    }

    #[test]
    fn phase_is_a_function_of_dependency_conditions() {
        use ConditionStatus::*;
        use ConditionType::*;

        assert_eq!(overall_phase(&[]), ClusterPhase::Unknown);
        assert_eq!(
            overall_phase(&conditions(&[(Ready, True), (ConfigurationReady, False)])),
            ClusterPhase::Unknown
        );
        assert_eq!(
            overall_phase(&conditions(&[(CacheReady, True), (DatabaseReady, Unknown)])),
            ClusterPhase::Provisioning
        );
        assert_eq!(
            overall_phase(&conditions(&[(CacheReady, True), (StorageReady, False)])),
            ClusterPhase::Unhealthy
        );
        assert_eq!(
            overall_phase(&conditions(&[
                (CacheReady, True),
                (DatabaseReady, True),
                (StorageReady, True),
                (ServiceReady, True),
                (ConfigurationReady, False),
            ])),
            ClusterPhase::Healthy
        );
        assert_eq!(
            overall_phase(&conditions(&[
                (CacheReady, True),
                (DatabaseReady, True),
                (StorageReady, True),
            ])),
            ClusterPhase::Provisioning
        );
    }

    #[tokio::test]
    async fn revision_only_grows_on_change() {
        let tracker = StatusTracker::new(&cluster());
        let start = tracker.revision().await;

        let ready = condition(ConditionStatus::True);
        assert!(tracker.update_condition(ConditionType::CacheReady, &ready).await);
        let first = tracker.revision().await;
        assert!(first > start);

        assert!(!tracker.update_condition(ConditionType::CacheReady, &ready).await);
        assert_eq!(tracker.revision().await, first);

        let failed = condition(ConditionStatus::False);
        assert!(tracker.update_condition(ConditionType::CacheReady, &failed).await);
        assert!(tracker.revision().await > first);
    }

    #[test]
    fn next_revision_is_strictly_increasing() {
        assert!(next_revision(i64::MAX - 1) == i64::MAX);
        let future = Utc::now().timestamp_nanos_opt().unwrap() + 1_000_000_000_000;
        assert_eq!(next_revision(future), future + 1);
    }

    #[tokio::test]
    async fn depends_ready_ignores_service() {
        let tracker = StatusTracker::new(&cluster());
        for component in Component::DEPENDENCIES {
            tracker
                .update_condition(component.condition_type(), &condition(ConditionStatus::True))
                .await;
        }
        assert!(tracker.depends_ready().await);
        assert_eq!(tracker.overall_phase().await, ClusterPhase::Provisioning);
    }

    #[tokio::test]
    async fn flush_writes_once_with_phase_and_ready() {
        let mut client = MockKubeClient::new();
        client
            .expect_replace_harbor_cluster_status()
            .times(1)
            .withf(|c: &HarborCluster| {
                let status = c.status.as_ref().unwrap();
                status.phase == ClusterPhase::Unhealthy
                    && c.metadata.resource_version.as_deref() == Some("7")
                    && find_status_condition(&status.conditions, "Ready")
                        .is_some_and(|r| r.status == "False")
            })
            .returning(|c| Ok(c.clone()));

        let tracker = StatusTracker::new(&cluster());
        tracker
            .update_condition(ConditionType::StorageReady, &condition(ConditionStatus::False))
            .await;
        assert_eq!(tracker.flush(&client).await.unwrap(), ClusterPhase::Unhealthy);
    }

    #[tokio::test]
    async fn flush_skips_unchanged_status() {
        let mut client = MockKubeClient::new();
        client.expect_replace_harbor_cluster_status().times(0);

        let mut stored = cluster();
        stored.status = Some(HarborClusterStatus {
            phase: ClusterPhase::Unknown,
            observed_generation: Some(1),
            revision: 42,
            conditions: conditions(&[(ConditionType::Ready, ConditionStatus::Unknown)]),
        });
        // same triple the tracker derives for a cluster without dependency conditions
        stored.status.as_mut().unwrap().conditions[0].reason = REASON_PROVISIONING.to_string();
        stored.status.as_mut().unwrap().conditions[0].message =
            "components are still being provisioned".to_string();

        let tracker = StatusTracker::new(&stored);
        tracker.prepare().await;
        assert_eq!(tracker.flush(&client).await.unwrap(), ClusterPhase::Unknown);
    }

    #[tokio::test]
    async fn flush_swallows_conflicts_only() {
        let mut client = MockKubeClient::new();
        client
            .expect_replace_harbor_cluster_status()
            .times(1)
            .returning(|_| Err(api_error(409, "Conflict")));
        let tracker = StatusTracker::new(&cluster());
        tracker
            .update_condition(ConditionType::CacheReady, &condition(ConditionStatus::True))
            .await;
        assert!(tracker.flush(&client).await.is_ok());

        let mut client = MockKubeClient::new();
        client
            .expect_replace_harbor_cluster_status()
            .times(1)
            .returning(|_| Err(api_error(500, "InternalError")));
        let tracker = StatusTracker::new(&cluster());
        tracker
            .update_condition(ConditionType::CacheReady, &condition(ConditionStatus::True))
            .await;
        assert!(tracker.flush(&client).await.is_err());
    }

    #[tokio::test]
    async fn track_dependencies_merges_checksums() {
        let tracker = StatusTracker::new(&cluster());
        let status = CRStatus::ready("Ready", "ok", Properties::new())
            .with_checksum("ns.secret.checksum.goharbor.io/a".to_string(), "1".to_string());
        tracker.track_dependencies(Component::Cache, &status).await;
        let outputs = tracker.dependencies().await;
        assert!(outputs.properties(Component::Cache).is_some());
        assert!(outputs.properties(Component::Storage).is_none());
        assert_eq!(outputs.checksums.len(), 1);
    }
}
