use std::sync::Arc;

use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::api::v1beta1::harborcluster::{ConditionStatus, HarborCluster};
use crate::controllers::dependency::{Component, ComponentCondition, DependencyController};
use crate::util::cluster_status::StatusTracker;
use crate::util::errors::{Result, StdError};

/// Runs one dependency for one pass and records the outcome on the tracker.
///
/// Built with chained setters; every field is checked before anything runs.
pub struct ServiceManager {
    component: Component,
    cluster: Option<Arc<HarborCluster>>,
    ctrl: Option<Arc<dyn DependencyController>>,
    status: Option<Arc<StatusTracker>>,
    cancel: CancellationToken,
}

impl ServiceManager {
    pub fn new(component: Component) -> Self {
        Self {
            component,
            cluster: None,
            ctrl: None,
            status: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cluster(mut self, cluster: Arc<HarborCluster>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn with_controller(mut self, ctrl: Arc<dyn DependencyController>) -> Self {
        self.ctrl = Some(ctrl);
        self
    }

    pub fn track_status(mut self, status: Arc<StatusTracker>) -> Self {
        self.status = Some(status);
        self
    }

    /// Shares the pass's cancel scope. A canceled manager does not start its
    /// controller; one that already started runs to completion.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn validate(&self) -> Result<(&HarborCluster, &dyn DependencyController, &StatusTracker)> {
        if !Component::DEPENDENCIES.contains(&self.component) {
            return Err(StdError::InvalidArgument(format!(
                "{} is not a dependency that can be provisioned",
                self.component
            ))
            .into());
        }
        let cluster = self
            .cluster
            .as_deref()
            .ok_or_else(|| {
                StdError::InvalidArgument(format!("no cluster set for {}", self.component))
            })?;
        let ctrl = self
            .ctrl
            .as_deref()
            .ok_or_else(|| {
                StdError::InvalidArgument(format!("no controller set for {}", self.component))
            })?;
        let status = self
            .status
            .as_deref()
            .ok_or_else(|| {
                StdError::InvalidArgument(format!("no status tracker set for {}", self.component))
            })?;
        Ok((cluster, ctrl, status))
    }

    fn in_cluster(&self, cluster: &HarborCluster) -> bool {
        match self.component {
            Component::Cache => cluster.spec.in_cluster_cache().is_some(),
            Component::Database => cluster.spec.in_cluster_database().is_some(),
            Component::Storage => cluster.spec.in_cluster_storage().is_some(),
            Component::Harbor => false,
        }
    }

    #[instrument(skip(self), fields(component = %self.component))]
    pub async fn apply(&self) -> Result<()> {
        let (cluster, ctrl, tracker) = self.validate()?;
        let condition_type = self.component.condition_type();

        if !self.in_cluster(cluster) {
            debug!("{} uses an external {}", cluster.name_any(), self.component);
            tracker
                .update_condition(
                    condition_type,
                    &ComponentCondition::new(
                        ConditionStatus::True,
                        format!("External{}", self.component),
                        format!("{} is provided outside of the cluster", self.component),
                    ),
                )
                .await;
            return Ok(());
        }

        if self.cancel.is_cancelled() {
            tracker
                .update_condition(
                    condition_type,
                    &ComponentCondition::new(
                        ConditionStatus::Unknown,
                        format!("{}Canceled", self.component),
                        "another dependency failed before this one was provisioned",
                    ),
                )
                .await;
            return Err(StdError::Canceled(format!("{} was canceled", self.component)).into());
        }

        match ctrl.apply(cluster).await {
            Ok(status) => {
                tracker.update_condition(condition_type, &status.condition).await;
                tracker.track_dependencies(self.component, &status).await;
                Ok(())
            }
            Err(failure) => {
                warn!("{} of {} failed: {failure}", self.component, cluster.name_any());
                tracker
                    .update_condition(
                        condition_type,
                        &ComponentCondition::new(
                            ConditionStatus::False,
                            failure.reason,
                            failure.source.message(),
                        ),
                    )
                    .await;
                Err(failure.source)
            }
        }
    }
}
