use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::api::v1beta1::harborcluster::{ConditionStatus, ConditionType, HarborCluster};
use crate::util::dynamic::{ApplyError, ApplyStage};
use crate::util::errors::{Error, Result};
use crate::util::properties::Properties;

/// A piece of the Harbor stack with its own readiness condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    Cache,
    Database,
    Storage,
    Harbor,
}

impl Component {
    pub const DEPENDENCIES: [Component; 3] =
        [Component::Cache, Component::Database, Component::Storage];

    pub fn condition_type(&self) -> ConditionType {
        match self {
            Component::Cache => ConditionType::CacheReady,
            Component::Database => ConditionType::DatabaseReady,
            Component::Storage => ConditionType::StorageReady,
            Component::Harbor => ConditionType::ServiceReady,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Cache => "Cache",
            Component::Database => "Database",
            Component::Storage => "Storage",
            Component::Harbor => "Harbor",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status, reason and message of one component condition.
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentCondition {
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
}

impl ComponentCondition {
    pub fn new(
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn to_condition(
        &self,
        condition_type: ConditionType,
        generation: Option<i64>,
    ) -> Condition {
        Condition {
            type_: condition_type.to_string(),
            status: self.status.to_string(),
            reason: self.reason.clone(),
            message: self.message.clone(),
            // stamped by set_status_condition
            last_transition_time: Time(chrono::Utc::now()),
            observed_generation: generation,
        }
    }
}

/// What a dependency reports back after a pass.
#[derive(Clone, Debug, PartialEq)]
pub struct CRStatus {
    pub condition: ComponentCondition,
    /// Connection details for Harbor, only published once ready.
    pub properties: Properties,
    /// Checksum annotations tracking upstream secrets, keyed by annotation name.
    pub checksums: BTreeMap<String, String>,
}

impl CRStatus {
    pub fn ready(
        reason: impl Into<String>,
        message: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self {
            condition: ComponentCondition::new(ConditionStatus::True, reason, message),
            properties,
            checksums: BTreeMap::new(),
        }
    }

    pub fn unknown(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            condition: ComponentCondition::new(ConditionStatus::Unknown, reason, message),
            properties: Properties::new(),
            checksums: BTreeMap::new(),
        }
    }

    pub fn with_checksum(mut self, key: String, value: String) -> Self {
        self.checksums.insert(key, value);
        self
    }

    pub fn is_ready(&self) -> bool {
        self.condition.status == ConditionStatus::True
    }
}

/// A failed dependency pass: the condition reason to record and the cause.
#[derive(Error, Debug)]
#[error("{reason}: {source}")]
pub struct DependencyFailure {
    pub reason: String,
    #[source]
    pub source: Error,
}

impl DependencyFailure {
    pub fn new(reason: impl Into<String>, source: Error) -> Self {
        Self {
            reason: reason.into(),
            source,
        }
    }

    /// Reason codes follow `{Verb}{Component}Error`, e.g. `CreateCacheError`.
    /// Building the custom resource itself fails as `Generate{Component}CrError`.
    pub fn from_apply(component: Component, error: ApplyError) -> Self {
        let reason = match error.stage {
            ApplyStage::Get => format!("Get{component}Error"),
            ApplyStage::Create => format!("Create{component}Error"),
            ApplyStage::Update => format!("Update{component}Error"),
            ApplyStage::Convert => format!("Generate{component}CrError"),
        };
        Self::new(reason, error.error)
    }
}

pub type DependencyResult<T> = std::result::Result<T, DependencyFailure>;

/// Tags an error with the condition reason it should be reported under.
pub trait FailureReason<T> {
    fn reason(self, reason: &str) -> DependencyResult<T>;
}

impl<T> FailureReason<T> for Result<T> {
    fn reason(self, reason: &str) -> DependencyResult<T> {
        self.map_err(|e| DependencyFailure::new(reason, e))
    }
}

/// Provisions one in-cluster dependency from its sub-spec on the HarborCluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependencyController: Send + Sync {
    /// Create or update the backing resources and report readiness.
    async fn apply(&self, cluster: &HarborCluster) -> DependencyResult<CRStatus>;

    async fn delete(&self, cluster: &HarborCluster) -> DependencyResult<CRStatus>;

    async fn upgrade(&self, cluster: &HarborCluster) -> DependencyResult<CRStatus>;
}
