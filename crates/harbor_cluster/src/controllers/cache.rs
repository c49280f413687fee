use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaimSpec, ResourceRequirements, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::api::v1beta1::harbor::ExternalRedisSpec;
use crate::api::v1beta1::harborcluster::{HarborCluster, RedisFailoverSpec, HARBOR_CLUSTER_LABEL};
use crate::controllers::dependency::{
    CRStatus, Component, DependencyController, DependencyFailure, DependencyResult, FailureReason,
};
use crate::util::client::KubeClient;
use crate::util::dynamic::{apply_resource, impl_resource, owner_reference, DependencyResource};
use crate::util::errors::{Error, StdError};
use crate::util::hash::dependency_checksum_key;
use crate::util::properties::{Properties, PropertyValue, CACHE_PROPERTY};
use crate::util::secrets::{ensure_secret, owned_secret, random_password};

pub const SENTINEL_PORT: i32 = 26379;
pub const SENTINEL_MASTER_SET: &str = "mymaster";
/// Key the redis failover operator reads the password from.
pub const PASSWORD_KEY: &str = "password";
/// Key Harbor reads the password from.
pub const REDIS_PASSWORD_KEY: &str = "redis-password";

const REASON_CACHE_READY: &str = "CacheReady";
const REASON_CACHE_NOT_READY: &str = "CacheNotReady";
const REASON_CACHE_DELETED: &str = "CacheDeleted";
const REASON_GENERATE_CACHE_ERROR: &str = "GenerateCacheCrError";
const REASON_CREATE_CACHE_SECRET_ERROR: &str = "CreateCacheSecretError";
const REASON_GET_CACHE_STATUS_ERROR: &str = "GetCacheStatusError";
const REASON_DELETE_CACHE_ERROR: &str = "DeleteCacheError";

/// `databases.spotahome.com/v1` RedisFailover, reduced to what we set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RedisFailover {
    pub metadata: ObjectMeta,
    pub spec: RedisFailoverCrSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisFailoverCrSpec {
    pub redis: RedisSettings,
    pub sentinel: SentinelSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSettings>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisSettings {
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<RedisStorage>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SentinelSettings {
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisStorage {
    #[serde(default)]
    pub keep_after_deletion: bool,
    pub persistent_volume_claim: VolumeClaimTemplate,
}

/// PVC template embedded in a custom resource.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VolumeClaimTemplate {
    pub metadata: ObjectMeta,
    pub spec: PersistentVolumeClaimSpec,
}

impl VolumeClaimTemplate {
    pub fn new(name: &str, size: &str, storage_class_name: Option<String>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name,
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(size.to_string()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    pub secret_path: String,
}

impl DependencyResource for RedisFailover {
    const API_VERSION: &'static str = "databases.spotahome.com/v1";
    const KIND: &'static str = "RedisFailover";
    const PLURAL: &'static str = "redisfailovers";

    fn spec_equal(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

impl_resource!(RedisFailover);

pub fn redis_failover_name(cluster_name: &str) -> String {
    format!("{cluster_name}-redis")
}

/// StatefulSet the redis failover operator runs the redis servers in.
pub fn redis_stateful_set_name(failover_name: &str) -> String {
    format!("rfr-{failover_name}")
}

/// Deployment (and Service) the redis failover operator runs the sentinels in.
pub fn sentinel_name(failover_name: &str) -> String {
    format!("rfs-{failover_name}")
}

fn cluster_labels(cluster: &HarborCluster) -> BTreeMap<String, String> {
    BTreeMap::from([(HARBOR_CLUSTER_LABEL.to_string(), cluster.name_any())])
}

pub fn desired_redis_failover(
    cluster: &HarborCluster,
    spec: &RedisFailoverSpec,
) -> Result<RedisFailover, Error> {
    let namespace = cluster
        .namespace()
        .ok_or_else(|| {
            StdError::MetadataMissing(format!("namespace missing on {}", cluster.name_any()))
        })?;
    let owner = cluster
        .controller_owner_ref(&())
        .ok_or_else(|| {
            StdError::MetadataMissing(format!("uid missing on {}", cluster.name_any()))
        })?;
    let name = redis_failover_name(&cluster.name_any());

    Ok(RedisFailover {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: RedisFailoverCrSpec {
            redis: RedisSettings {
                replicas: spec.redis.replicas,
                image: spec.redis.image.clone(),
                resources: spec.redis.resources.clone(),
                storage: spec.redis.storage.as_ref().map(|size| RedisStorage {
                    keep_after_deletion: false,
                    persistent_volume_claim: VolumeClaimTemplate::new(
                        "redis-data",
                        size,
                        spec.redis.storage_class_name.clone(),
                    ),
                }),
            },
            sentinel: SentinelSettings {
                replicas: spec.sentinel.replicas,
                image: spec.sentinel.image.clone(),
                resources: spec.sentinel.resources.clone(),
            },
            // the secret is named after the failover
            auth: Some(AuthSettings { secret_path: name }),
        },
        status: None,
    })
}

/// Provisions the cache as a sentinel-backed RedisFailover.
pub struct RedisController {
    client: Arc<dyn KubeClient>,
}

impl RedisController {
    pub fn new(client: Arc<dyn KubeClient>) -> Self {
        Self { client }
    }

    async fn is_ready(&self, failover: &RedisFailover) -> Result<bool, Error> {
        let namespace = failover.metadata.namespace.as_deref().unwrap_or_default();
        let name = failover.metadata.name.as_deref().unwrap_or_default();

        let servers_ready = self
            .client
            .get_stateful_set(namespace, &redis_stateful_set_name(name))
            .await?
            .and_then(|sts| sts.status)
            .is_some_and(|s| s.ready_replicas.unwrap_or(0) >= failover.spec.redis.replicas);
        let sentinels_ready = self
            .client
            .get_deployment(namespace, &sentinel_name(name))
            .await?
            .and_then(|d| d.status)
            .is_some_and(|s| s.ready_replicas.unwrap_or(0) >= failover.spec.sentinel.replicas);
        Ok(servers_ready && sentinels_ready)
    }
}

#[async_trait]
impl DependencyController for RedisController {
    #[instrument(skip(self, cluster), fields(cluster = %cluster.name_any()))]
    async fn apply(&self, cluster: &HarborCluster) -> DependencyResult<CRStatus> {
        let spec = cluster.spec.in_cluster_cache().ok_or_else(|| {
            DependencyFailure::new(
                REASON_GENERATE_CACHE_ERROR,
                StdError::InvalidArgument("no redis failover spec".to_string()).into(),
            )
        })?;
        let desired = desired_redis_failover(cluster, spec).reason(REASON_GENERATE_CACHE_ERROR)?;

        let (failover, applied) = apply_resource(self.client.as_ref(), desired)
            .await
            .map_err(|e| DependencyFailure::from_apply(Component::Cache, e))?;
        info!("redis failover {}: {applied:?}", failover.name_any());

        let namespace = failover.namespace().unwrap_or_default();
        let owner = owner_reference(&failover).ok_or_else(|| {
            DependencyFailure::new(
                REASON_CREATE_CACHE_SECRET_ERROR,
                StdError::MetadataMissing(format!(
                    "uid missing on RedisFailover {}",
                    failover.name_any()
                ))
                .into(),
            )
        })?;
        let password = random_password(16);
        let secret = ensure_secret(
            self.client.as_ref(),
            owned_secret(
                &failover.name_any(),
                &namespace,
                owner,
                cluster_labels(cluster),
                BTreeMap::from([
                    (PASSWORD_KEY.to_string(), password.clone()),
                    (REDIS_PASSWORD_KEY.to_string(), password),
                ]),
            ),
        )
        .await
        .reason(REASON_CREATE_CACHE_SECRET_ERROR)?;

        if !self.is_ready(&failover).await.reason(REASON_GET_CACHE_STATUS_ERROR)? {
            return Ok(CRStatus::unknown(
                REASON_CACHE_NOT_READY,
                format!("waiting for redis failover {} to become ready", failover.name_any()),
            ));
        }

        let properties = Properties::new().with(
            CACHE_PROPERTY,
            PropertyValue::Redis(ExternalRedisSpec {
                host: format!("{}.{namespace}.svc", sentinel_name(&failover.name_any())),
                port: SENTINEL_PORT,
                sentinel_master_set: Some(SENTINEL_MASTER_SET.to_string()),
                password_ref: secret.metadata.name.clone(),
            }),
        );
        Ok(CRStatus::ready(REASON_CACHE_READY, "redis failover is ready", properties).with_checksum(
            dependency_checksum_key(&namespace, "Secret", &secret.name_any()),
            secret.resource_version().unwrap_or_default(),
        ))
    }

    async fn delete(&self, cluster: &HarborCluster) -> DependencyResult<CRStatus> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = redis_failover_name(&cluster.name_any());
        self.client
            .delete_object(&RedisFailover::api_resource(), &namespace, &name)
            .await
            .reason(REASON_DELETE_CACHE_ERROR)?;
        Ok(CRStatus::unknown(REASON_CACHE_DELETED, format!("redis failover {name} deleted")))
    }

    async fn upgrade(&self, _cluster: &HarborCluster) -> DependencyResult<CRStatus> {
        // TODO: roll redis images once the failover operator supports in-place upgrades
        Err(DependencyFailure::new(
            "UpgradeCacheError",
            StdError::Unsupported("upgrading the in-cluster cache".to_string()).into(),
        ))
    }
}
