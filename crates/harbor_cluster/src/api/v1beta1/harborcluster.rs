use core::fmt;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1beta1::conditions_schema;
use crate::api::v1beta1::harbor::{
    EmbeddedHarborSpec, ExternalRedisSpec, HarborDatabaseSpec, HarborExposeIngressSpec,
    HarborExposeTlsSpec, HarborStorageS3Spec, StorageRedirectSpec,
};

/// Label set on every child `Harbor` so it can be traced back to its cluster.
pub const HARBOR_CLUSTER_LABEL: &str = "goharbor.io/harbor-cluster";

/// Generate the Kubernetes wrapper struct `HarborCluster` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "HarborCluster", group = "goharbor.io", version = "v1beta1", namespaced)]
#[kube(status = "HarborClusterStatus", shortname = "hc")]
#[kube(printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[serde(rename_all = "camelCase")]
pub struct HarborClusterSpec {
    #[serde(flatten)]
    pub harbor: EmbeddedHarborSpec,

    pub cache: Option<Cache>,
    pub database: Option<Database>,
    pub storage: Option<Storage>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Cache {
    #[serde(default)]
    pub kind: CacheKind,
    #[serde(default)]
    pub spec: CacheSpec,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum CacheKind {
    Redis,
    #[default]
    RedisFailover,
}

/// Exactly one of `redis` (external) or `redis_failover` (in-cluster) is set.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    pub redis: Option<ExternalRedisSpec>,
    pub redis_failover: Option<RedisFailoverSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisFailoverSpec {
    #[serde(default)]
    pub redis: RedisServerSpec,
    #[serde(default)]
    pub sentinel: RedisSentinelSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisServerSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    pub image: Option<String>,
    pub resources: Option<ResourceRequirements>,
    pub storage_class_name: Option<String>,
    /// Size of the persistent volume; no volume is requested when unset.
    pub storage: Option<String>,
}

impl Default for RedisServerSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            image: None,
            resources: None,
            storage_class_name: None,
            storage: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    pub image: Option<String>,
    pub resources: Option<ResourceRequirements>,
}

impl Default for RedisSentinelSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            image: None,
            resources: None,
        }
    }
}

fn default_replicas() -> i32 {
    3
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default)]
    pub kind: DatabaseKind,
    #[serde(default)]
    pub spec: DatabaseSpec,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum DatabaseKind {
    PostgreSQL,
    #[default]
    Zlando,
}

/// Exactly one of `postgres_sql` (external) or `zlando_postgres_sql` (in-cluster) is set.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    #[serde(rename = "postgresql")]
    pub postgres_sql: Option<HarborDatabaseSpec>,
    #[serde(rename = "zlandoPostgreSql")]
    pub zlando_postgres_sql: Option<ZlandoPostgresSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZlandoPostgresSpec {
    #[serde(default = "default_postgres_replicas")]
    pub replicas: i32,
    #[serde(default = "default_volume_size")]
    pub storage: String,
    pub storage_class_name: Option<String>,
    pub resources: Option<ResourceRequirements>,
    #[serde(default = "default_postgres_version")]
    pub version: String,
}

impl Default for ZlandoPostgresSpec {
    fn default() -> Self {
        Self {
            replicas: default_postgres_replicas(),
            storage: default_volume_size(),
            storage_class_name: None,
            resources: None,
            version: default_postgres_version(),
        }
    }
}

fn default_postgres_replicas() -> i32 {
    1
}

fn default_volume_size() -> String {
    "1Gi".to_string()
}

fn default_postgres_version() -> String {
    "14".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    #[serde(default)]
    pub kind: StorageKind,
    #[serde(default)]
    pub spec: StorageSpec,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum StorageKind {
    S3,
    #[default]
    MinIO,
}

/// Exactly one of `s3` (external) or `min_io` (in-cluster) is set.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    pub s3: Option<HarborStorageS3Spec>,
    /// Redirect behaviour for external storage.
    pub redirect: Option<StorageRedirectSpec>,
    #[serde(rename = "minIO")]
    pub min_io: Option<MinIOSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MinIOSpec {
    /// Number of MinIO servers.
    #[serde(default = "default_minio_replicas")]
    pub replicas: i32,
    #[serde(default = "default_volumes_per_server")]
    pub volumes_per_server: i32,
    #[serde(default = "default_volume_size")]
    pub storage: String,
    pub storage_class_name: Option<String>,
    pub image: Option<String>,
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub redirect: MinIORedirectSpec,
}

impl Default for MinIOSpec {
    fn default() -> Self {
        Self {
            replicas: default_minio_replicas(),
            volumes_per_server: default_volumes_per_server(),
            storage: default_volume_size(),
            storage_class_name: None,
            image: None,
            resources: None,
            redirect: MinIORedirectSpec::default(),
        }
    }
}

fn default_minio_replicas() -> i32 {
    4
}

fn default_volumes_per_server() -> i32 {
    1
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MinIORedirectSpec {
    #[serde(default)]
    pub enable: bool,
    pub expose: Option<MinIOExposeSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MinIOExposeSpec {
    pub ingress: HarborExposeIngressSpec,
    pub tls: Option<HarborExposeTlsSpec>,
}

impl HarborClusterSpec {
    pub fn in_cluster_cache(&self) -> Option<&RedisFailoverSpec> {
        self.cache.as_ref().and_then(|c| c.spec.redis_failover.as_ref())
    }

    pub fn in_cluster_database(&self) -> Option<&ZlandoPostgresSpec> {
        self.database.as_ref().and_then(|d| d.spec.zlando_postgres_sql.as_ref())
    }

    pub fn in_cluster_storage(&self) -> Option<&MinIOSpec> {
        self.storage.as_ref().and_then(|s| s.spec.min_io.as_ref())
    }
}

/// Phase represents the high-level status of a HarborCluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClusterPhase {
    #[default]
    Unknown,
    Creating,
    Provisioning,
    Healthy,
    Unhealthy,
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClusterPhase::Unknown => write!(f, "unknown"),
            ClusterPhase::Creating => write!(f, "creating"),
            ClusterPhase::Provisioning => write!(f, "provisioning"),
            ClusterPhase::Healthy => write!(f, "healthy"),
            ClusterPhase::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConditionType {
    Ready,
    CacheReady,
    DatabaseReady,
    StorageReady,
    ServiceReady,
    ConfigurationReady,
}

impl ConditionType {
    /// The condition types the overall phase is computed from.
    pub const DEPENDENCIES: [ConditionType; 4] = [
        ConditionType::CacheReady,
        ConditionType::DatabaseReady,
        ConditionType::StorageReady,
        ConditionType::ServiceReady,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Ready => "Ready",
            ConditionType::CacheReady => "CacheReady",
            ConditionType::DatabaseReady => "DatabaseReady",
            ConditionType::StorageReady => "StorageReady",
            ConditionType::ServiceReady => "ServiceReady",
            ConditionType::ConfigurationReady => "ConfigurationReady",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status object of `HarborCluster`
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborClusterStatus {
    #[serde(default)]
    pub phase: ClusterPhase,
    pub observed_generation: Option<i64>,
    /// Nanosecond wall-clock of the last status mutation.
    #[serde(default)]
    pub revision: i64,
    #[schemars(schema_with = "conditions_schema")]
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
