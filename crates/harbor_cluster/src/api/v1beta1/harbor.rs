use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1beta1::{conditions_schema, CertificateInjection, ComponentSpec};

/// Condition types reported by the Harbor controller on its own status.
pub const HARBOR_FAILED_CONDITION: &str = "Failed";
pub const HARBOR_IN_PROGRESS_CONDITION: &str = "InProgress";

/// The `Harbor` resource realised by the per-component controllers.
///
/// A `HarborCluster` materialises exactly one of these once its cache,
/// database and storage are ready.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(kind = "Harbor", group = "goharbor.io", version = "v1beta1", namespaced)]
#[kube(status = "HarborStatus", shortname = "h")]
#[serde(rename_all = "camelCase")]
pub struct HarborSpec {
    #[serde(flatten)]
    pub embedded: EmbeddedHarborSpec,

    pub database: Option<HarborDatabaseSpec>,
    pub redis: Option<ExternalRedisSpec>,
    pub image_chart_storage: Option<HarborStorageImageChartStorageSpec>,
}

/// The part of a Harbor spec that a user writes directly on a `HarborCluster`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedHarborSpec {
    #[serde(flatten)]
    pub components: HarborComponentsSpec,

    #[serde(rename = "externalURL")]
    pub external_url: String,
    #[serde(default)]
    pub expose: HarborExposeSpec,
    pub internal_tls: Option<InternalTlsSpec>,
    pub log_level: Option<HarborLogLevel>,
    pub version: String,
    pub harbor_admin_password_ref: String,
    pub update_strategy_type: Option<String>,
    pub proxy: Option<HarborProxySpec>,
    pub network: Option<NetworkSpec>,
    pub trace: Option<TraceSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborComponentsSpec {
    pub portal: Option<ComponentSpec>,
    #[serde(default)]
    pub core: CoreComponentSpec,
    #[serde(default)]
    pub jobservice: JobServiceComponentSpec,
    #[serde(default)]
    pub registry: RegistryComponentSpec,
    pub registryctl: Option<ComponentSpec>,
    pub chartmuseum: Option<ChartMuseumComponentSpec>,
    pub exporter: Option<ExporterComponentSpec>,
    pub trivy: Option<TrivyComponentSpec>,
    pub notary: Option<NotaryComponentSpec>,
}

impl HarborComponentsSpec {
    /// Components that open TLS connections to the image and chart storage backend.
    pub fn storage_clients_mut(&mut self) -> Vec<&mut CertificateInjection> {
        let mut clients = vec![
            &mut self.core.certificate_injection,
            &mut self.jobservice.certificate_injection,
        ];
        if let Some(chartmuseum) = self.chartmuseum.as_mut() {
            clients.push(&mut chartmuseum.certificate_injection);
        }
        if let Some(trivy) = self.trivy.as_mut() {
            clients.push(&mut trivy.certificate_injection);
        }
        clients
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CoreComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,
    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,
    pub token_issuer: Option<CertificateIssuerRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateIssuerRef {
    pub name: String,
    pub kind: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobServiceComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,
    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,
    pub worker_count: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,
    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,
    #[serde(rename = "relativeURLs")]
    pub relative_urls: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,
    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,
    #[serde(rename = "absoluteURL")]
    pub absolute_url: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrivyComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,
    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,
    pub skip_update: Option<bool>,
    pub offline_scan: Option<bool>,
    pub github_token_ref: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExporterComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,
    pub port: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotaryComponentSpec {
    #[serde(default)]
    pub server: ComponentSpec,
    #[serde(default)]
    pub signer: ComponentSpec,
    pub migration_enabled: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborExposeSpec {
    #[serde(default)]
    pub core: HarborExposeComponentSpec,
    pub notary: Option<HarborExposeComponentSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborExposeComponentSpec {
    pub ingress: Option<HarborExposeIngressSpec>,
    pub tls: Option<HarborExposeTlsSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborExposeIngressSpec {
    pub host: String,
    pub ingress_class_name: Option<String>,
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborExposeTlsSpec {
    pub certificate_ref: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InternalTlsSpec {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum HarborLogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborProxySpec {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Vec<String>,
    #[serde(default)]
    pub components: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default)]
    pub ip_families: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TraceSpec {
    #[serde(default)]
    pub enabled: bool,
    pub provider: Option<String>,
    pub sample_rate: Option<f64>,
    pub namespace: Option<String>,
    pub attributes: Option<BTreeMap<String, String>>,
}

/// Redis coordinates consumed by Harbor.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRedisSpec {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: i32,
    /// Set when `host` points at a sentinel rather than a redis server.
    pub sentinel_master_set: Option<String>,
    /// Secret holding the password under the `redis-password` key.
    pub password_ref: Option<String>,
}

fn default_redis_port() -> i32 {
    6379
}

/// PostgreSQL coordinates consumed by Harbor.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborDatabaseSpec {
    pub username: String,
    /// Secret holding the password under the `postgresql-password` key.
    pub password_ref: Option<String>,
    pub hosts: Vec<PostgresHostSpec>,
    #[serde(default)]
    pub ssl_mode: PostgresSslMode,
    pub prefix: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresHostSpec {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: i32,
}

fn default_postgres_port() -> i32 {
    5432
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum PostgresSslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborStorageImageChartStorageSpec {
    pub s3: Option<HarborStorageS3Spec>,
    pub redirect: Option<StorageRedirectSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageRedirectSpec {
    #[serde(default = "default_redirect")]
    pub enable: bool,
}

fn default_redirect() -> bool {
    true
}

/// S3 driver settings for the registry and chartmuseum storage.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborStorageS3Spec {
    pub access_key: String,
    /// Secret holding the secret key under the `secret` key.
    pub secret_key_ref: String,
    pub region: String,
    pub region_endpoint: Option<String>,
    pub bucket: String,
    pub root_directory: Option<String>,
    pub encrypt: Option<bool>,
    #[serde(rename = "keyid")]
    pub key_id: Option<String>,
    pub secure: Option<bool>,
    #[serde(rename = "v4auth")]
    pub v4_auth: Option<bool>,
    #[serde(rename = "skipverify")]
    pub skip_verify: Option<bool>,
    #[serde(rename = "chunksize")]
    pub chunk_size: Option<i64>,
    #[serde(rename = "storageclass")]
    pub storage_class: Option<String>,
    /// Secret holding a CA bundle trusted when talking to `region_endpoint`.
    pub certificate_ref: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HarborStatus {
    #[schemars(schema_with = "conditions_schema")]
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub observed_generation: Option<i64>,
}
