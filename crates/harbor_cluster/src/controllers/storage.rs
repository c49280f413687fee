use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::api::v1beta1::harbor::HarborStorageS3Spec;
use crate::api::v1beta1::harborcluster::{
    HarborCluster, MinIOExposeSpec, MinIOSpec, HARBOR_CLUSTER_LABEL,
};
use crate::controllers::cache::VolumeClaimTemplate;
use crate::controllers::dependency::{
    CRStatus, Component, DependencyController, DependencyFailure, DependencyResult, FailureReason,
};
use crate::util::client::KubeClient;
use crate::util::dynamic::{
    apply_resource, from_dynamic, impl_resource, owner_reference, DependencyResource,
};
use crate::util::errors::{Error, StdError};
use crate::util::hash::{
    applied_hash, dependency_checksum_key, hash_of, merge_live_annotations, set_applied_hash,
};
use crate::util::properties::{Properties, PropertyValue, StorageConnection, STORAGE_PROPERTY};
use crate::util::secrets::{ensure_secret, owned_secret, random_password, secret_value};

pub const BUCKET: &str = "harbor";
pub const REGION: &str = "us-east-1";
pub const MINIO_PORT: i32 = 9000;
pub const ACCESS_KEY: &str = "accesskey";
pub const SECRET_KEY: &str = "secretkey";
/// Key Harbor reads the S3 secret key from.
pub const HARBOR_SECRET_KEY: &str = "secret";
/// Environment file the MinIO operator reads root credentials from.
pub const CONFIG_ENV_KEY: &str = "config.env";
const INITIALIZED: &str = "Initialized";

const REASON_STORAGE_READY: &str = "StorageReady";
const REASON_STORAGE_NOT_READY: &str = "StorageNotReady";
const REASON_STORAGE_DELETED: &str = "StorageDeleted";
const REASON_GENERATE_STORAGE_ERROR: &str = "GenerateStorageCrError";
const REASON_GET_STORAGE_ERROR: &str = "GetStorageError";
const REASON_UPDATE_STORAGE_ERROR: &str = "UpdateStorageError";
const REASON_CREATE_STORAGE_SECRET_ERROR: &str = "CreateStorageSecretError";
const REASON_APPLY_STORAGE_INGRESS_ERROR: &str = "ApplyStorageIngressError";
const REASON_DELETE_STORAGE_ERROR: &str = "DeleteStorageError";

/// `minio.min.io/v2` Tenant, reduced to what we set and read.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Tenant {
    pub metadata: ObjectMeta,
    pub spec: TenantSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TenantStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub configuration: LocalObjectReference,
    pub pools: Vec<Pool>,
    #[serde(default)]
    pub request_auto_cert: bool,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub name: String,
    pub servers: i32,
    pub volumes_per_server: i32,
    pub volume_claim_template: VolumeClaimTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Bucket {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    #[serde(default)]
    pub current_state: String,
}

impl DependencyResource for Tenant {
    const API_VERSION: &'static str = "minio.min.io/v2";
    const KIND: &'static str = "Tenant";
    const PLURAL: &'static str = "tenants";

    fn spec_equal(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

impl_resource!(Tenant);

impl Tenant {
    /// Total drives across pools; a single drive runs MinIO standalone.
    pub fn drives(&self) -> i32 {
        self.spec
            .pools
            .iter()
            .map(|p| p.servers * p.volumes_per_server)
            .sum()
    }
}

pub fn tenant_name(cluster_name: &str) -> String {
    format!("{cluster_name}-minio")
}

pub fn credentials_name(cluster_name: &str) -> String {
    format!("{cluster_name}-minio")
}

/// Headless service the MinIO operator creates for a tenant.
pub fn headless_service_name(tenant_name: &str) -> String {
    format!("{tenant_name}-hl")
}

fn cluster_labels(cluster: &HarborCluster) -> BTreeMap<String, String> {
    BTreeMap::from([(HARBOR_CLUSTER_LABEL.to_string(), cluster.name_any())])
}

fn cluster_namespace(cluster: &HarborCluster) -> Result<String, Error> {
    cluster
        .namespace()
        .ok_or_else(|| {
            StdError::MetadataMissing(format!("namespace missing on {}", cluster.name_any())).into()
        })
}

pub fn desired_tenant(cluster: &HarborCluster, spec: &MinIOSpec) -> Result<Tenant, Error> {
    let owner = cluster
        .controller_owner_ref(&())
        .ok_or_else(|| {
            StdError::MetadataMissing(format!("uid missing on {}", cluster.name_any()))
        })?;

    Ok(Tenant {
        metadata: ObjectMeta {
            name: Some(tenant_name(&cluster.name_any())),
            namespace: Some(cluster_namespace(cluster)?),
            labels: Some(cluster_labels(cluster)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: TenantSpec {
            image: spec.image.clone(),
            configuration: LocalObjectReference {
                name: credentials_name(&cluster.name_any()),
            },
            pools: vec![Pool {
                name: "pool-0".to_string(),
                servers: spec.replicas,
                volumes_per_server: spec.volumes_per_server,
                volume_claim_template: VolumeClaimTemplate::new(
                    "data",
                    &spec.storage,
                    spec.storage_class_name.clone(),
                ),
                resources: spec.resources.clone(),
            }],
            request_auto_cert: false,
            buckets: vec![Bucket {
                name: BUCKET.to_string(),
            }],
        },
        status: None,
    })
}

fn credentials_data(access_key: &str, secret_key: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            CONFIG_ENV_KEY.to_string(),
            format!(
                "export MINIO_ROOT_USER=\"{access_key}\"\n\
                 export MINIO_ROOT_PASSWORD=\"{secret_key}\"\n"
            ),
        ),
        (ACCESS_KEY.to_string(), access_key.to_string()),
        (SECRET_KEY.to_string(), secret_key.to_string()),
        (HARBOR_SECRET_KEY.to_string(), secret_key.to_string()),
    ])
}

/// Ingress publishing the tenant so clients can follow storage redirects.
pub fn desired_ingress(
    cluster: &HarborCluster,
    expose: &MinIOExposeSpec,
) -> Result<Ingress, Error> {
    let owner = cluster
        .controller_owner_ref(&())
        .ok_or_else(|| {
            StdError::MetadataMissing(format!("uid missing on {}", cluster.name_any()))
        })?;
    let tenant = tenant_name(&cluster.name_any());

    let mut metadata = ObjectMeta {
        name: Some(tenant.clone()),
        namespace: Some(cluster_namespace(cluster)?),
        labels: Some(cluster_labels(cluster)),
        annotations: expose.ingress.annotations.clone(),
        owner_references: Some(vec![owner]),
        ..Default::default()
    };
    let spec = IngressSpec {
        ingress_class_name: expose.ingress.ingress_class_name.clone(),
        tls: expose.tls.as_ref().map(|tls| {
            vec![IngressTLS {
                hosts: Some(vec![expose.ingress.host.clone()]),
                secret_name: Some(tls.certificate_ref.clone()),
            }]
        }),
        rules: Some(vec![IngressRule {
            host: Some(expose.ingress.host.clone()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some("/".to_string()),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: headless_service_name(&tenant),
                            port: Some(ServiceBackendPort {
                                number: Some(MINIO_PORT),
                                name: None,
                            }),
                        }),
                        resource: None,
                    },
                }],
            }),
        }]),
        ..Default::default()
    };
    let hash = hash_of(&(&spec, &metadata.annotations))?;
    set_applied_hash(&mut metadata, hash);

    Ok(Ingress {
        metadata,
        spec: Some(spec),
        status: None,
    })
}

async fn apply_ingress(client: &dyn KubeClient, mut desired: Ingress) -> Result<Ingress, Error> {
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    match client.get_ingress(&namespace, &name).await? {
        None => client.create_ingress(&desired).await,
        Some(live)
            if applied_hash(&live.metadata).is_some()
                && applied_hash(&live.metadata) == applied_hash(&desired.metadata) =>
        {
            Ok(live)
        }
        Some(live) => {
            merge_live_annotations(&mut desired.metadata, &live.metadata);
            desired.metadata.resource_version = live.metadata.resource_version;
            client.replace_ingress(&desired).await
        }
    }
}

/// Provisions the image and chart storage as a MinIO tenant.
pub struct MinIOController {
    client: Arc<dyn KubeClient>,
}

impl MinIOController {
    pub fn new(client: Arc<dyn KubeClient>) -> Self {
        Self { client }
    }

    /// MinIO cannot grow from a single drive into erasure-coded mode in place.
    async fn check_topology(&self, desired: &Tenant) -> DependencyResult<()> {
        let namespace = desired.metadata.namespace.as_deref().unwrap_or_default();
        let name = desired.metadata.name.as_deref().unwrap_or_default();
        let Some(live) = self
            .client
            .get_object(&Tenant::api_resource(), namespace, name)
            .await
            .reason(REASON_GET_STORAGE_ERROR)?
        else {
            return Ok(());
        };
        let live: Tenant = from_dynamic(live).reason(REASON_GET_STORAGE_ERROR)?;
        if live.drives() == 1 && desired.drives() > 1 {
            return Err(DependencyFailure::new(
                REASON_UPDATE_STORAGE_ERROR,
                StdError::Unsupported(
                    "not support upgrading from standalone to distributed mode".to_string(),
                )
                .into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DependencyController for MinIOController {
    #[instrument(skip(self, cluster), fields(cluster = %cluster.name_any()))]
    async fn apply(&self, cluster: &HarborCluster) -> DependencyResult<CRStatus> {
        let spec = cluster.spec.in_cluster_storage().ok_or_else(|| {
            DependencyFailure::new(
                REASON_GENERATE_STORAGE_ERROR,
                StdError::InvalidArgument("no minio spec".to_string()).into(),
            )
        })?;
        let desired = desired_tenant(cluster, spec).reason(REASON_GENERATE_STORAGE_ERROR)?;
        self.check_topology(&desired).await?;

        let (tenant, applied) = apply_resource(self.client.as_ref(), desired)
            .await
            .map_err(|e| DependencyFailure::from_apply(Component::Storage, e))?;
        info!("minio tenant {}: {applied:?}", tenant.name_any());

        let namespace = tenant.namespace().unwrap_or_default();
        let owner = owner_reference(&tenant).ok_or_else(|| {
            DependencyFailure::new(
                REASON_CREATE_STORAGE_SECRET_ERROR,
                StdError::MetadataMissing(format!("uid missing on Tenant {}", tenant.name_any()))
                    .into(),
            )
        })?;
        let secret = ensure_secret(
            self.client.as_ref(),
            owned_secret(
                &credentials_name(&cluster.name_any()),
                &namespace,
                owner,
                cluster_labels(cluster),
                credentials_data(&random_password(16), &random_password(32)),
            ),
        )
        .await
        .reason(REASON_CREATE_STORAGE_SECRET_ERROR)?;

        let expose = spec.redirect.expose.as_ref().filter(|_| spec.redirect.enable);
        if let Some(expose) = expose {
            let ingress =
                desired_ingress(cluster, expose).reason(REASON_APPLY_STORAGE_INGRESS_ERROR)?;
            apply_ingress(self.client.as_ref(), ingress)
                .await
                .reason(REASON_APPLY_STORAGE_INGRESS_ERROR)?;
        }

        let state = tenant
            .status
            .as_ref()
            .map(|s| s.current_state.as_str())
            .unwrap_or_default();
        if state != INITIALIZED {
            return Ok(CRStatus::unknown(
                REASON_STORAGE_NOT_READY,
                format!("minio tenant {} is {:?}", tenant.name_any(), state),
            ));
        }

        let endpoint = match expose {
            Some(expose) => {
                let scheme = if expose.tls.is_some() { "https" } else { "http" };
                format!("{scheme}://{}", expose.ingress.host)
            }
            None => format!(
                "http://{}.{namespace}.svc:{MINIO_PORT}",
                headless_service_name(&tenant.name_any())
            ),
        };
        let access_key =
            secret_value(&secret, ACCESS_KEY).reason(REASON_CREATE_STORAGE_SECRET_ERROR)?;

        let properties = Properties::new().with(
            STORAGE_PROPERTY,
            PropertyValue::Storage(StorageConnection {
                s3: HarborStorageS3Spec {
                    access_key,
                    secret_key_ref: secret.name_any(),
                    region: REGION.to_string(),
                    secure: Some(endpoint.starts_with("https")),
                    region_endpoint: Some(endpoint),
                    bucket: BUCKET.to_string(),
                    v4_auth: Some(true),
                    skip_verify: Some(false),
                    certificate_ref: expose
                        .and_then(|e| e.tls.as_ref())
                        .map(|t| t.certificate_ref.clone()),
                    ..Default::default()
                },
                disable_redirect: expose.is_none(),
            }),
        );
        Ok(
            CRStatus::ready(REASON_STORAGE_READY, "minio tenant is initialized", properties)
                .with_checksum(
                    dependency_checksum_key(&namespace, "Secret", &secret.name_any()),
                    secret.resource_version().unwrap_or_default(),
                ),
        )
    }

    async fn delete(&self, cluster: &HarborCluster) -> DependencyResult<CRStatus> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = tenant_name(&cluster.name_any());
        self.client
            .delete_object(&Tenant::api_resource(), &namespace, &name)
            .await
            .reason(REASON_DELETE_STORAGE_ERROR)?;
        Ok(CRStatus::unknown(REASON_STORAGE_DELETED, format!("minio tenant {name} deleted")))
    }

    async fn upgrade(&self, _cluster: &HarborCluster) -> DependencyResult<CRStatus> {
        // TODO: roll the tenant image once pool expansion is supported
        Err(DependencyFailure::new(
            "UpgradeStorageError",
            StdError::Unsupported("upgrading the in-cluster storage".to_string()).into(),
        ))
    }
}
