use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::api::v1beta1::harbor::{HarborDatabaseSpec, PostgresHostSpec, PostgresSslMode};
use crate::api::v1beta1::harborcluster::{HarborCluster, ZlandoPostgresSpec, HARBOR_CLUSTER_LABEL};
use crate::controllers::dependency::{
    CRStatus, Component, DependencyController, DependencyFailure, DependencyResult, FailureReason,
};
use crate::util::client::KubeClient;
use crate::util::dynamic::{apply_resource, impl_resource, owner_reference, DependencyResource};
use crate::util::errors::{Error, StdError};
use crate::util::hash::dependency_checksum_key;
use crate::util::properties::{Properties, PropertyValue, DATABASE_PROPERTY};
use crate::util::secrets::{owned_secret, secret_value, sync_secret};

pub const DATABASE_USER: &str = "harbor";
pub const CORE_DATABASE: &str = "core";
pub const NOTARY_SERVER_DATABASE: &str = "notaryserver";
pub const NOTARY_SIGNER_DATABASE: &str = "notarysigner";
pub const POSTGRES_PORT: i32 = 5432;
/// Key Harbor reads the password from.
pub const POSTGRESQL_PASSWORD_KEY: &str = "postgresql-password";
const RUNNING: &str = "Running";

const REASON_DATABASE_READY: &str = "DatabaseReady";
const REASON_DATABASE_NOT_READY: &str = "DatabaseNotReady";
const REASON_CREDENTIALS_NOT_READY: &str = "DatabaseCredentialsNotReady";
const REASON_DATABASE_DELETED: &str = "DatabaseDeleted";
const REASON_GENERATE_DATABASE_ERROR: &str = "GenerateDatabaseCrError";
const REASON_GET_DATABASE_SECRET_ERROR: &str = "GetDatabaseSecretError";
const REASON_CREATE_DATABASE_SECRET_ERROR: &str = "CreateDatabaseSecretError";
const REASON_DELETE_DATABASE_ERROR: &str = "DeleteDatabaseError";

/// `acid.zalan.do/v1` postgresql, reduced to what we set and read.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Postgresql {
    pub metadata: ObjectMeta,
    pub spec: PostgresqlSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PostgresqlStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlSpec {
    pub team_id: String,
    pub number_of_instances: i32,
    pub volume: PostgresVolume,
    pub users: BTreeMap<String, Vec<String>>,
    pub databases: BTreeMap<String, String>,
    pub postgresql: PostgresVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<PostgresResources>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresVolume {
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PostgresVersion {
    pub version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PostgresResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<PostgresResourceDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<PostgresResourceDescription>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PostgresResourceDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PostgresqlStatus {
    #[serde(rename = "PostgresClusterStatus", default)]
    pub postgres_cluster_status: String,
}

impl DependencyResource for Postgresql {
    const API_VERSION: &'static str = "acid.zalan.do/v1";
    const KIND: &'static str = "postgresql";
    const PLURAL: &'static str = "postgresqls";

    fn spec_equal(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

impl_resource!(Postgresql);

impl From<&ResourceRequirements> for PostgresResources {
    fn from(resources: &ResourceRequirements) -> Self {
        let describe = |list: &Option<BTreeMap<String, Quantity>>| {
            list.as_ref().map(|list| PostgresResourceDescription {
                cpu: list.get("cpu").map(|q| q.0.clone()),
                memory: list.get("memory").map(|q| q.0.clone()),
            })
        };
        Self {
            requests: describe(&resources.requests),
            limits: describe(&resources.limits),
        }
    }
}

/// The operator requires postgresql names to start with the team id.
pub fn postgresql_name(cluster_name: &str) -> String {
    format!("{cluster_name}-database")
}

/// Secret the postgres operator generates for `user`.
pub fn operator_credentials_name(user: &str, postgresql_name: &str) -> String {
    format!("{user}.{postgresql_name}.credentials.postgresql.acid.zalan.do")
}

/// Secret Harbor reads the database password from.
pub fn harbor_credentials_name(cluster_name: &str) -> String {
    format!("{cluster_name}-database")
}

pub fn desired_postgresql(
    cluster: &HarborCluster,
    spec: &ZlandoPostgresSpec,
) -> Result<Postgresql, Error> {
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

    let mut databases = BTreeMap::from([(CORE_DATABASE.to_string(), DATABASE_USER.to_string())]);
    if cluster.spec.harbor.components.notary.is_some() {
        databases.insert(NOTARY_SERVER_DATABASE.to_string(), DATABASE_USER.to_string());
        databases.insert(NOTARY_SIGNER_DATABASE.to_string(), DATABASE_USER.to_string());
    }

    Ok(Postgresql {
        metadata: ObjectMeta {
            name: Some(postgresql_name(&cluster.name_any())),
            namespace: Some(namespace),
            labels: Some(BTreeMap::from([(HARBOR_CLUSTER_LABEL.to_string(), cluster.name_any())])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: PostgresqlSpec {
            team_id: cluster.name_any(),
            number_of_instances: spec.replicas,
            volume: PostgresVolume {
                size: spec.storage.clone(),
                storage_class: spec.storage_class_name.clone(),
            },
            users: BTreeMap::from([(
                DATABASE_USER.to_string(),
                vec!["superuser".to_string(), "createdb".to_string()],
            )]),
            databases,
            postgresql: PostgresVersion {
                version: spec.version.clone(),
            },
            resources: spec.resources.as_ref().map(PostgresResources::from),
        },
        status: None,
    })
}

/// Provisions the database as a Zalando postgres cluster.
pub struct PostgresController {
    client: Arc<dyn KubeClient>,
}

impl PostgresController {
    pub fn new(client: Arc<dyn KubeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DependencyController for PostgresController {
    #[instrument(skip(self, cluster), fields(cluster = %cluster.name_any()))]
    async fn apply(&self, cluster: &HarborCluster) -> DependencyResult<CRStatus> {
        let spec = cluster.spec.in_cluster_database().ok_or_else(|| {
            DependencyFailure::new(
                REASON_GENERATE_DATABASE_ERROR,
                StdError::InvalidArgument("no postgres spec".to_string()).into(),
            )
        })?;
        let desired = desired_postgresql(cluster, spec).reason(REASON_GENERATE_DATABASE_ERROR)?;

        let (postgresql, applied) = apply_resource(self.client.as_ref(), desired)
            .await
            .map_err(|e| DependencyFailure::from_apply(Component::Database, e))?;
        info!("postgresql {}: {applied:?}", postgresql.name_any());

        let state = postgresql
            .status
            .as_ref()
            .map(|s| s.postgres_cluster_status.as_str())
            .unwrap_or_default();
        if state != RUNNING {
            return Ok(CRStatus::unknown(
                REASON_DATABASE_NOT_READY,
                format!("postgresql {} is {:?}", postgresql.name_any(), state),
            ));
        }

        let namespace = postgresql.namespace().unwrap_or_default();
        let credentials_name = operator_credentials_name(DATABASE_USER, &postgresql.name_any());
        let Some(credentials) = self
            .client
            .get_secret(&namespace, &credentials_name)
            .await
            .reason(REASON_GET_DATABASE_SECRET_ERROR)?
        else {
            debug!("waiting for {credentials_name}");
            return Ok(CRStatus::unknown(
                REASON_CREDENTIALS_NOT_READY,
                format!("secret {credentials_name} does not exist yet"),
            ));
        };
        let password =
            secret_value(&credentials, "password").reason(REASON_GET_DATABASE_SECRET_ERROR)?;

        let owner = owner_reference(&postgresql).ok_or_else(|| {
            DependencyFailure::new(
                REASON_CREATE_DATABASE_SECRET_ERROR,
                StdError::MetadataMissing(format!(
                    "uid missing on postgresql {}",
                    postgresql.name_any()
                ))
                .into(),
            )
        })?;
        let secret = sync_secret(
            self.client.as_ref(),
            owned_secret(
                &harbor_credentials_name(&cluster.name_any()),
                &namespace,
                owner,
                BTreeMap::from([(HARBOR_CLUSTER_LABEL.to_string(), cluster.name_any())]),
                BTreeMap::from([(POSTGRESQL_PASSWORD_KEY.to_string(), password)]),
            ),
        )
        .await
        .reason(REASON_CREATE_DATABASE_SECRET_ERROR)?;

        let properties = Properties::new().with(
            DATABASE_PROPERTY,
            PropertyValue::Database(HarborDatabaseSpec {
                username: DATABASE_USER.to_string(),
                password_ref: secret.metadata.name.clone(),
                hosts: vec![PostgresHostSpec {
                    host: format!("{}.{namespace}.svc", postgresql.name_any()),
                    port: POSTGRES_PORT,
                }],
                ssl_mode: PostgresSslMode::Prefer,
                prefix: None,
            }),
        );
        Ok(
            CRStatus::ready(REASON_DATABASE_READY, "postgresql is running", properties)
                .with_checksum(
                    dependency_checksum_key(&namespace, "Secret", &secret.name_any()),
                    secret.resource_version().unwrap_or_default(),
                ),
        )
    }

    async fn delete(&self, cluster: &HarborCluster) -> DependencyResult<CRStatus> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = postgresql_name(&cluster.name_any());
        self.client
            .delete_object(&Postgresql::api_resource(), &namespace, &name)
            .await
            .reason(REASON_DELETE_DATABASE_ERROR)?;
        Ok(CRStatus::unknown(REASON_DATABASE_DELETED, format!("postgresql {name} deleted")))
    }

    async fn upgrade(&self, _cluster: &HarborCluster) -> DependencyResult<CRStatus> {
        // TODO: support major version upgrades through the operator's clone flow
        Err(DependencyFailure::new(
            "UpgradeDatabaseError",
            StdError::Unsupported("upgrading the in-cluster database".to_string()).into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1beta1::harbor::NotaryComponentSpec;
    use crate::api::v1beta1::harborcluster::{ConditionStatus, Database, DatabaseSpec};
    use crate::testing::{cluster_fixture, FakeClient};
    use serde_json::json;

    fn cluster() -> HarborCluster {
        let mut cluster = cluster_fixture("h", "ns");
        cluster.spec.database = Some(Database {
            spec: DatabaseSpec {
                zlando_postgres_sql: Some(ZlandoPostgresSpec::default()),
                ..Default::default()
            },
            ..Default::default()
        });
        cluster
    }

    #[test]
    fn postgresql_shape() {
        let mut cluster = cluster();
        let postgresql = desired_postgresql(&cluster, &ZlandoPostgresSpec::default()).unwrap();
        assert_eq!(postgresql.name_any(), "h-database");
        assert_eq!(postgresql.spec.team_id, "h");
        assert_eq!(postgresql.spec.number_of_instances, 1);
        assert_eq!(postgresql.spec.databases.len(), 1);
        assert_eq!(postgresql.spec.users["harbor"], vec!["superuser", "createdb"]);

        cluster.spec.harbor.components.notary = Some(NotaryComponentSpec::default());
        let postgresql = desired_postgresql(&cluster, &ZlandoPostgresSpec::default()).unwrap();
        assert_eq!(postgresql.spec.databases.len(), 3);
        assert_eq!(postgresql.spec.databases[NOTARY_SIGNER_DATABASE], "harbor");
    }

    #[test]
    fn status_field_is_pascal_case() {
        let status: PostgresqlStatus =
            serde_json::from_value(json!({"PostgresClusterStatus": "Running"})).unwrap();
        assert_eq!(status.postgres_cluster_status, RUNNING);
    }

    #[tokio::test]
    async fn copies_operator_credentials_once_running() {
        let client = Arc::new(FakeClient::default());
        let controller = PostgresController::new(client.clone());

        let status = controller.apply(&cluster()).await.unwrap();
        assert_eq!(status.condition.reason, REASON_DATABASE_NOT_READY);

        client.set_object_status(
            &Postgresql::api_resource(),
            "ns",
            "h-database",
            json!({"PostgresClusterStatus": "Running"}),
        );
        let status = controller.apply(&cluster()).await.unwrap();
        assert_eq!(status.condition.reason, REASON_CREDENTIALS_NOT_READY);

        client.insert_secret(
            "ns",
            "harbor.h-database.credentials.postgresql.acid.zalan.do",
            &[("username", "harbor"), ("password", "s3cret")],
        );
        let status = controller.apply(&cluster()).await.unwrap();
        assert_eq!(status.condition.status, ConditionStatus::True);

        let database = status.properties.database_spec().unwrap();
        assert_eq!(database.hosts[0].host, "h-database.ns.svc");
        assert_eq!(database.hosts[0].port, 5432);
        assert_eq!(database.password_ref.as_deref(), Some("h-database"));

        let copied = client.secret("ns", "h-database").unwrap();
        assert_eq!(secret_value(&copied, POSTGRESQL_PASSWORD_KEY).unwrap(), "s3cret");
        assert_eq!(copied.owner_references()[0].kind, "postgresql");
    }

    #[tokio::test]
    async fn unowned_cluster_fails_generating_the_cr() {
        let client = Arc::new(FakeClient::default());
        let mut cluster = cluster();
        cluster.metadata.uid = None;

        let failure = PostgresController::new(client.clone()).apply(&cluster).await.unwrap_err();
        assert_eq!(failure.reason, "GenerateDatabaseCrError");
        assert_eq!(client.writes(), 0);
    }
}
