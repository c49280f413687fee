use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::api::v1beta1::harbor::{
    Harbor, HarborSpec, HarborStorageImageChartStorageSpec, StorageRedirectSpec,
    HARBOR_FAILED_CONDITION, HARBOR_IN_PROGRESS_CONDITION,
};
use crate::api::v1beta1::harborcluster::{ConditionStatus, HarborCluster, HARBOR_CLUSTER_LABEL};
use crate::controllers::dependency::{
    Component, ComponentCondition, DependencyResult, FailureReason,
};
use crate::util::client::KubeClient;
use crate::util::cluster_status::DependencyOutputs;
use crate::util::dynamic::Applied;
use crate::util::errors::{Result, StdError};
use crate::util::hash::{applied_hash, hash_of, merge_live_annotations, set_applied_hash};
use crate::util::status::{find_status_condition, is_status_condition_true};

pub const REASON_EMPTY_HARBOR_STATUS: &str = "EmptyHarborCRStatus";
pub const REASON_HARBOR_FAILED: &str = "HarborFailed";
pub const REASON_HARBOR_IN_PROGRESS: &str = "HarborInProgress";
pub const REASON_HARBOR_READY: &str = "HarborReady";
pub const REASON_GENERATE_HARBOR_ERROR: &str = "GenerateHarborError";
pub const REASON_GET_HARBOR_ERROR: &str = "GetHarborError";
pub const REASON_CREATE_HARBOR_ERROR: &str = "CreateHarborError";
pub const REASON_UPDATE_HARBOR_ERROR: &str = "UpdateHarborError";

pub fn harbor_name(cluster_name: &str) -> String {
    format!("{cluster_name}-harbor")
}

/// The Harbor spec the cluster asks for, with in-cluster dependency
/// coordinates grafted over whatever the user wrote.
pub fn harbor_spec(cluster: &HarborCluster, outputs: &DependencyOutputs) -> HarborSpec {
    let mut spec = HarborSpec {
        embedded: cluster.spec.harbor.clone(),
        redis: cluster.spec.cache.as_ref().and_then(|c| c.spec.redis.clone()),
        database: cluster
            .spec
            .database
            .as_ref()
            .and_then(|d| d.spec.postgres_sql.clone()),
        image_chart_storage: cluster
            .spec
            .storage
            .as_ref()
            .filter(|s| s.spec.s3.is_some())
            .map(|s| HarborStorageImageChartStorageSpec {
                s3: s.spec.s3.clone(),
                redirect: s.spec.redirect.clone(),
            }),
    };

    if let Some(redis) = outputs.properties(Component::Cache).and_then(|p| p.redis_spec()) {
        spec.redis = Some(redis.clone());
    }
    if let Some(database) = outputs
        .properties(Component::Database)
        .and_then(|p| p.database_spec())
    {
        spec.database = Some(database.clone());
    }
    if let Some(storage) = outputs.properties(Component::Storage).and_then(|p| p.storage_spec()) {
        spec.image_chart_storage = Some(HarborStorageImageChartStorageSpec {
            s3: Some(storage.s3.clone()),
            redirect: Some(StorageRedirectSpec {
                enable: !storage.disable_redirect,
            }),
        });
    }

    let certificate_ref = spec
        .image_chart_storage
        .as_ref()
        .and_then(|s| s.s3.as_ref())
        .and_then(|s3| s3.certificate_ref.clone());
    if let Some(certificate_ref) = certificate_ref {
        for client in spec.embedded.components.storage_clients_mut() {
            client.inject(&certificate_ref);
        }
    }

    spec
}

/// The child Harbor for `cluster`, labelled, owned and annotated with the
/// checksums of its upstream secrets and the hash of its content.
pub fn desired_harbor(cluster: &HarborCluster, outputs: &DependencyOutputs) -> Result<Harbor> {
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
    let spec = harbor_spec(cluster, outputs);

    let mut metadata = ObjectMeta {
        name: Some(harbor_name(&cluster.name_any())),
        namespace: Some(namespace),
        labels: Some(BTreeMap::from([(
            HARBOR_CLUSTER_LABEL.to_string(),
            cluster.name_any(),
        )])),
        annotations: Some(outputs.checksums.clone()),
        owner_references: Some(vec![owner]),
        ..Default::default()
    };
    let hash = hash_of(&(&spec, &outputs.checksums))?;
    set_applied_hash(&mut metadata, hash);

    Ok(Harbor {
        metadata,
        spec,
        status: None,
    })
}

/// Creates the Harbor or rewrites it when its applied hash differs.
///
/// Failures carry the condition reason for `ServiceReady`.
pub async fn apply_harbor(
    client: &dyn KubeClient,
    mut desired: Harbor,
) -> DependencyResult<(Harbor, Applied)> {
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();

    let live = client
        .get_harbor(&namespace, &name)
        .await
        .reason(REASON_GET_HARBOR_ERROR)?;
    let Some(live) = live else {
        info!("creating Harbor {namespace}/{name}");
        let created = client
            .create_harbor(&desired)
            .await
            .reason(REASON_CREATE_HARBOR_ERROR)?;
        return Ok((created, Applied::Created));
    };

    if applied_hash(&live.metadata).is_some()
        && applied_hash(&live.metadata) == applied_hash(&desired.metadata)
    {
        debug!("Harbor {namespace}/{name} is up to date");
        return Ok((live, Applied::Unchanged));
    }

    info!("updating Harbor {namespace}/{name}");
    merge_live_annotations(&mut desired.metadata, &live.metadata);
    desired.metadata.resource_version = live.metadata.resource_version.clone();
    desired.metadata.generation = live.metadata.generation;
    desired.metadata.uid = live.metadata.uid.clone();
    let updated = client
        .replace_harbor(&desired)
        .await
        .reason(REASON_UPDATE_HARBOR_ERROR)?;
    Ok((updated, Applied::Updated))
}

/// Maps the Harbor's own conditions onto `ServiceReady`.
pub fn service_condition(harbor: &Harbor) -> ComponentCondition {
    let conditions = harbor.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default();

    for (condition_type, fallback_reason) in [
        (HARBOR_FAILED_CONDITION, REASON_HARBOR_FAILED),
        (HARBOR_IN_PROGRESS_CONDITION, REASON_HARBOR_IN_PROGRESS),
    ] {
        if !is_status_condition_true(conditions, condition_type) {
            continue;
        }
        if let Some(c) = find_status_condition(conditions, condition_type) {
            // condition reasons may not be empty
            let reason = if c.reason.is_empty() { fallback_reason } else { c.reason.as_str() };
            return ComponentCondition::new(ConditionStatus::False, reason, c.message.clone());
        }
    }
    if find_status_condition(conditions, HARBOR_FAILED_CONDITION).is_none()
        && find_status_condition(conditions, HARBOR_IN_PROGRESS_CONDITION).is_none()
    {
        return ComponentCondition::new(
            ConditionStatus::Unknown,
            REASON_EMPTY_HARBOR_STATUS,
            "the Harbor has not reported any status yet",
        );
    }
    ComponentCondition::new(ConditionStatus::True, REASON_HARBOR_READY, "Harbor is ready")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1beta1::harbor::{
        ExternalRedisSpec, HarborStatus, HarborStorageS3Spec, TrivyComponentSpec,
    };
    use crate::api::v1beta1::harborcluster::{Cache, CacheSpec, Storage, StorageSpec};
    use crate::util::hash::LAST_APPLIED_HASH_ANNOTATION;
    use crate::util::properties::{
        Properties, PropertyValue, StorageConnection, CACHE_PROPERTY, STORAGE_PROPERTY,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

    fn cluster() -> HarborCluster {
        let mut cluster = HarborCluster::new("h", Default::default());
        cluster.metadata.namespace = Some("ns".to_string());
        cluster.metadata.uid = Some("uid-h".to_string());
        cluster.spec.harbor.version = "2.4.0".to_string();
        cluster.spec.cache = Some(Cache {
            spec: CacheSpec {
                redis: Some(ExternalRedisSpec {
                    host: "user.example".to_string(),
                    port: 6379,
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        });
        cluster
    }

    fn in_cluster_outputs() -> DependencyOutputs {
        let mut outputs = DependencyOutputs::default();
        outputs.properties.insert(
            Component::Cache,
            Properties::new().with(
                CACHE_PROPERTY,
                PropertyValue::Redis(ExternalRedisSpec {
                    host: "rfs-h-redis.ns.svc".to_string(),
                    port: 26379,
                    sentinel_master_set: Some("mymaster".to_string()),
                    password_ref: Some("h-redis".to_string()),
                }),
            ),
        );
        outputs.properties.insert(
            Component::Storage,
            Properties::new().with(
                STORAGE_PROPERTY,
                PropertyValue::Storage(StorageConnection {
                    s3: HarborStorageS3Spec {
                        bucket: "harbor".to_string(),
                        certificate_ref: Some("minio-ca".to_string()),
                        ..Default::default()
                    },
                    disable_redirect: true,
                }),
            ),
        );
        outputs
            .checksums
            .insert("ns.secret.checksum.goharbor.io/h-redis".to_string(), "12".to_string());
        outputs
    }

    fn condition(type_: &str, status: &str) -> Condition {
        Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: String::new(),
            message: "msg".to_string(),
            last_transition_time: Time(chrono::Utc::now()),
            observed_generation: None,
        }
    }

    fn harbor_with(conditions: Vec<Condition>) -> Harbor {
        let mut harbor = Harbor::new("h-harbor", Default::default());
        harbor.status = Some(HarborStatus {
            conditions,
            observed_generation: None,
        });
        harbor
    }

    #[test]
    fn external_values_pass_through() {
        let harbor = desired_harbor(&cluster(), &DependencyOutputs::default()).unwrap();
        assert_eq!(harbor.name_any(), "h-harbor");
        assert_eq!(harbor.labels()[HARBOR_CLUSTER_LABEL], "h");
        assert_eq!(harbor.owner_references()[0].uid, "uid-h");
        assert_eq!(harbor.spec.redis.unwrap().host, "user.example");
        assert!(harbor.spec.image_chart_storage.is_none());
    }

    #[test]
    fn in_cluster_properties_take_precedence() {
        let harbor = desired_harbor(&cluster(), &in_cluster_outputs()).unwrap();
        let redis = harbor.spec.redis.as_ref().unwrap();
        assert_eq!(redis.host, "rfs-h-redis.ns.svc");
        assert_eq!(redis.sentinel_master_set.as_deref(), Some("mymaster"));

        let storage = harbor.spec.image_chart_storage.as_ref().unwrap();
        assert!(!storage.redirect.as_ref().unwrap().enable);
        assert_eq!(storage.s3.as_ref().unwrap().bucket, "harbor");
        assert_eq!(harbor.annotations()["ns.secret.checksum.goharbor.io/h-redis"], "12");
    }

    #[test]
    fn storage_certificate_is_injected_once() {
        let mut cluster = cluster();
        cluster.spec.harbor.components.trivy = Some(TrivyComponentSpec::default());
        cluster.spec.harbor.components.core.certificate_injection.certificate_refs =
            vec!["minio-ca".to_string()];

        let spec = harbor_spec(&cluster, &in_cluster_outputs());
        let components = spec.embedded.components;
        assert_eq!(components.core.certificate_injection.certificate_refs, vec!["minio-ca"]);
        assert_eq!(components.jobservice.certificate_injection.certificate_refs, vec!["minio-ca"]);
        assert_eq!(
            components.trivy.unwrap().certificate_injection.certificate_refs,
            vec!["minio-ca"]
        );
        assert!(components.registry.certificate_injection.certificate_refs.is_empty());
    }

    #[test]
    fn external_storage_keeps_user_redirect() {
        let mut cluster = cluster();
        cluster.spec.storage = Some(Storage {
            spec: StorageSpec {
                s3: Some(HarborStorageS3Spec {
                    bucket: "user-bucket".to_string(),
                    ..Default::default()
                }),
                redirect: Some(StorageRedirectSpec { enable: false }),
                ..Default::default()
            },
            ..Default::default()
        });
        let storage = harbor_spec(&cluster, &DependencyOutputs::default())
            .image_chart_storage
            .unwrap();
        assert_eq!(storage.s3.unwrap().bucket, "user-bucket");
        assert!(!storage.redirect.unwrap().enable);
    }

    #[test]
    fn hash_follows_content() {
        let a = desired_harbor(&cluster(), &DependencyOutputs::default()).unwrap();
        let b = desired_harbor(&cluster(), &DependencyOutputs::default()).unwrap();
        assert_eq!(
            a.annotations()[LAST_APPLIED_HASH_ANNOTATION],
            b.annotations()[LAST_APPLIED_HASH_ANNOTATION]
        );

        let mut changed = cluster();
        changed.spec.harbor.version = "2.5.0".to_string();
        let c = desired_harbor(&changed, &DependencyOutputs::default()).unwrap();
        assert_ne!(
            a.annotations()[LAST_APPLIED_HASH_ANNOTATION],
            c.annotations()[LAST_APPLIED_HASH_ANNOTATION]
        );
    }

    #[test]
    fn missing_uid_is_an_error() {
        let mut cluster = cluster();
        cluster.metadata.uid = None;
        assert!(desired_harbor(&cluster, &DependencyOutputs::default()).is_err());
    }

    #[test]
    fn service_condition_mapping() {
        let failed = service_condition(&harbor_with(vec![
            condition(HARBOR_FAILED_CONDITION, "True"),
            condition(HARBOR_IN_PROGRESS_CONDITION, "True"),
        ]));
        assert_eq!(failed.status, ConditionStatus::False);
        assert_eq!(failed.reason, REASON_HARBOR_FAILED);

        let progressing =
            service_condition(&harbor_with(vec![condition(HARBOR_IN_PROGRESS_CONDITION, "True")]));
        assert_eq!(progressing.status, ConditionStatus::False);
        assert_eq!(progressing.reason, REASON_HARBOR_IN_PROGRESS);

        let empty = service_condition(&harbor_with(Vec::new()));
        assert_eq!(empty.status, ConditionStatus::Unknown);
        assert_eq!(empty.reason, REASON_EMPTY_HARBOR_STATUS);
        assert_eq!(
            service_condition(&Harbor::new("h", Default::default())).status,
            ConditionStatus::Unknown
        );

        let ready = service_condition(&harbor_with(vec![
            condition(HARBOR_FAILED_CONDITION, "False"),
            condition(HARBOR_IN_PROGRESS_CONDITION, "False"),
        ]));
        assert_eq!(ready.status, ConditionStatus::True);
    }

    #[test]
    fn service_condition_carries_the_harbor_reason() {
        let mut failed = condition(HARBOR_FAILED_CONDITION, "True");
        failed.reason = "CoreDeploymentFailed".to_string();
        failed.message = "core crashloop".to_string();
        let mut progressing = condition(HARBOR_IN_PROGRESS_CONDITION, "True");
        progressing.reason = "RegistryRollingOut".to_string();

        let c = service_condition(&harbor_with(vec![failed, progressing.clone()]));
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, "CoreDeploymentFailed");
        assert_eq!(c.message, "core crashloop");

        let c = service_condition(&harbor_with(vec![progressing]));
        assert_eq!(c.reason, "RegistryRollingOut");
        assert_eq!(c.message, "msg");
    }
}
