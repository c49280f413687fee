use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ResourceRequirements, Toleration};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod harbor;
pub mod harborcluster;

pub const API_GROUP: &str = "goharbor.io";
pub const API_VERSION: &str = "goharbor.io/v1beta1";

pub fn conditions_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "type": "integer", "format": "int64", "default": 0 },
                "reason": { "type": "string" },
                "status": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": [
                "lastTransitionTime",
                "message",
                "reason",
                "status",
                "type"
            ],
        },
    }))
    .expect("static conditions schema is valid")
}

/// Deployment settings shared by every Harbor microservice.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub replicas: Option<i32>,
    pub image: Option<String>,
    pub image_pull_policy: Option<String>,
    pub resources: Option<ResourceRequirements>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub tolerations: Option<Vec<Toleration>>,
    pub service_account_name: Option<String>,
}

/// Extra CA bundles mounted into a component that talks TLS to other services.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInjection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificate_refs: Vec<String>,
}

impl CertificateInjection {
    /// Appends `secret_name` unless it is already referenced.
    /// Returns whether the list changed.
    pub fn inject(&mut self, secret_name: &str) -> bool {
        if self.certificate_refs.iter().any(|r| r == secret_name) {
            return false;
        }
        self.certificate_refs.push(secret_name.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_certificate_once() {
        let mut injection = CertificateInjection::default();
        assert!(injection.inject("minio-ca"));
        assert!(!injection.inject("minio-ca"));
        assert!(injection.inject("other-ca"));
        assert_eq!(injection.certificate_refs, vec!["minio-ca", "other-ca"]);
    }

    #[test]
    fn conditions_schema_is_a_list_map() {
        let mut generator = schemars::gen::SchemaGenerator::default();
        let schema = serde_json::to_value(conditions_schema(&mut generator)).unwrap();
        assert_eq!(schema["x-kubernetes-list-type"], "map");
        assert_eq!(schema["x-kubernetes-list-map-keys"][0], "type");
    }
}
