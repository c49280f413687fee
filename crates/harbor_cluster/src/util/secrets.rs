use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::util::client::KubeClient;
use crate::util::errors::{Error, Result, StdError};

/// Random alphanumeric string, used for generated credentials.
pub fn random_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// An Opaque secret owned by `owner`.
pub fn owned_secret(
    name: &str,
    namespace: &str,
    owner: OwnerReference,
    labels: BTreeMap<String, String>,
    data: BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Reads `key` from the secret data as UTF-8.
pub fn secret_value(secret: &Secret, key: &str) -> Result<String> {
    let name = secret.metadata.name.as_deref().unwrap_or_default();
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| {
            Error::from(StdError::MetadataMissing(format!("{key} not found in secret {name}")))
        })?;
    String::from_utf8(bytes.0.clone())
        .map_err(|_| {
            StdError::MetadataMissing(format!("invalid UTF-8 in {key} of secret {name}")).into()
        })
}

/// Returns the existing secret, or creates `desired`.
///
/// Generated credentials are never rotated once stored.
pub async fn ensure_secret(client: &dyn KubeClient, desired: Secret) -> Result<Secret> {
    let namespace = desired.metadata.namespace.as_deref().unwrap_or_default();
    let name = desired.metadata.name.as_deref().unwrap_or_default();
    match client.get_secret(namespace, name).await? {
        Some(existing) => Ok(existing),
        None => client.create_secret(&desired).await,
    }
}

/// Keeps the secret's data equal to `desired`'s, creating it if needed.
pub async fn sync_secret(client: &dyn KubeClient, mut desired: Secret) -> Result<Secret> {
    let namespace = desired.metadata.namespace.clone().unwrap_or_default();
    let name = desired.metadata.name.clone().unwrap_or_default();
    match client.get_secret(&namespace, &name).await? {
        None => client.create_secret(&desired).await,
        Some(existing) if existing.data == desired.data => Ok(existing),
        Some(existing) => {
            desired.metadata.resource_version = existing.metadata.resource_version;
            client.replace_secret(&desired).await
        }
    }
}
