//! Typed access to third-party custom resources through `DynamicObject`.
//!
//! The RedisFailover, postgresql and Tenant CRDs are owned by other operators,
//! so their Rust types only model the fields this operator writes or reads.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::core::{ApiResource, DynamicObject, TypeMeta};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::util::client::KubeClient;
use crate::util::errors::{json_error, Error, Result, StdError};
use crate::util::hash::{applied_hash, hash_of, merge_live_annotations, set_applied_hash};

/// A custom resource served by another operator.
///
/// Implementors get their `kube::Resource` impl from [`impl_resource!`].
pub trait DependencyResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Serialize
    + DeserializeOwned
    + Clone
    + Send
    + Sync
    + 'static
{
    /// Full API version, e.g. `acid.zalan.do/v1`
    const API_VERSION: &'static str;
    const KIND: &'static str;
    const PLURAL: &'static str;

    fn api_resource() -> ApiResource {
        ApiResource::erase::<Self>(&())
    }

    /// Whether the fields this operator manages agree, ignoring status and
    /// anything the server fills in.
    fn spec_equal(&self, other: &Self) -> bool;
}

/// Splits `group/version`; core resources have an empty group.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// Implements `kube::Resource` for a namespaced [`DependencyResource`] with a
/// `metadata` field, so `ResourceExt` works on it.
macro_rules! impl_resource {
    ($ty:ty) => {
        impl kube::Resource for $ty {
            type DynamicType = ();
            type Scope = k8s_openapi::NamespaceResourceScope;

            fn kind(_: &()) -> std::borrow::Cow<'_, str> {
                <$ty as $crate::util::dynamic::DependencyResource>::KIND.into()
            }

            fn group(_: &()) -> std::borrow::Cow<'_, str> {
                $crate::util::dynamic::split_api_version(
                    <$ty as $crate::util::dynamic::DependencyResource>::API_VERSION,
                )
                .0
                .into()
            }

            fn version(_: &()) -> std::borrow::Cow<'_, str> {
                $crate::util::dynamic::split_api_version(
                    <$ty as $crate::util::dynamic::DependencyResource>::API_VERSION,
                )
                .1
                .into()
            }

            fn api_version(_: &()) -> std::borrow::Cow<'_, str> {
                <$ty as $crate::util::dynamic::DependencyResource>::API_VERSION.into()
            }

            fn plural(_: &()) -> std::borrow::Cow<'_, str> {
                <$ty as $crate::util::dynamic::DependencyResource>::PLURAL.into()
            }

            fn meta(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                &self.metadata
            }

            fn meta_mut(
                &mut self,
            ) -> &mut k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}
pub(crate) use impl_resource;

/// Controller owner reference pointing at `resource`, once it has a uid.
pub fn owner_reference<T: DependencyResource>(resource: &T) -> Option<OwnerReference> {
    let metadata = resource.meta();
    Some(OwnerReference {
        api_version: T::API_VERSION.to_string(),
        kind: T::KIND.to_string(),
        name: metadata.name.clone()?,
        uid: metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

pub fn to_dynamic<T: DependencyResource>(resource: &T) -> Result<DynamicObject> {
    let mut value = serde_json::to_value(resource).map_err(json_error)?;
    let Some(fields) = value.as_object_mut() else {
        let message = format!("{} did not serialize to an object", T::KIND);
        return Err(StdError::InvalidArgument(message).into());
    };
    fields.remove("apiVersion");
    fields.remove("kind");
    fields.remove("metadata");
    Ok(DynamicObject {
        types: Some(TypeMeta {
            api_version: T::API_VERSION.to_string(),
            kind: T::KIND.to_string(),
        }),
        metadata: resource.meta().clone(),
        data: value,
    })
}

pub fn from_dynamic<T: DependencyResource>(object: DynamicObject) -> Result<T> {
    let value = serde_json::to_value(object).map_err(json_error)?;
    serde_json::from_value(value).map_err(json_error)
}

/// Which API call failed while applying a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    Get,
    Create,
    Update,
    /// Building or decoding the object, before or after the API call.
    Convert,
}

#[derive(Debug)]
pub struct ApplyError {
    pub stage: ApplyStage,
    pub error: Error,
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} failed: {}", self.stage, self.error)
    }
}

trait AtStage<T> {
    fn at(self, stage: ApplyStage) -> std::result::Result<T, ApplyError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: ApplyStage) -> std::result::Result<T, ApplyError> {
        self.map_err(|error| ApplyError { stage, error })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

/// Hash of everything but metadata and status.
fn managed_hash<T: DependencyResource>(resource: &T) -> Result<String> {
    let mut value = serde_json::to_value(resource).map_err(json_error)?;
    if let Some(fields) = value.as_object_mut() {
        fields.remove("metadata");
        fields.remove("status");
    }
    hash_of(&value)
}

/// Creates `desired` if missing, otherwise rewrites the live object when its
/// applied hash or managed fields drifted. Returns the object as stored.
pub async fn apply_resource<T: DependencyResource>(
    client: &dyn KubeClient,
    mut desired: T,
) -> std::result::Result<(T, Applied), ApplyError> {
    let resource = T::api_resource();
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or_else(|| {
            Error::from(StdError::MetadataMissing(format!("{} without a name", T::KIND)))
        })
        .at(ApplyStage::Convert)?;
    let namespace = desired
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| {
            let message = format!("{} {name} without a namespace", T::KIND);
            Error::from(StdError::MetadataMissing(message))
        })
        .at(ApplyStage::Convert)?;

    let hash = managed_hash(&desired).at(ApplyStage::Convert)?;
    set_applied_hash(desired.meta_mut(), hash.clone());

    let Some(live) = client
        .get_object(&resource, &namespace, &name)
        .await
        .at(ApplyStage::Get)?
    else {
        debug!("creating {} {namespace}/{name}", T::KIND);
        let object = to_dynamic(&desired).at(ApplyStage::Convert)?;
        let created = client
            .create_object(&resource, &object)
            .await
            .at(ApplyStage::Create)?;
        return Ok((from_dynamic(created).at(ApplyStage::Convert)?, Applied::Created));
    };

    let live: T = from_dynamic(live).at(ApplyStage::Convert)?;
    if applied_hash(live.meta()) == Some(hash.as_str()) && live.spec_equal(&desired) {
        return Ok((live, Applied::Unchanged));
    }

    debug!("updating {} {namespace}/{name}", T::KIND);
    merge_live_annotations(desired.meta_mut(), live.meta());
    let metadata = desired.meta_mut();
    metadata.resource_version = live.meta().resource_version.clone();
    metadata.uid = live.meta().uid.clone();
    let object = to_dynamic(&desired).at(ApplyStage::Convert)?;
    let updated = client
        .replace_object(&resource, &object)
        .await
        .at(ApplyStage::Update)?;
    Ok((from_dynamic(updated).at(ApplyStage::Convert)?, Applied::Updated))
}
