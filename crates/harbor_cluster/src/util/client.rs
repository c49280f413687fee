use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

#[cfg(test)]
use mockall::automock;

use crate::api::v1beta1::harbor::Harbor;
use crate::api::v1beta1::harborcluster::HarborCluster;
use crate::util::errors::{json_error, kube_error, Result, StdError};

/// Every API call the reconcilers make, so they can run against a fake.
///
/// Reads return `None` for objects that do not exist; writes pass the
/// object's resourceVersion through so stale writes fail with a conflict.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn get_harbor_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HarborCluster>>;

    /// Replace the status subresource of a HarborCluster
    async fn replace_harbor_cluster_status(&self, cluster: &HarborCluster) -> Result<HarborCluster>;

    async fn get_harbor(&self, namespace: &str, name: &str) -> Result<Option<Harbor>>;

    async fn create_harbor(&self, harbor: &Harbor) -> Result<Harbor>;

    async fn replace_harbor(&self, harbor: &Harbor) -> Result<Harbor>;

    async fn get_object(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    async fn create_object(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    async fn replace_object(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Deleting an object that is already gone succeeds.
    async fn delete_object(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret>;

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret>;

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>>;

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress>;

    async fn replace_ingress(&self, ingress: &Ingress) -> Result<Ingress>;

    /// Publish a Kubernetes event regarding the HarborCluster
    async fn publish_event(
        &self,
        cluster: &HarborCluster,
        type_: EventType,
        reason: &str,
        note: String,
    ) -> Result<()>;
}

pub struct KubeClientImpl {
    client: Client,
    recorder: Recorder,
}

impl KubeClientImpl {
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
        }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

pub(crate) fn namespace_of<K: Resource>(object: &K) -> Result<String> {
    object.meta().namespace.clone().ok_or_else(|| {
        let name = object.meta().name.as_deref().unwrap_or("<unnamed>");
        StdError::MetadataMissing(format!("namespace missing on {name}")).into()
    })
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.get_opt(name).await.map_err(kube_error)
}

async fn create<K>(api: &Api<K>, object: &K) -> Result<K>
where
    K: Clone + Serialize + DeserializeOwned + Debug,
{
    api.create(&PostParams::default(), object).await.map_err(kube_error)
}

async fn replace<K>(api: &Api<K>, object: &K) -> Result<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    api.replace(&object.name_any(), &PostParams::default(), object)
        .await
        .map_err(kube_error)
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_harbor_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HarborCluster>> {
        get_opt(&self.namespaced::<HarborCluster>(namespace), name).await
    }

    async fn replace_harbor_cluster_status(
        &self,
        cluster: &HarborCluster,
    ) -> Result<HarborCluster> {
        let api = self.namespaced::<HarborCluster>(&namespace_of(cluster)?);
        let data = serde_json::to_vec(cluster).map_err(json_error)?;
        api.replace_status(&cluster.name_any(), &PostParams::default(), data)
            .await
            .map_err(kube_error)
    }

    async fn get_harbor(&self, namespace: &str, name: &str) -> Result<Option<Harbor>> {
        get_opt(&self.namespaced::<Harbor>(namespace), name).await
    }

    async fn create_harbor(&self, harbor: &Harbor) -> Result<Harbor> {
        create(&self.namespaced::<Harbor>(&namespace_of(harbor)?), harbor).await
    }

    async fn replace_harbor(&self, harbor: &Harbor) -> Result<Harbor> {
        replace(&self.namespaced::<Harbor>(&namespace_of(harbor)?), harbor).await
    }

    async fn get_object(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = Api::<DynamicObject>::namespaced_with(self.client.clone(), namespace, resource);
        get_opt(&api, name).await
    }

    async fn create_object(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let namespace = namespace_of(object)?;
        let api = Api::<DynamicObject>::namespaced_with(self.client.clone(), &namespace, resource);
        create(&api, object).await
    }

    async fn replace_object(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let namespace = namespace_of(object)?;
        let api = Api::<DynamicObject>::namespaced_with(self.client.clone(), &namespace, resource);
        replace(&api, object).await
    }

    async fn delete_object(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        let api = Api::<DynamicObject>::namespaced_with(self.client.clone(), namespace, resource);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(kube_error(e)),
        }
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        get_opt(&self.namespaced::<Secret>(namespace), name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        create(&self.namespaced::<Secret>(&namespace_of(secret)?), secret).await
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret> {
        replace(&self.namespaced::<Secret>(&namespace_of(secret)?), secret).await
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        get_opt(&self.namespaced::<StatefulSet>(namespace), name).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        get_opt(&self.namespaced::<Deployment>(namespace), name).await
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>> {
        get_opt(&self.namespaced::<Ingress>(namespace), name).await
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        create(&self.namespaced::<Ingress>(&namespace_of(ingress)?), ingress).await
    }

    async fn replace_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        replace(&self.namespaced::<Ingress>(&namespace_of(ingress)?), ingress).await
    }

    async fn publish_event(
        &self,
        cluster: &HarborCluster,
        type_: EventType,
        reason: &str,
        note: String,
    ) -> Result<()> {
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(note),
                    action: "Reconciling".into(),
                    secondary: None,
                },
                &cluster.object_ref(&()),
            )
            .await
            .map_err(kube_error)
    }
}
