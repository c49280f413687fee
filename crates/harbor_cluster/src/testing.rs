//! In-memory stand-in for the API server used by unit and scenario tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};
use k8s_openapi::ByteString;
use kube::core::{ApiResource, DynamicObject};
use kube::runtime::events::EventType;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::api::v1beta1::harbor::Harbor;
use crate::api::v1beta1::harborcluster::{HarborCluster, HarborClusterSpec};
use crate::util::client::KubeClient;
use crate::util::errors::{api_error, json_error, Result};

const CLUSTER: &str = "HarborCluster";
const HARBOR: &str = "Harbor";
const SECRET: &str = "Secret";
const STATEFUL_SET: &str = "StatefulSet";
const DEPLOYMENT: &str = "Deployment";
const INGRESS: &str = "Ingress";

type Key = (String, String, String);

fn key(kind: &str, namespace: &str, name: &str) -> Key {
    (kind.to_string(), namespace.to_string(), name.to_string())
}

/// A HarborCluster the way the API server would hand it out.
pub fn cluster_fixture(name: &str, namespace: &str) -> HarborCluster {
    let mut cluster = HarborCluster::new(name, HarborClusterSpec::default());
    cluster.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(format!("uid-{name}")),
        generation: Some(1),
        resource_version: Some("1".to_string()),
        ..Default::default()
    };
    cluster
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

#[derive(Default)]
struct Store {
    objects: BTreeMap<Key, Value>,
    calls: Vec<String>,
    failures: Vec<(String, u16)>,
    events: Vec<RecordedEvent>,
    revision: u64,
}

impl Store {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn record(&mut self, method: &str) -> Result<()> {
        self.calls.push(method.to_string());
        match self.failures.iter().position(|(m, _)| m == method) {
            Some(i) => {
                let (_, code) = self.failures.remove(i);
                Err(api_error(code, reason_for(code)))
            }
            None => Ok(()),
        }
    }

    fn bump(&mut self, key: &Key) {
        let revision = self.next_revision();
        if let Some(object) = self.objects.get_mut(key) {
            object["metadata"]["resourceVersion"] = json!(revision);
        }
    }
}

fn reason_for(code: u16) -> &'static str {
    match code {
        404 => "NotFound",
        409 => "Conflict",
        429 => "TooManyRequests",
        _ => "InternalError",
    }
}

fn identity(object: &Value) -> (String, String) {
    let metadata = &object["metadata"];
    (
        metadata["namespace"].as_str().unwrap_or_default().to_string(),
        metadata["name"].as_str().unwrap_or_default().to_string(),
    )
}

/// Everything that is neither metadata nor status.
fn body(object: &Value) -> Value {
    let mut body = object.clone();
    if let Some(map) = body.as_object_mut() {
        map.remove("metadata");
        map.remove("status");
        map.remove("apiVersion");
        map.remove("kind");
    }
    body
}

fn decode<K: DeserializeOwned>(value: Value) -> Result<K> {
    serde_json::from_value(value).map_err(json_error)
}

fn encode<K: Serialize>(object: &K) -> Result<Value> {
    serde_json::to_value(object).map_err(json_error)
}

/// Emulates the parts of the API server the reconcilers rely on:
/// resourceVersion and uid assignment, optimistic concurrency, status
/// subresources and generation bumps on spec changes.
#[derive(Default)]
pub struct FakeClient {
    store: Mutex<Store>,
}

impl FakeClient {
    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap()
    }

    fn get_as<K: DeserializeOwned>(
        &self,
        method: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>> {
        let mut store = self.lock();
        store.record(method)?;
        store
            .objects
            .get(&key(kind, namespace, name))
            .cloned()
            .map(decode)
            .transpose()
    }

    fn create_as<K: Serialize + DeserializeOwned>(
        &self,
        method: &str,
        kind: &str,
        object: &K,
    ) -> Result<K> {
        let mut store = self.lock();
        store.record(method)?;
        let mut value = encode(object)?;
        let (namespace, name) = identity(&value);
        let key = key(kind, &namespace, &name);
        if store.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let revision = store.next_revision();
        let metadata = &mut value["metadata"];
        if metadata["uid"].is_null() {
            metadata["uid"] = json!(format!("uid-{}-{name}", kind.to_lowercase()));
        }
        metadata["resourceVersion"] = json!(revision);
        metadata["generation"] = json!(1);
        store.objects.insert(key, value.clone());
        decode(value)
    }

    fn replace_as<K: Serialize + DeserializeOwned>(
        &self,
        method: &str,
        kind: &str,
        object: &K,
    ) -> Result<K> {
        let mut store = self.lock();
        store.record(method)?;
        let mut value = encode(object)?;
        let (namespace, name) = identity(&value);
        let key = key(kind, &namespace, &name);
        let Some(live) = store.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound"));
        };
        let sent = &value["metadata"]["resourceVersion"];
        if !sent.is_null() && *sent != live["metadata"]["resourceVersion"] {
            return Err(api_error(409, "Conflict"));
        }

        let generation = live["metadata"]["generation"].as_i64().unwrap_or(1);
        let changed = body(&live) != body(&value);
        if let Some(map) = value.as_object_mut() {
            match live.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
        }
        let revision = store.next_revision();
        let metadata = &mut value["metadata"];
        metadata["uid"] = live["metadata"]["uid"].clone();
        metadata["generation"] = json!(if changed { generation + 1 } else { generation });
        metadata["resourceVersion"] = json!(revision);
        store.objects.insert(key, value.clone());
        decode(value)
    }

    fn insert_raw(&self, kind: &str, mut value: Value) -> Value {
        let mut store = self.lock();
        let (namespace, name) = identity(&value);
        let revision = store.next_revision();
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = json!(format!("uid-{}-{name}", kind.to_lowercase()));
        }
        value["metadata"]["resourceVersion"] = json!(revision);
        store.objects.insert(key(kind, &namespace, &name), value.clone());
        value
    }

    fn peek<K: DeserializeOwned>(&self, kind: &str, namespace: &str, name: &str) -> Option<K> {
        let value = self.lock().objects.get(&key(kind, namespace, name)).cloned()?;
        serde_json::from_value(value).ok()
    }

    fn modify(&self, kind: &str, namespace: &str, name: &str, f: impl FnOnce(&mut Value)) {
        let mut store = self.lock();
        let key = key(kind, namespace, name);
        let Some(object) = store.objects.get_mut(&key) else {
            panic!("no {kind} {namespace}/{name}");
        };
        let before = body(object);
        f(object);
        if body(object) != before {
            let generation = object["metadata"]["generation"].as_i64().unwrap_or(1);
            object["metadata"]["generation"] = json!(generation + 1);
        }
        store.bump(&key);
    }

    /// Number of calls made to `method` so far.
    pub fn calls_matching(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|m| *m == method).count()
    }

    /// Writes made so far, reads excluded.
    pub fn writes(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|m| !m.starts_with("get_"))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// The next call to `method` fails with an API error carrying `code`.
    pub fn fail_next(&self, method: &str, code: u16) {
        self.lock().failures.push((method.to_string(), code));
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().events.clone()
    }

    pub fn insert_cluster(&self, cluster: HarborCluster) -> HarborCluster {
        let value = serde_json::to_value(&cluster).unwrap();
        serde_json::from_value(self.insert_raw(CLUSTER, value)).unwrap()
    }

    pub fn cluster(&self, namespace: &str, name: &str) -> Option<HarborCluster> {
        self.peek(CLUSTER, namespace, name)
    }

    /// Applies a user edit to the cluster, bumping its generation on spec changes.
    pub fn mutate_cluster(&self, namespace: &str, name: &str, f: impl FnOnce(&mut HarborCluster)) {
        self.modify(CLUSTER, namespace, name, |value| {
            let mut cluster: HarborCluster = serde_json::from_value(value.clone()).unwrap();
            f(&mut cluster);
            *value = serde_json::to_value(&cluster).unwrap();
        });
    }

    pub fn harbor(&self, namespace: &str, name: &str) -> Option<Harbor> {
        self.peek(HARBOR, namespace, name)
    }

    pub fn set_harbor_conditions(&self, namespace: &str, name: &str, conditions: Vec<Condition>) {
        self.modify(HARBOR, namespace, name, |value| {
            value["status"] = json!({ "conditions": conditions });
        });
    }

    pub fn object(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Option<DynamicObject> {
        self.peek(&resource.kind, namespace, name)
    }

    /// Edits a dynamic object behind the reconciler's back.
    pub fn edit_object(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        f: impl FnOnce(&mut DynamicObject),
    ) {
        self.modify(&resource.kind, namespace, name, |value| {
            let mut object: DynamicObject = serde_json::from_value(value.clone()).unwrap();
            f(&mut object);
            *value = serde_json::to_value(&object).unwrap();
        });
    }

    /// What a third-party operator would report on its CR.
    pub fn set_object_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        status: Value,
    ) {
        self.modify(&resource.kind, namespace, name, |value| {
            value["status"] = status;
        });
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.peek(SECRET, namespace, name)
    }

    pub fn insert_secret(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        self.insert_raw(SECRET, serde_json::to_value(secret).unwrap());
    }

    pub fn set_stateful_set_ready(&self, namespace: &str, name: &str, ready: i32) {
        let stateful_set = json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": { "name": name, "namespace": namespace },
            "status": { "replicas": ready, "readyReplicas": ready },
        });
        self.insert_raw(STATEFUL_SET, stateful_set);
    }

    pub fn set_deployment_ready(&self, namespace: &str, name: &str, ready: i32) {
        let deployment = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name, "namespace": namespace },
            "status": { "replicas": ready, "readyReplicas": ready },
        });
        self.insert_raw(DEPLOYMENT, deployment);
    }

    pub fn ingress(&self, namespace: &str, name: &str) -> Option<Ingress> {
        self.peek(INGRESS, namespace, name)
    }
}

#[async_trait]
impl KubeClient for FakeClient {
    async fn get_harbor_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HarborCluster>> {
        self.get_as("get_harbor_cluster", CLUSTER, namespace, name)
    }

    async fn replace_harbor_cluster_status(
        &self,
        cluster: &HarborCluster,
    ) -> Result<HarborCluster> {
        let mut store = self.lock();
        store.record("replace_harbor_cluster_status")?;
        let value = encode(cluster)?;
        let (namespace, name) = identity(&value);
        let key = key(CLUSTER, &namespace, &name);
        let Some(live) = store.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound"));
        };
        if value["metadata"]["resourceVersion"] != live["metadata"]["resourceVersion"] {
            return Err(api_error(409, "Conflict"));
        }
        let mut updated = live;
        updated["status"] = value["status"].clone();
        updated["metadata"]["resourceVersion"] = json!(store.next_revision());
        store.objects.insert(key, updated.clone());
        decode(updated)
    }

    async fn get_harbor(&self, namespace: &str, name: &str) -> Result<Option<Harbor>> {
        self.get_as("get_harbor", HARBOR, namespace, name)
    }

    async fn create_harbor(&self, harbor: &Harbor) -> Result<Harbor> {
        self.create_as("create_harbor", HARBOR, harbor)
    }

    async fn replace_harbor(&self, harbor: &Harbor) -> Result<Harbor> {
        self.replace_as("replace_harbor", HARBOR, harbor)
    }

    async fn get_object(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        self.get_as("get_object", &resource.kind, namespace, name)
    }

    async fn create_object(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.create_as("create_object", &resource.kind, object)
    }

    async fn replace_object(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.replace_as("replace_object", &resource.kind, object)
    }

    async fn delete_object(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        let mut store = self.lock();
        store.record("delete_object")?;
        store.objects.remove(&key(&resource.kind, namespace, name));
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.get_as("get_secret", SECRET, namespace, name)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        self.create_as("create_secret", SECRET, secret)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret> {
        self.replace_as("replace_secret", SECRET, secret)
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        self.get_as("get_stateful_set", STATEFUL_SET, namespace, name)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        self.get_as("get_deployment", DEPLOYMENT, namespace, name)
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>> {
        self.get_as("get_ingress", INGRESS, namespace, name)
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        self.create_as("create_ingress", INGRESS, ingress)
    }

    async fn replace_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        self.replace_as("replace_ingress", INGRESS, ingress)
    }

    async fn publish_event(
        &self,
        _cluster: &HarborCluster,
        type_: EventType,
        reason: &str,
        note: String,
    ) -> Result<()> {
        let mut store = self.lock();
        store.record("publish_event")?;
        store.events.push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
        Ok(())
    }
}
