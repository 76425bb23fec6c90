//! Resource store seam
//!
//! The convergence engine only ever talks to the cluster through
//! [`ResourceStore`]. [`KubeStore`] is the production implementation; tests
//! use an in-memory store. Errors leave this module classified (see
//! [`Error::from_store`]) so callers never inspect HTTP codes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::{Map, Value};

use apollo_common::labels::to_selector;
use apollo_common::{Error, Result, FIELD_MANAGER};

use crate::resource::ManagedResource;

/// Typed access to one kind of namespaced object
#[async_trait]
pub trait ResourceStore<K: ManagedResource>: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Create an object; [`Error::AlreadyExists`] when someone else won the race
    async fn create(&self, obj: &K) -> Result<K>;

    /// Patch `base` (as fetched) into `updated`
    async fn patch(&self, base: &K, updated: &K) -> Result<K>;

    /// Delete an object; deleting something already gone succeeds
    async fn delete(&self, obj: &K) -> Result<()>;

    /// List objects in `namespace` carrying every label in `selector`
    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>>;
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: ManagedResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl<K: ManagedResource> ResourceStore<K> for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::from_store(&K::kind(&()), namespace, name, e))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace().unwrap_or_default();
        self.api::<K>(&namespace)
            .create(&post_params(), obj)
            .await
            .map_err(|e| Error::from_store(&K::kind(&()), &namespace, &obj.name_any(), e))
    }

    async fn patch(&self, base: &K, updated: &K) -> Result<K> {
        let namespace = base.namespace().unwrap_or_default();
        let name = base.name_any();
        let patch = merge_patch(&serde_json::to_value(base)?, &serde_json::to_value(updated)?);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<K>(&namespace)
            .patch(&name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_store(&K::kind(&()), &namespace, &name, e))
    }

    async fn delete(&self, obj: &K) -> Result<()> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        match self
            .api::<K>(&namespace)
            .delete(&name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::from_store(&K::kind(&()), &namespace, &name, e)),
        }
    }

    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&to_selector(selector));
        self.api::<K>(namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| Error::from_store(&K::kind(&()), namespace, "", e))
    }
}

/// One store per managed kind
#[derive(Clone)]
pub struct Stores {
    /// ConfigMaps
    pub config_maps: Arc<dyn ResourceStore<ConfigMap>>,
    /// Endpoints
    pub endpoints: Arc<dyn ResourceStore<Endpoints>>,
    /// Services
    pub services: Arc<dyn ResourceStore<Service>>,
    /// Deployments
    pub deployments: Arc<dyn ResourceStore<Deployment>>,
    /// StatefulSets
    pub stateful_sets: Arc<dyn ResourceStore<StatefulSet>>,
    /// Ingresses
    pub ingresses: Arc<dyn ResourceStore<Ingress>>,
}

impl Stores {
    /// Stores that all go through the Kubernetes API
    pub fn from_client(client: Client) -> Self {
        let store = KubeStore::new(client);
        Self {
            config_maps: Arc::new(store.clone()),
            endpoints: Arc::new(store.clone()),
            services: Arc::new(store.clone()),
            deployments: Arc::new(store.clone()),
            stateful_sets: Arc::new(store.clone()),
            ingresses: Arc::new(store),
        }
    }
}

/// Typed lookup of the store for kind `K`
pub trait StoreFor<K: ManagedResource> {
    /// The store managing `K`
    fn store_for(&self) -> &dyn ResourceStore<K>;
}

macro_rules! store_for {
    ($kind:ty, $field:ident) => {
        impl StoreFor<$kind> for Stores {
            fn store_for(&self) -> &dyn ResourceStore<$kind> {
                self.$field.as_ref()
            }
        }
    };
}

store_for!(ConfigMap, config_maps);
store_for!(Endpoints, endpoints);
store_for!(Service, services);
store_for!(Deployment, deployments);
store_for!(StatefulSet, stateful_sets);
store_for!(Ingress, ingresses);

/// RFC 7386 merge patch turning `base` into `updated`.
///
/// Keys missing from `updated` are nulled, changed objects recurse, and
/// every other changed value (including arrays) is replaced wholesale.
pub fn merge_patch(base: &Value, updated: &Value) -> Value {
    match (base, updated) {
        (Value::Object(base), Value::Object(updated)) => {
            let mut patch = Map::new();
            for (key, old) in base {
                match updated.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new) if new != old => {
                        patch.insert(key.clone(), merge_patch(old, new));
                    }
                    Some(_) => {}
                }
            }
            for (key, new) in updated {
                if !base.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            Value::Object(patch)
        }
        (_, updated) => updated.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unchanged_documents_produce_an_empty_patch() {
        let doc = json!({"metadata": {"name": "a"}, "data": {"k": "v"}});
        assert_eq!(merge_patch(&doc, &doc), json!({}));
    }

    #[test]
    fn changed_leaves_are_the_only_thing_sent() {
        let base = json!({
            "metadata": {"name": "a", "resourceVersion": "7", "labels": {"x": "1"}},
            "data": {"k": "v", "keep": "same"}
        });
        let updated = json!({
            "metadata": {"name": "a", "resourceVersion": "7", "labels": {"x": "2"}},
            "data": {"k": "v2", "keep": "same"}
        });
        assert_eq!(
            merge_patch(&base, &updated),
            json!({"metadata": {"labels": {"x": "2"}}, "data": {"k": "v2"}})
        );
    }

    #[test]
    fn removed_keys_are_nulled_and_added_keys_sent() {
        let base = json!({"data": {"old": "1"}});
        let updated = json!({"data": {"new": "2"}});
        assert_eq!(
            merge_patch(&base, &updated),
            json!({"data": {"old": null, "new": "2"}})
        );
    }

    #[test]
    fn arrays_are_replaced_wholesale() {
        let base = json!({"spec": {"ports": [{"port": 80}, {"port": 443}]}});
        let updated = json!({"spec": {"ports": [{"port": 8080}]}});
        assert_eq!(
            merge_patch(&base, &updated),
            json!({"spec": {"ports": [{"port": 8080}]}})
        );
    }
}
