//! In-memory doubles shared by the reconcile tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::ResourceExt;

use apollo_common::crd::{ApolloEnvironment, ApolloEnvironmentSpec};
use apollo_common::events::EventPublisher;
use apollo_common::labels::matches_selector;
use apollo_common::{Error, Result};

use crate::instance::Owner;
use crate::resource::ManagedResource;
use crate::store::{ResourceStore, Stores};

type Key = (String, String);

/// A store that keeps objects in a map, counts writes and can be told to
/// fail the next creates
pub struct FakeStore<K> {
    objects: Mutex<BTreeMap<Key, K>>,
    creates: AtomicUsize,
    patches: AtomicUsize,
    deletes: AtomicUsize,
    already_exists: AtomicUsize,
    terminating: AtomicUsize,
    competitors: Mutex<Vec<K>>,
}

impl<K: ManagedResource> FakeStore<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(BTreeMap::new()),
            creates: AtomicUsize::new(0),
            patches: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            already_exists: AtomicUsize::new(0),
            terminating: AtomicUsize::new(0),
            competitors: Mutex::new(Vec::new()),
        })
    }

    fn key(obj: &K) -> Key {
        (obj.namespace().unwrap_or_default(), obj.name_any())
    }

    /// Seed an object without counting a write
    pub fn insert(&self, obj: K) {
        self.objects.lock().unwrap().insert(Self::key(&obj), obj);
    }

    pub fn get_stored(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn all(&self) -> Vec<K> {
        self.objects.lock().unwrap().values().cloned().collect()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn patches(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.creates() + self.patches() + self.deletes()
    }

    pub fn reset_counts(&self) {
        self.creates.store(0, Ordering::SeqCst);
        self.patches.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
    }

    pub fn fail_next_creates_with_already_exists(&self, n: usize) {
        self.already_exists.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_creates_with_terminating(&self, n: usize) {
        self.terminating.store(n, Ordering::SeqCst);
    }

    /// The next create of `winner`'s name finds `winner` written by a
    /// concurrent writer and fails with AlreadyExists
    pub fn lose_next_create_to(&self, winner: K) {
        self.competitors.lock().unwrap().push(winner);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<K: ManagedResource> ResourceStore<K> for FakeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.get_stored(namespace, name))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj);
        let winner = {
            let mut competitors = self.competitors.lock().unwrap();
            let found = competitors.iter().position(|c| Self::key(c) == key);
            found.map(|i| competitors.remove(i))
        };
        if let Some(winner) = winner {
            self.objects.lock().unwrap().insert(key, winner);
            return Err(Error::already_exists(K::kind(&()), obj.name_any()));
        }
        if Self::take(&self.already_exists) {
            return Err(Error::already_exists(K::kind(&()), obj.name_any()));
        }
        if Self::take(&self.terminating) {
            return Err(Error::namespace_terminating(
                obj.namespace().unwrap_or_default(),
            ));
        }
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::already_exists(K::kind(&()), obj.name_any()));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        objects.insert(key, obj.clone());
        Ok(obj.clone())
    }

    async fn patch(&self, base: &K, updated: &K) -> Result<K> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .insert(Self::key(base), updated.clone());
        Ok(updated.clone())
    }

    async fn delete(&self, obj: &K) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().remove(&Self::key(obj));
        Ok(())
    }

    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.namespace().as_deref() == Some(namespace))
            .filter(|o| matches_selector(o.labels(), selector))
            .cloned()
            .collect())
    }
}

/// Fake stores for every managed kind, kept typed for assertions
pub struct FakeStores {
    pub config_maps: Arc<FakeStore<k8s_openapi::api::core::v1::ConfigMap>>,
    pub endpoints: Arc<FakeStore<k8s_openapi::api::core::v1::Endpoints>>,
    pub services: Arc<FakeStore<k8s_openapi::api::core::v1::Service>>,
    pub deployments: Arc<FakeStore<k8s_openapi::api::apps::v1::Deployment>>,
    pub stateful_sets: Arc<FakeStore<k8s_openapi::api::apps::v1::StatefulSet>>,
    pub ingresses: Arc<FakeStore<k8s_openapi::api::networking::v1::Ingress>>,
}

impl FakeStores {
    pub fn new() -> Self {
        Self {
            config_maps: FakeStore::new(),
            endpoints: FakeStore::new(),
            services: FakeStore::new(),
            deployments: FakeStore::new(),
            stateful_sets: FakeStore::new(),
            ingresses: FakeStore::new(),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            config_maps: self.config_maps.clone(),
            endpoints: self.endpoints.clone(),
            services: self.services.clone(),
            deployments: self.deployments.clone(),
            stateful_sets: self.stateful_sets.clone(),
            ingresses: self.ingresses.clone(),
        }
    }

    pub fn writes(&self) -> usize {
        self.config_maps.writes()
            + self.endpoints.writes()
            + self.services.writes()
            + self.deployments.writes()
            + self.stateful_sets.writes()
            + self.ingresses.writes()
    }

    pub fn reset_counts(&self) {
        self.config_maps.reset_counts();
        self.endpoints.reset_counts();
        self.services.reset_counts();
        self.deployments.reset_counts();
        self.stateful_sets.reset_counts();
        self.ingresses.reset_counts();
    }
}

/// Remembers the reason of every published event
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingPublisher {
    pub fn reasons(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(reason, _)| reason.clone())
            .collect()
    }

    pub fn notes(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, note)| note.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.published
            .lock()
            .unwrap()
            .push((reason.to_string(), note));
    }
}

/// An ApolloEnvironment in namespace `apollo` with a uid, ready to own objects
pub fn test_environment(name: &str) -> ApolloEnvironment {
    let mut env = ApolloEnvironment::new(name, ApolloEnvironmentSpec::default());
    env.metadata.namespace = Some("apollo".to_string());
    env.metadata.uid = Some(format!("uid-{name}"));
    env.metadata.generation = Some(1);
    env
}

pub fn test_owner(name: &str) -> Owner {
    Owner::of(&test_environment(name)).unwrap()
}
