//! Per-kind convergence rules
//!
//! Each managed kind declares which of its fields are immutable in the store
//! (forcing delete-then-recreate), which fields the operator owns and copies
//! onto the fetched object, and whether a change is worth an event. Desired
//! objects are completed with the server's defaults first, so copying an
//! unchanged object yields the fetched one and a removed optional field
//! yields a difference.

use std::fmt::Debug;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Endpoints, PersistentVolumeClaimSpec, Service, ServicePort,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::defaults;

const CLIENT_IP_AFFINITY: &str = "ClientIP";

/// A namespaced kind the convergence engine can manage
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Fill the operator-owned fields the API server would default on write
    fn apply_server_defaults(&mut self) {}

    /// Whether turning `existing` into `self` needs a field the store
    /// rejects on update
    fn requires_recreate(&self, _existing: &Self) -> bool {
        false
    }

    /// Copy the operator-owned fields of `self` onto `updated`, replacing
    /// whatever is there, absent values included
    fn merge_into(&self, updated: &mut Self);

    /// Whether the change from `existing` to `self` is worth an event
    fn payload_changed(&self, _existing: &Self) -> bool {
        false
    }
}

impl ManagedResource for ConfigMap {
    fn merge_into(&self, updated: &mut Self) {
        updated.data = self.data.clone();
        updated.binary_data = self.binary_data.clone();
    }

    fn payload_changed(&self, existing: &Self) -> bool {
        self.data != existing.data || self.binary_data != existing.binary_data
    }
}

impl ManagedResource for Endpoints {
    fn merge_into(&self, updated: &mut Self) {
        updated.subsets = self.subsets.clone();
    }
}

/// Node ports are allocated by the server; keep the allocated one for a
/// port that does not pin its own
fn keep_node_ports(desired: &[ServicePort], current: &[ServicePort]) -> Vec<ServicePort> {
    desired
        .iter()
        .map(|port| {
            let mut port = port.clone();
            if port.node_port.is_none() {
                port.node_port = current
                    .iter()
                    .find(|c| c.name == port.name && c.port == port.port)
                    .and_then(|c| c.node_port);
            }
            port
        })
        .collect()
}

impl ManagedResource for Service {
    fn apply_server_defaults(&mut self) {
        if let Some(spec) = self.spec.as_mut() {
            defaults::service(spec);
        }
    }

    fn merge_into(&self, updated: &mut Self) {
        let Some(desired) = &self.spec else {
            return;
        };
        let spec = updated.spec.get_or_insert_with(Default::default);
        let current = spec.ports.take().unwrap_or_default();
        spec.type_ = desired.type_.clone();
        spec.ports = desired
            .ports
            .as_deref()
            .map(|ports| keep_node_ports(ports, &current));
        spec.selector = desired.selector.clone();
        spec.session_affinity = desired.session_affinity.clone();
        if desired.session_affinity.as_deref() != Some(CLIENT_IP_AFFINITY) {
            spec.session_affinity_config = None;
        }
        spec.external_name = desired.external_name.clone();
    }
}

impl ManagedResource for Deployment {
    fn apply_server_defaults(&mut self) {
        if let Some(spec) = self.spec.as_mut() {
            defaults::deployment(spec);
        }
    }

    fn requires_recreate(&self, existing: &Self) -> bool {
        let desired = self.spec.as_ref().map(|s| &s.selector);
        let actual = existing.spec.as_ref().map(|s| &s.selector);
        desired != actual
    }

    fn merge_into(&self, updated: &mut Self) {
        updated.spec = self.spec.clone();
    }
}

/// Whether an existing claim template differs from the desired one in a
/// field the operator sets. A storage class left to the cluster default
/// is not compared.
fn claim_changed(
    desired: Option<&PersistentVolumeClaimSpec>,
    actual: Option<&PersistentVolumeClaimSpec>,
) -> bool {
    let (Some(desired), Some(actual)) = (desired, actual) else {
        return desired.is_some() != actual.is_some();
    };
    let requests =
        |spec: &PersistentVolumeClaimSpec| spec.resources.as_ref().and_then(|r| r.requests.clone());
    desired.access_modes != actual.access_modes
        || requests(desired) != requests(actual)
        || desired.volume_mode != actual.volume_mode
        || (desired.storage_class_name.is_some()
            && desired.storage_class_name != actual.storage_class_name)
}

impl ManagedResource for StatefulSet {
    fn apply_server_defaults(&mut self) {
        if let Some(spec) = self.spec.as_mut() {
            defaults::stateful_set(spec);
        }
    }

    fn requires_recreate(&self, existing: &Self) -> bool {
        let (Some(desired), Some(actual)) = (&self.spec, &existing.spec) else {
            return self.spec.is_some() != existing.spec.is_some();
        };
        if desired.selector != actual.selector {
            return true;
        }
        let wanted = desired.volume_claim_templates.as_deref().unwrap_or_default();
        let current = actual.volume_claim_templates.as_deref().unwrap_or_default();
        if wanted.len() != current.len() {
            return true;
        }
        wanted.iter().any(|template| {
            let found = current
                .iter()
                .find(|c| c.metadata.name == template.metadata.name);
            match found {
                Some(c) => claim_changed(template.spec.as_ref(), c.spec.as_ref()),
                None => true,
            }
        })
    }

    fn merge_into(&self, updated: &mut Self) {
        let Some(desired) = &self.spec else {
            return;
        };
        let spec = updated.spec.get_or_insert_with(Default::default);
        spec.replicas = desired.replicas;
        spec.template = desired.template.clone();
        spec.update_strategy = desired.update_strategy.clone();
        spec.min_ready_seconds = desired.min_ready_seconds;
        spec.revision_history_limit = desired.revision_history_limit;
        spec.persistent_volume_claim_retention_policy =
            desired.persistent_volume_claim_retention_policy.clone();
    }
}

impl ManagedResource for Ingress {
    fn merge_into(&self, updated: &mut Self) {
        let Some(desired) = &self.spec else {
            return;
        };
        let spec = updated.spec.get_or_insert_with(Default::default);
        spec.rules = desired.rules.clone();
        spec.tls = desired.tls.clone();
        spec.ingress_class_name = desired.ingress_class_name.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, StatefulSetSpec};
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaim, ServiceSpec, SessionAffinityConfig, VolumeResourceRequirements,
    };
    use k8s_openapi::api::networking::v1::{IngressSpec, IngressTLS};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
    use std::collections::BTreeMap;

    fn selector(role: &str) -> LabelSelector {
        LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), role.to_string())])),
            ..Default::default()
        }
    }

    fn claim(name: &str, storage: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(storage.to_string()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn stateful_set(claims: Vec<PersistentVolumeClaim>) -> StatefulSet {
        let mut set = StatefulSet {
            spec: Some(StatefulSetSpec {
                selector: selector("apolloDB"),
                service_name: "demo-db-allinone".to_string().into(),
                volume_claim_templates: Some(claims),
                ..Default::default()
            }),
            ..Default::default()
        };
        set.apply_server_defaults();
        set
    }

    fn service(port: i32, affinity: Option<&str>) -> Service {
        let mut service = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port,
                    ..Default::default()
                }]),
                session_affinity: affinity.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        };
        service.apply_server_defaults();
        service
    }

    /// `desired` copied onto `existing` the way a pass does it
    fn merged<K: ManagedResource>(desired: &K, existing: &K) -> K {
        let mut updated = existing.clone();
        desired.merge_into(&mut updated);
        updated
    }

    // =========================================================================
    // Immutable fields
    // =========================================================================

    #[test]
    fn deployment_selector_change_forces_recreate() {
        let existing = Deployment {
            spec: Some(DeploymentSpec {
                selector: selector("configService"),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut desired = existing.clone();
        assert!(!desired.requires_recreate(&existing));

        desired.spec.as_mut().unwrap().selector = selector("adminService");
        assert!(desired.requires_recreate(&existing));
    }

    #[test]
    fn stateful_set_claim_change_forces_recreate() {
        let existing = stateful_set(vec![claim("data", "1Gi")]);
        assert!(stateful_set(vec![claim("data", "2Gi")]).requires_recreate(&existing));
        assert!(stateful_set(vec![claim("other", "1Gi")]).requires_recreate(&existing));
        assert!(stateful_set(vec![]).requires_recreate(&existing));
    }

    #[test]
    fn server_defaulted_claim_fields_do_not_force_recreate() {
        let desired = stateful_set(vec![claim("data", "1Gi")]);
        let mut defaulted = claim("data", "1Gi");
        if let Some(spec) = defaulted.spec.as_mut() {
            spec.volume_mode = Some("Filesystem".to_string());
            spec.storage_class_name = Some("standard".to_string());
        }
        let existing = stateful_set(vec![defaulted]);
        assert!(!desired.requires_recreate(&existing));
    }

    #[test]
    fn pinned_storage_class_change_forces_recreate() {
        let mut fast = claim("data", "1Gi");
        if let Some(spec) = fast.spec.as_mut() {
            spec.storage_class_name = Some("fast".to_string());
        }
        let mut standard = claim("data", "1Gi");
        if let Some(spec) = standard.spec.as_mut() {
            spec.storage_class_name = Some("standard".to_string());
        }
        let existing = stateful_set(vec![standard]);
        assert!(stateful_set(vec![fast]).requires_recreate(&existing));
    }

    // =========================================================================
    // Mutable fields
    // =========================================================================

    #[test]
    fn service_merge_keeps_the_cluster_ip() {
        let mut existing = service(80, None);
        existing.spec.as_mut().unwrap().cluster_ip = Some("10.0.0.9".to_string());
        let desired = service(8080, None);

        let updated = merged(&desired, &existing);
        assert_ne!(updated, existing);
        let spec = updated.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(spec.ports.unwrap()[0].port, 8080);
    }

    #[test]
    fn allocated_node_port_is_not_a_change() {
        let mut existing = service(80, None);
        if let Some(spec) = existing.spec.as_mut() {
            spec.type_ = Some("NodePort".to_string());
            spec.ports.as_mut().unwrap()[0].node_port = Some(30080);
        }
        let mut desired = service(80, None);
        desired.spec.as_mut().unwrap().type_ = Some("NodePort".to_string());

        assert_eq!(merged(&desired, &existing), existing);
    }

    #[test]
    fn dropping_client_ip_affinity_clears_its_config() {
        let mut existing = service(80, Some("ClientIP"));
        existing.spec.as_mut().unwrap().session_affinity_config =
            Some(SessionAffinityConfig::default());

        assert_eq!(merged(&service(80, Some("ClientIP")), &existing), existing);

        let spec = merged(&service(80, None), &existing).spec.unwrap();
        assert_eq!(spec.session_affinity.as_deref(), Some("None"));
        assert!(spec.session_affinity_config.is_none());
    }

    #[test]
    fn removed_ingress_tls_is_a_change() {
        let ingress = |tls: Option<Vec<IngressTLS>>, class: Option<&str>| Ingress {
            spec: Some(IngressSpec {
                tls,
                ingress_class_name: class.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        };
        let existing = ingress(
            Some(vec![IngressTLS {
                hosts: Some(vec!["apollo.example.com".to_string()]),
                secret_name: Some("apollo-tls".to_string()),
            }]),
            Some("nginx"),
        );
        let desired = ingress(None, None);

        let spec = merged(&desired, &existing).spec.unwrap();
        assert!(spec.tls.is_none());
        assert!(spec.ingress_class_name.is_none());
    }

    #[test]
    fn config_map_data_removal_is_a_change() {
        let existing = ConfigMap {
            data: Some(BTreeMap::from([
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ])),
            ..Default::default()
        };
        let desired = ConfigMap {
            data: Some(BTreeMap::from([("a".to_string(), "1".to_string())])),
            ..Default::default()
        };
        assert_ne!(merged(&desired, &existing), existing);
        assert!(desired.payload_changed(&existing));
    }
}
