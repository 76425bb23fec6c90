//! Values the API server fills in on write
//!
//! Desired objects are completed with these before they are compared with
//! or written to the store, so an object read back from the cluster equals
//! the one the builders produced. Only fields the builders can leave unset
//! are listed; anything else the server adds lives outside the fields the
//! operator copies.

use k8s_openapi::api::apps::v1::{
    DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment, RollingUpdateStatefulSetStrategy,
    StatefulSetPersistentVolumeClaimRetentionPolicy, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimSpec, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, ServiceSpec, Volume,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

const ROLLING_UPDATE: &str = "RollingUpdate";
const DEFAULT_SURGE: &str = "25%";
const DEFAULT_REPLICAS: i32 = 1;
const DEFAULT_REVISION_HISTORY: i32 = 10;
const DEFAULT_PROGRESS_DEADLINE_SECONDS: i32 = 600;
const DEFAULT_TERMINATION_GRACE_SECONDS: i64 = 30;
const DEFAULT_VOLUME_MODE: i32 = 420;
const RETAIN: &str = "Retain";

fn fill<T>(slot: &mut Option<T>, value: impl FnOnce() -> T) {
    if slot.is_none() {
        *slot = Some(value());
    }
}

fn fill_str(slot: &mut Option<String>, value: &str) {
    fill(slot, || value.to_string());
}

/// `Always` for `latest` or untagged images, `IfNotPresent` otherwise
pub(crate) fn image_pull_policy(image: &str) -> &'static str {
    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains('@') {
        return "IfNotPresent";
    }
    match last.split_once(':') {
        Some((_, "latest")) | None => "Always",
        Some(_) => "IfNotPresent",
    }
}

fn probe(probe: &mut Probe) {
    fill(&mut probe.timeout_seconds, || 1);
    fill(&mut probe.period_seconds, || 10);
    fill(&mut probe.success_threshold, || 1);
    fill(&mut probe.failure_threshold, || 3);
    if let Some(http) = probe.http_get.as_mut() {
        fill_str(&mut http.scheme, "HTTP");
    }
}

fn container(container: &mut Container) {
    fill_str(
        &mut container.termination_message_path,
        "/dev/termination-log",
    );
    fill_str(&mut container.termination_message_policy, "File");
    if let Some(image) = container.image.as_deref() {
        let policy = image_pull_policy(image);
        fill_str(&mut container.image_pull_policy, policy);
    }
    fill(&mut container.resources, ResourceRequirements::default);
    for port in container.ports.iter_mut().flatten() {
        fill_str(&mut port.protocol, "TCP");
    }
    for var in container.env.iter_mut().flatten() {
        if let Some(field) = var.value_from.as_mut().and_then(|v| v.field_ref.as_mut()) {
            fill_str(&mut field.api_version, "v1");
        }
    }
    for p in [
        &mut container.liveness_probe,
        &mut container.readiness_probe,
        &mut container.startup_probe,
    ]
    .into_iter()
    .flatten()
    {
        probe(p);
    }
}

fn volume(volume: &mut Volume) {
    if let Some(source) = volume.config_map.as_mut() {
        fill(&mut source.default_mode, || DEFAULT_VOLUME_MODE);
    }
}

fn pod_spec(spec: &mut PodSpec) {
    fill_str(&mut spec.restart_policy, "Always");
    fill(&mut spec.termination_grace_period_seconds, || {
        DEFAULT_TERMINATION_GRACE_SECONDS
    });
    fill_str(&mut spec.dns_policy, "ClusterFirst");
    fill_str(&mut spec.scheduler_name, "default-scheduler");
    fill(&mut spec.security_context, PodSecurityContext::default);
    for c in spec
        .containers
        .iter_mut()
        .chain(spec.init_containers.iter_mut().flatten())
    {
        container(c);
    }
    for v in spec.volumes.iter_mut().flatten() {
        volume(v);
    }
}

pub(crate) fn pod_template(template: &mut PodTemplateSpec) {
    if let Some(spec) = template.spec.as_mut() {
        pod_spec(spec);
    }
}

pub(crate) fn deployment(spec: &mut DeploymentSpec) {
    fill(&mut spec.replicas, || DEFAULT_REPLICAS);
    fill(&mut spec.revision_history_limit, || DEFAULT_REVISION_HISTORY);
    fill(&mut spec.progress_deadline_seconds, || {
        DEFAULT_PROGRESS_DEADLINE_SECONDS
    });
    let strategy = spec.strategy.get_or_insert_with(DeploymentStrategy::default);
    fill_str(&mut strategy.type_, ROLLING_UPDATE);
    if strategy.type_.as_deref() == Some(ROLLING_UPDATE) {
        let rolling = strategy
            .rolling_update
            .get_or_insert_with(RollingUpdateDeployment::default);
        fill(&mut rolling.max_surge, || {
            IntOrString::String(DEFAULT_SURGE.to_string())
        });
        fill(&mut rolling.max_unavailable, || {
            IntOrString::String(DEFAULT_SURGE.to_string())
        });
    }
    pod_template(&mut spec.template);
}

pub(crate) fn claim_spec(spec: &mut PersistentVolumeClaimSpec) {
    fill_str(&mut spec.volume_mode, "Filesystem");
}

pub(crate) fn stateful_set(spec: &mut StatefulSetSpec) {
    fill(&mut spec.replicas, || DEFAULT_REPLICAS);
    fill(&mut spec.revision_history_limit, || DEFAULT_REVISION_HISTORY);
    fill_str(&mut spec.pod_management_policy, "OrderedReady");
    let strategy = spec
        .update_strategy
        .get_or_insert_with(StatefulSetUpdateStrategy::default);
    fill_str(&mut strategy.type_, ROLLING_UPDATE);
    if strategy.type_.as_deref() == Some(ROLLING_UPDATE) {
        let rolling = strategy
            .rolling_update
            .get_or_insert_with(RollingUpdateStatefulSetStrategy::default);
        fill(&mut rolling.partition, || 0);
    }
    let retention = spec
        .persistent_volume_claim_retention_policy
        .get_or_insert_with(StatefulSetPersistentVolumeClaimRetentionPolicy::default);
    fill_str(&mut retention.when_deleted, RETAIN);
    fill_str(&mut retention.when_scaled, RETAIN);
    pod_template(&mut spec.template);
    for claim in spec.volume_claim_templates.iter_mut().flatten() {
        if let Some(claim_spec_ref) = claim.spec.as_mut() {
            claim_spec(claim_spec_ref);
        }
    }
}

pub(crate) fn service(spec: &mut ServiceSpec) {
    fill_str(&mut spec.type_, "ClusterIP");
    fill_str(&mut spec.session_affinity, "None");
    for port in spec.ports.iter_mut().flatten() {
        fill_str(&mut port.protocol, "TCP");
        let number = port.port;
        fill(&mut port.target_port, || IntOrString::Int(number));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerPort, HTTPGetAction};

    #[test]
    fn pull_policy_follows_the_image_tag() {
        assert_eq!(image_pull_policy("apollo/config:2.2.0"), "IfNotPresent");
        assert_eq!(image_pull_policy("apollo/config:latest"), "Always");
        assert_eq!(image_pull_policy("apollo/config"), "Always");
        assert_eq!(image_pull_policy("registry:5000/apollo/config"), "Always");
        assert_eq!(image_pull_policy("apollo/config@sha256:abc"), "IfNotPresent");
    }

    #[test]
    fn deployment_gets_rolling_update_and_pod_defaults() {
        let mut spec = DeploymentSpec {
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "c".to_string(),
                        image: Some("apollo:1".to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: 8080,
                            ..Default::default()
                        }]),
                        readiness_probe: Some(Probe {
                            http_get: Some(HTTPGetAction::default()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        deployment(&mut spec);

        assert_eq!(spec.replicas, Some(1));
        let strategy = spec.strategy.as_ref().unwrap();
        assert_eq!(strategy.type_.as_deref(), Some("RollingUpdate"));
        assert_eq!(
            strategy.rolling_update.as_ref().unwrap().max_surge,
            Some(IntOrString::String("25%".to_string()))
        );
        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Always"));
        let c = &pod.containers[0];
        assert_eq!(c.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(c.resources, Some(ResourceRequirements::default()));
        assert_eq!(c.ports.as_ref().unwrap()[0].protocol.as_deref(), Some("TCP"));
        let readiness = c.readiness_probe.as_ref().unwrap();
        assert_eq!(readiness.period_seconds, Some(10));
        assert_eq!(
            readiness.http_get.as_ref().unwrap().scheme.as_deref(),
            Some("HTTP")
        );
    }

    #[test]
    fn recreate_strategy_gets_no_rolling_parameters() {
        let mut spec = DeploymentSpec {
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                rolling_update: None,
            }),
            ..Default::default()
        };
        deployment(&mut spec);
        assert!(spec.strategy.unwrap().rolling_update.is_none());
    }

    #[test]
    fn explicit_values_are_kept() {
        let mut spec = ServiceSpec {
            type_: Some("NodePort".to_string()),
            ports: Some(vec![k8s_openapi::api::core::v1::ServicePort {
                port: 80,
                target_port: Some(IntOrString::Int(8080)),
                ..Default::default()
            }]),
            ..Default::default()
        };
        service(&mut spec);
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.session_affinity.as_deref(), Some("None"));
        assert_eq!(
            spec.ports.unwrap()[0].target_port,
            Some(IntOrString::Int(8080))
        );
    }
}
