//! Object shapes shared by every variant

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EndpointAddress, EndpointPort,
    EndpointSubset, Endpoints, EnvVar, HTTPGetAction, KeyToPath, PodSpec, PodTemplateSpec, Probe,
    Service, ServicePort, ServiceSpec, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use apollo_common::crd::{DatabaseSpec, IngressExposure, WorkloadSpec};
use apollo_common::labels::{object_labels, role_selector_labels};
use apollo_common::naming::CONTAINER_NAME;

/// Annotation kubectl writes on applied objects; never copied to children
const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Mode of mounted config files (0644)
const CONFIG_FILE_MODE: i32 = 420;

const TCP: &str = "TCP";
const HTTP_PORT_NAME: &str = "http";

pub(crate) fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

pub(crate) fn non_empty_map(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then_some(map)
}

/// Metadata of a managed object called `name`
pub(crate) fn object_meta<K: Resource<DynamicType = ()>>(instance: &K, name: &str) -> ObjectMeta {
    let mut annotations = instance.annotations().clone();
    annotations.remove(LAST_APPLIED_ANNOTATION);
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: instance.namespace(),
        labels: Some(object_labels(instance, name)),
        annotations: non_empty_map(annotations),
        ..Default::default()
    }
}

/// Render `key = value` lines as a properties file
pub(crate) fn properties(lines: &[String]) -> String {
    lines.join("\n")
}

/// Datasource lines of a Spring properties file
pub(crate) fn datasource(username: &str, password: &str, url: &str) -> Vec<String> {
    vec![
        format!("spring.datasource.username = {username}"),
        format!("spring.datasource.password = {password}"),
        format!("spring.datasource.url = {url}"),
    ]
}

/// Line setting the servlet context path, if there is one
pub(crate) fn context_path_line(context_path: &str) -> Option<String> {
    (!context_path.is_empty()).then(|| format!("server.servlet.context-path = {context_path}"))
}

/// In-cluster HTTP address of a role's service
pub(crate) fn service_url(service: &str, namespace: &str, port: i32, context_path: &str) -> String {
    format!("http://{service}.{namespace}:{port}{context_path}")
}

pub(crate) fn config_map<K: Resource<DynamicType = ()>>(
    instance: &K,
    name: &str,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(instance, name),
        data: Some(data),
        ..Default::default()
    }
}

/// Service selecting the pods of `role`
pub(crate) fn role_service<K: Resource<DynamicType = ()>>(
    instance: &K,
    name: &str,
    role: &str,
    workload: &WorkloadSpec,
) -> Service {
    Service {
        metadata: object_meta(instance, name),
        spec: Some(ServiceSpec {
            type_: workload.service.type_.clone(),
            ports: Some(vec![ServicePort {
                name: Some(HTTP_PORT_NAME.to_string()),
                protocol: Some(TCP.to_string()),
                port: workload.service_port(),
                target_port: Some(IntOrString::Int(
                    workload.service.target_port.unwrap_or_else(|| workload.port()),
                )),
                ..Default::default()
            }]),
            selector: Some(role_selector_labels(instance, role)),
            session_affinity: workload.service.session_affinity.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Selector-less service in front of an external database
pub(crate) fn database_service<K: Resource<DynamicType = ()>>(
    instance: &K,
    name: &str,
    db: &DatabaseSpec,
) -> Service {
    let external_name = db.is_external_name().then(|| db.host.clone());
    Service {
        metadata: object_meta(instance, name),
        spec: Some(ServiceSpec {
            type_: db.service.type_.clone(),
            ports: Some(vec![ServicePort {
                protocol: Some(TCP.to_string()),
                port: db.service.port.or(db.port).unwrap_or_default(),
                target_port: db.port.map(IntOrString::Int),
                ..Default::default()
            }]),
            external_name,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Endpoints backing [`database_service`]; `ExternalName` services need none
pub(crate) fn database_endpoints<K: Resource<DynamicType = ()>>(
    instance: &K,
    name: &str,
    db: &DatabaseSpec,
) -> Option<Endpoints> {
    if db.is_external_name() {
        return None;
    }
    Some(Endpoints {
        metadata: object_meta(instance, name),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(vec![EndpointAddress {
                ip: db.host.clone(),
                ..Default::default()
            }]),
            ports: Some(vec![EndpointPort {
                port: db.port.unwrap_or_default(),
                protocol: Some(TCP.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    })
}

/// Everything a role deployment needs beyond the workload settings
pub(crate) struct RolePod<'a> {
    /// Value of the `app` selector label
    pub role: &'a str,
    /// Config map holding the role's files
    pub config_map: &'a str,
    /// Directory the files are mounted under
    pub mount_dir: &'a str,
    /// Config map keys mounted as files
    pub files: Vec<String>,
    /// `SPRING_PROFILES_ACTIVE`
    pub profiles: &'a str,
    /// Context path, prefixed to the readiness check
    pub context_path: &'a str,
    /// User settings
    pub workload: &'a WorkloadSpec,
}

/// Liveness by TCP connect, readiness through the health endpoint; the
/// user only controls the timing
pub(crate) fn probes(workload: &WorkloadSpec, context_path: &str) -> (Probe, Probe) {
    let port = IntOrString::Int(workload.port());
    let mut liveness = workload.probe.liveness_probe.clone().unwrap_or_default();
    liveness.exec = None;
    liveness.grpc = None;
    liveness.http_get = None;
    liveness.tcp_socket = Some(TCPSocketAction {
        port: port.clone(),
        ..Default::default()
    });

    let mut readiness = workload.probe.readiness_probe.clone().unwrap_or_default();
    readiness.exec = None;
    readiness.grpc = None;
    readiness.tcp_socket = None;
    readiness.http_get = Some(HTTPGetAction {
        port,
        path: Some(format!("{context_path}/health")),
        ..Default::default()
    });
    (liveness, readiness)
}

pub(crate) fn config_volume(config_map: &str, files: &[String]) -> Volume {
    Volume {
        name: config_map.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string().into(),
            items: Some(
                files
                    .iter()
                    .map(|key| KeyToPath {
                        key: key.clone(),
                        path: key.clone(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            default_mode: Some(CONFIG_FILE_MODE),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deployment running one Apollo role
pub(crate) fn role_deployment<K: Resource<DynamicType = ()>>(
    instance: &K,
    name: &str,
    pod: &RolePod<'_>,
) -> Deployment {
    let workload = pod.workload;
    let selector = role_selector_labels(instance, pod.role);
    let (liveness, readiness) = probes(workload, pod.context_path);

    let mut env = workload.env.clone();
    env.push(EnvVar {
        name: "SPRING_PROFILES_ACTIVE".to_string(),
        value: Some(pod.profiles.to_string()),
        ..Default::default()
    });

    let mounts = pod
        .files
        .iter()
        .map(|key| VolumeMount {
            name: pod.config_map.to_string(),
            mount_path: format!("{}/{}", pod.mount_dir, key),
            sub_path: Some(key.clone()),
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: workload.image.clone(),
        image_pull_policy: workload.image_pull_policy.clone(),
        ports: Some(vec![ContainerPort {
            name: Some(HTTP_PORT_NAME.to_string()),
            container_port: workload.port(),
            protocol: Some(TCP.to_string()),
            ..Default::default()
        }]),
        env: Some(env),
        volume_mounts: Some(mounts),
        liveness_probe: Some(liveness),
        readiness_probe: Some(readiness),
        resources: workload.resources.clone(),
        ..Default::default()
    };

    Deployment {
        metadata: object_meta(instance, name),
        spec: Some(DeploymentSpec {
            replicas: workload.replicas,
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            strategy: workload.strategy.clone(),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![config_volume(pod.config_map, &pod.files)]),
                    image_pull_secrets: non_empty(workload.image_pull_secrets.clone()),
                    node_selector: non_empty_map(workload.node_selector.clone()),
                    affinity: workload.affinity.clone(),
                    tolerations: non_empty(workload.tolerations.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// One `/` rule per host to `service`; `None` without hosts
pub(crate) fn role_ingress<K: Resource<DynamicType = ()>>(
    instance: &K,
    name: &str,
    service: &str,
    port: i32,
    exposure: Option<&IngressExposure>,
) -> Option<Ingress> {
    let exposure = exposure.filter(|e| !e.hosts.is_empty())?;
    let rules = exposure
        .hosts
        .iter()
        .map(|host| IngressRule {
            host: Some(host.clone()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some("/".to_string()),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: service.to_string(),
                            port: Some(ServiceBackendPort {
                                number: Some(port),
                                ..Default::default()
                            }),
                        }),
                        ..Default::default()
                    },
                }],
            }),
        })
        .collect();

    let mut metadata = object_meta(instance, name);
    let mut annotations = metadata.annotations.take().unwrap_or_default();
    annotations.extend(exposure.annotations.clone());
    metadata.annotations = non_empty_map(annotations);

    Some(Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: exposure.ingress_class_name.clone(),
            rules: Some(rules),
            tls: non_empty(exposure.tls.clone()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_environment;
    use apollo_common::crd::{ProbeSpec, SERVICE_TYPE_EXTERNAL_NAME};

    fn workload() -> WorkloadSpec {
        WorkloadSpec {
            image: Some("apollo:1".to_string()),
            container_port: Some(8080),
            probe: ProbeSpec {
                liveness_probe: Some(Probe {
                    initial_delay_seconds: Some(100),
                    http_get: Some(HTTPGetAction::default()),
                    ..Default::default()
                }),
                readiness_probe: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn probes_keep_timing_and_replace_handlers() {
        let (liveness, readiness) = probes(&workload(), "/config");
        assert_eq!(liveness.initial_delay_seconds, Some(100));
        assert!(liveness.http_get.is_none());
        assert_eq!(
            liveness.tcp_socket.unwrap().port,
            IntOrString::Int(8080)
        );
        assert_eq!(
            readiness.http_get.unwrap().path.as_deref(),
            Some("/config/health")
        );
    }

    #[test]
    fn children_do_not_inherit_kubectl_bookkeeping() {
        let mut env = test_environment("demo");
        env.metadata.annotations = Some(BTreeMap::from([
            (LAST_APPLIED_ANNOTATION.to_string(), "{}".to_string()),
            ("team".to_string(), "infra".to_string()),
        ]));
        let meta = object_meta(&env, "demo-config");
        let annotations = meta.annotations.unwrap();
        assert!(!annotations.contains_key(LAST_APPLIED_ANNOTATION));
        assert_eq!(annotations["team"], "infra");
        assert_eq!(meta.namespace.as_deref(), Some("apollo"));
    }

    #[test]
    fn deployment_mounts_each_file_by_sub_path() {
        let env = test_environment("demo");
        let w = workload();
        let pod = RolePod {
            role: "configService",
            config_map: "demo-config-configmap",
            mount_dir: "/apollo-configservice/config",
            files: vec!["application-github.properties".to_string()],
            profiles: "github,kubernetes",
            context_path: "",
            workload: &w,
        };
        let deployment = role_deployment(&env, "demo-config-deployment", &pod);
        let spec = deployment.spec.unwrap();
        let pod_spec = spec.template.spec.unwrap();
        let container = &pod_spec.containers[0];

        let mount = &container.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(
            mount.mount_path,
            "/apollo-configservice/config/application-github.properties"
        );
        assert_eq!(mount.sub_path.as_deref(), Some("application-github.properties"));

        let env_vars = container.env.as_ref().unwrap();
        let profiles = env_vars.last().unwrap();
        assert_eq!(profiles.name, "SPRING_PROFILES_ACTIVE");
        assert_eq!(profiles.value.as_deref(), Some("github,kubernetes"));

        let volume = &pod_spec.volumes.unwrap()[0];
        assert_eq!(volume.config_map.as_ref().unwrap().default_mode, Some(420));
        assert_eq!(
            spec.selector.match_labels.unwrap()["app"],
            "configService"
        );
    }

    #[test]
    fn ingress_needs_hosts() {
        let env = test_environment("demo");
        assert!(role_ingress(&env, "x", "svc", 80, None).is_none());
        assert!(role_ingress(&env, "x", "svc", 80, Some(&IngressExposure::default())).is_none());

        let exposure = IngressExposure {
            hosts: vec!["a.example.com".to_string(), "b.example.com".to_string()],
            annotations: BTreeMap::from([("k".to_string(), "v".to_string())]),
            ..Default::default()
        };
        let ingress = role_ingress(&env, "x", "svc", 80, Some(&exposure)).unwrap();
        assert_eq!(ingress.metadata.annotations.unwrap()["k"], "v");
        let rules = ingress.spec.unwrap().rules.unwrap();
        assert_eq!(rules.len(), 2);
        let backend = rules[0].http.as_ref().unwrap().paths[0]
            .backend
            .service
            .clone()
            .unwrap();
        assert_eq!(backend.name, "svc");
        assert_eq!(backend.port.unwrap().number, Some(80));
    }

    #[test]
    fn external_name_database_has_no_endpoints() {
        let env = test_environment("demo");
        let mut db = DatabaseSpec {
            host: "db.example.com".to_string(),
            port: Some(3306),
            ..Default::default()
        };
        db.service.type_ = Some(SERVICE_TYPE_EXTERNAL_NAME.to_string());
        assert!(database_endpoints(&env, "demo-configdb", &db).is_none());
        let svc = database_service(&env, "demo-configdb", &db);
        assert_eq!(
            svc.spec.unwrap().external_name.as_deref(),
            Some("db.example.com")
        );

        db.service.type_ = Some("ClusterIP".to_string());
        let endpoints = database_endpoints(&env, "demo-configdb", &db).unwrap();
        let subset = &endpoints.subsets.unwrap()[0];
        assert_eq!(subset.addresses.as_ref().unwrap()[0].ip, "db.example.com");
    }
}
