//! Apollo (all-in-one): every role plus a bundled MySQL stateful set

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe, Service, ServicePort,
    ServiceSpec, TCPSocketAction, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use apollo_common::crd::{Apollo, APOLLO_ENV_PROPERTIES, APPLICATION_PROPERTIES};
use apollo_common::labels::role_selector_labels;
use apollo_common::naming::{resource_name, suffix};

use super::environment::{ADMIN_MOUNT_DIR, ADMIN_ROLE, CONFIG_MOUNT_DIR, CONFIG_ROLE};
use super::portal::{portal_files, portal_lines, PORTAL_MOUNT_DIR, PORTAL_ROLE};
use super::workload::{
    config_map, context_path_line, datasource, non_empty, object_meta, properties,
    role_deployment, role_ingress, role_service, service_url, RolePod,
};
use super::{collect_some, DesiredState};

const DATABASE_ROLE: &str = "apolloDB";
const DATABASE_DATA_DIR: &str = "/var/lib/mysql";
const DATABASE_INIT_DIR: &str = "/docker-entrypoint-initdb.d";
const DATABASE_PORT_NAME: &str = "mysql";

struct Names {
    config_map_config: String,
    config_map_admin: String,
    config_map_portal: String,
    sql_script: String,
    db_service: String,
    config_service: String,
    admin_service: String,
    portal_service: String,
    data_volume: String,
}

fn names(apollo: &Apollo) -> Names {
    let name = apollo.name_any();
    Names {
        config_map_config: resource_name(&name, suffix::ALL_IN_ONE_CONFIG_CONFIGMAP),
        config_map_admin: resource_name(&name, suffix::ALL_IN_ONE_ADMIN_CONFIGMAP),
        config_map_portal: resource_name(&name, suffix::ALL_IN_ONE_PORTAL_CONFIGMAP),
        sql_script: resource_name(&name, suffix::ALL_IN_ONE_SQL_SCRIPT),
        db_service: resource_name(&name, suffix::ALL_IN_ONE_DB_SERVICE),
        config_service: resource_name(&name, suffix::ALL_IN_ONE_CONFIG_SERVICE),
        admin_service: resource_name(&name, suffix::ALL_IN_ONE_ADMIN_SERVICE),
        portal_service: resource_name(&name, suffix::ALL_IN_ONE_PORTAL_SERVICE),
        data_volume: resource_name(&name, suffix::ALL_IN_ONE_PVC),
    }
}

fn datasource_for(apollo: &Apollo, n: &Names, db_name: Option<&str>) -> Vec<String> {
    let db = &apollo.spec.database;
    let namespace = apollo.namespace().unwrap_or_default();
    datasource(
        &db.username,
        &db.password,
        &db.jdbc_url(&n.db_service, &namespace, db_name.unwrap_or_default()),
    )
}

/// Explicit meta servers, or every portal environment served by the
/// bundled config service
fn meta_servers(apollo: &Apollo, n: &Names) -> BTreeMap<String, String> {
    let config = &apollo.spec.portal_service.config;
    if !config.meta_servers.is_empty() {
        return config.meta_servers.clone();
    }
    let namespace = apollo.namespace().unwrap_or_default();
    let address = service_url(
        &n.config_service,
        &namespace,
        apollo.spec.config_service.workload.service_port(),
        apollo.spec.config_service.context_path(),
    );
    config
        .envs
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|env| !env.is_empty())
        .map(|env| (env.to_string(), address.clone()))
        .collect()
}

fn config_service_config(apollo: &Apollo, n: &Names) -> ConfigMap {
    let spec = &apollo.spec;
    let namespace = apollo.namespace().unwrap_or_default();
    let mut lines = datasource_for(apollo, n, spec.database.config_db_name.as_deref());
    lines.push(format!(
        "apollo.config-service.url = {}",
        service_url(
            &n.config_service,
            &namespace,
            spec.config_service.workload.service_port(),
            spec.config_service.context_path(),
        )
    ));
    lines.push(format!(
        "apollo.admin-service.url = {}",
        service_url(
            &n.admin_service,
            &namespace,
            spec.admin_service.workload.service_port(),
            spec.admin_service.context_path(),
        )
    ));
    lines.extend(context_path_line(spec.config_service.context_path()));
    config_map(
        apollo,
        &n.config_map_config,
        BTreeMap::from([(APPLICATION_PROPERTIES.to_string(), properties(&lines))]),
    )
}

fn admin_service_config(apollo: &Apollo, n: &Names) -> ConfigMap {
    let spec = &apollo.spec;
    let mut lines = datasource_for(apollo, n, spec.database.config_db_name.as_deref());
    lines.extend(context_path_line(spec.admin_service.context_path()));
    config_map(
        apollo,
        &n.config_map_admin,
        BTreeMap::from([(APPLICATION_PROPERTIES.to_string(), properties(&lines))]),
    )
}

fn portal_config(apollo: &Apollo, n: &Names) -> ConfigMap {
    let spec = &apollo.spec;
    let mut application = datasource_for(apollo, n, spec.database.portal_db_name.as_deref());
    application.extend(portal_lines(&spec.portal_service.config));
    config_map(
        apollo,
        &n.config_map_portal,
        portal_files(
            &meta_servers(apollo, n),
            application,
            &spec.portal_service.config.files,
        ),
    )
}

fn sql_scripts(apollo: &Apollo, n: &Names) -> Option<ConfigMap> {
    let scripts = &apollo.spec.database.init_scripts;
    if scripts.is_empty() {
        return None;
    }
    let data = scripts
        .iter()
        .map(|s| (s.name.clone(), s.content.clone()))
        .collect();
    Some(config_map(apollo, &n.sql_script, data))
}

/// Headless governing service of the database pods
fn database_service(apollo: &Apollo, n: &Names) -> Service {
    let port = apollo.spec.database.port();
    Service {
        metadata: object_meta(apollo, &n.db_service),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            ports: Some(vec![ServicePort {
                name: Some(DATABASE_PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            selector: Some(role_selector_labels(apollo, DATABASE_ROLE)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn database(apollo: &Apollo, n: &Names) -> StatefulSet {
    let db = &apollo.spec.database;
    let selector = role_selector_labels(apollo, DATABASE_ROLE);
    let port = db.port();

    let env = [
        ("MYSQL_ROOT_PASSWORD", &db.root_password),
        ("MYSQL_USER", &db.username),
        ("MYSQL_PASSWORD", &db.password),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value.clone()),
        ..Default::default()
    })
    .collect();

    let mut mounts = vec![VolumeMount {
        name: n.data_volume.clone(),
        mount_path: DATABASE_DATA_DIR.to_string(),
        ..Default::default()
    }];
    let mut volumes = Vec::new();
    if !db.init_scripts.is_empty() {
        mounts.push(VolumeMount {
            name: n.sql_script.clone(),
            mount_path: DATABASE_INIT_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        volumes.push(Volume {
            name: n.sql_script.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: n.sql_script.clone().into(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let container = Container {
        name: DATABASE_ROLE.to_ascii_lowercase(),
        image: db.image.clone(),
        image_pull_policy: db.image_pull_policy.clone(),
        ports: Some(vec![ContainerPort {
            name: Some(DATABASE_PORT_NAME.to_string()),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env),
        volume_mounts: Some(mounts),
        liveness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(port),
                ..Default::default()
            }),
            initial_delay_seconds: Some(30),
            period_seconds: Some(10),
            ..Default::default()
        }),
        resources: db.resources.clone(),
        ..Default::default()
    };

    let claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(n.data_volume.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: db.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(db.storage.clone().unwrap_or_default()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let name = resource_name(&apollo.name_any(), suffix::ALL_IN_ONE_STATEFULSET);
    StatefulSet {
        metadata: object_meta(apollo, &name),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: n.db_service.clone().into(),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: non_empty(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![claim]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl DesiredState for Apollo {
    fn config_maps(&self) -> Vec<ConfigMap> {
        let n = names(self);
        collect_some([
            Some(config_service_config(self, &n)),
            Some(admin_service_config(self, &n)),
            Some(portal_config(self, &n)),
            sql_scripts(self, &n),
        ])
    }

    fn services(&self) -> Vec<Service> {
        let n = names(self);
        let spec = &self.spec;
        vec![
            database_service(self, &n),
            role_service(
                self,
                &n.config_service,
                CONFIG_ROLE,
                &spec.config_service.workload,
            ),
            role_service(
                self,
                &n.admin_service,
                ADMIN_ROLE,
                &spec.admin_service.workload,
            ),
            role_service(
                self,
                &n.portal_service,
                PORTAL_ROLE,
                &spec.portal_service.workload,
            ),
        ]
    }

    fn deployments(&self) -> Vec<Deployment> {
        let n = names(self);
        let name = self.name_any();
        let spec = &self.spec;
        let portal = &spec.portal_service;

        let mut portal_mounts = vec![
            APOLLO_ENV_PROPERTIES.to_string(),
            APPLICATION_PROPERTIES.to_string(),
        ];
        portal_mounts.extend(portal.config.files.iter().map(|f| f.name.clone()));

        vec![
            role_deployment(
                self,
                &resource_name(&name, suffix::ALL_IN_ONE_CONFIG_DEPLOYMENT),
                &RolePod {
                    role: CONFIG_ROLE,
                    config_map: &n.config_map_config,
                    mount_dir: CONFIG_MOUNT_DIR,
                    files: vec![APPLICATION_PROPERTIES.to_string()],
                    profiles: spec.config_service.config.profiles.as_deref().unwrap_or_default(),
                    context_path: spec.config_service.context_path(),
                    workload: &spec.config_service.workload,
                },
            ),
            role_deployment(
                self,
                &resource_name(&name, suffix::ALL_IN_ONE_ADMIN_DEPLOYMENT),
                &RolePod {
                    role: ADMIN_ROLE,
                    config_map: &n.config_map_admin,
                    mount_dir: ADMIN_MOUNT_DIR,
                    files: vec![APPLICATION_PROPERTIES.to_string()],
                    profiles: spec.admin_service.config.profiles.as_deref().unwrap_or_default(),
                    context_path: spec.admin_service.context_path(),
                    workload: &spec.admin_service.workload,
                },
            ),
            role_deployment(
                self,
                &resource_name(&name, suffix::ALL_IN_ONE_PORTAL_DEPLOYMENT),
                &RolePod {
                    role: PORTAL_ROLE,
                    config_map: &n.config_map_portal,
                    mount_dir: PORTAL_MOUNT_DIR,
                    files: portal_mounts,
                    profiles: portal.config.profiles.as_deref().unwrap_or_default(),
                    context_path: portal.config.context_path(),
                    workload: &portal.workload,
                },
            ),
        ]
    }

    fn stateful_sets(&self) -> Vec<StatefulSet> {
        vec![database(self, &names(self))]
    }

    fn ingresses(&self) -> Vec<Ingress> {
        let n = names(self);
        let name = self.name_any();
        let spec = &self.spec;
        collect_some([
            role_ingress(
                self,
                &resource_name(&name, suffix::ALL_IN_ONE_CONFIG_INGRESS),
                &n.config_service,
                spec.config_service.workload.service_port(),
                spec.config_service.ingress.as_ref(),
            ),
            role_ingress(
                self,
                &resource_name(&name, suffix::ALL_IN_ONE_ADMIN_INGRESS),
                &n.admin_service,
                spec.admin_service.workload.service_port(),
                spec.admin_service.ingress.as_ref(),
            ),
            role_ingress(
                self,
                &resource_name(&name, suffix::ALL_IN_ONE_PORTAL_INGRESS),
                &n.portal_service,
                spec.portal_service.workload.service_port(),
                spec.portal_service.ingress.as_ref(),
            ),
        ])
    }
}
