//! ApolloEnvironment: config and admin services over an external database

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;

use apollo_common::crd::{ApolloEnvironment, APPLICATION_PROPERTIES};
use apollo_common::naming::{resource_name, suffix};

use super::workload::{
    config_map, context_path_line, database_endpoints, database_service, datasource, properties,
    role_deployment, role_ingress, role_service, service_url, RolePod,
};
use super::{collect_some, DesiredState};

pub(crate) const CONFIG_ROLE: &str = "configService";
pub(crate) const ADMIN_ROLE: &str = "adminService";
pub(crate) const CONFIG_MOUNT_DIR: &str = "/apollo-configservice/config";
pub(crate) const ADMIN_MOUNT_DIR: &str = "/apollo-adminservice/config";

struct Names {
    config_map_config: String,
    config_map_admin: String,
    db_service: String,
    config_service: String,
    admin_service: String,
}

fn names(env: &ApolloEnvironment) -> Names {
    let name = env.name_any();
    Names {
        config_map_config: resource_name(&name, suffix::CONFIG_CONFIGMAP),
        config_map_admin: resource_name(&name, suffix::ADMIN_CONFIGMAP),
        db_service: resource_name(&name, suffix::CONFIG_DB_SERVICE),
        config_service: resource_name(&name, suffix::CONFIG_SERVICE),
        admin_service: resource_name(&name, suffix::ADMIN_SERVICE),
    }
}

fn database_lines(env: &ApolloEnvironment, n: &Names) -> Vec<String> {
    let db = &env.spec.config_db;
    let namespace = env.namespace().unwrap_or_default();
    datasource(
        &db.username,
        &db.password,
        &db.jdbc_url(&n.db_service, &namespace),
    )
}

fn config_service_config(env: &ApolloEnvironment, n: &Names) -> ConfigMap {
    let spec = &env.spec;
    let namespace = env.namespace().unwrap_or_default();
    let mut lines = database_lines(env, n);
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
        env,
        &n.config_map_config,
        BTreeMap::from([(APPLICATION_PROPERTIES.to_string(), properties(&lines))]),
    )
}

fn admin_service_config(env: &ApolloEnvironment, n: &Names) -> ConfigMap {
    let mut lines = database_lines(env, n);
    lines.extend(context_path_line(env.spec.admin_service.context_path()));
    config_map(
        env,
        &n.config_map_admin,
        BTreeMap::from([(APPLICATION_PROPERTIES.to_string(), properties(&lines))]),
    )
}

impl DesiredState for ApolloEnvironment {
    fn config_maps(&self) -> Vec<ConfigMap> {
        let n = names(self);
        vec![
            config_service_config(self, &n),
            admin_service_config(self, &n),
        ]
    }

    fn endpoints(&self) -> Vec<Endpoints> {
        let n = names(self);
        collect_some([database_endpoints(self, &n.db_service, &self.spec.config_db)])
    }

    fn services(&self) -> Vec<Service> {
        let n = names(self);
        vec![
            database_service(self, &n.db_service, &self.spec.config_db),
            role_service(
                self,
                &n.config_service,
                CONFIG_ROLE,
                &self.spec.config_service.workload,
            ),
            role_service(
                self,
                &n.admin_service,
                ADMIN_ROLE,
                &self.spec.admin_service.workload,
            ),
        ]
    }

    fn deployments(&self) -> Vec<Deployment> {
        let n = names(self);
        let name = self.name_any();
        let config = &self.spec.config_service;
        let admin = &self.spec.admin_service;
        vec![
            role_deployment(
                self,
                &resource_name(&name, suffix::CONFIG_DEPLOYMENT),
                &RolePod {
                    role: CONFIG_ROLE,
                    config_map: &n.config_map_config,
                    mount_dir: CONFIG_MOUNT_DIR,
                    files: vec![APPLICATION_PROPERTIES.to_string()],
                    profiles: config.config.profiles.as_deref().unwrap_or_default(),
                    context_path: config.context_path(),
                    workload: &config.workload,
                },
            ),
            role_deployment(
                self,
                &resource_name(&name, suffix::ADMIN_DEPLOYMENT),
                &RolePod {
                    role: ADMIN_ROLE,
                    config_map: &n.config_map_admin,
                    mount_dir: ADMIN_MOUNT_DIR,
                    files: vec![APPLICATION_PROPERTIES.to_string()],
                    profiles: admin.config.profiles.as_deref().unwrap_or_default(),
                    context_path: admin.context_path(),
                    workload: &admin.workload,
                },
            ),
        ]
    }

    fn ingresses(&self) -> Vec<Ingress> {
        let n = names(self);
        let name = self.name_any();
        let config = &self.spec.config_service;
        let admin = &self.spec.admin_service;
        collect_some([
            role_ingress(
                self,
                &resource_name(&name, suffix::CONFIG_INGRESS),
                &n.config_service,
                config.workload.service_port(),
                config.ingress.as_ref(),
            ),
            role_ingress(
                self,
                &resource_name(&name, suffix::ADMIN_INGRESS),
                &n.admin_service,
                admin.workload.service_port(),
                admin.ingress.as_ref(),
            ),
        ])
    }
}
