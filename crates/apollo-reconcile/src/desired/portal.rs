//! ApolloPortal: the portal over an external portal database

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Service};
use kube::ResourceExt;

use apollo_common::crd::{
    ApolloPortal, ConfigFile, PortalConfig, APOLLO_ENV_PROPERTIES, APPLICATION_PROPERTIES,
};
use apollo_common::naming::{resource_name, suffix};

use super::workload::{
    config_map, context_path_line, database_endpoints, database_service, datasource, properties,
    role_deployment, role_service, RolePod,
};
use super::{collect_some, DesiredState};

pub(crate) const PORTAL_ROLE: &str = "portalService";
pub(crate) const PORTAL_MOUNT_DIR: &str = "/apollo-portal/config";

/// `<env>.meta = <address>` lines, sorted by environment
pub(crate) fn meta_server_properties(meta_servers: &BTreeMap<String, String>) -> String {
    let lines: Vec<String> = meta_servers
        .iter()
        .map(|(env, address)| format!("{env}.meta = {address}"))
        .collect();
    properties(&lines)
}

/// Portal properties after the datasource lines
pub(crate) fn portal_lines(config: &PortalConfig) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(envs) = config.envs.as_deref().filter(|e| !e.is_empty()) {
        lines.push(format!("apollo.portal.envs = {envs}"));
    }
    lines.extend(context_path_line(config.context_path()));
    lines
}

/// Generated files plus the user's extra files
pub(crate) fn portal_files(
    meta_servers: &BTreeMap<String, String>,
    application: Vec<String>,
    extra: &[ConfigFile],
) -> BTreeMap<String, String> {
    let mut data = BTreeMap::from([
        (
            APOLLO_ENV_PROPERTIES.to_string(),
            meta_server_properties(meta_servers),
        ),
        (APPLICATION_PROPERTIES.to_string(), properties(&application)),
    ]);
    for file in extra {
        data.insert(file.name.clone(), file.content.clone());
    }
    data
}

fn config_map_name(portal: &ApolloPortal) -> String {
    resource_name(&portal.name_any(), suffix::PORTAL_CONFIGMAP)
}

fn db_service_name(portal: &ApolloPortal) -> String {
    resource_name(&portal.name_any(), suffix::PORTAL_DB_SERVICE)
}

impl DesiredState for ApolloPortal {
    fn config_maps(&self) -> Vec<ConfigMap> {
        let db = &self.spec.portal_db;
        let namespace = self.namespace().unwrap_or_default();
        let mut application = datasource(
            &db.username,
            &db.password,
            &db.jdbc_url(&db_service_name(self), &namespace),
        );
        application.extend(portal_lines(&self.spec.config));

        vec![config_map(
            self,
            &config_map_name(self),
            portal_files(
                &self.spec.config.meta_servers,
                application,
                &self.spec.config.files,
            ),
        )]
    }

    fn endpoints(&self) -> Vec<Endpoints> {
        collect_some([database_endpoints(
            self,
            &db_service_name(self),
            &self.spec.portal_db,
        )])
    }

    fn services(&self) -> Vec<Service> {
        vec![
            database_service(self, &db_service_name(self), &self.spec.portal_db),
            role_service(
                self,
                &resource_name(&self.name_any(), suffix::PORTAL_SERVICE),
                PORTAL_ROLE,
                &self.spec.workload,
            ),
        ]
    }

    fn deployments(&self) -> Vec<Deployment> {
        let config_map = config_map_name(self);
        let config = &self.spec.config;
        let mut files = vec![
            APOLLO_ENV_PROPERTIES.to_string(),
            APPLICATION_PROPERTIES.to_string(),
        ];
        files.extend(config.files.iter().map(|f| f.name.clone()));

        vec![role_deployment(
            self,
            &resource_name(&self.name_any(), suffix::PORTAL_DEPLOYMENT),
            &RolePod {
                role: PORTAL_ROLE,
                config_map: &config_map,
                mount_dir: PORTAL_MOUNT_DIR,
                files,
                profiles: config.profiles.as_deref().unwrap_or_default(),
                context_path: config.context_path(),
                workload: &self.spec.workload,
            },
        )]
    }
}
