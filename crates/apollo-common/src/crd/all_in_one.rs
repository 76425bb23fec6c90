//! Apollo (all-in-one) CRD
//!
//! Config service, admin service and portal in one instance, with a bundled
//! MySQL stateful set instead of external databases.

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::environment::{
    DEFAULT_ADMIN_SERVICE_IMAGE, DEFAULT_ADMIN_SERVICE_PORT, DEFAULT_CONFIG_DB_NAME,
    DEFAULT_CONFIG_SERVICE_IMAGE, DEFAULT_CONFIG_SERVICE_PORT, DEFAULT_SERVICE_PROFILES,
};
use super::portal::{
    DEFAULT_PORTAL_DB_NAME, DEFAULT_PORTAL_ENVS, DEFAULT_PORTAL_IMAGE, DEFAULT_PORTAL_PORT,
    DEFAULT_PORTAL_PROFILES,
};
use super::types::{
    defaults, ApolloStatus, ConfigFile, IngressExposure, PortalConfig, ServiceRoleSpec,
    WorkloadSpec,
};
use crate::{Error, Result};

/// Default bundled database image
pub const DEFAULT_DATABASE_IMAGE: &str = "mysql:8.0";
/// Default bundled database volume size
pub const DEFAULT_DATABASE_STORAGE: &str = "1Gi";

/// Specification for an all-in-one Apollo
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apolloconfig.com",
    version = "v1alpha1",
    kind = "Apollo",
    plural = "apollos",
    shortname = "apollo",
    namespaced,
    status = "ApolloStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApolloSpec {
    /// Config service
    #[serde(default)]
    pub config_service: ServiceRoleSpec,

    /// Admin service
    #[serde(default)]
    pub admin_service: ServiceRoleSpec,

    /// Portal
    #[serde(default)]
    pub portal_service: AllInOnePortalSpec,

    /// Bundled MySQL
    #[serde(default)]
    pub database: BundledDatabaseSpec,
}

/// Portal of an all-in-one instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllInOnePortalSpec {
    /// Workload settings
    #[serde(flatten)]
    pub workload: WorkloadSpec,

    /// Portal settings; meta servers default to the bundled config service
    #[serde(default)]
    pub config: PortalConfig,

    /// Optional ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressExposure>,
}

/// MySQL run by the operator for an all-in-one instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundledDatabaseSpec {
    /// MySQL image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image pull policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Root password
    #[serde(default)]
    pub root_password: String,

    /// Application user created on first start
    #[serde(default)]
    pub username: String,

    /// Application user password
    #[serde(default)]
    pub password: String,

    /// MySQL port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Config database schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_db_name: Option<String>,

    /// Portal database schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_db_name: Option<String>,

    /// Query string appended to the JDBC URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string_properties: Option<String>,

    /// Requested volume size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,

    /// Storage class of the data volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Compute resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// SQL scripts run on first start (schema creation)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_scripts: Vec<ConfigFile>,
}

impl BundledDatabaseSpec {
    fn apply_defaults(&mut self) {
        self.image
            .get_or_insert_with(|| DEFAULT_DATABASE_IMAGE.to_string());
        self.image_pull_policy
            .get_or_insert_with(|| defaults::IMAGE_PULL_POLICY.to_string());
        self.port.get_or_insert(defaults::DB_PORT);
        self.config_db_name
            .get_or_insert_with(|| DEFAULT_CONFIG_DB_NAME.to_string());
        self.portal_db_name
            .get_or_insert_with(|| DEFAULT_PORTAL_DB_NAME.to_string());
        self.connection_string_properties
            .get_or_insert_with(|| defaults::CONNECTION_PROPERTIES.to_string());
        self.storage
            .get_or_insert_with(|| DEFAULT_DATABASE_STORAGE.to_string());
    }

    /// Port after defaulting
    pub fn port(&self) -> i32 {
        self.port.unwrap_or(defaults::DB_PORT)
    }

    /// JDBC URL for `db_name` through the governing service
    pub fn jdbc_url(&self, service_name: &str, namespace: &str, db_name: &str) -> String {
        format!(
            "jdbc:mysql://{}.{}:{}/{}?{}",
            service_name,
            namespace,
            self.port(),
            db_name,
            self.connection_string_properties
                .as_deref()
                .unwrap_or_default(),
        )
    }
}

impl ApolloSpec {
    /// Fill every unset defaultable field
    pub fn apply_defaults(&mut self) {
        self.config_service.apply_defaults(
            DEFAULT_CONFIG_SERVICE_IMAGE,
            DEFAULT_CONFIG_SERVICE_PORT,
            DEFAULT_SERVICE_PROFILES,
        );
        self.admin_service.apply_defaults(
            DEFAULT_ADMIN_SERVICE_IMAGE,
            DEFAULT_ADMIN_SERVICE_PORT,
            DEFAULT_SERVICE_PROFILES,
        );
        self.portal_service
            .workload
            .apply_defaults(DEFAULT_PORTAL_IMAGE, DEFAULT_PORTAL_PORT);
        self.portal_service
            .config
            .apply_defaults(DEFAULT_PORTAL_PROFILES, DEFAULT_PORTAL_ENVS);
        self.database.apply_defaults();
    }

    /// Reject specs the builders cannot turn into valid objects
    pub fn validate(&self, instance: &str) -> Result<()> {
        self.config_service
            .workload
            .validate(instance, "spec.configService")?;
        self.admin_service
            .workload
            .validate(instance, "spec.adminService")?;
        self.portal_service
            .workload
            .validate(instance, "spec.portalService")?;
        self.portal_service
            .config
            .validate(instance, "spec.portalService.config")?;
        if self.database.root_password.is_empty() {
            return Err(Error::validation_for_field(
                instance,
                "spec.database.rootPassword",
                "bundled database needs a root password",
            ));
        }
        if self.database.username.is_empty() {
            return Err(Error::validation_for_field(
                instance,
                "spec.database.username",
                "bundled database needs an application user",
            ));
        }
        Ok(())
    }
}
