//! ApolloEnvironment CRD
//!
//! One Apollo environment: a config service and an admin service sharing an
//! external config database.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApolloStatus, DatabaseSpec, ServiceRoleSpec};
use crate::Result;

/// Default config service image
pub const DEFAULT_CONFIG_SERVICE_IMAGE: &str = "apolloconfig/apollo-configservice:2.1.0";
/// Default admin service image
pub const DEFAULT_ADMIN_SERVICE_IMAGE: &str = "apolloconfig/apollo-adminservice:2.1.0";
/// Default config service port
pub const DEFAULT_CONFIG_SERVICE_PORT: i32 = 8080;
/// Default admin service port
pub const DEFAULT_ADMIN_SERVICE_PORT: i32 = 8090;
/// Default Spring profiles of the config and admin services
pub const DEFAULT_SERVICE_PROFILES: &str = "github,kubernetes";
/// Default config database schema
pub const DEFAULT_CONFIG_DB_NAME: &str = "ApolloConfigDB";

/// Specification for an ApolloEnvironment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apolloconfig.com",
    version = "v1alpha1",
    kind = "ApolloEnvironment",
    plural = "apolloenvironments",
    shortname = "apolloenv",
    namespaced,
    status = "ApolloStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApolloEnvironmentSpec {
    /// External config database
    #[serde(default, rename = "configdb")]
    pub config_db: DatabaseSpec,

    /// Config service (meta server + client config delivery)
    #[serde(default)]
    pub config_service: ServiceRoleSpec,

    /// Admin service (config management API used by the portal)
    #[serde(default)]
    pub admin_service: ServiceRoleSpec,
}

impl ApolloEnvironmentSpec {
    /// Fill every unset defaultable field
    pub fn apply_defaults(&mut self) {
        self.config_db.apply_defaults(DEFAULT_CONFIG_DB_NAME);
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
    }

    /// Reject specs the builders cannot turn into valid objects
    pub fn validate(&self, instance: &str) -> Result<()> {
        self.config_db.validate(instance, "spec.configdb")?;
        self.config_service
            .workload
            .validate(instance, "spec.configService")?;
        self.admin_service
            .workload
            .validate(instance, "spec.adminService")
    }
}
