//! ApolloPortal CRD
//!
//! The management portal, backed by an external portal database. The portal
//! is not exposed through an Ingress by the operator.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApolloStatus, DatabaseSpec, PortalConfig, WorkloadSpec};
use crate::Result;

/// Default portal image
pub const DEFAULT_PORTAL_IMAGE: &str = "apolloconfig/apollo-portal:2.1.0";
/// Default portal port
pub const DEFAULT_PORTAL_PORT: i32 = 8070;
/// Default portal Spring profiles
pub const DEFAULT_PORTAL_PROFILES: &str = "github,auth";
/// Default environment list
pub const DEFAULT_PORTAL_ENVS: &str = "dev";
/// Default portal database schema
pub const DEFAULT_PORTAL_DB_NAME: &str = "ApolloPortalDB";

/// Specification for an ApolloPortal
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apolloconfig.com",
    version = "v1alpha1",
    kind = "ApolloPortal",
    plural = "apolloportals",
    shortname = "apolloportal",
    namespaced,
    status = "ApolloStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApolloPortalSpec {
    /// Workload settings
    #[serde(flatten)]
    pub workload: WorkloadSpec,

    /// Portal settings
    #[serde(default)]
    pub config: PortalConfig,

    /// External portal database
    #[serde(default, rename = "portaldb")]
    pub portal_db: DatabaseSpec,
}

impl ApolloPortalSpec {
    /// Fill every unset defaultable field
    pub fn apply_defaults(&mut self) {
        self.workload
            .apply_defaults(DEFAULT_PORTAL_IMAGE, DEFAULT_PORTAL_PORT);
        self.config
            .apply_defaults(DEFAULT_PORTAL_PROFILES, DEFAULT_PORTAL_ENVS);
        self.portal_db.apply_defaults(DEFAULT_PORTAL_DB_NAME);
    }

    /// Reject specs the builders cannot turn into valid objects
    pub fn validate(&self, instance: &str) -> Result<()> {
        self.workload.validate(instance, "spec")?;
        self.config.validate(instance, "spec.config")?;
        self.portal_db.validate(instance, "spec.portaldb")
    }
}
