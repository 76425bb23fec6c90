//! Building blocks shared by the three instance CRDs

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::apps::v1::DeploymentStrategy;
use k8s_openapi::api::core::v1::{
    Affinity, EnvVar, LocalObjectReference, Probe, ResourceRequirements, Toleration,
};
use k8s_openapi::api::networking::v1::IngressTLS;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Service type that resolves to an external DNS name instead of endpoints
pub const SERVICE_TYPE_EXTERNAL_NAME: &str = "ExternalName";

/// Generated properties file mounted into every Apollo service
pub const APPLICATION_PROPERTIES: &str = "application-github.properties";
/// Generated meta-server map mounted into the portal
pub const APOLLO_ENV_PROPERTIES: &str = "apollo-env.properties";

pub(crate) mod defaults {
    pub const IMAGE_PULL_POLICY: &str = "IfNotPresent";
    pub const REPLICAS: i32 = 1;
    pub const SERVICE_TYPE: &str = "ClusterIP";
    pub const DB_PORT: i32 = 3306;
    pub const CONNECTION_PROPERTIES: &str = "characterEncoding=utf8";
    pub const LIVENESS_INITIAL_DELAY: i32 = 100;
    pub const LIVENESS_PERIOD: i32 = 10;
    pub const READINESS_INITIAL_DELAY: i32 = 30;
    pub const READINESS_PERIOD: i32 = 5;
}

/// How a role's network service is exposed
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceExposure {
    /// Service port (defaults to the container port)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Target port on the pod (defaults to the container port)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,

    /// Kubernetes service type (defaults to ClusterIP)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Session affinity (None or ClientIP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_affinity: Option<String>,
}

impl ServiceExposure {
    fn apply_defaults(&mut self, container_port: i32) {
        self.port.get_or_insert(container_port);
        self.target_port.get_or_insert(container_port);
        self.type_
            .get_or_insert_with(|| defaults::SERVICE_TYPE.to_string());
    }
}

/// Service in front of an external database
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseServiceSpec {
    /// Port the in-cluster service listens on (defaults to the database port)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Service type; `ExternalName` routes by DNS to `host` instead of
    /// through an Endpoints record
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Connection parameters of an external MySQL database
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Database user
    #[serde(default)]
    pub username: String,

    /// Database password
    #[serde(default)]
    pub password: String,

    /// IP address (or DNS name for `ExternalName` services) of the database
    #[serde(default)]
    pub host: String,

    /// Database port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Schema name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,

    /// Query string appended to the JDBC URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string_properties: Option<String>,

    /// In-cluster service fronting the database
    #[serde(default)]
    pub service: DatabaseServiceSpec,
}

impl DatabaseSpec {
    pub(crate) fn apply_defaults(&mut self, db_name: &str) {
        let port = *self.port.get_or_insert(defaults::DB_PORT);
        self.db_name.get_or_insert_with(|| db_name.to_string());
        self.connection_string_properties
            .get_or_insert_with(|| defaults::CONNECTION_PROPERTIES.to_string());
        self.service.port.get_or_insert(port);
        self.service
            .type_
            .get_or_insert_with(|| defaults::SERVICE_TYPE.to_string());
    }

    pub(crate) fn validate(&self, instance: &str, field: &str) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::validation_for_field(
                instance,
                format!("{field}.host"),
                "database host must not be empty",
            ));
        }
        if self.username.is_empty() {
            return Err(Error::validation_for_field(
                instance,
                format!("{field}.username"),
                "database username must not be empty",
            ));
        }
        validate_port(instance, &format!("{field}.port"), self.port)?;
        validate_port(instance, &format!("{field}.service.port"), self.service.port)
    }

    /// Whether the fronting service resolves by DNS rather than endpoints
    pub fn is_external_name(&self) -> bool {
        self.service.type_.as_deref() == Some(SERVICE_TYPE_EXTERNAL_NAME)
    }

    /// JDBC URL through the in-cluster service `service_name`
    pub fn jdbc_url(&self, service_name: &str, namespace: &str) -> String {
        format!(
            "jdbc:mysql://{}.{}:{}/{}?{}",
            service_name,
            namespace,
            self.service.port.or(self.port).unwrap_or(defaults::DB_PORT),
            self.db_name.as_deref().unwrap_or_default(),
            self.connection_string_properties
                .as_deref()
                .unwrap_or_default(),
        )
    }
}

/// An extra file mounted next to the generated properties
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// File name (also the ConfigMap key)
    pub name: String,

    /// File content
    #[serde(default)]
    pub content: String,
}

/// Probe timing; handlers are always generated by the operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSpec {
    /// Liveness probe timing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    /// Readiness probe timing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,
}

impl ProbeSpec {
    fn apply_defaults(&mut self) {
        self.liveness_probe.get_or_insert_with(|| Probe {
            initial_delay_seconds: Some(defaults::LIVENESS_INITIAL_DELAY),
            period_seconds: Some(defaults::LIVENESS_PERIOD),
            ..Default::default()
        });
        self.readiness_probe.get_or_insert_with(|| Probe {
            initial_delay_seconds: Some(defaults::READINESS_INITIAL_DELAY),
            period_seconds: Some(defaults::READINESS_PERIOD),
            ..Default::default()
        });
    }
}

/// Ingress exposure of a role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressExposure {
    /// Annotations copied onto the Ingress
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Hosts routed to the role's service; no hosts means no Ingress
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,

    /// TLS configuration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<IngressTLS>,

    /// Ingress class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
}

/// Pod-level settings common to every Apollo role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// Container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image pull policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Port the application listens on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<i32>,

    /// Deployment rollout strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DeploymentStrategy>,

    /// Extra environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Network service exposure
    #[serde(default)]
    pub service: ServiceExposure,

    /// Compute resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Probe timing
    #[serde(default)]
    pub probe: ProbeSpec,

    /// Node selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Affinity rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Tolerations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

impl WorkloadSpec {
    pub(crate) fn apply_defaults(&mut self, image: &str, container_port: i32) {
        self.image.get_or_insert_with(|| image.to_string());
        self.image_pull_policy
            .get_or_insert_with(|| defaults::IMAGE_PULL_POLICY.to_string());
        self.replicas.get_or_insert(defaults::REPLICAS);
        let port = *self.container_port.get_or_insert(container_port);
        self.service.apply_defaults(port);
        self.probe.apply_defaults();
    }

    pub(crate) fn validate(&self, instance: &str, field: &str) -> Result<()> {
        if matches!(self.replicas, Some(r) if r < 0) {
            return Err(Error::validation_for_field(
                instance,
                format!("{field}.replicas"),
                "replicas must not be negative",
            ));
        }
        validate_port(instance, &format!("{field}.containerPort"), self.container_port)?;
        validate_port(instance, &format!("{field}.service.port"), self.service.port)?;
        validate_port(
            instance,
            &format!("{field}.service.targetPort"),
            self.service.target_port,
        )
    }

    /// Container port after defaulting
    pub fn port(&self) -> i32 {
        self.container_port.unwrap_or_default()
    }

    /// Service port after defaulting
    pub fn service_port(&self) -> i32 {
        self.service.port.unwrap_or_else(|| self.port())
    }
}

/// Spring settings of the config and admin services
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Active Spring profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<String>,

    /// Servlet context path (e.g. "/config")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_path: Option<String>,
}

/// A config or admin service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRoleSpec {
    /// Workload settings
    #[serde(flatten)]
    pub workload: WorkloadSpec,

    /// Spring settings
    #[serde(default)]
    pub config: ServiceConfig,

    /// Optional ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressExposure>,
}

impl ServiceRoleSpec {
    pub(crate) fn apply_defaults(&mut self, image: &str, container_port: i32, profiles: &str) {
        self.workload.apply_defaults(image, container_port);
        self.config
            .profiles
            .get_or_insert_with(|| profiles.to_string());
    }

    /// Context path, empty when serving at the root
    pub fn context_path(&self) -> &str {
        self.config.context_path.as_deref().unwrap_or_default()
    }
}

/// Portal settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
    /// Comma separated list of environments the portal manages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envs: Option<String>,

    /// Meta server address per environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta_servers: BTreeMap<String, String>,

    /// Active Spring profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<String>,

    /// Servlet context path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_path: Option<String>,

    /// Extra files mounted next to the generated properties
    #[serde(default, rename = "file", skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ConfigFile>,
}

impl PortalConfig {
    pub(crate) fn apply_defaults(&mut self, profiles: &str, envs: &str) {
        self.profiles.get_or_insert_with(|| profiles.to_string());
        self.envs.get_or_insert_with(|| envs.to_string());
    }

    pub(crate) fn validate(&self, instance: &str, field: &str) -> Result<()> {
        let mut seen = BTreeSet::new();
        for file in &self.files {
            if file.name.is_empty() {
                return Err(Error::validation_for_field(
                    instance,
                    format!("{field}.file"),
                    "config file name must not be empty",
                ));
            }
            if file.name == APPLICATION_PROPERTIES || file.name == APOLLO_ENV_PROPERTIES {
                return Err(Error::validation_for_field(
                    instance,
                    format!("{field}.file"),
                    format!("config file {} would shadow a generated file", file.name),
                ));
            }
            if !seen.insert(file.name.as_str()) {
                return Err(Error::validation_for_field(
                    instance,
                    format!("{field}.file"),
                    format!("duplicate config file {}", file.name),
                ));
            }
        }
        Ok(())
    }

    /// Context path, empty when serving at the root
    pub fn context_path(&self) -> &str {
        self.context_path.as_deref().unwrap_or_default()
    }
}

fn validate_port(instance: &str, field: &str, port: Option<i32>) -> Result<()> {
    match port {
        Some(p) if !(1..=65535).contains(&p) => Err(Error::validation_for_field(
            instance,
            field,
            format!("port {p} is outside 1-65535"),
        )),
        _ => Ok(()),
    }
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle phase of an instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Phase {
    /// Not reconciled yet
    #[default]
    Pending,
    /// Every managed resource converged
    Ready,
    /// Spec rejected by validation
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Ready => write!(f, "Ready"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

/// Status shared by all instance kinds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApolloStatus {
    /// Current phase
    #[serde(default)]
    pub phase: Phase,

    /// Generation the phase was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable detail (validation failures)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApolloStatus {
    /// Status of a fully converged instance at `generation`
    pub fn ready(generation: Option<i64>) -> Self {
        Self {
            phase: Phase::Ready,
            observed_generation: generation,
            message: None,
        }
    }

    /// Status of an instance whose spec was rejected
    pub fn failed(generation: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            phase: Phase::Failed,
            observed_generation: generation,
            message: Some(message.into()),
        }
    }
}
