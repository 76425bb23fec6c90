//! Custom Resource Definitions for the Apollo operator
//!
//! Three instance kinds share one status type and one set of building
//! blocks; they differ in which roles they run and where the databases live.

mod all_in_one;
mod environment;
mod portal;
mod types;

pub use all_in_one::{
    AllInOnePortalSpec, Apollo, ApolloSpec, BundledDatabaseSpec, DEFAULT_DATABASE_IMAGE,
    DEFAULT_DATABASE_STORAGE,
};
pub use environment::{ApolloEnvironment, ApolloEnvironmentSpec};
pub use portal::{ApolloPortal, ApolloPortalSpec};
pub use types::{
    ApolloStatus, ConfigFile, DatabaseServiceSpec, DatabaseSpec, IngressExposure, Phase,
    PortalConfig, ProbeSpec, ServiceConfig, ServiceExposure, ServiceRoleSpec, WorkloadSpec,
    APOLLO_ENV_PROPERTIES, APPLICATION_PROPERTIES, SERVICE_TYPE_EXTERNAL_NAME,
};
