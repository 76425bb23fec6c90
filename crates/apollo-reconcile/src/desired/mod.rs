//! Desired-state builders
//!
//! Pure functions from a defaulted instance to the objects it should own,
//! one list per managed kind. Builders never read the cluster; names depend
//! only on the instance name and a fixed role suffix.

mod all_in_one;
mod environment;
mod portal;
pub(crate) mod workload;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;

use crate::instance::Instance;

/// The objects one instance variant wants, per kind.
///
/// Kinds a variant does not manage keep the empty default, which makes the
/// garbage collector remove any leftovers.
pub trait DesiredState {
    /// Config maps
    fn config_maps(&self) -> Vec<ConfigMap> {
        Vec::new()
    }

    /// Endpoints of external databases
    fn endpoints(&self) -> Vec<Endpoints> {
        Vec::new()
    }

    /// Services
    fn services(&self) -> Vec<Service> {
        Vec::new()
    }

    /// Deployments
    fn deployments(&self) -> Vec<Deployment> {
        Vec::new()
    }

    /// Stateful sets
    fn stateful_sets(&self) -> Vec<StatefulSet> {
        Vec::new()
    }

    /// Ingresses
    fn ingresses(&self) -> Vec<Ingress> {
        Vec::new()
    }
}

/// Concatenate the non-empty results of `builders`, in order
pub(crate) fn collect_some<T>(builders: impl IntoIterator<Item = Option<T>>) -> Vec<T> {
    builders.into_iter().flatten().collect()
}

impl DesiredState for Instance {
    fn config_maps(&self) -> Vec<ConfigMap> {
        match self {
            Self::Environment(i) => i.config_maps(),
            Self::Portal(i) => i.config_maps(),
            Self::AllInOne(i) => i.config_maps(),
        }
    }

    fn endpoints(&self) -> Vec<Endpoints> {
        match self {
            Self::Environment(i) => i.endpoints(),
            Self::Portal(i) => i.endpoints(),
            Self::AllInOne(i) => i.endpoints(),
        }
    }

    fn services(&self) -> Vec<Service> {
        match self {
            Self::Environment(i) => i.services(),
            Self::Portal(i) => i.services(),
            Self::AllInOne(i) => i.services(),
        }
    }

    fn deployments(&self) -> Vec<Deployment> {
        match self {
            Self::Environment(i) => i.deployments(),
            Self::Portal(i) => i.deployments(),
            Self::AllInOne(i) => i.deployments(),
        }
    }

    fn stateful_sets(&self) -> Vec<StatefulSet> {
        match self {
            Self::Environment(i) => i.stateful_sets(),
            Self::Portal(i) => i.stateful_sets(),
            Self::AllInOne(i) => i.stateful_sets(),
        }
    }

    fn ingresses(&self) -> Vec<Ingress> {
        match self {
            Self::Environment(i) => i.ingresses(),
            Self::Portal(i) => i.ingresses(),
            Self::AllInOne(i) => i.ingresses(),
        }
    }
}
