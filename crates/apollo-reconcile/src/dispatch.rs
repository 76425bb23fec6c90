//! Per-variant task tables

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use tracing::instrument;

use apollo_common::Result;

use crate::context::ReconcileContext;
use crate::desired::DesiredState;
use crate::instance::Instance;
use crate::task::{KindStep, ServiceAccountStep, StatusStep, Task, TaskRunner};

fn config_maps_task() -> Task {
    Task::new(
        "configmaps",
        Arc::new(KindStep::<ConfigMap>::new(<Instance as DesiredState>::config_maps)),
    )
}

fn service_accounts_task() -> Task {
    Task::new("serviceaccounts", Arc::new(ServiceAccountStep))
}

fn endpoints_task() -> Task {
    Task::new(
        "endpoints",
        Arc::new(KindStep::<Endpoints>::new(<Instance as DesiredState>::endpoints)),
    )
}

fn services_task() -> Task {
    Task::new(
        "services",
        Arc::new(KindStep::<Service>::new(<Instance as DesiredState>::services)),
    )
}

fn deployments_task() -> Task {
    Task::new(
        "deployments",
        Arc::new(KindStep::<Deployment>::new(<Instance as DesiredState>::deployments)),
    )
}

fn stateful_sets_task() -> Task {
    Task::new(
        "statefulsets",
        Arc::new(KindStep::<StatefulSet>::new(<Instance as DesiredState>::stateful_sets)),
    )
}

fn ingresses_task() -> Task {
    Task::new(
        "ingresses",
        Arc::new(KindStep::<Ingress>::new(<Instance as DesiredState>::ingresses)),
    )
}

fn self_task() -> Task {
    Task::new("self", Arc::new(StatusStep))
}

/// Selects the task runner for an instance's variant
pub struct Dispatcher {
    environment: TaskRunner,
    portal: TaskRunner,
    all_in_one: TaskRunner,
}

impl Dispatcher {
    /// Dispatcher over explicitly configured runners
    pub fn new(environment: TaskRunner, portal: TaskRunner, all_in_one: TaskRunner) -> Self {
        Self {
            environment,
            portal,
            all_in_one,
        }
    }

    /// The standard task order for each variant.
    ///
    /// Environments and portals converge external database endpoints; the
    /// all-in-one variant runs its database as a stateful set instead.
    pub fn with_default_tasks() -> Self {
        let external_db = || {
            vec![
                config_maps_task(),
                service_accounts_task(),
                endpoints_task(),
                services_task(),
                deployments_task(),
                ingresses_task(),
                self_task(),
            ]
        };
        Self::new(
            TaskRunner::new(external_db()),
            TaskRunner::new(external_db()),
            TaskRunner::new(vec![
                config_maps_task(),
                service_accounts_task(),
                services_task(),
                deployments_task(),
                stateful_sets_task(),
                ingresses_task(),
                self_task(),
            ]),
        )
    }

    fn runner(&self, instance: &Instance) -> &TaskRunner {
        match instance {
            Instance::Environment(_) => &self.environment,
            Instance::Portal(_) => &self.portal,
            Instance::AllInOne(_) => &self.all_in_one,
        }
    }

    /// Run the variant's tasks for a defaulted, validated instance
    #[instrument(skip_all, fields(kind = instance.kind(), name = %instance.name()))]
    pub async fn dispatch(&self, instance: &Instance, ctx: &ReconcileContext) -> Result<()> {
        self.runner(instance).run(instance, ctx).await
    }
}
