//! Ordered reconcile tasks
//!
//! A [`TaskRunner`] runs its tasks strictly in order for one instance. The
//! task list is configured up front and only read while reconciling, so one
//! runner serves concurrent reconciles of different instances.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

#[cfg(test)]
use mockall::automock;

use apollo_common::crd::ApolloStatus;
use apollo_common::{Result, TaskStage};

use crate::context::ReconcileContext;
use crate::converge::{collect, converge};
use crate::instance::{Instance, Owner};
use crate::resource::ManagedResource;
use crate::status::write_if_changed;
use crate::store::{StoreFor, Stores};

/// One unit of reconcile work
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Step: Send + Sync {
    /// Run the step for a defaulted, validated instance
    async fn run(&self, instance: &Instance, owner: &Owner, ctx: &ReconcileContext) -> Result<()>;
}

/// A named step and its failure policy
#[derive(Clone)]
pub struct Task {
    /// Name used in logs and errors
    pub name: String,
    /// The work
    pub step: Arc<dyn Step>,
    /// Abort the remaining tasks when this one fails
    pub bail_on_error: bool,
}

impl Task {
    /// A task that aborts the pass on failure
    pub fn new(name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        Self {
            name: name.into(),
            step,
            bail_on_error: true,
        }
    }

    /// A task whose failure is logged and skipped
    pub fn best_effort(name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        Self {
            bail_on_error: false,
            ..Self::new(name, step)
        }
    }
}

/// Build, converge and collect one managed kind
pub struct KindStep<K> {
    build: fn(&Instance) -> Vec<K>,
    retry_on_race: bool,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KindStep<K> {
    /// Step converging the output of `build`, retrying a lost create race once
    pub fn new(build: fn(&Instance) -> Vec<K>) -> Self {
        Self {
            build,
            retry_on_race: true,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> Step for KindStep<K>
where
    K: ManagedResource,
    Stores: StoreFor<K>,
{
    async fn run(&self, instance: &Instance, owner: &Owner, ctx: &ReconcileContext) -> Result<()> {
        let kind = K::kind(&());
        let desired = (self.build)(instance);
        let store = StoreFor::<K>::store_for(&ctx.stores);

        converge(
            store,
            ctx.events.as_ref(),
            owner,
            &desired,
            self.retry_on_race,
        )
        .await
        .map_err(|e| e.in_task(kind.as_ref(), TaskStage::Converge))?;

        collect(store, owner, &desired)
            .await
            .map_err(|e| e.in_task(kind.as_ref(), TaskStage::Collect))
    }
}

/// Placeholder for per-instance service accounts; pods run as the
/// namespace default account
pub struct ServiceAccountStep;

#[async_trait]
impl Step for ServiceAccountStep {
    async fn run(&self, instance: &Instance, _owner: &Owner, _ctx: &ReconcileContext) -> Result<()> {
        debug!(instance = %instance.name(), "no service accounts to manage");
        Ok(())
    }
}

/// Record that every managed object converged
pub struct StatusStep;

#[async_trait]
impl Step for StatusStep {
    async fn run(&self, instance: &Instance, _owner: &Owner, ctx: &ReconcileContext) -> Result<()> {
        let status = ApolloStatus::ready(instance.generation());
        let written = write_if_changed(ctx.status.as_ref(), instance, status)
            .await
            .map_err(|e| e.in_task("status", TaskStage::Status))?;
        if written {
            info!(kind = instance.kind(), instance = %instance.name(), "instance ready");
        }
        Ok(())
    }
}

/// Runs an ordered task list for one instance at a time
#[derive(Default)]
pub struct TaskRunner {
    tasks: RwLock<Vec<Task>>,
}

impl TaskRunner {
    /// Runner over `tasks`, in order
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }

    /// Append a task
    pub async fn add_task(&self, task: Task) {
        self.tasks.write().await.push(task);
    }

    /// Names of the configured tasks, in order
    pub async fn task_names(&self) -> Vec<String> {
        self.tasks
            .read()
            .await
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    /// Run every task in order.
    ///
    /// A terminating namespace ends the pass successfully. Other failures
    /// are logged and abort the pass only for tasks that bail on error.
    pub async fn run(&self, instance: &Instance, ctx: &ReconcileContext) -> Result<()> {
        let owner = instance.owner()?;
        let tasks = self.tasks.read().await;
        for task in tasks.iter() {
            let Err(e) = task.step.run(instance, &owner, ctx).await else {
                continue;
            };
            if e.is_namespace_terminating() {
                info!(
                    task = %task.name,
                    namespace = %owner.namespace,
                    instance = %owner.name,
                    "namespace is terminating, stopping reconcile"
                );
                return Ok(());
            }
            error!(
                task = %task.name,
                instance = %owner.name,
                error = %e,
                "task failed"
            );
            if task.bail_on_error {
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use apollo_common::events::NoopEventPublisher;
    use apollo_common::Error;

    use crate::status::MockStatusWriter;
    use crate::testing::{test_environment, FakeStores};

    fn context(stores: &FakeStores) -> ReconcileContext {
        let mut status = MockStatusWriter::new();
        status.expect_write().returning(|_, _| Ok(()));
        ReconcileContext::new(
            stores.stores(),
            Arc::new(NoopEventPublisher),
            Arc::new(status),
        )
    }

    fn recording(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Step> {
        let mut step = MockStep::new();
        step.expect_run().returning(move |_, _, _| {
            log.lock().unwrap().push(name);
            Ok(())
        });
        Arc::new(step)
    }

    fn failing(err: fn() -> Error) -> Arc<dyn Step> {
        let mut step = MockStep::new();
        step.expect_run().returning(move |_, _, _| Err(err()));
        Arc::new(step)
    }

    fn instance() -> Instance {
        Instance::from(test_environment("demo"))
    }

    // =========================================================================
    // Story: Tasks run in configured order
    // =========================================================================

    #[tokio::test]
    async fn story_tasks_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = TaskRunner::new(vec![
            Task::new("configmaps", recording("configmaps", log.clone())),
            Task::new("services", recording("services", log.clone())),
        ]);
        runner
            .add_task(Task::new("self", recording("self", log.clone())))
            .await;

        runner
            .run(&instance(), &context(&FakeStores::new()))
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["configmaps", "services", "self"]);
    }

    // =========================================================================
    // Story: Failure policies
    // =========================================================================

    #[tokio::test]
    async fn story_bailing_task_stops_the_pass() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = TaskRunner::new(vec![
            Task::new("configmaps", failing(|| Error::internal("boom"))),
            Task::new("services", recording("services", log.clone())),
        ]);

        let err = runner
            .run(&instance(), &context(&FakeStores::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn story_best_effort_task_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = TaskRunner::new(vec![
            Task::best_effort("configmaps", failing(|| Error::internal("boom"))),
            Task::new("services", recording("services", log.clone())),
        ]);

        runner
            .run(&instance(), &context(&FakeStores::new()))
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["services"]);
    }

    #[tokio::test]
    async fn story_terminating_namespace_ends_the_pass_quietly() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = TaskRunner::new(vec![
            Task::new(
                "configmaps",
                failing(|| {
                    Error::namespace_terminating("apollo").in_task("ConfigMap", TaskStage::Converge)
                }),
            ),
            Task::new("services", recording("services", log.clone())),
        ]);

        runner
            .run(&instance(), &context(&FakeStores::new()))
            .await
            .unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    // =========================================================================
    // Story: Kind steps converge then collect
    // =========================================================================

    #[tokio::test]
    async fn story_kind_step_wraps_errors_with_its_stage() {
        let stores = FakeStores::new();
        stores.config_maps.fail_next_creates_with_already_exists(2);
        let mut env = test_environment("demo");
        env.spec.config_db.host = "10.0.0.7".to_string();
        env.spec.config_db.username = "apollo".to_string();
        let instance = Instance::from(env).with_defaults();

        let step = KindStep::new(<Instance as crate::desired::DesiredState>::config_maps);
        let err = step
            .run(&instance, &instance.owner().unwrap(), &context(&stores))
            .await
            .unwrap_err();
        match &err {
            Error::Task { task, stage, .. } => {
                assert_eq!(task, "ConfigMap");
                assert_eq!(*stage, TaskStage::Converge);
            }
            other => panic!("expected Task error, got {other:?}"),
        }
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn story_status_step_marks_instance_ready() {
        let stores = FakeStores::new();
        let mut status = MockStatusWriter::new();
        status
            .expect_write()
            .withf(|_, s| s.phase == apollo_common::crd::Phase::Ready)
            .times(1)
            .returning(|_, _| Ok(()));
        let ctx = ReconcileContext::new(
            stores.stores(),
            Arc::new(NoopEventPublisher),
            Arc::new(status),
        );

        let instance = instance();
        StatusStep
            .run(&instance, &instance.owner().unwrap(), &ctx)
            .await
            .unwrap();
    }
}
