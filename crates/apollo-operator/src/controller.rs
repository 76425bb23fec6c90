//! Reconcile entry points shared by the three instance controllers

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use apollo_common::crd::ApolloStatus;
use apollo_common::events::{actions, reasons, EventPublisher};
use apollo_common::Error;
use apollo_reconcile::status::write_if_changed;
use apollo_reconcile::{Dispatcher, Instance, ReconcileContext};

/// When the hosting loop calls back after a pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// Delay after a failed pass
    pub error: Duration,
    /// Delay after a successful pass
    pub resync: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            error: Duration::from_secs(5),
            resync: Duration::from_secs(10),
        }
    }
}

/// Shared state of the instance controllers
pub struct Context {
    /// Task tables per variant
    pub dispatcher: Dispatcher,
    /// Stores, events and status access
    pub reconcile: ReconcileContext,
    /// Requeue intervals
    pub requeue: RequeuePolicy,
}

impl Context {
    /// Context backed by the Kubernetes API with the default task tables
    pub fn from_client(client: Client, requeue: RequeuePolicy) -> Self {
        Self {
            dispatcher: Dispatcher::with_default_tasks(),
            reconcile: ReconcileContext::from_client(client),
            requeue,
        }
    }

    /// Context over injected collaborators
    pub fn new(dispatcher: Dispatcher, reconcile: ReconcileContext, requeue: RequeuePolicy) -> Self {
        Self {
            dispatcher,
            reconcile,
            requeue,
        }
    }
}

/// Reconcile one instance of any variant
#[instrument(skip(object, ctx), fields(name = %object.name_any(), namespace = ?object.namespace()))]
pub async fn reconcile<K>(object: Arc<K>, ctx: Arc<Context>) -> Result<Action, Error>
where
    K: Resource + Clone + Into<Instance>,
{
    if object.meta().deletion_timestamp.is_some() {
        debug!("instance is being deleted, owned objects follow by owner reference");
        return Ok(Action::await_change());
    }

    let instance: Instance = (*object).clone().into();
    let instance = instance.with_defaults();

    if let Err(e) = instance.validate() {
        warn!(kind = instance.kind(), error = %e, "instance spec is invalid");
        report_invalid(&instance, &e, &ctx).await?;
        return Ok(Action::await_change());
    }

    ctx.dispatcher.dispatch(&instance, &ctx.reconcile).await?;
    info!(kind = instance.kind(), "reconcile pass complete");
    Ok(Action::requeue(ctx.requeue.resync))
}

async fn report_invalid(instance: &Instance, err: &Error, ctx: &Context) -> Result<(), Error> {
    let status = ApolloStatus::failed(instance.generation(), err.to_string());
    let written = write_if_changed(ctx.reconcile.status.as_ref(), instance, status).await?;
    if written {
        let owner = instance.owner()?;
        ctx.reconcile
            .events
            .publish(
                &owner.object,
                EventType::Warning,
                reasons::VALIDATION_FAILED,
                actions::VALIDATE,
                Some(err.to_string()),
            )
            .await;
    }
    Ok(())
}

/// Every failed pass is retried as a whole after the error interval
pub fn error_policy<K>(object: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource,
{
    warn!(
        name = %object.name_any(),
        error = %error,
        retryable = error.is_retryable(),
        "reconcile failed, requeueing"
    );
    Action::requeue(ctx.requeue.error)
}
