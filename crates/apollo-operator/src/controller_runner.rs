//! Controller runner - builds one controller future per instance variant
//!
//! Every controller owns the six managed kinds, so an edit or deletion of an
//! owned object re-triggers its instance.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use apollo_common::crd::{Apollo, ApolloEnvironment, ApolloPortal};
use apollo_reconcile::Instance;

use crate::controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

fn build_controller<K>(client: Client, ctx: Arc<Context>, name: &'static str) -> ControllerFuture
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Into<Instance>
        + Send
        + Sync
        + 'static,
{
    tracing::info!("- {} controller", name);

    Box::pin(
        Controller::new(Api::<K>::all(client.clone()), watcher_config())
            .owns(Api::<ConfigMap>::all(client.clone()), watcher_config())
            .owns(Api::<Endpoints>::all(client.clone()), watcher_config())
            .owns(Api::<Service>::all(client.clone()), watcher_config())
            .owns(Api::<Deployment>::all(client.clone()), watcher_config())
            .owns(Api::<StatefulSet>::all(client.clone()), watcher_config())
            .owns(Api::<Ingress>::all(client), watcher_config())
            .shutdown_on_signal()
            .run(reconcile::<K>, error_policy::<K>, ctx)
            .for_each(log_reconcile_result(name)),
    )
}

/// Build the ApolloEnvironment, ApolloPortal and Apollo controllers
pub fn build_instance_controllers(client: Client, ctx: Arc<Context>) -> Vec<ControllerFuture> {
    vec![
        build_controller::<ApolloEnvironment>(client.clone(), ctx.clone(), "ApolloEnvironment"),
        build_controller::<ApolloPortal>(client.clone(), ctx.clone(), "ApolloPortal"),
        build_controller::<Apollo>(client, ctx, "Apollo"),
    ]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: Debug, E: Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
