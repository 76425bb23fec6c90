//! Instance status writes

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;

#[cfg(test)]
use mockall::automock;

use apollo_common::crd::{Apollo, ApolloEnvironment, ApolloPortal, ApolloStatus};
use apollo_common::{Error, Result, FIELD_MANAGER};

use crate::instance::Instance;

/// Writes the status subresource of an instance
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Replace the status of `instance` with `status`
    async fn write(&self, instance: &Instance, status: &ApolloStatus) -> Result<()>;
}

/// [`StatusWriter`] patching through the Kubernetes API
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    /// Create a writer using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Merge patches carry the field manager only; `force` belongs to apply
fn merge_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write(&self, instance: &Instance, status: &ApolloStatus) -> Result<()> {
        let namespace = instance.namespace();
        let name = instance.name();
        let patch = json!({ "status": status });
        let params = merge_params();
        let result = match instance {
            Instance::Environment(_) => {
                Api::<ApolloEnvironment>::namespaced(self.client.clone(), &namespace)
                    .patch_status(&name, &params, &Patch::Merge(&patch))
                    .await
                    .map(|_| ())
            }
            Instance::Portal(_) => {
                Api::<ApolloPortal>::namespaced(self.client.clone(), &namespace)
                    .patch_status(&name, &params, &Patch::Merge(&patch))
                    .await
                    .map(|_| ())
            }
            Instance::AllInOne(_) => Api::<Apollo>::namespaced(self.client.clone(), &namespace)
                .patch_status(&name, &params, &Patch::Merge(&patch))
                .await
                .map(|_| ()),
        };
        result.map_err(|e| Error::from_store(instance.kind(), &namespace, &name, e))
    }
}

/// Write `status` unless the instance already carries it
pub async fn write_if_changed(
    writer: &dyn StatusWriter,
    instance: &Instance,
    status: ApolloStatus,
) -> Result<bool> {
    if instance.status() == Some(&status) {
        return Ok(false);
    }
    writer.write(instance, &status).await?;
    Ok(true)
}
