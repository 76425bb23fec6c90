//! Collaborators shared by every task of a reconcile pass

use std::sync::Arc;

use kube::Client;

use apollo_common::events::{EventPublisher, KubeEventPublisher};
use apollo_common::labels::OPERATOR_NAME;

use crate::status::{KubeStatusWriter, StatusWriter};
use crate::store::Stores;

/// Store, event and status access for one reconcile pass
#[derive(Clone)]
pub struct ReconcileContext {
    /// Stores of the managed kinds
    pub stores: Stores,
    /// Event publisher for payload changes
    pub events: Arc<dyn EventPublisher>,
    /// Status writer for the self task
    pub status: Arc<dyn StatusWriter>,
}

impl ReconcileContext {
    /// Assemble a context from its parts
    pub fn new(
        stores: Stores,
        events: Arc<dyn EventPublisher>,
        status: Arc<dyn StatusWriter>,
    ) -> Self {
        Self {
            stores,
            events,
            status,
        }
    }

    /// Everything backed by the Kubernetes API
    pub fn from_client(client: Client) -> Self {
        Self {
            stores: Stores::from_client(client.clone()),
            events: Arc::new(KubeEventPublisher::new(client.clone(), OPERATOR_NAME)),
            status: Arc::new(KubeStatusWriter::new(client)),
        }
    }
}
