//! Convergence engine and garbage collector
//!
//! [`converge`] drives the store toward a desired set of objects of one
//! kind; [`collect`] removes owned objects that fell out of that set. Neither
//! retries inline beyond the single create-race retry: a failed pass is
//! rescheduled as a whole by the hosting loop.

use std::collections::BTreeSet;

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use apollo_common::events::{actions, reasons, EventPublisher};
use apollo_common::labels::matches_selector;
use apollo_common::Result;

use crate::instance::Owner;
use crate::resource::ManagedResource;
use crate::store::ResourceStore;

/// Make the store's objects match `desired`.
///
/// With `retry_on_race`, a create that loses to a concurrent writer re-runs
/// the whole pass once against the now-existing objects; a second collision
/// is returned.
pub async fn converge<K: ManagedResource>(
    store: &dyn ResourceStore<K>,
    events: &dyn EventPublisher,
    owner: &Owner,
    desired: &[K],
    retry_on_race: bool,
) -> Result<()> {
    let mut retry = retry_on_race;
    loop {
        match converge_once(store, events, owner, desired).await {
            Err(e) if retry && e.is_already_exists() => {
                debug!(kind = %K::kind(&()), instance = %owner.name, error = %e, "create raced, retrying");
                retry = false;
            }
            result => return result,
        }
    }
}

async fn converge_once<K: ManagedResource>(
    store: &dyn ResourceStore<K>,
    events: &dyn EventPublisher,
    owner: &Owner,
    desired: &[K],
) -> Result<()> {
    let kind = K::kind(&());
    for template in desired {
        let mut wanted = template.clone();
        wanted.apply_server_defaults();
        wanted.meta_mut().owner_references = Some(vec![owner.reference.clone()]);
        let namespace = wanted.namespace().unwrap_or_default();
        let name = wanted.name_any();

        let Some(existing) = store.get(&namespace, &name).await? else {
            store.create(&wanted).await?;
            info!(kind = %kind, namespace = %namespace, name = %name, "created");
            continue;
        };

        if wanted.requires_recreate(&existing) {
            store.delete(&existing).await?;
            info!(
                kind = %kind,
                namespace = %namespace,
                name = %name,
                "immutable field changed, deleted for recreation"
            );
            continue;
        }

        let mut updated = existing.clone();
        merge_metadata(&wanted, &mut updated);
        wanted.merge_into(&mut updated);
        if updated == existing {
            continue;
        }

        store.patch(&existing, &updated).await?;
        info!(kind = %kind, namespace = %namespace, name = %name, "applied");

        if wanted.payload_changed(&existing) {
            events
                .publish(
                    &owner.object,
                    EventType::Normal,
                    reasons::CONFIG_UPDATE,
                    actions::UPDATE,
                    Some(format!("{kind} Config changed - {namespace}/{name}")),
                )
                .await;
        }
    }
    Ok(())
}

/// Annotations are overlaid so server-managed ones (rollout revisions) survive
fn merge_metadata<K: Resource>(desired: &K, updated: &mut K) {
    let labels = desired.meta().labels.clone();
    let owners = desired.meta().owner_references.clone();
    let annotations = desired.annotations().clone();

    let meta = updated.meta_mut();
    meta.labels = labels;
    meta.owner_references = owners;
    if !annotations.is_empty() {
        meta.annotations
            .get_or_insert_with(Default::default)
            .extend(annotations);
    }
}

/// Delete owned objects of one kind that are not in `desired`.
///
/// Ownership is decided by the owner's label pair alone.
pub async fn collect<K: ManagedResource>(
    store: &dyn ResourceStore<K>,
    owner: &Owner,
    desired: &[K],
) -> Result<()> {
    let keep: BTreeSet<(String, String)> = desired
        .iter()
        .map(|d| (d.namespace().unwrap_or_default(), d.name_any()))
        .collect();

    for existing in store.list(&owner.namespace, &owner.ownership).await? {
        if !matches_selector(existing.labels(), &owner.ownership) {
            continue;
        }
        let key = (existing.namespace().unwrap_or_default(), existing.name_any());
        if keep.contains(&key) {
            continue;
        }
        store.delete(&existing).await?;
        info!(
            kind = %K::kind(&()),
            namespace = %key.0,
            name = %key.1,
            "deleted unwanted object"
        );
    }
    Ok(())
}
