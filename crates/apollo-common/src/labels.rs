//! Ownership and selector labels
//!
//! The `managed-by` + `instance` pair is the only thing the garbage
//! collector looks at when deciding whether an object belongs to an
//! instance. Selector labels are immutable on workloads, so nothing in
//! them may change over an instance's lifetime.

use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};

use crate::naming::{truncate_join, MAX_NAME_LEN};

/// Label naming the operator that manages an object
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Label naming the owning instance as `<namespace>.<name>`
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
/// Label grouping everything the operator creates
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
/// Label carrying the lowercased instance kind
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
/// Label carrying the object's own name
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
/// Label separating the roles of one instance inside workload selectors
pub const ROLE_LABEL: &str = "app";

/// Value of [`MANAGED_BY_LABEL`] and [`PART_OF_LABEL`]
pub const OPERATOR_NAME: &str = "apollo-operator";

/// Value of the [`INSTANCE_LABEL`] for an instance.
///
/// Label values must start and end alphanumeric, so a cut that leaves a
/// separator at either end is trimmed.
pub fn instance_label_value<K: Resource>(instance: &K) -> String {
    let namespace = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    truncate_join(&[namespace.as_str(), name.as_str()], ".", MAX_NAME_LEN)
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// The label pair used as the garbage-collection membership query
pub fn ownership_labels<K: Resource>(instance: &K) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string()),
        (INSTANCE_LABEL.to_string(), instance_label_value(instance)),
    ])
}

/// Labels shared by every object of an instance and usable as a selector
pub fn selector_labels<K: Resource<DynamicType = ()>>(instance: &K) -> BTreeMap<String, String> {
    let mut labels = ownership_labels(instance);
    labels.insert(PART_OF_LABEL.to_string(), OPERATOR_NAME.to_string());
    labels.insert(
        COMPONENT_LABEL.to_string(),
        K::kind(&()).to_ascii_lowercase(),
    );
    labels
}

/// Selector labels narrowed to one role (e.g. `configService`)
pub fn role_selector_labels<K: Resource<DynamicType = ()>>(
    instance: &K,
    role: &str,
) -> BTreeMap<String, String> {
    let mut labels = selector_labels(instance);
    labels.insert(ROLE_LABEL.to_string(), role.to_string());
    labels
}

/// Full label set for an object called `name`: the instance's own labels,
/// overlaid with the selector labels, plus `app.kubernetes.io/name` unless
/// the instance already sets one.
pub fn object_labels<K: Resource<DynamicType = ()>>(
    instance: &K,
    name: &str,
) -> BTreeMap<String, String> {
    let mut labels = instance.labels().clone();
    labels.extend(selector_labels(instance));
    labels
        .entry(NAME_LABEL.to_string())
        .or_insert_with(|| name.to_string());
    labels
}

/// Render labels as a `k=v,k=v` label selector
pub fn to_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `labels` carries every entry of `selector`
pub fn matches_selector(
    labels: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
