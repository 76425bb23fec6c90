//! The three instance variants as one closed enum

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use apollo_common::crd::{Apollo, ApolloEnvironment, ApolloPortal, ApolloStatus};
use apollo_common::labels::ownership_labels;
use apollo_common::{Error, Result};

/// A watched instance of any of the three kinds
#[derive(Clone, Debug)]
pub enum Instance {
    /// Config and admin services against an external config database
    Environment(ApolloEnvironment),
    /// Portal against an external portal database
    Portal(ApolloPortal),
    /// Every role plus a bundled database
    AllInOne(Apollo),
}

impl From<ApolloEnvironment> for Instance {
    fn from(value: ApolloEnvironment) -> Self {
        Self::Environment(value)
    }
}

impl From<ApolloPortal> for Instance {
    fn from(value: ApolloPortal) -> Self {
        Self::Portal(value)
    }
}

impl From<Apollo> for Instance {
    fn from(value: Apollo) -> Self {
        Self::AllInOne(value)
    }
}

impl Instance {
    /// Kind of the underlying resource
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Environment(_) => "ApolloEnvironment",
            Self::Portal(_) => "ApolloPortal",
            Self::AllInOne(_) => "Apollo",
        }
    }

    /// Instance name
    pub fn name(&self) -> String {
        match self {
            Self::Environment(i) => i.name_any(),
            Self::Portal(i) => i.name_any(),
            Self::AllInOne(i) => i.name_any(),
        }
    }

    /// Instance namespace
    pub fn namespace(&self) -> String {
        match self {
            Self::Environment(i) => i.namespace(),
            Self::Portal(i) => i.namespace(),
            Self::AllInOne(i) => i.namespace(),
        }
        .unwrap_or_default()
    }

    /// `metadata.generation`
    pub fn generation(&self) -> Option<i64> {
        match self {
            Self::Environment(i) => i.metadata.generation,
            Self::Portal(i) => i.metadata.generation,
            Self::AllInOne(i) => i.metadata.generation,
        }
    }

    /// Stored status
    pub fn status(&self) -> Option<&ApolloStatus> {
        match self {
            Self::Environment(i) => i.status.as_ref(),
            Self::Portal(i) => i.status.as_ref(),
            Self::AllInOne(i) => i.status.as_ref(),
        }
    }

    /// Copy of the instance with every default filled in
    pub fn with_defaults(&self) -> Self {
        let mut copy = self.clone();
        match &mut copy {
            Self::Environment(i) => i.spec.apply_defaults(),
            Self::Portal(i) => i.spec.apply_defaults(),
            Self::AllInOne(i) => i.spec.apply_defaults(),
        }
        copy
    }

    /// Reject specs that cannot produce valid objects
    pub fn validate(&self) -> Result<()> {
        let name = self.name();
        match self {
            Self::Environment(i) => i.spec.validate(&name),
            Self::Portal(i) => i.spec.validate(&name),
            Self::AllInOne(i) => i.spec.validate(&name),
        }
    }

    /// Ownership data stamped onto and queried from managed objects
    pub fn owner(&self) -> Result<Owner> {
        match self {
            Self::Environment(i) => Owner::of(i),
            Self::Portal(i) => Owner::of(i),
            Self::AllInOne(i) => Owner::of(i),
        }
    }
}

/// How managed objects point back at their instance
#[derive(Clone, Debug, PartialEq)]
pub struct Owner {
    /// Instance name
    pub name: String,
    /// Instance namespace, also the namespace of every managed object
    pub namespace: String,
    /// Controller owner reference for cascading deletion
    pub reference: OwnerReference,
    /// Reference used as the target of events
    pub object: ObjectReference,
    /// The label pair that defines membership for garbage collection
    pub ownership: BTreeMap<String, String>,
}

impl Owner {
    /// Ownership data for a stored instance; fails for objects without a uid
    pub fn of<K: Resource<DynamicType = ()>>(instance: &K) -> Result<Self> {
        let mut reference = instance.controller_owner_ref(&()).ok_or_else(|| {
            Error::internal_with_context(
                "owner",
                format!("{} {} has no uid", K::kind(&()), instance.name_any()),
            )
        })?;
        reference.block_owner_deletion = Some(true);

        Ok(Self {
            name: instance.name_any(),
            namespace: instance.namespace().unwrap_or_default(),
            reference,
            object: instance.object_ref(&()),
            ownership: ownership_labels(instance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_environment;
    use apollo_common::crd::ApolloPortalSpec;

    #[test]
    fn owner_reference_is_a_blocking_controller_reference() {
        let owner = Instance::from(test_environment("demo")).owner().unwrap();
        assert_eq!(owner.reference.kind, "ApolloEnvironment");
        assert_eq!(owner.reference.uid, "uid-demo");
        assert_eq!(owner.reference.controller, Some(true));
        assert_eq!(owner.reference.block_owner_deletion, Some(true));
        assert_eq!(
            owner.ownership["app.kubernetes.io/instance"],
            "apollo.demo"
        );
    }

    #[test]
    fn instances_without_uid_cannot_own_objects() {
        let portal = ApolloPortal::new("portal", ApolloPortalSpec::default());
        assert!(Instance::from(portal).owner().is_err());
    }

    #[test]
    fn defaults_leave_the_original_untouched() {
        let instance = Instance::from(test_environment("demo"));
        let defaulted = instance.with_defaults();
        match (&instance, &defaulted) {
            (Instance::Environment(a), Instance::Environment(b)) => {
                assert!(a.spec.config_service.workload.image.is_none());
                assert!(b.spec.config_service.workload.image.is_some());
            }
            _ => panic!("variant changed"),
        }
        assert!(defaulted.status().is_none());
    }
}
