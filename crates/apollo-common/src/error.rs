//! Error types for the Apollo operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Store failures are classified when they cross the store seam so the
//! convergence engine and task runner can react to a create race or a
//! terminating namespace without string matching further up.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Fragment the API server puts in a Forbidden message when the target
/// namespace is being deleted.
const NAMESPACE_TERMINATING_FRAGMENT: &str = "because it is being terminated";

/// Which half of a per-kind task failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStage {
    /// Create/patch of desired objects
    Converge,
    /// Deletion of owned objects that are no longer desired
    Collect,
    /// Instance status write
    Status,
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStage::Converge => write!(f, "converge"),
            TaskStage::Collect => write!(f, "collect"),
            TaskStage::Status => write!(f, "status"),
        }
    }
}

/// Main error type for Apollo operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that has no more specific classification
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Create lost a race: the object appeared between get and create
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind (e.g. "Deployment")
        kind: String,
        /// Object name
        name: String,
    },

    /// The API server refused a write because the namespace is terminating
    #[error("namespace {namespace} is being terminated")]
    NamespaceTerminating {
        /// Namespace that is going away
        namespace: String,
    },

    /// A per-kind reconcile task failed
    #[error("failed to {stage} {task}: {source}")]
    Task {
        /// Task name (e.g. "deployments")
        task: String,
        /// Which part of the task failed
        stage: TaskStage,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Validation error for instance specs
    #[error("validation error for {instance}: {message}")]
    Validation {
        /// Name of the instance with invalid configuration
        instance: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.configdb.host")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "store")
        context: String,
    },
}

impl Error {
    /// Classify a kube error returned by a store write.
    ///
    /// 409 conflicts with reason `AlreadyExists` become [`Error::AlreadyExists`],
    /// 403s caused by a terminating namespace become
    /// [`Error::NamespaceTerminating`]. Everything else stays a kube error.
    pub fn from_store(kind: &str, namespace: &str, name: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ae)
                if ae.code == 403 && ae.message.contains(NAMESPACE_TERMINATING_FRAGMENT) =>
            {
                Self::NamespaceTerminating {
                    namespace: namespace.to_string(),
                }
            }
            _ => Self::Kube { source: err },
        }
    }

    /// Create an already-exists error
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a namespace-terminating error
    pub fn namespace_terminating(namespace: impl Into<String>) -> Self {
        Self::NamespaceTerminating {
            namespace: namespace.into(),
        }
    }

    /// Wrap an error with the task and stage it came from
    pub fn in_task(self, task: impl Into<String>, stage: TaskStage) -> Self {
        Self::Task {
            task: task.into(),
            stage,
            source: Box::new(self),
        }
    }

    /// Create a validation error with instance context and field path
    pub fn validation_for_field(
        instance: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            instance: instance.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// The error with task wrappers peeled off
    pub fn root(&self) -> &Error {
        match self {
            Self::Task { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a create lost a race with another writer
    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), Self::AlreadyExists { .. })
    }

    /// Whether the instance's namespace is being torn down
    pub fn is_namespace_terminating(&self) -> bool {
        matches!(self.root(), Self::NamespaceTerminating { .. })
    }

    /// Whether the whole pass should be retried after the error backoff
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::Kube { .. } => true,
            Self::AlreadyExists { .. } => true,
            Self::NamespaceTerminating { .. } => false,
            Self::Task { .. } => true,
            Self::Validation { .. } => false,
            Self::Serialization { .. } => false,
            Self::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
            kind: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    /// Story: a create that loses a race is recognised as such
    #[test]
    fn story_conflict_on_create_is_classified_as_already_exists() {
        let err = Error::from_store(
            "ConfigMap",
            "apollo",
            "demo-config-configmap",
            api_error(409, "AlreadyExists", "configmaps \"demo-config-configmap\" already exists"),
        );
        assert!(err.is_already_exists());
        assert!(err.to_string().contains("demo-config-configmap"));
    }

    /// Story: an optimistic-concurrency conflict is not a create race
    #[test]
    fn story_update_conflict_stays_a_kube_error() {
        let err = Error::from_store(
            "Deployment",
            "apollo",
            "demo",
            api_error(409, "Conflict", "the object has been modified"),
        );
        assert!(!err.is_already_exists());
        assert!(matches!(err, Error::Kube { .. }));
    }

    /// Story: writes into a terminating namespace are recognised
    #[test]
    fn story_forbidden_in_terminating_namespace() {
        let err = Error::from_store(
            "Service",
            "apollo",
            "demo-config",
            api_error(
                403,
                "Forbidden",
                "services \"demo-config\" is forbidden: unable to create new content in namespace apollo because it is being terminated",
            ),
        );
        assert!(err.is_namespace_terminating());
        assert!(!err.is_retryable());

        let plain = Error::from_store("Service", "apollo", "x", api_error(403, "Forbidden", "rbac"));
        assert!(!plain.is_namespace_terminating());
    }

    /// Story: task wrapping keeps the classification visible
    #[test]
    fn story_task_wrapper_preserves_classification() {
        let err = Error::namespace_terminating("apollo").in_task("services", TaskStage::Converge);
        assert!(err.is_namespace_terminating());
        assert_eq!(
            err.to_string(),
            "failed to converge services: namespace apollo is being terminated"
        );

        let err = Error::already_exists("Ingress", "demo").in_task("ingresses", TaskStage::Converge);
        assert!(err.is_already_exists());
        assert!(err.is_retryable());
    }

    /// Story: validation errors wait for the user, everything else retries
    #[test]
    fn story_error_retryability() {
        let invalid = Error::validation_for_field("demo", "spec.configdb.host", "bad host");
        assert!(!invalid.is_retryable());
        let malformed = serde_json::from_str::<u32>("x").unwrap_err();
        assert!(!Error::from(malformed).is_retryable());
        assert!(Error::internal("transient").is_retryable());
        assert!(Error::internal_with_context("store", "timeout").is_retryable());
    }

    #[test]
    fn validation_field_is_recorded() {
        match Error::validation_for_field("demo", "spec.configdb.host", "must not be empty") {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.configdb.host"))
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
