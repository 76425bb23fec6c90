//! Deterministic object names
//!
//! Every managed object is named `<instance>-<role suffix>`, cut down to a
//! DNS label. The same instance name always yields the same object names,
//! which is what lets a later pass find what an earlier pass created.

/// Maximum length of a DNS-1123 label
pub const MAX_NAME_LEN: usize = 63;

/// Name of the single application container in every managed pod
pub const CONTAINER_NAME: &str = "apollo-container";

/// Role suffixes appended to the instance name
pub mod suffix {
    /// Config service properties (ApolloEnvironment)
    pub const CONFIG_CONFIGMAP: &str = "config-configmap";
    /// Admin service properties (ApolloEnvironment)
    pub const ADMIN_CONFIGMAP: &str = "admin-configmap";
    /// Config service workload (ApolloEnvironment)
    pub const CONFIG_DEPLOYMENT: &str = "config-deployment";
    /// Admin service workload (ApolloEnvironment)
    pub const ADMIN_DEPLOYMENT: &str = "admin-deployment";
    /// Config service network service (ApolloEnvironment)
    pub const CONFIG_SERVICE: &str = "config";
    /// Admin service network service (ApolloEnvironment)
    pub const ADMIN_SERVICE: &str = "admin";
    /// Config database service and endpoints (ApolloEnvironment)
    pub const CONFIG_DB_SERVICE: &str = "configdb";
    /// Config service ingress (ApolloEnvironment)
    pub const CONFIG_INGRESS: &str = "config-ingress";
    /// Admin service ingress (ApolloEnvironment)
    pub const ADMIN_INGRESS: &str = "admin-ingress";

    /// Portal properties (ApolloPortal)
    pub const PORTAL_CONFIGMAP: &str = "portal-configmap";
    /// Portal workload (ApolloPortal)
    pub const PORTAL_DEPLOYMENT: &str = "portal-deployment";
    /// Portal database service and endpoints (ApolloPortal)
    pub const PORTAL_DB_SERVICE: &str = "portaldb";
    /// Portal network service (ApolloPortal)
    pub const PORTAL_SERVICE: &str = "portal";

    /// Config service properties (Apollo)
    pub const ALL_IN_ONE_CONFIG_CONFIGMAP: &str = "config-configmap-allinone";
    /// Admin service properties (Apollo)
    pub const ALL_IN_ONE_ADMIN_CONFIGMAP: &str = "admin-configmap-allinone";
    /// Portal properties (Apollo)
    pub const ALL_IN_ONE_PORTAL_CONFIGMAP: &str = "portal-configmap-allinone";
    /// Database init scripts (Apollo)
    pub const ALL_IN_ONE_SQL_SCRIPT: &str = "apollodb-sqlscript";
    /// Config service workload (Apollo)
    pub const ALL_IN_ONE_CONFIG_DEPLOYMENT: &str = "config-deployment-allinone";
    /// Admin service workload (Apollo)
    pub const ALL_IN_ONE_ADMIN_DEPLOYMENT: &str = "admin-deployment-allinone";
    /// Portal workload (Apollo)
    pub const ALL_IN_ONE_PORTAL_DEPLOYMENT: &str = "portal-deployment-allinone";
    /// Config service network service (Apollo)
    pub const ALL_IN_ONE_CONFIG_SERVICE: &str = "config-allinone";
    /// Admin service network service (Apollo)
    pub const ALL_IN_ONE_ADMIN_SERVICE: &str = "admin-allinone";
    /// Portal network service (Apollo)
    pub const ALL_IN_ONE_PORTAL_SERVICE: &str = "portal-allinone";
    /// Bundled database governing service (Apollo)
    pub const ALL_IN_ONE_DB_SERVICE: &str = "db-allinone";
    /// Bundled database stateful set (Apollo)
    pub const ALL_IN_ONE_STATEFULSET: &str = "statefulset-allinone";
    /// Bundled database volume claim template (Apollo)
    pub const ALL_IN_ONE_PVC: &str = "apolloDB-allinone";
    /// Config service ingress (Apollo)
    pub const ALL_IN_ONE_CONFIG_INGRESS: &str = "config-ingress-allinone";
    /// Admin service ingress (Apollo)
    pub const ALL_IN_ONE_ADMIN_INGRESS: &str = "admin-ingress-allinone";
    /// Portal ingress (Apollo)
    pub const ALL_IN_ONE_PORTAL_INGRESS: &str = "portal-ingress-allinone";
}

/// Name of the object playing `suffix` for the instance called `instance`
pub fn resource_name(instance: &str, suffix: &str) -> String {
    dns_name(&truncate_join(&[instance, suffix], "-", MAX_NAME_LEN))
}

/// Join `parts` with `sep`, shortening the earliest parts first until the
/// result is at most `max` characters.
///
/// Later parts are only cut once every earlier part is empty, and the result
/// is hard-capped at `max` as a last resort.
pub fn truncate_join(parts: &[&str], sep: &str, max: usize) -> String {
    let joined = parts.join(sep);
    let mut excess = joined.chars().count().saturating_sub(max);
    if excess == 0 {
        return joined;
    }

    let shortened: Vec<String> = parts
        .iter()
        .map(|part| {
            let len = part.chars().count();
            if excess == 0 {
                part.to_string()
            } else if len > excess {
                let kept = part.chars().take(len - excess).collect();
                excess = 0;
                kept
            } else {
                excess -= len;
                String::new()
            }
        })
        .collect();

    shortened.join(sep).chars().take(max).collect()
}

/// Lowercase `name`, replace everything outside `[a-z0-9-]` with `-` and
/// strip leading/trailing characters that may not start or end a label.
pub fn dns_name(name: &str) -> String {
    let replaced: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    replaced
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_are_joined_verbatim() {
        assert_eq!(
            resource_name("demo", suffix::CONFIG_DEPLOYMENT),
            "demo-config-deployment"
        );
        assert_eq!(resource_name("demo", suffix::PORTAL_DB_SERVICE), "demo-portaldb");
    }

    #[test]
    fn long_instance_names_keep_the_suffix() {
        let instance = "a".repeat(80);
        let name = resource_name(&instance, suffix::CONFIG_DEPLOYMENT);
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.ends_with("-config-deployment"));
    }

    #[test]
    fn names_are_deterministic() {
        let instance = "my-very-long-apollo-environment-name-for-the-production-cluster";
        assert_eq!(
            resource_name(instance, suffix::ADMIN_INGRESS),
            resource_name(instance, suffix::ADMIN_INGRESS)
        );
    }

    #[test]
    fn dns_name_lowercases_and_replaces() {
        assert_eq!(dns_name("Demo_App.X"), "demo-app-x");
        assert_eq!(
            resource_name("demo", suffix::ALL_IN_ONE_PVC),
            "demo-apollodb-allinone"
        );
    }

    #[test]
    fn dns_name_trims_edges() {
        assert_eq!(dns_name("-demo-"), "demo");
        assert_eq!(dns_name("__x__"), "x");
    }

    #[test]
    fn truncation_never_leaves_a_trailing_dash() {
        // the cut lands right after the dash inside the instance name
        let instance = format!("{}-b", "a".repeat(44));
        let name = resource_name(&instance, suffix::CONFIG_DEPLOYMENT);
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(!name.ends_with('-'));
        assert!(!name.starts_with('-'));
    }

    #[test]
    fn truncate_join_shortens_earliest_part_first() {
        assert_eq!(truncate_join(&["namespace", "name"], ".", 10), "names.name");
        assert_eq!(truncate_join(&["ns", "name"], ".", 63), "ns.name");
    }
}
