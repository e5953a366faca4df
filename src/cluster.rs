//! Target cluster descriptors

use crate::app::{ApplicationIntent, Organization};

/// Prefix some management cluster names carry in their kubeconfig context
pub const TELEPORT_PREFIX: &str = "teleport.giantswarm.io-";

/// Which kind of cluster a suite runs against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterKind {
    /// The management cluster tests itself
    Management,
    /// A workload cluster created (or reused) for the run
    Workload,
}

/// The cluster a run installs into
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterHandle {
    /// Cluster name
    pub name: String,
    /// Organization owning the cluster
    pub organization: Organization,
    /// Whether the cluster exists only for testing
    pub is_ephemeral: bool,
    /// Whether baseline apps are managed by a separate `<cluster>-default-apps` app
    pub default_apps_managed: bool,
    /// Management or workload cluster
    pub kind: ClusterKind,
    /// Apps installed with the cluster at creation time instead of their defaults
    pub app_overrides: Vec<ApplicationIntent>,
}

impl ClusterHandle {
    /// Describe a workload cluster
    pub fn workload(name: impl Into<String>, organization: Organization) -> Self {
        Self {
            name: name.into(),
            organization,
            is_ephemeral: true,
            default_apps_managed: false,
            kind: ClusterKind::Workload,
            app_overrides: Vec::new(),
        }
    }

    /// Describe the management cluster for self-tests
    ///
    /// Ephemerality is unknown until checked.
    pub fn management(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            organization: Organization::new(Organization::GIANTSWARM),
            is_ephemeral: false,
            default_apps_managed: false,
            kind: ClusterKind::Management,
            app_overrides: Vec::new(),
        }
    }

    /// Mark baseline apps as managed by a `default-apps` app
    pub fn with_default_apps_app(mut self, managed: bool) -> Self {
        self.default_apps_managed = managed;
        self
    }

    /// Install `app` with the cluster, replacing any override of the same app
    pub fn with_app_override(mut self, app: ApplicationIntent) -> Self {
        self.app_overrides.retain(|o| o.app_name != app.app_name);
        self.app_overrides.push(app);
        self
    }

    /// Namespace of the cluster resources
    pub fn namespace(&self) -> String {
        self.organization.namespace()
    }

    /// Whether this is a management cluster self-test
    pub fn is_management(&self) -> bool {
        self.kind == ClusterKind::Management
    }

    /// Name of the app managing the cluster's baseline apps
    pub fn default_apps_app_name(&self) -> String {
        format!("{}-default-apps", self.name)
    }

    /// Name of the secret holding the cluster's admin kubeconfig
    pub fn kubeconfig_secret_name(&self) -> String {
        format!("{}-kubeconfig", self.name)
    }
}

/// Cluster name without the teleport prefix
pub fn clean_cluster_name(name: &str) -> &str {
    name.strip_prefix(TELEPORT_PREFIX).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_cluster_name() {
        assert_eq!(clean_cluster_name("teleport.giantswarm.io-golem"), "golem");
        assert_eq!(clean_cluster_name("golem"), "golem");
        assert_eq!(
            clean_cluster_name("other-teleport.giantswarm.io-golem"),
            "other-teleport.giantswarm.io-golem"
        );
    }

    #[test]
    fn test_management_cluster_uses_giantswarm_org() {
        let mc = ClusterHandle::management("golem");
        assert!(mc.is_management());
        assert_eq!(mc.namespace(), "org-giantswarm");
    }

    #[test]
    fn test_app_override_replaces_same_app() {
        let first =
            ApplicationIntent::new("t-1-security-bundle", "security-bundle").with_version("1.0.0");
        let second = first.clone().with_version("1.1.0");

        let cluster = ClusterHandle::workload("t-1", Organization::new("acme"))
            .with_app_override(first)
            .with_app_override(second);

        assert_eq!(cluster.app_overrides.len(), 1);
        assert_eq!(cluster.app_overrides[0].version, "1.1.0");
    }

    #[test]
    fn test_derived_names() {
        let wc = ClusterHandle::workload("t-1", Organization::new("acme"));
        assert_eq!(wc.default_apps_app_name(), "t-1-default-apps");
        assert_eq!(wc.kubeconfig_secret_name(), "t-1-kubeconfig");
        assert_eq!(wc.namespace(), "org-acme");
    }
}
