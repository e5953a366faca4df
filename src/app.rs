//! Application identities
//!
//! An [`ApplicationIntent`] describes one app installation on the management
//! cluster: which chart from which catalog, at which version, with which
//! values, targeting which cluster. Intents are immutable once built; changing
//! the version or values produces a new intent.

use serde_json::Value;

use apptest_common::{yaml, Error};

/// Organization owning clusters and their apps
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Organization {
    name: String,
}

impl Organization {
    /// Organization of the management cluster's own apps
    pub const GIANTSWARM: &'static str = "giantswarm";

    /// Create an organization
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Organization name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace holding the organization's clusters and apps
    pub fn namespace(&self) -> String {
        format!("org-{}", self.name)
    }
}

/// An app installation request
#[derive(Clone, Debug, PartialEq)]
pub struct ApplicationIntent {
    /// Name of the installed App resource
    pub install_name: String,
    /// Name of the app (and chart) in the catalog
    pub app_name: String,
    /// Repository the app is released from
    pub repo_name: String,
    /// Catalog the app is installed from
    pub catalog: String,
    /// Namespace the chart is installed into
    pub install_namespace: String,
    /// Chart version
    pub version: String,
    /// Organization owning the target cluster
    pub organization: Organization,
    /// Name of the target cluster
    pub cluster_name: String,
    /// User values for the chart
    pub values: Value,
    /// Install into the management cluster itself rather than a workload cluster
    pub in_cluster: bool,
}

impl ApplicationIntent {
    /// Start an intent for `app_name` installed as `install_name`
    ///
    /// Repository defaults to the app name, values to an empty mapping.
    pub fn new(install_name: impl Into<String>, app_name: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            install_name: install_name.into(),
            repo_name: app_name.clone(),
            app_name,
            catalog: String::new(),
            install_namespace: "default".to_string(),
            version: String::new(),
            organization: Organization::new(Organization::GIANTSWARM),
            cluster_name: String::new(),
            values: Value::Object(Default::default()),
            in_cluster: false,
        }
    }

    /// Set the release repository
    pub fn with_repo_name(mut self, repo_name: impl Into<String>) -> Self {
        self.repo_name = repo_name.into();
        self
    }

    /// Set the catalog
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = catalog.into();
        self
    }

    /// Set the chart's target namespace
    pub fn with_install_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.install_namespace = namespace.into();
        self
    }

    /// Set the owning cluster
    pub fn with_cluster(
        mut self,
        organization: Organization,
        cluster_name: impl Into<String>,
    ) -> Self {
        self.organization = organization;
        self.cluster_name = cluster_name.into();
        self
    }

    /// Set whether the chart targets the management cluster itself
    pub fn with_in_cluster(mut self, in_cluster: bool) -> Self {
        self.in_cluster = in_cluster;
        self
    }

    /// Same app at another version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Same app with other values
    pub fn with_values(mut self, values: Value) -> Self {
        self.values = values;
        self
    }

    /// Namespace of the App resource on the management cluster
    pub fn namespace(&self) -> String {
        self.organization.namespace()
    }

    /// Name of the ConfigMap carrying the user values
    pub fn user_config_name(&self) -> String {
        format!("{}-userconfig", self.install_name)
    }

    /// Whether any user values are set
    pub fn has_values(&self) -> bool {
        match &self.values {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }

    /// User values rendered as YAML
    pub fn values_yaml(&self) -> Result<String, Error> {
        yaml::to_yaml(&self.values)
    }
}
