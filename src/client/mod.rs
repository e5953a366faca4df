//! Collaborators a suite talks to
//!
//! The lifecycle only sees these traits. [`KubeAppClient`] and
//! [`GithubReleaseResolver`] are the production implementations; the cluster
//! provisioning engine is supplied by the caller.

mod kubernetes;
mod release;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use apptest_common::config::ExistingCluster;
use apptest_common::Error;

use crate::app::ApplicationIntent;
use crate::cluster::ClusterHandle;

pub use self::kubernetes::KubeAppClient;
pub use self::release::{version_from_tag, GithubReleaseResolver};

/// Observed state of an App resource
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppStatus {
    /// App name
    pub name: String,
    /// App namespace
    pub namespace: String,
    /// Version reported in the status, if any
    pub version: Option<String>,
    /// Release status reported in the status (e.g. `deployed`)
    pub release_status: Option<String>,
}

/// Release status of a successfully installed app
pub const STATUS_DEPLOYED: &str = "deployed";

impl AppStatus {
    /// Whether the release is deployed
    pub fn is_deployed(&self) -> bool {
        self.release_status.as_deref() == Some(STATUS_DEPLOYED)
    }

    /// Whether the reported version equals `version`
    pub fn is_version(&self, version: &str) -> bool {
        self.version.as_deref() == Some(version)
    }
}

/// App resources on the management cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AppClient: Send + Sync {
    /// Create or update the App resource and its values
    async fn deploy_app(&self, app: &ApplicationIntent) -> Result<(), Error>;

    /// Delete the App resource and its values
    async fn delete_app(&self, app: &ApplicationIntent) -> Result<(), Error>;

    /// Look up an App resource
    ///
    /// A missing App yields an error for which `is_not_found` holds.
    async fn get_app(&self, name: &str, namespace: &str) -> Result<AppStatus, Error>;

    /// List App resources in `namespace` carrying all `labels`
    async fn list_apps(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AppStatus>, Error>;

    /// Whether the App reports `version`
    async fn is_app_version(&self, name: &str, namespace: &str, version: &str)
        -> Result<bool, Error>;

    /// Whether the App reports a deployed release
    async fn is_app_deployed(&self, name: &str, namespace: &str) -> Result<bool, Error>;

    /// Name of the management cluster
    async fn management_cluster_name(&self) -> Result<String, Error>;

    /// Base domain from the cluster's Helm values
    async fn cluster_base_domain(&self, cluster_name: &str, namespace: &str)
        -> Result<String, Error>;
}

/// Nodes of a workload cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Control plane replicas the cluster is configured with (0 for managed control planes)
    async fn expected_control_plane_replicas(&self, cluster: &ClusterHandle) -> Result<u32, Error>;

    /// Number of Ready nodes matching a label selector
    async fn count_ready_nodes(&self, cluster: &ClusterHandle, selector: &str)
        -> Result<u32, Error>;
}

/// Cluster creation and deletion
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    /// Describe the cluster to use for the kubeconfig context
    ///
    /// Attaches to `existing` when given, otherwise describes a new cluster.
    async fn load_or_build(
        &self,
        context: &str,
        existing: Option<ExistingCluster>,
    ) -> Result<ClusterHandle, Error>;

    /// Whether the cluster installs `app` by default
    async fn is_default_app(&self, cluster: &ClusterHandle, app: &ApplicationIntent)
        -> Result<bool, Error>;

    /// Create the cluster, including its app overrides
    async fn standup(&self, cluster: &ClusterHandle) -> Result<ClusterHandle, Error>;

    /// Re-apply the cluster definition (e.g. with changed app overrides)
    async fn apply_cluster(&self, cluster: &ClusterHandle) -> Result<(), Error>;

    /// Delete the cluster
    async fn teardown(&self, cluster: &ClusterHandle) -> Result<(), Error>;
}

/// Release metadata
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseResolver: Send + Sync {
    /// Newest released version of `artifact`, without a leading `v`
    async fn latest_version(&self, artifact: &str) -> Result<String, Error>;
}

/// All collaborators of a run
#[derive(Clone)]
pub struct Platform {
    /// App resources on the management cluster
    pub apps: Arc<dyn AppClient>,
    /// Workload cluster nodes
    pub nodes: Arc<dyn NodeClient>,
    /// Cluster creation and deletion
    pub provisioner: Arc<dyn ClusterProvisioner>,
    /// Release metadata
    pub releases: Arc<dyn ReleaseResolver>,
}

impl Platform {
    /// Connect to the management cluster named by the kubeconfig and context
    ///
    /// Uses [`KubeAppClient`] for apps and nodes and [`GithubReleaseResolver`]
    /// for releases.
    pub async fn connect(
        kubeconfig: &std::path::Path,
        context: &str,
        provisioner: Arc<dyn ClusterProvisioner>,
    ) -> Result<Self, Error> {
        let client = Arc::new(KubeAppClient::connect(kubeconfig, context).await?);
        Ok(Self {
            apps: client.clone(),
            nodes: client,
            provisioner,
            releases: Arc::new(GithubReleaseResolver::new()?),
        })
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_status_checks() {
        let status = AppStatus {
            name: "t-1-hello".to_string(),
            namespace: "org-acme".to_string(),
            version: Some("1.2.3".to_string()),
            release_status: Some("deployed".to_string()),
        };
        assert!(status.is_deployed());
        assert!(status.is_version("1.2.3"));
        assert!(!status.is_version("1.2.4"));

        let pending = AppStatus {
            release_status: Some("pending-install".to_string()),
            ..status
        };
        assert!(!pending.is_deployed());
        assert!(!AppStatus::default().is_version(""));
    }
}
