//! Shared run context
//!
//! One [`RunContext`] exists per suite run. The lifecycle fills it in as
//! setup progresses; hooks and tests receive it as `Arc<RunContext>` and only
//! read from it. Every field is written at most once.

use std::sync::OnceLock;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use apptest_common::config::EnvConfig;
use apptest_common::Error;

use crate::app::ApplicationIntent;
use crate::bundles::BundleRelationship;
use crate::client::{AppClient, ClusterProvisioner, NodeClient, Platform, ReleaseResolver};
use crate::cluster::ClusterHandle;

/// Per-run state shared with hooks and tests
pub struct RunContext {
    platform: Platform,
    env: EnvConfig,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    cluster: OnceLock<ClusterHandle>,
    application: OnceLock<ApplicationIntent>,
    bundle: OnceLock<BundleRelationship>,
    default_app: OnceLock<bool>,
}

impl RunContext {
    /// Create the context for a run
    ///
    /// `env` must carry the concrete version under test. `timeout` bounds the
    /// run up to and including the tests.
    pub fn new(platform: Platform, env: EnvConfig, timeout: Option<Duration>) -> Self {
        Self {
            platform,
            env,
            cancel: CancellationToken::new(),
            deadline: timeout.map(|t| Instant::now() + t),
            cluster: OnceLock::new(),
            application: OnceLock::new(),
            bundle: OnceLock::new(),
            default_app: OnceLock::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// App resources on the management cluster
    pub fn apps(&self) -> &dyn AppClient {
        self.platform.apps.as_ref()
    }

    /// Nodes of workload clusters
    pub fn nodes(&self) -> &dyn NodeClient {
        self.platform.nodes.as_ref()
    }

    /// Cluster provisioner
    pub fn provisioner(&self) -> &dyn ClusterProvisioner {
        self.platform.provisioner.as_ref()
    }

    /// Release metadata
    pub fn releases(&self) -> &dyn ReleaseResolver {
        self.platform.releases.as_ref()
    }

    /// Resolved environment
    pub fn env(&self) -> &EnvConfig {
        &self.env
    }

    /// Version under test
    pub fn app_version(&self) -> &str {
        &self.env.app_version
    }

    /// Token cancelled when the run is aborted
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Deadline of the run, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cluster the app is installed into
    pub fn cluster(&self) -> Result<&ClusterHandle, Error> {
        get(&self.cluster, "cluster")
    }

    /// The app under test
    pub fn application(&self) -> Result<&ApplicationIntent, Error> {
        get(&self.application, "application")
    }

    /// The bundle installing the app under test, if any
    pub fn bundle(&self) -> Option<&BundleRelationship> {
        self.bundle.get()
    }

    /// The unit that gets installed: the bundle if set, else the app
    pub fn install_unit(&self) -> Result<&ApplicationIntent, Error> {
        match self.bundle.get() {
            Some(rel) => Ok(&rel.bundle),
            None => self.application(),
        }
    }

    /// Whether the installed unit ships with the cluster by default
    ///
    /// Always false for management cluster self-tests.
    pub fn is_default_app(&self) -> bool {
        self.default_app.get().copied().unwrap_or(false)
    }

    pub(crate) fn set_cluster(&self, cluster: ClusterHandle) -> Result<(), Error> {
        set(&self.cluster, cluster, "cluster")
    }

    pub(crate) fn set_application(&self, app: ApplicationIntent) -> Result<(), Error> {
        set(&self.application, app, "application")
    }

    pub(crate) fn set_bundle(&self, bundle: BundleRelationship) -> Result<(), Error> {
        set(&self.bundle, bundle, "bundle")
    }

    pub(crate) fn set_default_app(&self, is_default: bool) -> Result<(), Error> {
        set(&self.default_app, is_default, "default app status")
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

fn get<'a, T>(cell: &'a OnceLock<T>, what: &str) -> Result<&'a T, Error> {
    cell.get().ok_or_else(|| {
        Error::internal_with_context("run-context", format!("{what} is not resolved yet"))
    })
}

fn set<T>(cell: &OnceLock<T>, value: T, what: &str) -> Result<(), Error> {
    cell.set(value)
        .map_err(|_| Error::internal_with_context("run-context", format!("{what} is already set")))
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("env", &self.env)
            .field("cluster", &self.cluster.get().map(|c| &c.name))
            .field("application", &self.application.get().map(|a| &a.install_name))
            .field("bundle", &self.bundle.get().map(|b| &b.bundle.install_name))
            .field("default_app", &self.default_app.get())
            .finish_non_exhaustive()
    }
}
