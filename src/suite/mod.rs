//! Declarative test suites
//!
//! A [`Suite`] describes how an app is tested: the cluster to use, whether it
//! is an upgrade test, the values to install with and the user hooks and
//! tests. [`SuiteBuilder`] assembles one; [`Suite::run`] drives it through
//! the lifecycle.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use apptest::{Error, Suite};
//! # use apptest::client::ClusterProvisioner;
//! # async fn example(provisioner: Arc<dyn ClusterProvisioner>) -> Result<(), Error> {
//! Suite::builder("basic")
//!     .with_install_namespace("kube-system")
//!     .test("has a deployment", |ctx| async move {
//!         let app = ctx.application()?;
//!         let status = ctx.apps().get_app(&app.install_name, &app.namespace()).await?;
//!         if status.is_deployed() {
//!             Ok(())
//!         } else {
//!             Err(Error::precondition("app not deployed"))
//!         }
//!     })
//!     .build()
//!     .run(provisioner)
//!     .await
//! # }
//! ```

mod hook;
mod lifecycle;

pub use hook::Hook;

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use apptest_common::config::{EnvConfig, TestConfig};
use apptest_common::poll::PollConfig;
use apptest_common::Error;

use crate::bundles::NamingConvention;
use crate::client::{ClusterProvisioner, Platform};
use crate::install::{INSTALL_POLL_INTERVAL, INSTALL_TIMEOUT};
use crate::readiness::ReadinessConfig;
use crate::report::SuiteReport;
use crate::state::RunContext;

/// Default install namespace
pub const DEFAULT_INSTALL_NAMESPACE: &str = "default";

/// Default values file, relative to the working directory
pub const DEFAULT_VALUES_FILE: &str = "./values.yaml";

/// Time limits of the lifecycle steps
#[derive(Clone, Debug)]
pub struct Timeouts {
    /// Install wait (version, then deployed)
    pub install: PollConfig,
    /// App removal during teardown
    pub uninstall: Duration,
    /// Re-applying the cluster for a default app upgrade
    pub apply_cluster: Duration,
    /// Cluster deletion during teardown
    pub teardown: Duration,
    /// Lookup of the management cluster's base domain
    pub ephemeral_check: PollConfig,
    /// Cluster readiness gate
    pub readiness: ReadinessConfig,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            install: PollConfig::new(INSTALL_TIMEOUT, INSTALL_POLL_INTERVAL),
            uninstall: Duration::from_secs(5 * 60),
            apply_cluster: Duration::from_secs(10 * 60),
            teardown: Duration::from_secs(30 * 60),
            ephemeral_check: PollConfig::new(Duration::from_secs(2 * 60), Duration::from_secs(5)),
            readiness: ReadinessConfig::default(),
        }
    }
}

/// Fluent construction of a [`Suite`]
#[derive(Debug)]
pub struct SuiteBuilder {
    name: String,
    config: TestConfig,
    install_name: Option<String>,
    install_namespace: String,
    values_file: PathBuf,
    is_upgrade: bool,
    bundle: Option<String>,
    bundle_naming: NamingConvention,
    timeouts: Timeouts,
    suite_timeout: Option<Duration>,
    after_cluster_ready: Option<Hook>,
    before_upgrade: Option<Hook>,
    tests: Vec<Hook>,
    after_suite: Option<Hook>,
}

impl SuiteBuilder {
    /// Start a suite with the given test config
    pub fn with_config(name: impl Into<String>, config: TestConfig) -> Self {
        Self {
            name: name.into(),
            config,
            install_name: None,
            install_namespace: DEFAULT_INSTALL_NAMESPACE.to_string(),
            values_file: PathBuf::from(DEFAULT_VALUES_FILE),
            is_upgrade: false,
            bundle: None,
            bundle_naming: NamingConvention::Auto,
            timeouts: Timeouts::default(),
            suite_timeout: None,
            after_cluster_ready: None,
            before_upgrade: None,
            tests: Vec::new(),
            after_suite: None,
        }
    }

    /// Install the latest release first, then upgrade to the version under test
    pub fn with_is_upgrade(mut self, is_upgrade: bool) -> Self {
        self.is_upgrade = is_upgrade;
        self
    }

    /// Namespace the app's workload is deployed into
    pub fn with_install_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.install_namespace = namespace.into();
        self
    }

    /// App resource name; defaults to the app name
    pub fn with_install_name(mut self, name: impl Into<String>) -> Self {
        self.install_name = Some(name.into());
        self
    }

    /// Values template; a missing file means no values
    pub fn with_values_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.values_file = path.into();
        self
    }

    /// Install the app through the named bundle
    pub fn in_app_bundle(mut self, bundle: impl AsRef<str>) -> Self {
        self.bundle = Some(bundle.as_ref().to_lowercase());
        self
    }

    /// Naming convention for the bundle's child values
    pub fn with_bundle_naming(mut self, convention: NamingConvention) -> Self {
        self.bundle_naming = convention;
        self
    }

    /// Replace the step time limits
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Bound everything before teardown
    pub fn with_suite_timeout(mut self, timeout: Duration) -> Self {
        self.suite_timeout = Some(timeout);
        self
    }

    /// Run once the cluster is ready, before anything is installed
    pub fn after_cluster_ready<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(Arc<RunContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        self.after_cluster_ready = Some(Hook::new("after cluster ready", f));
        self
    }

    /// Run between the latest release and the version under test
    pub fn before_upgrade<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(Arc<RunContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        self.before_upgrade = Some(Hook::new("before upgrade", f));
        self
    }

    /// Add a named test
    pub fn test<F, Fut, E>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<RunContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        self.tests.push(Hook::new(name, f));
        self
    }

    /// Run at the start of teardown
    pub fn after_suite<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(Arc<RunContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        self.after_suite = Some(Hook::new("after suite", f));
        self
    }

    /// Finish the suite
    pub fn build(self) -> Suite {
        let install_name = self.install_name.unwrap_or_else(|| self.config.app_name.clone());
        Suite {
            name: self.name,
            config: self.config,
            install_name,
            install_namespace: self.install_namespace,
            values_file: self.values_file,
            is_upgrade: self.is_upgrade,
            bundle: self.bundle,
            bundle_naming: self.bundle_naming,
            timeouts: self.timeouts,
            suite_timeout: self.suite_timeout,
            after_cluster_ready: self.after_cluster_ready,
            before_upgrade: self.before_upgrade,
            tests: self.tests,
            after_suite: self.after_suite,
        }
    }
}

/// A fully described test suite
#[derive(Debug)]
pub struct Suite {
    name: String,
    config: TestConfig,
    install_name: String,
    install_namespace: String,
    values_file: PathBuf,
    is_upgrade: bool,
    bundle: Option<String>,
    bundle_naming: NamingConvention,
    timeouts: Timeouts,
    suite_timeout: Option<Duration>,
    after_cluster_ready: Option<Hook>,
    before_upgrade: Option<Hook>,
    tests: Vec<Hook>,
    after_suite: Option<Hook>,
}

impl Suite {
    /// Start a suite configured from `config.yaml`
    pub fn builder(name: impl Into<String>) -> SuiteBuilder {
        SuiteBuilder::with_config(name, TestConfig::load())
    }

    /// Suite name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is an upgrade test
    pub fn is_upgrade(&self) -> bool {
        self.is_upgrade
    }

    /// Run against the cluster named by the environment
    ///
    /// Reads the `E2E_*` variables, connects to the management cluster and
    /// publishes a resolved `latest` as `E2E_APP_VERSION` while the run lasts.
    pub async fn run(&self, provisioner: Arc<dyn ClusterProvisioner>) -> Result<(), Error> {
        let env = EnvConfig::from_env()?;
        let platform = Platform::connect(&env.kubeconfig, &env.context, provisioner).await?;
        lifecycle::execute(self, platform, env, CancellationToken::new(), true)
            .await
            .into_result()
    }

    /// Run with explicit collaborators; the process environment is left alone
    pub async fn run_with(
        &self,
        platform: Platform,
        env: EnvConfig,
        cancel: CancellationToken,
    ) -> SuiteReport {
        lifecycle::execute(self, platform, env, cancel, false).await
    }
}
