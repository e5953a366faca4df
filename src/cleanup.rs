//! Teardown of everything a run created
//!
//! Teardown actions are registered while the run progresses and executed once
//! at the end, whatever happened before. Every action runs even when an
//! earlier one failed; the last failure is kept.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use apptest_common::Error;

use crate::app::ApplicationIntent;
use crate::cluster::ClusterHandle;
use crate::install::uninstall_app;
use crate::report::{State, SuiteReport};
use crate::state::RunContext;
use crate::suite::Hook;

/// Step name of the app removal
pub const UNINSTALL_STEP: &str = "uninstall app";

/// Step name of the cluster deletion
pub const DESTROY_STEP: &str = "delete workload cluster";

const NOT_INSTALLED: &str = "app was not installed by this run";

#[derive(Debug)]
enum Uninstall {
    /// Nothing installed yet; an install registration replaces it
    NotInstalled,
    App(ApplicationIntent),
    /// Never uninstall; registrations are ignored
    Skip(String),
}

/// Registered teardown actions
#[derive(Debug)]
pub(crate) struct TeardownPlan {
    after_suite: Option<Hook>,
    uninstall: Uninstall,
    destroy: Option<ClusterHandle>,
    uninstall_timeout: Duration,
    destroy_timeout: Duration,
}

impl TeardownPlan {
    pub(crate) fn new(
        after_suite: Option<Hook>,
        uninstall_timeout: Duration,
        destroy_timeout: Duration,
    ) -> Self {
        Self {
            after_suite,
            uninstall: Uninstall::NotInstalled,
            destroy: None,
            uninstall_timeout,
            destroy_timeout,
        }
    }

    /// Remove `app` at the end; called right before an install is attempted
    ///
    /// Has no effect once the uninstall was skipped.
    pub(crate) fn uninstall_on_teardown(&mut self, app: ApplicationIntent) {
        if let Uninstall::NotInstalled = self.uninstall {
            self.uninstall = Uninstall::App(app);
        }
    }

    pub(crate) fn skip_uninstall(&mut self, reason: impl Into<String>) {
        self.uninstall = Uninstall::Skip(reason.into());
    }

    /// Delete `cluster` at the end, replacing an earlier registration
    pub(crate) fn destroy_on_teardown(&mut self, cluster: ClusterHandle) {
        self.destroy = Some(cluster);
    }

    pub(crate) async fn execute(self, ctx: &Arc<RunContext>, report: &mut SuiteReport) {
        report.enter(State::Teardown);

        if let Some(hook) = &self.after_suite {
            if let Err(msg) = report.run_callback(hook.name(), hook.call(ctx.clone())).await {
                report.teardown_failed(Error::hook(hook.name(), msg));
            }
        }

        match &self.uninstall {
            Uninstall::App(app) => {
                let removed =
                    bounded(UNINSTALL_STEP, self.uninstall_timeout, uninstall_app(ctx, app));
                let removed = report.step(UNINSTALL_STEP, removed).await;
                if let Err(e) = removed {
                    report.teardown_failed(Error::teardown(UNINSTALL_STEP, e.to_string()));
                }
            }
            Uninstall::NotInstalled => report.skip(UNINSTALL_STEP, NOT_INSTALLED),
            Uninstall::Skip(reason) => report.skip(UNINSTALL_STEP, reason.as_str()),
        }

        match &self.destroy {
            Some(cluster) => {
                info!(cluster = %cluster.name, "deleting workload cluster");
                let destroyed = bounded(
                    DESTROY_STEP,
                    self.destroy_timeout,
                    ctx.provisioner().teardown(cluster),
                );
                let destroyed = report.step(DESTROY_STEP, destroyed).await;
                if let Err(e) = destroyed {
                    warn!(cluster = %cluster.name, "workload cluster may be left behind");
                    report.teardown_failed(Error::teardown(DESTROY_STEP, e.to_string()));
                }
            }
            None => report.skip(DESTROY_STEP, "no workload cluster was created"),
        }
    }
}

async fn bounded<F>(operation: &str, limit: Duration, fut: F) -> Result<(), Error>
where
    F: Future<Output = Result<(), Error>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(Error::timeout(operation, limit)))
}
