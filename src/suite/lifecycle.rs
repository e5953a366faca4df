//! The suite lifecycle
//!
//! States run strictly in order. The first failure before the tests aborts
//! the run; failing tests are recorded and the remaining tests still run.
//! Teardown always runs last.

use std::sync::{Arc, OnceLock};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use apptest_common::config::{AppVersionOverride, EnvConfig};
use apptest_common::poll::poll_until_ready;
use apptest_common::template::{ValuesContext, ValuesRenderer};
use apptest_common::Error;

use super::{Hook, Suite};
use crate::app::{ApplicationIntent, Organization};
use crate::bundles::BundleRelationship;
use crate::cleanup::TeardownPlan;
use crate::client::{version_from_tag, Platform, ReleaseResolver};
use crate::cluster::{clean_cluster_name, ClusterHandle};
use crate::install::{ensure_not_installed, install_app};
use crate::readiness::{wait_for_cluster_ready, GateCheck, TimedCheck};
use crate::report::{State, StepOutcome, SuiteReport};
use crate::state::RunContext;

/// Skip reason for every step a default app does not need
pub(crate) const DEFAULT_APP_REASON: &str = "app is a default app";

pub(crate) const RESOLVE_ENV_STEP: &str = "resolve environment";
pub(crate) const RESOLVE_CLUSTER_STEP: &str = "resolve cluster";
pub(crate) const RESOLVE_APP_STEP: &str = "resolve app";
pub(crate) const STANDUP_STEP: &str = "create workload cluster";
pub(crate) const GUARD_STEP: &str = "ensure app isn't installed";
pub(crate) const INSTALL_LATEST_STEP: &str = "install latest release";
pub(crate) const INSTALL_STEP: &str = "install app";

const MC_CONTEXT_PREFIX: &str = "gs-";
const EPHEMERAL_MARKER: &str = "ephemeral";

pub(super) async fn execute(
    suite: &Suite,
    platform: Platform,
    env: EnvConfig,
    cancel: CancellationToken,
    publish_env: bool,
) -> SuiteReport {
    let mut report = SuiteReport::new(&suite.name);
    report.enter(State::EnvironmentResolution);

    // Only a resolved `latest` is published; a pinned version stays untouched
    let publish = publish_env && env.wants_latest();
    let resolved = report
        .step(RESOLVE_ENV_STEP, resolve_environment(suite, &platform, env))
        .await;
    let env = match resolved {
        Ok(env) => env,
        Err(e) => {
            report.abort(e);
            report.log_summary();
            return report;
        }
    };
    let _published = publish.then(|| AppVersionOverride::set(&env.app_version));

    let ctx = RunContext::new(platform, env, suite.suite_timeout).with_cancellation(cancel);
    let ctx = Arc::new(ctx);
    let mut plan = TeardownPlan::new(
        suite.after_suite.clone(),
        suite.timeouts.uninstall,
        suite.timeouts.teardown,
    );

    let outcome = {
        let states = run_states(suite, &ctx, &mut plan, &mut report);
        let bounded = async {
            match (ctx.deadline(), suite.suite_timeout) {
                (Some(deadline), Some(limit)) => {
                    tokio::time::timeout_at(deadline, states)
                        .await
                        .unwrap_or_else(|_| {
                            Err(Error::timeout(format!("suite {}", suite.name), limit))
                        })
                }
                _ => states.await,
            }
        };
        tokio::select! {
            result = bounded => result,
            _ = ctx.cancellation().cancelled() => {
                Err(Error::cancelled(format!("suite {}", suite.name)))
            }
        }
    };

    if let Err(e) = outcome {
        if matches!(e, Error::Timeout { .. } | Error::Cancelled { .. }) {
            ctx.cancel();
        }
        report.abort(e);
    }

    plan.execute(&ctx, &mut report).await;
    report.log_summary();
    report
}

async fn run_states(
    suite: &Suite,
    ctx: &Arc<RunContext>,
    plan: &mut TeardownPlan,
    report: &mut SuiteReport,
) -> Result<(), Error> {
    report.enter(State::ClusterResolution);
    let cluster = report.step(RESOLVE_CLUSTER_STEP, resolve_cluster(suite, ctx)).await?;

    report.enter(State::IdentityResolution);
    let identity = report
        .step(RESOLVE_APP_STEP, resolve_identity(suite, ctx, &cluster))
        .await?;
    let is_default = identity.is_default;
    let unit = identity.unit().clone();
    let cluster = if is_default && !suite.is_upgrade {
        info!(app = %unit.app_name, "default app, installing through the cluster definition");
        cluster.with_app_override(unit.clone())
    } else {
        cluster
    };
    if is_default {
        plan.skip_uninstall(DEFAULT_APP_REASON);
    }
    ctx.set_application(identity.app)?;
    if let Some(bundle) = identity.bundle {
        ctx.set_bundle(bundle)?;
    }
    if !cluster.is_management() {
        ctx.set_default_app(is_default)?;
    }

    report.enter(State::ClusterReadiness);
    let cluster = if cluster.is_management() {
        report.skip(STANDUP_STEP, "testing against the management cluster");
        cluster
    } else {
        plan.destroy_on_teardown(cluster.clone());
        let cluster = report.step(STANDUP_STEP, ctx.provisioner().standup(&cluster)).await?;
        plan.destroy_on_teardown(cluster.clone());
        let checks = wait_for_cluster_ready(ctx, &cluster, &suite.timeouts.readiness).await?;
        for check in checks {
            record_gate_check(report, check);
        }
        cluster
    };
    ctx.set_cluster(cluster)?;

    report.enter(State::PreReadinessHook);
    run_hook(report, suite.after_cluster_ready.as_ref(), ctx).await?;

    report.enter(State::PreInstallGuard);
    if is_default {
        report.skip(GUARD_STEP, DEFAULT_APP_REASON);
    } else {
        report.step(GUARD_STEP, ensure_not_installed(ctx, &unit)).await?;
    }

    if suite.is_upgrade {
        report.enter(State::UpgradePreStage);
        if is_default {
            report.skip(INSTALL_LATEST_STEP, DEFAULT_APP_REASON);
        } else {
            plan.uninstall_on_teardown(unit.clone());
            let install_latest = async {
                let latest = latest_release(suite, ctx).await?;
                install_app(ctx, &latest, &suite.timeouts.install).await
            };
            report.step(INSTALL_LATEST_STEP, install_latest).await?;
        }
        run_hook(report, suite.before_upgrade.as_ref(), ctx).await?;
    }

    report.enter(State::InstallUnderTest);
    match (is_default, suite.is_upgrade) {
        (true, true) => {
            let cluster = ctx.cluster()?.clone().with_app_override(unit.clone());
            let limit = suite.timeouts.apply_cluster;
            let apply = async {
                tokio::time::timeout(limit, ctx.provisioner().apply_cluster(&cluster))
                    .await
                    .unwrap_or_else(|_| Err(Error::timeout("cluster apply", limit)))
            };
            report.step(INSTALL_STEP, apply).await?;
        }
        (true, false) => report.skip(INSTALL_STEP, DEFAULT_APP_REASON),
        (false, _) => {
            plan.uninstall_on_teardown(unit.clone());
            let install = install_app(ctx, &unit, &suite.timeouts.install);
            report.step(INSTALL_STEP, install).await?;
        }
    }

    report.enter(State::TestExecution);
    for test in &suite.tests {
        info!(test = %test.name(), "running test");
        let _ = report.run_callback(test.name(), test.call(ctx.clone())).await;
    }
    Ok(())
}

/// Resolve `latest` and check the bundle before anything is created
async fn resolve_environment(
    suite: &Suite,
    platform: &Platform,
    mut env: EnvConfig,
) -> Result<EnvConfig, Error> {
    if suite.config.app_name.is_empty() {
        return Err(Error::configuration("`appName` must be set in config.yaml"));
    }
    if let Some(bundle) = &suite.bundle {
        suite.bundle_naming.resolve(bundle)?;
    }
    if env.wants_latest() {
        let version = release_version(platform.releases.as_ref(), repo_name(suite)).await?;
        info!(version = %version, "overriding 'latest' with the newest release");
        env.app_version = version;
    }
    Ok(env)
}

async fn resolve_cluster(suite: &Suite, ctx: &RunContext) -> Result<ClusterHandle, Error> {
    if !suite.config.is_mc_test {
        return ctx
            .provisioner()
            .load_or_build(&ctx.env().context, ctx.env().workload_cluster.clone())
            .await;
    }

    let mc_name = ctx.apps().management_cluster_name().await?;
    let target = ctx.env().context.trim_start_matches(MC_CONTEXT_PREFIX);
    if clean_cluster_name(&mc_name) != clean_cluster_name(target) {
        return Err(Error::precondition(format!(
            "context {} does not point at the management cluster {mc_name}",
            ctx.env().context
        )));
    }

    let name = clean_cluster_name(&mc_name).to_string();
    let namespace = Organization::new(Organization::GIANTSWARM).namespace();
    let base_domain = OnceLock::new();
    poll_until_ready(
        &format!("base domain of {name}"),
        &suite.timeouts.ephemeral_check,
        ctx.cancellation(),
        || {
            let (name, namespace, base_domain) = (&name, &namespace, &base_domain);
            async move {
                let domain = ctx.apps().cluster_base_domain(name, namespace).await?;
                let _ = base_domain.set(domain);
                Ok::<_, Error>(true)
            }
        },
    )
    .await?;

    let base_domain = base_domain.get().map(String::as_str).unwrap_or_default();
    if !base_domain.contains(EPHEMERAL_MARKER) {
        return Err(Error::precondition(format!(
            "management cluster {mc_name} is not ephemeral (base domain {base_domain})"
        )));
    }
    info!(
        cluster = %mc_name,
        base_domain = %base_domain,
        "testing against ephemeral management cluster"
    );

    let mut cluster = ClusterHandle::management(mc_name);
    cluster.is_ephemeral = true;
    Ok(cluster)
}

struct Identity {
    app: ApplicationIntent,
    bundle: Option<BundleRelationship>,
    is_default: bool,
}

impl Identity {
    fn unit(&self) -> &ApplicationIntent {
        self.bundle.as_ref().map(|b| &b.bundle).unwrap_or(&self.app)
    }
}

async fn resolve_identity(
    suite: &Suite,
    ctx: &RunContext,
    cluster: &ClusterHandle,
) -> Result<Identity, Error> {
    let install_name = if cluster.is_management() {
        suite.install_name.clone()
    } else {
        format!("{}-{}", cluster.name, suite.install_name)
    };

    let values_ctx = ValuesContext {
        cluster_name: cluster.name.clone(),
        organization: cluster.organization.name().to_string(),
        namespace: cluster.namespace(),
        install_namespace: suite.install_namespace.clone(),
    };
    let values = ValuesRenderer::new().load_values_file(&suite.values_file, &values_ctx)?;

    let app = ApplicationIntent::new(install_name, &suite.config.app_name)
        .with_repo_name(repo_name(suite))
        .with_catalog(&suite.config.app_catalog)
        .with_cluster(cluster.organization.clone(), &cluster.name)
        .with_install_namespace(&suite.install_namespace)
        .with_version(ctx.app_version())
        .with_values(values)
        .with_in_cluster(false);

    let bundle = match &suite.bundle {
        Some(bundle_name) => {
            let version = release_version(ctx.releases(), bundle_name).await?;
            let install_name = format!("{}-{bundle_name}", cluster.name);
            let base = ApplicationIntent::new(install_name, bundle_name)
                .with_catalog(&suite.config.app_catalog)
                .with_cluster(cluster.organization.clone(), &cluster.name)
                .with_install_namespace(cluster.namespace())
                .with_version(version)
                .with_values(json!({ "clusterID": cluster.name }))
                .with_in_cluster(true);
            info!(
                bundle = %bundle_name,
                version = %base.version,
                child = %app.app_name,
                "installing app through bundle"
            );
            Some(BundleRelationship::new(base, app.clone(), suite.bundle_naming)?)
        }
        None => None,
    };

    let mut identity = Identity {
        app,
        bundle,
        is_default: false,
    };
    if !cluster.is_management() {
        identity.is_default = ctx
            .provisioner()
            .is_default_app(cluster, identity.unit())
            .await?;
    }
    Ok(identity)
}

/// The release installed ahead of an upgrade
///
/// A bundle upgrade starts from the released bundle without the child
/// override.
async fn latest_release(suite: &Suite, ctx: &RunContext) -> Result<ApplicationIntent, Error> {
    if let Some(bundle) = ctx.bundle() {
        return Ok(bundle.base.clone());
    }
    let app = ctx.application()?;
    let version = release_version(ctx.releases(), repo_name(suite)).await?;
    info!(app = %app.app_name, version = %version, "installing latest release before upgrade");
    Ok(app.clone().with_version(version))
}

/// Newest release of `artifact`, without a leading `v`
async fn release_version(releases: &dyn ReleaseResolver, artifact: &str) -> Result<String, Error> {
    let tag = releases.latest_version(artifact).await?;
    Ok(version_from_tag(&tag).to_string())
}

async fn run_hook(
    report: &mut SuiteReport,
    hook: Option<&Hook>,
    ctx: &Arc<RunContext>,
) -> Result<(), Error> {
    let Some(hook) = hook else {
        return Ok(());
    };
    report
        .run_callback(hook.name(), hook.call(ctx.clone()))
        .await
        .map_err(|msg| Error::hook(hook.name(), msg))
}

fn record_gate_check(report: &mut SuiteReport, timed: TimedCheck) {
    let (name, outcome) = match timed.check {
        GateCheck::Ready(name) => (name, StepOutcome::Passed),
        GateCheck::Skipped(name, reason) => (name, StepOutcome::Skipped(reason)),
        GateCheck::TimedOut(name, reason) => {
            warn!(check = %name, "continuing although the cluster is not fully ready");
            (name, StepOutcome::Warned(reason))
        }
    };
    report.record_elapsed(name, outcome, timed.elapsed);
}

fn repo_name(suite: &Suite) -> &str {
    if suite.config.repo_name.is_empty() {
        &suite.config.app_name
    } else {
        &suite.config.repo_name
    }
}
