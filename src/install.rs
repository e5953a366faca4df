//! Installing and removing apps

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use apptest_common::poll::{poll_until_ready, PollConfig};
use apptest_common::Error;

use crate::app::ApplicationIntent;
use crate::state::RunContext;

/// Time allowed for an install to report the expected version and a deployed release
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Pause between install status checks
pub const INSTALL_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Deploy `app` and wait until it reports its version and a deployed release.
///
/// Both waits share one budget of `wait.timeout`.
pub async fn install_app(
    ctx: &RunContext,
    app: &ApplicationIntent,
    wait: &PollConfig,
) -> Result<(), Error> {
    let deadline = Instant::now() + wait.timeout;
    let namespace = app.namespace();

    info!(
        app = %app.app_name,
        install_name = %app.install_name,
        version = %app.version,
        cluster = %app.cluster_name,
        "installing app"
    );
    ctx.apps().deploy_app(app).await?;

    poll_until_ready(
        &format!("App {} to report version {}", app.install_name, app.version),
        &wait.with_timeout(remaining(deadline)),
        ctx.cancellation(),
        || ctx.apps().is_app_version(&app.install_name, &namespace, &app.version),
    )
    .await?;

    poll_until_ready(
        &format!("App {} to be deployed", app.install_name),
        &wait.with_timeout(remaining(deadline)),
        ctx.cancellation(),
        || ctx.apps().is_app_deployed(&app.install_name, &namespace),
    )
    .await?;

    info!(install_name = %app.install_name, version = %app.version, "app installed");
    Ok(())
}

/// Delete `app` from the management cluster
pub async fn uninstall_app(ctx: &RunContext, app: &ApplicationIntent) -> Result<(), Error> {
    info!(app = %app.app_name, install_name = %app.install_name, "uninstalling app");
    ctx.apps().delete_app(app).await
}

/// Fail when `app` already exists on the management cluster
///
/// Only a not-found lookup passes; any other lookup error is returned as is.
pub async fn ensure_not_installed(ctx: &RunContext, app: &ApplicationIntent) -> Result<(), Error> {
    let namespace = app.namespace();
    match ctx.apps().get_app(&app.install_name, &namespace).await {
        Ok(existing) => Err(Error::precondition(format!(
            "App {namespace}/{} is already installed (version {})",
            app.install_name,
            existing.version.as_deref().unwrap_or("unknown")
        ))),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
