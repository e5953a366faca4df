//! Workload cluster readiness gate
//!
//! After creation a cluster is considered usable once its control plane
//! nodes, at least two workers and its baseline apps are up. Each wait is
//! best effort: a wait that runs out is logged and the run moves on, since
//! later install waits surface a cluster that never became usable. Failing
//! to look up what to wait for is fatal.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use apptest_common::poll::{poll_until_ready, PollConfig};
use apptest_common::Error;

use crate::cluster::ClusterHandle;
use crate::state::RunContext;

/// Label carried by control plane nodes
pub const CONTROL_PLANE_SELECTOR: &str = "node-role.kubernetes.io/control-plane";

/// Nodes without the control plane label
pub const WORKER_SELECTOR: &str = "!node-role.kubernetes.io/control-plane";

/// Waits of the readiness gate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadinessConfig {
    /// Control plane nodes Ready
    pub control_plane: PollConfig,
    /// Worker nodes Ready
    pub workers: PollConfig,
    /// Workers required
    pub min_workers: u32,
    /// The `<cluster>-default-apps` app deployed
    pub default_apps_app: PollConfig,
    /// Every baseline app deployed
    pub default_apps: PollConfig,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        let nodes = PollConfig::new(Duration::from_secs(20 * 60), Duration::from_secs(15));
        Self {
            control_plane: nodes,
            workers: nodes,
            min_workers: 2,
            default_apps_app: PollConfig::new(Duration::from_secs(30), Duration::from_millis(50)),
            default_apps: PollConfig::new(Duration::from_secs(15 * 60), Duration::from_secs(10)),
        }
    }
}

/// Outcome of one gate wait
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateCheck {
    /// The wait succeeded
    Ready(&'static str),
    /// Nothing to wait for
    Skipped(&'static str, String),
    /// The wait ran out and was ignored
    TimedOut(&'static str, String),
}

/// A gate wait and how long it took
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedCheck {
    /// The gate outcome
    pub check: GateCheck,
    /// Time spent waiting
    pub elapsed: Duration,
}

/// Wait for the cluster's nodes and baseline apps
pub async fn wait_for_cluster_ready(
    ctx: &RunContext,
    cluster: &ClusterHandle,
    config: &ReadinessConfig,
) -> Result<Vec<TimedCheck>, Error> {
    Ok(vec![
        timed(control_plane_ready(ctx, cluster, config)).await?,
        timed(workers_ready(ctx, cluster, config)).await?,
        timed(default_apps_ready(ctx, cluster, config)).await?,
    ])
}

async fn timed<F>(wait: F) -> Result<TimedCheck, Error>
where
    F: Future<Output = Result<GateCheck, Error>>,
{
    let started = Instant::now();
    let check = wait.await?;
    Ok(TimedCheck {
        check,
        elapsed: started.elapsed(),
    })
}

async fn control_plane_ready(
    ctx: &RunContext,
    cluster: &ClusterHandle,
    config: &ReadinessConfig,
) -> Result<GateCheck, Error> {
    const CHECK: &str = "control plane nodes";

    let replicas = ctx.nodes().expected_control_plane_replicas(cluster).await?;
    if replicas == 0 {
        info!(cluster = %cluster.name, "managed control plane, skipping control plane nodes");
        return Ok(GateCheck::Skipped(CHECK, "managed control plane".to_string()));
    }

    info!(cluster = %cluster.name, replicas, "waiting for control plane nodes to be ready");
    tolerate_timeout(
        CHECK,
        poll_until_ready(
            &format!("{replicas} control plane node(s) of {} Ready", cluster.name),
            &config.control_plane,
            ctx.cancellation(),
            || async move {
                let ready =
                    ctx.nodes().count_ready_nodes(cluster, CONTROL_PLANE_SELECTOR).await?;
                Ok::<_, Error>(ready >= replicas)
            },
        )
        .await,
    )
}

async fn workers_ready(
    ctx: &RunContext,
    cluster: &ClusterHandle,
    config: &ReadinessConfig,
) -> Result<GateCheck, Error> {
    const CHECK: &str = "worker nodes";
    let wanted = config.min_workers;

    info!(cluster = %cluster.name, wanted, "waiting for worker nodes to be ready");
    tolerate_timeout(
        CHECK,
        poll_until_ready(
            &format!("{wanted} worker node(s) of {} Ready", cluster.name),
            &config.workers,
            ctx.cancellation(),
            || async move {
                let ready = ctx.nodes().count_ready_nodes(cluster, WORKER_SELECTOR).await?;
                Ok::<_, Error>(ready >= wanted)
            },
        )
        .await,
    )
}

/// Labels selecting the cluster's baseline apps
pub fn default_apps_selector(cluster: &ClusterHandle) -> BTreeMap<String, String> {
    if cluster.default_apps_managed {
        BTreeMap::from([(
            "giantswarm.io/managed-by".to_string(),
            cluster.default_apps_app_name(),
        )])
    } else {
        BTreeMap::from([
            ("giantswarm.io/cluster".to_string(), cluster.name.clone()),
            ("app.kubernetes.io/managed-by".to_string(), "Helm".to_string()),
        ])
    }
}

async fn default_apps_ready(
    ctx: &RunContext,
    cluster: &ClusterHandle,
    config: &ReadinessConfig,
) -> Result<GateCheck, Error> {
    const CHECK: &str = "default apps";
    let namespace = cluster.namespace();

    info!(cluster = %cluster.name, "waiting for all default apps to be ready");

    if cluster.default_apps_managed {
        let name = cluster.default_apps_app_name();
        let waited = poll_until_ready(
            &format!("App {name} to be deployed"),
            &config.default_apps_app,
            ctx.cancellation(),
            || ctx.apps().is_app_deployed(&name, &namespace),
        )
        .await;
        if let GateCheck::TimedOut(_, reason) = tolerate_timeout(CHECK, waited)? {
            return Ok(GateCheck::TimedOut(CHECK, reason));
        }
    }

    let apps = ctx
        .apps()
        .list_apps(&namespace, &default_apps_selector(cluster))
        .await?;
    let names: Vec<String> = apps.into_iter().map(|a| a.name).collect();
    info!(cluster = %cluster.name, count = names.len(), "waiting for default apps to be deployed");

    tolerate_timeout(
        CHECK,
        poll_until_ready(
            &format!("{} default app(s) of {} deployed", names.len(), cluster.name),
            &config.default_apps,
            ctx.cancellation(),
            || {
                let names = &names;
                let namespace = &namespace;
                async move {
                    for name in names {
                        if !ctx.apps().is_app_deployed(name, namespace).await? {
                            return Ok(false);
                        }
                    }
                    Ok::<_, Error>(true)
                }
            },
        )
        .await,
    )
}

fn tolerate_timeout(check: &'static str, waited: Result<(), Error>) -> Result<GateCheck, Error> {
    match waited {
        Ok(()) => Ok(GateCheck::Ready(check)),
        Err(e @ Error::Timeout { .. }) => {
            warn!(check, error = %e, "cluster readiness wait timed out, continuing");
            Ok(GateCheck::TimedOut(check, e.to_string()))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use apptest_common::config::EnvConfig;
    use mockall::predicate::eq;

    use crate::app::Organization;
    use crate::client::{
        AppStatus, MockAppClient, MockClusterProvisioner, MockNodeClient, MockReleaseResolver,
        Platform,
    };

    fn context(apps: MockAppClient, nodes: MockNodeClient) -> RunContext {
        let platform = Platform {
            apps: Arc::new(apps),
            nodes: Arc::new(nodes),
            provisioner: Arc::new(MockClusterProvisioner::new()),
            releases: Arc::new(MockReleaseResolver::new()),
        };
        let env = EnvConfig {
            kubeconfig: PathBuf::from("/tmp/kubeconfig"),
            context: "capa".to_string(),
            app_version: "1.2.3".to_string(),
            workload_cluster: None,
        };
        RunContext::new(platform, env, None)
    }

    fn cluster() -> ClusterHandle {
        ClusterHandle::workload("t-1", Organization::new("acme"))
    }

    fn status(name: &str) -> AppStatus {
        AppStatus {
            name: name.to_string(),
            namespace: "org-acme".to_string(),
            ..Default::default()
        }
    }

    fn healthy_nodes(control_plane: u32) -> MockNodeClient {
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_expected_control_plane_replicas()
            .returning(move |_| Ok(control_plane));
        nodes
            .expect_count_ready_nodes()
            .returning(move |_, selector| {
                Ok(if selector == CONTROL_PLANE_SELECTOR {
                    control_plane
                } else {
                    3
                })
            });
        nodes
    }

    async fn gate_checks(ctx: &RunContext, cluster: &ClusterHandle) -> Vec<GateCheck> {
        wait_for_cluster_ready(ctx, cluster, &ReadinessConfig::default())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.check)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn all_checks_ready() {
        let mut apps = MockAppClient::new();
        apps.expect_list_apps()
            .returning(|_, _| Ok(vec![status("t-1-cilium"), status("t-1-coredns")]));
        apps.expect_is_app_deployed().returning(|_, _| Ok(true));

        let ctx = context(apps, healthy_nodes(3));
        assert_eq!(
            gate_checks(&ctx, &cluster()).await,
            vec![
                GateCheck::Ready("control plane nodes"),
                GateCheck::Ready("worker nodes"),
                GateCheck::Ready("default apps"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn managed_control_plane_is_skipped() {
        let mut nodes = MockNodeClient::new();
        nodes.expect_expected_control_plane_replicas().returning(|_| Ok(0));
        nodes
            .expect_count_ready_nodes()
            .with(mockall::predicate::always(), eq(WORKER_SELECTOR))
            .returning(|_, _| Ok(2));

        let mut apps = MockAppClient::new();
        apps.expect_list_apps().returning(|_, _| Ok(vec![]));

        let ctx = context(apps, nodes);
        let checks = gate_checks(&ctx, &cluster()).await;
        assert!(matches!(checks[0], GateCheck::Skipped("control plane nodes", _)));
    }

    #[tokio::test(start_paused = true)]
    async fn node_timeouts_do_not_abort() {
        let mut nodes = MockNodeClient::new();
        nodes.expect_expected_control_plane_replicas().returning(|_| Ok(3));
        nodes.expect_count_ready_nodes().returning(|_, _| Ok(1));

        let mut apps = MockAppClient::new();
        apps.expect_list_apps().returning(|_, _| Ok(vec![]));

        let ctx = context(apps, nodes);
        let checks = wait_for_cluster_ready(&ctx, &cluster(), &ReadinessConfig::default())
            .await
            .unwrap();
        assert!(matches!(checks[0].check, GateCheck::TimedOut("control plane nodes", _)));
        assert!(matches!(checks[1].check, GateCheck::TimedOut("worker nodes", _)));
        assert_eq!(checks[2].check, GateCheck::Ready("default apps"));
        assert!(checks[0].elapsed >= Duration::from_secs(20 * 60));
        assert!(checks[1].elapsed >= Duration::from_secs(20 * 60));
        assert!(checks[2].elapsed < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn replica_lookup_failure_is_fatal() {
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_expected_control_plane_replicas()
            .returning(|_| Err(Error::internal("kcp list forbidden")));

        let ctx = context(MockAppClient::new(), nodes);
        let err = wait_for_cluster_ready(&ctx, &cluster(), &ReadinessConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("kcp list forbidden"));
    }

    #[tokio::test(start_paused = true)]
    async fn default_apps_app_is_awaited_first() {
        let mut apps = MockAppClient::new();
        apps.expect_is_app_deployed()
            .with(eq("t-1-default-apps"), eq("org-acme"))
            .returning(|_, _| Ok(true));
        apps.expect_list_apps()
            .withf(|ns, labels| {
                ns == "org-acme"
                    && labels.get("giantswarm.io/managed-by").map(String::as_str)
                        == Some("t-1-default-apps")
            })
            .returning(|_, _| Ok(vec![status("t-1-cert-manager")]));
        apps.expect_is_app_deployed()
            .with(eq("t-1-cert-manager"), eq("org-acme"))
            .returning(|_, _| Ok(true));

        let ctx = context(apps, healthy_nodes(1));
        let checks = gate_checks(&ctx, &cluster().with_default_apps_app(true)).await;
        assert_eq!(checks[2], GateCheck::Ready("default apps"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_default_apps_app_skips_app_list() {
        let mut apps = MockAppClient::new();
        apps.expect_is_app_deployed().returning(|_, _| Ok(false));
        apps.expect_list_apps().never();

        let ctx = context(apps, healthy_nodes(1));
        let checks = gate_checks(&ctx, &cluster().with_default_apps_app(true)).await;
        assert!(matches!(checks[2], GateCheck::TimedOut("default apps", _)));
    }

    #[test]
    fn selector_without_default_apps_app() {
        let selector = default_apps_selector(&cluster());
        assert_eq!(selector.get("giantswarm.io/cluster").unwrap(), "t-1");
        assert_eq!(selector.get("app.kubernetes.io/managed-by").unwrap(), "Helm");
    }
}
