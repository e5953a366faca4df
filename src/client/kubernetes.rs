//! Kubernetes-backed app and node client
//!
//! Apps are `application.giantswarm.io/v1alpha1` App resources on the
//! management cluster, with user values in a `<install-name>-userconfig`
//! ConfigMap next to them. Workload cluster nodes are reached through the
//! admin kubeconfig stored in the `<cluster>-kubeconfig` secret.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::ApiResource;
use kube::{Client, Config};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use apptest_common::retry::{retry_with_backoff_if, RetryConfig};
use apptest_common::{yaml, Error};

use super::{AppClient, AppStatus, NodeClient};
use crate::app::ApplicationIntent;
use crate::cluster::ClusterHandle;

const FIELD_MANAGER: &str = "apptest";
const APP_API_VERSION: &str = "application.giantswarm.io/v1alpha1";
const KCP_API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta1";
const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";
const CLUSTER_LABEL: &str = "giantswarm.io/cluster";
const APP_OPERATOR_VERSION_LABEL: &str = "app-operator.giantswarm.io/version";
const KUBECONFIG_SECRET_KEY: &str = "value";
const VALUES_KEY: &str = "values";
const CONTEXT_PREFIX: &str = "gs-";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// App and node operations against a management cluster
pub struct KubeAppClient {
    client: Client,
    cluster_name: String,
    workload_clients: Mutex<HashMap<String, Client>>,
}

impl KubeAppClient {
    /// Connect using `context` from the kubeconfig at `kubeconfig`
    pub async fn connect(kubeconfig: &Path, context: &str) -> Result<Self, Error> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig).map_err(|e| {
            let path = kubeconfig.display();
            Error::connection(context, format!("failed to read kubeconfig {path}: {e}"))
        })?;
        let client = client_for(kubeconfig, Some(context), context).await?;

        info!(context = %context, "connected to management cluster");
        Ok(Self::new(client, context.strip_prefix(CONTEXT_PREFIX).unwrap_or(context)))
    }

    /// Wrap an existing client
    pub fn new(client: Client, cluster_name: impl Into<String>) -> Self {
        Self {
            client,
            cluster_name: cluster_name.into(),
            workload_clients: Mutex::new(HashMap::new()),
        }
    }

    fn apps(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &app_resource())
    }

    /// Client for a workload cluster, cached per cluster
    async fn workload_client(&self, cluster: &ClusterHandle) -> Result<Client, Error> {
        let mut cache = self.workload_clients.lock().await;
        if let Some(client) = cache.get(&cluster.name) {
            return Ok(client.clone());
        }

        let secret_name = cluster.kubeconfig_secret_name();
        let namespace = cluster.namespace();
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        // A missing secret is expected while the cluster comes up, so this stays retryable
        let secret = secrets.get(&secret_name).await?;

        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_SECRET_KEY))
            .ok_or_else(|| {
                Error::connection(
                    &cluster.name,
                    format!("secret {namespace}/{secret_name} missing key {KUBECONFIG_SECRET_KEY}"),
                )
            })?;
        let raw = String::from_utf8(data.0.clone()).map_err(|e| {
            Error::connection(&cluster.name, format!("kubeconfig is not UTF-8: {e}"))
        })?;
        let kubeconfig = Kubeconfig::from_yaml(&raw)
            .map_err(|e| Error::connection(&cluster.name, format!("invalid kubeconfig: {e}")))?;

        let client = client_for(kubeconfig, None, &cluster.name).await?;
        debug!(cluster = %cluster.name, "connected to workload cluster");
        cache.insert(cluster.name.clone(), client.clone());
        Ok(client)
    }

    async fn apply_user_config(&self, app: &ApplicationIntent) -> Result<(), Error> {
        let namespace = app.namespace();
        let name = app.user_config_name();
        let config_map = ConfigMap {
            metadata: kube::api::ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(VALUES_KEY.to_string(), app.values_yaml()?)])),
            ..Default::default()
        };

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(&name, &apply_params(), &Patch::Apply(&config_map))
            .await?;
        Ok(())
    }
}

async fn client_for(
    kubeconfig: Kubeconfig,
    context: Option<&str>,
    target: &str,
) -> Result<Client, Error> {
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| Error::connection(target, format!("failed to load kubeconfig: {e}")))?;
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    let client = Client::try_from(config)
        .map_err(|e| Error::connection(target, format!("failed to create client: {e}")))?;

    // Fresh clusters refuse connections for a while after their kubeconfig appears
    retry_with_backoff_if(
        &RetryConfig::with_max_attempts(5),
        "apiserver version",
        || client.apiserver_version(),
        |e| !matches!(e, kube::Error::Api(ae) if ae.code == 401 || ae.code == 403),
    )
    .await
    .map_err(|e| Error::connection(target, format!("cluster not reachable: {e}")))?;

    Ok(client)
}

fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

fn app_resource() -> ApiResource {
    build_api_resource(APP_API_VERSION, "App")
}

fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = api_version
        .split_once('/')
        .unwrap_or(("", api_version));
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: format!("{}s", kind.to_lowercase()),
    }
}

/// The App resource for an intent
pub(crate) fn app_manifest(app: &ApplicationIntent) -> Value {
    let namespace = app.namespace();

    let mut labels = BTreeMap::from([(CLUSTER_LABEL.to_string(), app.cluster_name.clone())]);
    if app.in_cluster {
        labels.insert(APP_OPERATOR_VERSION_LABEL.to_string(), "0.0.0".to_string());
    }

    let kube_config = if app.in_cluster {
        json!({"inCluster": true})
    } else {
        json!({
            "inCluster": false,
            "context": {"name": format!("{}-admin@{}", app.cluster_name, app.cluster_name)},
            "secret": {"name": format!("{}-kubeconfig", app.cluster_name), "namespace": namespace},
        })
    };

    let mut spec = json!({
        "catalog": app.catalog,
        "name": app.app_name,
        "namespace": app.install_namespace,
        "version": app.version,
        "kubeConfig": kube_config,
    });
    if app.has_values() {
        spec["userConfig"] = json!({
            "configMap": {"name": app.user_config_name(), "namespace": namespace}
        });
    }

    json!({
        "apiVersion": APP_API_VERSION,
        "kind": "App",
        "metadata": {
            "name": app.install_name,
            "namespace": namespace,
            "labels": labels,
        },
        "spec": spec,
    })
}

fn app_status(obj: &DynamicObject) -> AppStatus {
    let status = obj.data.get("status");
    let field = |path: &[&str]| {
        path.iter()
            .try_fold(status?, |v, key| v.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    AppStatus {
        name: obj.metadata.name.clone().unwrap_or_default(),
        namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        version: field(&["version"]),
        release_status: field(&["release", "status"]),
    }
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

fn ignore_not_found(result: Result<(), kube::Error>) -> Result<(), Error> {
    match result {
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        other => other.map_err(Error::from),
    }
}

#[async_trait]
impl AppClient for KubeAppClient {
    async fn deploy_app(&self, app: &ApplicationIntent) -> Result<(), Error> {
        if app.has_values() {
            self.apply_user_config(app).await?;
        }

        let obj: DynamicObject = serde_json::from_value(app_manifest(app))?;
        self.apps(&app.namespace())
            .patch(&app.install_name, &apply_params(), &Patch::Apply(&obj))
            .await?;

        info!(
            app = %app.app_name,
            install_name = %app.install_name,
            version = %app.version,
            "app deployed"
        );
        Ok(())
    }

    async fn delete_app(&self, app: &ApplicationIntent) -> Result<(), Error> {
        let namespace = app.namespace();
        ignore_not_found(
            self.apps(&namespace)
                .delete(&app.install_name, &DeleteParams::default())
                .await
                .map(|_| ()),
        )?;

        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        ignore_not_found(
            config_maps
                .delete(&app.user_config_name(), &DeleteParams::default())
                .await
                .map(|_| ()),
        )?;

        info!(install_name = %app.install_name, "app deleted");
        Ok(())
    }

    async fn get_app(&self, name: &str, namespace: &str) -> Result<AppStatus, Error> {
        match self.apps(namespace).get(name).await {
            Ok(obj) => Ok(app_status(&obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(Error::not_found("App", name, namespace))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_apps(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AppStatus>, Error> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = self.apps(namespace).list(&params).await?;
        Ok(list.items.iter().map(app_status).collect())
    }

    async fn is_app_version(
        &self,
        name: &str,
        namespace: &str,
        version: &str,
    ) -> Result<bool, Error> {
        Ok(self.get_app(name, namespace).await?.is_version(version))
    }

    async fn is_app_deployed(&self, name: &str, namespace: &str) -> Result<bool, Error> {
        Ok(self.get_app(name, namespace).await?.is_deployed())
    }

    async fn management_cluster_name(&self) -> Result<String, Error> {
        Ok(self.cluster_name.clone())
    }

    async fn cluster_base_domain(
        &self,
        cluster_name: &str,
        namespace: &str,
    ) -> Result<String, Error> {
        let name = format!("{cluster_name}-cluster-values");
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = config_maps.get(&name).await?;

        let raw = cm
            .data
            .as_ref()
            .and_then(|d| d.get(VALUES_KEY))
            .ok_or_else(|| {
                let msg = format!("{namespace}/{name} has no {VALUES_KEY}");
                Error::resolution("cluster-values", msg)
            })?;
        let values = yaml::parse_values(raw)?;

        Ok(values
            .get("baseDomain")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl NodeClient for KubeAppClient {
    async fn expected_control_plane_replicas(&self, cluster: &ClusterHandle) -> Result<u32, Error> {
        let ar = build_api_resource(KCP_API_VERSION, "KubeadmControlPlane");
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &cluster.namespace(), &ar);
        let params =
            ListParams::default().labels(&format!("{CLUSTER_NAME_LABEL}={}", cluster.name));

        // Managed control planes (e.g. EKS) have no KubeadmControlPlane
        let replicas = api
            .list(&params)
            .await?
            .items
            .first()
            .and_then(|kcp| kcp.data.get("spec"))
            .and_then(|spec| spec.get("replicas"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Ok(u32::try_from(replicas).unwrap_or(u32::MAX))
    }

    async fn count_ready_nodes(
        &self,
        cluster: &ClusterHandle,
        selector: &str,
    ) -> Result<u32, Error> {
        let client = self.workload_client(cluster).await?;
        let nodes: Api<Node> = Api::all(client);
        let list = nodes.list(&ListParams::default().labels(selector)).await?;
        let ready = list.items.iter().filter(|n| is_node_ready(n)).count();
        Ok(u32::try_from(ready).unwrap_or(u32::MAX))
    }
}
