//! In-memory collaborators recording what a suite run does

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use apptest::client::{
    AppClient, AppStatus, ClusterProvisioner, NodeClient, Platform, ReleaseResolver,
};
use apptest::{ApplicationIntent, ClusterHandle, EnvConfig, Error, Organization, TestConfig};
use apptest_common::config::ExistingCluster;

pub const CLUSTER: &str = "t-abc";
pub const ORG: &str = "acme";

/// Fake management cluster, provisioner and release source
pub struct FakePlatform {
    events: Mutex<Vec<String>>,
    installed: Mutex<HashMap<String, String>>,
    default_checks: Mutex<Vec<String>>,
    cluster_overrides: Mutex<Vec<ApplicationIntent>>,
    pub default_apps: Vec<String>,
    pub latest: HashMap<String, String>,
    pub fail_delete: bool,
    pub fail_standup: bool,
    pub mc_name: String,
    pub base_domain: String,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            installed: Mutex::new(HashMap::new()),
            default_checks: Mutex::new(Vec::new()),
            cluster_overrides: Mutex::new(Vec::new()),
            default_apps: Vec::new(),
            latest: HashMap::from([
                ("hello-world".to_string(), "v1.0.0".to_string()),
                ("security-bundle".to_string(), "v1.8.0".to_string()),
            ]),
            fail_delete: false,
            fail_standup: false,
            mc_name: "golem".to_string(),
            base_domain: "golem.ephemeral.example.io".to_string(),
        }
    }
}

impl FakePlatform {
    pub fn with_installed(self, install_name: &str, version: &str) -> Self {
        self.installed
            .lock()
            .unwrap()
            .insert(install_name.to_string(), version.to_string());
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn has_event(&self, prefix: &str) -> bool {
        self.events().iter().any(|e| e.starts_with(prefix))
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// App names the provisioner was asked about
    pub fn default_checks(&self) -> Vec<String> {
        self.default_checks.lock().unwrap().clone()
    }

    /// Every app override passed to a cluster create or apply
    pub fn cluster_overrides(&self) -> Vec<ApplicationIntent> {
        self.cluster_overrides.lock().unwrap().clone()
    }

    /// Record an event from a hook or test
    pub fn note(&self, event: impl Into<String>) {
        self.log(event.into());
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    /// Remember the cluster's app overrides and describe them for the event log
    fn record_overrides(&self, cluster: &ClusterHandle) -> String {
        self.cluster_overrides
            .lock()
            .unwrap()
            .extend(cluster.app_overrides.iter().cloned());
        let names: Vec<String> = cluster
            .app_overrides
            .iter()
            .map(|a| format!("{}@{}", a.app_name, a.version))
            .collect();
        names.join(",")
    }
}

/// Platform backed entirely by `fake`
pub fn platform(fake: &Arc<FakePlatform>) -> Platform {
    Platform {
        apps: fake.clone(),
        nodes: fake.clone(),
        provisioner: fake.clone(),
        releases: fake.clone(),
    }
}

pub fn env(version: &str) -> EnvConfig {
    EnvConfig {
        kubeconfig: PathBuf::from("/tmp/kubeconfig"),
        context: "gs-golem".to_string(),
        app_version: version.to_string(),
        workload_cluster: None,
    }
}

pub fn config() -> TestConfig {
    TestConfig::parse("appName: hello-world\nrepoName: hello-world\nappCatalog: giantswarm\n")
        .unwrap()
}

#[async_trait]
impl AppClient for FakePlatform {
    async fn deploy_app(&self, app: &ApplicationIntent) -> Result<(), Error> {
        self.log(format!("deploy {}@{}", app.install_name, app.version));
        self.installed
            .lock()
            .unwrap()
            .insert(app.install_name.clone(), app.version.clone());
        Ok(())
    }

    async fn delete_app(&self, app: &ApplicationIntent) -> Result<(), Error> {
        self.log(format!("delete {}", app.install_name));
        if self.fail_delete {
            return Err(Error::internal("apps.application.giantswarm.io is forbidden"));
        }
        self.installed.lock().unwrap().remove(&app.install_name);
        Ok(())
    }

    async fn get_app(&self, name: &str, namespace: &str) -> Result<AppStatus, Error> {
        self.log(format!("get {name}"));
        match self.installed.lock().unwrap().get(name) {
            Some(version) => Ok(AppStatus {
                name: name.to_string(),
                namespace: namespace.to_string(),
                version: Some(version.clone()),
                release_status: Some("deployed".to_string()),
            }),
            None => Err(Error::not_found("App", name, namespace)),
        }
    }

    async fn list_apps(
        &self,
        _namespace: &str,
        _labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AppStatus>, Error> {
        Ok(Vec::new())
    }

    async fn is_app_version(
        &self,
        name: &str,
        _namespace: &str,
        version: &str,
    ) -> Result<bool, Error> {
        Ok(self.installed.lock().unwrap().get(name).map(String::as_str) == Some(version))
    }

    async fn is_app_deployed(&self, name: &str, _namespace: &str) -> Result<bool, Error> {
        Ok(self.installed.lock().unwrap().contains_key(name))
    }

    async fn management_cluster_name(&self) -> Result<String, Error> {
        Ok(self.mc_name.clone())
    }

    async fn cluster_base_domain(
        &self,
        cluster_name: &str,
        _namespace: &str,
    ) -> Result<String, Error> {
        self.log(format!("base domain {cluster_name}"));
        Ok(self.base_domain.clone())
    }
}

#[async_trait]
impl NodeClient for FakePlatform {
    async fn expected_control_plane_replicas(
        &self,
        _cluster: &ClusterHandle,
    ) -> Result<u32, Error> {
        Ok(0)
    }

    async fn count_ready_nodes(
        &self,
        _cluster: &ClusterHandle,
        _selector: &str,
    ) -> Result<u32, Error> {
        Ok(3)
    }
}

#[async_trait]
impl ClusterProvisioner for FakePlatform {
    async fn load_or_build(
        &self,
        context: &str,
        existing: Option<ExistingCluster>,
    ) -> Result<ClusterHandle, Error> {
        self.log(format!("load {context}"));
        Ok(match existing {
            Some(c) => ClusterHandle::workload(c.name, Organization::new(ORG)),
            None => ClusterHandle::workload(CLUSTER, Organization::new(ORG)),
        })
    }

    async fn is_default_app(
        &self,
        _cluster: &ClusterHandle,
        app: &ApplicationIntent,
    ) -> Result<bool, Error> {
        self.default_checks.lock().unwrap().push(app.app_name.clone());
        Ok(self.default_apps.contains(&app.app_name))
    }

    async fn standup(&self, cluster: &ClusterHandle) -> Result<ClusterHandle, Error> {
        self.log(format!("standup {} [{}]", cluster.name, self.record_overrides(cluster)));
        if self.fail_standup {
            return Err(Error::resolution("cluster", "quota exceeded"));
        }
        Ok(cluster.clone())
    }

    async fn apply_cluster(&self, cluster: &ClusterHandle) -> Result<(), Error> {
        self.log(format!("apply {} [{}]", cluster.name, self.record_overrides(cluster)));
        Ok(())
    }

    async fn teardown(&self, cluster: &ClusterHandle) -> Result<(), Error> {
        self.log(format!("teardown {}", cluster.name));
        Ok(())
    }
}

#[async_trait]
impl ReleaseResolver for FakePlatform {
    async fn latest_version(&self, artifact: &str) -> Result<String, Error> {
        self.log(format!("latest {artifact}"));
        self.latest
            .get(artifact)
            .cloned()
            .ok_or_else(|| {
                Error::resolution("latest-version", format!("no releases for {artifact}"))
            })
    }
}
