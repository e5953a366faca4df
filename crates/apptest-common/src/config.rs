//! Suite configuration
//!
//! Two sources feed a run:
//! - `config.yaml`, shipped next to the test binary, describes the app under
//!   test ([`TestConfig`])
//! - environment variables set by the CI pipeline point the run at a
//!   management cluster and choose the version under test ([`EnvConfig`])

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    yaml, Error, ENV_APP_VERSION, ENV_KUBECONFIG, ENV_KUBECONFIG_CONTEXT, ENV_WC_NAME,
    ENV_WC_NAMESPACE, LATEST_VERSION,
};

/// File name of the suite configuration
pub const CONFIG_FILE: &str = "config.yaml";

/// AWS settings for suites that call AWS APIs through IRSA
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwsConfig {
    /// Role assumed by the test pod
    #[serde(rename = "iamRoleARN", default)]
    pub iam_role_arn: String,
    /// Region for AWS clients
    #[serde(default)]
    pub region: String,
}

/// Description of the app under test, read from `config.yaml`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TestConfig {
    /// Name of the app (and of its chart)
    pub app_name: String,
    /// Repository the app is released from
    pub repo_name: String,
    /// Catalog the app is installed from
    pub app_catalog: String,
    /// Providers the suite runs on
    pub providers: Vec<String>,
    /// Run against the management cluster instead of a workload cluster
    #[serde(rename = "isMCTest")]
    pub is_mc_test: bool,
    /// Optional AWS settings
    pub aws: Option<AwsConfig>,
}

impl TestConfig {
    /// Load `config.yaml` from next to the running executable, falling back to
    /// two directories above it.
    ///
    /// Missing or unreadable files yield the default config.
    pub fn load() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        let candidate = exe_dir.join(CONFIG_FILE);
        let path = if candidate.exists() {
            candidate
        } else {
            exe_dir.join("..").join("..").join(CONFIG_FILE)
        };

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "using default suite config");
                Self::default()
            }
        }
    }

    /// Load a config file from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse config YAML
    pub fn parse(content: &str) -> Result<Self, Error> {
        match yaml::parse_yaml(content)? {
            serde_json::Value::Null => Ok(Self::default()),
            value => Ok(serde_json::from_value(value)?),
        }
    }

    /// Whether an IAM role is configured
    pub fn has_aws_config(&self) -> bool {
        self.aws
            .as_ref()
            .is_some_and(|aws| !aws.iam_role_arn.is_empty())
    }

    /// Configured IAM role ARN, empty when unset
    pub fn aws_iam_role_arn(&self) -> &str {
        self.aws
            .as_ref()
            .map(|aws| aws.iam_role_arn.as_str())
            .unwrap_or_default()
    }

    /// Configured AWS region, or `default` when unset
    pub fn aws_region<'a>(&'a self, default: &'a str) -> &'a str {
        match &self.aws {
            Some(aws) if !aws.region.is_empty() => &aws.region,
            _ => default,
        }
    }
}

/// A workload cluster created outside the suite
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistingCluster {
    /// Cluster name
    pub name: String,
    /// Namespace holding the cluster resources
    pub namespace: String,
}

/// Run settings taken from the environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvConfig {
    /// Path of the management cluster kubeconfig
    pub kubeconfig: PathBuf,
    /// Context within the kubeconfig
    pub context: String,
    /// Version under test, possibly `latest`
    pub app_version: String,
    /// Existing workload cluster to reuse
    pub workload_cluster: Option<ExistingCluster>,
}

impl EnvConfig {
    /// Read the run settings from the process environment
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the run settings through a lookup function
    ///
    /// Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str, what: &str| {
            get(key).ok_or_else(|| Error::configuration(format!("`{key}` must be set to {what}")))
        };

        let kubeconfig = require(ENV_KUBECONFIG, "the kubeconfig of the test management cluster")?;
        let context = require(ENV_KUBECONFIG_CONTEXT, "the kubeconfig context to use")?;
        let app_version = require(ENV_APP_VERSION, "the app version to test (or `latest`)")?;

        let workload_cluster = match (get(ENV_WC_NAME), get(ENV_WC_NAMESPACE)) {
            (Some(name), Some(namespace)) => Some(ExistingCluster { name, namespace }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(Error::configuration(format!(
                    "`{ENV_WC_NAMESPACE}` must be set when `{ENV_WC_NAME}` is"
                )))
            }
            (None, Some(_)) => {
                return Err(Error::configuration(format!(
                    "`{ENV_WC_NAME}` must be set when `{ENV_WC_NAMESPACE}` is"
                )))
            }
        };

        debug!(
            kubeconfig = %kubeconfig,
            context = %context,
            app_version = %app_version,
            existing_cluster = workload_cluster.is_some(),
            "environment resolved"
        );

        Ok(Self {
            kubeconfig: PathBuf::from(kubeconfig),
            context,
            app_version,
            workload_cluster,
        })
    }

    /// Whether the version under test still has to be resolved
    pub fn wants_latest(&self) -> bool {
        self.app_version == LATEST_VERSION
    }
}

/// Publishes the concrete version under test through `E2E_APP_VERSION`
///
/// Tests that read the variable see the resolved version for the duration of
/// the run. Dropping the guard resets it to `latest`.
#[derive(Debug)]
pub struct AppVersionOverride {
    _private: (),
}

impl AppVersionOverride {
    /// Set `E2E_APP_VERSION` to `version` until the guard is dropped
    pub fn set(version: &str) -> Self {
        std::env::set_var(ENV_APP_VERSION, version);
        Self { _private: () }
    }
}

impl Drop for AppVersionOverride {
    fn drop(&mut self) {
        std::env::set_var(ENV_APP_VERSION, LATEST_VERSION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        (ENV_KUBECONFIG, "/tmp/mc.kubeconfig"),
        (ENV_KUBECONFIG_CONTEXT, "capa"),
        (ENV_APP_VERSION, "1.2.3"),
    ];

    #[test]
    fn test_parse_full_config() {
        let config = TestConfig::parse(
            r#"
appName: hello-world
repoName: hello-world-app
appCatalog: giantswarm
providers:
  - capa
  - capz
isMCTest: false
aws:
  iamRoleARN: arn:aws:iam::123456789012:role/test
  region: eu-west-1
"#,
        )
        .unwrap();

        assert_eq!(config.app_name, "hello-world");
        assert_eq!(config.repo_name, "hello-world-app");
        assert_eq!(config.app_catalog, "giantswarm");
        assert_eq!(config.providers, vec!["capa", "capz"]);
        assert!(!config.is_mc_test);
        assert!(config.has_aws_config());
        assert_eq!(config.aws_iam_role_arn(), "arn:aws:iam::123456789012:role/test");
        assert_eq!(config.aws_region("us-east-1"), "eu-west-1");
    }

    #[test]
    fn test_aws_defaults() {
        let config = TestConfig::parse("appName: x\n").unwrap();
        assert!(!config.has_aws_config());
        assert_eq!(config.aws_iam_role_arn(), "");
        assert_eq!(config.aws_region("us-east-1"), "us-east-1");

        let config = TestConfig::parse("aws:\n  region: eu-central-1\n").unwrap();
        assert!(!config.has_aws_config());
        assert_eq!(config.aws_region("us-east-1"), "eu-central-1");
    }

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(TestConfig::parse("").unwrap(), TestConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "appName: cert-manager\nisMCTest: true").unwrap();
        let config = TestConfig::load_from(file.path()).unwrap();
        assert_eq!(config.app_name, "cert-manager");
        assert!(config.is_mc_test);
    }

    #[test]
    fn test_load_from_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = TestConfig::load_from(&dir.path().join(CONFIG_FILE)).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_env_config_requires_kubeconfig() {
        let err = EnvConfig::from_lookup(lookup(&[(ENV_APP_VERSION, "1.0.0")])).unwrap_err();
        assert!(err.to_string().contains(ENV_KUBECONFIG));
    }

    #[test]
    fn test_env_config_empty_counts_as_missing() {
        let err = EnvConfig::from_lookup(lookup(&[
            (ENV_KUBECONFIG, "/tmp/mc.kubeconfig"),
            (ENV_KUBECONFIG_CONTEXT, "capa"),
            (ENV_APP_VERSION, "  "),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(ENV_APP_VERSION));
    }

    #[test]
    fn test_env_config_without_existing_cluster() {
        let env = EnvConfig::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(env.kubeconfig, PathBuf::from("/tmp/mc.kubeconfig"));
        assert_eq!(env.context, "capa");
        assert_eq!(env.app_version, "1.2.3");
        assert!(env.workload_cluster.is_none());
        assert!(!env.wants_latest());
    }

    #[test]
    fn test_env_config_with_existing_cluster() {
        let mut pairs = BASE.to_vec();
        pairs.push((ENV_WC_NAME, "t-existing"));
        pairs.push((ENV_WC_NAMESPACE, "org-acme"));
        let env = EnvConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(
            env.workload_cluster,
            Some(ExistingCluster {
                name: "t-existing".to_string(),
                namespace: "org-acme".to_string()
            })
        );
    }

    #[test]
    fn test_env_config_half_existing_cluster_is_an_error() {
        let mut pairs = BASE.to_vec();
        pairs.push((ENV_WC_NAME, "t-existing"));
        let err = EnvConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains(ENV_WC_NAMESPACE));
    }

    #[test]
    fn test_latest_version() {
        let mut pairs = BASE.to_vec();
        pairs[2] = (ENV_APP_VERSION, LATEST_VERSION);
        assert!(EnvConfig::from_lookup(lookup(&pairs)).unwrap().wants_latest());
    }
}
