//! Common types for apptest: errors, configuration, polling and values handling

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod poll;
pub mod retry;
pub mod telemetry;
pub mod template;
pub mod values;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Kubeconfig of the management cluster the suite runs against
pub const ENV_KUBECONFIG: &str = "E2E_KUBECONFIG";

/// Context to use within the management cluster kubeconfig
pub const ENV_KUBECONFIG_CONTEXT: &str = "E2E_KUBECONFIG_CONTEXT";

/// Version of the app under test (`latest` resolves to the newest release)
pub const ENV_APP_VERSION: &str = "E2E_APP_VERSION";

/// Name of an existing workload cluster to reuse instead of creating one
pub const ENV_WC_NAME: &str = "E2E_WC_NAME";

/// Namespace of the existing workload cluster named by [`ENV_WC_NAME`]
pub const ENV_WC_NAMESPACE: &str = "E2E_WC_NAMESPACE";

/// Version string that is resolved to the newest released version
pub const LATEST_VERSION: &str = "latest";
