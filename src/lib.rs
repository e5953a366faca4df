//! apptest - declarative install and upgrade tests for apps on ephemeral clusters
//!
//! A suite names the app under test, how it is installed and which tests run
//! against it. The library then:
//! - resolves the version under test (`latest` becomes the newest release)
//! - finds or creates the target cluster and waits for it to be ready
//! - installs the app directly, through a bundle, or through the cluster
//!   definition for apps the cluster ships by default
//! - for upgrade suites, installs the latest release first
//! - runs the tests, then removes everything it created
//!
//! # Modules
//!
//! - [`suite`] - Suite builder and lifecycle
//! - [`state`] - Run context shared with hooks and tests
//! - [`bundles`] - Bundle child value overrides
//! - [`readiness`] - Cluster readiness gate
//! - [`client`] - Collaborator traits and their Kubernetes implementations
//! - [`report`] - Step results and the run summary

#![deny(missing_docs)]

pub mod app;
pub mod aws;
pub mod bundles;
mod cleanup;
pub mod client;
pub mod cluster;
pub mod install;
pub mod readiness;
pub mod report;
pub mod state;
pub mod suite;

pub use apptest_common::config::{EnvConfig, TestConfig};
pub use apptest_common::telemetry::init_logging;
pub use apptest_common::{Error, Result};

pub use app::{ApplicationIntent, Organization};
pub use cluster::ClusterHandle;
pub use report::SuiteReport;
pub use state::RunContext;
pub use suite::{Suite, SuiteBuilder, Timeouts};
