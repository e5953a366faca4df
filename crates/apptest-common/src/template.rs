//! Values file templating
//!
//! Values files may reference the cluster the suite runs against, which is
//! only known once the run has resolved its cluster:
//!
//! ```yaml
//! clusterID: {{ cluster_name }}
//! serviceMonitor:
//!   namespace: {{ install_namespace }}
//! ```
//!
//! Rendering uses minijinja with strict undefined handling so a typo in a
//! variable name fails the run instead of producing an empty value.

use std::path::Path;

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{yaml, Error};

/// Variables exposed to a values file template
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ValuesContext {
    /// Name of the cluster the app is installed into
    pub cluster_name: String,
    /// Organization owning the cluster
    pub organization: String,
    /// Namespace of the organization (`org-<organization>`)
    pub namespace: String,
    /// Namespace the app is installed into
    pub install_namespace: String,
}

/// Renders values file templates
pub struct ValuesRenderer {
    env: Environment<'static>,
}

impl Default for ValuesRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ValuesRenderer {
    /// Create a renderer with strict undefined handling
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Render a values template with the given context
    pub fn render(&self, template: &str, ctx: &ValuesContext) -> Result<String, Error> {
        self.env
            .render_str(template, ctx)
            .map_err(|e| Error::configuration(format!("failed to render values template: {e}")))
    }

    /// Render and parse a values document
    ///
    /// Empty documents yield an empty mapping.
    pub fn render_values(&self, template: &str, ctx: &ValuesContext) -> Result<Value, Error> {
        yaml::parse_values(&self.render(template, ctx)?)
    }

    /// Load a values file from disk
    ///
    /// A file that does not exist means no values.
    pub fn load_values_file(&self, path: &Path, ctx: &ValuesContext) -> Result<Value, Error> {
        let template = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no values file, using empty values");
                return Ok(Value::Object(Default::default()));
            }
            Err(e) => {
                return Err(Error::configuration(format!(
                    "failed to read values file {}: {e}",
                    path.display()
                )))
            }
        };
        self.render_values(&template, ctx)
    }
}
