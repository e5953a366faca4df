//! Installing an app through a bundle app
//!
//! Some apps are never installed directly; a bundle app installs them as
//! children, configured through the bundle's values:
//!
//! ```yaml
//! apps:
//!   kyvernoPolicies:
//!     enabled: true
//!     catalog: giantswarm
//!     version: 1.2.3
//!     appName: kyverno-policies
//!     chartName: kyverno-policies
//!     namespace: kyverno
//! ```
//!
//! Bundles disagree on how the child's key under `apps` is spelled. The
//! [`NamingConvention`] picks the spelling; `Auto` looks the bundle up in
//! [`KNOWN_BUNDLES`].

use serde_json::{json, Value};

use apptest_common::{values, Error};

use crate::app::ApplicationIntent;

/// How a child app's key under `apps` is spelled in a bundle's values
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NamingConvention {
    /// Look the bundle up in [`KNOWN_BUNDLES`]
    #[default]
    Auto,
    /// `kyverno-policies` becomes `kyvernoPolicies`
    CamelCase,
    /// The app name is used as is
    HyphenCase,
    /// Leave the bundle values untouched
    None,
}

/// Bundles with a known child naming convention
pub const KNOWN_BUNDLES: &[(&str, NamingConvention)] = &[
    ("security-bundle", NamingConvention::CamelCase),
    ("observability-bundle", NamingConvention::CamelCase),
    ("gateway-api-bundle", NamingConvention::CamelCase),
    ("service-mesh-bundle", NamingConvention::HyphenCase),
    ("auth-bundle", NamingConvention::HyphenCase),
];

impl NamingConvention {
    /// Resolve `Auto` against the known bundle table
    ///
    /// Bundle names match case-insensitively. Explicit conventions are
    /// returned unchanged.
    pub fn resolve(self, bundle_app_name: &str) -> Result<Self, Error> {
        if self != NamingConvention::Auto {
            return Ok(self);
        }
        KNOWN_BUNDLES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(bundle_app_name))
            .map(|(_, convention)| *convention)
            .ok_or_else(|| {
                Error::configuration(format!(
                    "bundle '{bundle_app_name}' is unsupported, \
                     child version override format is unknown"
                ))
            })
    }

    /// Key of `app_name` under the bundle's `apps`
    ///
    /// Returns `None` for [`NamingConvention::None`]; `Auto` must be resolved
    /// first.
    pub fn child_key(self, app_name: &str) -> Result<Option<String>, Error> {
        match self {
            NamingConvention::CamelCase => Ok(Some(to_camel_case(app_name))),
            NamingConvention::HyphenCase => Ok(Some(app_name.to_string())),
            NamingConvention::None => Ok(None),
            NamingConvention::Auto => Err(Error::internal_with_context(
                "bundles",
                "naming convention must be resolved before computing the child key",
            )),
        }
    }
}

/// `kyverno-policies` → `kyvernoPolicies`
///
/// Each hyphen separated word is title-cased, the words are joined and the
/// first character is lower-cased.
pub fn to_camel_case(name: &str) -> String {
    let joined: String = name
        .split('-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect();

    let mut chars = joined.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Values that make a bundle install `child` at its version
///
/// The child fragment is deep-merged over `bundle_values`. The input is not
/// modified; with [`NamingConvention::None`] it is returned as is.
pub fn merge_child_values(
    bundle_app_name: &str,
    bundle_values: &Value,
    child: &ApplicationIntent,
    convention: NamingConvention,
) -> Result<Value, Error> {
    let Some(key) = convention.resolve(bundle_app_name)?.child_key(&child.app_name)? else {
        return Ok(bundle_values.clone());
    };

    let fragment = json!({
        "apps": {
            key: {
                "enabled": true,
                "catalog": child.catalog,
                "version": child.version,
                "appName": child.app_name,
                "chartName": child.app_name,
                "namespace": child.install_namespace,
            }
        }
    });

    Ok(values::merge(bundle_values, &fragment))
}

/// Bundle intent configured to install `child`
pub fn override_child_app(
    bundle: ApplicationIntent,
    child: &ApplicationIntent,
    convention: NamingConvention,
) -> Result<ApplicationIntent, Error> {
    let merged = merge_child_values(&bundle.app_name, &bundle.values, child, convention)?;
    Ok(bundle.with_values(merged))
}

/// An app installed through its bundle
#[derive(Clone, Debug, PartialEq)]
pub struct BundleRelationship {
    /// The bundle as released, before the child override
    pub base: ApplicationIntent,
    /// The bundle carrying the child override; the unit that gets installed
    pub bundle: ApplicationIntent,
    /// The app under test
    pub child: ApplicationIntent,
    /// Resolved naming convention
    pub convention: NamingConvention,
}

impl BundleRelationship {
    /// Relate `base` and `child`, resolving the naming convention and
    /// computing the bundle's values.
    pub fn new(
        base: ApplicationIntent,
        child: ApplicationIntent,
        convention: NamingConvention,
    ) -> Result<Self, Error> {
        let convention = convention.resolve(&base.app_name)?;
        let bundle = override_child_app(base.clone(), &child, convention)?;
        Ok(Self {
            base,
            bundle,
            child,
            convention,
        })
    }
}
