//! Error types for apptest suites
//!
//! Errors are grouped by how the lifecycle reacts to them: configuration and
//! resolution errors abort before anything is created, precondition
//! violations fail the suite, timeouts are fatal everywhere except the
//! cluster readiness gate, and teardown errors are collected rather than
//! short-circuiting.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for apptest operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Missing or invalid suite configuration (env vars, config file, bundle naming)
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's missing or invalid
        message: String,
    },

    /// A collaborator needed to resolve the run (release metadata, cluster builder) failed
    #[error("resolution error [{context}]: {message}")]
    Resolution {
        /// What was being resolved (e.g., "latest-version", "cluster")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// The looked up resource does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind (e.g., "App")
        kind: String,
        /// Resource name
        name: String,
        /// Resource namespace
        namespace: String,
    },

    /// A test precondition does not hold (e.g., the app is already installed)
    #[error("precondition failed: {message}")]
    Precondition {
        /// Description of the violated precondition
        message: String,
    },

    /// An operation did not complete in its allotted window
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// The window that elapsed
        timeout: Duration,
    },

    /// The run was cancelled while waiting
    #[error("cancelled while waiting for {operation}")]
    Cancelled {
        /// What was being waited on
        operation: String,
    },

    /// Credentials or connectivity to a cluster could not be established
    #[error("connection error [{target}]: {message}")]
    Connection {
        /// Which endpoint or cluster was being reached
        target: String,
        /// Description of what failed
        message: String,
    },

    /// A user-supplied hook or test failed
    #[error("{hook} failed: {message}")]
    Hook {
        /// Name of the hook or test case
        hook: String,
        /// Failure reported by the hook
        message: String,
    },

    /// One or more teardown steps failed
    #[error("teardown step '{step}' failed: {message}")]
    Teardown {
        /// Name of the last failing teardown step
        step: String,
        /// Failure reported by that step
        message: String,
    },

    /// One or more user tests failed
    #[error("{} test(s) failed: {}", failed.len(), failed.join(", "))]
    TestsFailed {
        /// Names of the failing tests
        failed: Vec<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a resolution error with context
    pub fn resolution(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Resolution {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a not found error for a namespaced resource
    pub fn not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a precondition error with the given message
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition {
            message: msg.into(),
        }
    }

    /// Create a timeout error for an operation
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a cancellation error for an operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a connection error for a target
    pub fn connection(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Connection {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create a hook failure
    pub fn hook(hook: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Hook {
            hook: hook.into(),
            message: msg.into(),
        }
    }

    /// Create a teardown failure for a step
    pub fn teardown(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Teardown {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    ///
    /// For simple internal errors without specific context.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether a lookup failed because the resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Whether the error is a timeout (including a cancelled wait)
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Cancelled { .. })
    }

    /// Whether a readiness probe must stop on this error instead of retrying
    ///
    /// Credential and connectivity failures will not fix themselves between
    /// polls, so they surface immediately.
    pub fn aborts_polling(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Configuration { .. } | Error::Cancelled { .. }
        )
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Resolution { context, .. } => Some(context),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
