//! Error types for lab-host
//!
//! Registration errors are returned synchronously from `register`.
//! Resolution and activation errors are delivered to every caller waiting on
//! the same plugin, so the type is `Clone`.

use thiserror::Error;

/// Main error type for plugin registration, resolution and activation
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Plugin '{0}' is already registered")]
    DuplicateId(String),

    #[error("Token '{token}' is already provided by plugin '{existing}' (rejected '{plugin}')")]
    DuplicateProvider {
        plugin: String,
        token: String,
        existing: String,
    },

    #[error("Plugin '{plugin}' depends on its own token '{token}'")]
    SelfDependency { plugin: String, token: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cyclic plugin dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Plugin '{plugin}' requires '{token}' but no plugin provides it")]
    UnresolvedDependency { plugin: String, token: String },

    #[error("Plugin '{plugin}' cannot activate: dependency '{dependency}' failed: {reason}")]
    DependencyFailed {
        plugin: String,
        dependency: String,
        reason: String,
    },

    #[error("Plugin '{plugin}' failed to activate: {message}")]
    Activation { plugin: String, message: String },

    #[error("Plugin '{plugin}' failed to deactivate: {message}")]
    Deactivation { plugin: String, message: String },

    #[error("Plugin '{plugin}' is still required by: {}", dependents.join(", "))]
    InUse {
        plugin: String,
        dependents: Vec<String>,
    },

    #[error("Plugin '{0}' is being deactivated")]
    Deactivating(String),

    #[error("Plugin '{plugin}' declares '{token}' but its activation returned no service")]
    MissingService { plugin: String, token: String },

    #[error("Service for token '{token}' is not of type {expected}")]
    ServiceTypeMismatch { token: String, expected: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Wrap an error raised by a plugin's own `activate` body
    pub fn activation(plugin: impl Into<String>, err: &anyhow::Error) -> Self {
        Error::Activation {
            plugin: plugin.into(),
            message: format!("{:#}", err),
        }
    }

    /// Wrap an error raised by a plugin's own `deactivate` body
    pub fn deactivation(plugin: impl Into<String>, err: &anyhow::Error) -> Self {
        Error::Deactivation {
            plugin: plugin.into(),
            message: format!("{:#}", err),
        }
    }

    /// Stable code string for reports
    pub fn code(&self) -> &'static str {
        match self {
            Error::DuplicateId(_) => "DUPLICATE_ID",
            Error::DuplicateProvider { .. } => "DUPLICATE_PROVIDER",
            Error::SelfDependency { .. } => "SELF_DEPENDENCY",
            Error::NotFound(_) => "NOT_FOUND",
            Error::CyclicDependency { .. } => "CYCLIC_DEPENDENCY",
            Error::UnresolvedDependency { .. } => "UNRESOLVED_DEPENDENCY",
            Error::DependencyFailed { .. } => "DEPENDENCY_FAILED",
            Error::Activation { .. } => "ACTIVATION_FAILED",
            Error::Deactivation { .. } => "DEACTIVATION_FAILED",
            Error::InUse { .. } => "IN_USE",
            Error::Deactivating(_) => "DEACTIVATING",
            Error::MissingService { .. } => "MISSING_SERVICE",
            Error::ServiceTypeMismatch { .. } => "SERVICE_TYPE_MISMATCH",
            Error::Config(_) => "CONFIGURATION_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// True for errors raised while registering a descriptor
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            Error::DuplicateId(_) | Error::DuplicateProvider { .. } | Error::SelfDependency { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_path_display() {
        let err = Error::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic plugin dependency: a -> b -> a");
        assert_eq!(err.code(), "CYCLIC_DEPENDENCY");
    }

    #[test]
    fn test_activation_keeps_context_chain() {
        let source = anyhow::anyhow!("socket closed").context("opening kernel channel");
        let err = Error::activation("kernels", &source);
        let msg = err.to_string();
        assert!(msg.contains("kernels"));
        assert!(msg.contains("opening kernel channel"));
        assert!(msg.contains("socket closed"));
    }

    #[test]
    fn test_registration_classification() {
        assert!(Error::DuplicateId("x".into()).is_registration_error());
        assert!(!Error::not_found("x").is_registration_error());
    }
}
