//! # Errors
//!
//! Library error type shared by the converter, the state machine and both reconcilers.
//!
//! Errors fall into four groups, and the group decides how a reconciler reacts:
//!
//! - **not found**: the desired absence already holds, callers treat it as success
//! - **transient** (timeouts, rate limits, conflicts, API errors): requeued after a bounded delay
//! - **data** (conversion, validation, invariant violations): surfaced on a condition, still requeued
//! - **startup** configuration errors are wrapped with `anyhow` in `main` and abort the process

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("conversion failed in {extender}: {message}")]
    Conversion {
        extender: &'static str,
        message: String,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(String),

    #[error("failed to fetch kubeconfig for cluster '{cluster}': {message}")]
    KubeconfigFetch { cluster: String, message: String },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation '{operation}' timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },
}

impl Error {
    pub fn conversion(extender: &'static str, message: impl Into<String>) -> Self {
        Self::Conversion {
            extender,
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    pub fn fetch(cluster: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KubeconfigFetch {
            cluster: cluster.into(),
            message: message.into(),
        }
    }

    fn api_code(&self) -> Option<u16> {
        match self {
            Self::Kube(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    /// Object is absent, either reported by the API server or detected locally
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. }) || self.api_code() == Some(404)
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(response)) => {
                response.code == 409 && response.reason == "AlreadyExists"
            }
            _ => false,
        }
    }

    /// Optimistic-concurrency conflict on update
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(response)) => {
                response.code == 409 && response.reason != "AlreadyExists"
            }
            _ => false,
        }
    }

    /// Malformed input that retrying alone will not fix
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::Conversion { .. } | Self::Validation(_) | Self::Invariant(_) | Self::Kubeconfig(_)
        )
    }

    /// Short label for metrics and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kube",
            Self::NotFound { .. } => "not_found",
            Self::Conversion { .. } => "conversion",
            Self::Validation(_) => "validation",
            Self::Kubeconfig(_) => "kubeconfig",
            Self::KubeconfigFetch { .. } => "kubeconfig_fetch",
            Self::Invariant(_) => "invariant",
            Self::Serialization(_) => "serialization",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
