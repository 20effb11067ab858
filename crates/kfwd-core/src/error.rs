//! Core error types for kfwd

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the kfwd ecosystem
#[derive(Error, Debug)]
pub enum KfwdError {
    /// kubectl invocation error
    #[error("kubectl error: {0}")]
    Kubectl(#[from] KubectlError),

    /// Target resolution error
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from invoking the external kubectl CLI
#[derive(Error, Debug)]
pub enum KubectlError {
    /// The kubectl binary could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// kubectl exited non-zero; carries its combined diagnostic output
    #[error("kubectl {args} failed: {output}")]
    Failed { args: String, output: String },

    /// A short query exceeded its deadline
    #[error("kubectl {args} timed out after {seconds}s")]
    Timeout { args: String, seconds: u64 },

    /// kubectl produced output we could not decode
    #[error("failed to decode kubectl output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors resolving a forward target to pod-selector labels
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The named resource does not exist in the namespace
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// The resource exists but has no pod selector (e.g. an ExternalName
    /// service) - it can never match a pod, so it is rejected outright
    #[error("{kind} {name} has no or empty selector")]
    EmptySelector { kind: String, name: String },

    /// The underlying kubectl query failed
    #[error(transparent)]
    Kubectl(#[from] KubectlError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Invalid port mapping spec
    #[error("Invalid port spec '{0}': expected [local:]remote with numeric ports")]
    InvalidPortSpec(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
