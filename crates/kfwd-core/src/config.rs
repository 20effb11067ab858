//! Configuration for a forward target

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Liveness poll period used when the configured interval is unset or zero
pub const DEFAULT_POD_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration for one reconnecting forward
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Namespace of the target. Empty defers to the current kubectl
    /// context's default namespace.
    pub namespace: String,

    /// Port mappings as `"[local:]remote"`, passed to kubectl in order
    pub ports: Vec<String>,

    /// Retry forever instead of failing fast on the first error
    pub keepalive: bool,

    /// How often the liveness monitor re-checks the pod phase
    #[serde(with = "duration_secs")]
    pub pod_check_interval: Duration,

    /// kubectl binary to invoke (name or path)
    pub kubectl_path: String,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            ports: vec![],
            keepalive: false,
            pod_check_interval: DEFAULT_POD_CHECK_INTERVAL,
            kubectl_path: "kubectl".to_string(),
        }
    }
}

impl ForwardConfig {
    /// The liveness poll period, substituting the default for zero
    pub fn effective_pod_check_interval(&self) -> Duration {
        if self.pod_check_interval.is_zero() {
            DEFAULT_POD_CHECK_INTERVAL
        } else {
            self.pod_check_interval
        }
    }

    /// Validate the port list before starting the controller, so a typo
    /// fails fast instead of crash-looping kubectl
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one port mapping is required".to_string(),
            ));
        }
        for spec in &self.ports {
            validate_port_spec(spec)?;
        }
        Ok(())
    }
}

/// Check one `"[local:]remote"` port mapping.
///
/// A local port of 0 is allowed (kubectl picks a free port); the remote
/// port must be non-zero.
pub fn validate_port_spec(spec: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidPortSpec(spec.to_string());

    let (local, remote) = match spec.split_once(':') {
        Some((local, remote)) => (Some(local), remote),
        None => (None, spec),
    };

    if let Some(local) = local {
        local.parse::<u16>().map_err(|_| invalid())?;
    }

    let remote: u16 = remote.parse().map_err(|_| invalid())?;
    if remote == 0 {
        return Err(invalid());
    }

    Ok(())
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kfwd")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<ForwardConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Helper module for Duration serialization as seconds
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
