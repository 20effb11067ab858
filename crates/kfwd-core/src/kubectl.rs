//! kubectl subprocess adapter
//!
//! All cluster access goes through the external `kubectl` CLI, which is
//! assumed to be installed and authenticated. The adapter is a trait so the
//! controller and session can be driven by a scripted fake in tests.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::KubectlError;

/// Deadline for short request/response kubectl invocations.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Abstraction over kubectl invocations
#[async_trait]
pub trait KubectlRunner: Send + Sync {
    /// Run a short kubectl invocation and return its stdout.
    ///
    /// A non-zero exit is an error carrying the combined diagnostic output.
    async fn output(&self, args: &[&str]) -> Result<String, KubectlError>;

    /// Run a long-lived kubectl invocation (port-forward) with stdout and
    /// stderr passed through to the caller's terminal, until it exits on its
    /// own or `cancel` fires.
    ///
    /// Cancellation terminates the subprocess and returns `Ok(())` - it is an
    /// intentional end of the invocation, not a failure.
    async fn stream(&self, args: &[&str], cancel: &CancellationToken)
        -> Result<(), KubectlError>;
}

/// Production runner wrapping the real kubectl binary
pub struct Kubectl {
    program: String,
    query_timeout: Duration,
}

impl Kubectl {
    /// Create a runner for the given kubectl binary (name or path)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            query_timeout: QUERY_TIMEOUT,
        }
    }

    /// Override the per-query deadline
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl KubectlRunner for Kubectl {
    async fn output(&self, args: &[&str]) -> Result<String, KubectlError> {
        tracing::debug!("Running {} {}", self.program, args.join(" "));

        let output = tokio::time::timeout(
            self.query_timeout,
            Command::new(&self.program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| KubectlError::Timeout {
            args: args.join(" "),
            seconds: self.query_timeout.as_secs(),
        })?
        .map_err(|source| KubectlError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stdout = stdout.trim();
            if !stdout.is_empty() {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(stdout);
            }
            return Err(KubectlError::Failed {
                args: args.join(" "),
                output: combined,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn stream(
        &self,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<(), KubectlError> {
        tracing::debug!("Spawning {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| KubectlError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        match exited {
            Some(status) => {
                let status = status.map_err(|source| KubectlError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;
                if status.success() {
                    Ok(())
                } else {
                    Err(KubectlError::Failed {
                        args: args.join(" "),
                        output: format!("exited with {}", status),
                    })
                }
            }
            None => {
                // Terminate the forward; best effort, kill_on_drop backstops.
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(())
            }
        }
    }
}

/// Append `-n <namespace>` unless the namespace is empty, which defers to
/// the current kubectl context.
pub(crate) fn push_namespace<'a>(args: &mut Vec<&'a str>, namespace: &'a str) {
    if !namespace.is_empty() {
        args.push("-n");
        args.push(namespace);
    }
}
