//! The reconnect controller
//!
//! A strictly sequential loop: find a pod backing the target, forward to it
//! until the session ends, then decide between an immediate retry, a short
//! backoff, or stopping. At most one session is ever active per controller
//! instance.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::ForwardConfig;
use crate::error::KfwdError;
use crate::kubectl::KubectlRunner;
use crate::pods;
use crate::session::ForwardSession;
use crate::source::{SelectorLabels, Source};

/// Delay between discovery retries and after a quick failure
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Sessions shorter than this are treated as a likely-persistent failure
/// (crash-looping pod, bad selector) and get a backoff before the retry
pub const QUICK_FAILURE_THRESHOLD: Duration = Duration::from_secs(5);

/// Classify a finished session by how long it lived.
///
/// Exactly at the threshold counts as not quick: a session that held for
/// the full threshold earned an immediate retry.
pub fn is_quick_failure(elapsed: Duration) -> bool {
    elapsed < QUICK_FAILURE_THRESHOLD
}

/// Maintains a live forward to some Running pod backing a target
pub struct ReconnectController<R> {
    kubectl: Arc<R>,
    source: Source,
    config: ForwardConfig,
}

impl<R: KubectlRunner + 'static> ReconnectController<R> {
    pub fn new(kubectl: Arc<R>, source: Source, config: ForwardConfig) -> Self {
        Self {
            kubectl,
            source,
            config,
        }
    }

    /// Run until `shutdown` fires or, with keepalive disabled, until the
    /// first failure. Returns Ok on graceful cancellation.
    ///
    /// With keepalive enabled this only ever returns because of `shutdown`:
    /// every failure is logged and retried.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), KfwdError> {
        self.config.validate()?;

        // Selector labels are resolved once per run and kept; the pod is
        // re-resolved on every attempt so we never forward to a stale one.
        let mut labels: Option<SelectorLabels> = None;

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let selector = match &labels {
                Some(cached) => cached.clone(),
                None => {
                    let resolved = self
                        .source
                        .selector_labels(self.kubectl.as_ref(), &self.config.namespace)
                        .await;
                    match resolved {
                        Ok(resolved) => {
                            labels = Some(resolved.clone());
                            resolved
                        }
                        Err(e) => {
                            if !self.config.keepalive {
                                return Err(e.into());
                            }
                            tracing::warn!("Failed to resolve {}: {}. Retrying...", self.source, e);
                            if !self.wait_before_retry(&shutdown).await {
                                return Ok(());
                            }
                            continue;
                        }
                    }
                }
            };

            let pod = match pods::find_running_pod(
                self.kubectl.as_ref(),
                &selector,
                &self.config.namespace,
            )
            .await
            {
                Ok(Some(pod)) => pod,
                Ok(None) => {
                    tracing::info!("No running pod for {} yet, waiting...", self.source);
                    if !self.wait_before_retry(&shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => {
                    if !self.config.keepalive {
                        return Err(e.into());
                    }
                    tracing::warn!("Failed to list pods for {}: {}. Retrying...", self.source, e);
                    if !self.wait_before_retry(&shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            tracing::info!("Port-forwarding to pod {}", pod);
            let started = Instant::now();
            let session = ForwardSession::new(pod, &self.config);
            let result = session
                .run(Arc::clone(&self.kubectl) as Arc<dyn KubectlRunner>, &shutdown)
                .await;
            let elapsed = started.elapsed();

            if shutdown.is_cancelled() {
                return Ok(());
            }

            if !self.config.keepalive {
                return result.map_err(Into::into);
            }

            match &result {
                Ok(()) => tracing::info!(
                    "Forward to pod {} ended after {:.1}s, reconnecting...",
                    session.pod(),
                    elapsed.as_secs_f64()
                ),
                Err(e) => tracing::warn!(
                    "Forward to pod {} failed after {:.1}s: {}",
                    session.pod(),
                    elapsed.as_secs_f64(),
                    e
                ),
            }

            // A long-lived session that ended is a normal reconnect; only a
            // quick failure gets a cooldown.
            if is_quick_failure(elapsed) && !self.wait_before_retry(&shutdown).await {
                return Ok(());
            }
        }
    }

    /// Sleep the fixed retry delay; false means shutdown fired first
    async fn wait_before_retry(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(RETRY_DELAY) => true,
        }
    }
}
