//! A single forward attempt against one pod
//!
//! The session owns one `kubectl port-forward` invocation and, with
//! keepalive enabled, one liveness monitor task. Both share a cancellation
//! token: the monitor cancels it the moment the pod stops Running, killing
//! the forward immediately instead of waiting for the severed connection to
//! be noticed on its own. No other coordination is needed between the two
//! tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ForwardConfig;
use crate::error::KubectlError;
use crate::kubectl::{push_namespace, KubectlRunner};
use crate::pods::{self, RUNNING_PHASE};

/// One forward attempt bound to a resolved pod
pub struct ForwardSession {
    pod: String,
    namespace: String,
    ports: Vec<String>,
    keepalive: bool,
    pod_check_interval: Duration,
}

impl ForwardSession {
    pub fn new(pod: impl Into<String>, config: &ForwardConfig) -> Self {
        Self {
            pod: pod.into(),
            namespace: config.namespace.clone(),
            ports: config.ports.clone(),
            keepalive: config.keepalive,
            pod_check_interval: config.effective_pod_check_interval(),
        }
    }

    /// The pod this session forwards to
    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// Run the forward until the subprocess exits, the monitor detects the
    /// pod is gone, or `cancel` fires. Blocks for the session's full
    /// duration and returns the subprocess's exit result.
    pub async fn run(
        &self,
        kubectl: Arc<dyn KubectlRunner>,
        cancel: &CancellationToken,
    ) -> Result<(), KubectlError> {
        // Child token shared by the subprocess and the monitor; cancelling
        // it ends both, cancelling the parent propagates into it.
        let session = cancel.child_token();

        let monitor = self.keepalive.then(|| {
            spawn_liveness_monitor(
                Arc::clone(&kubectl),
                self.pod.clone(),
                self.namespace.clone(),
                self.pod_check_interval,
                session.clone(),
            )
        });

        let pod_ref = format!("pod/{}", self.pod);
        let mut args = vec!["port-forward", pod_ref.as_str()];
        args.extend(self.ports.iter().map(String::as_str));
        push_namespace(&mut args, &self.namespace);

        let result = kubectl.stream(&args, &session).await;

        // The forward is over either way; reap the monitor before returning
        // so it never outlives the session.
        session.cancel();
        if let Some(handle) = monitor {
            let _ = handle.await;
        }

        result
    }
}

/// Poll the pod's phase and cancel the session the moment it is no longer
/// Running. A query error counts as pod-gone: a deleted pod surfaces as
/// "not found" from kubectl.
fn spawn_liveness_monitor(
    kubectl: Arc<dyn KubectlRunner>,
    pod: String,
    namespace: String,
    interval: Duration,
    session: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = session.cancelled() => break,
                _ = ticker.tick() => {
                    match pods::pod_phase(kubectl.as_ref(), &pod, &namespace).await {
                        Ok(phase) if phase == RUNNING_PHASE => {}
                        Ok(phase) => {
                            tracing::info!(
                                "Pod {} is no longer running (phase: {}), triggering reconnect...",
                                pod,
                                if phase.is_empty() { "unknown" } else { &phase }
                            );
                            session.cancel();
                            break;
                        }
                        Err(e) => {
                            tracing::info!(
                                "Pod {} can no longer be queried ({}), triggering reconnect...",
                                pod,
                                e
                            );
                            session.cancel();
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!("Liveness monitor for pod {} exiting", pod);
    })
}
