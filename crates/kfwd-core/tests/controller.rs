//! Controller integration tests
//!
//! Drives the full search/forward/reconnect loop against a scripted fake
//! kubectl, with paused tokio time so the retry and liveness timings are
//! deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use kfwd_core::error::{KubectlError, ResolveError};
use kfwd_core::{ForwardConfig, KfwdError, KubectlRunner, ReconnectController, Source, SourceKind};

/// What a spawned port-forward does
#[derive(Clone)]
enum ForwardBehavior {
    /// Block until the session token is cancelled, then exit cleanly
    UntilCancelled,
    /// Exit cleanly after the given duration
    ExitAfter(Duration),
    /// Exit with a failure after the given duration
    FailAfter(Duration),
}

/// Scripted cluster state behind the fake kubectl
struct Cluster {
    /// Names of resources of the target kind present in the namespace
    resources: Vec<String>,
    /// JSON body returned when the target resource is fetched by name
    resource_json: String,
    /// Pods in listing order: (name, phase)
    pods: Vec<(String, String)>,
}

struct FakeKubectl {
    cluster: Mutex<Cluster>,
    behaviors: Mutex<VecDeque<ForwardBehavior>>,
    /// pod refs (e.g. "pod/nginx-abc") in forward start order
    forwarded: Mutex<Vec<String>>,
    active_forwards: AtomicUsize,
    max_active_forwards: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeKubectl {
    fn new(cluster: Cluster) -> Arc<Self> {
        Arc::new(Self {
            cluster: Mutex::new(cluster),
            behaviors: Mutex::new(VecDeque::new()),
            forwarded: Mutex::new(Vec::new()),
            active_forwards: AtomicUsize::new(0),
            max_active_forwards: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        })
    }

    fn push_behavior(&self, behavior: ForwardBehavior) {
        self.behaviors.lock().unwrap().push_back(behavior);
    }

    fn set_pods(&self, pods: &[(&str, &str)]) {
        self.cluster.lock().unwrap().pods = pods
            .iter()
            .map(|(n, p)| (n.to_string(), p.to_string()))
            .collect();
    }

    fn forwarded(&self) -> Vec<String> {
        self.forwarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl KubectlRunner for FakeKubectl {
    async fn output(&self, args: &[&str]) -> Result<String, KubectlError> {
        let cluster = self.cluster.lock().unwrap();
        match args[1] {
            "pods" => {
                let items: Vec<String> = cluster
                    .pods
                    .iter()
                    .filter(|(_, phase)| phase == "Running")
                    .map(|(name, phase)| {
                        format!(
                            r#"{{"metadata":{{"name":"{}"}},"status":{{"phase":"{}"}}}}"#,
                            name, phase
                        )
                    })
                    .collect();
                Ok(format!(r#"{{"items":[{}]}}"#, items.join(",")))
            }
            "pod" => {
                let name = args[2];
                match cluster.pods.iter().find(|(n, _)| n == name) {
                    Some((_, phase)) => {
                        Ok(format!(r#"{{"status":{{"phase":"{}"}}}}"#, phase))
                    }
                    None => Err(KubectlError::Failed {
                        args: args.join(" "),
                        output: format!("Error from server (NotFound): pods \"{}\" not found", name),
                    }),
                }
            }
            _kind if args[2] == "-o" => {
                self.list_calls.fetch_add(1, Ordering::SeqCst);
                let items: Vec<String> = cluster
                    .resources
                    .iter()
                    .map(|name| format!(r#"{{"metadata":{{"name":"{}"}}}}"#, name))
                    .collect();
                Ok(format!(r#"{{"items":[{}]}}"#, items.join(",")))
            }
            _ => Ok(cluster.resource_json.clone()),
        }
    }

    async fn stream(
        &self,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<(), KubectlError> {
        self.forwarded.lock().unwrap().push(args[1].to_string());
        let active = self.active_forwards.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_forwards.fetch_max(active, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ForwardBehavior::UntilCancelled);

        let result = match behavior {
            ForwardBehavior::UntilCancelled => {
                cancel.cancelled().await;
                Ok(())
            }
            ForwardBehavior::ExitAfter(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => Ok(()),
                    _ = cancel.cancelled() => Ok(()),
                }
            }
            ForwardBehavior::FailAfter(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => Err(KubectlError::Failed {
                        args: args.join(" "),
                        output: "error forwarding port".to_string(),
                    }),
                    _ = cancel.cancelled() => Ok(()),
                }
            }
        };

        self.active_forwards.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn deployment_cluster() -> Cluster {
    Cluster {
        resources: vec!["nginx-test".to_string()],
        resource_json: r#"{"spec":{"selector":{"matchLabels":{"app":"nginx"}}}}"#.to_string(),
        pods: vec![("nginx-abc".to_string(), "Running".to_string())],
    }
}

fn config(keepalive: bool) -> ForwardConfig {
    ForwardConfig {
        namespace: "ns1".to_string(),
        ports: vec!["8080:80".to_string()],
        keepalive,
        ..Default::default()
    }
}

fn spawn_controller(
    kubectl: Arc<FakeKubectl>,
    source: Source,
    config: ForwardConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<(), KfwdError>> {
    let controller = ReconnectController::new(kubectl, source, config);
    tokio::spawn(async move { controller.run(shutdown).await })
}

#[tokio::test(start_paused = true)]
async fn test_forwards_until_cancelled() {
    let kubectl = FakeKubectl::new(deployment_cluster());
    let shutdown = CancellationToken::new();

    let handle = spawn_controller(
        Arc::clone(&kubectl),
        Source::new(SourceKind::Deployment, "nginx-test"),
        config(true),
        shutdown.clone(),
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!handle.is_finished());

    shutdown.cancel();
    let result = handle.await.unwrap();
    assert!(result.is_ok());

    assert_eq!(kubectl.forwarded(), vec!["pod/nginx-abc"]);
    assert_eq!(kubectl.max_active_forwards.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_when_pod_dies() {
    let kubectl = FakeKubectl::new(deployment_cluster());
    let shutdown = CancellationToken::new();

    let handle = spawn_controller(
        Arc::clone(&kubectl),
        Source::new(SourceKind::Deployment, "nginx-test"),
        config(true),
        shutdown.clone(),
    );

    // Let the first forward establish, then replace the pod. The liveness
    // monitor's next phase query fails (pod gone) and cancels the session.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(kubectl.forwarded(), vec!["pod/nginx-abc"]);
    kubectl.set_pods(&[("nginx-def", "Running")]);

    // One poll interval (2s) to detect, one backoff (1s), plus slack.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(kubectl.forwarded(), vec!["pod/nginx-abc", "pod/nginx-def"]);
    assert_eq!(kubectl.max_active_forwards.load(Ordering::SeqCst), 1);

    // No error ever reached the caller.
    assert!(!handle.is_finished());
    shutdown.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_pod_stuck_not_running_triggers_reconnect() {
    let kubectl = FakeKubectl::new(deployment_cluster());
    let shutdown = CancellationToken::new();

    let handle = spawn_controller(
        Arc::clone(&kubectl),
        Source::new(SourceKind::Deployment, "nginx-test"),
        config(true),
        shutdown.clone(),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    // Pod still listed, but no longer Running.
    kubectl.set_pods(&[("nginx-abc", "Failed")]);

    tokio::time::sleep(Duration::from_secs(3)).await;
    // Session was cancelled by the monitor; no Running pod exists, so the
    // controller is back in search.
    assert_eq!(kubectl.forwarded().len(), 1);
    assert!(!handle.is_finished());

    // A replacement appears and forwarding resumes.
    kubectl.set_pods(&[("nginx-xyz", "Running")]);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(kubectl.forwarded().len(), 2);
    assert_eq!(kubectl.forwarded()[1], "pod/nginx-xyz");

    shutdown.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_missing_service_fails_fast_without_keepalive() {
    let kubectl = FakeKubectl::new(Cluster {
        resources: vec![],
        resource_json: String::new(),
        pods: vec![],
    });

    let controller = ReconnectController::new(
        kubectl,
        Source::new(SourceKind::Service, "nonexistent"),
        config(false),
    );

    let err = controller.run(CancellationToken::new()).await.unwrap_err();
    match err {
        KfwdError::Resolve(ResolveError::NotFound { kind, name }) => {
            assert_eq!(kind, "service");
            assert_eq!(name, "nonexistent");
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_missing_service_retries_with_keepalive() {
    let kubectl = FakeKubectl::new(Cluster {
        resources: vec![],
        resource_json: String::new(),
        pods: vec![],
    });
    let shutdown = CancellationToken::new();

    let handle = spawn_controller(
        Arc::clone(&kubectl),
        Source::new(SourceKind::Service, "nonexistent"),
        config(true),
        shutdown.clone(),
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!handle.is_finished());
    assert!(kubectl.list_calls.load(Ordering::SeqCst) >= 5);

    shutdown.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_no_running_pod_is_retried_even_without_keepalive() {
    let mut cluster = deployment_cluster();
    cluster.pods.clear();
    let kubectl = FakeKubectl::new(cluster);
    let shutdown = CancellationToken::new();

    let handle = spawn_controller(
        Arc::clone(&kubectl),
        Source::new(SourceKind::Deployment, "nginx-test"),
        config(false),
        shutdown.clone(),
    );

    // Zero pods is a normal transient, not a failure, so even fail-fast
    // mode keeps waiting.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!handle.is_finished());
    assert!(kubectl.forwarded().is_empty());

    kubectl.set_pods(&[("nginx-new", "Running")]);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(kubectl.forwarded(), vec!["pod/nginx-new"]);

    shutdown.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_quick_failures_are_spaced_by_backoff() {
    let kubectl = FakeKubectl::new(deployment_cluster());
    for _ in 0..20 {
        kubectl.push_behavior(ForwardBehavior::FailAfter(Duration::ZERO));
    }
    let shutdown = CancellationToken::new();

    let handle = spawn_controller(
        Arc::clone(&kubectl),
        Source::new(SourceKind::Deployment, "nginx-test"),
        config(true),
        shutdown.clone(),
    );

    // Each instantly-failing attempt costs one ~1s backoff, so roughly one
    // attempt per second - not a tight crash loop.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let attempts = kubectl.forwarded().len();
    assert!(
        (4..=7).contains(&attempts),
        "expected ~5 attempts in 5s, got {}",
        attempts
    );

    shutdown.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_long_session_reconnects_without_backoff() {
    let kubectl = FakeKubectl::new(deployment_cluster());
    kubectl.push_behavior(ForwardBehavior::ExitAfter(Duration::from_secs(30)));
    let shutdown = CancellationToken::new();

    let handle = spawn_controller(
        Arc::clone(&kubectl),
        Source::new(SourceKind::Deployment, "nginx-test"),
        config(true),
        shutdown.clone(),
    );

    // The 30s session ends and the next forward starts with no cooldown.
    tokio::time::sleep(Duration::from_millis(30_200)).await;
    assert_eq!(kubectl.forwarded().len(), 2);

    shutdown.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_session_failure_without_keepalive_returns_the_error() {
    let kubectl = FakeKubectl::new(deployment_cluster());
    kubectl.push_behavior(ForwardBehavior::FailAfter(Duration::from_secs(1)));

    let controller = ReconnectController::new(
        kubectl,
        Source::new(SourceKind::Deployment, "nginx-test"),
        config(false),
    );

    let err = controller.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, KfwdError::Kubectl(_)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_search_is_clean() {
    let kubectl = FakeKubectl::new(Cluster {
        resources: vec![],
        resource_json: String::new(),
        pods: vec![],
    });
    let shutdown = CancellationToken::new();

    let handle = spawn_controller(
        kubectl,
        Source::new(SourceKind::Deployment, "not-yet"),
        config(true),
        shutdown.clone(),
    );

    // Cancel mid retry-sleep; the sleep must not block shutdown.
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_empty_port_list_is_rejected_up_front() {
    let kubectl = FakeKubectl::new(deployment_cluster());
    let controller = ReconnectController::new(
        kubectl,
        Source::new(SourceKind::Deployment, "nginx-test"),
        ForwardConfig {
            namespace: "ns1".to_string(),
            ..Default::default()
        },
    );

    let err = controller.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, KfwdError::Config(_)));
}
