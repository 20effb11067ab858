//! Pod discovery and phase queries
//!
//! The locator deliberately returns the first Running pod in listing order:
//! the controller's job is to keep something connected, not to pick the best
//! replica, and callers rely on the selection being deterministic per
//! listing order.

use serde::Deserialize;

use crate::error::KubectlError;
use crate::kubectl::{push_namespace, KubectlRunner};
use crate::source::SelectorLabels;

/// The only pod phase eligible for forwarding
pub const RUNNING_PHASE: &str = "Running";

/// Find a Running pod matching the selector labels.
///
/// `Ok(None)` means no Running pod exists yet - a normal transient during
/// rollout or cold start, distinct from a query failure.
pub async fn find_running_pod(
    kubectl: &dyn KubectlRunner,
    labels: &SelectorLabels,
    namespace: &str,
) -> Result<Option<String>, KubectlError> {
    let selector = label_selector(labels);
    let mut args = vec![
        "get",
        "pods",
        "-l",
        selector.as_str(),
        "--field-selector=status.phase=Running",
        "-o",
        "json",
    ];
    push_namespace(&mut args, namespace);

    let stdout = kubectl.output(&args).await?;
    let list: PodList = serde_json::from_str(&stdout)?;

    Ok(list.items.into_iter().next().map(|pod| pod.metadata.name))
}

/// Query a single pod's phase.
///
/// A deleted pod surfaces as a query error, which the liveness monitor
/// treats the same as a non-Running phase.
pub async fn pod_phase(
    kubectl: &dyn KubectlRunner,
    pod: &str,
    namespace: &str,
) -> Result<String, KubectlError> {
    let mut args = vec!["get", "pod", pod, "-o", "json"];
    push_namespace(&mut args, namespace);

    let stdout = kubectl.output(&args).await?;
    let pod: PodObject = serde_json::from_str(&stdout)?;

    Ok(pod
        .status
        .and_then(|status| status.phase)
        .unwrap_or_default())
}

/// AND-join all label pairs into a kubectl `-l` selector string
fn label_selector(labels: &SelectorLabels) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodObject>,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    #[serde(default)]
    metadata: PodMetadata,
    status: Option<PodStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct PodMetadata {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    phase: Option<String>,
}
