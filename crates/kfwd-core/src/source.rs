//! Forward targets and their pod-selector resolution
//!
//! A [`Source`] names the workload a forward is aimed at. The four kinds
//! differ only in how their pod selector is stored: Deployments,
//! StatefulSets and DaemonSets nest it under `spec.selector.matchLabels`,
//! while Services carry a flat `spec.selector` map.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{KubectlError, ResolveError};
use crate::kubectl::{push_namespace, KubectlRunner};

/// Label key/value pairs used to match the pods backing a workload.
///
/// Ordered map so the derived label-selector query string is deterministic
/// for a given label set.
pub type SelectorLabels = BTreeMap<String, String>;

/// The closed set of workload kinds a forward can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Service,
}

impl SourceKind {
    /// The resource name kubectl expects on the command line
    pub fn kubectl_kind(&self) -> &'static str {
        match self {
            SourceKind::Deployment => "deployment",
            SourceKind::StatefulSet => "statefulset",
            SourceKind::DaemonSet => "daemonset",
            SourceKind::Service => "service",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kubectl_kind())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deployment" | "deploy" => Ok(SourceKind::Deployment),
            "statefulset" | "sts" => Ok(SourceKind::StatefulSet),
            "daemonset" | "ds" => Ok(SourceKind::DaemonSet),
            "service" | "svc" => Ok(SourceKind::Service),
            other => Err(format!(
                "unknown kind '{}': expected deployment, statefulset, daemonset or service",
                other
            )),
        }
    }
}

/// Identity of a forward target: (kind, name) within a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Source {
    kind: SourceKind,
    name: String,
}

impl Source {
    pub fn new(kind: SourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve this target to the labels selecting its pods.
    ///
    /// First confirms the resource exists by listing its kind in the
    /// namespace (case-sensitive exact match), then fetches the resource and
    /// extracts the selector. An empty or absent selector is an error, never
    /// an empty map.
    pub async fn selector_labels(
        &self,
        kubectl: &dyn KubectlRunner,
        namespace: &str,
    ) -> Result<SelectorLabels, ResolveError> {
        let kind = self.kind.kubectl_kind();

        let mut list_args = vec!["get", kind, "-o", "json"];
        push_namespace(&mut list_args, namespace);
        let stdout = kubectl.output(&list_args).await?;
        let list: ResourceList = serde_json::from_str(&stdout).map_err(KubectlError::Json)?;

        if !list.items.iter().any(|item| item.metadata.name == self.name) {
            return Err(ResolveError::NotFound {
                kind: kind.to_string(),
                name: self.name.clone(),
            });
        }

        let mut get_args = vec!["get", kind, self.name.as_str(), "-o", "json"];
        push_namespace(&mut get_args, namespace);
        let stdout = kubectl.output(&get_args).await?;

        let labels = match self.kind {
            SourceKind::Service => {
                let service: ServiceObject =
                    serde_json::from_str(&stdout).map_err(KubectlError::Json)?;
                service.spec.map(|spec| spec.selector).unwrap_or_default()
            }
            _ => {
                let workload: WorkloadObject =
                    serde_json::from_str(&stdout).map_err(KubectlError::Json)?;
                workload
                    .spec
                    .and_then(|spec| spec.selector)
                    .map(|selector| selector.match_labels)
                    .unwrap_or_default()
            }
        };

        if labels.is_empty() {
            return Err(ResolveError::EmptySelector {
                kind: kind.to_string(),
                name: self.name.clone(),
            });
        }

        Ok(labels)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    items: Vec<NamedObject>,
}

#[derive(Debug, Deserialize)]
struct NamedObject {
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WorkloadObject {
    spec: Option<WorkloadSpec>,
}

#[derive(Debug, Deserialize)]
struct WorkloadSpec {
    selector: Option<LabelSelector>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelSelector {
    #[serde(default)]
    match_labels: SelectorLabels,
}

#[derive(Debug, Deserialize)]
struct ServiceObject {
    spec: Option<ServiceSpec>,
}

#[derive(Debug, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    selector: SelectorLabels,
}
