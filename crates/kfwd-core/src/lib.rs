//! kfwd-core: reconnecting kubectl port-forward controller
//!
//! Maintains a live `kubectl port-forward` to some Running pod backing a
//! Deployment, StatefulSet, DaemonSet or Service, re-establishing the
//! forward whenever the pod disappears, the connection drops, or the
//! subprocess exits. Cluster access and byte transport are delegated
//! entirely to the external kubectl CLI.

pub mod config;
pub mod controller;
pub mod error;
pub mod kubectl;
pub mod pods;
pub mod session;
pub mod source;

pub use config::ForwardConfig;
pub use controller::ReconnectController;
pub use error::KfwdError;
pub use kubectl::{Kubectl, KubectlRunner};
pub use source::{Source, SourceKind};
