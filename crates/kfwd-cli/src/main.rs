//! kfwd - resilient kubectl port-forwarding
//!
//! Forwards local ports to whichever pod currently backs a Deployment,
//! StatefulSet, DaemonSet or Service, reconnecting whenever the pod goes
//! away or the forward drops. All cluster access goes through the kubectl
//! binary, which must be installed and authenticated.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kfwd_core::{config, ForwardConfig, Kubectl, ReconnectController, Source, SourceKind};

#[derive(Parser)]
#[command(name = "kfwd")]
#[command(version)]
#[command(about = "Resilient kubectl port-forwarding to Kubernetes workloads")]
struct Args {
    /// Target kind: deployment, statefulset, daemonset or service
    /// (aliases: deploy, sts, ds, svc)
    kind: String,

    /// Name of the workload to forward to
    name: String,

    /// Port mappings as [local:]remote, in kubectl order
    #[arg(required = true)]
    ports: Vec<String>,

    /// Namespace (defaults to the current kubectl context's namespace)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Keep reconnecting forever instead of failing on the first error
    #[arg(short, long)]
    keepalive: bool,

    /// Seconds between liveness checks of the forwarded pod
    #[arg(long)]
    pod_check_interval: Option<u64>,

    /// kubectl binary to invoke (name or path)
    #[arg(long)]
    kubectl_path: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let kind: SourceKind = args
        .kind
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let source = Source::new(kind, &args.name);

    // Load configuration file, then apply command-line overrides
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    let mut config = if config_path.exists() {
        config::load_config(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", config_path, e);
            ForwardConfig::default()
        })
    } else {
        ForwardConfig::default()
    };

    config.ports = args.ports;
    if let Some(namespace) = args.namespace {
        config.namespace = namespace;
    }
    if args.keepalive {
        config.keepalive = true;
    }
    if let Some(secs) = args.pod_check_interval {
        config.pod_check_interval = Duration::from_secs(secs);
    }
    if let Some(path) = args.kubectl_path {
        config.kubectl_path = path;
    }

    config.validate().context("Invalid port mappings")?;

    tracing::info!(
        "Forwarding to {} (ports: {})",
        source,
        config.ports.join(", ")
    );

    // Ctrl-C cancels the whole run; the controller returns Ok on that path.
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down...");
            signal_token.cancel();
        }
    });

    let kubectl = Arc::new(Kubectl::new(config.kubectl_path.clone()));
    let controller = ReconnectController::new(kubectl, source, config);

    controller
        .run(shutdown)
        .await
        .context("Port-forwarding failed")?;

    tracing::info!("Stopped");
    Ok(())
}
