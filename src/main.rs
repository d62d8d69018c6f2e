//! Longhorn Uninstaller
//!
//! Main entry point. Parses the command line, connects to the cluster and
//! runs the uninstall controller until Longhorn is gone or a signal arrives.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use longhorn_uninstaller::{
    config::{ControllerConfig, UninstallConfig, DEFAULT_NAMESPACE},
    controllers::UninstallController,
    feed::KubeChangeFeed,
    metrics,
    reconcilers::Uninstaller,
    store::KubeStore,
};

/// Remove Longhorn and everything it created from the cluster
#[derive(Parser, Debug)]
#[command(name = "longhorn-uninstaller", version)]
struct Args {
    /// Namespace Longhorn is installed into
    #[arg(long, env = "LONGHORN_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Continue even if the manager is not ready or volumes are in use
    #[arg(long)]
    force: bool,

    /// Port of the metrics and health endpoint
    #[arg(long, default_value_t = 8080)]
    metrics_port: u16,

    /// Seconds to wait before re-checking resources that are being deleted
    #[arg(long, default_value_t = 5)]
    wait_requeue_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    init_tracing();

    info!(
        namespace = %args.namespace,
        force = args.force,
        "Starting Longhorn Uninstaller"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let store = Arc::new(KubeStore::new(client.clone(), args.namespace.clone()));
    let feed = Arc::new(KubeChangeFeed::new(client, args.namespace.clone()));
    let uninstaller = Arc::new(Uninstaller::new(
        store,
        UninstallConfig::new(args.namespace, args.force),
    ));
    let controller_config = ControllerConfig {
        wait_requeue: Duration::from_secs(args.wait_requeue_seconds),
        ..ControllerConfig::default()
    };
    let controller = UninstallController::new(uninstaller, feed, controller_config);

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(args.metrics_port));
    info!("Metrics server starting on port {}", args.metrics_port);

    // Signals and a failed metrics server both stop the controller, which
    // lets the pass in progress finish before returning
    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            tokio::select! {
                _ = metrics_handle => {
                    error!("Metrics server exited unexpectedly");
                }
                _ = shutdown_signal() => {
                    info!("Received shutdown signal, stopping uninstaller");
                }
            }
            stop.cancel();
        }
    });

    let result = controller.run(stop).await;

    if let Err(e) = result {
        error!(error = %e, "Uninstall failed");
        return Err(e.into());
    }

    info!("Longhorn Uninstaller stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
