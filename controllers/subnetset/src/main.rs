//! SubnetSet Controller binary
//!
//! Reads configuration from the environment and runs the controller until
//! one of its tasks exits.

use subnetset_controller::config::Config;
use subnetset_controller::controller::Controller;
use subnetset_controller::error::ControllerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube and reqwest both link rustls; pick the provider once for the process
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting SubnetSet Controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  VPC backend: {}", config.vpc_api_url);
    info!("  Cluster: {}", config.cluster_name);
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  GC interval: {:?}", config.gc_interval);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
