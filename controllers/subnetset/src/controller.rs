//! Main controller implementation.
//!
//! `Controller` wires the backend client, the cluster store and the shared
//! lock registry into the reconciler, then runs four tasks side by side:
//! the SubnetSet watcher, the deletion watcher, the garbage collector and
//! the metrics endpoint. Losing any of them stops the controller.

use crate::allocator::PortIndex;
use crate::cleanup::SubnetCleaner;
use crate::config::Config;
use crate::error::ControllerError;
use crate::gc::GarbageCollector;
use crate::lock::ResourceLockRegistry;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::store::{ClusterStore, KubeStore};
use crate::watcher::Watcher;
use crds::{SubnetConnectionBindingMap, SubnetSet};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use vpc_client::{VpcClient, VpcClientTrait};

/// Main controller for SubnetSet lifecycle management.
pub struct Controller {
    subnet_set_watcher: JoinHandle<Result<(), ControllerError>>,
    deletion_watcher: JoinHandle<Result<(), ControllerError>>,
    garbage_collector: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
    shutdown: watch::Sender<bool>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing SubnetSet Controller");

        let kube_client = Client::try_default().await?;

        let vpc_client = VpcClient::new(config.vpc_api_url.clone(), config.vpc_api_token.clone())?;
        info!("Validating VPC backend token and connectivity...");
        vpc_client.validate_token().await.map_err(|e| {
            error!("Failed to validate VPC backend token: {}", e);
            error!("Please ensure VPC_API_TOKEN is valid and {} is reachable", config.vpc_api_url);
            ControllerError::Vpc(e)
        })?;
        info!("VPC backend token validated");

        let config = Arc::new(config);
        let vpc: Arc<dyn VpcClientTrait> = Arc::new(vpc_client);
        let store: Arc<dyn ClusterStore> =
            Arc::new(KubeStore::new(kube_client.clone(), config.watch_namespace.clone()));
        let locks = Arc::new(ResourceLockRegistry::new());
        let ports = Arc::new(PortIndex::new());
        let metrics = Arc::new(Metrics::new()?);

        let cleaner = Arc::new(SubnetCleaner::new(vpc.clone(), locks.clone(), ports));
        let reconciler = Arc::new(Reconciler::new(
            vpc.clone(),
            store.clone(),
            cleaner.clone(),
            locks.clone(),
            metrics.clone(),
            config.clone(),
        ));

        let (subnet_sets, binding_maps): (Api<SubnetSet>, Api<SubnetConnectionBindingMap>) =
            match config.watch_namespace.as_deref() {
                Some(ns) => (Api::namespaced(kube_client.clone(), ns), Api::namespaced(kube_client, ns)),
                None => (Api::all(kube_client.clone()), Api::all(kube_client)),
            };
        let watcher_instance = Arc::new(Watcher::new(
            reconciler,
            subnet_sets,
            binding_maps,
            config.reconcile_concurrency,
        ));

        let subnet_set_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_subnet_sets().await })
        };

        let deletion_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_deletions().await })
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let garbage_collector = {
            let gc = GarbageCollector::new(vpc, store, cleaner, locks, metrics.clone(), config.clone());
            tokio::spawn(async move { gc.run(shutdown_rx).await })
        };

        let metrics_server = {
            let addr = config.metrics_addr;
            tokio::spawn(async move { metrics::serve(addr, metrics).await })
        };

        Ok(Self {
            subnet_set_watcher,
            deletion_watcher,
            garbage_collector,
            metrics_server,
            shutdown,
        })
    }

    /// Runs the controller until one of its tasks exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("SubnetSet Controller running");

        let result = tokio::select! {
            result = &mut self.subnet_set_watcher => flatten("SubnetSet watcher", result),
            result = &mut self.deletion_watcher => flatten("SubnetSet deletion watcher", result),
            result = &mut self.garbage_collector => flatten("Garbage collector", result),
            result = &mut self.metrics_server => flatten("Metrics server", result),
        };

        let _ = self.shutdown.send(true);
        result
    }
}

fn flatten(
    task: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{} panicked: {}", task, e)))?
        .map_err(|e| ControllerError::Watch(format!("{} error: {}", task, e)))?;
    info!("{} exited", task);
    Ok(())
}
