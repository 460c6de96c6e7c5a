//! Kubernetes resource watchers.
//!
//! SubnetSets are driven by a `kube_runtime::Controller`, which also
//! re-queues the SubnetSet a binding map targets whenever that map changes.
//! A second, raw watcher catches deletions of SubnetSets that never carried
//! a finalizer, which the Controller cannot observe.

use crate::error::{ControllerError, ErrorKind};
use crate::reconciler::{object_key, Reconciler};
use crds::{SubnetConnectionBindingMap, SubnetSet};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher::{self, Event};
use kube_runtime::{controller::{Action, Config as ControllerConfig}, Controller, WatchStreamExt};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Quiet period after the last event before a reconciliation starts
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Reconciles one SubnetSet notification
pub(crate) async fn reconcile(set: Arc<SubnetSet>, ctx: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let namespace = set.namespace().unwrap_or_default();
    let name = set.name_any();
    ctx.reconcile_subnet_set(&namespace, &name).await?;
    ctx.reset_requeue(&object_key(&namespace, &name));
    Ok(Action::await_change())
}

/// Terminal failures wait for a spec change; everything else backs off
pub(crate) fn error_policy(set: Arc<SubnetSet>, error: &ControllerError, ctx: Arc<Reconciler>) -> Action {
    let namespace = set.namespace().unwrap_or_default();
    let name = set.name_any();
    match error.kind() {
        ErrorKind::Terminal => {
            warn!(namespace = %namespace, name = %name, error = %error, "Reconciliation failed permanently, waiting for a change");
            Action::await_change()
        }
        kind => {
            let delay = ctx.next_requeue(&object_key(&namespace, &name));
            error!(namespace = %namespace, name = %name, kind = ?kind, error = %error, "Reconciliation failed, retrying in {:?}", delay);
            Action::requeue(delay)
        }
    }
}

/// SubnetSet a binding map points at, if any
fn binding_map_target(map: &SubnetConnectionBindingMap) -> Option<ObjectRef<SubnetSet>> {
    let target = map.spec.target_subnet_set_name.as_deref()?;
    let namespace = map.namespace()?;
    Some(ObjectRef::new(target).within(&namespace))
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    subnet_sets: Api<SubnetSet>,
    binding_maps: Api<SubnetConnectionBindingMap>,
    concurrency: u16,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        subnet_sets: Api<SubnetSet>,
        binding_maps: Api<SubnetConnectionBindingMap>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            subnet_sets,
            binding_maps,
            concurrency,
        }
    }

    /// Runs the SubnetSet controller until its stream ends
    pub async fn watch_subnet_sets(&self) -> Result<(), ControllerError> {
        info!("Starting SubnetSet watcher (concurrency {})", self.concurrency);

        let controller_config = ControllerConfig::default()
            .debounce(DEBOUNCE)
            .concurrency(self.concurrency);

        Controller::new(self.subnet_sets.clone(), watcher::Config::default())
            .watches(self.binding_maps.clone(), watcher::Config::default(), |map| {
                binding_map_target(&map)
            })
            .with_config(controller_config)
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled SubnetSet {}", obj),
                    Err(e) => error!("Controller error for SubnetSet: {}", e),
                }
            })
            .await;

        info!("SubnetSet watcher stopped");
        Ok(())
    }

    /// Reconciles every SubnetSet deletion the API reports
    pub async fn watch_deletions(&self) -> Result<(), ControllerError> {
        info!("Starting SubnetSet deletion watcher");

        let mut events = pin!(watcher::watcher(self.subnet_sets.clone(), watcher::Config::default()).default_backoff());
        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Delete(set)) => {
                    let namespace = set.namespace().unwrap_or_default();
                    let name = set.name_any();
                    info!(namespace = %namespace, name = %name, "SubnetSet deleted");
                    if let Err(e) = self.reconciler.reconcile_subnet_set(&namespace, &name).await {
                        warn!(namespace = %namespace, name = %name, error = %e, "Cleanup after deletion failed, the garbage collector will retry");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("SubnetSet deletion watch error: {}", e),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::SubnetSetSpec;

    fn spec() -> SubnetSetSpec {
        SubnetSetSpec {
            ipv4_subnet_size: Some(32),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reconcile_awaits_change_and_resets_backoff() {
        let env = TestEnv::new();
        let set = subnet_set("ns1", "web", "u1", spec());
        env.store.add_subnet_set(set.clone());

        let key = object_key("ns1", "web");
        env.reconciler.next_requeue(&key);
        env.reconciler.next_requeue(&key);

        let action = reconcile(Arc::new(set), env.reconciler.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(env.reconciler.next_requeue(&key), env.config.requeue_min);
    }

    #[tokio::test]
    async fn test_error_policy_backs_off_retryable_errors() {
        let env = TestEnv::new();
        let set = Arc::new(subnet_set("ns1", "web", "u1", spec()));
        let error = ControllerError::NoSubnetAvailable("web".to_string());
        let min = env.config.requeue_min;

        let first = error_policy(set.clone(), &error, env.reconciler.clone());
        let second = error_policy(set.clone(), &error, env.reconciler.clone());
        let third = error_policy(set, &error, env.reconciler.clone());

        assert_eq!(first, Action::requeue(min));
        assert_eq!(second, Action::requeue(min));
        assert_eq!(third, Action::requeue(min * 2));
    }

    #[tokio::test]
    async fn test_error_policy_waits_on_terminal_errors() {
        let env = TestEnv::new();
        let set = Arc::new(subnet_set("ns1", "web", "u1", spec()));
        let error = ControllerError::MissingField("uid".to_string());

        assert_eq!(error_policy(set, &error, env.reconciler.clone()), Action::await_change());
    }

    #[test]
    fn test_binding_map_maps_to_target_subnet_set() {
        let map = binding_map("ns1", "bm", "web");
        let target = binding_map_target(&map).unwrap();
        assert_eq!(target.name, "web");
        assert_eq!(target.namespace.as_deref(), Some("ns1"));

        let mut to_subnet = binding_map("ns1", "bm", "web");
        to_subnet.spec.target_subnet_set_name = None;
        to_subnet.spec.target_subnet_name = Some("parent".to_string());
        assert!(binding_map_target(&to_subnet).is_none());
    }

    #[tokio::test]
    async fn test_deleted_without_finalizer_is_cleaned_up() {
        let env = TestEnv::new();
        let set = subnet_set("ns1", "web", "u1", spec());
        env.vpc.add_subnet(owned_subnet("/vpcs/v1/subnets/web_1", &set, 32));

        // The object is already gone from the API when the delete event arrives
        env.reconciler.reconcile_subnet_set("ns1", "web").await.unwrap();

        assert_eq!(env.vpc.deleted_paths(), vec!["/vpcs/v1/subnets/web_1".to_string()]);
    }
}
