//! Subnet allocation for consumers of a SubnetSet.
//!
//! Pre-created SubnetSets allocate under a read lock on the SubnetSet UID so
//! that any number of consumers proceed in parallel against the fixed list.
//! Auto-provisioned SubnetSets allocate under the write lock, which is what
//! keeps concurrent demand from creating more than one new backend Subnet.

use crate::error::ControllerError;
use crate::lock::ResourceLockRegistry;
use crate::metrics::Metrics;
use crate::store::ClusterStore;
use crate::tags::{self, TAG_SCOPE_SUBNETSET_UID, TAG_SCOPE_SUBNET_UID};
use crds::{AccessMode, DhcpMode, ProvisioningMode, SubnetSet};
use kube::ResourceExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use vpc_client::{CreateSubnetRequest, SubnetDhcpSettings, VpcClientTrait, VpcSubnet};

/// True when a Subnet of `total` addresses with `ports` attached can take one
/// more port; `reserved` addresses are never handed out.
pub fn has_capacity(ports: u64, total: u64, reserved: u64) -> bool {
    ports.saturating_add(reserved) < total
}

/// Decides whether a Subnet can take one more consumer
#[async_trait::async_trait]
pub trait CapacityProbe: Send + Sync {
    /// Claims room for one consumer on `subnet`; `false` when it is full.
    /// `claimant` is the consumer UID, `None` for an anonymous allocation.
    async fn try_claim(&self, subnet: &VpcSubnet, claimant: Option<&str>) -> Result<bool, ControllerError>;
}

/// Capacity from backend port counts plus claims recorded in the shared
/// [`PortIndex`] and not yet realized as backend ports.
///
/// Each claim runs under the write lock of the Subnet path, the identity the
/// cleaner deletes under, so a Subnet is never deleted between its capacity
/// check and the claim landing in the index.
pub struct PortCountProbe {
    vpc: Arc<dyn VpcClientTrait>,
    locks: Arc<ResourceLockRegistry>,
    claims: Arc<PortIndex>,
    reserved: u64,
}

impl std::fmt::Debug for PortCountProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortCountProbe")
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

impl PortCountProbe {
    /// Creates a probe reserving `reserved` addresses per Subnet
    pub fn new(
        vpc: Arc<dyn VpcClientTrait>,
        locks: Arc<ResourceLockRegistry>,
        claims: Arc<PortIndex>,
        reserved: u64,
    ) -> Self {
        Self {
            vpc,
            locks,
            claims,
            reserved,
        }
    }
}

#[async_trait::async_trait]
impl CapacityProbe for PortCountProbe {
    async fn try_claim(&self, subnet: &VpcSubnet, claimant: Option<&str>) -> Result<bool, ControllerError> {
        let total = subnet.total_ip_count()?;
        let _guard = self.locks.acquire_write(&subnet.path).await;

        if self.vpc.get_subnet_by_path(&subnet.path).await?.is_none() {
            debug!(path = %subnet.path, "Subnet deleted before it could be claimed");
            return Ok(false);
        }
        let ports = self.vpc.list_ports_of_subnet(&subnet.path).await?.len() as u64;
        Ok(self.claims.try_reserve(&subnet.path, claimant, ports, |occupied| {
            has_capacity(occupied, total, self.reserved)
        }))
    }
}

/// Claims on one Subnet whose backend port has not shown up yet
#[derive(Debug, Default)]
struct PendingClaims {
    /// Backend port count at the last look
    observed_ports: u64,
    /// Claimants, oldest first; `None` for anonymous allocations
    claimants: VecDeque<Option<String>>,
}

impl PendingClaims {
    /// Settles the oldest claims against ports that appeared since the last
    /// look. A port leaving while another arrives is not noticed; the claim
    /// then stays until its consumer is released.
    fn observe(&mut self, ports: u64) {
        let realized = ports.saturating_sub(self.observed_ports);
        let settled = usize::try_from(realized)
            .unwrap_or(usize::MAX)
            .min(self.claimants.len());
        self.claimants.drain(..settled);
        self.observed_ports = ports;
    }
}

#[derive(Debug, Default)]
struct Ledger {
    by_consumer: HashMap<String, String>,
    pending: HashMap<String, PendingClaims>,
}

impl Ledger {
    /// Drops the first pending claim on `path` matching `matches`
    fn drop_claim(&mut self, path: &str, matches: impl Fn(&Option<String>) -> bool) -> bool {
        let Some(pending) = self.pending.get_mut(path) else {
            return false;
        };
        let Some(position) = pending.claimants.iter().position(matches) else {
            return false;
        };
        pending.claimants.remove(position);
        if pending.claimants.is_empty() {
            self.pending.remove(path);
        }
        true
    }
}

/// Consumer UID to allocated Subnet path, plus the capacity claims per
/// Subnet that are not yet backed by a backend port.
///
/// Shared by the probe, the cleaner and the admission validator: a Subnet
/// with an indexed consumer or an unrealized claim is occupied.
#[derive(Debug, Default)]
pub struct PortIndex {
    ledger: Mutex<Ledger>,
}

impl PortIndex {
    /// Creates an empty index
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Path recorded for `consumer_uid`
    pub fn get(&self, consumer_uid: &str) -> Option<String> {
        self.ledger().by_consumer.get(consumer_uid).cloned()
    }

    /// Records `path` for `consumer_uid`
    pub fn insert(&self, consumer_uid: &str, path: &str) {
        self.ledger()
            .by_consumer
            .insert(consumer_uid.to_string(), path.to_string());
    }

    /// Forgets `consumer_uid` and any claim it still holds, returning its path
    pub fn remove(&self, consumer_uid: &str) -> Option<String> {
        let mut ledger = self.ledger();
        let path = ledger.by_consumer.remove(consumer_uid)?;
        ledger.drop_claim(&path, |c| c.as_deref() == Some(consumer_uid));
        Some(path)
    }

    /// Consumers recorded on `path`
    pub fn consumers_on(&self, path: &str) -> Vec<String> {
        self.ledger()
            .by_consumer
            .iter()
            .filter(|(_, p)| p.as_str() == path)
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    /// Records a claim on `path` for `claimant` when `fits(occupied)` holds,
    /// `occupied` being `ports` plus the claims still waiting for a port.
    pub fn try_reserve(
        &self,
        path: &str,
        claimant: Option<&str>,
        ports: u64,
        fits: impl FnOnce(u64) -> bool,
    ) -> bool {
        let mut ledger = self.ledger();
        let pending = ledger
            .pending
            .entry(path.to_string())
            .or_insert_with(|| PendingClaims {
                observed_ports: ports,
                claimants: VecDeque::new(),
            });
        pending.observe(ports);

        let claimed = fits(ports + pending.claimants.len() as u64);
        if claimed {
            pending.claimants.push_back(claimant.map(str::to_string));
        }
        if pending.claimants.is_empty() {
            ledger.pending.remove(path);
        }
        claimed
    }

    /// Settles claims on `path` against a fresh backend port count and
    /// returns how many still wait for their port.
    pub fn observe(&self, path: &str, ports: u64) -> usize {
        let mut ledger = self.ledger();
        let Some(pending) = ledger.pending.get_mut(path) else {
            return 0;
        };
        pending.observe(ports);
        let left = pending.claimants.len();
        if left == 0 {
            ledger.pending.remove(path);
        }
        left
    }

    /// Claims on `path` still waiting for their port
    pub fn pending_on(&self, path: &str) -> usize {
        self.ledger()
            .pending
            .get(path)
            .map_or(0, |p| p.claimants.len())
    }

    /// Drops the oldest anonymous claim on `path`
    pub fn release_anonymous(&self, path: &str) -> bool {
        self.ledger().drop_claim(path, Option::is_none)
    }

    /// True when `path` has an indexed consumer or a pending claim
    pub fn is_claimed(&self, path: &str) -> bool {
        let ledger = self.ledger();
        ledger.pending.contains_key(path) || ledger.by_consumer.values().any(|p| p == path)
    }
}

/// Picks or creates the backend Subnet a consumer lands on
pub struct SubnetAllocator {
    vpc: Arc<dyn VpcClientTrait>,
    store: Arc<dyn ClusterStore>,
    locks: Arc<ResourceLockRegistry>,
    ports: Arc<PortIndex>,
    metrics: Arc<Metrics>,
    cluster: String,
    max_tags: usize,
}

impl std::fmt::Debug for SubnetAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubnetAllocator")
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}

impl SubnetAllocator {
    /// Creates an allocator
    pub fn new(
        vpc: Arc<dyn VpcClientTrait>,
        store: Arc<dyn ClusterStore>,
        locks: Arc<ResourceLockRegistry>,
        ports: Arc<PortIndex>,
        metrics: Arc<Metrics>,
        cluster: String,
        max_tags: usize,
    ) -> Self {
        Self {
            vpc,
            store,
            locks,
            ports,
            metrics,
            cluster,
            max_tags,
        }
    }

    /// Probe counting backend ports plus the claims of this allocator
    pub fn port_count_probe(&self, reserved: u64) -> PortCountProbe {
        PortCountProbe::new(self.vpc.clone(), self.locks.clone(), self.ports.clone(), reserved)
    }

    /// Path a consumer was already given; consult before [`Self::allocate`]
    /// so retries never claim a second Subnet.
    pub fn cached_path_for_consumer(&self, consumer_uid: &str) -> Option<String> {
        self.ports.get(consumer_uid)
    }

    /// Allocates for `consumer_uid`, reusing a previous allocation
    pub async fn allocate_for_consumer(
        &self,
        consumer_uid: &str,
        subnet_set: &SubnetSet,
        probe: &dyn CapacityProbe,
    ) -> Result<String, ControllerError> {
        if let Some(path) = self.cached_path_for_consumer(consumer_uid) {
            debug!(consumer = %consumer_uid, path = %path, "Reusing cached Subnet allocation");
            return Ok(path);
        }
        let path = self.allocate_as(subnet_set, probe, Some(consumer_uid)).await?;
        self.ports.insert(consumer_uid, &path);
        Ok(path)
    }

    /// Forgets the allocation of `consumer_uid` and its pending claim
    pub fn release_consumer(&self, consumer_uid: &str) -> Option<String> {
        self.ports.remove(consumer_uid)
    }

    /// Gives back an anonymous [`Self::allocate`] on `path` whose port will
    /// never be created
    pub fn release_allocation(&self, path: &str) -> bool {
        self.ports.release_anonymous(path)
    }

    /// Returns the path of a Subnet of `subnet_set` with room for one more
    /// consumer, creating one for auto-provisioned SubnetSets if needed.
    ///
    /// The claim is anonymous: it holds until a port shows up on the Subnet
    /// or [`Self::release_allocation`] is called.
    pub async fn allocate(
        &self,
        subnet_set: &SubnetSet,
        probe: &dyn CapacityProbe,
    ) -> Result<String, ControllerError> {
        self.allocate_as(subnet_set, probe, None).await
    }

    async fn allocate_as(
        &self,
        subnet_set: &SubnetSet,
        probe: &dyn CapacityProbe,
        claimant: Option<&str>,
    ) -> Result<String, ControllerError> {
        let (mode, result) = match subnet_set.spec.provisioning_mode() {
            ProvisioningMode::PreCreated => (
                "precreated",
                self.allocate_precreated(subnet_set, probe, claimant).await,
            ),
            ProvisioningMode::AutoProvisioned | ProvisioningMode::Undetermined => {
                ("auto", self.allocate_auto(subnet_set, probe, claimant).await)
            }
        };
        self.metrics.record_allocation(mode, result.is_ok());
        result
    }

    async fn allocate_precreated(
        &self,
        subnet_set: &SubnetSet,
        probe: &dyn CapacityProbe,
        claimant: Option<&str>,
    ) -> Result<String, ControllerError> {
        let (namespace, name, uid) = identity(subnet_set)?;
        let _guard = self.locks.acquire_read(&uid).await;

        let current = self
            .store
            .get_subnet_set(&namespace, &name)
            .await?
            .ok_or_else(|| ControllerError::SubnetSetNotFound(format!("{}/{}", namespace, name)))?;
        let names = current.spec.subnet_names.unwrap_or_default();

        let mut errors = Vec::new();
        for subnet_name in &names {
            let subnet = match self.resolve_precreated(&namespace, subnet_name).await {
                Ok(subnet) => subnet,
                Err(e) => {
                    warn!(namespace = %namespace, subnet = %subnet_name, error = %e, "Cannot resolve pre-created Subnet");
                    errors.push(e);
                    continue;
                }
            };
            match probe.try_claim(&subnet, claimant).await {
                Ok(true) => {
                    debug!(namespace = %namespace, name = %name, path = %subnet.path, "Allocated from pre-created Subnet");
                    return Ok(subnet.path);
                }
                Ok(false) => debug!(path = %subnet.path, "Pre-created Subnet is full"),
                Err(e) => errors.push(e),
            }
        }

        Err(ControllerError::aggregate(errors)
            .unwrap_or_else(|| ControllerError::NoSubnetAvailable(format!("{}/{}", namespace, name))))
    }

    /// Backend Subnet realized for the `Subnet` object `name`
    pub async fn resolve_precreated(&self, namespace: &str, name: &str) -> Result<VpcSubnet, ControllerError> {
        resolve_precreated_subnet(self.store.as_ref(), self.vpc.as_ref(), namespace, name).await
    }

    async fn allocate_auto(
        &self,
        subnet_set: &SubnetSet,
        probe: &dyn CapacityProbe,
        claimant: Option<&str>,
    ) -> Result<String, ControllerError> {
        let (namespace, name, uid) = identity(subnet_set)?;
        let _guard = self.locks.acquire_write(&uid).await;

        let existing = self.vpc.list_subnets_by_tag(TAG_SCOPE_SUBNETSET_UID, &uid).await?;
        for subnet in &existing {
            if probe.try_claim(subnet, claimant).await? {
                debug!(namespace = %namespace, name = %name, path = %subnet.path, "Reusing Subnet");
                return Ok(subnet.path.clone());
            }
        }

        let tags = tags::build_subnet_set_tags(&self.cluster, subnet_set, self.max_tags)?;
        let vpcs = self.vpc.list_vpc_candidates(&namespace).await?;
        let vpc = vpcs
            .first()
            .ok_or_else(|| ControllerError::VpcNotFound(namespace.clone()))?;

        let spec = &subnet_set.spec;
        let request = CreateSubnetRequest {
            id: subnet_id(&name),
            display_name: name.clone(),
            access_mode: spec.access_mode.unwrap_or(AccessMode::Private).as_str().to_string(),
            ipv4_subnet_size: spec.ipv4_subnet_size,
            ip_addresses: Vec::new(),
            subnet_dhcp_config: SubnetDhcpSettings {
                mode: spec.dhcp_mode().unwrap_or(DhcpMode::Deactivated).as_str().to_string(),
            },
            tags,
        };
        let created = self.vpc.create_subnet(vpc, request).await?;
        info!(namespace = %namespace, name = %name, uid = %uid, path = %created.path, "Created Subnet");

        if probe.try_claim(&created, claimant).await? {
            Ok(created.path)
        } else {
            Err(ControllerError::CapacityAfterCreate(created.path))
        }
    }
}

fn identity(subnet_set: &SubnetSet) -> Result<(String, String, String), ControllerError> {
    let namespace = subnet_set
        .namespace()
        .ok_or_else(|| ControllerError::MissingField("SubnetSet namespace".to_string()))?;
    let uid = subnet_set
        .uid()
        .ok_or_else(|| ControllerError::MissingField("SubnetSet uid".to_string()))?;
    Ok((namespace, subnet_set.name_any(), uid))
}

/// Resolves a `Subnet` object to its backend Subnet: by the associated
/// resource annotation, else by the `subnet_cr_uid` tag.
pub async fn resolve_precreated_subnet(
    store: &dyn ClusterStore,
    vpc: &dyn VpcClientTrait,
    namespace: &str,
    name: &str,
) -> Result<VpcSubnet, ControllerError> {
    let subnet = store
        .get_subnet(namespace, name)
        .await?
        .ok_or_else(|| ControllerError::SubnetNotFound(format!("{}/{}", namespace, name)))?;

    let found = if let Some(path) = subnet.associated_resource() {
        vpc.get_subnet_by_path(path).await?
    } else if let Some(uid) = subnet.uid() {
        vpc.list_subnets_by_tag(TAG_SCOPE_SUBNET_UID, &uid)
            .await?
            .into_iter()
            .next()
    } else {
        None
    };
    found.ok_or_else(|| ControllerError::SubnetNotFound(format!("{}/{}", namespace, name)))
}

/// Backend ID of a new Subnet: `<subnetset-name>_<8 hex chars>`
pub fn subnet_id(subnet_set_name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", subnet_set_name, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::SubnetSetSpec;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn auto_spec(size: u32) -> SubnetSetSpec {
        SubnetSetSpec {
            ipv4_subnet_size: Some(size),
            ..Default::default()
        }
    }

    fn precreated_spec(names: &[&str]) -> SubnetSetSpec {
        SubnetSetSpec {
            subnet_names: Some(names.iter().map(|n| n.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_has_capacity_boundaries() {
        // k < S - 4
        assert!(has_capacity(27, 32, 4));
        assert!(!has_capacity(28, 32, 4));
        assert!(has_capacity(0, 16, 4));
        assert!(!has_capacity(0, 4, 4));
        assert!(!has_capacity(u64::MAX, 16, 4));
    }

    #[tokio::test]
    async fn test_probe_counts_pending_claims() {
        let env = TestEnv::new();
        let subnet = vpc_subnet("/vpcs/v1/subnets/s1", Some("uid-1"), 8);
        env.vpc.add_subnet(subnet.clone());
        let probe = env.probe();

        // 8 - 4 reserved = 4 claims
        for _ in 0..4 {
            assert!(probe.try_claim(&subnet, None).await.unwrap());
        }
        assert!(!probe.try_claim(&subnet, None).await.unwrap());
        assert_eq!(env.ports.pending_on(&subnet.path), 4);

        assert!(env.allocator.release_allocation(&subnet.path));
        assert!(probe.try_claim(&subnet, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_realized_ports_settle_claims() {
        let env = TestEnv::new();
        let subnet = vpc_subnet("/vpcs/v1/subnets/s1", Some("uid-1"), 8);
        env.vpc.add_subnet(subnet.clone());
        let probe = env.probe();

        assert!(probe.try_claim(&subnet, Some("pod-1")).await.unwrap());
        assert!(probe.try_claim(&subnet, Some("pod-2")).await.unwrap());
        env.vpc.set_port_count(&subnet.path, 2);

        // The two ports are the two claims, not two more consumers
        assert!(probe.try_claim(&subnet, Some("pod-3")).await.unwrap());
        assert_eq!(env.ports.pending_on(&subnet.path), 1);
        assert!(probe.try_claim(&subnet, Some("pod-4")).await.unwrap());
        assert!(!probe.try_claim(&subnet, Some("pod-5")).await.unwrap());
    }

    #[tokio::test]
    async fn test_probe_refuses_deleted_subnet() {
        let env = TestEnv::new();
        let subnet = vpc_subnet("/vpcs/v1/subnets/gone", Some("uid-1"), 16);

        assert!(!env.probe().try_claim(&subnet, None).await.unwrap());
        assert_eq!(env.ports.pending_on(&subnet.path), 0);
    }

    #[tokio::test]
    async fn test_probe_waits_for_subnet_deletion() {
        let env = TestEnv::new();
        let subnet = vpc_subnet("/vpcs/v1/subnets/s1", Some("uid-1"), 16);
        env.vpc.add_subnet(subnet.clone());
        let probe = env.probe();

        let deleting = env.locks.acquire_write(&subnet.path).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), probe.try_claim(&subnet, None)).await;
        assert!(blocked.is_err(), "claim must wait for the Subnet lock");

        drop(deleting);
        assert!(probe.try_claim(&subnet, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_fresh_allocation_creates_tagged_subnet() {
        let env = TestEnv::new();
        env.vpc.set_vpcs("ns1", vec![vpc_info("v1")]);
        let set = subnet_set("ns1", "web", "uid-1", auto_spec(32));
        env.store.add_subnet_set(set.clone());

        let path = env.allocator.allocate(&set, &env.probe()).await.unwrap();

        assert_eq!(env.vpc.create_count(), 1);
        let created = env.vpc.subnet(&path).unwrap();
        assert_eq!(created.tag_value(TAG_SCOPE_SUBNETSET_UID), Some("uid-1"));
        assert_eq!(created.ipv4_subnet_size, Some(32));
        assert!(created.id.starts_with("web_"));
        assert!(path.starts_with("/orgs/default/projects/default/vpcs/v1/subnets/web_"));
    }

    #[tokio::test]
    async fn test_reuse_over_creation() {
        let env = TestEnv::new();
        env.vpc.set_vpcs("ns1", vec![vpc_info("v1")]);
        env.vpc.add_subnet(vpc_subnet("/vpcs/v1/subnets/existing", Some("uid-1"), 32));
        let set = subnet_set("ns1", "web", "uid-1", auto_spec(32));

        let probe = env.probe();
        let first = env.allocator.allocate(&set, &probe).await.unwrap();
        let second = env.allocator.allocate(&set, &probe).await.unwrap();

        assert_eq!(first, "/vpcs/v1/subnets/existing");
        assert_eq!(second, first);
        assert_eq!(env.vpc.create_count(), 0);
    }

    #[tokio::test]
    async fn test_full_subnet_triggers_creation() {
        let env = TestEnv::new();
        env.vpc.set_vpcs("ns1", vec![vpc_info("v1")]);
        env.vpc.add_subnet(vpc_subnet("/vpcs/v1/subnets/full", Some("uid-1"), 16));
        env.vpc.set_port_count("/vpcs/v1/subnets/full", 12);
        let set = subnet_set("ns1", "web", "uid-1", auto_spec(16));

        let path = env.allocator.allocate(&set, &env.probe()).await.unwrap();

        assert_ne!(path, "/vpcs/v1/subnets/full");
        assert_eq!(env.vpc.create_count(), 1);
    }

    #[tokio::test]
    async fn test_no_vpc_is_transient() {
        let env = TestEnv::new();
        let set = subnet_set("ns1", "web", "uid-1", auto_spec(32));

        let err = env.allocator.allocate(&set, &env.probe()).await.unwrap_err();
        assert!(matches!(err, ControllerError::VpcNotFound(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_created_subnet_without_room_is_an_error() {
        let env = TestEnv::new();
        env.vpc.set_vpcs("ns1", vec![vpc_info("v1")]);
        // 4 addresses, all reserved
        let set = subnet_set("ns1", "tiny", "uid-1", auto_spec(4));

        let err = env.allocator.allocate(&set, &env.probe()).await.unwrap_err();
        assert!(matches!(err, ControllerError::CapacityAfterCreate(_)));
        assert_eq!(env.vpc.create_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_auto_allocation_creates_one_subnet() {
        let env = TestEnv::new();
        env.vpc.set_vpcs("ns1", vec![vpc_info("v1")]);
        env.vpc.set_create_delay(Duration::from_millis(20));
        let set = subnet_set("ns1", "web", "uid-1", auto_spec(32));
        let allocator = Arc::clone(&env.allocator);
        let probe = Arc::new(env.probe());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let allocator = Arc::clone(&allocator);
            let probe = Arc::clone(&probe);
            let set = set.clone();
            handles.push(tokio::spawn(async move { allocator.allocate(&set, probe.as_ref()).await }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap());
        }
        paths.dedup();
        assert_eq!(paths.len(), 1);
        assert_eq!(env.vpc.create_count(), 1);
    }

    #[tokio::test]
    async fn test_precreated_first_with_capacity_in_order() {
        let env = TestEnv::new();
        env.store.add_subnet(subnet_object("ns1", "a", "/vpcs/v1/subnets/a"));
        env.store.add_subnet(subnet_object("ns1", "b", "/vpcs/v1/subnets/b"));
        env.vpc.add_subnet(vpc_subnet("/vpcs/v1/subnets/a", None, 16));
        env.vpc.add_subnet(vpc_subnet("/vpcs/v1/subnets/b", None, 16));
        env.vpc.set_port_count("/vpcs/v1/subnets/a", 12);
        let set = subnet_set("ns1", "pre", "uid-1", precreated_spec(&["a", "b"]));
        env.store.add_subnet_set(set.clone());

        let path = env.allocator.allocate(&set, &env.probe()).await.unwrap();
        assert_eq!(path, "/vpcs/v1/subnets/b");
        assert_eq!(env.vpc.create_count(), 0);
    }

    #[tokio::test]
    async fn test_precreated_exhausted_reports_no_subnet_available() {
        let env = TestEnv::new();
        for name in ["a", "b"] {
            let path = format!("/vpcs/v1/subnets/{}", name);
            env.store.add_subnet(subnet_object("ns1", name, &path));
            env.vpc.add_subnet(vpc_subnet(&path, None, 16));
            env.vpc.set_port_count(&path, 12);
        }
        let set = subnet_set("ns1", "pre", "uid-1", precreated_spec(&["a", "b"]));
        env.store.add_subnet_set(set.clone());

        let err = env.allocator.allocate(&set, &env.probe()).await.unwrap_err();
        assert!(matches!(err, ControllerError::NoSubnetAvailable(_)), "got {err}");
    }

    #[tokio::test]
    async fn test_precreated_aggregates_resolution_errors() {
        let env = TestEnv::new();
        let set = subnet_set("ns1", "pre", "uid-1", precreated_spec(&["missing-a", "missing-b"]));
        env.store.add_subnet_set(set.clone());

        let err = env.allocator.allocate(&set, &env.probe()).await.unwrap_err();
        match err {
            ControllerError::Aggregate(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_precreated_uses_fresh_spec() {
        let env = TestEnv::new();
        env.store.add_subnet(subnet_object("ns1", "b", "/vpcs/v1/subnets/b"));
        env.vpc.add_subnet(vpc_subnet("/vpcs/v1/subnets/b", None, 16));
        let stale = subnet_set("ns1", "pre", "uid-1", precreated_spec(&["a"]));
        env.store
            .add_subnet_set(subnet_set("ns1", "pre", "uid-1", precreated_spec(&["b"])));

        let path = env.allocator.allocate(&stale, &env.probe()).await.unwrap();
        assert_eq!(path, "/vpcs/v1/subnets/b");
    }

    #[tokio::test]
    async fn test_precreated_allocations_share_the_lock() {
        let env = TestEnv::new();
        env.store.add_subnet(subnet_object("ns1", "a", "/vpcs/v1/subnets/a"));
        env.vpc.add_subnet(vpc_subnet("/vpcs/v1/subnets/a", None, 64));
        let set = subnet_set("ns1", "pre", "uid-1", precreated_spec(&["a"]));
        env.store.add_subnet_set(set.clone());

        // Another allocation is in progress
        let _reader = env.locks.acquire_read("uid-1").await;
        let probe = env.probe();
        let result = tokio::time::timeout(Duration::from_secs(1), env.allocator.allocate(&set, &probe)).await;
        assert_eq!(result.unwrap().unwrap(), "/vpcs/v1/subnets/a");
    }

    #[tokio::test]
    async fn test_precreated_resolves_by_subnet_uid_tag() {
        let env = TestEnv::new();
        let mut subnet = subnet_object("ns1", "a", "unused");
        subnet.metadata.annotations = Some(BTreeMap::new());
        subnet.metadata.uid = Some("subnet-uid-a".to_string());
        env.store.add_subnet(subnet);
        let mut backend = vpc_subnet("/vpcs/v1/subnets/a", None, 16);
        backend.tags.push(vpc_client::Tag::new(TAG_SCOPE_SUBNET_UID, "subnet-uid-a"));
        env.vpc.add_subnet(backend);

        let resolved = env.allocator.resolve_precreated("ns1", "a").await.unwrap();
        assert_eq!(resolved.path, "/vpcs/v1/subnets/a");
    }

    #[tokio::test]
    async fn test_consumer_allocation_is_cached() {
        let env = TestEnv::new();
        env.vpc.set_vpcs("ns1", vec![vpc_info("v1")]);
        let set = subnet_set("ns1", "web", "uid-1", auto_spec(32));
        let probe = env.probe();

        let first = env.allocator.allocate_for_consumer("pod-1", &set, &probe).await.unwrap();
        let again = env.allocator.allocate_for_consumer("pod-1", &set, &probe).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(env.ports.pending_on(&first), 1, "cached lookup must not claim again");
        assert_eq!(env.ports.consumers_on(&first), vec!["pod-1".to_string()]);

        assert_eq!(env.allocator.release_consumer("pod-1"), Some(first.clone()));
        assert!(env.allocator.cached_path_for_consumer("pod-1").is_none());
        assert_eq!(env.ports.pending_on(&first), 0);
        assert!(!env.ports.is_claimed(&first));
    }

    #[tokio::test]
    async fn test_realized_consumers_are_not_counted_twice() {
        let env = TestEnv::new();
        env.vpc.set_vpcs("ns1", vec![vpc_info("v1")]);
        let set = subnet_set("ns1", "web", "uid-1", auto_spec(8));
        let probe = env.probe();

        let path = env.allocator.allocate_for_consumer("pod-1", &set, &probe).await.unwrap();
        env.allocator.allocate_for_consumer("pod-2", &set, &probe).await.unwrap();
        env.vpc.set_port_count(&path, 2);

        let third = env.allocator.allocate_for_consumer("pod-3", &set, &probe).await.unwrap();
        assert_eq!(third, path);
        assert_eq!(env.vpc.create_count(), 1);

        for pod in ["pod-1", "pod-2", "pod-3"] {
            env.allocator.release_consumer(pod);
        }
        env.vpc.set_port_count(&path, 0);
        assert_eq!(env.ports.pending_on(&path), 0);
        assert!(!env.ports.is_claimed(&path));
    }

    #[test]
    fn test_subnet_id_format() {
        let id = subnet_id("web");
        let (name, suffix) = id.split_once('_').unwrap();
        assert_eq!(name, "web");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
