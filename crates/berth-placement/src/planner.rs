//! Placement engine. Picks a host for a workload and reserves its capacity.
//!
//! Every planner shares the same two-stage search:
//! 1. Sticky fast path: reuse the workload's last host, drawing on capacity
//!    reserved for its return.
//! 2. Fallback walk: pods of the zone, clusters of each pod, and hosts of
//!    each cluster, each level shuffled so identical requests spread out.
//!
//! [`FirstFitPlanner`] admits the first host in walk order that the ledger
//! accepts. Other strategies reuse the walk through [`PlacementContext`].

use std::ops::ControlFlow;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use berth_core::{
    AllocationMode, ExcludeList, Host, PlacementDecision, PlannerConfig, PlannerKind,
    ResourceRequest, WorkloadRequest, Zone,
};

use crate::best_fit::BestFitPlanner;
use crate::directory::TopologyDirectory;
use crate::error::{PlacementError, PlacementResult};
use crate::ledger::{CapacityLedger, LedgerError};

/// A placement strategy.
pub trait Planner: Send + Sync {
    fn kind(&self) -> PlannerKind;

    /// Choose a host for `workload` and reserve its capacity.
    fn plan(
        &self,
        workload: &WorkloadRequest,
        exclude: &ExcludeList,
    ) -> PlacementResult<PlacementDecision>;

    /// Whether `decision` is still admissible. Never mutates capacity.
    fn check(
        &self,
        workload: &WorkloadRequest,
        decision: &PlacementDecision,
        exclude: &ExcludeList,
    ) -> PlacementResult<bool>;
}

/// Resolve the configured strategy into a planner.
pub fn build_planner(
    config: &PlannerConfig,
    directory: Arc<dyn TopologyDirectory>,
    ledger: Arc<dyn CapacityLedger>,
) -> Box<dyn Planner> {
    let ctx = PlacementContext::new(directory, ledger).with_shuffle_seed(config.shuffle_seed);
    match config.strategy {
        PlannerKind::FirstFit => Box::new(FirstFitPlanner::new(ctx)),
        PlannerKind::BestFit => Box::new(BestFitPlanner::new(ctx)),
    }
}

/// Per-call tally of why candidates were passed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub considered: u32,
    pub excluded: u32,
    pub not_up: u32,
    pub rejected: u32,
    pub inconsistent: u32,
    pub lock_timeouts: u32,
    pub store_errors: u32,
}

/// A schedulable host together with its resolved ancestry.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub zone_id: String,
    pub pod_id: String,
    pub cluster_id: String,
    pub host: Host,
}

impl Candidate {
    pub fn decision(&self, mode: AllocationMode) -> PlacementDecision {
        PlacementDecision {
            zone_id: self.zone_id.clone(),
            pod_id: self.pod_id.clone(),
            cluster_id: self.cluster_id.clone(),
            host_id: self.host.id.clone(),
            mode,
        }
    }
}

/// Collaborators and search primitives shared by all strategies.
#[derive(Clone)]
pub struct PlacementContext {
    directory: Arc<dyn TopologyDirectory>,
    ledger: Arc<dyn CapacityLedger>,
    shuffle_seed: Option<u64>,
}

impl PlacementContext {
    pub fn new(directory: Arc<dyn TopologyDirectory>, ledger: Arc<dyn CapacityLedger>) -> Self {
        Self {
            directory,
            ledger,
            shuffle_seed: None,
        }
    }

    /// Fix the shuffle seed. Every call then walks the topology in the same order.
    pub fn with_shuffle_seed(mut self, seed: Option<u64>) -> Self {
        self.shuffle_seed = seed;
        self
    }

    pub fn ledger(&self) -> &dyn CapacityLedger {
        self.ledger.as_ref()
    }

    fn rng(&self) -> StdRng {
        match self.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Reject malformed requests and resolve the workload's zone.
    pub fn validate(&self, workload: &WorkloadRequest) -> PlacementResult<Zone> {
        if workload.cpu == 0 || workload.memory == 0 {
            return Err(PlacementError::InvalidRequest(format!(
                "cpu and memory must be positive (cpu={}, memory={})",
                workload.cpu, workload.memory
            )));
        }
        self.directory
            .zone(&workload.zone_id)?
            .ok_or_else(|| PlacementError::UnknownZone(workload.zone_id.clone()))
    }

    /// Resolve a host's cluster, pod and zone.
    ///
    /// Returns `None` when the chain is broken or any level is excluded.
    fn locate(&self, host: Host, exclude: &ExcludeList) -> PlacementResult<Option<Candidate>> {
        let Some(cluster) = self.directory.cluster(&host.cluster_id)? else {
            warn!(host = %host.id, cluster = %host.cluster_id, "host references unknown cluster");
            return Ok(None);
        };
        let Some(pod) = self.directory.pod(&cluster.pod_id)? else {
            warn!(cluster = %cluster.id, pod = %cluster.pod_id, "cluster references unknown pod");
            return Ok(None);
        };
        if exclude.excludes_host(&host.id)
            || exclude.excludes_cluster(&cluster.id)
            || exclude.excludes_pod(&pod.id)
            || exclude.excludes_zone(&pod.zone_id)
        {
            return Ok(None);
        }
        Ok(Some(Candidate {
            zone_id: pod.zone_id,
            pod_id: pod.id,
            cluster_id: cluster.id,
            host,
        }))
    }

    /// Sticky fast path: claim reserved capacity on the workload's last host.
    ///
    /// Never fails; any problem with the last host falls through to the walk.
    pub fn try_last_host(
        &self,
        workload: &WorkloadRequest,
        exclude: &ExcludeList,
        stats: &mut SearchStats,
    ) -> Option<PlacementDecision> {
        let host_id = workload.last_host_id.as_deref()?;
        let candidate = match self.sticky_candidate(host_id, workload, exclude) {
            Ok(candidate) => candidate?,
            Err(err) => {
                warn!(host = %host_id, error = %err, "last host lookup failed");
                return None;
            }
        };

        let decision = self.try_reserve(
            &candidate,
            &workload.resources(),
            AllocationMode::FromReserved,
            stats,
        );
        if decision.is_some() {
            info!(host = %host_id, "placed on last host from reserved capacity");
        }
        decision
    }

    fn sticky_candidate(
        &self,
        host_id: &str,
        workload: &WorkloadRequest,
        exclude: &ExcludeList,
    ) -> PlacementResult<Option<Candidate>> {
        let Some(host) = self.directory.host(host_id)? else {
            debug!(host = %host_id, "last host no longer exists");
            return Ok(None);
        };
        if !host.is_schedulable() {
            debug!(host = %host_id, status = %host.status, "last host not up");
            return Ok(None);
        }
        let Some(candidate) = self.locate(host, exclude)? else {
            debug!(host = %host_id, "last host excluded or detached from topology");
            return Ok(None);
        };
        if candidate.zone_id != workload.zone_id {
            debug!(host = %host_id, zone = %candidate.zone_id, "last host is in another zone");
            return Ok(None);
        }
        Ok(Some(candidate))
    }

    /// Walk the zone's topology in shuffled order, handing each eligible
    /// host to `visit` until it breaks with a decision.
    pub fn walk<F>(
        &self,
        zone_id: &str,
        exclude: &ExcludeList,
        stats: &mut SearchStats,
        mut visit: F,
    ) -> PlacementResult<Option<PlacementDecision>>
    where
        F: FnMut(&Candidate, &mut SearchStats) -> ControlFlow<PlacementDecision>,
    {
        let mut rng = self.rng();

        let mut pods = self.directory.pods_in_zone(zone_id)?;
        pods.shuffle(&mut rng);

        for pod in pods {
            if exclude.excludes_pod(&pod.id) {
                stats.excluded += 1;
                continue;
            }
            let mut clusters = self.directory.clusters_in_pod(&pod.id)?;
            clusters.shuffle(&mut rng);

            for cluster in clusters {
                if exclude.excludes_cluster(&cluster.id) {
                    stats.excluded += 1;
                    continue;
                }
                let mut hosts = self.directory.hosts_in_cluster(&cluster.id)?;
                hosts.shuffle(&mut rng);

                for host in hosts {
                    if exclude.excludes_host(&host.id) {
                        stats.excluded += 1;
                        continue;
                    }
                    if !host.is_schedulable() {
                        stats.not_up += 1;
                        continue;
                    }
                    stats.considered += 1;

                    let candidate = Candidate {
                        zone_id: zone_id.to_string(),
                        pod_id: pod.id.clone(),
                        cluster_id: cluster.id.clone(),
                        host,
                    };
                    if let ControlFlow::Break(decision) = visit(&candidate, stats) {
                        return Ok(Some(decision));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Attempt a locked reservation. Ledger failures count against the host only.
    pub fn try_reserve(
        &self,
        candidate: &Candidate,
        req: &ResourceRequest,
        mode: AllocationMode,
        stats: &mut SearchStats,
    ) -> Option<PlacementDecision> {
        let host_id = &candidate.host.id;
        match self.ledger.reserve(host_id, req, mode) {
            Ok(true) => Some(candidate.decision(mode)),
            Ok(false) => {
                stats.rejected += 1;
                debug!(host = %host_id, ?mode, "host rejected reservation");
                None
            }
            Err(err) => {
                note_ledger_error(host_id, &err, stats);
                None
            }
        }
    }

    /// Shared `check` implementation: topology, status, exclusion, admission.
    pub fn check(
        &self,
        workload: &WorkloadRequest,
        decision: &PlacementDecision,
        exclude: &ExcludeList,
    ) -> PlacementResult<bool> {
        self.validate(workload)?;
        if decision.zone_id != workload.zone_id {
            return Ok(false);
        }
        let Some(host) = self.directory.host(&decision.host_id)? else {
            return Ok(false);
        };
        if !host.is_schedulable() {
            return Ok(false);
        }
        let Some(candidate) = self.locate(host, exclude)? else {
            return Ok(false);
        };
        if candidate.cluster_id != decision.cluster_id
            || candidate.pod_id != decision.pod_id
            || candidate.zone_id != decision.zone_id
        {
            return Ok(false);
        }

        let req = workload.resources();
        let sticky = workload.last_host_id.as_deref() == Some(decision.host_id.as_str());
        if sticky && self.admissible(&decision.host_id, &req, AllocationMode::FromReserved) {
            return Ok(true);
        }
        Ok(self.admissible(&decision.host_id, &req, AllocationMode::FromFree))
    }

    fn admissible(&self, host_id: &str, req: &ResourceRequest, mode: AllocationMode) -> bool {
        match self.ledger.admissible(host_id, req, mode) {
            Ok(admitted) => admitted,
            Err(err) => {
                warn!(host = %host_id, error = %err, "admission check failed");
                false
            }
        }
    }

    pub fn no_capacity(&self, workload: &WorkloadRequest, stats: &SearchStats) -> PlacementError {
        warn!(
            zone = %workload.zone_id,
            cpu = workload.cpu,
            memory = workload.memory,
            ?stats,
            "no host can fit workload: insufficient zone capacity"
        );
        PlacementError::NoCapacity {
            zone_id: workload.zone_id.clone(),
            cpu: workload.cpu,
            memory: workload.memory,
        }
    }
}

/// Log and count a per-host ledger failure.
pub(crate) fn note_ledger_error(host_id: &str, err: &LedgerError, stats: &mut SearchStats) {
    match err {
        LedgerError::MissingCapacity(_) => {
            stats.inconsistent += 1;
            warn!(host = %host_id, "skipping host without capacity records");
        }
        LedgerError::LockTimeout(_) => {
            stats.lock_timeouts += 1;
            debug!(host = %host_id, "capacity lock timed out, trying next host");
        }
        LedgerError::Store(e) => {
            stats.store_errors += 1;
            warn!(host = %host_id, error = %e, "capacity store failed, trying next host");
        }
    }
}

// ── First fit ──────────────────────────────────────────────────────

/// Takes the first host in shuffled topology order that admits the workload.
pub struct FirstFitPlanner {
    ctx: PlacementContext,
}

impl FirstFitPlanner {
    pub fn new(ctx: PlacementContext) -> Self {
        Self { ctx }
    }
}

impl Planner for FirstFitPlanner {
    fn kind(&self) -> PlannerKind {
        PlannerKind::FirstFit
    }

    fn plan(
        &self,
        workload: &WorkloadRequest,
        exclude: &ExcludeList,
    ) -> PlacementResult<PlacementDecision> {
        let zone = self.ctx.validate(workload)?;
        if exclude.excludes_zone(&zone.id) {
            return Err(self.ctx.no_capacity(workload, &SearchStats::default()));
        }

        let mut stats = SearchStats::default();
        if let Some(decision) = self.ctx.try_last_host(workload, exclude, &mut stats) {
            return Ok(decision);
        }

        let req = workload.resources();
        let found = self.ctx.walk(&zone.id, exclude, &mut stats, |candidate, stats| {
            match self
                .ctx
                .try_reserve(candidate, &req, AllocationMode::FromFree, stats)
            {
                Some(decision) => ControlFlow::Break(decision),
                None => ControlFlow::Continue(()),
            }
        })?;

        match found {
            Some(decision) => {
                info!(
                    host = %decision.host_id,
                    cluster = %decision.cluster_id,
                    pod = %decision.pod_id,
                    zone = %decision.zone_id,
                    considered = stats.considered,
                    "workload placed"
                );
                Ok(decision)
            }
            None => Err(self.ctx.no_capacity(workload, &stats)),
        }
    }

    fn check(
        &self,
        workload: &WorkloadRequest,
        decision: &PlacementDecision,
        exclude: &ExcludeList,
    ) -> PlacementResult<bool> {
        self.ctx.check(workload, decision, exclude)
    }
}
