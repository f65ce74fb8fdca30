//! Best-fit placement: prefer the host left tightest after placement.
//!
//! Candidates are ranked on an unlocked capacity snapshot. The snapshot is
//! advisory only; each reservation still goes through the ledger's locked
//! check, and a host that lost a race is simply skipped.

use std::ops::ControlFlow;

use tracing::{debug, info};

use berth_core::{
    AllocationMode, ExcludeList, HostCapacity, PlacementDecision, PlannerKind, ResourceRequest,
    WorkloadRequest,
};

use crate::error::PlacementResult;
use crate::planner::{Candidate, PlacementContext, Planner, SearchStats, note_ledger_error};

/// A feasible host and what it would have left after placement.
#[derive(Debug, Clone)]
struct RankedHost {
    candidate: Candidate,
    cpu_left: u64,
    memory_left: u64,
}

/// Remaining free capacity after `req`, or `None` if it does not fit.
fn leftover(capacity: &HostCapacity, req: &ResourceRequest) -> Option<(u64, u64)> {
    if !capacity.admits(req, AllocationMode::FromFree) {
        return None;
    }
    Some((
        capacity.cpu.free() - req.cpu,
        capacity.memory.free() - req.memory,
    ))
}

pub struct BestFitPlanner {
    ctx: PlacementContext,
}

impl BestFitPlanner {
    pub fn new(ctx: PlacementContext) -> Self {
        Self { ctx }
    }

    /// Collect every feasible host of the zone, tightest first.
    ///
    /// Ties keep the shuffled walk order.
    fn rank(
        &self,
        zone_id: &str,
        req: &ResourceRequest,
        exclude: &ExcludeList,
        stats: &mut SearchStats,
    ) -> PlacementResult<Vec<RankedHost>> {
        let mut ranked = Vec::new();
        self.ctx.walk(zone_id, exclude, stats, |candidate, stats| {
            match self.ctx.ledger().capacity(&candidate.host.id) {
                Ok(capacity) => match leftover(&capacity, req) {
                    Some((cpu_left, memory_left)) => ranked.push(RankedHost {
                        candidate: candidate.clone(),
                        cpu_left,
                        memory_left,
                    }),
                    None => stats.rejected += 1,
                },
                Err(err) => note_ledger_error(&candidate.host.id, &err, stats),
            }
            ControlFlow::Continue(())
        })?;

        ranked.sort_by_key(|r| (r.cpu_left, r.memory_left));
        Ok(ranked)
    }
}

impl Planner for BestFitPlanner {
    fn kind(&self) -> PlannerKind {
        PlannerKind::BestFit
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
        let ranked = self.rank(&zone.id, &req, exclude, &mut stats)?;
        debug!(zone = %zone.id, feasible = ranked.len(), "ranked candidate hosts");

        for entry in &ranked {
            if let Some(decision) =
                self.ctx
                    .try_reserve(&entry.candidate, &req, AllocationMode::FromFree, &mut stats)
            {
                info!(
                    host = %decision.host_id,
                    cpu_left = entry.cpu_left,
                    memory_left = entry.memory_left,
                    "workload placed on tightest host"
                );
                return Ok(decision);
            }
        }

        Err(self.ctx.no_capacity(workload, &stats))
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use berth_state::StateStore;

    use super::*;
    use crate::testing::*;

    fn best_fit(store: &StateStore) -> BestFitPlanner {
        BestFitPlanner::new(PlacementContext::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        ))
    }

    #[test]
    fn leftover_is_free_minus_request() {
        let mut capacity = HostCapacity::new(16, 32768);
        capacity.cpu.used = 4;
        capacity.cpu.reserved = 2;
        assert_eq!(
            leftover(&capacity, &ResourceRequest::new(4, 8192)),
            Some((6, 24576))
        );
        assert_eq!(leftover(&capacity, &ResourceRequest::new(11, 1)), None);
    }

    #[test]
    fn picks_host_with_least_cpu_left() {
        let store = seed_store(&[
            up("p1", "c1", "roomy", 64, 65536),
            up("p1", "c2", "snug", 10, 65536),
            up("p2", "c3", "medium", 32, 65536),
            up("p2", "c4", "tiny", 4, 65536),
        ]);
        let planner = best_fit(&store);
        let workload = WorkloadRequest::new(ZONE, 8, 1024);

        let decision = planner.plan(&workload, &ExcludeList::new()).unwrap();
        assert_eq!(decision.host_id, "snug");
        assert_eq!(decision.mode, AllocationMode::FromFree);

        // snug now has 2 cores left; the next 8-core workload goes to medium.
        let decision = planner.plan(&workload, &ExcludeList::new()).unwrap();
        assert_eq!(decision.host_id, "medium");
    }

    #[test]
    fn memory_breaks_cpu_ties() {
        let store = seed_store(&[
            up("p1", "c1", "a", 8, 65536),
            up("p1", "c1", "b", 8, 16384),
            up("p1", "c1", "c", 8, 32768),
        ]);
        let planner = best_fit(&store);

        let decision = planner
            .plan(&WorkloadRequest::new(ZONE, 2, 4096), &ExcludeList::new())
            .unwrap();
        assert_eq!(decision.host_id, "b");
    }

    #[test]
    fn sticky_host_precedes_ranking() {
        let store = seed_store(&[
            up("p1", "c1", "roomy", 64, 65536),
            up("p1", "c1", "snug", 8, 8192),
        ]);
        reserve_for_return(&store, "roomy", 4, 4096);
        let planner = best_fit(&store);
        let workload = WorkloadRequest::new(ZONE, 4, 4096).with_last_host("roomy");

        let decision = planner.plan(&workload, &ExcludeList::new()).unwrap();
        assert_eq!(decision.host_id, "roomy");
        assert_eq!(decision.mode, AllocationMode::FromReserved);
    }

    #[test]
    fn exhaustion_leaves_capacity_untouched() {
        let store = seed_store(&[
            up("p1", "c1", "h1", 4, 65536),
            up("p1", "c1", "h2", 64, 1024),
        ]);
        let planner = best_fit(&store);
        let before = (
            store.get_capacity("h1").unwrap(),
            store.get_capacity("h2").unwrap(),
        );

        let err = planner
            .plan(&WorkloadRequest::new(ZONE, 8, 4096), &ExcludeList::new())
            .unwrap_err();

        assert!(err.is_capacity_exhausted());
        let after = (
            store.get_capacity("h1").unwrap(),
            store.get_capacity("h2").unwrap(),
        );
        assert_eq!(before, after);
    }

    #[test]
    fn excluded_tightest_host_is_skipped() {
        let store = seed_store(&[
            up("p1", "c1", "snug", 8, 8192),
            up("p1", "c2", "roomy", 64, 65536),
        ]);
        let planner = best_fit(&store);
        let mut avoid = ExcludeList::new();
        avoid.add_cluster("c1");

        let decision = planner
            .plan(&WorkloadRequest::new(ZONE, 4, 4096), &avoid)
            .unwrap();
        assert_eq!(decision.host_id, "roomy");
    }
}
