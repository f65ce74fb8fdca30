//! Concurrent `plan` calls against shared capacity never overcommit a host.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use berth_core::{Cluster, ExcludeList, Host, HostCapacity, HostStatus, Pod, WorkloadRequest, Zone};
use berth_placement::{
    CapacityLedger, FirstFitPlanner, MemoryLedger, PlacementContext, PlacementError, Planner,
};
use berth_state::StateStore;

const HOSTS: usize = 4;
const CORES_PER_HOST: u64 = 8;
const THREADS: usize = 16;
const PLANS_PER_THREAD: usize = 4;

fn topology() -> StateStore {
    let store = StateStore::open_in_memory().unwrap();
    store
        .put_zone(&Zone {
            id: "z".into(),
            name: "z".into(),
        })
        .unwrap();
    store
        .put_pod(&Pod {
            id: "p".into(),
            zone_id: "z".into(),
            name: "p".into(),
        })
        .unwrap();
    store
        .put_cluster(&Cluster {
            id: "c".into(),
            pod_id: "p".into(),
            name: "c".into(),
        })
        .unwrap();
    for i in 0..HOSTS {
        let id = format!("h{i}");
        store
            .put_host(&Host {
                id: id.clone(),
                cluster_id: "c".into(),
                name: id.clone(),
                status: HostStatus::Up,
            })
            .unwrap();
        store
            .put_capacity(&id, &HostCapacity::new(CORES_PER_HOST, 1 << 20))
            .unwrap();
    }
    store
}

/// Fire `THREADS * PLANS_PER_THREAD` single-core placements at once and
/// return how many were admitted.
fn run_contended(planner: Arc<dyn Planner>) -> usize {
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let planner = Arc::clone(&planner);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let workload = WorkloadRequest::new("z", 1, 1024);
                let mut admitted = 0;
                for _ in 0..PLANS_PER_THREAD {
                    match planner.plan(&workload, &ExcludeList::new()) {
                        Ok(_) => admitted += 1,
                        Err(PlacementError::NoCapacity { .. }) => {}
                        Err(e) => panic!("unexpected placement error: {e}"),
                    }
                }
                admitted
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).sum()
}

fn assert_full(ledger: &dyn CapacityLedger) {
    for i in 0..HOSTS {
        let capacity = ledger.capacity(&format!("h{i}")).unwrap();
        assert!(capacity.is_consistent(), "h{i} overcommitted: {capacity:?}");
        assert_eq!(capacity.cpu.used, CORES_PER_HOST);
    }
}

#[test]
fn store_backed_planning_fills_exactly_to_capacity() {
    let store = topology();
    let planner: Arc<dyn Planner> = Arc::new(FirstFitPlanner::new(PlacementContext::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )));

    let admitted = run_contended(planner);

    assert_eq!(admitted, HOSTS * CORES_PER_HOST as usize);
    assert_full(&store);
}

#[test]
fn memory_ledger_planning_fills_exactly_to_capacity() {
    let store = topology();
    // Generous timeout: contention must never surface as lost capacity here.
    let ledger = Arc::new(MemoryLedger::new(Duration::from_secs(5)));
    for i in 0..HOSTS {
        ledger.insert_host(&format!("h{i}"), HostCapacity::new(CORES_PER_HOST, 1 << 20));
    }
    let planner: Arc<dyn Planner> = Arc::new(FirstFitPlanner::new(PlacementContext::new(
        Arc::new(store),
        ledger.clone(),
    )));

    let admitted = run_contended(planner);

    assert_eq!(admitted, HOSTS * CORES_PER_HOST as usize);
    assert_full(ledger.as_ref());
}
