use indexmap::IndexMap;

use vcguard::architecture::TopoArgs;
use vcguard::bandwidth::{Bandwidth, BandwidthTrait};
use vcguard::cluster::{Cluster, LinkIx};
use vcguard::ledger::{Ledger, UnitId};
use vcguard::oracle::HeuristicOracle;
use vcguard::request::{RejectionReason, Request};
use vcguard::{sharing, Brain, BrainSetting, RequestId};

fn one_rack(nhosts: usize, slots: usize) -> BrainSetting {
    BrainSetting {
        topology: TopoArgs {
            naggs: 1,
            nracks: 1,
            nhosts,
            slots,
            host_bw: 100.0,
            rack_bw: 100.0,
            agg_bw: 100.0,
        },
        ..Default::default()
    }
}

#[test]
fn primaries_stay_in_the_smallest_subtree() {
    logging::init_log();
    let mut brain = Brain::new(one_rack(4, 2)).unwrap();
    let cluster = brain.cluster().clone();
    let tor = cluster.node_index("tor_0").unwrap();

    let req = brain.admit(1, 3, 10.mbps()).unwrap().clone();
    assert!(req.admitted);
    assert_eq!(req.subtree, Some(tor));
    assert!(req
        .primaries
        .iter()
        .all(|u| cluster.ancestors(u.host).contains(&tor)));

    // all three units sit below the rack uplink: min(3, 0) * 10
    let rack_up = cluster.get_uplink(tor).unwrap();
    assert!(brain.ledger().reservation(rack_up, 1).is_none());

    for u in &req.primaries {
        let up = cluster.get_uplink(u.host).unwrap();
        let r = brain.ledger().reservation(up, 1).unwrap();
        assert_eq!(r.primary, 10.mbps());
    }
    brain.audit().unwrap();
}

#[test]
fn one_backup_covers_one_primary_per_host() {
    logging::init_log();
    let mut brain = Brain::new(BrainSetting::default()).unwrap();
    let req = brain.admit(1, 2, 10.mbps()).unwrap();
    assert!(req.admitted);
    assert_eq!(req.primaries_per_host().len(), 2);
    assert_eq!(req.backups_needed(), 1);
    assert_eq!(req.backups.len(), 1);
    let b = req.backups[0];
    assert!(req.primaries.iter().all(|p| p.host != b.host));
    brain.audit().unwrap();
}

/// A pure backup consumer of `link`: one primary on each of `hosts`, all backed up by a
/// unit on `backup_host`, with `demand` reserved on `link`.
fn backup_consumer(
    cluster: &Cluster,
    ledger: &mut Ledger,
    id: RequestId,
    hosts: &[&str],
    backup_host: &str,
    link: LinkIx,
    demand: Bandwidth,
) -> Request {
    let mut req = Request::new(id, hosts.len(), 10.mbps());
    let b = UnitId {
        host: cluster.node_index(backup_host).unwrap(),
        slot: 0,
    };
    for h in hosts {
        let p = UnitId {
            host: cluster.node_index(h).unwrap(),
            slot: id,
        };
        req.primaries.push(p);
        req.mapping.push((p, b));
    }
    req.backups.push(b);
    req.admitted = true;
    req.active = true;
    ledger
        .reserve_bandwidth(link, id, Bandwidth::zero(), demand)
        .unwrap();
    req
}

#[test]
fn disjoint_tenants_share_backup_bandwidth() {
    logging::init_log();
    let cluster = vcguard::architecture::build_tree(&TopoArgs::default()).unwrap();
    let mut ledger = Ledger::new(&cluster);
    let link = cluster
        .get_uplink(cluster.node_index("host_3").unwrap())
        .unwrap();

    let mut requests = IndexMap::new();
    let a = backup_consumer(
        &cluster,
        &mut ledger,
        1,
        &["host_0", "host_1"],
        "host_3",
        link,
        10.mbps(),
    );
    let b = backup_consumer(
        &cluster,
        &mut ledger,
        2,
        &["host_4", "host_5"],
        "host_3",
        link,
        20.mbps(),
    );
    assert!(sharing::can_share_bandwidth(&cluster, &a, &b, link));
    requests.insert(1, a);
    requests.insert(2, b);
    let before = ledger.residual(link);

    let mut oracle = HeuristicOracle::default();
    sharing::optimize_link(&cluster, &mut ledger, &mut requests, &mut oracle, link);

    let state = ledger.link(link);
    assert_eq!(state.sharing_sets.len(), 1);
    assert_eq!(state.sharing_sets[0].members.len(), 2);
    assert_eq!(state.sharing_sets[0].bandwidth_to_reserve, 20.mbps());
    assert_eq!(ledger.residual(link), before + 10.mbps());
    ledger.check_invariants(&cluster).unwrap();
}

#[test]
fn no_room_for_backups_rolls_everything_back() {
    logging::init_log();
    let mut brain = Brain::new(one_rack(2, 2)).unwrap();
    let snapshot = brain.ledger().clone();

    let req = brain.admit(1, 2, 10.mbps()).unwrap();
    assert!(!req.admitted);
    assert_eq!(req.rejection, Some(RejectionReason::BackupEmbeddingFailed));
    assert!(req.reserved_ledger.is_empty());
    assert!(req.primaries.is_empty());

    assert_eq!(brain.ledger(), &snapshot);
    let cluster = brain.cluster().clone();
    for l in cluster.all_links() {
        assert_eq!(brain.ledger().residual(l), cluster[l].capacity);
        assert!(brain.ledger().link(l).reservations.is_empty());
    }
    for &h in cluster.hosts() {
        assert_eq!(brain.ledger().free_units(h), 2);
    }
    brain.audit().unwrap();
}

#[test]
fn withdraw_one_of_three_sharers() {
    logging::init_log();
    let cluster = vcguard::architecture::build_tree(&TopoArgs::default()).unwrap();
    let mut ledger = Ledger::new(&cluster);
    let link = cluster
        .get_uplink(cluster.node_index("host_3").unwrap())
        .unwrap();

    let mut requests = IndexMap::new();
    let tenants = [
        (1, ["host_0", "host_1"], 10u64),
        (2, ["host_4", "host_5"], 30),
        (3, ["host_8", "host_9"], 20),
    ];
    for &(id, hosts, demand) in &tenants {
        let req = backup_consumer(
            &cluster,
            &mut ledger,
            id,
            &hosts,
            "host_3",
            link,
            demand.mbps(),
        );
        requests.insert(id, req);
    }
    let individual = ledger.residual(link);

    let mut oracle = HeuristicOracle::default();
    sharing::optimize_link(&cluster, &mut ledger, &mut requests, &mut oracle, link);
    assert_eq!(ledger.link(link).sharing_sets[0].members.len(), 3);
    assert_eq!(ledger.residual(link), individual + 30.mbps());

    sharing::withdraw(&mut ledger, &mut requests, link, 2).unwrap();
    let state = ledger.link(link);
    assert_eq!(state.sharing_sets.len(), 1);
    let set = &state.sharing_sets[0];
    assert_eq!(set.members.len(), 2);
    assert!(!set.contains(2));
    assert_eq!(set.bandwidth_to_reserve, 20.mbps());
    let r = state.reservation(2).unwrap();
    assert_eq!(r.backup, 30.mbps());
    assert!(r.shared.is_zero());
    assert_eq!(ledger.residual(link), individual + 10.mbps());
    assert!(requests[&2].sharing_sets.is_empty());
    assert_eq!(requests[&1].sharing_sets, vec![link]);
    ledger.check_invariants(&cluster).unwrap();
}

#[test]
fn sharing_through_the_brain() {
    logging::init_log();
    // four racks of three single-unit hosts: a tenant of three fills a rack, and its
    // backup lands in the first free host of the aggregation subtree
    let setting = BrainSetting {
        topology: TopoArgs {
            naggs: 1,
            nracks: 4,
            nhosts: 3,
            slots: 1,
            host_bw: 1000.0,
            rack_bw: 1000.0,
            agg_bw: 1000.0,
        },
        ..Default::default()
    };
    let mut brain = Brain::new(setting).unwrap();
    let cluster = brain.cluster().clone();
    let host = |name: &str| cluster.node_index(name).unwrap();
    let tor_1_up = cluster.get_uplink(host("tor_1")).unwrap();

    // primaries in racks 0, 2 and 3, every backup in rack 1
    let tenants: [(RequestId, u64, &str); 3] =
        [(0, 10, "host_3"), (1, 20, "host_4"), (2, 30, "host_5")];
    for &(id, bw, backup_host) in &tenants {
        let req = brain.admit(id, 3, bw.mbps()).unwrap();
        assert!(req.admitted);
        assert_eq!(req.backups.len(), 1);
        assert_eq!(req.backups[0].host, host(backup_host));
        brain.audit().unwrap();
    }

    // no two of them share a host, so the rack 1 uplink holds one reservation for all
    let state = brain.ledger().link(tor_1_up);
    assert_eq!(state.sharing_sets.len(), 1);
    let set = &state.sharing_sets[0];
    let mut members: Vec<(RequestId, Bandwidth)> = set.members.clone();
    members.sort();
    assert_eq!(members, vec![(0, 10.mbps()), (1, 20.mbps()), (2, 30.mbps())]);
    assert_eq!(set.bandwidth_to_reserve, 30.mbps());
    assert_eq!(state.residual, 970.mbps());
    assert_eq!(brain.stats().saved_by_sharing, 30.mbps());
    for id in 0..3 {
        assert_eq!(brain.request(id).unwrap().sharing_sets, vec![tor_1_up]);
    }
    let sets: usize = cluster
        .all_links()
        .map(|l| brain.ledger().link(l).sharing_sets.len())
        .sum();
    assert_eq!(sets, 1);

    // the largest member departs, the other two keep sharing at the next largest demand
    brain.release(2).unwrap();
    brain.audit().unwrap();
    let state = brain.ledger().link(tor_1_up);
    assert_eq!(state.sharing_sets.len(), 1);
    let set = &state.sharing_sets[0];
    assert_eq!(set.members.len(), 2);
    assert!(!set.contains(2));
    assert_eq!(set.bandwidth_to_reserve, 20.mbps());
    assert_eq!(state.residual, 980.mbps());
    assert_eq!(brain.stats().saved_by_sharing, 10.mbps());
    assert!(brain.request(2).unwrap().sharing_sets.is_empty());

    // a set of one is no set
    brain.release(0).unwrap();
    brain.audit().unwrap();
    let state = brain.ledger().link(tor_1_up);
    assert!(state.sharing_sets.is_empty());
    assert_eq!(state.reservation(1).unwrap().backup, 20.mbps());
    assert!(brain.stats().saved_by_sharing.is_zero());

    brain.release(1).unwrap();
    brain.audit().unwrap();
    for l in cluster.all_links() {
        assert_eq!(brain.ledger().residual(l), cluster[l].capacity);
        assert!(brain.ledger().link(l).reservations.is_empty());
    }
}
