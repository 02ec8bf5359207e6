//! Survivability against a single host failure.
//!
//! A request needs as many backups as the largest number of its primaries on one host.
//! Backups are searched for in the admission subtree first and then in every enclosing
//! subtree up to the core. Within a scope, collocation puts part of the backups on the
//! hosts that run the fewest primaries of the request, which keeps the failover traffic
//! local; the rest goes to hosts without any of its primaries. Once the backups of a
//! scope are placed, the oracle maps them to primaries and sizes the bandwidth the
//! failover needs. If either step fails the scope is abandoned and the next one up is
//! tried, and if collocation was used on the way, the whole search is run once more
//! without it.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bandwidth::Bandwidth;
use crate::cluster::{Cluster, NodeIx};
use crate::ledger::{Ledger, Role, UnitId};
use crate::mapping::MappingProblem;
use crate::oracle::Oracle;
use crate::request::{RejectionReason, Request};
use crate::subtree::SubTree;
use crate::Error;

/// How backups that are not collocated are spread over hosts without primaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum SpreadStrategy {
    /// Fill the hosts with the most free units first.
    MostFree,
    /// Pick a host uniformly at random for every backup.
    Random,
}

impl Default for SpreadStrategy {
    fn default() -> Self {
        SpreadStrategy::MostFree
    }
}

/// Backup hosts computed for a scope but not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPlan {
    pub scope: NodeIx,
    /// host and the number of backups placed on it
    pub hosts: Vec<(NodeIx, usize)>,
    /// how many of the backups share a host with primaries of the request
    pub collocated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Protected,
    Rejected(RejectionReason),
}

/// Knobs of the protection search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectOptions {
    pub collocation: bool,
    pub spread: SpreadStrategy,
}

fn push_host(hosts: &mut Vec<(NodeIx, usize)>, host: NodeIx, k: usize) {
    match hosts.iter_mut().find(|(h, _)| *h == host) {
        Some((_, c)) => *c += k,
        None => hosts.push((host, k)),
    }
}

/// Compute where the backups of `req` go inside `scope`, `None` if they do not fit.
pub fn plan_backups<R: Rng>(
    cluster: &Cluster,
    ledger: &Ledger,
    req: &Request,
    scope: &SubTree,
    collocation: bool,
    spread: SpreadStrategy,
    rng: &mut R,
) -> Option<BackupPlan> {
    let needed = req.backups_needed();
    if needed == 0 {
        return None;
    }
    let min_hosted = req.min_hosted();
    let per_host = req.primaries_per_host();

    let mut non_hosting: Vec<(NodeIx, usize)> = scope
        .hosts()
        .iter()
        .filter(|h| !per_host.contains_key(*h))
        .map(|&h| (h, ledger.free_units(h)))
        .filter(|&(_, free)| free > 0)
        .collect();
    let free_non_hosting: usize = non_hosting.iter().map(|&(_, free)| free).sum();

    let mut hosts = Vec::new();
    let mut collocated = 0;
    if collocation && req.spans_multiple_hosts() && needed > min_hosted {
        let mut targets: Vec<(NodeIx, usize)> = scope
            .hosts()
            .iter()
            .filter(|h| per_host.get(*h).map(|u| u.len()) == Some(min_hosted))
            .map(|&h| (h, ledger.free_units(h)))
            .filter(|&(_, free)| free > 0)
            .collect();

        // a target's own primaries must still be covered from elsewhere
        if !targets.is_empty() && free_non_hosting >= min_hosted {
            targets.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            let mut left = needed - min_hosted;
            for &(t, free) in &targets {
                if left == 0 {
                    break;
                }
                let k = free.min(left);
                push_host(&mut hosts, t, k);
                left -= k;
                collocated += k;
            }
        }
    }

    let mut rest = needed - collocated;
    if rest > free_non_hosting {
        log::trace!(
            "scope {}: {} backups do not fit in {} free units",
            cluster[scope.root()].name,
            rest,
            free_non_hosting
        );
        return None;
    }

    match spread {
        SpreadStrategy::MostFree => {
            non_hosting.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            for &(h, free) in &non_hosting {
                if rest == 0 {
                    break;
                }
                let k = free.min(rest);
                push_host(&mut hosts, h, k);
                rest -= k;
            }
        }
        SpreadStrategy::Random => {
            while rest > 0 {
                let i = rng.gen_range(0..non_hosting.len());
                push_host(&mut hosts, non_hosting[i].0, 1);
                non_hosting[i].1 -= 1;
                if non_hosting[i].1 == 0 {
                    non_hosting.swap_remove(i);
                }
                rest -= 1;
            }
        }
    }

    Some(BackupPlan {
        scope: scope.root(),
        hosts,
        collocated,
    })
}

/// Reserve the backup units of `plan` for `req`.
pub fn commit_backups(
    ledger: &mut Ledger,
    req: &mut Request,
    plan: &BackupPlan,
) -> Result<(), Error> {
    for &(host, k) in &plan.hosts {
        for _ in 0..k {
            let unit = ledger
                .reserve_unit(host, req.id, Role::Backup)
                .ok_or_else(|| Error::Invariant(format!("host {:?} ran out of units", host)))?;
            req.backups.push(unit);
        }
    }
    Ok(())
}

/// Ask the oracle for a mapping of the placed backups and reserve the bandwidth it
/// needs. Returns false, with nothing reserved, when the mapping is infeasible.
pub fn map_bandwidth(
    cluster: &Cluster,
    ledger: &mut Ledger,
    req: &mut Request,
    scope: &SubTree,
    oracle: &mut dyn Oracle,
) -> Result<bool, Error> {
    let problem = MappingProblem::new(cluster, ledger, req, scope, &req.backups);
    let solution = match oracle.map_backups(&problem) {
        Some(s) if problem.is_valid(&s) => s,
        Some(_) => {
            log::warn!("oracle returned an invalid mapping for request {}", req.id);
            return Ok(false);
        }
        None => return Ok(false),
    };
    if solution
        .demands
        .iter()
        .any(|&(link, d)| d > ledger.residual(link))
    {
        return Ok(false);
    }

    for &(link, d) in &solution.demands {
        ledger.reserve_bandwidth(link, req.id, Bandwidth::zero(), d)?;
    }
    log::debug!(
        "request {} mapped in {}: {} backup bandwidth on {} links",
        req.id,
        cluster[scope.root()].name,
        solution.objective,
        solution.demands.len()
    );
    req.mapping = solution.assignment;
    Ok(true)
}

/// Give back the backup units and the backup bandwidth of `req`. The request must have
/// left every sharing set before.
pub fn release_backups(cluster: &Cluster, ledger: &mut Ledger, req: &mut Request) {
    for unit in req.backups.drain(..) {
        ledger.release_unit(unit);
    }
    for link in cluster.all_links() {
        ledger.release_backup_bandwidth(link, req.id);
    }
    req.mapping.clear();
    req.protected = false;
}

/// Run the protection search for a request whose primaries are committed.
pub fn protect<R: Rng>(
    cluster: &Cluster,
    ledger: &mut Ledger,
    req: &mut Request,
    oracle: &mut dyn Oracle,
    opts: ProtectOptions,
    rng: &mut R,
) -> Result<Protection, Error> {
    let root = req
        .subtree
        .ok_or_else(|| Error::Invariant(format!("request {} has no primaries", req.id)))?;
    let start = SubTree::build(cluster, root);

    let mut placed_any = false;
    let mut collocation = opts.collocation;
    loop {
        let mut collocated = false;
        let mut scope = Some(start.clone());
        while let Some(s) = scope {
            if let Some(plan) =
                plan_backups(cluster, ledger, req, &s, collocation, opts.spread, rng)
            {
                placed_any = true;
                collocated |= plan.collocated > 0;
                commit_backups(ledger, req, &plan)?;
                if map_bandwidth(cluster, ledger, req, &s, oracle)? {
                    req.protected = true;
                    log::debug!(
                        "request {} protected in {} with {} backups, {} collocated",
                        req.id,
                        cluster[s.root()].name,
                        req.backups.len(),
                        plan.collocated
                    );
                    return Ok(Protection::Protected);
                }
                release_backups(cluster, ledger, req);
            }
            scope = s.parent(cluster);
        }

        if collocated {
            collocation = false;
        } else {
            break;
        }
    }

    let reason = if placed_any {
        RejectionReason::BackupMappingBandwidthFailed
    } else {
        RejectionReason::BackupEmbeddingFailed
    };
    Ok(Protection::Rejected(reason))
}

/// Whether every primary has a backup off its host, and the backups taking over for one
/// host are distinct.
pub fn is_survivable(req: &Request) -> bool {
    if req.mapping.len() != req.primaries.len() {
        return false;
    }
    let mapped_once = req
        .primaries
        .iter()
        .all(|p| req.mapping.iter().filter(|(q, _)| q == p).count() == 1);
    let off_host = req.mapping.iter().all(|(p, b)| p.host != b.host);
    let owned = req.mapping.iter().all(|(_, b)| req.backups.contains(b));
    let distinct = req.primaries_per_host().keys().all(|&h| {
        let mut used: Vec<UnitId> = req
            .mapping
            .iter()
            .filter(|(p, _)| p.host == h)
            .map(|&(_, b)| b)
            .collect();
        let len = used.len();
        used.sort();
        used.dedup();
        used.len() == len
    });
    mapped_once && off_host && owned && distinct
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::{build_tree, TopoArgs};
    use crate::bandwidth::{Bandwidth, BandwidthTrait};
    use crate::oracle::HeuristicOracle;
    use crate::primary;
    use rand::{rngs::StdRng, SeedableRng};

    fn topo(nhosts: usize, slots: usize, host_bw: f64) -> TopoArgs {
        TopoArgs {
            naggs: 1,
            nracks: 1,
            nhosts,
            slots,
            host_bw,
            rack_bw: 100.0,
            agg_bw: 100.0,
        }
    }

    fn admit_primary(
        cluster: &Cluster,
        ledger: &mut Ledger,
        id: usize,
        n: usize,
        bw: Bandwidth,
    ) -> Request {
        let mut req = Request::new(id, n, bw);
        let placement = primary::place(cluster, ledger, n, bw).unwrap();
        primary::commit(ledger, &mut req, &placement).unwrap();
        req
    }

    fn opts(collocation: bool) -> ProtectOptions {
        ProtectOptions {
            collocation,
            spread: SpreadStrategy::MostFree,
        }
    }

    #[test]
    fn one_backup_for_one_primary_per_host() {
        let cluster = build_tree(&TopoArgs::default()).unwrap();
        let mut ledger = Ledger::new(&cluster);
        let mut req = admit_primary(&cluster, &mut ledger, 1, 2, 10.mbps());
        assert_eq!(req.primaries_per_host().len(), 2);
        assert_eq!(req.backups_needed(), 1);

        let mut rng = StdRng::seed_from_u64(0);
        let outcome = protect(
            &cluster,
            &mut ledger,
            &mut req,
            &mut HeuristicOracle,
            opts(true),
            &mut rng,
        )
        .unwrap();
        assert_eq!(outcome, Protection::Protected);
        assert_eq!(req.backups.len(), 1);
        assert!(is_survivable(&req));
        ledger.check_invariants(&cluster).unwrap();
    }

    #[test]
    fn collocate_on_the_least_loaded_host() {
        let cluster = build_tree(&TopoArgs::default()).unwrap();
        let ledger = Ledger::new(&cluster);
        let h = |name: &str| cluster.node_index(name).unwrap();
        let mut req = Request::new(1, 4, 10.mbps());
        for slot in 0..3 {
            req.primaries.push(UnitId { host: h("host_0"), slot });
        }
        req.primaries.push(UnitId { host: h("host_1"), slot: 0 });

        let scope = SubTree::build(&cluster, h("tor_0"));
        let mut rng = StdRng::seed_from_u64(0);
        let plan = plan_backups(
            &cluster,
            &ledger,
            &req,
            &scope,
            true,
            SpreadStrategy::MostFree,
            &mut rng,
        )
        .unwrap();
        assert_eq!(plan.collocated, 2);
        assert_eq!(plan.hosts, vec![(h("host_1"), 2), (h("host_2"), 1)]);

        let plain = plan_backups(
            &cluster,
            &ledger,
            &req,
            &scope,
            false,
            SpreadStrategy::MostFree,
            &mut rng,
        )
        .unwrap();
        assert_eq!(plain.collocated, 0);
        assert_eq!(plain.hosts, vec![(h("host_2"), 3)]);
    }

    #[test]
    fn random_spread_avoids_hosting_hosts() {
        let cluster = build_tree(&TopoArgs::default()).unwrap();
        let ledger = Ledger::new(&cluster);
        let h = |name: &str| cluster.node_index(name).unwrap();
        let mut req = Request::new(1, 2, 10.mbps());
        req.primaries.push(UnitId { host: h("host_0"), slot: 0 });
        req.primaries.push(UnitId { host: h("host_0"), slot: 1 });

        let scope = SubTree::build(&cluster, h("agg_0"));
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let plan = plan_backups(
                &cluster,
                &ledger,
                &req,
                &scope,
                true,
                SpreadStrategy::Random,
                &mut rng,
            )
            .unwrap();
            assert_eq!(plan.hosts.iter().map(|&(_, k)| k).sum::<usize>(), 2);
            assert!(plan.hosts.iter().all(|&(x, _)| x != h("host_0")));
            assert_eq!(plan.collocated, 0);
        }
    }

    #[test]
    fn no_room_for_backups() {
        let cluster = build_tree(&topo(2, 2, 100.0)).unwrap();
        let mut ledger = Ledger::new(&cluster);
        let mut req = admit_primary(&cluster, &mut ledger, 1, 2, 1.mbps());
        let snapshot = ledger.clone();

        let mut rng = StdRng::seed_from_u64(0);
        let outcome = protect(
            &cluster,
            &mut ledger,
            &mut req,
            &mut HeuristicOracle,
            opts(true),
            &mut rng,
        )
        .unwrap();
        assert_eq!(
            outcome,
            Protection::Rejected(RejectionReason::BackupEmbeddingFailed)
        );
        assert!(req.backups.is_empty());
        assert_eq!(ledger, snapshot);
    }

    #[test]
    fn no_bandwidth_to_activate_backups() {
        let cluster = build_tree(&topo(3, 2, 10.0)).unwrap();
        let mut ledger = Ledger::new(&cluster);
        let mut req = admit_primary(&cluster, &mut ledger, 1, 2, 10.mbps());
        let host_2 = cluster.node_index("host_2").unwrap();
        assert_eq!(req.primaries_on(host_2), 0);
        let up = cluster.get_uplink(host_2).unwrap();
        ledger.reserve_bandwidth(up, 99, 5.mbps(), 0.mbps()).unwrap();
        let snapshot = ledger.clone();

        let mut rng = StdRng::seed_from_u64(0);
        let outcome = protect(
            &cluster,
            &mut ledger,
            &mut req,
            &mut HeuristicOracle,
            opts(true),
            &mut rng,
        )
        .unwrap();
        assert_eq!(
            outcome,
            Protection::Rejected(RejectionReason::BackupMappingBandwidthFailed)
        );
        assert_eq!(ledger, snapshot);
    }

    #[test]
    fn release_restores_the_ledger() {
        let cluster = build_tree(&TopoArgs::default()).unwrap();
        let mut ledger = Ledger::new(&cluster);
        let mut req = admit_primary(&cluster, &mut ledger, 1, 6, 10.mbps());
        let snapshot = ledger.clone();

        let mut rng = StdRng::seed_from_u64(0);
        let outcome = protect(
            &cluster,
            &mut ledger,
            &mut req,
            &mut HeuristicOracle,
            opts(true),
            &mut rng,
        )
        .unwrap();
        assert_eq!(outcome, Protection::Protected);
        assert!(is_survivable(&req));
        assert_ne!(ledger, snapshot);

        release_backups(&cluster, &mut ledger, &mut req);
        assert_eq!(ledger, snapshot);
        assert!(!req.protected);
    }
}
