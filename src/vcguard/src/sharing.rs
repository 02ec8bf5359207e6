//! Backup bandwidth sharing.
//!
//! Only one host fails at a time. Two requests whose backup traffic on a link is never
//! triggered by the same host failure can be served by one reservation of the larger
//! demand. On every link the engine groups such requests into sharing sets.
//!
//! Accounting: inside a set the carrier (see [`SharingSet::carrier`]) reserves the
//! whole set amount as its own backup bandwidth, every other member reserves nothing
//! and records its demand as `shared`.

use indexmap::IndexMap;

use crate::bandwidth::Bandwidth;
use crate::cluster::{Cluster, LinkIx, NodeIx};
use crate::ledger::{Ledger, LinkState, SharingSet};
use crate::oracle::Oracle;
use crate::primary::hose_bound;
use crate::request::Request;
use crate::{Error, RequestId};

/// Whether `req` needs extra bandwidth on `link` once `failed` goes down.
fn routes_backup_traffic(cluster: &Cluster, req: &Request, failed: NodeIx, link: LinkIx) -> bool {
    let before = req
        .primaries
        .iter()
        .filter(|u| cluster.is_under(u.host, link))
        .count();
    let after = req
        .hosts_after_failure(failed)
        .into_iter()
        .filter(|&h| cluster.is_under(h, link))
        .count();
    hose_bound(after, req.n, req.bw) > hose_bound(before, req.n, req.bw)
}

/// Two requests conflict on `link` if a single host holds primaries of both and its
/// failure makes both of them send backup traffic across `link`.
///
/// A request sends backup traffic across `link` only when the failure raises its hose
/// bound there. Having post-failure units below `link` is not enough: if all of them
/// end up below it, the bound is zero and nothing crosses the link.
pub fn can_share_bandwidth(cluster: &Cluster, a: &Request, b: &Request, link: LinkIx) -> bool {
    let hosts_a = a.primaries_per_host();
    let hosts_b = b.primaries_per_host();
    !hosts_a
        .keys()
        .filter(|h| hosts_b.contains_key(*h))
        .any(|&h| {
            routes_backup_traffic(cluster, a, h, link) && routes_backup_traffic(cluster, b, h, link)
        })
}

/// Requests holding backup bandwidth without any primary bandwidth on `link`, with their
/// individual demand, largest demand first.
pub fn candidates(ledger: &Ledger, link: LinkIx) -> Vec<(RequestId, Bandwidth)> {
    let mut res: Vec<(RequestId, Bandwidth)> = ledger
        .link(link)
        .reservations
        .iter()
        .filter(|(_, r)| r.primary.is_zero() && !r.backup_demand().is_zero())
        .map(|(&id, r)| (id, r.backup_demand()))
        .collect();
    res.sort_by(|a, b| b.1.cmp(&a.1));
    res
}

/// Input of the set packing oracle: `conflicts[i][j]` tells whether `requests[i]` and
/// `requests[j]` must never be in the same set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackingProblem {
    pub link: LinkIx,
    pub requests: Vec<RequestId>,
    pub demands: Vec<Bandwidth>,
    pub conflicts: Vec<Vec<bool>>,
}

impl PackingProblem {
    pub fn new(
        cluster: &Cluster,
        requests: &IndexMap<RequestId, Request>,
        link: LinkIx,
        cands: &[(RequestId, Bandwidth)],
    ) -> Self {
        let n = cands.len();
        let mut conflicts = vec![vec![false; n]; n];
        for i in 0..n {
            for j in i + 1..n {
                let c = match (requests.get(&cands[i].0), requests.get(&cands[j].0)) {
                    (Some(a), Some(b)) => !can_share_bandwidth(cluster, a, b, link),
                    _ => true,
                };
                conflicts[i][j] = c;
                conflicts[j][i] = c;
            }
        }
        PackingProblem {
            link,
            requests: cands.iter().map(|&(id, _)| id).collect(),
            demands: cands.iter().map(|&(_, d)| d).collect(),
            conflicts,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Item indices by descending demand, ties by position.
    pub fn order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.demands[b].cmp(&self.demands[a]));
        order
    }

    #[inline]
    pub fn compatible(&self, set: &[usize], i: usize) -> bool {
        set.iter().all(|&j| !self.conflicts[i][j])
    }
}

/// A partition of the items of a [`PackingProblem`] into sets, by item index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packing {
    pub sets: Vec<Vec<usize>>,
    pub reserved: Vec<Bandwidth>,
}

impl Packing {
    pub fn total(&self) -> Bandwidth {
        self.reserved.iter().sum()
    }

    /// Every item in exactly one set, no conflicting pair in a set, every set reserving
    /// at least its largest demand.
    pub fn is_valid(&self, problem: &PackingProblem) -> bool {
        if self.sets.len() != self.reserved.len() {
            return false;
        }
        let mut seen = vec![false; problem.len()];
        for (set, &reserved) in self.sets.iter().zip(&self.reserved) {
            for (k, &i) in set.iter().enumerate() {
                if i >= problem.len() || seen[i] {
                    return false;
                }
                seen[i] = true;
                if problem.demands[i] > reserved || !problem.compatible(&set[..k], i) {
                    return false;
                }
            }
        }
        seen.into_iter().all(|x| x)
    }
}

/// Seed a set with the largest unassigned demand, then add every remaining item, in
/// descending demand, that conflicts with no member so far.
pub fn greedy_packing(problem: &PackingProblem) -> Packing {
    let order = problem.order();
    let mut assigned = vec![false; problem.len()];
    let mut sets = Vec::new();
    let mut reserved = Vec::new();

    for (pos, &seed) in order.iter().enumerate() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut set = vec![seed];
        for &j in &order[pos + 1..] {
            if !assigned[j] && problem.compatible(&set, j) {
                assigned[j] = true;
                set.push(j);
            }
        }
        reserved.push(problem.demands[seed]);
        sets.push(set);
    }

    Packing { sets, reserved }
}

/// Write the entries of a set's members: the carrier reserves the set amount, the others
/// only record their demand as shared.
fn settle(state: &mut LinkState, set: &SharingSet) {
    let carrier = set.carrier();
    for &(r, d) in &set.members {
        let entry = state.reservations.entry(r).or_default();
        if Some(r) == carrier {
            entry.backup = d;
            entry.shared = Bandwidth::zero();
        } else {
            entry.backup = Bandwidth::zero();
            entry.shared = d;
        }
    }
}

/// Make `id` hold its whole demand individually.
fn settle_alone(state: &mut LinkState, id: RequestId) {
    if let Some(entry) = state.reservations.get_mut(&id) {
        entry.backup += entry.shared;
        entry.shared = Bandwidth::zero();
    }
}

fn forget_link(requests: &mut IndexMap<RequestId, Request>, id: RequestId, link: LinkIx) {
    if let Some(req) = requests.get_mut(&id) {
        req.sharing_sets.retain(|&l| l != link);
    }
}

fn remember_link(requests: &mut IndexMap<RequestId, Request>, id: RequestId, link: LinkIx) {
    if let Some(req) = requests.get_mut(&id) {
        if !req.sharing_sets.contains(&link) {
            req.sharing_sets.push(link);
        }
    }
}

/// Regroup the pure backup consumers of `link` into sharing sets. The new grouping is
/// committed only if it lowers the bandwidth reserved for them. Returns the requests
/// whose entries changed.
pub fn optimize_link(
    cluster: &Cluster,
    ledger: &mut Ledger,
    requests: &mut IndexMap<RequestId, Request>,
    oracle: &mut dyn Oracle,
    link: LinkIx,
) -> Vec<RequestId> {
    let cands = candidates(ledger, link);
    if cands.len() < 2 {
        return Vec::new();
    }

    let problem = PackingProblem::new(cluster, requests, link, &cands);
    let packing = match oracle.pack_sets(&problem) {
        Some(p) if p.is_valid(&problem) => p,
        Some(_) => {
            log::warn!("oracle returned an invalid packing on link {:?}", link);
            return Vec::new();
        }
        None => return Vec::new(),
    };

    let state = ledger.link(link);
    let current: Bandwidth = cands
        .iter()
        .filter_map(|&(id, _)| state.reservation(id))
        .map(|r| r.backup)
        .sum();
    let proposed: Bandwidth = packing
        .sets
        .iter()
        .map(|s| s.iter().map(|&i| cands[i].1).max().unwrap_or_default())
        .sum();
    if proposed >= current {
        return Vec::new();
    }

    log::debug!(
        "sharing on link {:?}: {} requests in {} sets, {} -> {}",
        link,
        cands.len(),
        packing.sets.len(),
        current,
        proposed
    );

    let new_sets: Vec<SharingSet> = packing
        .sets
        .iter()
        .filter(|s| s.len() > 1)
        .map(|s| SharingSet::new(s.iter().map(|&i| cands[i]).collect()))
        .collect();

    let state = ledger.link_mut(link);
    for &(id, _) in &cands {
        settle_alone(state, id);
    }
    for set in &new_sets {
        settle(state, set);
    }
    state.sharing_sets = new_sets.clone();
    state.residual += current - proposed;

    let touched: Vec<RequestId> = cands.iter().map(|&(id, _)| id).collect();
    for &id in &touched {
        forget_link(requests, id, link);
    }
    for set in &new_sets {
        for &(id, _) in &set.members {
            remember_link(requests, id, link);
        }
    }
    touched
}

/// Take `id` out of its sharing set on `link` and restore its individual backup
/// reservation. The remaining members keep sharing, or hold their demand alone when only
/// one of them is left.
pub fn withdraw(
    ledger: &mut Ledger,
    requests: &mut IndexMap<RequestId, Request>,
    link: LinkIx,
    id: RequestId,
) -> Result<(), Error> {
    let state = ledger.link(link);
    let pos = match state.set_of(id) {
        Some(pos) => pos,
        None => return Ok(()),
    };
    let set = &state.sharing_sets[pos];
    let demand = set
        .members
        .iter()
        .find(|&&(r, _)| r == id)
        .map(|&(_, d)| d)
        .unwrap_or_default();
    let rest: Vec<(RequestId, Bandwidth)> =
        set.members.iter().copied().filter(|&(r, _)| r != id).collect();
    let rest_reserve = rest.iter().map(|&(_, d)| d).max().unwrap_or_default();
    let delta = (demand + rest_reserve).saturating_sub(set.bandwidth_to_reserve);
    if delta > state.residual {
        return Err(Error::InsufficientBandwidth {
            link,
            requested: delta,
            residual: state.residual,
        });
    }

    let state = ledger.link_mut(link);
    state.residual -= delta;
    settle_alone(state, id);
    regroup(state, requests, link, pos, rest);
    forget_link(requests, id, link);
    Ok(())
}

/// Drop `id` from its sharing set on `link` because it departs: its share is not
/// restored, and the set shrinks to what the remaining members need.
pub fn leave(
    ledger: &mut Ledger,
    requests: &mut IndexMap<RequestId, Request>,
    link: LinkIx,
    id: RequestId,
) {
    let state = ledger.link_mut(link);
    if let Some(pos) = state.set_of(id) {
        let old = state.sharing_sets[pos].bandwidth_to_reserve;
        let rest: Vec<(RequestId, Bandwidth)> = state.sharing_sets[pos]
            .members
            .iter()
            .copied()
            .filter(|&(r, _)| r != id)
            .collect();
        let rest_reserve = rest.iter().map(|&(_, d)| d).max().unwrap_or_default();

        if let Some(entry) = state.reservations.get_mut(&id) {
            entry.backup = Bandwidth::zero();
            entry.shared = Bandwidth::zero();
            if entry.is_empty() {
                state.reservations.shift_remove(&id);
            }
        }
        state.residual += old - rest_reserve;
        regroup(state, requests, link, pos, rest);
    }
    forget_link(requests, id, link);
}

/// Replace the set at `pos` with the remaining members `rest`.
fn regroup(
    state: &mut LinkState,
    requests: &mut IndexMap<RequestId, Request>,
    link: LinkIx,
    pos: usize,
    rest: Vec<(RequestId, Bandwidth)>,
) {
    if rest.len() > 1 {
        let set = SharingSet::new(rest);
        for &(r, _) in &set.members {
            settle_alone(state, r);
        }
        settle(state, &set);
        state.sharing_sets[pos] = set;
    } else {
        state.sharing_sets.remove(pos);
        for (r, _) in rest {
            settle_alone(state, r);
            forget_link(requests, r, link);
        }
    }
}
