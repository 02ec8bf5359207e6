//! Hose-model placement of primary compute units.
//!
//! A request of `n` units with `bw` each is placed into the smallest subtree that can
//! hold all of them such that every link below the subtree root carries at least
//! `min(k, n - k) * bw`, where `k` is the number of units below the link.

use fnv::FnvHashMap as HashMap;

use crate::bandwidth::{self, Bandwidth};
use crate::cluster::{Cluster, Level, LinkIx, NodeIx};
use crate::ledger::{Ledger, Role};
use crate::request::{RejectionReason, Request};
use crate::subtree::{switches_at_level, SubTree};
use crate::Error;

/// Bandwidth a link must carry with `below` of the `n` units on one side of it.
#[inline]
pub fn hose_bound(below: usize, n: usize, bw: Bandwidth) -> Bandwidth {
    debug_assert!(below <= n);
    bw * below.min(n - below)
}

/// A placement computed against a ledger but not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryPlacement {
    pub root: NodeIx,
    /// host and the number of units placed on it
    pub hosts: Vec<(NodeIx, usize)>,
    /// link and the hose bandwidth reserved on it, zero entries omitted
    pub links: Vec<(LinkIx, Bandwidth)>,
}

/// Find a placement for `n` units of `bw`, searching rack subtrees first and moving up
/// one level at a time. Candidate subtrees at a level are tried in ascending order of
/// the residual bandwidth on their uplink.
pub fn place(
    cluster: &Cluster,
    ledger: &Ledger,
    n: usize,
    bw: Bandwidth,
) -> Result<PrimaryPlacement, RejectionReason> {
    if n == 0 {
        return Err(RejectionReason::PrimaryEmbeddingFailed);
    }

    let mut slots_found = false;
    let mut level = Level::Rack;
    loop {
        let mut candidates: Vec<SubTree> = switches_at_level(cluster, level)
            .iter()
            .map(|&s| SubTree::build(cluster, s))
            .filter(|st| st.available_units(ledger) >= n)
            .collect();

        if !candidates.is_empty() {
            slots_found = true;
        }

        candidates.sort_by_key(|st| {
            st.uplink()
                .map(|l| ledger.residual(l))
                .unwrap_or(bandwidth::MAX)
        });

        for st in &candidates {
            if let Some(placement) = HoseSearch::new(cluster, ledger, st.root(), n, bw).run() {
                log::debug!(
                    "primary placement of {} x {} under {}: {:?}",
                    n,
                    bw,
                    cluster[st.root()],
                    placement.hosts
                );
                return Ok(placement);
            }
        }

        match level.up() {
            Some(l) => level = l,
            None => break,
        }
    }

    if slots_found {
        Err(RejectionReason::PrimaryBandwidthFailed)
    } else {
        Err(RejectionReason::PrimaryEmbeddingFailed)
    }
}

/// Reserve the units and link bandwidth of `placement` for `req`.
pub fn commit(
    ledger: &mut Ledger,
    req: &mut Request,
    placement: &PrimaryPlacement,
) -> Result<(), Error> {
    for &(host, k) in &placement.hosts {
        for _ in 0..k {
            let unit = ledger
                .reserve_unit(host, req.id, Role::Primary)
                .ok_or_else(|| Error::Invariant(format!("host {:?} ran out of units", host)))?;
            req.primaries.push(unit);
        }
    }

    for &(link, bw) in &placement.links {
        ledger.reserve_bandwidth(link, req.id, bw, Bandwidth::zero())?;
    }

    req.subtree = Some(placement.root);
    Ok(())
}

/// Undo [`commit`]. Backups must have been released before.
pub fn release(cluster: &Cluster, ledger: &mut Ledger, req: &mut Request) {
    for unit in req.primaries.drain(..) {
        ledger.release_unit(unit);
    }
    if let Some(root) = req.subtree.take() {
        for &link in SubTree::build(cluster, root).links() {
            ledger.release_bandwidth(link, req.id);
        }
    }
}

/// Exact search of the unit counts a subtree can host.
///
/// For every node, `feasible[node][k]` tells whether exactly `k` units can be placed
/// below it with every link on the way satisfying the hose bound, including the
/// node's own uplink unless it is the search root.
struct HoseSearch<'a> {
    cluster: &'a Cluster,
    ledger: &'a Ledger,
    root: NodeIx,
    n: usize,
    bw: Bandwidth,
    feasible: HashMap<NodeIx, Vec<bool>>,
}

impl<'a> HoseSearch<'a> {
    fn new(cluster: &'a Cluster, ledger: &'a Ledger, root: NodeIx, n: usize, bw: Bandwidth) -> Self {
        HoseSearch {
            cluster,
            ledger,
            root,
            n,
            bw,
            feasible: HashMap::default(),
        }
    }

    fn run(mut self) -> Option<PrimaryPlacement> {
        let root_counts = self.counts(self.root);
        if !root_counts[self.n] {
            return None;
        }

        let mut hosts = Vec::new();
        let mut below = Vec::new();
        self.assign(self.root, self.n, &mut hosts, &mut below)?;

        // bounds use the final count below every link
        let links = below
            .into_iter()
            .filter(|&(node, _)| node != self.root)
            .filter_map(|(node, k)| {
                let up = self.cluster.get_uplink(node)?;
                let bw = hose_bound(k, self.n, self.bw);
                if bw.is_zero() {
                    None
                } else {
                    Some((up, bw))
                }
            })
            .collect();

        Some(PrimaryPlacement {
            root: self.root,
            hosts,
            links,
        })
    }

    fn children(&self, node: NodeIx) -> Vec<NodeIx> {
        self.cluster
            .get_downlinks(node)
            .map(|&l| self.cluster.get_source(l))
            .collect()
    }

    fn counts(&mut self, node: NodeIx) -> Vec<bool> {
        let n = self.n;
        let mut f = if self.cluster[node].is_host() {
            let free = self.ledger.free_units(node);
            (0..=n).map(|k| k <= free).collect::<Vec<_>>()
        } else {
            let mut acc = vec![false; n + 1];
            acc[0] = true;
            for c in self.children(node) {
                let fc = self.counts(c);
                acc = sumset(&acc, &fc, n);
            }
            acc
        };

        if node != self.root {
            if let Some(up) = self.cluster.get_uplink(node) {
                let residual = self.ledger.residual(up);
                for (k, ok) in f.iter_mut().enumerate() {
                    if *ok && hose_bound(k, n, self.bw) > residual {
                        *ok = false;
                    }
                }
            }
        }

        self.feasible.insert(node, f.clone());
        f
    }

    /// Split `target` units among the children of `node`, spreading them as evenly as
    /// the feasible counts allow.
    fn assign(
        &self,
        node: NodeIx,
        target: usize,
        hosts: &mut Vec<(NodeIx, usize)>,
        below: &mut Vec<(NodeIx, usize)>,
    ) -> Option<()> {
        below.push((node, target));
        if self.cluster[node].is_host() {
            if target > 0 {
                hosts.push((node, target));
            }
            return Some(());
        }

        let n = self.n;
        let children = self.children(node);
        let m = children.len();
        let mut suffix = vec![vec![false; n + 1]; m + 1];
        suffix[m][0] = true;
        for i in (0..m).rev() {
            suffix[i] = sumset(&suffix[i + 1], self.feasible.get(&children[i])?, n);
        }

        let mut remaining = target;
        for (i, &c) in children.iter().enumerate() {
            let left = m - i;
            let ideal = (remaining + left - 1) / left;
            let fc = self.feasible.get(&c)?;
            let k = (0..=remaining)
                .filter(|&k| fc[k] && suffix[i + 1][remaining - k])
                .min_by_key(|&k| (abs_diff(k, ideal), std::cmp::Reverse(k)))?;
            if k > 0 {
                self.assign(c, k, hosts, below)?;
            }
            remaining -= k;
        }

        if remaining == 0 {
            Some(())
        } else {
            None
        }
    }
}

#[inline]
fn abs_diff(a: usize, b: usize) -> usize {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// `{i + j | a[i] && b[j]}` truncated at `n`.
fn sumset(a: &[bool], b: &[bool], n: usize) -> Vec<bool> {
    let mut out = vec![false; n + 1];
    for (i, &x) in a.iter().enumerate() {
        if !x {
            continue;
        }
        for (j, &y) in b.iter().enumerate().take(n + 1 - i.min(n)) {
            if y && i + j <= n {
                out[i + j] = true;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::{build_tree, TopoArgs};
    use crate::bandwidth::BandwidthTrait;

    fn small(slots: usize, host_bw: f64) -> Cluster {
        build_tree(&TopoArgs {
            naggs: 1,
            nracks: 2,
            nhosts: 4,
            slots,
            host_bw,
            rack_bw: 100.0,
            agg_bw: 100.0,
        })
        .unwrap()
    }

    #[test]
    fn hose_bound_takes_the_minority_side() {
        assert_eq!(hose_bound(0, 3, 10.mbps()), 0.mbps());
        assert_eq!(hose_bound(1, 3, 10.mbps()), 10.mbps());
        assert_eq!(hose_bound(2, 3, 10.mbps()), 10.mbps());
        assert_eq!(hose_bound(3, 3, 10.mbps()), 0.mbps());
        assert_eq!(hose_bound(3, 8, 10.mbps()), 30.mbps());
    }

    #[test]
    fn sumset_truncates() {
        let a = vec![true, true, false];
        let b = vec![false, true, true];
        assert_eq!(sumset(&a, &b, 2), vec![false, true, true]);
    }

    #[test]
    fn spread_inside_one_rack() {
        let cluster = small(2, 100.0);
        let ledger = Ledger::new(&cluster);
        let p = place(&cluster, &ledger, 3, 10.mbps()).unwrap();
        assert_eq!(cluster[p.root].name, "tor_0");
        assert_eq!(p.hosts.iter().map(|&(_, k)| k).sum::<usize>(), 3);
        assert!(p.hosts.iter().all(|&(_, k)| k == 1));
        assert_eq!(p.links.len(), 3);
        assert!(p.links.iter().all(|&(_, bw)| bw == 10.mbps()));
    }

    #[test]
    fn escalate_to_the_aggregation_level() {
        let cluster = small(2, 100.0);
        let ledger = Ledger::new(&cluster);
        let p = place(&cluster, &ledger, 10, 10.mbps()).unwrap();
        assert_eq!(cluster[p.root].level, Level::Aggregation);

        let mut per_rack: HashMap<NodeIx, usize> = HashMap::default();
        for &(h, k) in &p.hosts {
            *per_rack.entry(cluster.get_parent(h).unwrap()).or_default() += k;
        }
        let counts: Vec<usize> = per_rack.values().cloned().collect();
        assert_eq!(counts, vec![5, 5]);

        // the rack uplinks carry min(k, n - k) * B
        let tor_links: Vec<_> = p
            .links
            .iter()
            .filter(|&&(l, _)| cluster[cluster.get_source(l)].level == Level::Rack)
            .collect();
        assert_eq!(tor_links.len(), 2);
        assert!(tor_links.iter().all(|&&(_, bw)| bw == 50.mbps()));
    }

    #[test]
    fn not_enough_slots() {
        let cluster = small(2, 100.0);
        let ledger = Ledger::new(&cluster);
        assert_eq!(
            place(&cluster, &ledger, 17, 1.mbps()),
            Err(RejectionReason::PrimaryEmbeddingFailed)
        );
        assert_eq!(
            place(&cluster, &ledger, 0, 1.mbps()),
            Err(RejectionReason::PrimaryEmbeddingFailed)
        );
    }

    #[test]
    fn not_enough_bandwidth() {
        // every host link carries less than one unit's worth of bandwidth
        let cluster = small(2, 5.0);
        let ledger = Ledger::new(&cluster);
        assert_eq!(
            place(&cluster, &ledger, 3, 10.mbps()),
            Err(RejectionReason::PrimaryBandwidthFailed)
        );
    }

    #[test]
    fn single_host_needs_no_bandwidth() {
        let cluster = small(4, 5.0);
        let ledger = Ledger::new(&cluster);
        let p = place(&cluster, &ledger, 3, 10.mbps()).unwrap();
        assert_eq!(p.hosts.len(), 1);
        assert_eq!(p.hosts[0].1, 3);
        assert!(p.links.is_empty());
    }

    #[test]
    fn prefer_the_rack_with_less_residual() {
        let cluster = small(2, 100.0);
        let mut ledger = Ledger::new(&cluster);
        let tor1 = cluster.node_index("tor_1").unwrap();
        let up = cluster.get_uplink(tor1).unwrap();
        ledger.reserve_bandwidth(up, 99, 50.mbps(), 0.mbps()).unwrap();

        let p = place(&cluster, &ledger, 2, 10.mbps()).unwrap();
        assert_eq!(p.root, tor1);
    }

    #[test]
    fn commit_then_release() {
        let cluster = small(2, 100.0);
        let mut ledger = Ledger::new(&cluster);
        let snapshot = ledger.clone();

        let mut req = Request::new(1, 5, 10.mbps());
        let p = place(&cluster, &ledger, req.n, req.bw).unwrap();
        commit(&mut ledger, &mut req, &p).unwrap();
        assert_eq!(req.primaries.len(), 5);
        assert_eq!(req.subtree, Some(p.root));
        ledger.check_invariants(&cluster).unwrap();
        for &(l, bw) in &p.links {
            assert_eq!(ledger.reservation(l, 1).unwrap().primary, bw);
        }

        release(&cluster, &mut ledger, &mut req);
        assert!(req.primaries.is_empty());
        assert_eq!(ledger, snapshot);
    }
}
