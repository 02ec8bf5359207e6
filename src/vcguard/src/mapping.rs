//! The backup bandwidth mapping problem.
//!
//! Once backups are placed, every primary gets a backup that takes over when the
//! primary's host fails. For the worst single host failure, each link in the scope must
//! carry the hose bound of the units serving the tenant after the failover; whatever
//! primary bandwidth the tenant already holds on the link is reused.

use crate::bandwidth::Bandwidth;
use crate::cluster::{Cluster, LinkIx, NodeIx};
use crate::ledger::{Ledger, UnitId};
use crate::primary::hose_bound;
use crate::request::Request;
use crate::subtree::SubTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkBudget {
    pub link: LinkIx,
    /// primary bandwidth the tenant already holds on the link
    pub primary: Bandwidth,
    pub residual: Bandwidth,
}

#[derive(Debug, Clone)]
pub struct MappingProblem<'a> {
    pub cluster: &'a Cluster,
    pub n: usize,
    pub bw: Bandwidth,
    /// primaries grouped by host
    pub hosting: Vec<(NodeIx, Vec<UnitId>)>,
    pub backups: Vec<UnitId>,
    pub links: Vec<LinkBudget>,
}

/// Output of the mapping oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingSolution {
    /// primary unit -> backup unit
    pub assignment: Vec<(UnitId, UnitId)>,
    /// extra backup bandwidth to reserve per link, zero entries omitted
    pub demands: Vec<(LinkIx, Bandwidth)>,
    /// total backup bandwidth
    pub objective: Bandwidth,
}

impl<'a> MappingProblem<'a> {
    /// Build the problem for `req` with `backups` placed inside `scope`.
    pub fn new(
        cluster: &'a Cluster,
        ledger: &Ledger,
        req: &Request,
        scope: &SubTree,
        backups: &[UnitId],
    ) -> Self {
        let hosting = req.primaries_per_host().into_iter().collect();
        let links = scope
            .links()
            .iter()
            .map(|&link| LinkBudget {
                link,
                primary: ledger
                    .reservation(link, req.id)
                    .map(|r| r.primary)
                    .unwrap_or_default(),
                residual: ledger.residual(link),
            })
            .collect();
        MappingProblem {
            cluster,
            n: req.n,
            bw: req.bw,
            hosting,
            backups: backups.to_vec(),
            links,
        }
    }

    /// Backups allowed to take over the primaries of `failed`.
    pub fn eligible(&self, failed: NodeIx) -> Vec<UnitId> {
        self.backups
            .iter()
            .copied()
            .filter(|b| b.host != failed)
            .collect()
    }

    /// Extra bandwidth every link needs when `failed` goes down and `chosen` take over,
    /// in the order of `self.links`.
    pub fn failure_demand(&self, failed: NodeIx, chosen: &[UnitId]) -> Vec<Bandwidth> {
        let mut active: Vec<(NodeIx, usize)> = self
            .hosting
            .iter()
            .filter(|(h, _)| *h != failed)
            .map(|(h, units)| (*h, units.len()))
            .collect();
        active.extend(chosen.iter().map(|b| (b.host, 1)));

        self.links
            .iter()
            .map(|lb| {
                let inside: usize = active
                    .iter()
                    .filter(|(h, _)| self.cluster.is_under(*h, lb.link))
                    .map(|(_, k)| k)
                    .sum();
                hose_bound(inside, self.n, self.bw).saturating_sub(lb.primary)
            })
            .collect()
    }

    /// Combine one choice of backups per hosting host into a solution, `None` if some
    /// link cannot carry the worst case.
    pub fn assemble(&self, choice: &[(NodeIx, Vec<UnitId>)]) -> Option<MappingSolution> {
        let mut worst = vec![Bandwidth::zero(); self.links.len()];
        let mut assignment = Vec::new();
        for (failed, chosen) in choice {
            let demand = self.failure_demand(*failed, chosen);
            for (w, d) in worst.iter_mut().zip(demand) {
                *w = std::cmp::max(*w, d);
            }
            let primaries = self
                .hosting
                .iter()
                .find(|(h, _)| h == failed)
                .map(|(_, units)| units.as_slice())
                .unwrap_or(&[]);
            if primaries.len() != chosen.len() {
                return None;
            }
            assignment.extend(primaries.iter().copied().zip(chosen.iter().copied()));
        }

        if self
            .links
            .iter()
            .zip(&worst)
            .any(|(lb, &w)| w > lb.residual)
        {
            return None;
        }

        let demands: Vec<(LinkIx, Bandwidth)> = self
            .links
            .iter()
            .zip(worst)
            .filter(|(_, w)| !w.is_zero())
            .map(|(lb, w)| (lb.link, w))
            .collect();
        let objective = demands.iter().map(|&(_, w)| w).sum();

        Some(MappingSolution {
            assignment,
            demands,
            objective,
        })
    }

    /// Whether `solution` maps every primary to a backup off its own host.
    pub fn is_valid(&self, solution: &MappingSolution) -> bool {
        let total: usize = self.hosting.iter().map(|(_, u)| u.len()).sum();
        solution.assignment.len() == total
            && solution
                .assignment
                .iter()
                .all(|(p, b)| p.host != b.host && self.backups.contains(b))
            && self.hosting.iter().all(|(h, units)| {
                let mut used: Vec<UnitId> = solution
                    .assignment
                    .iter()
                    .filter(|(p, _)| p.host == *h)
                    .map(|&(_, b)| b)
                    .collect();
                used.sort();
                used.dedup();
                used.len() == units.len()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::{build_tree, TopoArgs};
    use crate::bandwidth::BandwidthTrait;

    fn unit(cluster: &Cluster, host: &str, slot: usize) -> UnitId {
        UnitId {
            host: cluster.node_index(host).unwrap(),
            slot,
        }
    }

    #[test]
    fn demand_of_a_failover_inside_one_rack() {
        let cluster = build_tree(&TopoArgs::default()).unwrap();
        let mut ledger = Ledger::new(&cluster);
        let mut req = Request::new(1, 2, 10.mbps());
        let p0 = ledger
            .reserve_unit(cluster.node_index("host_0").unwrap(), 1, crate::ledger::Role::Primary)
            .unwrap();
        let p1 = ledger
            .reserve_unit(cluster.node_index("host_1").unwrap(), 1, crate::ledger::Role::Primary)
            .unwrap();
        req.primaries = vec![p0, p1];
        for h in &["host_0", "host_1"] {
            let l = cluster.get_uplink(cluster.node_index(h).unwrap()).unwrap();
            ledger.reserve_bandwidth(l, 1, 10.mbps(), 0.mbps()).unwrap();
        }

        let scope = SubTree::build(&cluster, cluster.node_index("tor_0").unwrap());
        let b = unit(&cluster, "host_2", 0);
        let problem = MappingProblem::new(&cluster, &ledger, &req, &scope, &[b]);
        assert_eq!(problem.eligible(p0.host), vec![b]);

        // host_0 fails: host_1 and host_2 talk, host_2's uplink needs 10, host_1 reuses
        let sol = problem
            .assemble(&[(p0.host, vec![b]), (p1.host, vec![b])])
            .unwrap();
        assert!(problem.is_valid(&sol));
        let host2_up = cluster.get_uplink(b.host).unwrap();
        assert_eq!(sol.demands, vec![(host2_up, 10.mbps())]);
        assert_eq!(sol.objective, 10.mbps());
    }

    #[test]
    fn reject_when_a_link_is_too_thin() {
        let cluster = build_tree(&TopoArgs {
            host_bw: 5.0,
            ..Default::default()
        })
        .unwrap();
        let ledger = Ledger::new(&cluster);
        let mut req = Request::new(1, 2, 10.mbps());
        req.primaries = vec![unit(&cluster, "host_0", 0), unit(&cluster, "host_0", 1)];
        let scope = SubTree::build(&cluster, cluster.node_index("tor_0").unwrap());
        let backups = vec![unit(&cluster, "host_1", 0), unit(&cluster, "host_1", 1)];
        let problem = MappingProblem::new(&cluster, &ledger, &req, &scope, &backups);
        // both backups on one host need no bandwidth
        let sol = problem
            .assemble(&[(req.primaries[0].host, backups.clone())])
            .unwrap();
        assert!(sol.demands.is_empty());

        let split = vec![unit(&cluster, "host_1", 0), unit(&cluster, "host_2", 0)];
        let problem = MappingProblem::new(&cluster, &ledger, &req, &scope, &split);
        assert!(problem.assemble(&[(req.primaries[0].host, split.clone())]).is_none());
    }
}
