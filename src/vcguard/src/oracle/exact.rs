use indexmap::IndexMap;

use crate::bandwidth::Bandwidth;
use crate::cluster::NodeIx;
use crate::ledger::UnitId;
use crate::mapping::{MappingProblem, MappingSolution};
use crate::oracle::{HeuristicOracle, Oracle};
use crate::sharing::{greedy_packing, Packing, PackingProblem};

/// Depth-first branch-and-bound for both problems, seeded with the greedy answer.
///
/// Each call may visit at most `budget` search nodes. When the budget runs out, the best
/// answer found so far is returned.
#[derive(Debug, Clone)]
pub struct ExactOracle {
    budget: usize,
    visited: usize,
}

impl ExactOracle {
    pub fn new(budget: usize) -> Self {
        ExactOracle { budget, visited: 0 }
    }

    fn start(&mut self) {
        self.visited = 0;
    }

    /// Count one search node, false once the budget is spent.
    #[inline]
    fn visit(&mut self) -> bool {
        self.visited += 1;
        self.visited <= self.budget
    }

    fn exhausted(&self) -> bool {
        self.visited > self.budget
    }
}

/// Backups placed in the scope, grouped by host.
type Groups = IndexMap<NodeIx, Vec<UnitId>>;

/// All ways to take `need` units from the groups other than `failed`. Backups on the
/// same host are interchangeable, so only the count per host matters.
fn distributions(groups: &Groups, failed: NodeIx, need: usize) -> Vec<Vec<UnitId>> {
    fn rec(
        hosts: &[&Vec<UnitId>],
        need: usize,
        cur: &mut Vec<UnitId>,
        out: &mut Vec<Vec<UnitId>>,
    ) {
        if need == 0 {
            out.push(cur.clone());
            return;
        }
        let (first, rest) = match hosts.split_first() {
            Some(x) => x,
            None => return,
        };
        let avail: usize = rest.iter().map(|g| g.len()).sum();
        for take in (0..=need.min(first.len())).rev() {
            if need - take > avail {
                continue;
            }
            cur.extend_from_slice(&first[..take]);
            rec(rest, need - take, cur, out);
            cur.truncate(cur.len() - take);
        }
    }

    let hosts: Vec<&Vec<UnitId>> = groups
        .iter()
        .filter(|(h, _)| **h != failed)
        .map(|(_, units)| units)
        .collect();
    let mut out = Vec::new();
    rec(&hosts, need, &mut Vec::new(), &mut out);
    out
}

struct MappingSearch<'p, 'a> {
    problem: &'p MappingProblem<'a>,
    /// candidate choices for every hosting host, with the per-link demand of each
    options: Vec<Vec<(Vec<UnitId>, Vec<Bandwidth>)>>,
    best: Option<(Bandwidth, Vec<Vec<UnitId>>)>,
}

impl<'p, 'a> MappingSearch<'p, 'a> {
    fn run(
        &mut self,
        oracle: &mut ExactOracle,
        i: usize,
        worst: &[Bandwidth],
        picked: &mut Vec<usize>,
    ) {
        if !oracle.visit() {
            return;
        }
        let bound: Bandwidth = worst.iter().sum();
        if let Some((best, _)) = &self.best {
            if bound >= *best {
                return;
            }
        }
        if i == self.options.len() {
            let choice = picked
                .iter()
                .enumerate()
                .map(|(h, &k)| self.options[h][k].0.clone())
                .collect();
            self.best = Some((bound, choice));
            return;
        }

        for k in 0..self.options[i].len() {
            let next: Vec<Bandwidth> = worst
                .iter()
                .zip(&self.options[i][k].1)
                .map(|(&w, &d)| std::cmp::max(w, d))
                .collect();
            let fits = self
                .problem
                .links
                .iter()
                .zip(&next)
                .all(|(lb, &w)| w <= lb.residual);
            if !fits {
                continue;
            }
            picked.push(k);
            self.run(oracle, i + 1, &next, picked);
            picked.pop();
            if oracle.exhausted() {
                return;
            }
        }
    }
}

impl Oracle for ExactOracle {
    fn map_backups(&mut self, problem: &MappingProblem<'_>) -> Option<MappingSolution> {
        self.start();

        let mut groups = Groups::new();
        for &b in &problem.backups {
            groups.entry(b.host).or_default().push(b);
        }

        let options: Vec<Vec<(Vec<UnitId>, Vec<Bandwidth>)>> = problem
            .hosting
            .iter()
            .map(|(failed, primaries)| {
                distributions(&groups, *failed, primaries.len())
                    .into_iter()
                    .map(|chosen| {
                        let demand = problem.failure_demand(*failed, &chosen);
                        (chosen, demand)
                    })
                    .collect()
            })
            .collect();
        if options.iter().any(|o| o.is_empty()) {
            return None;
        }

        let seed = HeuristicOracle.map_backups(problem);
        let mut search = MappingSearch {
            problem,
            options,
            best: seed.as_ref().map(|s| {
                let choice = problem
                    .hosting
                    .iter()
                    .map(|(h, _)| {
                        s.assignment
                            .iter()
                            .filter(|(p, _)| p.host == *h)
                            .map(|&(_, b)| b)
                            .collect()
                    })
                    .collect();
                (s.objective, choice)
            }),
        };
        let zero = vec![Bandwidth::zero(); problem.links.len()];
        search.run(self, 0, &zero, &mut Vec::new());

        if self.exhausted() {
            log::warn!(
                "mapping search ran out of budget after {} nodes, keeping the best found",
                self.budget
            );
        }

        let (_, choice) = search.best?;
        let choice: Vec<(NodeIx, Vec<UnitId>)> = problem
            .hosting
            .iter()
            .map(|(h, _)| *h)
            .zip(choice)
            .collect();
        problem.assemble(&choice)
    }

    fn pack_sets(&mut self, problem: &PackingProblem) -> Option<Packing> {
        self.start();
        let order = problem.order();
        let seed = greedy_packing(problem);

        let mut search = PackingSearch {
            problem,
            order,
            best_total: seed.total(),
            best: seed.sets,
            sets: Vec::new(),
        };
        search.run(self, 0, Bandwidth::zero());

        if self.exhausted() {
            log::warn!(
                "packing search ran out of budget after {} nodes, keeping the best found",
                self.budget
            );
        }

        let reserved = search
            .best
            .iter()
            .map(|s| s.iter().map(|&i| problem.demands[i]).max().unwrap_or_default())
            .collect();
        Some(Packing {
            sets: search.best,
            reserved,
        })
    }
}

/// Items are visited by descending demand, so a set always costs the demand of the item
/// that opened it.
struct PackingSearch<'p> {
    problem: &'p PackingProblem,
    order: Vec<usize>,
    best_total: Bandwidth,
    best: Vec<Vec<usize>>,
    sets: Vec<Vec<usize>>,
}

impl<'p> PackingSearch<'p> {
    fn run(&mut self, oracle: &mut ExactOracle, pos: usize, cost: Bandwidth) {
        if !oracle.visit() || cost >= self.best_total {
            return;
        }
        if pos == self.order.len() {
            self.best_total = cost;
            self.best = self.sets.clone();
            return;
        }

        let item = self.order[pos];
        for s in 0..self.sets.len() {
            if self.problem.compatible(&self.sets[s], item) {
                self.sets[s].push(item);
                self.run(oracle, pos + 1, cost);
                self.sets[s].pop();
                if oracle.exhausted() {
                    return;
                }
            }
        }

        self.sets.push(vec![item]);
        self.run(oracle, pos + 1, cost + self.problem.demands[item]);
        self.sets.pop();
    }
}
