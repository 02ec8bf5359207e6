use crate::cluster::NodeIx;
use crate::ledger::UnitId;
use crate::mapping::{MappingProblem, MappingSolution};
use crate::oracle::Oracle;
use crate::sharing::{greedy_packing, Packing, PackingProblem};

/// Greedy answers for both problems.
///
/// Mapping: the primaries of a failed host are taken over by the backups closest to it
/// in the tree, preferring hosts that already run primaries of the tenant, so that the
/// failover traffic stays below as few links as possible.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicOracle;

impl HeuristicOracle {
    pub(crate) fn choose(problem: &MappingProblem<'_>) -> Option<Vec<(NodeIx, Vec<UnitId>)>> {
        let mut choice = Vec::with_capacity(problem.hosting.len());
        for (failed, primaries) in &problem.hosting {
            let mut eligible = problem.eligible(*failed);
            if eligible.len() < primaries.len() {
                return None;
            }
            eligible.sort_by_key(|b| {
                let hosting = problem.hosting.iter().any(|(h, _)| *h == b.host);
                (
                    problem.cluster.lca_level(*failed, b.host),
                    !hosting,
                    b.host,
                    b.slot,
                )
            });
            eligible.truncate(primaries.len());
            choice.push((*failed, eligible));
        }
        Some(choice)
    }
}

impl Oracle for HeuristicOracle {
    fn map_backups(&mut self, problem: &MappingProblem<'_>) -> Option<MappingSolution> {
        let choice = Self::choose(problem)?;
        problem.assemble(&choice)
    }

    fn pack_sets(&mut self, problem: &PackingProblem) -> Option<Packing> {
        Some(greedy_packing(problem))
    }
}
