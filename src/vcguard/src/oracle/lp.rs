use crate::mapping::{MappingProblem, MappingSolution};
use crate::oracle::{ExactOracle, Oracle};
use crate::sharing::{Packing, PackingProblem};

const MAPPING_BUDGET: usize = 100_000;

/// Set packing as a 0/1 integer program solved by lp_solve. Mapping is left to
/// [`ExactOracle`].
///
/// With items sorted by descending demand, `x[i][s]` (for `s <= i`) tells whether item `i`
/// joins the set opened by item `s`, and `x[s][s]` whether `s` opens a set at all:
///
/// ```text
/// minimize    sum_s demand[s] * x[s][s]
/// subject to  sum_{s <= i} x[i][s] = 1           for every i
///             x[i][s] <= x[s][s]                  for every s < i
///             x[i][s] + x[j][s] <= 1              for every conflicting i, j >= s
/// ```
#[derive(Debug, Clone)]
pub struct LpOracle {
    exact: ExactOracle,
}

impl Default for LpOracle {
    fn default() -> Self {
        LpOracle {
            exact: ExactOracle::new(MAPPING_BUDGET),
        }
    }
}

impl Oracle for LpOracle {
    fn map_backups(&mut self, problem: &MappingProblem<'_>) -> Option<MappingSolution> {
        self.exact.map_backups(problem)
    }

    fn pack_sets(&mut self, problem: &PackingProblem) -> Option<Packing> {
        let order = problem.order();
        let n = order.len();
        if n == 0 {
            return Some(Packing {
                sets: Vec::new(),
                reserved: Vec::new(),
            });
        }

        // column of x[i][s], positions in `order`, 1-based as lp_solve wants
        let col = |i: usize, s: usize| i * (i + 1) / 2 + s + 1;
        let ncols = n * (n + 1) / 2;

        let mut lp = lpsolve::Problem::new(0, ncols as i32)?;
        unsafe {
            lpsolve_sys::set_verbose(lp.to_lprec(), lpsolve::Verbosity::Critical as i32);
            for c in 1..=ncols {
                lpsolve_sys::set_binary(lp.to_lprec(), c as i32, 1);
            }
        }

        let mut obj_func = vec![0.; ncols + 1];
        for s in 0..n {
            obj_func[col(s, s)] = problem.demands[order[s]].as_mbps_f64();
        }
        lp.set_objective_function(&obj_func);

        for i in 0..n {
            let mut constraint = vec![0.; ncols + 1];
            for s in 0..=i {
                constraint[col(i, s)] = 1.;
            }
            lp.add_constraint(&constraint, 1., lpsolve::ConstraintType::Eq);
        }

        for i in 0..n {
            for s in 0..i {
                let mut constraint = vec![0.; ncols + 1];
                constraint[col(i, s)] = 1.;
                constraint[col(s, s)] = -1.;
                lp.add_constraint(&constraint, 0., lpsolve::ConstraintType::Le);
            }
        }

        for i in 0..n {
            for j in i + 1..n {
                if !problem.conflicts[order[i]][order[j]] {
                    continue;
                }
                for s in 0..=i {
                    let mut constraint = vec![0.; ncols + 1];
                    constraint[col(i, s)] = 1.;
                    constraint[col(j, s)] = 1.;
                    lp.add_constraint(&constraint, 1., lpsolve::ConstraintType::Le);
                }
            }
        }

        let status = lp.solve();
        log::debug!("set packing on link {:?}: {:?}", problem.link, status);
        match status {
            lpsolve::SolveStatus::Optimal | lpsolve::SolveStatus::Suboptimal => {}
            _ => return None,
        }

        let mut x = vec![0.; ncols];
        lp.get_solution_variables(&mut x);
        let taken = |i: usize, s: usize| x[col(i, s) - 1] > 0.5;

        let mut sets = Vec::new();
        let mut reserved = Vec::new();
        for s in 0..n {
            if !taken(s, s) {
                continue;
            }
            let set: Vec<usize> = (s..n).filter(|&i| taken(i, s)).map(|i| order[i]).collect();
            reserved.push(problem.demands[order[s]]);
            sets.push(set);
        }

        Some(Packing { sets, reserved })
    }
}
