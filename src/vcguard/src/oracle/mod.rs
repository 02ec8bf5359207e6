//! Solvers for the two optimization steps of the engine: mapping backups to primaries
//! with the bandwidth that mapping needs, and packing requests into sharing sets.
//!
//! `None` is always a legal answer and means infeasible.

use serde::{Deserialize, Serialize};

use crate::mapping::{MappingProblem, MappingSolution};
use crate::sharing::{Packing, PackingProblem};

pub mod heuristic;
pub use heuristic::HeuristicOracle;

pub mod exact;
pub use exact::ExactOracle;

#[cfg(feature = "lp")]
pub mod lp;
#[cfg(feature = "lp")]
pub use lp::LpOracle;

pub trait Oracle: std::fmt::Debug {
    fn map_backups(&mut self, problem: &MappingProblem<'_>) -> Option<MappingSolution>;

    fn pack_sets(&mut self, problem: &PackingProblem) -> Option<Packing>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum OracleKind {
    Heuristic,
    /// branch-and-bound limited to `budget` search nodes per call
    Exact { budget: usize },
    #[cfg(feature = "lp")]
    Lp,
}

impl Default for OracleKind {
    fn default() -> Self {
        OracleKind::Heuristic
    }
}

impl std::fmt::Display for OracleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleKind::Heuristic => write!(f, "heuristic"),
            OracleKind::Exact { budget } => write!(f, "exact({})", budget),
            #[cfg(feature = "lp")]
            OracleKind::Lp => write!(f, "lp"),
        }
    }
}

pub fn build_oracle(kind: OracleKind) -> Box<dyn Oracle> {
    match kind {
        OracleKind::Heuristic => Box::new(HeuristicOracle::default()),
        OracleKind::Exact { budget } => Box::new(ExactOracle::new(budget)),
        #[cfg(feature = "lp")]
        OracleKind::Lp => Box::new(LpOracle::default()),
    }
}
