use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bandwidth::Bandwidth;
use crate::cluster::Cluster;
use crate::ledger::Ledger;
use crate::request::{RejectionReason, Request};
use crate::RequestId;

/// A read-only summary of the admission outcomes and of the bandwidth currently held.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub arrived: usize,
    pub admitted: usize,
    pub rejected: BTreeMap<RejectionReason, usize>,
    /// admitted and not yet departed
    pub active: usize,
    pub reserved_primary: Bandwidth,
    pub reserved_backup: Bandwidth,
    /// backup demand covered by sharing sets instead of individual reservations
    pub saved_by_sharing: Bandwidth,
}

impl Stats {
    pub fn collect(
        cluster: &Cluster,
        ledger: &Ledger,
        requests: &IndexMap<RequestId, Request>,
    ) -> Stats {
        let mut stats = Stats {
            arrived: requests.len(),
            ..Default::default()
        };

        for req in requests.values() {
            if req.admitted {
                stats.admitted += 1;
            }
            if req.active {
                stats.active += 1;
            }
            if let Some(reason) = req.rejection {
                *stats.rejected.entry(reason).or_insert(0) += 1;
            }
        }

        for l in cluster.all_links() {
            for r in ledger.link(l).reservations.values() {
                stats.reserved_primary += r.primary;
                stats.reserved_backup += r.backup;
                stats.saved_by_sharing += r.shared;
            }
        }

        stats
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    pub fn rejection_rate(&self) -> f64 {
        if self.arrived == 0 {
            0.0
        } else {
            self.rejected_total() as f64 / self.arrived as f64
        }
    }
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "arrived: {}, admitted: {}, active: {}, rejection rate: {:.3}",
            self.arrived,
            self.admitted,
            self.active,
            self.rejection_rate()
        )?;
        for (reason, count) in &self.rejected {
            write!(f, ", {}: {}", reason, count)?;
        }
        write!(
            f,
            ", primary: {}, backup: {}, saved by sharing: {}",
            self.reserved_primary, self.reserved_backup, self.saved_by_sharing
        )
    }
}
