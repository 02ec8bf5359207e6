use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bandwidth::Bandwidth;
use crate::cluster::{LinkIx, NodeIx};
use crate::ledger::UnitId;
use crate::{RequestId, Timestamp};

/// Why a request was turned down. None of these is fatal: the engine always rolls
/// back to the state before the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    /// no subtree has enough free compute units
    PrimaryEmbeddingFailed,
    /// enough units exist but the hose bandwidth bound cannot be met
    PrimaryBandwidthFailed,
    /// no scope has room for the backup units
    BackupEmbeddingFailed,
    /// backups were placed but the bandwidth to activate them is not available
    BackupMappingBandwidthFailed,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use RejectionReason::*;
        let s = match self {
            PrimaryEmbeddingFailed => "primary embedding failed",
            PrimaryBandwidthFailed => "primary bandwidth failed",
            BackupEmbeddingFailed => "backup embedding failed",
            BackupMappingBandwidthFailed => "backup mapping bandwidth failed",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of what a request holds on one link, kept for audit after release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub link: LinkIx,
    pub primary: Bandwidth,
    pub backup: Bandwidth,
    pub shared: Bandwidth,
}

/// A tenant asking for `n` compute units, each guaranteed `bw` in the hose model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub n: usize,
    pub bw: Bandwidth,
    pub admitted: bool,
    pub protected: bool,
    /// false once the request departed or was rejected
    pub active: bool,
    pub rejection: Option<RejectionReason>,
    /// root of the subtree the primaries were admitted into
    pub subtree: Option<NodeIx>,
    pub reserved_ledger: Vec<LedgerEntry>,
    /// links on which this request is a member of a sharing set
    pub sharing_sets: Vec<LinkIx>,
    pub primaries: Vec<UnitId>,
    pub backups: Vec<UnitId>,
    /// primary unit -> backup unit that takes over when the primary's host fails
    pub mapping: Vec<(UnitId, UnitId)>,
    pub arrival: Option<Timestamp>,
    pub departure: Option<Timestamp>,
}

impl Request {
    pub fn new(id: RequestId, n: usize, bw: Bandwidth) -> Self {
        Request {
            id,
            n,
            bw,
            admitted: false,
            protected: false,
            active: false,
            rejection: None,
            subtree: None,
            reserved_ledger: Vec::new(),
            sharing_sets: Vec::new(),
            primaries: Vec::new(),
            backups: Vec::new(),
            mapping: Vec::new(),
            arrival: None,
            departure: None,
        }
    }

    /// Primary units grouped by host, in placement order.
    pub fn primaries_per_host(&self) -> IndexMap<NodeIx, Vec<UnitId>> {
        let mut m: IndexMap<NodeIx, Vec<UnitId>> = IndexMap::new();
        for &u in &self.primaries {
            m.entry(u.host).or_default().push(u);
        }
        m
    }

    #[inline]
    pub fn primaries_on(&self, host: NodeIx) -> usize {
        self.primaries.iter().filter(|u| u.host == host).count()
    }

    /// The number of backups required to survive any single host failure: the
    /// largest number of primaries collocated on one host.
    pub fn backups_needed(&self) -> usize {
        self.primaries_per_host()
            .values()
            .map(|v| v.len())
            .max()
            .unwrap_or(0)
    }

    /// The smallest nonzero number of primaries hosted on a single host.
    pub fn min_hosted(&self) -> usize {
        self.primaries_per_host()
            .values()
            .map(|v| v.len())
            .min()
            .unwrap_or(0)
    }

    #[inline]
    pub fn spans_multiple_hosts(&self) -> bool {
        self.primaries_per_host().len() > 1
    }

    /// Hosts of the units serving the tenant once `failed` goes down: the surviving
    /// primaries plus the backups mapped to the primaries on `failed`. One entry per unit.
    pub fn hosts_after_failure(&self, failed: NodeIx) -> Vec<NodeIx> {
        let mut hosts: Vec<NodeIx> = self
            .primaries
            .iter()
            .filter(|u| u.host != failed)
            .map(|u| u.host)
            .collect();
        hosts.extend(
            self.mapping
                .iter()
                .filter(|(p, _)| p.host == failed)
                .map(|(_, b)| b.host),
        );
        hosts
    }

    /// Mark the request as rejected. The caller must have released every reservation.
    pub fn reject(&mut self, reason: RejectionReason) {
        self.admitted = false;
        self.protected = false;
        self.active = false;
        self.rejection = Some(reason);
        self.subtree = None;
        self.reserved_ledger.clear();
        self.sharing_sets.clear();
        self.primaries.clear();
        self.backups.clear();
        self.mapping.clear();
    }

    /// Total bandwidth recorded in the audit ledger, `(primary, backup, shared)`.
    pub fn ledger_totals(&self) -> (Bandwidth, Bandwidth, Bandwidth) {
        self.reserved_ledger.iter().fold(
            (Bandwidth::zero(), Bandwidth::zero(), Bandwidth::zero()),
            |(p, b, s), e| (p + e.primary, b + e.backup, s + e.shared),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Arrival,
    Departure,
}

/// An arrival or departure of a tenant, as produced by the workload generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub ts: Timestamp,
    pub request: RequestId,
    pub n: usize,
    pub bw: Bandwidth,
    pub kind: EventKind,
}
