use std::sync::Arc;

use indexmap::IndexMap;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::architecture::{build_tree, TopoArgs};
use crate::backup::{self, ProtectOptions, Protection, SpreadStrategy};
use crate::bandwidth::Bandwidth;
use crate::cluster::{Cluster, LinkIx};
use crate::ledger::Ledger;
use crate::oracle::{build_oracle, Oracle, OracleKind};
use crate::primary;
use crate::request::{Event, EventKind, LedgerEntry, Request};
use crate::sharing;
use crate::stats::Stats;
use crate::{Error, RequestId};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrainSetting {
    /// Random seed for multiple uses
    pub seed: u64,
    /// The parameters of the cluster's physical topology
    pub topology: TopoArgs,
    /// Solver for backup mapping and sharing set packing
    #[serde(default)]
    pub oracle: OracleKind,
    /// Put part of the backups next to the primaries of the same tenant
    #[serde(default = "default_true")]
    pub collocation: bool,
    /// Let tenants with disjoint failure scenarios share backup bandwidth
    #[serde(default = "default_true")]
    pub sharing: bool,
    /// How backups are spread over hosts without primaries
    #[serde(default)]
    pub spread: SpreadStrategy,
}

impl Default for BrainSetting {
    fn default() -> Self {
        BrainSetting {
            seed: 1,
            topology: TopoArgs::default(),
            oracle: OracleKind::default(),
            collocation: true,
            sharing: true,
            spread: SpreadStrategy::default(),
        }
    }
}

/// Brain is the admission controller. It owns the physical topology and the
/// reservation ledger, and decides where the primaries and backups of every tenant go.
#[derive(Debug)]
pub struct Brain {
    /// Brain settings
    setting: BrainSetting,
    /// physical cluster, never modified after construction
    cluster: Arc<Cluster>,
    /// host units and link reservations
    ledger: Ledger,
    /// every request ever seen, in arrival order
    requests: IndexMap<RequestId, Request>,
    oracle: Box<dyn Oracle>,
    rng: StdRng,
}

impl Brain {
    pub fn new(setting: BrainSetting) -> Result<Self, Error> {
        let cluster = build_tree(&setting.topology)?;
        let ledger = Ledger::new(&cluster);
        log::info!(
            "brain: topology {}, {} hosts, oracle {}, collocation: {}, sharing: {}",
            setting.topology,
            cluster.num_hosts(),
            setting.oracle,
            setting.collocation,
            setting.sharing
        );
        Ok(Brain {
            oracle: build_oracle(setting.oracle),
            rng: StdRng::seed_from_u64(setting.seed),
            setting,
            cluster: Arc::new(cluster),
            ledger,
            requests: IndexMap::new(),
        })
    }

    pub fn setting(&self) -> &BrainSetting {
        &self.setting
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn request(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    pub fn requests(&self) -> &IndexMap<RequestId, Request> {
        &self.requests
    }

    pub fn stats(&self) -> Stats {
        Stats::collect(&self.cluster, &self.ledger, &self.requests)
    }

    pub fn process(&mut self, event: &Event) -> Result<(), Error> {
        match event.kind {
            EventKind::Arrival => {
                self.admit(event.request, event.n, event.bw)?;
                if let Some(req) = self.requests.get_mut(&event.request) {
                    req.arrival = Some(event.ts);
                }
            }
            EventKind::Departure => {
                self.release(event.request)?;
                if let Some(req) = self.requests.get_mut(&event.request) {
                    req.departure = Some(event.ts);
                }
            }
        }
        Ok(())
    }

    /// Admit a tenant of `n` units with `bw` each. Rejections are not errors: the
    /// returned request carries the reason, and nothing stays reserved for it.
    pub fn admit(&mut self, id: RequestId, n: usize, bw: Bandwidth) -> Result<&Request, Error> {
        if self.requests.contains_key(&id) {
            return Err(Error::DuplicateRequest(id));
        }

        let mut req = Request::new(id, n, bw);
        let placement = match primary::place(&self.cluster, &self.ledger, n, bw) {
            Ok(placement) => placement,
            Err(reason) => {
                log::info!("request {} ({} x {}) rejected: {}", id, n, bw, reason);
                req.reject(reason);
                return Ok(self.insert(req));
            }
        };
        primary::commit(&mut self.ledger, &mut req, &placement)?;

        let opts = ProtectOptions {
            collocation: self.setting.collocation,
            spread: self.setting.spread,
        };
        let outcome = backup::protect(
            &self.cluster,
            &mut self.ledger,
            &mut req,
            self.oracle.as_mut(),
            opts,
            &mut self.rng,
        )?;

        match outcome {
            Protection::Protected => {
                req.admitted = true;
                req.active = true;
                log::info!(
                    "request {} ({} x {}) admitted: {} primaries on {} hosts, {} backups",
                    id,
                    n,
                    bw,
                    req.primaries.len(),
                    req.primaries_per_host().len(),
                    req.backups.len()
                );
                let links: Vec<LinkIx> = self
                    .cluster
                    .all_links()
                    .filter(|&l| {
                        self.ledger
                            .reservation(l, id)
                            .map_or(false, |r| !r.backup.is_zero())
                    })
                    .collect();
                self.requests.insert(id, req);
                let mut touched = vec![id];
                touched.extend(self.share(&links));
                self.refresh_ledgers(&touched);
            }
            Protection::Rejected(reason) => {
                primary::release(&self.cluster, &mut self.ledger, &mut req);
                log::info!("request {} ({} x {}) rejected: {}", id, n, bw, reason);
                req.reject(reason);
                self.requests.insert(id, req);
            }
        }

        self.requests
            .get(&id)
            .ok_or_else(|| Error::Invariant(format!("request {} vanished", id)))
    }

    fn insert(&mut self, req: Request) -> &Request {
        let id = req.id;
        self.requests.entry(id).or_insert(req)
    }

    /// Departure of a tenant. Every reservation is rolled back, the audit ledger stays.
    pub fn release(&mut self, id: RequestId) -> Result<(), Error> {
        let req = self.requests.get(&id).ok_or(Error::UnknownRequest(id))?;
        if !req.active {
            return Ok(());
        }

        let links = req.sharing_sets.clone();
        let mut touched: Vec<RequestId> = Vec::new();
        for &l in &links {
            touched.extend(
                self.ledger
                    .link(l)
                    .set_of(id)
                    .map(|pos| {
                        self.ledger.link(l).sharing_sets[pos]
                            .members
                            .iter()
                            .map(|&(r, _)| r)
                            .filter(|&r| r != id)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default(),
            );
            sharing::leave(&mut self.ledger, &mut self.requests, l, id);
        }

        let req = self
            .requests
            .get_mut(&id)
            .ok_or(Error::UnknownRequest(id))?;
        backup::release_backups(&self.cluster, &mut self.ledger, req);
        primary::release(&self.cluster, &mut self.ledger, req);
        req.active = false;
        log::info!("request {} released", id);

        touched.extend(self.share(&links));
        self.refresh_ledgers(&touched);
        Ok(())
    }

    /// Run the sharing engine on `links`, returning the requests whose entries changed.
    fn share(&mut self, links: &[LinkIx]) -> Vec<RequestId> {
        if !self.setting.sharing {
            return Vec::new();
        }
        let mut touched = Vec::new();
        for &l in links {
            touched.extend(sharing::optimize_link(
                &self.cluster,
                &mut self.ledger,
                &mut self.requests,
                self.oracle.as_mut(),
                l,
            ));
        }
        touched
    }

    /// Copy the current link entries of the active requests among `ids` into their audit
    /// ledger.
    fn refresh_ledgers(&mut self, ids: &[RequestId]) {
        for &id in ids {
            let entries: Vec<LedgerEntry> = self
                .cluster
                .all_links()
                .filter_map(|l| {
                    self.ledger.reservation(l, id).map(|r| LedgerEntry {
                        link: l,
                        primary: r.primary,
                        backup: r.backup,
                        shared: r.shared,
                    })
                })
                .collect();
            if let Some(req) = self.requests.get_mut(&id) {
                if req.active {
                    req.reserved_ledger = entries;
                }
            }
        }
    }

    /// Check the ledger accounting and the guarantees every request must enjoy.
    pub fn audit(&self) -> Result<(), Error> {
        self.ledger.check_invariants(&self.cluster)?;

        for req in self.requests.values() {
            if !req.admitted {
                if !req.reserved_ledger.is_empty() || req.rejection.is_none() {
                    return Err(Error::Invariant(format!(
                        "rejected request {} holds reservations",
                        req.id
                    )));
                }
                continue;
            }
            if !req.active {
                continue;
            }
            if !backup::is_survivable(req) {
                return Err(Error::Invariant(format!(
                    "request {} does not survive a host failure",
                    req.id
                )));
            }
            let held = self.cluster.all_links().fold(
                (Bandwidth::zero(), Bandwidth::zero(), Bandwidth::zero()),
                |(p, b, s), l| match self.ledger.reservation(l, req.id) {
                    Some(r) => (p + r.primary, b + r.backup, s + r.shared),
                    None => (p, b, s),
                },
            );
            if req.ledger_totals() != held {
                return Err(Error::Invariant(format!(
                    "audit ledger of request {} is stale: {:?} recorded, {:?} held",
                    req.id,
                    req.ledger_totals(),
                    held
                )));
            }
        }

        for l in self.cluster.all_links() {
            for set in &self.ledger.link(l).sharing_sets {
                for (i, &(a, _)) in set.members.iter().enumerate() {
                    for &(b, _) in &set.members[i + 1..] {
                        let ok = match (self.requests.get(&a), self.requests.get(&b)) {
                            (Some(a), Some(b)) => {
                                sharing::can_share_bandwidth(&self.cluster, a, b, l)
                            }
                            _ => false,
                        };
                        if !ok {
                            return Err(Error::Invariant(format!(
                                "requests {} and {} conflict on link {:?}",
                                a, b, l
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
