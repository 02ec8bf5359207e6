//! Mutable reservation state of the data center.
//!
//! The ledger is value-typed: snapshotting the whole state is a `clone()`, and two
//! states can be compared with `==`. The topology shape stays in [`Cluster`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bandwidth::Bandwidth;
use crate::cluster::{Cluster, LinkIx, NodeIx};
use crate::{Error, RequestId};

/// A compute unit is addressed by its host and its slot on that host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId {
    pub host: NodeIx,
    pub slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Primary,
    Backup,
}

/// A VM slot on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnit {
    pub role: Role,
    pub reserved: bool,
    pub owner: Option<RequestId>,
}

impl Default for ComputeUnit {
    fn default() -> Self {
        ComputeUnit {
            role: Role::Primary,
            reserved: false,
            owner: None,
        }
    }
}

/// What one request holds on one link.
///
/// `shared` is the part of the request's own backup demand that is currently
/// covered by a sharing set instead of being reserved individually. It is never
/// counted in the link usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub primary: Bandwidth,
    pub backup: Bandwidth,
    pub shared: Bandwidth,
}

impl Reservation {
    /// Bandwidth actually taken from the link.
    #[inline]
    pub fn used(&self) -> Bandwidth {
        self.primary + self.backup
    }

    /// The backup bandwidth this request would need on its own.
    #[inline]
    pub fn backup_demand(&self) -> Bandwidth {
        self.backup + self.shared
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.primary.is_zero() && self.backup.is_zero() && self.shared.is_zero()
    }
}

/// A group of requests on one link whose failure scenarios never overlap, so a single
/// reservation of the largest member demand covers all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingSet {
    /// member and its individual backup demand on the link
    pub members: Vec<(RequestId, Bandwidth)>,
    pub bandwidth_to_reserve: Bandwidth,
}

impl SharingSet {
    pub fn new(members: Vec<(RequestId, Bandwidth)>) -> Self {
        let mut set = SharingSet {
            members,
            bandwidth_to_reserve: Bandwidth::zero(),
        };
        set.recompute();
        set
    }

    pub fn recompute(&mut self) {
        self.bandwidth_to_reserve = self
            .members
            .iter()
            .map(|&(_, d)| d)
            .max()
            .unwrap_or_default();
    }

    /// The member whose individual reservation carries the whole set: the first one
    /// with the largest demand.
    pub fn carrier(&self) -> Option<RequestId> {
        let max = self.bandwidth_to_reserve;
        self.members.iter().find(|&&(_, d)| d == max).map(|&(r, _)| r)
    }

    #[inline]
    pub fn contains(&self, id: RequestId) -> bool {
        self.members.iter().any(|&(r, _)| r == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkState {
    pub capacity: Bandwidth,
    pub residual: Bandwidth,
    pub reservations: IndexMap<RequestId, Reservation>,
    pub sharing_sets: Vec<SharingSet>,
}

impl LinkState {
    fn new(capacity: Bandwidth) -> Self {
        LinkState {
            capacity,
            residual: capacity,
            reservations: IndexMap::new(),
            sharing_sets: Vec::new(),
        }
    }

    #[inline]
    pub fn reservation(&self, id: RequestId) -> Option<&Reservation> {
        self.reservations.get(&id)
    }

    /// Index of the sharing set `id` belongs to, if any.
    #[inline]
    pub fn set_of(&self, id: RequestId) -> Option<usize> {
        self.sharing_sets.iter().position(|s| s.contains(id))
    }

    #[inline]
    pub fn used(&self) -> Bandwidth {
        self.capacity - self.residual
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    /// compute units of every node, empty for switches
    hosts: Vec<Vec<ComputeUnit>>,
    /// state of every link, indexed by `LinkIx::index()`
    links: Vec<LinkState>,
}

impl Ledger {
    pub fn new(cluster: &Cluster) -> Self {
        let mut hosts = vec![Vec::new(); cluster.num_nodes()];
        for &h in cluster.hosts() {
            hosts[h.index()] = vec![ComputeUnit::default(); cluster.slots_per_host()];
        }
        let links = cluster
            .all_links()
            .map(|l| LinkState::new(cluster[l].capacity))
            .collect();
        Ledger { hosts, links }
    }

    #[inline]
    pub fn units(&self, host: NodeIx) -> &[ComputeUnit] {
        &self.hosts[host.index()]
    }

    #[inline]
    pub fn unit(&self, id: UnitId) -> &ComputeUnit {
        &self.hosts[id.host.index()][id.slot]
    }

    #[inline]
    pub fn free_units(&self, host: NodeIx) -> usize {
        self.units(host).iter().filter(|u| !u.reserved).count()
    }

    /// Count the units `owner` holds on `host` with the given role.
    pub fn units_owned(&self, host: NodeIx, owner: RequestId, role: Role) -> usize {
        self.units(host)
            .iter()
            .filter(|u| u.reserved && u.owner == Some(owner) && u.role == role)
            .count()
    }

    /// Reserve the first free slot on `host`.
    pub fn reserve_unit(&mut self, host: NodeIx, owner: RequestId, role: Role) -> Option<UnitId> {
        let slot = self.hosts[host.index()].iter().position(|u| !u.reserved)?;
        self.hosts[host.index()][slot] = ComputeUnit {
            role,
            reserved: true,
            owner: Some(owner),
        };
        Some(UnitId { host, slot })
    }

    pub fn release_unit(&mut self, id: UnitId) {
        let unit = &mut self.hosts[id.host.index()][id.slot];
        assert!(unit.reserved, "releasing a free unit: {:?}", id);
        *unit = ComputeUnit::default();
    }

    #[inline]
    pub fn link(&self, l: LinkIx) -> &LinkState {
        &self.links[l.index()]
    }

    #[inline]
    pub(crate) fn link_mut(&mut self, l: LinkIx) -> &mut LinkState {
        &mut self.links[l.index()]
    }

    #[inline]
    pub fn residual(&self, l: LinkIx) -> Bandwidth {
        self.links[l.index()].residual
    }

    #[inline]
    pub fn reservation(&self, l: LinkIx, id: RequestId) -> Option<&Reservation> {
        self.links[l.index()].reservation(id)
    }

    /// Take `primary + backup` from link `l` on behalf of request `id`.
    pub fn reserve_bandwidth(
        &mut self,
        l: LinkIx,
        id: RequestId,
        primary: Bandwidth,
        backup: Bandwidth,
    ) -> Result<(), Error> {
        let state = self.link_mut(l);
        let requested = primary + backup;
        state.residual = state
            .residual
            .checked_sub(requested)
            .ok_or(Error::InsufficientBandwidth {
                link: l,
                requested,
                residual: state.residual,
            })?;
        let entry = state.reservations.entry(id).or_default();
        entry.primary += primary;
        entry.backup += backup;
        Ok(())
    }

    /// Give back the backup bandwidth `id` holds individually on `l`.
    pub fn release_backup_bandwidth(&mut self, l: LinkIx, id: RequestId) {
        let state = self.link_mut(l);
        debug_assert!(state.set_of(id).is_none(), "release a shared backup directly");
        if let Some(entry) = state.reservations.get_mut(&id) {
            state.residual += entry.backup;
            entry.backup = Bandwidth::zero();
            if entry.is_empty() {
                state.reservations.shift_remove(&id);
            }
        }
    }

    /// Give back everything `id` holds on `l`. The request must already have left any
    /// sharing set on this link.
    pub fn release_bandwidth(&mut self, l: LinkIx, id: RequestId) -> Option<Reservation> {
        let state = self.link_mut(l);
        debug_assert!(state.set_of(id).is_none(), "release a shared backup directly");
        let entry = state.reservations.shift_remove(&id)?;
        state.residual += entry.used();
        Some(entry)
    }

    /// Verify the link accounting: `capacity - residual` equals the sum of
    /// `primary + backup` over the reservation table, and every sharing set is
    /// consistent with the table.
    pub fn check_invariants(&self, cluster: &Cluster) -> Result<(), Error> {
        for l in cluster.all_links() {
            let state = self.link(l);
            if state.residual > state.capacity {
                return Err(Error::Invariant(format!(
                    "link {:?}: residual {} exceeds capacity {}",
                    l, state.residual, state.capacity
                )));
            }
            let sum: Bandwidth = state.reservations.values().map(|r| r.used()).sum();
            if state.used() != sum {
                return Err(Error::Invariant(format!(
                    "link {:?}: used {} but reservations sum to {}",
                    l,
                    state.used(),
                    sum
                )));
            }
            for set in &state.sharing_sets {
                if set.members.len() < 2 {
                    return Err(Error::Invariant(format!(
                        "link {:?}: sharing set with {} member(s)",
                        l,
                        set.members.len()
                    )));
                }
                let max = set.members.iter().map(|&(_, d)| d).max().unwrap_or_default();
                if max != set.bandwidth_to_reserve {
                    return Err(Error::Invariant(format!(
                        "link {:?}: set reserves {} but max demand is {}",
                        l, set.bandwidth_to_reserve, max
                    )));
                }
                let mut carried = Bandwidth::zero();
                for &(r, d) in &set.members {
                    let entry = state.reservation(r).ok_or_else(|| {
                        Error::Invariant(format!("link {:?}: member {} has no entry", l, r))
                    })?;
                    if entry.backup_demand() != d || !entry.primary.is_zero() {
                        return Err(Error::Invariant(format!(
                            "link {:?}: member {} entry {:?} does not match demand {}",
                            l, r, entry, d
                        )));
                    }
                    carried += entry.backup;
                }
                if carried != set.bandwidth_to_reserve {
                    return Err(Error::Invariant(format!(
                        "link {:?}: members carry {} for a set of {}",
                        l, carried, set.bandwidth_to_reserve
                    )));
                }
            }
            for (&r, entry) in &state.reservations {
                if !entry.shared.is_zero() && state.set_of(r).is_none() {
                    return Err(Error::Invariant(format!(
                        "link {:?}: request {} has shared bandwidth outside any set",
                        l, r
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::{build_tree, TopoArgs};
    use crate::bandwidth::BandwidthTrait;

    #[test]
    fn units_reserve_and_release() {
        let cluster = build_tree(&TopoArgs::default()).unwrap();
        let mut ledger = Ledger::new(&cluster);
        let h = cluster.hosts()[0];
        let snapshot = ledger.clone();

        let a = ledger.reserve_unit(h, 1, Role::Primary).unwrap();
        let b = ledger.reserve_unit(h, 1, Role::Backup).unwrap();
        assert_ne!(a, b);
        assert_eq!(ledger.free_units(h), 2);
        assert_eq!(ledger.units_owned(h, 1, Role::Backup), 1);
        assert_eq!(ledger.unit(b).owner, Some(1));

        ledger.reserve_unit(h, 2, Role::Primary).unwrap();
        ledger.reserve_unit(h, 2, Role::Primary).unwrap();
        assert!(ledger.reserve_unit(h, 2, Role::Primary).is_none());

        ledger.release_unit(a);
        ledger.release_unit(b);
        assert_ne!(ledger, snapshot);
        assert_eq!(ledger.free_units(h), 2);
    }

    #[test]
    fn bandwidth_accounting() {
        let cluster = build_tree(&TopoArgs::default()).unwrap();
        let mut ledger = Ledger::new(&cluster);
        let snapshot = ledger.clone();
        let l = cluster.get_uplink(cluster.hosts()[0]).unwrap();

        ledger.reserve_bandwidth(l, 1, 300.mbps(), 0.mbps()).unwrap();
        ledger.reserve_bandwidth(l, 1, 0.mbps(), 200.mbps()).unwrap();
        ledger.reserve_bandwidth(l, 2, 400.mbps(), 0.mbps()).unwrap();
        assert_eq!(ledger.residual(l), 100.mbps());
        ledger.check_invariants(&cluster).unwrap();

        let err = ledger.reserve_bandwidth(l, 3, 200.mbps(), 0.mbps());
        assert!(matches!(err, Err(Error::InsufficientBandwidth { .. })));
        assert_eq!(ledger.residual(l), 100.mbps());

        ledger.release_backup_bandwidth(l, 1);
        assert_eq!(ledger.reservation(l, 1).unwrap().backup, 0.mbps());
        assert_eq!(ledger.residual(l), 300.mbps());

        let r = ledger.release_bandwidth(l, 1).unwrap();
        assert_eq!(r.primary, 300.mbps());
        ledger.release_bandwidth(l, 2).unwrap();
        ledger.check_invariants(&cluster).unwrap();
        assert_eq!(ledger, snapshot);
    }

    #[test]
    fn detect_broken_accounting() {
        let cluster = build_tree(&TopoArgs::default()).unwrap();
        let mut ledger = Ledger::new(&cluster);
        let l = cluster.get_uplink(cluster.hosts()[0]).unwrap();
        ledger.link_mut(l).residual -= 1.mbps();
        assert!(matches!(
            ledger.check_invariants(&cluster),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn overbooking_leaves_the_link_alone() {
        let cluster = build_tree(&TopoArgs::default()).unwrap();
        let mut ledger = Ledger::new(&cluster);
        let l = cluster.get_uplink(cluster.hosts()[0]).unwrap();
        ledger.reserve_bandwidth(l, 1, 600.mbps(), 0.mbps()).unwrap();
        assert_eq!(
            ledger.reserve_bandwidth(l, 2, 300.mbps(), 200.mbps()),
            Err(Error::InsufficientBandwidth {
                link: l,
                requested: 500.mbps(),
                residual: 400.mbps(),
            })
        );
        assert_eq!(ledger.residual(l), 400.mbps());
        assert!(ledger.reservation(l, 2).is_none());
        ledger.check_invariants(&cluster).unwrap();
    }

    #[test]
    fn sharing_set_carrier() {
        let set = SharingSet::new(vec![(3, 10.mbps()), (1, 30.mbps()), (2, 30.mbps())]);
        assert_eq!(set.bandwidth_to_reserve, 30.mbps());
        assert_eq!(set.carrier(), Some(1));
        assert!(set.contains(2));
        assert!(!set.contains(4));
    }
}
