//! Materialized views of a rooted slice of the topology.
//!
//! A [`SubTree`] only holds indices into the [`Cluster`] arena, so building one never
//! aliases any mutable state. Views are rebuilt on demand and dropped after each search.

use std::collections::VecDeque;

use crate::cluster::{Cluster, Level, LinkIx, NodeIx};
use crate::ledger::Ledger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubTree {
    root: NodeIx,
    level: Level,
    /// the uplink connecting the root to the rest of the tree
    uplink: Option<LinkIx>,
    /// switches below the root, excluding the root itself, in BFS order
    switches: Vec<NodeIx>,
    /// hosts below the root in BFS order
    hosts: Vec<NodeIx>,
    /// uplinks of every node below the root
    links: Vec<LinkIx>,
}

impl SubTree {
    /// Build the subtree rooted at `root` by walking down the links whose parent is the
    /// current node, level by level, stopping at hosts.
    pub fn build(cluster: &Cluster, root: NodeIx) -> SubTree {
        let mut switches = Vec::new();
        let mut hosts = Vec::new();
        let mut links = Vec::new();

        if cluster[root].is_host() {
            hosts.push(root);
        }

        let mut queue = VecDeque::new();
        queue.push_back(root);
        while let Some(x) = queue.pop_front() {
            for &link_ix in cluster.get_downlinks(x) {
                let child = cluster.get_source(link_ix);
                links.push(link_ix);
                if cluster[child].is_host() {
                    hosts.push(child);
                } else {
                    switches.push(child);
                    queue.push_back(child);
                }
            }
        }

        SubTree {
            root,
            level: cluster[root].level,
            uplink: cluster.get_uplink(root),
            switches,
            hosts,
            links,
        }
    }

    /// The subtree rooted at the parent of this subtree's root, `None` at the top.
    pub fn parent(&self, cluster: &Cluster) -> Option<SubTree> {
        cluster
            .get_parent(self.root)
            .map(|p| SubTree::build(cluster, p))
    }

    #[inline]
    pub fn root(&self) -> NodeIx {
        self.root
    }

    #[inline]
    pub fn level(&self) -> Level {
        self.level
    }

    #[inline]
    pub fn uplink(&self) -> Option<LinkIx> {
        self.uplink
    }

    #[inline]
    pub fn switches(&self) -> &[NodeIx] {
        &self.switches
    }

    #[inline]
    pub fn hosts(&self) -> &[NodeIx] {
        &self.hosts
    }

    #[inline]
    pub fn links(&self) -> &[LinkIx] {
        &self.links
    }

    pub fn contains(&self, cluster: &Cluster, node: NodeIx) -> bool {
        cluster.ancestors(node).contains(&self.root)
    }

    /// Number of free compute units over all hosts of this subtree.
    pub fn available_units(&self, ledger: &Ledger) -> usize {
        self.hosts.iter().map(|&h| ledger.free_units(h)).sum()
    }
}

/// The single upward link of `node`, `None` for the root of the tree.
#[inline]
pub fn search_link(cluster: &Cluster, node: NodeIx) -> Option<LinkIx> {
    cluster.get_uplink(node)
}

/// The uplinks of all nodes at `level`.
pub fn links_at_level(cluster: &Cluster, level: Level) -> Vec<LinkIx> {
    cluster
        .nodes_at_level(level)
        .iter()
        .filter_map(|&n| cluster.get_uplink(n))
        .collect()
}

/// All switches at `level`; empty for the host level.
pub fn switches_at_level(cluster: &Cluster, level: Level) -> &[NodeIx] {
    if level.is_host() {
        &[]
    } else {
        cluster.nodes_at_level(level)
    }
}
