use fnv::FnvHashMap as HashMap;
use petgraph::{
    dot::Dot,
    graph::{EdgeIndex, EdgeIndices, Graph, NodeIndex},
};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::bandwidth::Bandwidth;

pub type LinkIx = EdgeIndex;
pub type NodeIx = NodeIndex;
pub type LinkIxIter = EdgeIndices;

/// Ancestors of a node, from itself up to the root. The tree is at most 4 levels high.
pub type Ancestors = SmallVec<[NodeIx; 4]>;

/// The level of a node in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Host = 0,
    Rack = 1,
    Aggregation = 2,
    Core = 3,
}

impl Level {
    /// The fixed height of the tree.
    pub const MAX_HEIGHT: usize = 3;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Level> {
        match i {
            0 => Some(Level::Host),
            1 => Some(Level::Rack),
            2 => Some(Level::Aggregation),
            3 => Some(Level::Core),
            _ => None,
        }
    }

    #[inline]
    pub fn up(self) -> Option<Level> {
        Level::from_index(self.index() + 1)
    }

    #[inline]
    pub fn is_host(self) -> bool {
        matches!(self, Level::Host)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Level::Host => "host",
            Level::Rack => "rack",
            Level::Aggregation => "aggregation",
            Level::Core => "core",
        };
        write!(f, "{}", s)
    }
}

/// The static shape of the data center: hosts, switches and the uplink of every node.
///
/// Every link is directed from a child to its parent. All mutable state (slot
/// reservations, residual bandwidth) lives in [`crate::ledger::Ledger`], so a `Cluster`
/// can be shared by reference for the whole simulation.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cluster {
    graph: Graph<Node, Link>,
    node_map: HashMap<String, NodeIx>,
    levels: Vec<Vec<NodeIx>>,
    slots: usize,
}

impl Cluster {
    pub fn new(slots: usize) -> Self {
        Cluster {
            graph: Graph::new(),
            node_map: HashMap::default(),
            levels: vec![Vec::new(); Level::MAX_HEIGHT + 1],
            slots,
        }
    }

    #[inline]
    pub fn add_node(&mut self, node: Node) -> NodeIx {
        let name = node.name.clone();
        let level = node.level;
        let node_idx = self.graph.add_node(node);
        let old = self.node_map.insert(name.clone(), node_idx);
        assert!(old.is_none(), "repeated key: {}", name);
        self.levels[level.index()].push(node_idx);
        node_idx
    }

    /// Connect `child` to `parent` with an uplink of capacity `bw`.
    pub fn add_link_by_name(&mut self, parent: &str, child: &str, bw: Bandwidth) -> LinkIx {
        let &pnode = self
            .node_map
            .get(parent)
            .unwrap_or_else(|| panic!("cannot find node with name: {}", parent));
        let &cnode = self
            .node_map
            .get(child)
            .unwrap_or_else(|| panic!("cannot find node with name: {}", child));
        assert_eq!(
            self.graph[cnode].level.up(),
            Some(self.graph[pnode].level),
            "a link must connect adjacent levels: {} -> {}",
            child,
            parent
        );

        let l = self.graph.add_edge(cnode, pnode, Link::new(bw));
        self.graph[pnode].children.push(l);
        assert!(self.graph[cnode].parent.is_none());
        self.graph[cnode].parent = Some(l);
        l
    }

    #[inline]
    pub fn node_index(&self, name: &str) -> Option<NodeIx> {
        self.node_map.get(name).copied()
    }

    #[inline]
    pub fn slots_per_host(&self) -> usize {
        self.slots
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    pub fn num_links(&self) -> usize {
        self.graph.edge_count()
    }

    #[inline]
    pub fn num_hosts(&self) -> usize {
        self.levels[Level::Host.index()].len()
    }

    #[inline]
    pub fn num_switches(&self) -> usize {
        self.graph.node_count() - self.num_hosts()
    }

    /// The child end of a link.
    #[inline]
    pub fn get_source(&self, ix: LinkIx) -> NodeIx {
        self.graph.raw_edges()[ix.index()].source()
    }

    /// The parent end of a link.
    #[inline]
    pub fn get_target(&self, ix: LinkIx) -> NodeIx {
        self.graph.raw_edges()[ix.index()].target()
    }

    #[inline]
    pub fn get_uplink(&self, ix: NodeIx) -> Option<LinkIx> {
        self.graph[ix].parent
    }

    #[inline]
    pub fn get_parent(&self, ix: NodeIx) -> Option<NodeIx> {
        self.get_uplink(ix).map(|l| self.get_target(l))
    }

    #[inline]
    pub fn get_downlinks(&self, ix: NodeIx) -> std::slice::Iter<LinkIx> {
        self.graph[ix].children.iter()
    }

    #[inline]
    pub fn all_links(&self) -> LinkIxIter {
        self.graph.edge_indices()
    }

    #[inline]
    pub fn nodes_at_level(&self, level: Level) -> &[NodeIx] {
        &self.levels[level.index()]
    }

    #[inline]
    pub fn hosts(&self) -> &[NodeIx] {
        self.nodes_at_level(Level::Host)
    }

    pub fn ancestors(&self, ix: NodeIx) -> Ancestors {
        let mut res = Ancestors::new();
        let mut x = Some(ix);
        while let Some(n) = x {
            res.push(n);
            x = self.get_parent(n);
        }
        res
    }

    /// Whether traffic leaving `node` for the rest of the tree crosses `link`,
    /// i.e. whether `node` sits in the subtree hanging below `link`.
    #[inline]
    pub fn is_under(&self, node: NodeIx, link: LinkIx) -> bool {
        let child = self.get_source(link);
        if self[node].level > self[child].level {
            return false;
        }
        self.ancestors(node).contains(&child)
    }

    /// The level of the lowest common ancestor of `a` and `b`.
    pub fn lca_level(&self, a: NodeIx, b: NodeIx) -> Level {
        let pa = self.ancestors(a);
        let pb = self.ancestors(b);
        pa.iter()
            .find(|x| pb.contains(x))
            .map(|&x| self[x].level)
            .unwrap_or(Level::Core)
    }

    pub fn to_dot(&self) -> Dot<&Graph<Node, Link>> {
        Dot::with_config(&self.graph, &[])
    }
}

impl std::ops::Index<NodeIx> for Cluster {
    type Output = Node;
    fn index(&self, index: NodeIx) -> &Self::Output {
        &self.graph[index]
    }
}

impl std::ops::Index<LinkIx> for Cluster {
    type Output = Link;
    fn index(&self, index: LinkIx) -> &Self::Output {
        &self.graph[index]
    }
}

/// An uplink from a child node to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub capacity: Bandwidth,
}

impl Link {
    #[inline]
    pub fn new(capacity: Bandwidth) -> Link {
        Link { capacity }
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.capacity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub level: Level,
    // this gives us faster subtree traversal
    parent: Option<LinkIx>,
    children: Vec<LinkIx>,
}

impl Node {
    #[inline]
    pub fn new(name: &str, level: Level) -> Node {
        Node {
            name: name.to_owned(),
            level,
            parent: None,
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn is_host(&self) -> bool {
        self.level.is_host()
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
