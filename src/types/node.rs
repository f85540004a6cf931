//! Halo graph vertices and the arena that owns them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Error type for hand-assembled node arenas.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    /// Node stored at a position different from its index.
    #[error("Node at position {position} has index {index}")]
    IndexMismatch {
        /// Position in the arena.
        position: usize,
        /// Index recorded on the node.
        index: usize,
    },
    /// Neighbour index outside the arena.
    #[error("Node {node} lists neighbour {neighbour} outside arena of {len} nodes")]
    NeighbourOutOfRange {
        /// Node listing the neighbour.
        node: usize,
        /// Offending neighbour index.
        neighbour: usize,
        /// Arena length.
        len: usize,
    },
    /// Neighbour relation is not symmetric.
    #[error("Node {node} lists {neighbour} as neighbour but not vice versa")]
    Asymmetric {
        /// Node listing the neighbour.
        node: usize,
        /// Neighbour missing the back edge.
        neighbour: usize,
    },
}

/// A vertex of the halo graph: one periodic image of a unit-cell site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Position of the node in its arena.
    pub index: usize,
    /// Species symbol.
    pub element: String,
    /// Unit-cell site this node is an image of.
    pub uc_index: usize,
    /// False only for the image inside the central (original) cell.
    pub is_halo: bool,
    /// Arena indices of connected nodes.
    pub neighbours: BTreeSet<usize>,
}

impl Node {
    /// Create a node without neighbours.
    pub fn new(index: usize, element: impl Into<String>, uc_index: usize, is_halo: bool) -> Self {
        Self {
            index,
            element: element.into(),
            uc_index,
            is_halo,
            neighbours: BTreeSet::new(),
        }
    }

    /// Builder-style neighbour list.
    pub fn with_neighbours(mut self, neighbours: impl IntoIterator<Item = usize>) -> Self {
        self.neighbours = neighbours.into_iter().collect();
        self
    }

    /// Number of neighbours.
    pub fn degree(&self) -> usize {
        self.neighbours.len()
    }

    /// Dictionary view of the node's labels (`UC_index`, `Halo`, `element`).
    ///
    /// Derived on demand; the typed fields are authoritative.
    pub fn labels(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("UC_index", self.uc_index.to_string()),
            ("Halo", self.is_halo.to_string()),
            ("element", self.element.clone()),
        ])
    }
}

/// Owner of all nodes of one halo graph.
///
/// Nodes reference each other by index, so clusters and engines share the
/// arena read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    /// Build an arena from hand-assembled nodes, validating indices and symmetry.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self, ArenaError> {
        let len = nodes.len();
        for (position, node) in nodes.iter().enumerate() {
            if node.index != position {
                return Err(ArenaError::IndexMismatch {
                    position,
                    index: node.index,
                });
            }
            for &neighbour in &node.neighbours {
                let Some(other) = nodes.get(neighbour) else {
                    return Err(ArenaError::NeighbourOutOfRange {
                        node: position,
                        neighbour,
                        len,
                    });
                };
                if !other.neighbours.contains(&position) {
                    return Err(ArenaError::Asymmetric {
                        node: position,
                        neighbour,
                    });
                }
            }
        }
        Ok(Self { nodes })
    }

    /// Wrap nodes the builder has already made consistent.
    pub(crate) fn from_nodes_unchecked(nodes: Vec<Node>) -> Self {
        debug_assert!(nodes.iter().enumerate().all(|(i, n)| n.index == i));
        Self { nodes }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by index.
    pub fn get(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    /// All nodes in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Nodes inside the central cell.
    pub fn unit_cell_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.is_halo)
    }

    /// Number of distinct unit-cell sites (one past the largest `uc_index`).
    pub fn site_count(&self) -> usize {
        self.nodes.iter().map(|n| n.uc_index + 1).max().unwrap_or(0)
    }

    /// Whether every neighbour relation has its reverse.
    pub fn is_symmetric(&self) -> bool {
        self.nodes.iter().all(|node| {
            node.neighbours.iter().all(|&j| {
                self.nodes
                    .get(j)
                    .is_some_and(|other| other.neighbours.contains(&node.index))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> Vec<Node> {
        vec![
            Node::new(0, "Li", 0, false).with_neighbours([1]),
            Node::new(1, "Li", 0, true).with_neighbours([0]),
        ]
    }

    #[test]
    fn test_labels_projection() {
        let node = Node::new(13, "Li", 0, false);
        let labels = node.labels();
        assert_eq!(labels["UC_index"], "0");
        assert_eq!(labels["Halo"], "false");
        assert_eq!(labels["element"], "Li");
    }

    #[test]
    fn test_from_nodes_accepts_symmetric_pair() {
        let arena = NodeArena::from_nodes(pair()).unwrap();
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.site_count(), 1);
        assert_eq!(arena.unit_cell_nodes().count(), 1);
        assert!(arena.is_symmetric());
    }

    #[test]
    fn test_from_nodes_rejects_asymmetry() {
        let mut nodes = pair();
        nodes[1].neighbours.clear();
        assert_eq!(
            NodeArena::from_nodes(nodes),
            Err(ArenaError::Asymmetric { node: 0, neighbour: 1 })
        );
    }

    #[test]
    fn test_from_nodes_rejects_bad_index() {
        let mut nodes = pair();
        nodes[1].index = 5;
        assert!(matches!(
            NodeArena::from_nodes(nodes),
            Err(ArenaError::IndexMismatch { position: 1, index: 5 })
        ));
    }

    #[test]
    fn test_from_nodes_rejects_dangling_neighbour() {
        let nodes = vec![Node::new(0, "Li", 0, false).with_neighbours([3])];
        assert!(matches!(
            NodeArena::from_nodes(nodes),
            Err(ArenaError::NeighbourOutOfRange { neighbour: 3, .. })
        ));
    }
}
