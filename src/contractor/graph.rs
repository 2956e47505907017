//! Working graph of the contractor.
//!
//! Adjacency over dense edge-based node ids. Every conceptual directed
//! edge `u -> w` is stored twice: under `u` with the forward flag and
//! mirrored under `w` with the flags swapped, so both Dijkstra directions
//! and the final two-sided CSR emission read straight off the lists.

use crate::graph::EdgeBasedEdge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractorEdge {
    pub target: u32,
    /// Deci-seconds, strictly positive.
    pub weight: i32,
    /// Original edge id, or the contracted middle node for shortcuts.
    pub id: u32,
    pub shortcut: bool,
    pub forward: bool,
    pub backward: bool,
    pub original_edges: u32,
}

#[derive(Debug)]
pub struct ContractorGraph {
    adjacency: Vec<Vec<ContractorEdge>>,
}

impl ContractorGraph {
    pub fn new(num_nodes: u32, input: &[EdgeBasedEdge]) -> ContractorGraph {
        let mut adjacency: Vec<Vec<ContractorEdge>> = vec![Vec::new(); num_nodes as usize];
        for edge in input {
            adjacency[edge.source as usize].push(ContractorEdge {
                target: edge.target,
                weight: edge.weight,
                id: edge.edge_id,
                shortcut: false,
                forward: edge.forward,
                backward: edge.backward,
                original_edges: 1,
            });
            adjacency[edge.target as usize].push(ContractorEdge {
                target: edge.source,
                weight: edge.weight,
                id: edge.edge_id,
                shortcut: false,
                forward: edge.backward,
                backward: edge.forward,
                original_edges: 1,
            });
        }
        ContractorGraph { adjacency }
    }

    pub fn num_nodes(&self) -> u32 {
        self.adjacency.len() as u32
    }

    pub fn edges_of(&self, node: u32) -> &[ContractorEdge] {
        &self.adjacency[node as usize]
    }

    pub fn degree(&self, node: u32) -> usize {
        self.adjacency[node as usize].len()
    }

    /// Inserts a shortcut `u -> w` through `via`, mirrored on both sides.
    pub fn insert_shortcut(&mut self, u: u32, w: u32, weight: i32, via: u32, original_edges: u32) {
        self.adjacency[u as usize].push(ContractorEdge {
            target: w,
            weight,
            id: via,
            shortcut: true,
            forward: true,
            backward: false,
            original_edges,
        });
        self.adjacency[w as usize].push(ContractorEdge {
            target: u,
            weight,
            id: via,
            shortcut: true,
            forward: false,
            backward: true,
            original_edges,
        });
    }

    /// Removes every stored entry touching `node`: its own list and the
    /// mirror entries at its neighbors. Returns `(own, mirrors)` where
    /// `mirrors` pairs each removed entry with the neighbor it lived at.
    pub fn detach(&mut self, node: u32) -> (Vec<ContractorEdge>, Vec<(u32, ContractorEdge)>) {
        let own = std::mem::take(&mut self.adjacency[node as usize]);
        let mut mirrors = Vec::new();
        let mut neighbors: Vec<u32> = own.iter().map(|e| e.target).collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        for neighbor in neighbors {
            let list = &mut self.adjacency[neighbor as usize];
            let mut i = 0;
            while i < list.len() {
                if list[i].target == node {
                    mirrors.push((neighbor, list.swap_remove(i)));
                } else {
                    i += 1;
                }
            }
        }
        (own, mirrors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_edge(source: u32, target: u32, weight: i32, id: u32) -> EdgeBasedEdge {
        EdgeBasedEdge { source, target, edge_id: id, weight, forward: true, backward: false }
    }

    #[test]
    fn edges_are_mirrored() {
        let graph = ContractorGraph::new(3, &[input_edge(0, 1, 10, 0)]);
        assert_eq!(graph.degree(0), 1);
        assert_eq!(graph.degree(1), 1);
        let at_zero = graph.edges_of(0)[0];
        assert!(at_zero.forward && !at_zero.backward);
        let at_one = graph.edges_of(1)[0];
        assert!(!at_one.forward && at_one.backward);
        assert_eq!(at_one.target, 0);
    }

    #[test]
    fn detach_removes_both_sides() {
        let mut graph =
            ContractorGraph::new(3, &[input_edge(0, 1, 10, 0), input_edge(1, 2, 20, 1)]);
        let (own, mirrors) = graph.detach(1);
        assert_eq!(own.len(), 2);
        assert_eq!(mirrors.len(), 2);
        assert_eq!(graph.degree(0), 0);
        assert_eq!(graph.degree(2), 0);
    }

    #[test]
    fn shortcut_is_mirrored() {
        let mut graph = ContractorGraph::new(3, &[]);
        graph.insert_shortcut(0, 2, 30, 1, 2);
        assert_eq!(graph.edges_of(0)[0].target, 2);
        assert!(graph.edges_of(0)[0].shortcut);
        assert!(graph.edges_of(2)[0].backward);
        assert_eq!(graph.edges_of(2)[0].id, 1);
    }
}
