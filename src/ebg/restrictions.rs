//! Turn-restriction lookups for the expansion stage.
//!
//! Restrictions are bucketed by via node; intersections are small, so a
//! linear scan per bucket is all the indexing needed. Restrictions that
//! reference an out-of-range via node or a non-incident edge are counted
//! as unusable, warned about, and dropped.

use std::collections::HashMap;

use log::warn;

use crate::graph::{NodeId, TurnRestriction};

#[derive(Debug, Clone, Copy)]
struct Entry {
    from_node: NodeId,
    to_node: NodeId,
    only: bool,
}

#[derive(Debug, Default)]
pub struct RestrictionMap {
    by_via: HashMap<NodeId, Vec<Entry>>,
    usable: u64,
    unusable: u64,
}

impl RestrictionMap {
    /// Builds the map, validating each restriction against the node count
    /// and the incidence predicate of the node-based graph.
    pub fn build(
        restrictions: &[TurnRestriction],
        num_nodes: u32,
        mut is_incident: impl FnMut(NodeId, NodeId) -> bool,
    ) -> RestrictionMap {
        let mut map = RestrictionMap::default();
        for (i, restriction) in restrictions.iter().enumerate() {
            if restriction.via_node >= num_nodes {
                warn!(
                    "restriction {i}: via node {} out of range, dropping",
                    restriction.via_node
                );
                map.unusable += 1;
                continue;
            }
            if !is_incident(restriction.via_node, restriction.from_node)
                || !is_incident(restriction.via_node, restriction.to_node)
            {
                warn!(
                    "restriction {i}: edge not incident to via node {}, dropping",
                    restriction.via_node
                );
                map.unusable += 1;
                continue;
            }
            map.by_via.entry(restriction.via_node).or_default().push(Entry {
                from_node: restriction.from_node,
                to_node: restriction.to_node,
                only: restriction.only,
            });
            map.usable += 1;
        }
        map
    }

    /// Targets of only-turn restrictions at `via` for traffic arriving from
    /// `from`. Empty means no only-turn applies.
    pub fn only_targets(&self, via: NodeId, from: NodeId) -> Vec<NodeId> {
        self.by_via
            .get(&via)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.only && e.from_node == from)
                    .map(|e| e.to_node)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a plain no-turn forbids `from -> via -> to`.
    pub fn is_forbidden(&self, via: NodeId, from: NodeId, to: NodeId) -> bool {
        self.by_via
            .get(&via)
            .map(|entries| {
                entries
                    .iter()
                    .any(|e| !e.only && e.from_node == from && e.to_node == to)
            })
            .unwrap_or(false)
    }

    pub fn usable_count(&self) -> u64 {
        self.usable
    }

    pub fn unusable_count(&self) -> u64 {
        self.unusable
    }
}
