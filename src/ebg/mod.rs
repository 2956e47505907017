//! Edge-expanded graph construction.
//!
//! Every directed node-based edge becomes an edge-based node; every legal
//! turn at an intersection becomes an edge-based edge weighted with the
//! traversal duration of the incoming segment plus turn penalties. Turn
//! legality consults bollards, no-/only-turn restrictions, and the u-turn
//! policy. The edge list is streamed into a temp-storage slot for the
//! contractor to re-read.

pub mod restrictions;

use log::{info, warn};
use rayon::prelude::*;

use crate::error::{PrepareError, Result};
use crate::formats::node_graph::NodeBasedGraph;
use crate::formats::TurnData;
use crate::geo::{bearing_deg, turn_angle};
use crate::graph::{EdgeBasedEdge, EdgeBasedNode, NodeId, INVALID_NODE};
use crate::profile::SpeedProfile;
use crate::temp_storage::{SlotId, TempStorage};
use restrictions::RestrictionMap;

/// Components smaller than this are flagged so snapping can avoid them.
const TINY_COMPONENT_SIZE: usize = 1_000;

const EDGE_RECORD_LEN: usize = 17;

#[derive(Debug)]
pub struct ExpansionResult {
    pub edge_based_nodes: Vec<EdgeBasedNode>,
    pub turns: Vec<TurnData>,
    pub num_edge_based_nodes: u32,
    /// Temp slot holding the serialized edge-based edge stream.
    pub edge_slot: SlotId,
    pub num_edge_based_edges: u64,
    pub usable_restrictions: u64,
    pub unusable_restrictions: u64,
}

#[derive(Debug, Clone, Copy)]
struct DirectedEdge {
    other: NodeId,
    eb_id: u32,
    import_idx: u32,
}

/// Runs the expansion. Fails when the input graph has no edges at all;
/// a graph that simply permits no turns is fine.
pub fn expand(
    graph: &NodeBasedGraph,
    restrictions: &[crate::graph::TurnRestriction],
    profile: &SpeedProfile,
    storage: &mut TempStorage,
) -> Result<ExpansionResult> {
    if graph.edges.is_empty() {
        return Err(PrepareError::InternalInvariant(
            "impossible to do any turns in an empty graph".to_string(),
        ));
    }
    let num_nodes = graph.num_nodes() as usize;

    // Directed views: outgoing and incoming edges per node, and the
    // edge-based id assignment (forward first, then reverse, per edge).
    let mut out_edges: Vec<Vec<DirectedEdge>> = vec![Vec::new(); num_nodes];
    let mut in_edges: Vec<Vec<DirectedEdge>> = vec![Vec::new(); num_nodes];
    let mut next_eb_id = 0u32;
    let mut forward_ids = vec![INVALID_NODE; graph.edges.len()];
    let mut reverse_ids = vec![INVALID_NODE; graph.edges.len()];

    for (idx, edge) in graph.edges.iter().enumerate() {
        if edge.forward {
            forward_ids[idx] = next_eb_id;
            out_edges[edge.source as usize].push(DirectedEdge {
                other: edge.target,
                eb_id: next_eb_id,
                import_idx: idx as u32,
            });
            in_edges[edge.target as usize].push(DirectedEdge {
                other: edge.source,
                eb_id: next_eb_id,
                import_idx: idx as u32,
            });
            next_eb_id += 1;
        }
        if edge.backward {
            reverse_ids[idx] = next_eb_id;
            out_edges[edge.target as usize].push(DirectedEdge {
                other: edge.source,
                eb_id: next_eb_id,
                import_idx: idx as u32,
            });
            in_edges[edge.source as usize].push(DirectedEdge {
                other: edge.target,
                eb_id: next_eb_id,
                import_idx: idx as u32,
            });
            next_eb_id += 1;
        }
    }
    let num_edge_based_nodes = next_eb_id;
    info!("{num_edge_based_nodes} edge-based nodes from {} segments", graph.edges.len());

    let tiny_component = find_tiny_components(graph, num_nodes);

    let mut edge_based_nodes = Vec::with_capacity(graph.edges.len());
    for (idx, edge) in graph.edges.iter().enumerate() {
        let source_info = &graph.node_infos[edge.source as usize];
        let target_info = &graph.node_infos[edge.target as usize];
        edge_based_nodes.push(EdgeBasedNode {
            forward_id: forward_ids[idx],
            reverse_id: reverse_ids[idx],
            name_id: edge.name_id,
            lat1: source_info.lat,
            lon1: source_info.lon,
            lat2: target_info.lat,
            lon2: target_info.lon,
            belongs_to_tiny_cc: tiny_component[edge.source as usize],
            ignore_in_grid: edge.ignore_in_grid,
        });
    }

    let restriction_map = RestrictionMap::build(restrictions, num_nodes as u32, |via, node| {
        out_edges[via as usize].iter().any(|e| e.other == node)
            || in_edges[via as usize].iter().any(|e| e.other == node)
    });
    if restriction_map.unusable_count() > 0 {
        warn!("{} unusable restrictions dropped", restriction_map.unusable_count());
    }

    // Turn enumeration, parallel per via node. Chunk results are collected
    // in node order, so edge ids and file contents are deterministic.
    let per_node: Vec<Vec<(EdgeBasedEdge, TurnData)>> = (0..num_nodes)
        .into_par_iter()
        .map(|via| {
            expand_intersection(
                via as NodeId,
                graph,
                &in_edges[via],
                &out_edges[via],
                &restriction_map,
                profile,
            )
        })
        .collect();

    let edge_slot = storage.allocate_slot()?;
    let mut turns = Vec::new();
    let mut num_edge_based_edges = 0u64;
    let mut buffer = Vec::with_capacity(64 * EDGE_RECORD_LEN);
    for node_edges in per_node {
        for (mut edge, turn) in node_edges {
            edge.edge_id = num_edge_based_edges as u32;
            encode_edge(&edge, &mut buffer);
            turns.push(turn);
            num_edge_based_edges += 1;
            if buffer.len() >= 1 << 20 {
                storage.write_to_slot(edge_slot, &buffer)?;
                buffer.clear();
            }
        }
    }
    if !buffer.is_empty() {
        storage.write_to_slot(edge_slot, &buffer)?;
    }

    info!(
        "expansion produced {num_edge_based_edges} edge-based edges ({} usable restrictions)",
        restriction_map.usable_count()
    );

    Ok(ExpansionResult {
        edge_based_nodes,
        turns,
        num_edge_based_nodes,
        edge_slot,
        num_edge_based_edges,
        usable_restrictions: restriction_map.usable_count(),
        unusable_restrictions: restriction_map.unusable_count(),
    })
}

fn expand_intersection(
    via: NodeId,
    graph: &NodeBasedGraph,
    incoming: &[DirectedEdge],
    outgoing: &[DirectedEdge],
    restriction_map: &RestrictionMap,
    profile: &SpeedProfile,
) -> Vec<(EdgeBasedEdge, TurnData)> {
    let via_info = &graph.node_infos[via as usize];
    if via_info.bollard {
        return Vec::new();
    }

    let mut result = Vec::new();
    for in_edge in incoming {
        let only_targets = restriction_map.only_targets(via, in_edge.other);
        let in_import = &graph.edges[in_edge.import_idx as usize];
        let from_info = &graph.node_infos[in_edge.other as usize];
        let bearing_in = bearing_deg(from_info.lat, from_info.lon, via_info.lat, via_info.lon);

        for out_edge in outgoing {
            if out_edge.eb_id == in_edge.eb_id {
                // A self-loop traversed twice is not a turn.
                continue;
            }
            let is_uturn = out_edge.other == in_edge.other;
            if is_uturn && only_targets.is_empty() {
                // U-turns only exist where an only-turn forces them.
                continue;
            }
            if !only_targets.is_empty() && !only_targets.contains(&out_edge.other) {
                continue;
            }
            if restriction_map.is_forbidden(via, in_edge.other, out_edge.other) {
                continue;
            }

            let to_info = &graph.node_infos[out_edge.other as usize];
            let bearing_out = bearing_deg(via_info.lat, via_info.lon, to_info.lat, to_info.lon);

            let mut weight = in_import.duration_ds();
            weight += profile.turn_cost.cost(bearing_in, bearing_out);
            if via_info.traffic_light {
                weight += profile.traffic_signal_penalty;
            }
            if is_uturn {
                weight += profile.u_turn_penalty;
            }

            let out_import = &graph.edges[out_edge.import_idx as usize];
            result.push((
                EdgeBasedEdge {
                    source: in_edge.eb_id,
                    target: out_edge.eb_id,
                    edge_id: 0, // assigned when the stream is flattened
                    weight,
                    forward: true,
                    backward: false,
                },
                TurnData {
                    via_node: via,
                    name_id: out_import.name_id,
                    turn_instruction: turn_instruction(turn_angle(bearing_in, bearing_out), is_uturn),
                },
            ));
        }
    }
    result
}

/// Marks nodes of connected components below [`TINY_COMPONENT_SIZE`].
fn find_tiny_components(graph: &NodeBasedGraph, num_nodes: usize) -> Vec<bool> {
    let mut neighbors: Vec<Vec<NodeId>> = vec![Vec::new(); num_nodes];
    for edge in &graph.edges {
        neighbors[edge.source as usize].push(edge.target);
        neighbors[edge.target as usize].push(edge.source);
    }

    let mut tiny = vec![false; num_nodes];
    let mut visited = vec![false; num_nodes];
    let mut queue = std::collections::VecDeque::new();
    let mut component = Vec::new();

    for start in 0..num_nodes {
        if visited[start] {
            continue;
        }
        component.clear();
        visited[start] = true;
        queue.push_back(start);
        while let Some(node) = queue.pop_front() {
            component.push(node);
            for &next in &neighbors[node] {
                if !visited[next as usize] {
                    visited[next as usize] = true;
                    queue.push_back(next as usize);
                }
            }
        }
        if component.len() < TINY_COMPONENT_SIZE {
            for &node in &component {
                tiny[node] = true;
            }
        }
    }
    tiny
}

/// Coarse angle classification for the per-turn auxiliary data.
fn turn_instruction(angle: i16, is_uturn: bool) -> u8 {
    if is_uturn {
        return 5;
    }
    match angle {
        150..=210 => 1, // straight
        211..=240 => 8, // slight left
        241..=300 => 7, // left
        301..=359 => 6, // sharp left
        120..=149 => 2, // slight right
        60..=119 => 3,  // right
        _ => 4,         // sharp right
    }
}

pub fn encode_edge(edge: &EdgeBasedEdge, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&edge.source.to_le_bytes());
    buffer.extend_from_slice(&edge.target.to_le_bytes());
    buffer.extend_from_slice(&edge.edge_id.to_le_bytes());
    buffer.extend_from_slice(&edge.weight.to_le_bytes());
    buffer.push((edge.forward as u8) | ((edge.backward as u8) << 1));
}

pub fn decode_edge(record: &[u8; EDGE_RECORD_LEN]) -> EdgeBasedEdge {
    EdgeBasedEdge {
        source: u32::from_le_bytes(record[0..4].try_into().unwrap()),
        target: u32::from_le_bytes(record[4..8].try_into().unwrap()),
        edge_id: u32::from_le_bytes(record[8..12].try_into().unwrap()),
        weight: i32::from_le_bytes(record[12..16].try_into().unwrap()),
        forward: record[16] & 0b01 != 0,
        backward: record[16] & 0b10 != 0,
    }
}

/// Re-reads the edge stream a previous [`expand`] call wrote to `slot`.
pub fn read_edge_stream(
    storage: &TempStorage,
    slot: SlotId,
    count: u64,
) -> Result<Vec<EdgeBasedEdge>> {
    let mut edges = Vec::with_capacity(count as usize);
    let mut record = [0u8; EDGE_RECORD_LEN];
    for _ in 0..count {
        storage.read_from_slot(slot, &mut record)?;
        edges.push(decode_edge(&record));
    }
    Ok(edges)
}
