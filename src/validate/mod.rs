//! Correctness checks over the produced hierarchy.
//!
//! A plain Dijkstra over the edge-based graph is the baseline; the
//! bidirectional search over the contracted graph must match it exactly,
//! and every shortcut must unpack to an original-edge path of identical
//! weight. The integration suite drives these against the seed scenarios.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{PrepareError, Result};
use crate::graph::static_graph::StaticGraph;
use crate::graph::{EdgeBasedEdge, QueryEdge};

pub const UNREACHABLE: i64 = i64::MAX;

/// Single-source distances over the raw edge-based graph.
pub fn dijkstra_reference(num_nodes: u32, edges: &[EdgeBasedEdge], source: u32) -> Vec<i64> {
    let mut forward: Vec<Vec<(u32, i64)>> = vec![Vec::new(); num_nodes as usize];
    for edge in edges {
        if edge.forward {
            forward[edge.source as usize].push((edge.target, edge.weight as i64));
        }
        if edge.backward {
            forward[edge.target as usize].push((edge.source, edge.weight as i64));
        }
    }

    let mut dist = vec![UNREACHABLE; num_nodes as usize];
    let mut heap: BinaryHeap<Reverse<(i64, u32)>> = BinaryHeap::new();
    dist[source as usize] = 0;
    heap.push(Reverse((0, source)));
    while let Some(Reverse((d, node))) = heap.pop() {
        if d > dist[node as usize] {
            continue;
        }
        for &(target, weight) in &forward[node as usize] {
            let next = d + weight;
            if next < dist[target as usize] {
                dist[target as usize] = next;
                heap.push(Reverse((next, target)));
            }
        }
    }
    dist
}

/// Bidirectional Dijkstra over the contracted graph's two-sided storage.
/// The forward search relaxes forward-flagged entries, the backward search
/// backward-flagged ones; both searches meet in the middle.
pub fn ch_distance(graph: &StaticGraph, source: u32, target: u32) -> i64 {
    let n = graph.num_nodes() as usize;
    if source as usize >= n || target as usize >= n {
        return UNREACHABLE;
    }
    if source == target {
        return 0;
    }

    let mut dist_fwd = vec![UNREACHABLE; n];
    let mut dist_bwd = vec![UNREACHABLE; n];
    let mut heap_fwd: BinaryHeap<Reverse<(i64, u32)>> = BinaryHeap::new();
    let mut heap_bwd: BinaryHeap<Reverse<(i64, u32)>> = BinaryHeap::new();
    dist_fwd[source as usize] = 0;
    dist_bwd[target as usize] = 0;
    heap_fwd.push(Reverse((0, source)));
    heap_bwd.push(Reverse((0, target)));

    let mut best = UNREACHABLE;
    loop {
        let top_fwd = heap_fwd.peek().map(|Reverse((d, _))| *d);
        let top_bwd = heap_bwd.peek().map(|Reverse((d, _))| *d);
        // Once one direction is exhausted, remaining meets come from the
        // other side alone, so its frontier bounds the best total.
        let bound = match (top_fwd, top_bwd) {
            (Some(f), Some(b)) => f.saturating_add(b),
            (Some(f), None) => f,
            (None, Some(b)) => b,
            (None, None) => break,
        };
        if bound >= best {
            break;
        }
        let pop_forward = match (top_fwd, top_bwd) {
            (Some(f), Some(b)) => f <= b,
            (Some(_), None) => true,
            _ => false,
        };

        if pop_forward {
            let Reverse((d, node)) = heap_fwd.pop().expect("peeked entry");
            if d > dist_fwd[node as usize] {
                continue;
            }
            if dist_bwd[node as usize] != UNREACHABLE {
                best = best.min(d + dist_bwd[node as usize]);
            }
            for edge in graph.edges_of(node) {
                if !edge.data.forward {
                    continue;
                }
                let next = d + edge.data.distance as i64;
                if next < dist_fwd[edge.target as usize] {
                    dist_fwd[edge.target as usize] = next;
                    heap_fwd.push(Reverse((next, edge.target)));
                }
            }
        } else {
            let Reverse((d, node)) = heap_bwd.pop().expect("peeked entry");
            if d > dist_bwd[node as usize] {
                continue;
            }
            if dist_fwd[node as usize] != UNREACHABLE {
                best = best.min(d + dist_fwd[node as usize]);
            }
            for edge in graph.edges_of(node) {
                if !edge.data.backward {
                    continue;
                }
                let next = d + edge.data.distance as i64;
                if next < dist_bwd[edge.target as usize] {
                    dist_bwd[edge.target as usize] = next;
                    heap_bwd.push(Reverse((next, edge.target)));
                }
            }
        }
    }
    best
}

/// Checks that every shortcut in the edge set unpacks recursively into
/// original edges of identical total weight.
pub fn verify_shortcut_unpacking(edges: &[QueryEdge]) -> Result<()> {
    let mut forward_index: HashMap<(u32, u32), Vec<&QueryEdge>> = HashMap::new();
    for edge in edges {
        if edge.data.forward {
            forward_index.entry((edge.source, edge.target)).or_default().push(edge);
        }
        if edge.data.backward {
            forward_index.entry((edge.target, edge.source)).or_default().push(edge);
        }
    }

    for edge in edges {
        if !edge.data.shortcut {
            continue;
        }
        let (from, to) = if edge.data.forward {
            (edge.source, edge.target)
        } else {
            (edge.target, edge.source)
        };
        unpack(&forward_index, from, to, edge.data.distance as i64, 0)?;
    }
    Ok(())
}

fn unpack(
    index: &HashMap<(u32, u32), Vec<&QueryEdge>>,
    from: u32,
    to: u32,
    weight: i64,
    recursion: u32,
) -> Result<()> {
    if recursion > 64 {
        return Err(PrepareError::InternalInvariant(format!(
            "shortcut unpacking recursion too deep at {from} -> {to}"
        )));
    }
    let candidates = index.get(&(from, to)).map(Vec::as_slice).unwrap_or(&[]);

    // An original edge of matching weight settles the segment.
    if candidates.iter().any(|e| !e.data.shortcut && e.data.distance as i64 == weight) {
        return Ok(());
    }
    // Otherwise a shortcut of matching weight must split over its middle.
    for candidate in candidates {
        if !candidate.data.shortcut || candidate.data.distance as i64 != weight {
            continue;
        }
        let middle = candidate.data.id;
        let first_legs = index.get(&(from, middle)).map(Vec::as_slice).unwrap_or(&[]);
        for leg in first_legs {
            let leg_weight = leg.data.distance as i64;
            if leg_weight >= weight {
                continue;
            }
            let rest = weight - leg_weight;
            if unpack(index, from, middle, leg_weight, recursion + 1).is_ok()
                && unpack(index, middle, to, rest, recursion + 1).is_ok()
            {
                return Ok(());
            }
        }
    }
    Err(PrepareError::InternalInvariant(format!(
        "shortcut {from} -> {to} (weight {weight}) does not unpack to original edges"
    )))
}

/// CSR well-formedness: monotonic offsets closed by the sentinel.
pub fn verify_csr(graph: &StaticGraph) -> Result<()> {
    if graph.first_edge.is_empty() {
        return Err(PrepareError::InternalInvariant("empty offset array".to_string()));
    }
    for (i, window) in graph.first_edge.windows(2).enumerate() {
        if window[0] > window[1] {
            return Err(PrepareError::InternalInvariant(format!(
                "offset array decreases at node {i}"
            )));
        }
    }
    let sentinel = *graph.first_edge.last().expect("non-empty offsets");
    if sentinel as usize != graph.edges.len() {
        return Err(PrepareError::InternalInvariant(format!(
            "sentinel {sentinel} does not close {} edges",
            graph.edges.len()
        )));
    }
    Ok(())
}
