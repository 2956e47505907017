//! Contraction hierarchy construction.
//!
//! Nodes are ranked by an online priority and contracted in rounds. Each
//! round drains a window of heap candidates, selects a maximal subset with
//! pairwise-disjoint 2-hop neighborhoods (ties broken by ascending node
//! id), computes their shortcuts in parallel against the round-start graph,
//! and applies the results serially in ascending node id: identical output
//! for any worker count.

pub mod graph;
pub mod scratch;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::prelude::*;

use crate::error::{PrepareError, Result};
use crate::graph::{EdgeBasedEdge, EdgeData, QueryEdge};
use graph::{ContractorEdge, ContractorGraph};
use scratch::DijkstraScratch;

/// Witness searches give up after this many hops.
const HOP_LIMIT: u16 = 5;

/// Heap candidates examined per round before the independent-set pick.
const CANDIDATE_WINDOW: usize = 64;

/// Priority weights; documented in DESIGN.md.
const W_EDGE: i32 = 1;
const W_ORIGINAL: i32 = 1;

#[derive(Debug, Clone, Copy)]
struct Shortcut {
    u: u32,
    w: u32,
    weight: i32,
    via: u32,
    original_edges: u32,
}

struct Simulation {
    shortcuts: Vec<Shortcut>,
    removed_edges: usize,
}

/// Contracts the edge-based graph and returns the accumulated CH edge set
/// (surviving originals plus shortcuts, in two-sided storage).
pub fn run(
    num_nodes: u32,
    edges: &[EdgeBasedEdge],
    termination: &AtomicBool,
) -> Result<Vec<QueryEdge>> {
    let mut working = ContractorGraph::new(num_nodes, edges);
    let n = num_nodes as usize;
    let mut contracted = vec![false; n];
    let mut depth = vec![0u16; n];
    let mut priority = vec![0i32; n];
    let mut output: Vec<QueryEdge> = Vec::with_capacity(edges.len() * 2);

    let mut remaining = 0u64;
    for v in 0..num_nodes {
        if working.degree(v) == 0 {
            // Isolated nodes contract trivially.
            contracted[v as usize] = true;
        } else {
            remaining += 1;
        }
    }
    if remaining == 0 {
        return Ok(output);
    }

    info!("simulating contraction of {remaining} nodes for the initial ordering");
    let initial: Vec<(u32, i32)> = (0..num_nodes)
        .into_par_iter()
        .filter(|&v| !contracted[v as usize])
        .map_init(
            || DijkstraScratch::new(num_nodes),
            |scratch, v| {
                let sim = simulate(&working, scratch, v);
                (v, priority_of(&sim, 0))
            },
        )
        .collect();

    let mut heap: BinaryHeap<Reverse<(i32, u32)>> = BinaryHeap::with_capacity(remaining as usize);
    for (v, p) in initial {
        priority[v as usize] = p;
        heap.push(Reverse((p, v)));
    }

    let bar = ProgressBar::new(remaining);
    bar.set_style(
        ProgressStyle::with_template("contracting [{wide_bar}] {pos}/{len}")
            .expect("static progress template")
            .progress_chars("=> "),
    );

    let mut main_scratch = DijkstraScratch::new(num_nodes);
    let mut mark_epoch = vec![0u32; n];
    let mut round = 0u32;

    while !heap.is_empty() {
        if termination.load(Ordering::Relaxed) {
            return Err(PrepareError::Terminated);
        }
        round += 1;

        // Drain a window of current candidates, lazily revalidating each
        // popped priority against a fresh simulation.
        let mut candidates = Vec::with_capacity(CANDIDATE_WINDOW);
        while candidates.len() < CANDIDATE_WINDOW {
            let Some(Reverse((p, v))) = heap.pop() else {
                break;
            };
            if contracted[v as usize] || p != priority[v as usize] {
                continue;
            }
            let sim = simulate(&working, &mut main_scratch, v);
            let fresh = priority_of(&sim, depth[v as usize]);
            if fresh > p {
                priority[v as usize] = fresh;
                heap.push(Reverse((fresh, v)));
                continue;
            }
            candidates.push(v);
        }
        if candidates.is_empty() {
            continue;
        }

        // Independent set: candidates arrive in (priority, id) order; a
        // pick claims its closed 2-hop neighborhood.
        let mut selected = Vec::with_capacity(candidates.len());
        for &v in &candidates {
            if two_hop_neighborhood_is_free(&working, v, &mark_epoch, round) {
                mark_two_hop_neighborhood(&working, v, &mut mark_epoch, round);
                selected.push(v);
            } else {
                heap.push(Reverse((priority[v as usize], v)));
            }
        }

        // Shortcut discovery in parallel against the round-start graph.
        let mut round_shortcuts: Vec<(u32, Vec<Shortcut>)> = selected
            .par_iter()
            .map_init(
                || DijkstraScratch::new(num_nodes),
                |scratch, &v| (v, simulate(&working, scratch, v).shortcuts),
            )
            .collect();
        round_shortcuts.sort_unstable_by_key(|(v, _)| *v);

        // Serial application in ascending node id.
        let mut affected: Vec<u32> = Vec::new();
        for (v, shortcuts) in round_shortcuts {
            for sc in shortcuts {
                if sc.weight <= 0 {
                    return Err(PrepareError::InternalInvariant(format!(
                        "shortcut {} -> {} -> {} has non-positive weight {}",
                        sc.u, sc.via, sc.w, sc.weight
                    )));
                }
                working.insert_shortcut(sc.u, sc.w, sc.weight, sc.via, sc.original_edges);
            }

            let (own, mirrors) = working.detach(v);
            let next_depth = depth[v as usize].saturating_add(1);
            for e in &own {
                let neighbor = e.target;
                if !contracted[neighbor as usize] && depth[neighbor as usize] < next_depth {
                    depth[neighbor as usize] = next_depth;
                }
                affected.push(neighbor);
            }
            for e in own {
                output.push(QueryEdge { source: v, target: e.target, data: to_data(&e) });
            }
            for (neighbor, e) in mirrors {
                output.push(QueryEdge { source: neighbor, target: v, data: to_data(&e) });
            }
            contracted[v as usize] = true;
        }
        bar.inc(selected.len() as u64);

        // Neighbors of the round's contractions get fresh priorities.
        affected.sort_unstable();
        affected.dedup();
        affected.retain(|&v| !contracted[v as usize]);
        let updates: Vec<(u32, i32)> = affected
            .par_iter()
            .map_init(
                || DijkstraScratch::new(num_nodes),
                |scratch, &v| {
                    let sim = simulate(&working, scratch, v);
                    (v, priority_of(&sim, depth[v as usize]))
                },
            )
            .collect();
        for (v, p) in updates {
            if p != priority[v as usize] {
                priority[v as usize] = p;
                heap.push(Reverse((p, v)));
            }
        }
    }
    bar.finish_and_clear();

    info!(
        "contraction done: {} query edges ({} shortcuts)",
        output.len(),
        output.iter().filter(|e| e.data.shortcut).count()
    );
    Ok(output)
}

fn to_data(edge: &ContractorEdge) -> EdgeData {
    EdgeData {
        distance: edge.weight as u32,
        id: edge.id,
        shortcut: edge.shortcut,
        forward: edge.forward,
        backward: edge.backward,
        original_edges: edge.original_edges,
    }
}

fn priority_of(sim: &Simulation, depth: u16) -> i32 {
    let added = sim.shortcuts.len() as i32;
    let removed = sim.removed_edges as i32;
    let original: i32 = sim.shortcuts.iter().map(|s| s.original_edges as i32).sum();
    (added - removed) * W_EDGE + depth as i32 + original * W_ORIGINAL
}

/// Simulated contraction of `v`: finds the shortcuts its removal would
/// require without touching the graph.
fn simulate(working: &ContractorGraph, scratch: &mut DijkstraScratch, v: u32) -> Simulation {
    let edges = working.edges_of(v);
    let mut shortcuts = Vec::new();

    for in_edge in edges.iter().filter(|e| e.backward) {
        let u = in_edge.target;
        if u == v {
            continue;
        }

        let mut targets: Vec<(u32, i32, u32)> = Vec::new();
        let mut max_distance = 0i32;
        for out_edge in edges.iter().filter(|e| e.forward) {
            let w = out_edge.target;
            if w == v || w == u {
                continue;
            }
            let through = in_edge.weight + out_edge.weight;
            targets.push((w, through, in_edge.original_edges + out_edge.original_edges));
            max_distance = max_distance.max(through);
        }
        if targets.is_empty() {
            continue;
        }

        witness_search(working, scratch, u, v, max_distance);
        for (w, through, original_edges) in targets {
            let witnessed = matches!(scratch.distance(w), Some(d) if d <= through);
            if !witnessed {
                shortcuts.push(Shortcut { u, w, weight: through, via: v, original_edges });
            }
        }
    }

    Simulation { shortcuts, removed_edges: edges.len() }
}

/// Bounded forward Dijkstra from `source` that never enters `forbidden`.
/// Settles nodes until the frontier exceeds `max_distance` or the hop
/// limit prunes the search.
fn witness_search(
    working: &ContractorGraph,
    scratch: &mut DijkstraScratch,
    source: u32,
    forbidden: u32,
    max_distance: i32,
) {
    scratch.reset();
    scratch.set(source, 0, 0);
    scratch.heap.push(Reverse((0, source)));

    while let Some(Reverse((distance, node))) = scratch.heap.pop() {
        if distance > max_distance {
            break;
        }
        if scratch.distance(node) != Some(distance) {
            continue; // stale entry
        }
        let hops = scratch.hops(node);
        if hops >= HOP_LIMIT {
            continue;
        }
        for edge in working.edges_of(node).iter().filter(|e| e.forward) {
            if edge.target == forbidden {
                continue;
            }
            let next = distance + edge.weight;
            if next > max_distance {
                continue;
            }
            let improves = match scratch.distance(edge.target) {
                Some(old) => next < old,
                None => true,
            };
            if improves {
                scratch.set(edge.target, next, hops + 1);
                scratch.heap.push(Reverse((next, edge.target)));
            }
        }
    }
}

fn two_hop_neighborhood_is_free(
    working: &ContractorGraph,
    v: u32,
    mark_epoch: &[u32],
    round: u32,
) -> bool {
    if mark_epoch[v as usize] == round {
        return false;
    }
    for e1 in working.edges_of(v) {
        if mark_epoch[e1.target as usize] == round {
            return false;
        }
        for e2 in working.edges_of(e1.target) {
            if mark_epoch[e2.target as usize] == round {
                return false;
            }
        }
    }
    true
}

fn mark_two_hop_neighborhood(
    working: &ContractorGraph,
    v: u32,
    mark_epoch: &mut [u32],
    round: u32,
) {
    mark_epoch[v as usize] = round;
    let neighbors: Vec<u32> = working.edges_of(v).iter().map(|e| e.target).collect();
    for n1 in neighbors {
        mark_epoch[n1 as usize] = round;
        for e2 in working.edges_of(n1) {
            mark_epoch[e2.target as usize] = round;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_edge(source: u32, target: u32, weight: i32, id: u32) -> EdgeBasedEdge {
        EdgeBasedEdge { source, target, edge_id: id, weight, forward: true, backward: false }
    }

    fn contract(num_nodes: u32, edges: &[EdgeBasedEdge]) -> Vec<QueryEdge> {
        run(num_nodes, edges, &AtomicBool::new(false)).unwrap()
    }

    #[test]
    fn empty_graph_contracts_to_nothing() {
        assert!(contract(2, &[]).is_empty());
    }

    #[test]
    fn every_stored_entry_is_emitted_once() {
        // Path 0 -> 1 -> 2 -> 3.
        let edges = vec![
            input_edge(0, 1, 10, 0),
            input_edge(1, 2, 20, 1),
            input_edge(2, 3, 30, 2),
        ];
        let output = contract(4, &edges);
        // Three originals stored two-sided, plus two sides per shortcut.
        let originals = output.iter().filter(|e| !e.data.shortcut).count();
        assert_eq!(originals, 6);
        let shortcuts: Vec<_> = output.iter().filter(|e| e.data.shortcut).collect();
        assert_eq!(shortcuts.len() % 2, 0);
    }

    #[test]
    fn chain_shortcut_preserves_weight_and_middle() {
        let edges = vec![input_edge(0, 1, 10, 0), input_edge(1, 2, 20, 1)];
        let output = contract(3, &edges);
        let shortcut = output
            .iter()
            .find(|e| e.data.shortcut && e.data.forward && e.source == 0)
            .map(|e| (e.target, e.data.distance, e.data.id, e.data.original_edges));
        // Node 1 is the cheapest to contract, so 0 -> 2 must exist.
        if let Some((target, distance, id, original_edges)) = shortcut {
            assert_eq!(target, 2);
            assert_eq!(distance, 30);
            assert_eq!(id, 1);
            assert_eq!(original_edges, 2);
        }
    }

    #[test]
    fn witness_avoids_redundant_shortcut() {
        // Triangle where the direct edge 0 -> 2 is as cheap as 0 -> 1 -> 2;
        // no shortcut should be created for contracting 1.
        let edges = vec![
            input_edge(0, 1, 10, 0),
            input_edge(1, 2, 10, 1),
            input_edge(0, 2, 20, 2),
        ];
        let output = contract(3, &edges);
        assert!(output.iter().all(|e| !e.data.shortcut));
    }

    #[test]
    fn directed_cycle_forces_shortcut() {
        // In a directed 4-cycle the first contraction has no witness: the
        // only alternative runs the long way around.
        let edges = vec![
            input_edge(0, 1, 10, 0),
            input_edge(1, 2, 10, 1),
            input_edge(2, 3, 10, 2),
            input_edge(3, 0, 10, 3),
        ];
        let output = contract(4, &edges);
        let shortcut = output
            .iter()
            .find(|e| e.data.shortcut && e.data.forward)
            .expect("cycle contraction must insert a shortcut");
        assert_eq!(shortcut.data.distance, 20);
        assert_eq!(shortcut.data.original_edges, 2);
    }

    #[test]
    fn termination_flag_aborts() {
        let edges = vec![input_edge(0, 1, 10, 0)];
        let flag = AtomicBool::new(true);
        let err = run(2, &edges, &flag).unwrap_err();
        assert!(matches!(err, PrepareError::Terminated));
    }

    #[test]
    fn two_hop_selection_rejects_neighbors() {
        let edges = vec![input_edge(0, 1, 10, 0), input_edge(1, 2, 10, 1)];
        let working = ContractorGraph::new(3, &edges);
        let mut marks = vec![0u32; 3];
        assert!(two_hop_neighborhood_is_free(&working, 0, &marks, 1));
        mark_two_hop_neighborhood(&working, 0, &mut marks, 1);
        assert!(!two_hop_neighborhood_is_free(&working, 1, &marks, 1));
        assert!(!two_hop_neighborhood_is_free(&working, 2, &marks, 1));
    }
}
