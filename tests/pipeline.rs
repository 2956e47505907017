//! End-to-end scenarios over the full pipeline and its artifacts.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use tempfile::TempDir;

use osprey_prepare::cli::{artifact, run_pipeline, RunSummary};
use osprey_prepare::contractor;
use osprey_prepare::ebg;
use osprey_prepare::error::PrepareError;
use osprey_prepare::formats::edges::records_checksum;
use osprey_prepare::formats::node_graph::NodeBasedGraph;
use osprey_prepare::formats::{EdgesFile, NodeGraphFile, QueryGraphFile, RestrictionsFile};
use osprey_prepare::graph::{EdgeBasedEdge, ImportEdge, NodeInfo, TurnRestriction};
use osprey_prepare::profile::{SpeedProfile, TurnCostFunction};
use osprey_prepare::rtree::StaticRTree;
use osprey_prepare::temp_storage::TempStorage;
use osprey_prepare::validate;

fn node(external_id: u64, lat: i32, lon: i32) -> NodeInfo {
    NodeInfo { external_id, lat, lon, bollard: false, traffic_light: false }
}

fn edge(source: u32, target: u32) -> ImportEdge {
    ImportEdge {
        source,
        target,
        distance: 100,
        forward: true,
        backward: true,
        name_id: 0,
        road_type: 3,
        roundabout: false,
        ignore_in_grid: false,
        speed: 36, // 100 m at 36 km/h = 100 deci-seconds
    }
}

struct Fixture {
    dir: TempDir,
    osrm: PathBuf,
    restrictions: PathBuf,
    profile: PathBuf,
}

impl Fixture {
    fn new(
        nodes: &[NodeInfo],
        edges: &[ImportEdge],
        restrictions: &[TurnRestriction],
        profile_text: &str,
    ) -> Fixture {
        let dir = TempDir::new().unwrap();
        let osrm = dir.path().join("map.osrm");
        let restrictions_path = dir.path().join("map.osrm.restrictions");
        let profile = dir.path().join("profile.lua");

        NodeGraphFile::write(&osrm, nodes, edges).unwrap();
        RestrictionsFile::write(&restrictions_path, restrictions).unwrap();
        std::fs::write(&profile, profile_text).unwrap();

        Fixture { dir, osrm, restrictions: restrictions_path, profile }
    }

    fn run(&self) -> anyhow::Result<RunSummary> {
        run_pipeline(&self.osrm, &self.restrictions, &self.profile, &AtomicBool::new(false))
    }
}

const DEFAULT_PROFILE: &str = "traffic_signal_penalty = 0\nu_turn_penalty = 20\n";

fn default_profile() -> SpeedProfile {
    SpeedProfile {
        traffic_signal_penalty: 0,
        u_turn_penalty: 200,
        turn_cost: TurnCostFunction::Zero,
    }
}

fn expand_in_memory(
    nodes: &[NodeInfo],
    edges: &[ImportEdge],
    restrictions: &[TurnRestriction],
    profile: &SpeedProfile,
) -> (ebg::ExpansionResult, Vec<EdgeBasedEdge>) {
    let graph = NodeBasedGraph {
        node_infos: nodes.to_vec(),
        bollard_nodes: nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.bollard)
            .map(|(i, _)| i as u32)
            .collect(),
        traffic_light_nodes: nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.traffic_light)
            .map(|(i, _)| i as u32)
            .collect(),
        edges: edges.to_vec(),
        skipped_records: 0,
    };
    let mut storage = TempStorage::new();
    let result = ebg::expand(&graph, restrictions, profile, &mut storage).unwrap();
    let stream =
        ebg::read_edge_stream(&storage, result.edge_slot, result.num_edge_based_edges).unwrap();
    (result, stream)
}

/// 5x5 grid, bidirectional uniform edges, nodes at (r * 1000, c * 1000).
fn grid_5x5() -> (Vec<NodeInfo>, Vec<ImportEdge>) {
    let mut nodes = Vec::new();
    for r in 0..5i32 {
        for c in 0..5i32 {
            nodes.push(node((r * 5 + c) as u64 + 100, r * 1000, c * 1000));
        }
    }
    let id = |r: u32, c: u32| r * 5 + c;
    let mut edges = Vec::new();
    for r in 0..5 {
        for c in 0..5 {
            if c + 1 < 5 {
                edges.push(edge(id(r, c), id(r, c + 1)));
            }
            if r + 1 < 5 {
                edges.push(edge(id(r, c), id(r + 1, c)));
            }
        }
    }
    (nodes, edges)
}

#[test]
fn scenario_two_nodes_one_bidirectional_edge() {
    let fixture = Fixture::new(
        &[node(10, 0, 0), node(11, 100, 0)],
        &[edge(0, 1)],
        &[],
        DEFAULT_PROFILE,
    );
    let summary = fixture.run().unwrap();
    assert_eq!(summary.edge_based_nodes, 2);
    assert_eq!(summary.edge_based_edges, 0);
    assert_eq!(summary.query_edges, 0);

    let (graph, checksum) = QueryGraphFile::read(artifact(&fixture.osrm, ".hsgr")).unwrap();
    assert_eq!(graph.first_edge.len(), 3); // two nodes plus the sentinel
    assert!(graph.edges.is_empty());
    assert_eq!(checksum, summary.checksum);
}

#[test]
fn scenario_triangle_with_no_turn() {
    let nodes = vec![node(1, 0, 0), node(2, 0, 1000), node(3, 1000, 500)];
    let edges = vec![edge(0, 1), edge(1, 2), edge(2, 0)];
    let restriction = TurnRestriction { from_node: 0, via_node: 1, to_node: 2, only: false };

    let (unrestricted, unrestricted_stream) =
        expand_in_memory(&nodes, &edges, &[], &default_profile());
    let (restricted, restricted_stream) =
        expand_in_memory(&nodes, &edges, &[restriction], &default_profile());

    // Exactly the eb(0->1) -> eb(1->2) edge disappears.
    assert_eq!(restricted_stream.len(), unrestricted_stream.len() - 1);
    let from = restricted.edge_based_nodes[0].forward_id;
    let to = restricted.edge_based_nodes[1].forward_id;
    assert!(unrestricted_stream.iter().any(|e| e.source == from && e.target == to));
    assert!(!restricted_stream.iter().any(|e| e.source == from && e.target == to));

    // The journey 0 -> 2 still works on the direct segment: the edge-based
    // node of 0 -> 2 is reachable as a start, and the restricted graph
    // leaves every other turn intact.
    assert_eq!(unrestricted.num_edge_based_nodes, restricted.num_edge_based_nodes);

    // End-to-end the pipeline accepts the restricted input.
    let fixture = Fixture::new(&nodes, &edges, &[restriction], DEFAULT_PROFILE);
    let summary = fixture.run().unwrap();
    assert_eq!(summary.usable_restrictions, 1);
    assert_eq!(summary.edge_based_edges, restricted_stream.len() as u64);
}

#[test]
fn scenario_chain_with_traffic_signal() {
    let mut nodes = vec![node(1, 0, 0), node(2, 0, 1000), node(3, 0, 2000)];
    nodes[1].traffic_light = true;
    let edges = vec![edge(0, 1), edge(1, 2)];

    // Signal penalty 50 in the profile is stored as 500 deci-seconds.
    let profile = SpeedProfile {
        traffic_signal_penalty: 500,
        u_turn_penalty: 200,
        turn_cost: TurnCostFunction::Zero,
    };
    let (result, stream) = expand_in_memory(&nodes, &edges, &[], &profile);

    let from = result.edge_based_nodes[0].forward_id;
    let to = result.edge_based_nodes[1].forward_id;
    let turn = stream
        .iter()
        .find(|e| e.source == from && e.target == to)
        .expect("through turn missing");
    assert_eq!(turn.weight, 100 + 500);

    // Total journey cost onto the end of segment 1 -> 2: 100 + 500 + 100.
    let reference = validate::dijkstra_reference(result.num_edge_based_nodes, &stream, from);
    let tail = edges[1].duration_ds() as i64;
    assert_eq!(reference[to as usize] + tail, 700);
}

#[test]
fn scenario_bollard_blocks_everything() {
    let mut nodes = vec![node(1, 0, 0), node(2, 0, 1000), node(3, 0, 2000)];
    nodes[1].bollard = true;
    let fixture = Fixture::new(&nodes, &[edge(0, 1), edge(1, 2)], &[], DEFAULT_PROFILE);
    let summary = fixture.run().unwrap();
    assert_eq!(summary.edge_based_nodes, 4);
    assert_eq!(summary.edge_based_edges, 0);

    let (graph, _) = QueryGraphFile::read(artifact(&fixture.osrm, ".hsgr")).unwrap();
    assert!(graph.edges.is_empty());
    assert_eq!(graph.first_edge.len(), 5);
}

#[test]
fn scenario_grid_ch_matches_dijkstra() {
    let (nodes, edges) = grid_5x5();
    let (result, stream) = expand_in_memory(&nodes, &edges, &[], &default_profile());

    // P1: every directed segment becomes an edge-based node, and each
    // intersection of degree d contributes d * (d - 1) turns.
    assert_eq!(result.num_edge_based_nodes, 80);
    assert_eq!(stream.len(), 188);

    let ch_edges = contractor::run(
        result.num_edge_based_nodes,
        &stream,
        &AtomicBool::new(false),
    )
    .unwrap();
    validate::verify_shortcut_unpacking(&ch_edges).unwrap();

    let mut sorted = ch_edges;
    sorted.sort();
    let graph =
        osprey_prepare::graph::static_graph::StaticGraph::build(result.num_edge_based_nodes, &sorted)
            .unwrap();
    validate::verify_csr(&graph).unwrap();

    // P3: all ordered pairs agree with the plain Dijkstra baseline.
    for source in 0..result.num_edge_based_nodes {
        let reference = validate::dijkstra_reference(result.num_edge_based_nodes, &stream, source);
        for target in 0..result.num_edge_based_nodes {
            if source == target {
                continue;
            }
            assert_eq!(
                validate::ch_distance(&graph, source, target),
                reference[target as usize],
                "distance {source} -> {target}"
            );
        }
    }
}

#[test]
fn scenario_crc_drift_is_detected() {
    let fixture = Fixture::new(
        &[node(1, 0, 0), node(2, 0, 1000), node(3, 1000, 500)],
        &[edge(0, 1), edge(1, 2), edge(2, 0)],
        &[],
        DEFAULT_PROFILE,
    );
    fixture.run().unwrap();

    let hsgr = artifact(&fixture.osrm, ".hsgr");
    let edges_path = artifact(&fixture.osrm, ".edges");

    // Loading the intact pair succeeds.
    QueryGraphFile::load_checked(&hsgr, &edges_path).unwrap();

    // Flip one byte inside the record region (after the 16-byte stamp and
    // the 4-byte count).
    let mut bytes = std::fs::read(&edges_path).unwrap();
    bytes[24] ^= 0xFF;
    std::fs::write(&edges_path, &bytes).unwrap();

    let err = QueryGraphFile::load_checked(&hsgr, &edges_path).unwrap_err();
    assert!(matches!(err, PrepareError::ChecksumMismatch { .. }), "got {err}");
}

#[test]
fn artifact_checksum_matches_edge_records() {
    // P7: the hsgr header checksum equals a fresh CRC32 over the records.
    let (nodes, edges) = grid_5x5();
    let fixture = Fixture::new(&nodes, &edges, &[], DEFAULT_PROFILE);
    let summary = fixture.run().unwrap();

    let (records, _, _) = EdgesFile::read(artifact(&fixture.osrm, ".edges")).unwrap();
    assert_eq!(records_checksum(&records), summary.checksum);

    let (_, header_checksum, _) =
        QueryGraphFile::read_header(artifact(&fixture.osrm, ".hsgr")).unwrap();
    assert_eq!(header_checksum, summary.checksum);
}

#[test]
fn rtree_returns_the_segment_at_its_midpoint() {
    // P6 over the artifacts the pipeline actually wrote.
    let (nodes, edges) = grid_5x5();
    let fixture = Fixture::new(&nodes, &edges, &[], DEFAULT_PROFILE);
    fixture.run().unwrap();

    let (records, _, _) = EdgesFile::read(artifact(&fixture.osrm, ".edges")).unwrap();
    let mut tree = StaticRTree::open(
        artifact(&fixture.osrm, ".ramIndex"),
        artifact(&fixture.osrm, ".fileIndex"),
    )
    .unwrap();
    for record in &records {
        let (lat, lon) = record.midpoint();
        let hit = tree.find_nearest(lat, lon).unwrap().expect("nearest record");
        assert_eq!(hit.forward_id, record.forward_id);
    }
}

#[test]
fn determinism_two_runs_byte_identical() {
    // P8: identical input and thread count give identical artifacts.
    let (nodes, edges) = grid_5x5();
    let first = Fixture::new(&nodes, &edges, &[], DEFAULT_PROFILE);
    let second = Fixture::new(&nodes, &edges, &[], DEFAULT_PROFILE);
    first.run().unwrap();
    second.run().unwrap();

    for suffix in [".nodes", ".edges", ".hsgr", ".ramIndex", ".fileIndex"] {
        let a = std::fs::read(artifact(&first.osrm, suffix)).unwrap();
        let b = std::fs::read(artifact(&second.osrm, suffix)).unwrap();
        assert_eq!(a, b, "artifact {suffix} differs between runs");
    }
}

#[test]
fn missing_input_fails_without_leftovers() {
    let dir = TempDir::new().unwrap();
    let osrm = dir.path().join("absent.osrm");
    let restrictions = dir.path().join("absent.osrm.restrictions");
    let profile = dir.path().join("profile.lua");
    std::fs::write(&profile, DEFAULT_PROFILE).unwrap();
    RestrictionsFile::write(&restrictions, &[]).unwrap();

    let err = run_pipeline(&osrm, &restrictions, &profile, &AtomicBool::new(false)).unwrap_err();
    assert!(err.to_string().contains("node-based graph"), "got {err:#}");
    assert!(!artifact(&osrm, ".hsgr").exists());
    assert!(!artifact(&osrm, ".nodes").exists());
}

#[test]
fn empty_graph_is_fatal() {
    let fixture = Fixture::new(&[node(1, 0, 0)], &[], &[], DEFAULT_PROFILE);
    let err = fixture.run().unwrap_err();
    assert!(err.to_string().contains("impossible to do any turns"), "got {err:#}");
    // Partial artifacts are cleaned up.
    assert!(!artifact(&fixture.osrm, ".hsgr").exists());
    let _ = &fixture.dir;
}

#[test]
fn unusable_restrictions_are_counted_not_fatal() {
    let nodes = vec![node(1, 0, 0), node(2, 0, 1000), node(3, 0, 2000)];
    let edges = vec![edge(0, 1), edge(1, 2)];
    let restrictions = vec![
        // via node out of range
        TurnRestriction { from_node: 0, via_node: 99, to_node: 2, only: false },
        // to-edge not incident to the via node
        TurnRestriction { from_node: 0, via_node: 1, to_node: 0xBEEF, only: false },
    ];
    let fixture = Fixture::new(&nodes, &edges, &restrictions, DEFAULT_PROFILE);
    let summary = fixture.run().unwrap();
    assert_eq!(summary.unusable_restrictions, 2);
    assert_eq!(summary.usable_restrictions, 0);
    // The graph is untouched by unusable records.
    assert_eq!(summary.edge_based_edges, 2);
}
