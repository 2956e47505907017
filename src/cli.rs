//! Command line and pipeline driver.
//!
//! Stage order follows the data flow: profile and inputs, edge expansion,
//! node map, edge records with their checksum, R-tree, contraction, query
//! graph. Large vectors are released the moment their consumer is done,
//! and any failure removes the artifacts written so far.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use serde::Serialize;

use crate::config;
use crate::contractor;
use crate::ebg;
use crate::error::PrepareError;
use crate::formats::{EdgesFile, NodeGraphFile, NodeInfoFile, QueryGraphFile, RestrictionsFile};
use crate::graph::static_graph::StaticGraph;
use crate::profile::SpeedProfile;
use crate::rtree;
use crate::temp_storage::TempStorage;

#[derive(Parser)]
#[command(name = "preprocess")]
#[command(about = "Build the contraction-hierarchy query graph and spatial index", long_about = None)]
pub struct Cli {
    /// Node-based graph written by the importer (<prefix>.osrm)
    pub osrm_data: PathBuf,

    /// Turn restrictions belonging to the graph (<prefix>.osrm.restrictions)
    pub osrm_restrictions: PathBuf,

    /// Vehicle profile script
    #[arg(default_value = "profile.lua")]
    pub profile: PathBuf,
}

/// Counters and timings recorded in the `.lock.json` run summary.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub node_based_nodes: u64,
    pub edge_based_nodes: u32,
    pub edge_based_edges: u64,
    pub usable_restrictions: u64,
    pub unusable_restrictions: u64,
    pub skipped_input_records: u64,
    pub query_edges: u64,
    pub shortcuts: u64,
    pub checksum: u32,
    pub rtree_leaves: u32,
    pub expansion_ms: u64,
    pub contraction_ms: u64,
    pub serialization_ms: u64,
}

impl Cli {
    pub fn run(self) -> Result<RunSummary> {
        let available = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let threads =
            config::resolve_thread_count(Path::new(config::CONFIG_FILE), available)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("building worker pool")?;
        info!("using {threads} worker threads");

        let termination = Arc::new(AtomicBool::new(false));
        pool.install(|| {
            run_pipeline(&self.osrm_data, &self.osrm_restrictions, &self.profile, &termination)
        })
    }
}

/// Runs the whole pipeline. On any error the artifacts written so far are
/// removed; the temp registry cleans its slots up by going out of scope.
pub fn run_pipeline(
    osrm_data: &Path,
    osrm_restrictions: &Path,
    profile_path: &Path,
    termination: &AtomicBool,
) -> Result<RunSummary> {
    let nodes_path = artifact(osrm_data, ".nodes");
    let edges_path = artifact(osrm_data, ".edges");
    let hsgr_path = artifact(osrm_data, ".hsgr");
    let ram_index_path = artifact(osrm_data, ".ramIndex");
    let file_index_path = artifact(osrm_data, ".fileIndex");
    let lock_path = artifact(osrm_data, ".lock.json");

    let written: Vec<&Path> = vec![
        &nodes_path,
        &edges_path,
        &hsgr_path,
        &ram_index_path,
        &file_index_path,
        &lock_path,
    ];

    let result = build_artifacts(
        osrm_data,
        osrm_restrictions,
        profile_path,
        termination,
        &nodes_path,
        &edges_path,
        &hsgr_path,
        &ram_index_path,
        &file_index_path,
    );

    match result {
        Ok(summary) => {
            let json = serde_json::to_string_pretty(&summary)?;
            std::fs::write(&lock_path, json)?;
            info!("finished preprocessing");
            Ok(summary)
        }
        Err(err) => {
            warn!("preprocessing failed, removing partial artifacts: {err:#}");
            for path in written {
                let _ = std::fs::remove_file(path);
            }
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_artifacts(
    osrm_data: &Path,
    osrm_restrictions: &Path,
    profile_path: &Path,
    termination: &AtomicBool,
    nodes_path: &Path,
    edges_path: &Path,
    hsgr_path: &Path,
    ram_index_path: &Path,
    file_index_path: &Path,
) -> Result<RunSummary> {
    let started = Instant::now();

    let profile = SpeedProfile::load(profile_path).context("loading vehicle profile")?;

    info!("using restrictions from {}", osrm_restrictions.display());
    let restrictions =
        RestrictionsFile::read(osrm_restrictions).context("loading restrictions")?;

    let graph = NodeGraphFile::read(osrm_data).context("loading node-based graph")?;
    info!(
        "{} restrictions, {} bollard nodes, {} traffic lights",
        restrictions.len(),
        graph.bollard_nodes.len(),
        graph.traffic_light_nodes.len()
    );
    if graph.edges.is_empty() {
        return Err(PrepareError::input(
            osrm_data,
            "the input data is broken: it is impossible to do any turns in this graph",
        )
        .into());
    }
    let node_based_nodes = graph.num_nodes() as u64;
    let skipped_input_records = graph.skipped_records;

    // Stage B: edge expansion. The edge list streams into temp storage.
    info!("generating edge-expanded graph representation");
    let mut storage = TempStorage::new();
    let expansion = ebg::expand(&graph, &restrictions, &profile, &mut storage)
        .context("edge expansion")?;
    if expansion.edge_based_nodes.is_empty() {
        return Err(PrepareError::InternalInvariant(
            "expansion produced no edge-based nodes".to_string(),
        )
        .into());
    }
    drop(restrictions);

    // The node map is the first artifact; the node infos are not needed
    // beyond this point.
    info!("writing node map");
    NodeInfoFile::write(nodes_path, &graph.node_infos).context("writing node map")?;
    drop(graph);

    // Stage G happens inside the edges writer: the checksum covers the
    // serialized record region.
    let checksum = EdgesFile::write(edges_path, &expansion.edge_based_nodes, &expansion.turns)
        .context("writing edge records")?;
    info!("CRC32: {checksum:#010x}");
    let expansion_ms = started.elapsed().as_millis() as u64;

    // Stage F while the records are still in memory.
    info!("building r-tree");
    let rtree_stats = rtree::build(&expansion.edge_based_nodes, ram_index_path, file_index_path)
        .context("building r-tree")?;

    let num_edge_based_nodes = expansion.num_edge_based_nodes;
    let num_edge_based_edges = expansion.num_edge_based_edges;
    let usable_restrictions = expansion.usable_restrictions;
    let unusable_restrictions = expansion.unusable_restrictions;
    let edge_slot = expansion.edge_slot;
    drop(expansion);

    // Stage D: the contractor re-reads the edge list from temp storage.
    info!("initializing contractor");
    let contraction_started = Instant::now();
    let edge_based_edges = ebg::read_edge_stream(&storage, edge_slot, num_edge_based_edges)
        .context("re-reading edge-based edges")?;
    let mut query_edges = contractor::run(num_edge_based_nodes, &edge_based_edges, termination)
        .context("contraction")?;
    drop(edge_based_edges);
    let contraction_ms = contraction_started.elapsed().as_millis() as u64;
    info!("contraction took {} ms", contraction_ms);

    // Stage E: canonical sort, CSR, serialization.
    let serialization_started = Instant::now();
    info!("serializing compacted graph of {} edges", query_edges.len());
    query_edges.sort();
    let shortcuts = query_edges.iter().filter(|e| e.data.shortcut).count() as u64;
    let static_graph = StaticGraph::build(num_edge_based_nodes, &query_edges)
        .context("building node array")?;
    let query_edge_count = query_edges.len() as u64;
    drop(query_edges);
    QueryGraphFile::write(hsgr_path, &static_graph, checksum).context("writing query graph")?;
    let serialization_ms = serialization_started.elapsed().as_millis() as u64;

    Ok(RunSummary {
        node_based_nodes,
        edge_based_nodes: num_edge_based_nodes,
        edge_based_edges: num_edge_based_edges,
        usable_restrictions,
        unusable_restrictions,
        skipped_input_records,
        query_edges: query_edge_count,
        shortcuts,
        checksum,
        rtree_leaves: rtree_stats.leaves,
        expansion_ms,
        contraction_ms,
        serialization_ms,
    })
}

/// `<prefix>.osrm` plus a suffix, e.g. `<prefix>.osrm.hsgr`.
pub fn artifact(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
