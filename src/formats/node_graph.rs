//! `<prefix>.osrm`: the node-based input graph.
//!
//! Layout (little-endian):
//! `u64 node_count`, then per node `{i32 lat, i32 lon, u64 external_id,
//! u8 flags}` (bit0 bollard, bit1 traffic light); `u64 edge_count`, then
//! per edge `{u32 source, u32 target, u32 distance, u8 direction (bit0
//! forward, bit1 backward), u32 name_id, u8 road_type, u8 flags (bit0
//! roundabout, bit1 ignore_in_grid), i16 speed}`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::warn;

use crate::error::{PrepareError, Result};
use crate::graph::{ImportEdge, NodeId, NodeInfo};

const NODE_RECORD_LEN: usize = 17;
const EDGE_RECORD_LEN: usize = 21;

/// Everything stage B needs from the importer's output.
#[derive(Debug)]
pub struct NodeBasedGraph {
    pub node_infos: Vec<NodeInfo>,
    pub bollard_nodes: Vec<NodeId>,
    pub traffic_light_nodes: Vec<NodeId>,
    pub edges: Vec<ImportEdge>,
    /// Count of per-record problems that were warned about and skipped.
    pub skipped_records: u64,
}

impl NodeBasedGraph {
    pub fn num_nodes(&self) -> u32 {
        self.node_infos.len() as u32
    }
}

pub struct NodeGraphFile;

impl NodeGraphFile {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<NodeBasedGraph> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| PrepareError::input(path, format!("cannot open: {e}")))?;
        let mut reader = BufReader::new(file);

        let node_count = read_u64(&mut reader, path)?;
        let mut node_infos = Vec::with_capacity(node_count as usize);
        let mut bollard_nodes = Vec::new();
        let mut traffic_light_nodes = Vec::new();
        let mut skipped_records = 0u64;

        for id in 0..node_count {
            let mut record = [0u8; NODE_RECORD_LEN];
            reader
                .read_exact(&mut record)
                .map_err(|_| PrepareError::input(path, format!("truncated node record {id}")))?;

            let flags = record[16];
            let info = NodeInfo {
                lat: i32::from_le_bytes(record[0..4].try_into().unwrap()),
                lon: i32::from_le_bytes(record[4..8].try_into().unwrap()),
                external_id: u64::from_le_bytes(record[8..16].try_into().unwrap()),
                bollard: flags & 0b01 != 0,
                traffic_light: flags & 0b10 != 0,
            };
            if !info.in_valid_range() {
                warn!(
                    "node {id}: coordinate ({}, {}) out of range, keeping as-is",
                    info.lat, info.lon
                );
                skipped_records += 1;
            }
            if info.bollard {
                bollard_nodes.push(id as NodeId);
            }
            if info.traffic_light {
                traffic_light_nodes.push(id as NodeId);
            }
            node_infos.push(info);
        }

        let edge_count = read_u64(&mut reader, path)?;
        let mut edges = Vec::with_capacity(edge_count as usize);
        for i in 0..edge_count {
            let mut record = [0u8; EDGE_RECORD_LEN];
            reader
                .read_exact(&mut record)
                .map_err(|_| PrepareError::input(path, format!("truncated edge record {i}")))?;

            let direction = record[12];
            let flags = record[18];
            let edge = ImportEdge {
                source: u32::from_le_bytes(record[0..4].try_into().unwrap()),
                target: u32::from_le_bytes(record[4..8].try_into().unwrap()),
                distance: u32::from_le_bytes(record[8..12].try_into().unwrap()),
                forward: direction & 0b01 != 0,
                backward: direction & 0b10 != 0,
                name_id: u32::from_le_bytes(record[13..17].try_into().unwrap()),
                road_type: record[17],
                roundabout: flags & 0b01 != 0,
                ignore_in_grid: flags & 0b10 != 0,
                speed: i16::from_le_bytes(record[19..21].try_into().unwrap()),
            };

            if edge.source as u64 >= node_count || edge.target as u64 >= node_count {
                warn!(
                    "edge {i}: endpoint {} -> {} outside node range, skipping",
                    edge.source, edge.target
                );
                skipped_records += 1;
                continue;
            }
            if !edge.forward && !edge.backward {
                warn!("edge {i}: neither direction flag set, skipping");
                skipped_records += 1;
                continue;
            }
            if edge.speed <= 0 {
                warn!("edge {i}: non-positive speed {}, skipping", edge.speed);
                skipped_records += 1;
                continue;
            }
            edges.push(edge);
        }

        if skipped_records > 0 {
            warn!("{skipped_records} inconsistent records skipped while loading {path:?}");
        }

        Ok(NodeBasedGraph {
            node_infos,
            bollard_nodes,
            traffic_light_nodes,
            edges,
            skipped_records,
        })
    }

    /// Writes the input format. Used by the importer side of the toolchain
    /// and by the test fixtures in this repo.
    pub fn write<P: AsRef<Path>>(path: P, nodes: &[NodeInfo], edges: &[ImportEdge]) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        writer.write_all(&(nodes.len() as u64).to_le_bytes())?;
        for node in nodes {
            let mut record = [0u8; NODE_RECORD_LEN];
            record[0..4].copy_from_slice(&node.lat.to_le_bytes());
            record[4..8].copy_from_slice(&node.lon.to_le_bytes());
            record[8..16].copy_from_slice(&node.external_id.to_le_bytes());
            record[16] = (node.bollard as u8) | ((node.traffic_light as u8) << 1);
            writer.write_all(&record)?;
        }

        writer.write_all(&(edges.len() as u64).to_le_bytes())?;
        for edge in edges {
            let mut record = [0u8; EDGE_RECORD_LEN];
            record[0..4].copy_from_slice(&edge.source.to_le_bytes());
            record[4..8].copy_from_slice(&edge.target.to_le_bytes());
            record[8..12].copy_from_slice(&edge.distance.to_le_bytes());
            record[12] = (edge.forward as u8) | ((edge.backward as u8) << 1);
            record[13..17].copy_from_slice(&edge.name_id.to_le_bytes());
            record[17] = edge.road_type;
            record[18] = (edge.roundabout as u8) | ((edge.ignore_in_grid as u8) << 1);
            record[19..21].copy_from_slice(&edge.speed.to_le_bytes());
            writer.write_all(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn read_u64<R: Read>(reader: &mut R, path: &Path) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|_| PrepareError::input(path, "truncated header"))?;
    Ok(u64::from_le_bytes(buf))
}
