//! `<prefix>.osrm.hsgr`: the contracted query graph in CSR layout.
//!
//! Layout: build stamp, `u32 checksum` (CRC-32 of the edge-based node
//! records in `.edges`), `u32 node_count` (sentinel included), that many
//! `{u32 first_edge}` offsets, `u32 edge_count`, then per edge `{u32
//! target, u32 distance, u32 id, u32 original_edges, u32 flags (bit0
//! shortcut, bit1 forward, bit2 backward)}`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::warn;

use crate::error::{PrepareError, Result};
use crate::formats::stamp::BuildStamp;
use crate::graph::static_graph::{StaticGraph, StaticGraphEdge};
use crate::graph::EdgeData;

const EDGE_RECORD_LEN: usize = 20;

pub struct QueryGraphFile;

impl QueryGraphFile {
    pub fn write<P: AsRef<Path>>(path: P, graph: &StaticGraph, checksum: u32) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        BuildStamp::current().write_to(&mut writer)?;
        writer.write_all(&checksum.to_le_bytes())?;

        writer.write_all(&(graph.first_edge.len() as u32).to_le_bytes())?;
        for &offset in &graph.first_edge {
            writer.write_all(&offset.to_le_bytes())?;
        }

        writer.write_all(&(graph.edges.len() as u32).to_le_bytes())?;
        for edge in &graph.edges {
            if edge.data.distance == 0 {
                return Err(PrepareError::InternalInvariant(format!(
                    "refusing to serialize zero-weight edge to {}",
                    edge.target
                )));
            }
            let mut record = [0u8; EDGE_RECORD_LEN];
            record[0..4].copy_from_slice(&edge.target.to_le_bytes());
            record[4..8].copy_from_slice(&edge.data.distance.to_le_bytes());
            record[8..12].copy_from_slice(&edge.data.id.to_le_bytes());
            record[12..16].copy_from_slice(&edge.data.original_edges.to_le_bytes());
            let flags = (edge.data.shortcut as u32)
                | ((edge.data.forward as u32) << 1)
                | ((edge.data.backward as u32) << 2);
            record[16..20].copy_from_slice(&flags.to_le_bytes());
            writer.write_all(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads the header only: `(stamp, checksum, node_count)`.
    pub fn read_header<P: AsRef<Path>>(path: P) -> Result<(BuildStamp, u32, u32)> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| PrepareError::input(path, format!("cannot open: {e}")))?;
        let mut reader = BufReader::new(file);
        let stamp = BuildStamp::read_from(&mut reader)
            .map_err(|_| PrepareError::input(path, "truncated build stamp"))?;
        let checksum = read_u32(&mut reader, path, "checksum")?;
        let node_count = read_u32(&mut reader, path, "node count")?;
        Ok((stamp, checksum, node_count))
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<(StaticGraph, u32)> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| PrepareError::input(path, format!("cannot open: {e}")))?;
        let mut reader = BufReader::new(file);
        let stamp = BuildStamp::read_from(&mut reader)
            .map_err(|_| PrepareError::input(path, "truncated build stamp"))?;
        if !BuildStamp::current().test_prepare(&stamp) {
            warn!("{} was prepared with a different build", path.display());
        }
        let checksum = read_u32(&mut reader, path, "checksum")?;
        let graph = read_body(&mut reader, path)?;
        Ok((graph, checksum))
    }

    /// Loads the query graph after confirming its stored checksum against
    /// the actual edge-based node records. The checksum gate runs before
    /// the offset and edge arrays are touched.
    pub fn load_checked<P: AsRef<Path>, Q: AsRef<Path>>(
        hsgr_path: P,
        edges_path: Q,
    ) -> Result<StaticGraph> {
        let (_, _, expected) = crate::formats::edges::EdgesFile::read(edges_path)?;

        let hsgr_path = hsgr_path.as_ref();
        let file = File::open(hsgr_path)
            .map_err(|e| PrepareError::input(hsgr_path, format!("cannot open: {e}")))?;
        let mut reader = BufReader::new(file);
        let stamp = BuildStamp::read_from(&mut reader)
            .map_err(|_| PrepareError::input(hsgr_path, "truncated build stamp"))?;
        if !BuildStamp::current().test_prepare(&stamp) {
            warn!("{} was prepared with a different build", hsgr_path.display());
        }
        let stored = read_u32(&mut reader, hsgr_path, "checksum")?;
        if stored != expected {
            return Err(PrepareError::ChecksumMismatch {
                stored,
                computed: expected,
            });
        }
        read_body(&mut reader, hsgr_path)
    }
}

fn read_body<R: Read>(reader: &mut R, path: &Path) -> Result<StaticGraph> {
    let node_count = read_u32(reader, path, "node count")?;
    let mut first_edge = Vec::with_capacity(node_count as usize);
    for _ in 0..node_count {
        first_edge.push(read_u32(reader, path, "node offset")?);
    }

    for window in first_edge.windows(2) {
        if window[0] > window[1] {
            return Err(PrepareError::InternalInvariant(
                "offset array is not monotonic".to_string(),
            ));
        }
    }

    let edge_count = read_u32(reader, path, "edge count")?;
    if first_edge.last().copied() != Some(edge_count) {
        return Err(PrepareError::InternalInvariant(format!(
            "sentinel offset {:?} does not match edge count {edge_count}",
            first_edge.last()
        )));
    }

    let mut edges = Vec::with_capacity(edge_count as usize);
    for i in 0..edge_count {
        let mut record = [0u8; EDGE_RECORD_LEN];
        reader
            .read_exact(&mut record)
            .map_err(|_| PrepareError::input(path, format!("truncated edge record {i}")))?;
        let flags = u32::from_le_bytes(record[16..20].try_into().unwrap());
        edges.push(StaticGraphEdge {
            target: u32::from_le_bytes(record[0..4].try_into().unwrap()),
            data: EdgeData {
                distance: u32::from_le_bytes(record[4..8].try_into().unwrap()),
                id: u32::from_le_bytes(record[8..12].try_into().unwrap()),
                original_edges: u32::from_le_bytes(record[12..16].try_into().unwrap()),
                shortcut: flags & 0b001 != 0,
                forward: flags & 0b010 != 0,
                backward: flags & 0b100 != 0,
            },
        });
    }

    Ok(StaticGraph { first_edge, edges })
}

fn read_u32<R: Read>(reader: &mut R, path: &Path, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|_| PrepareError::input(path, format!("truncated {what}")))?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::QueryEdge;
    use tempfile::NamedTempFile;

    fn sample_graph() -> StaticGraph {
        let data = |d: u32, shortcut: bool| EdgeData {
            distance: d,
            id: 9,
            shortcut,
            forward: true,
            backward: false,
            original_edges: 2,
        };
        let mut edges = vec![
            QueryEdge { source: 0, target: 1, data: data(10, false) },
            QueryEdge { source: 1, target: 2, data: data(20, true) },
        ];
        edges.sort();
        StaticGraph::build(3, &edges).unwrap()
    }

    #[test]
    fn roundtrip() {
        let tmp = NamedTempFile::new().unwrap();
        let graph = sample_graph();
        QueryGraphFile::write(tmp.path(), &graph, 0xDEADBEEF).unwrap();

        let (read_graph, checksum) = QueryGraphFile::read(tmp.path()).unwrap();
        assert_eq!(checksum, 0xDEADBEEF);
        assert_eq!(read_graph.first_edge, graph.first_edge);
        assert_eq!(read_graph.edges, graph.edges);
        assert!(read_graph.edges[1].data.shortcut);
    }

    #[test]
    fn header_alone_exposes_checksum() {
        let tmp = NamedTempFile::new().unwrap();
        QueryGraphFile::write(tmp.path(), &sample_graph(), 7).unwrap();
        let (_, checksum, node_count) = QueryGraphFile::read_header(tmp.path()).unwrap();
        assert_eq!(checksum, 7);
        assert_eq!(node_count, 4);
    }
}
