//! `<prefix>.osrm.nodes`: the internal-to-external node mapping.
//!
//! Layout: build stamp, `u64 count`, then per node `{u64 external_id,
//! i32 lat, i32 lon, u8 flags (bit0 bollard, bit1 signal), 3 pad bytes}`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{PrepareError, Result};
use crate::formats::stamp::BuildStamp;
use crate::graph::NodeInfo;

const RECORD_LEN: usize = 20;

pub struct NodeInfoFile;

impl NodeInfoFile {
    pub fn write<P: AsRef<Path>>(path: P, nodes: &[NodeInfo]) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        BuildStamp::current().write_to(&mut writer)?;
        writer.write_all(&(nodes.len() as u64).to_le_bytes())?;
        for node in nodes {
            let mut record = [0u8; RECORD_LEN];
            record[0..8].copy_from_slice(&node.external_id.to_le_bytes());
            record[8..12].copy_from_slice(&node.lat.to_le_bytes());
            record[12..16].copy_from_slice(&node.lon.to_le_bytes());
            record[16] = (node.bollard as u8) | ((node.traffic_light as u8) << 1);
            writer.write_all(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<NodeInfo>> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| PrepareError::input(path, format!("cannot open: {e}")))?;
        let mut reader = BufReader::new(file);
        let _stamp = BuildStamp::read_from(&mut reader)
            .map_err(|_| PrepareError::input(path, "truncated build stamp"))?;

        let mut buf = [0u8; 8];
        reader
            .read_exact(&mut buf)
            .map_err(|_| PrepareError::input(path, "truncated node count"))?;
        let count = u64::from_le_bytes(buf);

        let mut nodes = Vec::with_capacity(count as usize);
        for i in 0..count {
            let mut record = [0u8; RECORD_LEN];
            reader
                .read_exact(&mut record)
                .map_err(|_| PrepareError::input(path, format!("truncated node record {i}")))?;
            nodes.push(NodeInfo {
                external_id: u64::from_le_bytes(record[0..8].try_into().unwrap()),
                lat: i32::from_le_bytes(record[8..12].try_into().unwrap()),
                lon: i32::from_le_bytes(record[12..16].try_into().unwrap()),
                bollard: record[16] & 0b01 != 0,
                traffic_light: record[16] & 0b10 != 0,
            });
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn roundtrip() {
        let tmp = NamedTempFile::new().unwrap();
        let nodes = vec![
            NodeInfo { external_id: 42, lat: 100, lon: -200, bollard: true, traffic_light: false },
            NodeInfo { external_id: 43, lat: 0, lon: 0, bollard: false, traffic_light: true },
        ];
        NodeInfoFile::write(tmp.path(), &nodes).unwrap();
        assert_eq!(NodeInfoFile::read(tmp.path()).unwrap(), nodes);
    }
}
