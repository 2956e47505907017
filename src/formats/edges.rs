//! `<prefix>.osrm.edges`: edge-based node records plus per-turn data.
//!
//! Layout: build stamp, `u32 record_count`, `record_count` 32-byte
//! edge-based node records, `u32 turn_count`, then per turn `{u32 via_node,
//! u32 name_id, u8 turn_instruction, 3 pad bytes}`.
//!
//! The query-graph checksum (module G of the pipeline) covers exactly the
//! contiguous record bytes, so [`encode_record`] is the canonical
//! serialization for both this file and the R-tree leaf pages.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{PrepareError, Result};
use crate::formats::crc;
use crate::formats::stamp::BuildStamp;
use crate::graph::EdgeBasedNode;

pub const RECORD_LEN: usize = 32;
const TURN_LEN: usize = 12;

/// Per-turn auxiliary row for the query engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnData {
    pub via_node: u32,
    pub name_id: u32,
    pub turn_instruction: u8,
}

pub fn encode_record(node: &EdgeBasedNode) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];
    record[0..4].copy_from_slice(&node.forward_id.to_le_bytes());
    record[4..8].copy_from_slice(&node.reverse_id.to_le_bytes());
    record[8..12].copy_from_slice(&node.name_id.to_le_bytes());
    record[12..16].copy_from_slice(&node.lat1.to_le_bytes());
    record[16..20].copy_from_slice(&node.lon1.to_le_bytes());
    record[20..24].copy_from_slice(&node.lat2.to_le_bytes());
    record[24..28].copy_from_slice(&node.lon2.to_le_bytes());
    let flags =
        (node.belongs_to_tiny_cc as u32) | ((node.ignore_in_grid as u32) << 1);
    record[28..32].copy_from_slice(&flags.to_le_bytes());
    record
}

pub fn decode_record(record: &[u8; RECORD_LEN]) -> EdgeBasedNode {
    let flags = u32::from_le_bytes(record[28..32].try_into().unwrap());
    EdgeBasedNode {
        forward_id: u32::from_le_bytes(record[0..4].try_into().unwrap()),
        reverse_id: u32::from_le_bytes(record[4..8].try_into().unwrap()),
        name_id: u32::from_le_bytes(record[8..12].try_into().unwrap()),
        lat1: i32::from_le_bytes(record[12..16].try_into().unwrap()),
        lon1: i32::from_le_bytes(record[16..20].try_into().unwrap()),
        lat2: i32::from_le_bytes(record[20..24].try_into().unwrap()),
        lon2: i32::from_le_bytes(record[24..28].try_into().unwrap()),
        belongs_to_tiny_cc: flags & 0b01 != 0,
        ignore_in_grid: flags & 0b10 != 0,
    }
}

/// CRC-32 over the serialized record region, the value that ends up in the
/// query-graph header.
pub fn records_checksum(nodes: &[EdgeBasedNode]) -> u32 {
    let mut digest = crc::Digest::new();
    for node in nodes {
        digest.update(&encode_record(node));
    }
    digest.finalize()
}

pub struct EdgesFile;

impl EdgesFile {
    pub fn write<P: AsRef<Path>>(
        path: P,
        nodes: &[EdgeBasedNode],
        turns: &[TurnData],
    ) -> Result<u32> {
        let mut writer = BufWriter::new(File::create(path)?);
        let mut digest = crc::Digest::new();

        BuildStamp::current().write_to(&mut writer)?;
        writer.write_all(&(nodes.len() as u32).to_le_bytes())?;
        for node in nodes {
            let record = encode_record(node);
            writer.write_all(&record)?;
            digest.update(&record);
        }

        writer.write_all(&(turns.len() as u32).to_le_bytes())?;
        for turn in turns {
            let mut record = [0u8; TURN_LEN];
            record[0..4].copy_from_slice(&turn.via_node.to_le_bytes());
            record[4..8].copy_from_slice(&turn.name_id.to_le_bytes());
            record[8] = turn.turn_instruction;
            writer.write_all(&record)?;
        }
        writer.flush()?;
        Ok(digest.finalize())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<(Vec<EdgeBasedNode>, Vec<TurnData>, u32)> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| PrepareError::input(path, format!("cannot open: {e}")))?;
        let mut reader = BufReader::new(file);
        let _stamp = BuildStamp::read_from(&mut reader)
            .map_err(|_| PrepareError::input(path, "truncated build stamp"))?;

        let mut buf = [0u8; 4];
        reader
            .read_exact(&mut buf)
            .map_err(|_| PrepareError::input(path, "truncated record count"))?;
        let record_count = u32::from_le_bytes(buf);

        let mut digest = crc::Digest::new();
        let mut nodes = Vec::with_capacity(record_count as usize);
        for i in 0..record_count {
            let mut record = [0u8; RECORD_LEN];
            reader
                .read_exact(&mut record)
                .map_err(|_| PrepareError::input(path, format!("truncated record {i}")))?;
            digest.update(&record);
            nodes.push(decode_record(&record));
        }
        let checksum = digest.finalize();

        reader
            .read_exact(&mut buf)
            .map_err(|_| PrepareError::input(path, "truncated turn count"))?;
        let turn_count = u32::from_le_bytes(buf);
        let mut turns = Vec::with_capacity(turn_count as usize);
        for i in 0..turn_count {
            let mut record = [0u8; TURN_LEN];
            reader
                .read_exact(&mut record)
                .map_err(|_| PrepareError::input(path, format!("truncated turn record {i}")))?;
            turns.push(TurnData {
                via_node: u32::from_le_bytes(record[0..4].try_into().unwrap()),
                name_id: u32::from_le_bytes(record[4..8].try_into().unwrap()),
                turn_instruction: record[8],
            });
        }

        Ok((nodes, turns, checksum))
    }
}
