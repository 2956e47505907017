//! Packed static R-tree over edge-based nodes.
//!
//! Sort-tile-recursive bulk load: items are sorted by longitude midpoint,
//! cut into vertical slabs, sorted by latitude within each slab, and packed
//! into 4 KiB leaf pages on disk. Internal levels are built bottom-up into
//! a flat array that is serialized to the RAM index and loaded whole at
//! query time; leaves are read from the leaf file on demand.
//!
//! Distances are squared fixed-point degree deltas: exact integers, so
//! traversal order and results are identical on every platform.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::info;
use rayon::prelude::*;

use crate::error::{PrepareError, Result};
use crate::formats::edges::{decode_record, encode_record, RECORD_LEN};
use crate::formats::stamp::BuildStamp;
use crate::graph::EdgeBasedNode;

/// Records per 4 KiB leaf page: 4-byte count plus 127 * 32-byte records.
pub const LEAF_CAPACITY: usize = 127;
pub const PAGE_SIZE: usize = 4096;
/// Children per internal node.
pub const FANOUT: usize = 64;

const NODE_RECORD_LEN: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BoundingBox {
    min_lat: i32,
    min_lon: i32,
    max_lat: i32,
    max_lon: i32,
}

impl BoundingBox {
    fn of(node: &EdgeBasedNode) -> BoundingBox {
        BoundingBox {
            min_lat: node.lat1.min(node.lat2),
            min_lon: node.lon1.min(node.lon2),
            max_lat: node.lat1.max(node.lat2),
            max_lon: node.lon1.max(node.lon2),
        }
    }

    fn merge(&mut self, other: &BoundingBox) {
        self.min_lat = self.min_lat.min(other.min_lat);
        self.min_lon = self.min_lon.min(other.min_lon);
        self.max_lat = self.max_lat.max(other.max_lat);
        self.max_lon = self.max_lon.max(other.max_lon);
    }

    /// Squared distance from a point to this box, 0 when inside.
    fn min_dist_sq(&self, lat: i32, lon: i32) -> u64 {
        let dlat = if lat < self.min_lat {
            (self.min_lat as i64) - (lat as i64)
        } else if lat > self.max_lat {
            (lat as i64) - (self.max_lat as i64)
        } else {
            0
        };
        let dlon = if lon < self.min_lon {
            (self.min_lon as i64) - (lon as i64)
        } else if lon > self.max_lon {
            (lon as i64) - (self.max_lon as i64)
        } else {
            0
        };
        (dlat * dlat + dlon * dlon) as u64
    }
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    bbox: BoundingBox,
    first_child: u32,
    child_count: u32,
    children_are_leaves: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RTreeStats {
    pub items: u64,
    pub leaves: u32,
    pub internal_nodes: u32,
}

/// Bulk-loads the tree over all grid-visible records and writes both
/// artifacts. Records flagged `ignore_in_grid` are left out.
pub fn build<P: AsRef<Path>, Q: AsRef<Path>>(
    records: &[EdgeBasedNode],
    ram_path: P,
    leaf_path: Q,
) -> Result<RTreeStats> {
    let mut items: Vec<(BoundingBox, EdgeBasedNode)> = records
        .iter()
        .filter(|r| !r.ignore_in_grid)
        .map(|r| (BoundingBox::of(r), *r))
        .collect();

    // STR: sort by longitude midpoint, slab, then latitude within slabs.
    items.par_sort_unstable_by_key(|(b, r)| {
        (b.min_lon as i64 + b.max_lon as i64, r.forward_id, r.reverse_id)
    });
    let slab_count = if items.is_empty() {
        0
    } else {
        let leaves_needed = items.len().div_ceil(LEAF_CAPACITY);
        (leaves_needed as f64).sqrt().ceil() as usize
    };
    let slab_len = if slab_count > 0 {
        items.len().div_ceil(slab_count)
    } else {
        1
    };
    for slab in items.chunks_mut(slab_len) {
        slab.par_sort_unstable_by_key(|(b, r)| {
            (b.min_lat as i64 + b.max_lat as i64, r.forward_id, r.reverse_id)
        });
    }

    // Leaf file: one stamp page, then one page per leaf, packed per slab.
    let mut leaf_writer = BufWriter::new(File::create(leaf_path)?);
    let mut stamp_page = [0u8; PAGE_SIZE];
    stamp_page[..16].copy_from_slice(&BuildStamp::current().to_bytes());
    leaf_writer.write_all(&stamp_page)?;

    let mut leaf_boxes: Vec<BoundingBox> = Vec::new();
    for slab in items.chunks(slab_len) {
        for leaf in slab.chunks(LEAF_CAPACITY) {
            let mut page = vec![0u8; PAGE_SIZE];
            page[0..4].copy_from_slice(&(leaf.len() as u32).to_le_bytes());
            let mut bbox = leaf[0].0;
            for (i, (item_box, record)) in leaf.iter().enumerate() {
                bbox.merge(item_box);
                let offset = 4 + i * RECORD_LEN;
                page[offset..offset + RECORD_LEN].copy_from_slice(&encode_record(record));
            }
            leaf_writer.write_all(&page)?;
            leaf_boxes.push(bbox);
        }
    }
    leaf_writer.flush()?;

    // Internal levels, bottom-up. Children of one node are contiguous in
    // the level below.
    let mut nodes: Vec<TreeNode> = Vec::new();
    let mut root = 0u32;
    if !leaf_boxes.is_empty() {
        let mut current: Vec<(BoundingBox, u32)> = leaf_boxes
            .iter()
            .enumerate()
            .map(|(i, b)| (*b, i as u32))
            .collect();
        let mut children_are_leaves = true;
        loop {
            let mut next = Vec::with_capacity(current.len().div_ceil(FANOUT));
            for chunk in current.chunks(FANOUT) {
                let mut bbox = chunk[0].0;
                for (b, _) in &chunk[1..] {
                    bbox.merge(b);
                }
                nodes.push(TreeNode {
                    bbox,
                    first_child: chunk[0].1,
                    child_count: chunk.len() as u32,
                    children_are_leaves,
                });
                next.push((bbox, (nodes.len() - 1) as u32));
            }
            if next.len() == 1 {
                root = next[0].1;
                break;
            }
            current = next;
            children_are_leaves = false;
        }
    }

    let mut ram_writer = BufWriter::new(File::create(ram_path)?);
    BuildStamp::current().write_to(&mut ram_writer)?;
    ram_writer.write_all(&(nodes.len() as u32).to_le_bytes())?;
    for node in &nodes {
        let mut record = [0u8; NODE_RECORD_LEN];
        record[0..4].copy_from_slice(&node.bbox.min_lat.to_le_bytes());
        record[4..8].copy_from_slice(&node.bbox.min_lon.to_le_bytes());
        record[8..12].copy_from_slice(&node.bbox.max_lat.to_le_bytes());
        record[12..16].copy_from_slice(&node.bbox.max_lon.to_le_bytes());
        record[16..20].copy_from_slice(&node.first_child.to_le_bytes());
        record[20..24].copy_from_slice(&node.child_count.to_le_bytes());
        record[24..28].copy_from_slice(&((node.children_are_leaves as u32).to_le_bytes()));
        ram_writer.write_all(&record)?;
    }
    ram_writer.write_all(&root.to_le_bytes())?;
    ram_writer.flush()?;

    let stats = RTreeStats {
        items: items.len() as u64,
        leaves: leaf_boxes.len() as u32,
        internal_nodes: nodes.len() as u32,
    };
    info!(
        "r-tree: {} items in {} leaves, {} internal nodes",
        stats.items, stats.leaves, stats.internal_nodes
    );
    Ok(stats)
}

/// Query handle: internal levels in RAM, leaves read from disk on demand.
pub struct StaticRTree {
    nodes: Vec<TreeNode>,
    root: u32,
    leaf_file: File,
}

impl StaticRTree {
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(ram_path: P, leaf_path: Q) -> Result<StaticRTree> {
        let ram_path = ram_path.as_ref();
        let file = File::open(ram_path)
            .map_err(|e| PrepareError::input(ram_path, format!("cannot open: {e}")))?;
        let mut reader = BufReader::new(file);
        let _stamp = BuildStamp::read_from(&mut reader)
            .map_err(|_| PrepareError::input(ram_path, "truncated build stamp"))?;

        let mut buf = [0u8; 4];
        reader
            .read_exact(&mut buf)
            .map_err(|_| PrepareError::input(ram_path, "truncated node count"))?;
        let count = u32::from_le_bytes(buf);

        let mut nodes = Vec::with_capacity(count as usize);
        for i in 0..count {
            let mut record = [0u8; NODE_RECORD_LEN];
            reader
                .read_exact(&mut record)
                .map_err(|_| PrepareError::input(ram_path, format!("truncated tree node {i}")))?;
            nodes.push(TreeNode {
                bbox: BoundingBox {
                    min_lat: i32::from_le_bytes(record[0..4].try_into().unwrap()),
                    min_lon: i32::from_le_bytes(record[4..8].try_into().unwrap()),
                    max_lat: i32::from_le_bytes(record[8..12].try_into().unwrap()),
                    max_lon: i32::from_le_bytes(record[12..16].try_into().unwrap()),
                },
                first_child: u32::from_le_bytes(record[16..20].try_into().unwrap()),
                child_count: u32::from_le_bytes(record[20..24].try_into().unwrap()),
                children_are_leaves: u32::from_le_bytes(record[24..28].try_into().unwrap()) != 0,
            });
        }
        reader
            .read_exact(&mut buf)
            .map_err(|_| PrepareError::input(ram_path, "truncated root index"))?;
        let root = u32::from_le_bytes(buf);

        let leaf_path = leaf_path.as_ref();
        let leaf_file = File::open(leaf_path)
            .map_err(|e| PrepareError::input(leaf_path, format!("cannot open: {e}")))?;

        Ok(StaticRTree { nodes, root, leaf_file })
    }

    /// Best-first nearest-neighbor search. Ties on distance resolve to the
    /// record with the smaller forward id.
    pub fn find_nearest(&mut self, lat: i32, lon: i32) -> Result<Option<EdgeBasedNode>> {
        if self.nodes.is_empty() {
            return Ok(None);
        }

        // Heap entries: (distance, 1 = leaf page / 0 = internal, index).
        let mut heap: BinaryHeap<Reverse<(u64, u8, u32)>> = BinaryHeap::new();
        let root = &self.nodes[self.root as usize];
        heap.push(Reverse((root.bbox.min_dist_sq(lat, lon), 0, self.root)));

        let mut best: Option<(u64, EdgeBasedNode)> = None;
        while let Some(Reverse((distance, kind, index))) = heap.pop() {
            if let Some((best_distance, _)) = best {
                if distance > best_distance {
                    break;
                }
            }
            if kind == 0 {
                let node = self.nodes[index as usize];
                let child_kind = node.children_are_leaves as u8;
                for child in node.first_child..node.first_child + node.child_count {
                    let child_distance = if node.children_are_leaves {
                        distance // leaf boxes are re-measured per record below
                    } else {
                        self.nodes[child as usize].bbox.min_dist_sq(lat, lon)
                    };
                    heap.push(Reverse((child_distance, child_kind, child)));
                }
            } else {
                for record in self.read_leaf(index)? {
                    let record_distance = BoundingBox::of(&record).min_dist_sq(lat, lon);
                    let closer = match &best {
                        None => true,
                        Some((d, b)) => {
                            record_distance < *d
                                || (record_distance == *d && record.forward_id < b.forward_id)
                        }
                    };
                    if closer {
                        best = Some((record_distance, record));
                    }
                }
            }
        }
        Ok(best.map(|(_, record)| record))
    }

    fn read_leaf(&mut self, page: u32) -> Result<Vec<EdgeBasedNode>> {
        self.leaf_file
            .seek(SeekFrom::Start((page as u64 + 1) * PAGE_SIZE as u64))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        self.leaf_file.read_exact(&mut buf)?;
        let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if count > LEAF_CAPACITY {
            return Err(PrepareError::InternalInvariant(format!(
                "leaf page {page} claims {count} records"
            )));
        }
        let mut records = Vec::with_capacity(count);
        for i in 0..count {
            let offset = 4 + i * RECORD_LEN;
            let record: [u8; RECORD_LEN] = buf[offset..offset + RECORD_LEN].try_into().unwrap();
            records.push(decode_record(&record));
        }
        Ok(records)
    }
}
