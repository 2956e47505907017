//! Core graph model shared by all pipeline stages.
//!
//! Node-based ids are dense `u32` handles internal to the pipeline; the
//! 64-bit external ids survive only inside [`NodeInfo`]. Coordinates are
//! fixed-point integers in units of 1e-5 degrees throughout.

pub mod static_graph;

/// Dense node identifier of the node-based input graph.
pub type NodeId = u32;

/// Sentinel for "no node" / "no edge-based id in this direction".
pub const INVALID_NODE: NodeId = u32::MAX;

/// Fixed-point coordinate scale: 1e-5 degrees per unit.
pub const COORDINATE_PRECISION: f64 = 100_000.0;

pub const MIN_LAT: i32 = -90 * 100_000;
pub const MAX_LAT: i32 = 90 * 100_000;
pub const MIN_LON: i32 = -180 * 100_000;
pub const MAX_LON: i32 = 180 * 100_000;

/// Per-node record persisted to `<prefix>.osrm.nodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub external_id: u64,
    pub lat: i32,
    pub lon: i32,
    pub bollard: bool,
    pub traffic_light: bool,
}

impl NodeInfo {
    pub fn in_valid_range(&self) -> bool {
        (MIN_LAT..=MAX_LAT).contains(&self.lat) && (MIN_LON..=MAX_LON).contains(&self.lon)
    }
}

/// Node-based input edge as read from `<prefix>.osrm`.
///
/// Invariant: at least one of `forward` / `backward` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportEdge {
    pub source: NodeId,
    pub target: NodeId,
    /// Length in meters.
    pub distance: u32,
    pub forward: bool,
    pub backward: bool,
    pub name_id: u32,
    pub road_type: u8,
    pub roundabout: bool,
    pub ignore_in_grid: bool,
    /// km/h; non-positive values are rejected at load time.
    pub speed: i16,
}

impl ImportEdge {
    /// Traversal duration in deci-seconds, floored at 1 so that every edge
    /// carries positive weight into the contraction.
    pub fn duration_ds(&self) -> i32 {
        let ds = (self.distance as i64 * 36) / self.speed.max(1) as i64;
        ds.max(1) as i32
    }
}

/// A turn restriction at `via_node`. The `from` / `to` edges are identified
/// by their far endpoints at the via node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnRestriction {
    pub from_node: NodeId,
    pub via_node: NodeId,
    pub to_node: NodeId,
    /// `true` for an only-turn (forbids every other turn from `from_node`),
    /// `false` for a plain no-turn.
    pub only: bool,
}

/// A directed segment of the node-based graph after expansion. One record
/// per node-based edge; a one-way stores [`INVALID_NODE`] for the missing
/// direction. Endpoints define the bounding box used by the R-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeBasedNode {
    pub forward_id: u32,
    pub reverse_id: u32,
    pub name_id: u32,
    pub lat1: i32,
    pub lon1: i32,
    pub lat2: i32,
    pub lon2: i32,
    pub belongs_to_tiny_cc: bool,
    pub ignore_in_grid: bool,
}

impl EdgeBasedNode {
    pub fn midpoint(&self) -> (i32, i32) {
        (
            (self.lat1 as i64 + self.lat2 as i64).div_euclid(2) as i32,
            (self.lon1 as i64 + self.lon2 as i64).div_euclid(2) as i32,
        )
    }
}

/// A turn expressed as an edge between two edge-based nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeBasedEdge {
    pub source: u32,
    pub target: u32,
    /// Id of the traversed segment, kept for unpacking bookkeeping.
    pub edge_id: u32,
    /// Deci-seconds.
    pub weight: i32,
    pub forward: bool,
    pub backward: bool,
}

/// Payload of a contracted edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeData {
    /// Weight in deci-seconds. Strictly positive for every emitted edge.
    pub distance: u32,
    /// For shortcuts: the contracted middle node. For originals: input id.
    pub id: u32,
    pub shortcut: bool,
    pub forward: bool,
    pub backward: bool,
    pub original_edges: u32,
}

/// Contracted edge, the unit of the CH output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryEdge {
    pub source: u32,
    pub target: u32,
    pub data: EdgeData,
}

impl Ord for QueryEdge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.source, self.target, self.data.distance).cmp(&(
            other.source,
            other.target,
            other.data.distance,
        ))
    }
}

impl PartialOrd for QueryEdge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
