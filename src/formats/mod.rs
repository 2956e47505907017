//! Binary artifact formats. All little-endian; every pipeline output is
//! prefixed by the 16-byte build stamp.

pub mod crc;
pub mod edges;
pub mod node_graph;
pub mod node_info;
pub mod query_graph;
pub mod restrictions;
pub mod stamp;

pub use edges::{EdgesFile, TurnData};
pub use node_graph::{NodeBasedGraph, NodeGraphFile};
pub use node_info::NodeInfoFile;
pub use query_graph::QueryGraphFile;
pub use restrictions::RestrictionsFile;
pub use stamp::BuildStamp;
