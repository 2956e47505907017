//! Offline preprocessing for the routing engine.
//!
//! Pipeline:
//! - Load the node-based graph, restrictions, and the vehicle profile
//! - Edge expansion: directed segments become nodes, legal turns become
//!   edges (bollards, signals, restrictions, u-turn policy applied)
//! - Node map and edge-record artifacts, checksummed
//! - Packed R-tree over edge-based nodes for coordinate snapping
//! - Contraction hierarchy over the edge-based graph
//! - CSR query graph serialized with the build stamp and checksum
//!
//! The edge-based graph is the routing graph; everything the query engine
//! consumes is produced here.

pub mod cli;
pub mod config;
pub mod contractor;
pub mod ebg;
pub mod error;
pub mod formats;
pub mod geo;
pub mod graph;
pub mod profile;
pub mod rtree;
pub mod temp_storage;
pub mod validate;

pub use cli::{run_pipeline, Cli, RunSummary};
pub use error::PrepareError;
