//! Dictionary encoding for RDF terms
//!
//! Every distinct term is stored once and referred to everywhere else by an
//! 8-byte [`NodeId`].

pub mod codec;
pub mod node_id;
pub mod node_table;
pub mod term;

pub use node_id::NodeId;
pub use node_table::{NodeTable, NodeTableMark, NodeTableStats};
pub use term::Term;
