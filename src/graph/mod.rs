//! Graph model: entities, relations, the per-document graph and its files.

pub mod assembler;
pub mod document;
pub mod entity;
pub mod ids;
pub mod io;
pub mod relation;
pub mod stats;

pub use assembler::GraphAssembler;
pub use document::{DocumentGraph, DocumentInfo};
pub use entity::{Entity, TEMPORAL_TYPES, UNKNOWN_TYPE};
pub use ids::{canonical_name, type_token, IdStrategy};
pub use io::{load_json, save_json, to_graphml, write_graphml};
pub use relation::{Relation, DEFAULT_RELATION_TYPE};
pub use stats::GraphStatistics;
