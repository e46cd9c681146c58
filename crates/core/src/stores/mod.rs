pub mod memory;
pub mod neo4j;
pub mod qdrant;

pub use memory::{MemoryGraphStore, MemoryVectorStore};
pub use neo4j::Neo4jGraphStore;
pub use qdrant::QdrantVectorStore;

/// Concept-concept edges are undirected: both orientations address the
/// same stored edge.
pub(crate) fn ordered_pair(first: &str, second: &str) -> (String, String) {
    if first <= second {
        (first.to_string(), second.to_string())
    } else {
        (second.to_string(), first.to_string())
    }
}
