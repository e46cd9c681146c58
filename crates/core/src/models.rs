use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stored document. The text itself lives in the chunks; the document
/// node carries identity and metadata only. Metadata may be amended by a
/// later upsert, the text never is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub metadata: BTreeMap<String, String>,
    pub ingested_at: DateTime<Utc>,
}

/// A bounded span of document text, the unit of embedding and ranking.
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub position: u64,
    pub text: String,
    /// Canonical names of the concepts mentioned in this span.
    pub concepts: Vec<String>,
}

/// A canonical, deduplicated concept node. The canonical name is the
/// normalized form of every alias that resolved to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub canonical_name: String,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub mention_count: u64,
}

/// A concept one edge away from another, with the co-occurrence weight of
/// the connecting edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborConcept {
    pub concept: Concept,
    pub weight: f64,
}

/// A concept reached by graph traversal, annotated with its shortest hop
/// distance from the start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedConcept {
    pub concept: Concept,
    pub hop_distance: u32,
    pub weight: f64,
}

/// `concept` action payload: the concept plus its graph footprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptOverview {
    pub concept: Concept,
    pub related_count: usize,
    pub document_count: usize,
}

/// A document mentioning some concept, ranked by how often it does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMention {
    pub document_id: String,
    pub title: String,
    pub mention_count: u64,
}

/// A chunk returned by the passage lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub chunk_id: String,
    pub document_id: String,
    pub position: u64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document: Document,
    pub chunk_count: usize,
    pub concept_count: usize,
}

/// Outcome of one `ingest` call. Ingestion is chunk-granular: committed
/// chunks stay committed, failures are listed by chunk index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub chunk_count: usize,
    pub concept_count: usize,
    pub failed_chunks: Vec<usize>,
}

/// A ranked hybrid search result. `concept_path` names the chain of
/// concepts that justified the graph bonus, empty for pure vector hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub position: u64,
    pub text: String,
    pub score: f64,
    pub vector_score: f64,
    pub graph_bonus: f64,
    pub concept_path: Vec<String>,
}

/// The payload stored alongside each embedding in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub chunk_id: String,
    pub position: u64,
    pub text: String,
    pub concepts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A similarity hit from the vector index.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub score: f64,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub min_chunk_chars: usize,
    pub max_embed_retries: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_200,
            chunk_overlap_chars: 120,
            min_chunk_chars: 120,
            max_embed_retries: 3,
        }
    }
}

/// Hybrid ranking knobs. The weighting between vector similarity and
/// graph proximity is configuration, not a constant.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub default_n_results: usize,
    pub default_max_hops: u32,
    /// Vector candidates are over-fetched by this factor to leave room
    /// for graph-based boosting before the final truncation.
    pub overfetch_factor: usize,
    pub vector_weight: f64,
    pub graph_weight: f64,
    /// Hop-zero bonus; each hop divides it by (1 + hop_distance).
    pub graph_bonus_base: f64,
    /// Cap on the accumulated per-chunk graph bonus.
    pub max_graph_bonus: f64,
    pub max_embed_retries: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            default_n_results: 5,
            default_max_hops: 1,
            overfetch_factor: 3,
            vector_weight: 0.7,
            graph_weight: 0.3,
            graph_bonus_base: 1.0,
            max_graph_bonus: 2.0,
            max_embed_retries: 3,
        }
    }
}
