use crate::error::EngineError;
use crate::models::Concept;
use crate::traits::GraphStore;
use std::sync::Arc;

/// Canonical form of a concept name: trimmed, case-folded, internal
/// whitespace collapsed. Deduplication keys on this, so it must stay a
/// pure function of the input.
pub fn canonical_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deduplicates concept mentions into canonical concept nodes. The
/// lookup-or-create itself happens inside the graph store as a
/// conditional write, so concurrent resolution of the same name from
/// different requests (or different server instances) converges on one
/// node.
pub struct ConceptResolver<G> {
    graph: Arc<G>,
}

impl<G> ConceptResolver<G>
where
    G: GraphStore + Send + Sync,
{
    pub fn new(graph: Arc<G>) -> Self {
        Self { graph }
    }

    /// Resolves a raw mention to its canonical concept, creating the
    /// concept on first sight. Every call counts as one mention; new
    /// spellings are appended to the alias set.
    pub async fn resolve(&self, raw_name: &str) -> Result<Concept, EngineError> {
        let canonical = canonical_name(raw_name);
        if canonical.is_empty() {
            return Err(EngineError::Validation(
                "concept name is empty after normalization".to_string(),
            ));
        }

        let display = raw_name.split_whitespace().collect::<Vec<_>>().join(" ");
        self.graph
            .resolve_concept(&canonical, &display, display.as_str())
            .await
    }
}
