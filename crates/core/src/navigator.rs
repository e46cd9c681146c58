use crate::error::EngineError;
use crate::models::{
    Concept, ConceptOverview, DocumentMention, DocumentSummary, Passage, RelatedConcept,
};
use crate::resolver::canonical_name;
use crate::traits::GraphStore;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Pure graph traversals: no embedding step anywhere. Name lookups use
/// the resolver's normalization but never create concepts.
pub struct GraphNavigator<G> {
    graph: Arc<G>,
}

impl<G> GraphNavigator<G>
where
    G: GraphStore + Send + Sync,
{
    pub fn new(graph: Arc<G>) -> Self {
        Self { graph }
    }

    async fn lookup(&self, name: &str) -> Result<Concept, EngineError> {
        let canonical = canonical_name(name);
        if canonical.is_empty() {
            return Err(EngineError::Validation(
                "concept name is empty".to_string(),
            ));
        }
        self.graph
            .get_concept(&canonical)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("concept '{}'", name.trim())))
    }

    pub async fn concept(&self, name: &str) -> Result<ConceptOverview, EngineError> {
        let concept = self.lookup(name).await?;
        let related_count = self
            .graph
            .concept_neighbors(&concept.canonical_name)
            .await?
            .len();
        let document_count = self
            .graph
            .concept_documents(&concept.canonical_name)
            .await?
            .len();
        Ok(ConceptOverview {
            concept,
            related_count,
            document_count,
        })
    }

    /// Concepts reachable within `max_hops`, each at its shortest hop
    /// distance, ordered by distance then edge weight descending. The
    /// start concept is never part of the result.
    pub async fn related_concepts(
        &self,
        name: &str,
        max_hops: u32,
    ) -> Result<Vec<RelatedConcept>, EngineError> {
        let start = self.lookup(name).await?;

        let mut visited = HashSet::from([start.canonical_name.clone()]);
        let mut frontier = vec![start.canonical_name];
        let mut related = Vec::new();

        for hop in 1..=max_hops {
            // collect the whole next level before committing it, taking
            // the strongest edge when several paths land on one concept
            let mut discovered: BTreeMap<String, (Concept, f64)> = BTreeMap::new();
            for concept in &frontier {
                for neighbor in self.graph.concept_neighbors(concept).await? {
                    let canonical = neighbor.concept.canonical_name.clone();
                    if visited.contains(&canonical) {
                        continue;
                    }
                    let entry = discovered
                        .entry(canonical)
                        .or_insert((neighbor.concept, 0.0));
                    entry.1 = entry.1.max(neighbor.weight);
                }
            }
            if discovered.is_empty() {
                break;
            }

            frontier = discovered.keys().cloned().collect();
            visited.extend(frontier.iter().cloned());
            for (concept, weight) in discovered.into_values() {
                related.push(RelatedConcept {
                    concept,
                    hop_distance: hop,
                    weight,
                });
            }
        }

        related.sort_by(|left, right| {
            left.hop_distance
                .cmp(&right.hop_distance)
                .then_with(|| right.weight.total_cmp(&left.weight))
                .then_with(|| left.concept.canonical_name.cmp(&right.concept.canonical_name))
        });
        Ok(related)
    }

    /// Documents mentioning the concept, ranked by how often each one
    /// mentions it. Returns the page plus the unlimited total.
    pub async fn books_by_concept(
        &self,
        name: &str,
        limit: Option<usize>,
    ) -> Result<(Vec<DocumentMention>, usize), EngineError> {
        let concept = self.lookup(name).await?;
        let mut books = self.graph.concept_documents(&concept.canonical_name).await?;

        books.sort_by(|left, right| {
            right
                .mention_count
                .cmp(&left.mention_count)
                .then_with(|| left.document_id.cmp(&right.document_id))
        });
        let total = books.len();
        if let Some(limit) = limit {
            books.truncate(limit);
        }
        Ok((books, total))
    }

    pub async fn passages_about_concept(
        &self,
        name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Passage>, EngineError> {
        let concept = self.lookup(name).await?;
        let mut chunks = self.graph.concept_chunks(&concept.canonical_name).await?;

        chunks.sort_by(|left, right| {
            left.document_id
                .cmp(&right.document_id)
                .then_with(|| left.position.cmp(&right.position))
        });
        if let Some(limit) = limit {
            chunks.truncate(limit);
        }
        Ok(chunks
            .into_iter()
            .map(|chunk| Passage {
                chunk_id: chunk.chunk_id,
                document_id: chunk.document_id,
                position: chunk.position,
                text: chunk.text,
            })
            .collect())
    }

    /// Document summaries newest first, plus the true total regardless
    /// of the limit.
    pub async fn documents(
        &self,
        limit: Option<usize>,
    ) -> Result<(Vec<DocumentSummary>, usize), EngineError> {
        let mut summaries = self.graph.list_documents().await?;
        summaries.sort_by(|left, right| {
            right
                .document
                .ingested_at
                .cmp(&left.document.ingested_at)
                .then_with(|| left.document.document_id.cmp(&right.document.document_id))
        });

        let total = self.graph.document_count().await?;
        if let Some(limit) = limit {
            summaries.truncate(limit);
        }
        Ok((summaries, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::extract::KeywordConceptExtractor;
    use crate::ingest::IngestionPipeline;
    use crate::models::IngestionOptions;
    use crate::stores::{MemoryGraphStore, MemoryVectorStore};
    use std::collections::BTreeMap;

    async fn seeded_navigator() -> (Arc<MemoryGraphStore>, GraphNavigator<MemoryGraphStore>) {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new(32));
        let pipeline = IngestionPipeline::new(
            graph.clone(),
            vector,
            Arc::new(HashingEmbedder { dimensions: 32 }),
            Arc::new(KeywordConceptExtractor::new().unwrap()),
            IngestionOptions::default(),
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("title".to_string(), "retrieval notes".to_string());
        metadata.insert("concepts".to_string(), "RAG,GraphRAG".to_string());

        let text = "RAG systems pair retrieval with generation. GraphRAG adds a \
                    knowledge graph. RAG quality improves, and RAG latency drops.";
        pipeline.ingest(text, metadata).await.unwrap();

        let navigator = GraphNavigator::new(graph.clone());
        (graph, navigator)
    }

    #[tokio::test]
    async fn concept_lookup_normalizes_but_never_creates() {
        let (graph, navigator) = seeded_navigator().await;

        let overview = navigator.concept("  rAg ").await.unwrap();
        assert_eq!(overview.concept.canonical_name, "rag");
        assert_eq!(overview.document_count, 1);

        let error = navigator.concept("No Such Thing").await.unwrap_err();
        assert!(matches!(error, EngineError::NotFound(_)));
        assert!(graph.get_concept("no such thing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn end_to_end_mentions_flow_into_books_and_passages() {
        let (_, navigator) = seeded_navigator().await;

        let (books, total) = navigator.books_by_concept("RAG", Some(10)).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(books.len(), 1);
        assert!(books[0].mention_count >= 3);
        assert_eq!(books[0].title, "retrieval notes");

        let passages = navigator
            .passages_about_concept("GraphRAG", Some(5))
            .await
            .unwrap();
        assert!(!passages.is_empty());
        assert!(passages[0].text.contains("GraphRAG"));
    }

    #[tokio::test]
    async fn related_concepts_exclude_start_and_respect_hops() {
        let graph = Arc::new(MemoryGraphStore::new());
        for name in ["a", "b", "c"] {
            graph.resolve_concept(name, name, name).await.unwrap();
        }
        graph.relate_concepts("a", "b", 2.0).await.unwrap();
        graph.relate_concepts("b", "c", 1.0).await.unwrap();

        let navigator = GraphNavigator::new(graph);

        let one_hop = navigator.related_concepts("a", 1).await.unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].concept.canonical_name, "b");
        assert_eq!(one_hop[0].hop_distance, 1);

        let two_hops = navigator.related_concepts("a", 2).await.unwrap();
        let names: Vec<_> = two_hops
            .iter()
            .map(|related| related.concept.canonical_name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(two_hops.iter().all(|related| related.concept.canonical_name != "a"));
        assert_eq!(two_hops[1].hop_distance, 2);
    }

    #[tokio::test]
    async fn multiply_reachable_concepts_keep_their_shortest_distance() {
        let graph = Arc::new(MemoryGraphStore::new());
        for name in ["a", "b", "c"] {
            graph.resolve_concept(name, name, name).await.unwrap();
        }
        // c is adjacent to a and also reachable through b
        graph.relate_concepts("a", "b", 1.0).await.unwrap();
        graph.relate_concepts("a", "c", 1.0).await.unwrap();
        graph.relate_concepts("b", "c", 5.0).await.unwrap();

        let navigator = GraphNavigator::new(graph);
        let related = navigator.related_concepts("a", 2).await.unwrap();

        let c_entries: Vec<_> = related
            .iter()
            .filter(|related| related.concept.canonical_name == "c")
            .collect();
        assert_eq!(c_entries.len(), 1);
        assert_eq!(c_entries[0].hop_distance, 1);
    }

    #[tokio::test]
    async fn zero_limit_documents_keep_the_true_total() {
        let (_, navigator) = seeded_navigator().await;

        let (documents, total) = navigator.documents(Some(0)).await.unwrap();
        assert!(documents.is_empty());
        assert_eq!(total, 1);

        let (all, _) = navigator.documents(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].chunk_count >= 1);
        assert!(all[0].concept_count >= 2);
    }

    #[tokio::test]
    async fn zero_limit_books_and_passages_return_empty_pages() {
        let (_, navigator) = seeded_navigator().await;

        let (books, total) = navigator.books_by_concept("RAG", Some(0)).await.unwrap();
        assert!(books.is_empty());
        assert_eq!(total, 1);

        let passages = navigator
            .passages_about_concept("RAG", Some(0))
            .await
            .unwrap();
        assert!(passages.is_empty());
    }
}
