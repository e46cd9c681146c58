use crate::error::EngineError;
use crate::ingest::IngestionPipeline;
use crate::models::{
    Concept, DocumentMention, DocumentSummary, IngestOutcome, Passage, RelatedConcept, SearchHit,
};
use crate::navigator::GraphNavigator;
use crate::search::HybridSearchEngine;
use crate::traits::{GraphStore, VectorStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// The fixed action registry. Unknown actions are answered with this
/// list so clients can discover the protocol.
pub const RECOGNIZED_ACTIONS: [&str; 8] = [
    "ping",
    "search",
    "concept",
    "related-concepts",
    "documents",
    "add-document",
    "books-by-concept",
    "passages-about-concept",
];

const DEFAULT_RELATED_MAX_HOPS: u32 = 1;

/// Decoded request: one tagged union per action, so parameter checking
/// is a typed decode step instead of ad-hoc payload access.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
enum Action {
    Ping,
    Search {
        query: String,
        n_results: Option<i64>,
        max_hops: Option<i64>,
    },
    Concept {
        concept_name: String,
    },
    RelatedConcepts {
        concept_name: String,
        max_hops: Option<i64>,
    },
    Documents {
        limit: Option<i64>,
    },
    AddDocument {
        text: String,
        metadata: Option<BTreeMap<String, String>>,
    },
    BooksByConcept {
        concept_name: String,
        limit: Option<i64>,
    },
    PassagesAboutConcept {
        concept_name: String,
        limit: Option<i64>,
    },
}

/// Per-request lifecycle. Each request owns its own phase; nothing here
/// is shared across requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPhase {
    Idle,
    Processing,
    Responded,
}

#[derive(Debug, Serialize)]
struct PingResponse {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    status: &'static str,
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct ConceptResponse {
    status: &'static str,
    concept: Concept,
    related_count: usize,
    document_count: usize,
}

#[derive(Debug, Serialize)]
struct RelatedConceptsResponse {
    status: &'static str,
    concepts: Vec<RelatedConcept>,
}

#[derive(Debug, Serialize)]
struct DocumentsResponse {
    status: &'static str,
    documents: Vec<DocumentSummary>,
    total_count: usize,
}

#[derive(Debug, Serialize)]
struct AddDocumentResponse {
    status: &'static str,
    document_id: String,
    chunk_count: usize,
    concept_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed_chunks: Vec<usize>,
}

#[derive(Debug, Serialize)]
struct BooksByConceptResponse {
    status: &'static str,
    concept_name: String,
    books: Vec<DocumentMention>,
    total_count: usize,
}

#[derive(Debug, Serialize)]
struct PassagesAboutConceptResponse {
    status: &'static str,
    concept_name: String,
    passages: Vec<Passage>,
}

fn error_response(code: &str, message: impl Into<String>) -> Value {
    json!({
        "status": "error",
        "error": code,
        "message": message.into(),
    })
}

fn unknown_action_response(message: impl Into<String>) -> Value {
    json!({
        "status": "error",
        "error": "unknown_action",
        "message": message.into(),
        "recognized_actions": RECOGNIZED_ACTIONS,
    })
}

fn non_negative_limit(name: &str, value: Option<i64>) -> Result<Option<usize>, EngineError> {
    match value {
        None => Ok(None),
        Some(value) if value < 0 => Err(EngineError::Validation(format!(
            "{name} must be non-negative, got {value}"
        ))),
        Some(value) => Ok(Some(value as usize)),
    }
}

fn non_negative_hops(name: &str, value: Option<i64>) -> Result<Option<u32>, EngineError> {
    match value {
        None => Ok(None),
        Some(value) if value < 0 => Err(EngineError::Validation(format!(
            "{name} must be non-negative, got {value}"
        ))),
        Some(value) => u32::try_from(value)
            .map(Some)
            .map_err(|_| EngineError::Validation(format!("{name} is out of range: {value}"))),
    }
}

/// Routes decoded action objects to the engine and serializes results.
/// Every request gets exactly one response; no handler failure escapes
/// as anything but an error response.
pub struct ActionDispatcher<G, V> {
    ingestion: IngestionPipeline<G, V>,
    search: HybridSearchEngine<G, V>,
    navigator: GraphNavigator<G>,
}

impl<G, V> ActionDispatcher<G, V>
where
    G: GraphStore + Send + Sync + 'static,
    V: VectorStore + Send + Sync,
{
    pub fn new(
        ingestion: IngestionPipeline<G, V>,
        search: HybridSearchEngine<G, V>,
        navigator: GraphNavigator<G>,
    ) -> Self {
        Self {
            ingestion,
            search,
            navigator,
        }
    }

    /// Parses one raw protocol line and dispatches it.
    pub async fn dispatch_line(&self, line: &str) -> Value {
        match serde_json::from_str::<Value>(line) {
            Ok(raw) => self.dispatch(raw).await,
            Err(error) => error_response(
                "validation_error",
                format!("request is not valid JSON: {error}"),
            ),
        }
    }

    pub async fn dispatch(&self, raw: Value) -> Value {
        let request_id = Uuid::new_v4();
        let mut phase = RequestPhase::Idle;
        debug!(request_id = %request_id, phase = ?phase, "request received");

        let Some(action_name) = raw.get("action").and_then(Value::as_str).map(str::to_owned)
        else {
            return unknown_action_response("request has no 'action' field");
        };

        if !RECOGNIZED_ACTIONS.contains(&action_name.as_str()) {
            return unknown_action_response(format!("unknown action '{action_name}'"));
        }

        let action: Action = match serde_json::from_value(raw) {
            Ok(action) => action,
            Err(error) => {
                return error_response(
                    "validation_error",
                    format!("invalid parameters for '{action_name}': {error}"),
                )
            }
        };

        phase = RequestPhase::Processing;
        debug!(request_id = %request_id, action = %action_name, phase = ?phase, "dispatching");

        let response = match self.handle(action).await {
            Ok(value) => value,
            Err(error) => {
                warn!(request_id = %request_id, action = %action_name, %error, "handler failed");
                error_response(error.code(), error.to_string())
            }
        };

        phase = RequestPhase::Responded;
        debug!(request_id = %request_id, action = %action_name, phase = ?phase, "responded");
        response
    }

    async fn handle(&self, action: Action) -> Result<Value, EngineError> {
        match action {
            Action::Ping => to_response(PingResponse {
                status: "success",
                message: "graphrag engine ready",
            }),
            Action::Search {
                query,
                n_results,
                max_hops,
            } => {
                let n_results = non_negative_limit("n_results", n_results)?;
                let max_hops = non_negative_hops("max_hops", max_hops)?;
                let results = self.search.search(&query, n_results, max_hops).await?;
                to_response(SearchResponse {
                    status: "success",
                    results,
                })
            }
            Action::Concept { concept_name } => {
                let overview = self.navigator.concept(&concept_name).await?;
                to_response(ConceptResponse {
                    status: "success",
                    concept: overview.concept,
                    related_count: overview.related_count,
                    document_count: overview.document_count,
                })
            }
            Action::RelatedConcepts {
                concept_name,
                max_hops,
            } => {
                let max_hops = non_negative_hops("max_hops", max_hops)?
                    .unwrap_or(DEFAULT_RELATED_MAX_HOPS);
                let concepts = self
                    .navigator
                    .related_concepts(&concept_name, max_hops)
                    .await?;
                to_response(RelatedConceptsResponse {
                    status: "success",
                    concepts,
                })
            }
            Action::Documents { limit } => {
                let limit = non_negative_limit("limit", limit)?;
                let (documents, total_count) = self.navigator.documents(limit).await?;
                to_response(DocumentsResponse {
                    status: "success",
                    documents,
                    total_count,
                })
            }
            Action::AddDocument { text, metadata } => {
                let outcome: IngestOutcome = self
                    .ingestion
                    .ingest(&text, metadata.unwrap_or_default())
                    .await?;
                to_response(AddDocumentResponse {
                    status: "success",
                    document_id: outcome.document_id,
                    chunk_count: outcome.chunk_count,
                    concept_count: outcome.concept_count,
                    failed_chunks: outcome.failed_chunks,
                })
            }
            Action::BooksByConcept {
                concept_name,
                limit,
            } => {
                let limit = non_negative_limit("limit", limit)?;
                let (books, total_count) =
                    self.navigator.books_by_concept(&concept_name, limit).await?;
                to_response(BooksByConceptResponse {
                    status: "success",
                    concept_name,
                    books,
                    total_count,
                })
            }
            Action::PassagesAboutConcept {
                concept_name,
                limit,
            } => {
                let limit = non_negative_limit("limit", limit)?;
                let passages = self
                    .navigator
                    .passages_about_concept(&concept_name, limit)
                    .await?;
                to_response(PassagesAboutConceptResponse {
                    status: "success",
                    concept_name,
                    passages,
                })
            }
        }
    }
}

fn to_response<T: Serialize>(response: T) -> Result<Value, EngineError> {
    Ok(serde_json::to_value(response)?)
}
