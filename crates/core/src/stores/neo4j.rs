use crate::error::EngineError;
use crate::models::{
    Chunk, Concept, Document, DocumentMention, DocumentSummary, NeighborConcept,
};
use crate::stores::ordered_pair;
use crate::traits::GraphStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Graph store over the Neo4j HTTP transactional Cypher endpoint. All
/// writes are `MERGE`-keyed, so re-running them is safe and concurrent
/// concept creation resolves to a single node inside the database.
pub struct Neo4jGraphStore {
    endpoint: String,
    database: String,
    username: String,
    password: String,
    client: Client,
}

impl Neo4jGraphStore {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            client: Client::new(),
        }
    }

    fn tx_url(&self) -> String {
        format!("{}/db/{}/tx/commit", self.endpoint, self.database)
    }

    fn unavailable(error: reqwest::Error) -> EngineError {
        EngineError::StoreUnavailable {
            backend: "neo4j".to_string(),
            details: error.to_string(),
        }
    }

    fn bad_response(details: impl Into<String>) -> EngineError {
        EngineError::BackendResponse {
            backend: "neo4j".to_string(),
            details: details.into(),
        }
    }

    async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Value>, EngineError> {
        let response = self
            .client
            .post(self.tx_url())
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({
                "statements": [
                    {
                        "statement": statement,
                        "parameters": parameters,
                    }
                ]
            }))
            .send()
            .await
            .map_err(Self::unavailable)?;

        if !response.status().is_success() {
            return Err(Self::bad_response(response.status().to_string()));
        }

        let body: Value = response.json().await.map_err(Self::unavailable)?;
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if let Some(first) = errors.first() {
                return Err(Self::bad_response(first.to_string()));
            }
        }

        Ok(extract_rows(&body).into_iter().cloned().collect())
    }
}

fn extract_rows(payload: &Value) -> Vec<&Value> {
    payload
        .pointer("/results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|result| result.pointer("/data").and_then(Value::as_array))
                .flatten()
                .filter_map(|entry| entry.pointer("/row"))
                .filter(|row| row.is_array())
                .collect()
        })
        .unwrap_or_default()
}

fn row_str(row: &Value, index: usize) -> String {
    row.get(index)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn row_u64(row: &Value, index: usize) -> u64 {
    row.get(index).and_then(Value::as_u64).unwrap_or(0)
}

fn row_f64(row: &Value, index: usize) -> f64 {
    row.get(index).and_then(Value::as_f64).unwrap_or(0.0)
}

fn row_string_list(row: &Value, index: usize) -> Vec<String> {
    row.get(index)
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn concept_from_row(row: &Value) -> Concept {
    Concept {
        canonical_name: row_str(row, 0),
        display_name: row_str(row, 1),
        aliases: row_string_list(row, 2),
        mention_count: row_u64(row, 3),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| Neo4jGraphStore::bad_response(format!("bad timestamp '{raw}': {error}")))
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert_document(&self, document: &Document) -> Result<(), EngineError> {
        let statement = r#"
            MERGE (d:Document {document_id: $document_id})
            SET d.title = $title,
                d.ingested_at = $ingested_at,
                d.metadata = $metadata
        "#;
        self.run(
            statement,
            json!({
                "document_id": document.document_id,
                "title": document.title,
                "ingested_at": document.ingested_at.to_rfc3339(),
                "metadata": serde_json::to_string(&document.metadata)?,
            }),
        )
        .await?;
        Ok(())
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), EngineError> {
        let statement = r#"
            MERGE (c:Chunk {chunk_id: $chunk_id})
            SET c.document_id = $document_id,
                c.position = $position,
                c.text = $text,
                c.concepts = $concepts
            MERGE (d:Document {document_id: $document_id})
            MERGE (d)-[:HAS_CHUNK]->(c)
        "#;
        self.run(
            statement,
            json!({
                "chunk_id": chunk.chunk_id,
                "document_id": chunk.document_id,
                "position": chunk.position,
                "text": chunk.text,
                "concepts": chunk.concepts,
            }),
        )
        .await?;
        Ok(())
    }

    async fn resolve_concept(
        &self,
        canonical: &str,
        display: &str,
        raw_alias: &str,
    ) -> Result<Concept, EngineError> {
        let statement = r#"
            MERGE (k:Concept {canonical_name: $canonical})
            ON CREATE SET k.display_name = $display,
                          k.aliases = [$alias],
                          k.mention_count = 1
            ON MATCH SET k.mention_count = k.mention_count + 1,
                         k.aliases = CASE
                             WHEN $alias IN k.aliases THEN k.aliases
                             ELSE k.aliases + $alias
                         END
            RETURN k.canonical_name, k.display_name, k.aliases, k.mention_count
        "#;
        let rows = self
            .run(
                statement,
                json!({
                    "canonical": canonical,
                    "display": display,
                    "alias": raw_alias,
                }),
            )
            .await?;

        rows.first()
            .map(concept_from_row)
            .ok_or_else(|| Self::bad_response("concept upsert returned no row"))
    }

    async fn get_concept(&self, canonical: &str) -> Result<Option<Concept>, EngineError> {
        let statement = r#"
            MATCH (k:Concept {canonical_name: $canonical})
            RETURN k.canonical_name, k.display_name, k.aliases, k.mention_count
        "#;
        let rows = self.run(statement, json!({ "canonical": canonical })).await?;
        Ok(rows.first().map(concept_from_row))
    }

    async fn record_chunk_mention(
        &self,
        chunk_id: &str,
        canonical: &str,
        count: u64,
    ) -> Result<(), EngineError> {
        let statement = r#"
            MATCH (c:Chunk {chunk_id: $chunk_id})
            MATCH (k:Concept {canonical_name: $canonical})
            MERGE (c)-[m:MENTIONS]->(k)
            ON CREATE SET m.weight = $count
            ON MATCH SET m.weight = m.weight + $count
        "#;
        self.run(
            statement,
            json!({ "chunk_id": chunk_id, "canonical": canonical, "count": count }),
        )
        .await?;
        Ok(())
    }

    async fn record_document_mention(
        &self,
        document_id: &str,
        canonical: &str,
        count: u64,
    ) -> Result<(), EngineError> {
        let statement = r#"
            MATCH (d:Document {document_id: $document_id})
            MATCH (k:Concept {canonical_name: $canonical})
            MERGE (d)-[m:MENTIONS]->(k)
            ON CREATE SET m.weight = $count
            ON MATCH SET m.weight = m.weight + $count
        "#;
        self.run(
            statement,
            json!({ "document_id": document_id, "canonical": canonical, "count": count }),
        )
        .await?;
        Ok(())
    }

    async fn relate_concepts(
        &self,
        first: &str,
        second: &str,
        weight_delta: f64,
    ) -> Result<(), EngineError> {
        if first == second {
            return Ok(());
        }
        let (first, second) = ordered_pair(first, second);
        let statement = r#"
            MATCH (a:Concept {canonical_name: $first})
            MATCH (b:Concept {canonical_name: $second})
            MERGE (a)-[r:RELATED_TO]->(b)
            ON CREATE SET r.weight = $delta
            ON MATCH SET r.weight = r.weight + $delta
        "#;
        self.run(
            statement,
            json!({ "first": first, "second": second, "delta": weight_delta }),
        )
        .await?;
        Ok(())
    }

    async fn concept_neighbors(
        &self,
        canonical: &str,
    ) -> Result<Vec<NeighborConcept>, EngineError> {
        let statement = r#"
            MATCH (:Concept {canonical_name: $canonical})-[r:RELATED_TO]-(other:Concept)
            RETURN other.canonical_name, other.display_name, other.aliases,
                   other.mention_count, r.weight
        "#;
        let rows = self.run(statement, json!({ "canonical": canonical })).await?;
        Ok(rows
            .iter()
            .map(|row| NeighborConcept {
                concept: concept_from_row(row),
                weight: row_f64(row, 4),
            })
            .collect())
    }

    async fn concept_documents(
        &self,
        canonical: &str,
    ) -> Result<Vec<DocumentMention>, EngineError> {
        let statement = r#"
            MATCH (d:Document)-[m:MENTIONS]->(:Concept {canonical_name: $canonical})
            RETURN d.document_id, d.title, m.weight
        "#;
        let rows = self.run(statement, json!({ "canonical": canonical })).await?;
        Ok(rows
            .iter()
            .map(|row| DocumentMention {
                document_id: row_str(row, 0),
                title: row_str(row, 1),
                mention_count: row_f64(row, 2) as u64,
            })
            .collect())
    }

    async fn concept_chunks(&self, canonical: &str) -> Result<Vec<Chunk>, EngineError> {
        let statement = r#"
            MATCH (c:Chunk)-[:MENTIONS]->(:Concept {canonical_name: $canonical})
            RETURN c.chunk_id, c.document_id, c.position, c.text, c.concepts
        "#;
        let rows = self.run(statement, json!({ "canonical": canonical })).await?;
        Ok(rows
            .iter()
            .map(|row| Chunk {
                chunk_id: row_str(row, 0),
                document_id: row_str(row, 1),
                position: row_u64(row, 2),
                text: row_str(row, 3),
                concepts: row_string_list(row, 4),
            })
            .collect())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, EngineError> {
        let statement = r#"
            MATCH (d:Document)
            OPTIONAL MATCH (d)-[:HAS_CHUNK]->(c:Chunk)
            WITH d, count(DISTINCT c) AS chunk_count
            OPTIONAL MATCH (d)-[:MENTIONS]->(k:Concept)
            RETURN d.document_id, d.title, d.metadata, d.ingested_at,
                   chunk_count, count(DISTINCT k)
            ORDER BY d.ingested_at DESC
        "#;
        let rows = self.run(statement, json!({})).await?;

        let mut summaries = Vec::new();
        for row in &rows {
            let metadata: BTreeMap<String, String> =
                serde_json::from_str(&row_str(row, 2)).unwrap_or_default();
            summaries.push(DocumentSummary {
                document: Document {
                    document_id: row_str(row, 0),
                    title: row_str(row, 1),
                    metadata,
                    ingested_at: parse_timestamp(&row_str(row, 3))?,
                },
                chunk_count: row_u64(row, 4) as usize,
                concept_count: row_u64(row, 5) as usize,
            });
        }
        Ok(summaries)
    }

    async fn document_count(&self) -> Result<usize, EngineError> {
        let rows = self
            .run("MATCH (d:Document) RETURN count(d)", json!({}))
            .await?;
        Ok(rows
            .first()
            .map(|row| row_u64(row, 0) as usize)
            .unwrap_or(0))
    }
}
