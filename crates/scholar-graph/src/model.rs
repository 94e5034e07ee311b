//! Row shapes for the graph tier's Postgres schema (spec.md §4.4).
//!
//! Neo4j's label/edge model is substituted here with Postgres tables: a
//! `papers` node table, a `cites_edges` adjacency table, and a
//! `data_chunks` table keyed by `(paper_id, chunk_type)` — the same split
//! `ferrumyx-kg::pg_repository` uses for facts-as-a-graph over `sqlx`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct PaperRow {
    pub paper_id: String,
    pub title: Option<String>,
    pub title_norm: Option<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub citation_count: Option<i32>,
    pub reference_count: Option<i32>,
    pub ingest_status: String,
    pub last_updated: DateTime<Utc>,
    pub external_ids: Option<Value>,
    pub authors: Option<Value>,
    pub data_json: Option<Value>,
    pub metadata_json: Option<Value>,
}

impl PaperRow {
    /// Reconstructs the document the same way `neo4j_client.get_paper` does:
    /// `dataJson` is the source of truth when present, enriched with the
    /// node's own `lastUpdated`; otherwise the flat columns are returned.
    pub fn into_doc(self) -> Value {
        if let Some(mut doc) = self.data_json {
            if let Value::Object(map) = &mut doc {
                map.insert(
                    "lastUpdated".to_string(),
                    Value::String(self.last_updated.to_rfc3339()),
                );
            }
            return doc;
        }

        serde_json::json!({
            "paperId": self.paper_id,
            "title": self.title,
            "year": self.year,
            "venue": self.venue,
            "citationCount": self.citation_count,
            "referenceCount": self.reference_count,
            "ingestStatus": self.ingest_status,
            "lastUpdated": self.last_updated.to_rfc3339(),
            "externalIds": self.external_ids,
            "authors": self.authors,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Stub,
    Full,
}

impl IngestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestStatus::Stub => "stub",
            IngestStatus::Full => "full",
        }
    }
}
