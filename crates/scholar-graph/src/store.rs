//! C4 — Graph Tier: durable paper/author/citation store with a freshness
//! gate, substituting Postgres adjacency tables for the Neo4j backend the
//! original used (grounded on `ferrumyx-kg::pg_repository`'s
//! facts-as-a-graph pattern — no Neo4j driver exists anywhere in this
//! codebase's dependency corpus).
//!
//! Every read degrades to `None`/empty on backend failure; every write
//! failure is logged and returns `false` — per spec.md §4.4/§7, the graph
//! tier must never fail the caller's response.

use crate::model::PaperRow;
use chrono::{Duration as ChronoDuration, Utc};
use scholar_ident::normalize_title;
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{instrument, warn};

#[derive(Clone)]
pub struct GraphStore {
    pool: PgPool,
}

impl GraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the schema (spec.md §4.4/§6) if absent. Safe to call on
    /// every startup; mirrors `ferrumyx-kg`'s idempotent `CREATE ... IF NOT
    /// EXISTS` migrations rather than a separate migration runner, since
    /// schema evolution itself is out of scope (see spec.md Non-goals).
    pub async fn ensure_schema(&self) -> scholar_common::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS papers (
                paper_id        TEXT PRIMARY KEY,
                title           TEXT,
                title_norm      TEXT,
                year            INTEGER,
                venue           TEXT,
                citation_count  INTEGER,
                reference_count INTEGER,
                ingest_status   TEXT NOT NULL DEFAULT 'stub',
                last_updated    TIMESTAMPTZ NOT NULL DEFAULT now(),
                external_ids    JSONB,
                authors         JSONB,
                data_json       JSONB,
                metadata_json   JSONB,
                title_fts       tsvector GENERATED ALWAYS AS (to_tsvector('english', coalesce(title, ''))) STORED
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ix_papers_title_norm ON papers (title_norm)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS ix_papers_year ON papers (year)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS ix_papers_ingest_status ON papers (ingest_status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS ix_papers_title_fts ON papers USING GIN (title_fts)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authors (
                author_id TEXT PRIMARY KEY,
                name      TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_authors (
                paper_id  TEXT NOT NULL REFERENCES papers (paper_id) ON DELETE CASCADE,
                author_id TEXT NOT NULL REFERENCES authors (author_id) ON DELETE CASCADE,
                PRIMARY KEY (paper_id, author_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS ix_paper_authors_author_id ON paper_authors (author_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cites_edges (
                citing_paper_id TEXT NOT NULL,
                cited_paper_id  TEXT NOT NULL,
                position        INTEGER,
                PRIMARY KEY (citing_paper_id, cited_paper_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS ix_cites_edges_cited ON cites_edges (cited_paper_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS data_chunks (
                paper_id   TEXT NOT NULL,
                chunk_type TEXT NOT NULL,
                data_json  JSONB NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (paper_id, chunk_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS ix_data_chunks_paper_id ON data_chunks (paper_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS citation_ingest_plans (
                paper_id   TEXT PRIMARY KEY,
                total      INTEGER NOT NULL,
                page_size  INTEGER NOT NULL,
                status     TEXT NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Verifies the indexes this tier relies on are present; logged as a
    /// warning (not fatal) if any are missing, since a partially-indexed
    /// store still answers queries, only slower.
    pub async fn schema_check(&self) -> Vec<String> {
        let expected = [
            "ix_papers_title_norm",
            "ix_papers_year",
            "ix_papers_ingest_status",
            "ix_papers_title_fts",
            "ix_paper_authors_author_id",
            "ix_cites_edges_cited",
            "ix_data_chunks_paper_id",
        ];

        let present: Vec<String> = match sqlx::query_scalar::<_, String>(
            "SELECT indexname FROM pg_indexes WHERE schemaname = current_schema()",
        )
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "graph schema_check failed to query pg_indexes");
                return expected.iter().map(|s| s.to_string()).collect();
            }
        };

        let missing: Vec<String> = expected
            .iter()
            .filter(|name| !present.iter().any(|p| p == *name))
            .map(|s| s.to_string())
            .collect();

        if !missing.is_empty() {
            warn!(?missing, "graph tier missing expected indexes");
        }
        missing
    }

    #[instrument(skip(self))]
    pub async fn get_paper(&self, paper_id: &str) -> Option<Value> {
        let row = sqlx::query_as::<_, PaperRow>(
            r#"
            SELECT paper_id, title, title_norm, year, venue, citation_count,
                   reference_count, ingest_status, last_updated, external_ids,
                   authors, data_json, metadata_json
            FROM papers WHERE paper_id = $1
            "#,
        )
        .bind(paper_id)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => Some(row.into_doc()),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, paper_id, "graph get_paper failed, treating as miss");
                None
            }
        }
    }

    /// Upserts the Paper node (spec.md §4.4): `dataJson` is always the full
    /// document; flat columns carry only scalar/scalar-list properties for
    /// indexing. `ingestStatus` is unconditionally `full` here — this
    /// operation is only called with a complete upstream body.
    #[instrument(skip(self, full_doc))]
    pub async fn merge_paper(&self, full_doc: &Value) -> bool {
        let Some(paper_id) = full_doc.get("paperId").and_then(Value::as_str) else {
            warn!("graph merge_paper: document missing paperId");
            return false;
        };

        let title = full_doc.get("title").and_then(Value::as_str);
        let title_norm = title.map(normalize_title);
        let year = full_doc.get("year").and_then(Value::as_i64).map(|v| v as i32);
        let venue = full_doc.get("venue").and_then(Value::as_str);
        let citation_count = full_doc.get("citationCount").and_then(Value::as_i64).map(|v| v as i32);
        let reference_count = full_doc.get("referenceCount").and_then(Value::as_i64).map(|v| v as i32);
        let external_ids = full_doc.get("externalIds").cloned();
        let authors = full_doc.get("authors").cloned();

        let result = sqlx::query(
            r#"
            INSERT INTO papers
                (paper_id, title, title_norm, year, venue, citation_count,
                 reference_count, ingest_status, last_updated, external_ids,
                 authors, data_json)
            VALUES ($1,$2,$3,$4,$5,$6,$7,'full',now(),$8,$9,$10)
            ON CONFLICT (paper_id) DO UPDATE SET
                title           = EXCLUDED.title,
                title_norm      = EXCLUDED.title_norm,
                year            = EXCLUDED.year,
                venue           = EXCLUDED.venue,
                citation_count  = EXCLUDED.citation_count,
                reference_count = EXCLUDED.reference_count,
                ingest_status   = 'full',
                last_updated    = now(),
                external_ids    = EXCLUDED.external_ids,
                authors         = EXCLUDED.authors,
                data_json       = EXCLUDED.data_json
            "#,
        )
        .bind(paper_id)
        .bind(title)
        .bind(title_norm)
        .bind(year)
        .bind(venue)
        .bind(citation_count)
        .bind(reference_count)
        .bind(&external_ids)
        .bind(&authors)
        .bind(full_doc)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(error = %e, paper_id, "graph merge_paper failed");
            return false;
        }

        if let Some(authors) = authors.as_ref().and_then(Value::as_array) {
            self.merge_authors(paper_id, authors).await;
        }

        true
    }

    async fn merge_authors(&self, paper_id: &str, authors: &[Value]) {
        for author in authors {
            let (Some(author_id), Some(name)) = (
                author.get("authorId").and_then(Value::as_str),
                author.get("name").and_then(Value::as_str),
            ) else {
                continue;
            };

            let result = sqlx::query(
                r#"
                INSERT INTO authors (author_id, name) VALUES ($1, $2)
                ON CONFLICT (author_id) DO UPDATE SET name = EXCLUDED.name
                "#,
            )
            .bind(author_id)
            .bind(name)
            .execute(&self.pool)
            .await;
            if let Err(e) = result {
                warn!(error = %e, author_id, "graph merge_authors: author upsert failed");
                continue;
            }

            let edge = sqlx::query(
                "INSERT INTO paper_authors (paper_id, author_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(paper_id)
            .bind(author_id)
            .execute(&self.pool)
            .await;
            if let Err(e) = edge {
                warn!(error = %e, paper_id, author_id, "graph merge_authors: edge insert failed");
            }
        }
    }

    /// Merges stub neighbors for `references`/`citations` arrays present on
    /// `full_doc`, then the directed `CITES` edges with `position` (the
    /// reference order). Stubs are inserted with `ON CONFLICT DO NOTHING`
    /// so an existing `full` node is never demoted (spec.md §4.4 invariant).
    #[instrument(skip(self, full_doc))]
    pub async fn merge_cites(&self, full_doc: &Value) -> bool {
        let Some(paper_id) = full_doc.get("paperId").and_then(Value::as_str) else {
            return false;
        };

        let mut ok = true;

        if let Some(references) = full_doc.get("references").and_then(Value::as_array) {
            for (position, reference) in references.iter().enumerate() {
                let Some(ref_id) = reference.get("paperId").and_then(Value::as_str) else {
                    continue;
                };
                ok &= self.merge_stub(ref_id, reference).await;
                ok &= self.merge_cites_edge(paper_id, ref_id, Some(position as i32)).await;
            }
        }

        if let Some(citations) = full_doc.get("citations").and_then(Value::as_array) {
            for citation in citations {
                let Some(citing_id) = citation.get("paperId").and_then(Value::as_str) else {
                    continue;
                };
                ok &= self.merge_stub(citing_id, citation).await;
                ok &= self.merge_cites_edge(citing_id, paper_id, None).await;
            }
        }

        ok
    }

    async fn merge_stub(&self, paper_id: &str, doc: &Value) -> bool {
        let title = doc.get("title").and_then(Value::as_str);
        let title_norm = title.map(normalize_title);
        let citation_count = doc.get("citationCount").and_then(Value::as_i64).map(|v| v as i32);

        let result = sqlx::query(
            r#"
            INSERT INTO papers (paper_id, title, title_norm, citation_count, ingest_status, last_updated)
            VALUES ($1, $2, $3, $4, 'stub', now())
            ON CONFLICT (paper_id) DO NOTHING
            "#,
        )
        .bind(paper_id)
        .bind(title)
        .bind(title_norm)
        .bind(citation_count)
        .execute(&self.pool)
        .await;

        result
            .map_err(|e| warn!(error = %e, paper_id, "graph merge_stub failed"))
            .is_ok()
    }

    async fn merge_cites_edge(&self, citing: &str, cited: &str, position: Option<i32>) -> bool {
        let result = sqlx::query(
            r#"
            INSERT INTO cites_edges (citing_paper_id, cited_paper_id, position)
            VALUES ($1, $2, $3)
            ON CONFLICT (citing_paper_id, cited_paper_id) DO UPDATE
                SET position = COALESCE(EXCLUDED.position, cites_edges.position)
            "#,
        )
        .bind(citing)
        .bind(cited)
        .bind(position)
        .execute(&self.pool)
        .await;

        result
            .map_err(|e| warn!(error = %e, citing, cited, "graph merge_cites_edge failed"))
            .is_ok()
    }

    /// Writes `metadata`, `citations`, `references` as `DataChunk` rows
    /// (spec.md §4.4) — at most one row per `(paper_id, chunk_type)`.
    #[instrument(skip(self, full_doc))]
    pub async fn merge_data_chunks(&self, full_doc: &Value) -> bool {
        let Some(paper_id) = full_doc.get("paperId").and_then(Value::as_str) else {
            return false;
        };

        let mut metadata = full_doc.clone();
        if let Value::Object(map) = &mut metadata {
            map.remove("citations");
            map.remove("references");
        }

        let mut ok = self.upsert_chunk(paper_id, "metadata", &metadata).await;

        if let Some(citations) = full_doc.get("citations") {
            ok &= self.upsert_chunk(paper_id, "citations", citations).await;
        }
        if let Some(references) = full_doc.get("references") {
            ok &= self.upsert_chunk(paper_id, "references", references).await;
        }

        ok
    }

    async fn upsert_chunk(&self, paper_id: &str, chunk_type: &str, data: &Value) -> bool {
        let result = sqlx::query(
            r#"
            INSERT INTO data_chunks (paper_id, chunk_type, data_json, last_updated)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (paper_id, chunk_type) DO UPDATE
                SET data_json = EXCLUDED.data_json, last_updated = now()
            "#,
        )
        .bind(paper_id)
        .bind(chunk_type)
        .bind(data)
        .execute(&self.pool)
        .await;

        result
            .map_err(|e| warn!(error = %e, paper_id, chunk_type, "graph upsert_chunk failed"))
            .is_ok()
    }

    /// Records a pending ingest plan for a paper whose citation set is too
    /// large to merge inline; a background worker consumes it later. No
    /// such worker ships in this tier (spec.md Non-goals exclude background
    /// schedulers) — the plan row is the handoff point.
    pub async fn create_citations_ingest_plan(&self, paper_id: &str, total: i64, page_size: i64) -> bool {
        let result = sqlx::query(
            r#"
            INSERT INTO citation_ingest_plans (paper_id, total, page_size, status, created_at)
            VALUES ($1, $2, $3, 'pending', now())
            ON CONFLICT (paper_id) DO UPDATE
                SET total = EXCLUDED.total, page_size = EXCLUDED.page_size
            "#,
        )
        .bind(paper_id)
        .bind(total)
        .bind(page_size)
        .execute(&self.pool)
        .await;

        result
            .map_err(|e| warn!(error = %e, paper_id, "graph create_citations_ingest_plan failed"))
            .is_ok()
    }

    /// Citing papers ordered by `citationCount` desc, each passed through
    /// the freshness gate.
    pub async fn get_citations(&self, paper_id: &str, offset: i64, limit: i64) -> Vec<Value> {
        let rows = sqlx::query_as::<_, PaperRow>(
            r#"
            SELECT p.paper_id, p.title, p.title_norm, p.year, p.venue, p.citation_count,
                   p.reference_count, p.ingest_status, p.last_updated, p.external_ids,
                   p.authors, p.data_json, p.metadata_json
            FROM cites_edges e
            JOIN papers p ON p.paper_id = e.citing_paper_id
            WHERE e.cited_paper_id = $1
            ORDER BY p.citation_count DESC NULLS LAST
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(paper_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        self.gate_rows(rows, "get_citations", paper_id).await
    }

    /// Referenced papers ordered by stored `position` ascending, then by
    /// `citationCount` desc (spec.md §4.4), each passed through the
    /// freshness gate.
    pub async fn get_references(&self, paper_id: &str, offset: i64, limit: i64) -> Vec<Value> {
        let rows = sqlx::query_as::<_, PaperRow>(
            r#"
            SELECT p.paper_id, p.title, p.title_norm, p.year, p.venue, p.citation_count,
                   p.reference_count, p.ingest_status, p.last_updated, p.external_ids,
                   p.authors, p.data_json, p.metadata_json
            FROM cites_edges e
            JOIN papers p ON p.paper_id = e.cited_paper_id
            WHERE e.citing_paper_id = $1
            ORDER BY COALESCE(e.position, -1) ASC, p.citation_count DESC NULLS LAST
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(paper_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        self.gate_rows(rows, "get_references", paper_id).await
    }

    async fn gate_rows(
        &self,
        rows: Result<Vec<PaperRow>, sqlx::Error>,
        op: &str,
        paper_id: &str,
    ) -> Vec<Value> {
        match rows {
            Ok(rows) => rows
                .into_iter()
                .filter(|r| is_fresh(r.last_updated, self.freshness_window()))
                .map(PaperRow::into_doc)
                .collect(),
            Err(e) => {
                warn!(error = %e, paper_id, op, "graph relation read failed");
                Vec::new()
            }
        }
    }

    fn freshness_window(&self) -> Duration {
        Duration::from_secs(2400 * 3600)
    }

    /// `referenceCount` on the node, falling back to an edge count
    /// (spec.md §4.4, mirroring `get_references_total`'s node-property
    /// preference).
    pub async fn get_references_total(&self, paper_id: &str) -> i64 {
        let node_count: Result<Option<i32>, sqlx::Error> =
            sqlx::query_scalar("SELECT reference_count FROM papers WHERE paper_id = $1")
                .bind(paper_id)
                .fetch_optional(&self.pool)
                .await
                .map(|v| v.flatten());

        if let Ok(Some(n)) = node_count {
            return n as i64;
        }

        let edge_count: Result<i64, sqlx::Error> =
            sqlx::query_scalar("SELECT count(*) FROM cites_edges WHERE citing_paper_id = $1")
                .bind(paper_id)
                .fetch_one(&self.pool)
                .await;

        edge_count.unwrap_or(0)
    }

    /// `citationCount` on the node, falling back to an edge count —
    /// symmetric to `get_references_total` for the incoming-edge side.
    pub async fn get_citations_total(&self, paper_id: &str) -> i64 {
        let node_count: Result<Option<i32>, sqlx::Error> =
            sqlx::query_scalar("SELECT citation_count FROM papers WHERE paper_id = $1")
                .bind(paper_id)
                .fetch_optional(&self.pool)
                .await
                .map(|v| v.flatten());

        if let Ok(Some(n)) = node_count {
            return n as i64;
        }

        let edge_count: Result<i64, sqlx::Error> =
            sqlx::query_scalar("SELECT count(*) FROM cites_edges WHERE cited_paper_id = $1")
                .bind(paper_id)
                .fetch_one(&self.pool)
                .await;

        edge_count.unwrap_or(0)
    }

    pub async fn search_papers(&self, query: &str, offset: i64, limit: i64) -> Vec<Value> {
        let rows = sqlx::query_as::<_, PaperRow>(
            r#"
            SELECT paper_id, title, title_norm, year, venue, citation_count,
                   reference_count, ingest_status, last_updated, external_ids,
                   authors, data_json, metadata_json
            FROM papers
            WHERE title_fts @@ plainto_tsquery('english', $1)
            ORDER BY ts_rank(title_fts, plainto_tsquery('english', $1)) DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(query)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows.into_iter().map(PaperRow::into_doc).collect(),
            Err(e) => {
                warn!(error = %e, query, "graph search_papers failed");
                Vec::new()
            }
        }
    }

    /// Supplemented feature (not named by spec.md §4.4, present in
    /// `original_source`'s `find_papers_by_title_norm_contains`): a light
    /// prefix/contains match over `title_norm` for fuzzy title lookups.
    pub async fn find_by_title_prefix(&self, title_fragment: &str, limit: i64) -> Vec<Value> {
        let Some(norm) = normalize_title(title_fragment) else {
            return Vec::new();
        };
        let pattern = format!("{}%", norm.replace('%', "\\%"));

        let rows = sqlx::query_as::<_, PaperRow>(
            r#"
            SELECT paper_id, title, title_norm, year, venue, citation_count,
                   reference_count, ingest_status, last_updated, external_ids,
                   authors, data_json, metadata_json
            FROM papers
            WHERE title_norm LIKE $1 OR title_norm LIKE $2
            LIMIT $3
            "#,
        )
        .bind(&pattern)
        .bind(format!("%{}%", norm.replace('%', "\\%")))
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows.into_iter().map(PaperRow::into_doc).collect(),
            Err(e) => {
                warn!(error = %e, title_fragment, "graph find_by_title_prefix failed");
                Vec::new()
            }
        }
    }

    /// Drops `doc` when its `lastUpdated` falls outside `max_age`
    /// (spec.md §4.4's freshness gate); this variant takes the caller's
    /// configured window instead of the hardcoded default in `gate_rows`,
    /// used by `get_paper` callers that already hold a `GatewayConfig`.
    pub fn ensure_fresh(doc: Option<Value>, max_age: Duration) -> Option<Value> {
        let doc = doc?;
        let last_updated = doc.get("lastUpdated").and_then(Value::as_str)?;
        let parsed = chrono::DateTime::parse_from_rfc3339(last_updated).ok()?;
        if is_fresh(parsed.with_timezone(&Utc), max_age) {
            Some(doc)
        } else {
            None
        }
    }
}

fn is_fresh(last_updated: chrono::DateTime<Utc>, max_age: Duration) -> bool {
    let age = Utc::now() - last_updated;
    age < ChronoDuration::from_std(max_age).unwrap_or(ChronoDuration::max_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ensure_fresh_keeps_recent_doc() {
        let doc = json!({"paperId": "abc", "lastUpdated": Utc::now().to_rfc3339()});
        assert!(GraphStore::ensure_fresh(Some(doc), Duration::from_secs(3600)).is_some());
    }

    #[test]
    fn ensure_fresh_drops_stale_doc() {
        let stale = Utc::now() - ChronoDuration::hours(10_000);
        let doc = json!({"paperId": "abc", "lastUpdated": stale.to_rfc3339()});
        assert!(GraphStore::ensure_fresh(Some(doc), Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn ensure_fresh_none_input_stays_none() {
        assert!(GraphStore::ensure_fresh(None, Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn paper_row_prefers_data_json_over_flat_columns() {
        let row = PaperRow {
            paper_id: "abc".to_string(),
            title: Some("flat title".to_string()),
            title_norm: Some("flat title".to_string()),
            year: Some(2020),
            venue: None,
            citation_count: Some(5),
            reference_count: Some(2),
            ingest_status: "full".to_string(),
            last_updated: Utc::now(),
            external_ids: None,
            authors: None,
            data_json: Some(json!({"paperId": "abc", "title": "rich title"})),
            metadata_json: None,
        };
        let doc = row.into_doc();
        assert_eq!(doc["title"], "rich title");
        assert!(doc.get("lastUpdated").is_some());
    }
}
