//! C2 — Identifier Index: a durable `(external_type, external_value) ↔
//! paper_id` mapping with atomic upsert and bounded cardinality per paper.
//!
//! Backed by Postgres via `sqlx`, following the `ON CONFLICT` upsert idiom
//! used throughout `ferrumyx-kg/src/pg_repository.rs`. Failures are logged
//! and turned into `false`/`None` rather than propagated — per spec.md §4.2,
//! a failure here must never fail the caller's read.

use crate::model::{parse, ExternalId, ExternalIdType};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{instrument, warn};

#[derive(Clone)]
pub struct IdentifierIndex {
    pool: PgPool,
}

impl IdentifierIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates `external_id_mappings` and its indexes if they don't exist
    /// (spec.md §6 schema). Safe to call on every startup.
    pub async fn ensure_schema(&self) -> scholar_common::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS external_id_mappings (
                external_id    TEXT NOT NULL,
                external_type  TEXT NOT NULL,
                paper_id       TEXT NOT NULL,
                created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (external_id, external_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_external_id_mappings_paper_type \
             ON external_id_mappings (paper_id, external_type)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_external_id_mappings_paper_id \
             ON external_id_mappings (paper_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_external_id_mappings_updated_at \
             ON external_id_mappings (updated_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// `parse(raw)` then, if the type is `PaperId`, return the value
    /// directly; otherwise look the mapping up. Returns `None` when the raw
    /// id doesn't resolve — callers treat that as "not resolved" and may
    /// still query upstream with the raw value (spec.md §4.2).
    #[instrument(skip(self))]
    pub async fn resolve(&self, raw: &str) -> Option<String> {
        let parsed = parse(raw)?;
        if parsed.id_type == ExternalIdType::PaperId {
            return Some(parsed.value);
        }
        self.lookup(parsed.id_type, &parsed.value).await
    }

    async fn lookup(&self, id_type: ExternalIdType, value: &str) -> Option<String> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT paper_id FROM external_id_mappings WHERE external_id = $1 AND external_type = $2",
        )
        .bind(value)
        .bind(id_type.as_str())
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "identifier index lookup failed, treating as unresolved");
                None
            }
        }
    }

    /// Atomic insert-or-update keyed by `(paper_id, type)`: if a value
    /// already exists for that type on that paper, it is replaced;
    /// `created_at` is preserved, `updated_at` refreshed. Safe under
    /// concurrent upserts of the same pair (single `INSERT ... ON CONFLICT`).
    #[instrument(skip(self))]
    pub async fn upsert(&self, external_id: &ExternalId, paper_id: &str) -> bool {
        let result = sqlx::query(
            r#"
            INSERT INTO external_id_mappings (external_id, external_type, paper_id, created_at, updated_at)
            VALUES ($1, $2, $3, now(), now())
            ON CONFLICT (paper_id, external_type) DO UPDATE
                SET external_id = EXCLUDED.external_id,
                    updated_at  = now()
            "#,
        )
        .bind(&external_id.value)
        .bind(external_id.id_type.as_str())
        .bind(paper_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, paper_id, "identifier index upsert failed");
                false
            }
        }
    }

    pub async fn batch_upsert(&self, ids: &[ExternalId], paper_id: &str) -> usize {
        let mut ok = 0;
        for id in ids {
            if self.upsert(id, paper_id).await {
                ok += 1;
            }
        }
        ok
    }

    pub async fn list_for(&self, paper_id: &str) -> HashMap<String, String> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT external_type, external_id FROM external_id_mappings WHERE paper_id = $1",
        )
        .bind(paper_id)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, paper_id, "identifier index list_for failed");
                HashMap::new()
            }
        }
    }

    /// One-time startup consolidation (spec.md §4.2): for each
    /// `(paper_id, type)` group with multiple rows (e.g. a unique
    /// constraint being introduced onto pre-existing data), keep the row
    /// with the newest `updated_at` and delete the rest. Grounded on
    /// `original_source/migration_scripts/schema_migrate.py`.
    pub async fn consolidate_duplicates(&self) -> scholar_common::Result<u64> {
        let result = sqlx::query(
            r#"
            WITH ranked AS (
                SELECT external_id, external_type,
                       row_number() OVER (
                           PARTITION BY paper_id, external_type
                           ORDER BY updated_at DESC, external_id DESC
                       ) AS rn
                FROM external_id_mappings
            )
            DELETE FROM external_id_mappings m
            USING ranked r
            WHERE m.external_id = r.external_id
              AND m.external_type = r.external_type
              AND r.rn > 1
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
