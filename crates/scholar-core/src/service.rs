//! C8 — Paper Service: the read-through orchestration that ties the
//! identifier, cache, graph, upstream, and queue tiers together.
//!
//! Grounded on `original_source/app/services/core_paper_service.py`'s
//! `get_paper`/`_fetch_from_s2` (cache → graph → upstream waterfall, with
//! the commented-out single-flight waiter here turned into a real
//! in-process rendezvous via [`crate::coalesce::Coalescer`]),
//! `search_papers` (prefer-local-then-fallback with background refresh of
//! the top hits), and `get_papers_batch` (order-preserving batch resolve).

use crate::coalesce::{Coalescer, Role};
use crate::keys;
use crate::projector::{is_normal, project_selector, remove_relations_fields};
use scholar_cache::CacheTier;
use scholar_common::{GatewayConfig, GatewayError, Result};
use scholar_graph::GraphStore;
use scholar_ident::{ExternalId, ExternalIdType, IdentifierIndex};
use scholar_queue::TaskQueue;
use scholar_upstream::{generate_query_hash, QueryHashInput, UpstreamClient};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Number of indexes `GraphStore::schema_check` expects to find; used as a
/// coarse reachability heuristic in [`PaperService::diagnostics`] — a
/// connection failure surfaces every expected index as "missing".
const GRAPH_EXPECTED_INDEXES: usize = 7;

/// Hard cap on pages paged during a segmented reference fetch
/// (`PaperService::fetch_all_references`), bounding the loop so a
/// misbehaving upstream that never returns an empty page can't run away.
const REFERENCE_FETCH_PAGE_CAP: usize = 50;

/// A non-HTTP stand-in for `app/api/v1/health.py`/`debug.py`'s tier
/// reachability checks: booleans a caller (or a future HTTP layer) can
/// expose as a health endpoint, without this crate building one itself.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub cache_reachable: bool,
    pub graph_reachable: bool,
    pub upstream_reachable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelationKind {
    Citations,
    References,
}

impl RelationKind {
    fn doc_field(self) -> &'static str {
        match self {
            RelationKind::Citations => "citations",
            RelationKind::References => "references",
        }
    }

    fn page_key(self, id: &str, offset: i64, limit: i64) -> String {
        match self {
            RelationKind::Citations => keys::paper_citations_page(id, offset, limit),
            RelationKind::References => keys::paper_references_page(id, offset, limit),
        }
    }
}

pub struct PaperService {
    cache: Arc<dyn CacheTier>,
    graph: GraphStore,
    identifiers: IdentifierIndex,
    upstream: UpstreamClient,
    queue: Arc<dyn TaskQueue>,
    config: GatewayConfig,
    coalescer: Coalescer,
}

impl PaperService {
    pub fn new(
        cache: Arc<dyn CacheTier>,
        graph: GraphStore,
        identifiers: IdentifierIndex,
        upstream: UpstreamClient,
        queue: Arc<dyn TaskQueue>,
        config: GatewayConfig,
    ) -> Self {
        Self { cache, graph, identifiers, upstream, queue, config, coalescer: Coalescer::new() }
    }

    /// Resolves `raw_id`, serves from cache/graph when fresh, otherwise
    /// fetches upstream and writes through every tier (spec.md §4.8.1).
    /// A non-normal selector forces `disable_cache`, since a selector-keyed
    /// variant is never the canonical view other readers should see.
    #[instrument(skip(self))]
    pub async fn get_paper(&self, raw_id: &str, selector: Option<&str>, disable_cache: bool) -> Result<Value> {
        let disable_cache = disable_cache || !is_normal(selector);

        if disable_cache {
            let id = self.identifiers.resolve(raw_id).await.unwrap_or_else(|| raw_id.to_string());
            let doc = self.fetch_and_merge(&id, selector).await?;
            return Ok(project_selector(&doc, selector));
        }

        let id = self.identifiers.resolve(raw_id).await.unwrap_or_else(|| raw_id.to_string());
        let cache_key = keys::paper_full(&id);

        if let Some(doc) = self.cache.get(&cache_key).await {
            return Ok(project_selector(&doc, selector));
        }

        match self.coalescer.join(&id) {
            Role::Leader => {
                let result = self.get_paper_as_leader(&id, selector, &cache_key).await;
                self.coalescer.finish(&id);
                result
            }
            Role::Follower(notify) => {
                if self.coalescer.wait(&notify, self.config.coalesce_poll_timeout).await {
                    if let Some(doc) = self.cache.get(&cache_key).await {
                        return Ok(project_selector(&doc, selector));
                    }
                }
                // Leader finished without leaving a usable cache entry, or
                // we gave up waiting: fetch independently rather than block.
                let doc = self.fetch_and_merge(&id, selector).await?;
                Ok(project_selector(&doc, selector))
            }
        }
    }

    async fn get_paper_as_leader(&self, id: &str, selector: Option<&str>, cache_key: &str) -> Result<Value> {
        let graph_doc = GraphStore::ensure_fresh(self.graph.get_paper(id).await, self.config.freshness_window);
        if let Some(doc) = graph_doc {
            self.cache.setex(cache_key, self.config.ttl_paper_full, doc.clone()).await;
            return Ok(project_selector(&doc, selector));
        }

        let doc = self.fetch_and_merge(id, selector).await?;
        Ok(project_selector(&doc, selector))
    }

    /// Marks `id` as processing, fetches the body and a first relations
    /// page from upstream, merges into every tier, and always clears the
    /// processing flag on the way out — success or failure alike.
    async fn fetch_and_merge(&self, id: &str, selector: Option<&str>) -> Result<Value> {
        let task_key = keys::task_status(id);
        self.cache
            .setex(&task_key, self.config.ttl_task_status, json!({"status": "processing"}))
            .await;

        let result = self.fetch_and_merge_inner(id, selector).await;

        self.cache.delete(&task_key).await;
        result
    }

    async fn fetch_and_merge_inner(&self, id: &str, selector: Option<&str>) -> Result<Value> {
        let body_selector = selector.map(remove_relations_fields);
        let fields = body_selector.as_deref().map(split_fields);
        let mut full_doc = self.upstream.get_paper(id, fields.as_deref()).await?;

        let page_size = self.config.relations_page_size as i64;
        let references = self.fetch_all_references(id, page_size).await;

        if let Value::Object(map) = &mut full_doc {
            map.insert("references".to_string(), Value::Array(references));
        }

        // Citations are unbounded and NOT fetched by default; they're only
        // pulled in when the caller's selector explicitly asks for them.
        let fetch_citations = selector.map(requests_citations).unwrap_or(false);
        if fetch_citations {
            let citations = self.upstream.get_citations(id, 0, page_size, None).await.unwrap_or_else(|e| {
                warn!(error = %e, id, "citation prefetch failed, merging paper without citations");
                scholar_upstream::UpstreamPage { total: 0, offset: 0, data: Vec::new() }
            });

            if let Value::Object(map) = &mut full_doc {
                map.insert("citations".to_string(), Value::Array(citations.data.clone()));
            }

            if citations.total > citations.data.len() as i64 {
                self.graph.create_citations_ingest_plan(id, citations.total, page_size).await;
            }
        }

        self.graph.merge_paper(&full_doc).await;
        self.graph.merge_cites(&full_doc).await;
        self.graph.merge_data_chunks(&full_doc).await;

        self.cache.setex(&keys::paper_full(id), self.config.ttl_paper_full, full_doc.clone()).await;
        self.queue.enqueue_graph_merge(full_doc.clone()).await;

        self.upsert_external_ids(id, &full_doc).await;

        Ok(full_doc)
    }

    /// Segmented pagination (glossary): pages `get_references` with
    /// increasing offset until the upstream returns an empty page, per
    /// spec.md §4.8.1(d). Bounded by `REFERENCE_FETCH_PAGE_CAP` rather than
    /// recursing, so a misbehaving upstream that never returns an empty
    /// page cannot wedge the fetch open forever.
    async fn fetch_all_references(&self, id: &str, page_size: i64) -> Vec<Value> {
        let mut data = Vec::new();
        let mut offset = 0i64;

        for _ in 0..REFERENCE_FETCH_PAGE_CAP {
            let page = match self.upstream.get_references(id, offset, page_size, None).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, id, offset, "reference page fetch failed, stopping segmented fetch");
                    break;
                }
            };
            if page.data.is_empty() {
                break;
            }
            let fetched = page.data.len() as i64;
            data.extend(page.data);
            offset += fetched;
            if fetched < page_size {
                break;
            }
        }

        data
    }

    async fn upsert_external_ids(&self, id: &str, full_doc: &Value) {
        let Some(external_ids) = full_doc.get("externalIds").and_then(Value::as_object) else {
            return;
        };

        let ids: Vec<ExternalId> = external_ids
            .iter()
            .filter_map(|(k, v)| {
                let id_type = upstream_external_id_key(k)?;
                let value = v.as_str()?;
                Some(ExternalId { id_type, value: value.to_string() })
            })
            .collect();

        if !ids.is_empty() {
            self.identifiers.batch_upsert(&ids, id).await;
        }
    }

    /// Paginated citations (who cites this paper). Tries, in order: an
    /// inline slice of an already-cached full view, a page-specific cache
    /// entry, the graph tier, then upstream (spec.md §4.8.2).
    #[instrument(skip(self))]
    pub async fn get_paper_citations(
        &self,
        raw_id: &str,
        offset: i64,
        limit: i64,
        fields: Option<&str>,
    ) -> Result<Value> {
        self.get_relation_page(RelationKind::Citations, raw_id, offset, limit, fields).await
    }

    /// Paginated references (what this paper cites).
    #[instrument(skip(self))]
    pub async fn get_paper_references(
        &self,
        raw_id: &str,
        offset: i64,
        limit: i64,
        fields: Option<&str>,
    ) -> Result<Value> {
        self.get_relation_page(RelationKind::References, raw_id, offset, limit, fields).await
    }

    async fn get_relation_page(
        &self,
        kind: RelationKind,
        raw_id: &str,
        offset: i64,
        limit: i64,
        fields: Option<&str>,
    ) -> Result<Value> {
        let id = self.identifiers.resolve(raw_id).await.unwrap_or_else(|| raw_id.to_string());

        if let Some(full) = self.cache.get(&keys::paper_full(&id)).await {
            if let Some(items) = full.get(kind.doc_field()).and_then(Value::as_array) {
                let total = items.len() as i64;
                let sliced = slice_values(items, offset, limit);
                return Ok(relation_page(total, offset, sliced));
            }
        }

        let page_key = kind.page_key(&id, offset, limit);
        if let Some(cached) = self.cache.get(&page_key).await {
            return Ok(cached);
        }

        let rows = match kind {
            RelationKind::Citations => self.graph.get_citations(&id, offset, limit).await,
            RelationKind::References => self.graph.get_references(&id, offset, limit).await,
        };
        if !rows.is_empty() {
            let total = match kind {
                RelationKind::Citations => self.graph.get_citations_total(&id).await,
                RelationKind::References => self.graph.get_references_total(&id).await,
            };
            let response = relation_page(total, offset, rows);
            self.cache.setex(&page_key, self.config.ttl_paper_full, response.clone()).await;
            return Ok(response);
        }

        let fields_vec = fields.map(split_fields);
        let page = match kind {
            RelationKind::Citations => self.upstream.get_citations(&id, offset, limit, fields_vec.as_deref()).await?,
            RelationKind::References => {
                self.upstream.get_references(&id, offset, limit, fields_vec.as_deref()).await?
            }
        };
        let response = relation_page(page.total, page.offset, page.data);
        self.cache.setex(&page_key, self.config.ttl_paper_full, response.clone()).await;
        Ok(response)
    }

    /// Search: cache by query hash, prefer the graph tier's fulltext index
    /// when configured, otherwise fall back upstream and warm the cache
    /// for the top hits in the background (spec.md §4.8.3).
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, fields, year, venue, fields_of_study))]
    pub async fn search_papers(
        &self,
        query: &str,
        offset: i64,
        limit: i64,
        fields: Option<&str>,
        year: Option<&str>,
        venue: Option<&[String]>,
        fields_of_study: Option<&[String]>,
        match_title: bool,
    ) -> Result<Value> {
        let fields_vec = fields.map(split_fields);
        let query_hash = generate_query_hash(&QueryHashInput {
            query: query.to_string(),
            offset,
            limit,
            fields: fields_vec.clone(),
            year: year.map(str::to_string),
            venue: venue.map(|v| v.to_vec()),
            fields_of_study: fields_of_study.map(|v| v.to_vec()),
            match_title,
        });
        let cache_key = keys::search(&query_hash);

        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        if self.config.prefer_local_search && !match_title {
            let mut local = self.graph.search_papers(query, offset, limit).await;
            if local.is_empty() && query.split_whitespace().count() <= 3 {
                // A short query often under-matches `plainto_tsquery`'s
                // stemming; fall back to a prefix/contains scan before
                // giving up on the local tier entirely.
                local = self.graph.find_by_title_prefix(query, limit).await;
            }
            if !local.is_empty() {
                let response = search_response(local.len() as i64, offset, local);
                self.cache.setex(&cache_key, self.config.ttl_search, response.clone()).await;
                return Ok(response);
            }
        }

        let page = self
            .upstream
            .search(query, offset, limit, fields_vec.as_deref(), year, venue, fields_of_study, match_title)
            .await?;
        let response = search_response(page.total, page.offset, page.data.clone());
        self.cache.setex(&cache_key, self.config.ttl_search, response.clone()).await;

        if self.config.enable_background_refresh {
            for doc in page.data.iter().take(3) {
                if let Some(id) = doc.get("paperId").and_then(Value::as_str) {
                    self.queue.enqueue_fetch_from_s2(id, None).await;
                }
            }
        }

        Ok(response)
    }

    /// Order-preserving batch fetch (spec.md §4.8.4): cache `MGET`, then
    /// graph tier, then a single upstream batch call for anything still
    /// missing; ids beyond `batch_max_ids` are rejected up front.
    #[instrument(skip(self, ids, fields))]
    pub async fn get_papers_batch(&self, ids: &[String], fields: Option<&str>) -> Result<Vec<Option<Value>>> {
        if ids.len() > self.config.batch_max_ids {
            return Err(GatewayError::InvalidRequest(format!(
                "batch request exceeds limit of {} ids",
                self.config.batch_max_ids
            )));
        }

        let resolutions = futures::future::join_all(ids.iter().map(|raw_id| self.identifiers.resolve(raw_id))).await;
        let resolved: Vec<String> = resolutions
            .into_iter()
            .zip(ids)
            .map(|(resolved, raw_id)| resolved.unwrap_or_else(|| raw_id.clone()))
            .collect();

        let cache_keys: Vec<String> = resolved.iter().map(|id| keys::paper_full(id)).collect();
        let cached = self.cache.mget(&cache_keys).await;

        let mut results: Vec<Option<Value>> = vec![None; ids.len()];
        let mut missing_idx: Vec<usize> = Vec::new();

        for (idx, hit) in cached.into_iter().enumerate() {
            match hit {
                Some(doc) => results[idx] = Some(project_selector(&doc, fields)),
                None => missing_idx.push(idx),
            }
        }

        let mut still_missing = Vec::new();
        for &idx in &missing_idx {
            match GraphStore::ensure_fresh(self.graph.get_paper(&resolved[idx]).await, self.config.freshness_window) {
                Some(doc) => {
                    self.cache.setex(&cache_keys[idx], self.config.ttl_paper_full, doc.clone()).await;
                    results[idx] = Some(project_selector(&doc, fields));
                }
                None => still_missing.push(idx),
            }
        }

        if !still_missing.is_empty() {
            let fields_vec = fields.map(split_fields);
            let upstream_ids: Vec<String> = still_missing.iter().map(|&i| resolved[i].clone()).collect();
            let fetched = self.upstream.batch_get(&upstream_ids, fields_vec.as_deref()).await?;

            for (slot, doc) in still_missing.iter().zip(fetched.into_iter()) {
                if let Some(doc) = doc {
                    self.cache.setex(&cache_keys[*slot], self.config.ttl_paper_full, doc.clone()).await;
                    self.queue.enqueue_graph_merge(doc.clone()).await;
                    results[*slot] = Some(project_selector(&doc, fields));
                }
            }
        }

        Ok(results)
    }

    /// Deletes every cache variant for `id` (spec.md §4.8.5): the canonical
    /// `full` key, any selector/page variants, and the task status flag.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self, raw_id: &str) -> u64 {
        let id = self.identifiers.resolve(raw_id).await.unwrap_or_else(|| raw_id.to_string());
        let deleted = self.cache.delete_by_pattern(&keys::paper_glob(&id)).await;
        self.cache.delete(&keys::task_status(&id)).await;
        deleted
    }

    /// Forces a fresh upstream fetch and write-through, bypassing whatever
    /// is currently cached or stored in the graph tier (spec.md §4.8.5).
    #[instrument(skip(self))]
    pub async fn warm_cache(&self, raw_id: &str, selector: Option<&str>) -> Result<Value> {
        let id = self.identifiers.resolve(raw_id).await.unwrap_or_else(|| raw_id.to_string());
        let doc = self.fetch_and_merge(&id, selector).await?;
        Ok(project_selector(&doc, selector))
    }

    /// Best-effort tier reachability, for a caller that wants to expose a
    /// health check without this crate owning an HTTP route.
    pub async fn diagnostics(&self) -> Diagnostics {
        let cache_reachable = self
            .cache
            .setex("scholar:diagnostics:ping", self.config.ttl_system_status, json!(true))
            .await;
        let missing_indexes = self.graph.schema_check().await;
        let graph_reachable = missing_indexes.len() < GRAPH_EXPECTED_INDEXES;
        let upstream_reachable = self.upstream.autocomplete("ping").await.is_ok();

        Diagnostics { cache_reachable, graph_reachable, upstream_reachable }
    }
}

/// Maps an `externalIds` object key from an upstream paper body to its
/// identifier type. Deliberately separate from `ExternalIdType::from_prefix`
/// (used for parsing `TYPE:value` raw ids): the upstream body's key names
/// (`PubMed`, `PubMedCentral`) follow `original_source/app/models/paper.py`'s
/// `ExternalIds` field names, not the `PMID`/`PMCID` prefixes a caller types.
fn upstream_external_id_key(key: &str) -> Option<ExternalIdType> {
    match key {
        "DOI" => Some(ExternalIdType::Doi),
        "ArXiv" => Some(ExternalIdType::ArXiv),
        "MAG" => Some(ExternalIdType::Mag),
        "ACL" => Some(ExternalIdType::Acl),
        "PubMed" => Some(ExternalIdType::Pmid),
        "PubMedCentral" => Some(ExternalIdType::Pmcid),
        "DBLP" => Some(ExternalIdType::Dblp),
        "CorpusId" => Some(ExternalIdType::CorpusId),
        _ => None,
    }
}

fn split_fields(selector: &str) -> Vec<String> {
    selector.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// True when `selector` explicitly names `citations` as a top-level field —
/// the only way a caller opts into the otherwise-unbounded citation fetch.
fn requests_citations(selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .any(|token| token.split('.').next().unwrap_or(token) == "citations")
}

fn slice_values(items: &[Value], offset: i64, limit: i64) -> Vec<Value> {
    let offset = offset.max(0) as usize;
    let limit = limit.max(0) as usize;
    if offset >= items.len() {
        return Vec::new();
    }
    let end = (offset + limit).min(items.len());
    items[offset..end].to_vec()
}

fn relation_page(total: i64, offset: i64, data: Vec<Value>) -> Value {
    json!({ "total": total, "offset": offset, "data": data })
}

fn search_response(total: i64, offset: i64, data: Vec<Value>) -> Value {
    json!({ "total": total, "offset": offset, "papers": data, "data": data })
}

// `PaperService` itself needs a live Postgres pool for `GraphStore` and
// `IdentifierIndex`, so its end-to-end behavior (cache/graph/upstream
// waterfall, coalescing, batch ordering) is covered by the
// Postgres-backed integration tests in `scholar-test-utils` rather than
// here. This module covers the pure helpers directly.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_values_honors_offset_and_limit() {
        let items: Vec<Value> = (0..10).map(|i| json!({"paperId": i})).collect();
        let sliced = slice_values(&items, 2, 3);
        assert_eq!(sliced.len(), 3);
        assert_eq!(sliced[0]["paperId"], 2);
    }

    #[test]
    fn slice_values_past_end_is_empty() {
        let items: Vec<Value> = (0..3).map(|i| json!({"paperId": i})).collect();
        assert!(slice_values(&items, 10, 5).is_empty());
    }

    #[test]
    fn split_fields_trims_and_drops_empties() {
        assert_eq!(split_fields("title, year ,,abstract"), vec!["title", "year", "abstract"]);
    }

    #[test]
    fn relation_page_shapes_total_offset_data() {
        let page = relation_page(42, 5, vec![json!({"paperId": "a"})]);
        assert_eq!(page["total"], 42);
        assert_eq!(page["offset"], 5);
        assert_eq!(page["data"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn search_response_mirrors_data_into_papers_for_back_compat() {
        let resp = search_response(1, 0, vec![json!({"paperId": "a"})]);
        assert_eq!(resp["papers"], resp["data"]);
    }

    #[test]
    fn upstream_external_id_key_maps_pubmed_names() {
        assert_eq!(upstream_external_id_key("PubMed"), Some(ExternalIdType::Pmid));
        assert_eq!(upstream_external_id_key("PubMedCentral"), Some(ExternalIdType::Pmcid));
        assert_eq!(upstream_external_id_key("Unknown"), None);
    }
}
