//! C5 — Upstream Client: a reqwest wrapper around the remote
//! scholarly-metadata API, emulating offset-based pagination the upstream
//! doesn't natively support and classifying every failure into the closed
//! taxonomy from `scholar_common`.
//!
//! Grounded on `original_source/app/clients/s2_client.py`: the
//! needed_count/page_size/local-slice dance in `search_papers`, the
//! per-call `except` classification repeated across every method, and the
//! default field lists. The HTTP client shape itself follows
//! `ferrumyx_common::sandbox::SandboxClient` — a single configured base
//! client, reused across calls rather than built per-request.

use scholar_common::{classify_upstream_error, GatewayConfig, GatewayError, Result};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::time::Duration;
use tracing::{instrument, warn};

const DEFAULT_PAPER_FIELDS: &[&str] = &[
    "paperId",
    "title",
    "abstract",
    "year",
    "authors",
    "citationCount",
    "referenceCount",
    "influentialCitationCount",
    "fieldsOfStudy",
    "publicationDate",
    "journal",
    "venue",
    "externalIds",
    "url",
    "openAccessPdf",
    "publicationVenue",
    "publicationTypes",
    "isOpenAccess",
];

const DEFAULT_SEARCH_FIELDS: &[&str] =
    &["paperId", "title", "abstract", "year", "authors", "citationCount", "venue", "fieldsOfStudy", "url"];

/// A page of results with the upstream's reported (or probed) `total`.
#[derive(Debug, Clone)]
pub struct UpstreamPage {
    pub total: i64,
    pub offset: i64,
    pub data: Vec<Value>,
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    relations_total_probe_cap: usize,
}

impl UpstreamClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.transport_deadline)
            .build()
            .map_err(|e| GatewayError::InternalError(format!("failed to build upstream HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            api_key: config.upstream_api_key.as_ref().map(|s| s.expose_secret().to_string()),
            relations_total_probe_cap: config.relations_total_probe_cap,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value> {
        let builder = match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        };

        let response = builder.send().await.map_err(classify_transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_upstream_error(Some(status.as_u16()), message));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::Other(format!("failed to decode upstream response: {e}")))
    }

    /// Fetches a single paper's body (spec.md §4.5). Used for the body-only
    /// upstream request after `remove_relations_fields` strips
    /// `citations`/`references` from the requested selector.
    #[instrument(skip(self, fields))]
    pub async fn get_paper(&self, id: &str, fields: Option<&[String]>) -> Result<Value> {
        let fields_param = join_fields(fields, DEFAULT_PAPER_FIELDS);
        let request = self
            .http
            .get(self.url(&format!("paper/{id}")))
            .query(&[("fields", fields_param.as_str())]);
        self.send(request).await
    }

    /// Emulates offset-based search: the upstream accepts only `limit`, so
    /// the client requests `offset + limit` items (capped at 100, the
    /// upstream's single-page ceiling) and slices locally. `match_title`
    /// bypasses pagination entirely and asks for exactly one best match.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, fields))]
    pub async fn search(
        &self,
        query: &str,
        offset: i64,
        limit: i64,
        fields: Option<&[String]>,
        year: Option<&str>,
        venue: Option<&[String]>,
        fields_of_study: Option<&[String]>,
        match_title: bool,
    ) -> Result<UpstreamPage> {
        let fields_param = join_fields(fields, DEFAULT_SEARCH_FIELDS);

        if match_title {
            let query_params = vec![
                ("query".to_string(), query.to_string()),
                ("limit".to_string(), "1".to_string()),
                ("fields".to_string(), fields_param),
            ];
            let request = self.http.get(self.url("paper/search/match")).query(&query_params);
            let body = self.send(request).await?;
            let data = body.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
            return Ok(UpstreamPage { total: data.len() as i64, offset: 0, data });
        }

        let needed = (offset.max(0) + limit.max(0)).max(0);
        let page_size = needed.clamp(1, 100);

        let mut query_params = vec![
            ("query".to_string(), query.to_string()),
            ("limit".to_string(), page_size.to_string()),
            ("fields".to_string(), fields_param),
        ];
        if let Some(year) = year {
            query_params.push(("year".to_string(), year.to_string()));
        }
        if let Some(venue) = venue {
            if !venue.is_empty() {
                query_params.push(("venue".to_string(), venue.join(",")));
            }
        }
        if let Some(fos) = fields_of_study {
            if !fos.is_empty() {
                query_params.push(("fieldsOfStudy".to_string(), fos.join(",")));
            }
        }

        let request = self.http.get(self.url("paper/search")).query(&query_params);
        let body = self.send(request).await?;

        let total = body.get("total").and_then(Value::as_i64).unwrap_or(0);
        let items = body.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
        let sliced = slice_page(items, offset, limit);

        Ok(UpstreamPage { total, offset, data: sliced })
    }

    /// Citations (who cites this paper). Same offset-emulation strategy as
    /// `search`; if the upstream page lacks a `total`, a second probe at a
    /// large bounded limit establishes one.
    #[instrument(skip(self, fields))]
    pub async fn get_citations(
        &self,
        id: &str,
        offset: i64,
        limit: i64,
        fields: Option<&[String]>,
    ) -> Result<UpstreamPage> {
        self.get_relations(id, "citations", offset, limit, fields).await
    }

    /// References (what this paper cites).
    #[instrument(skip(self, fields))]
    pub async fn get_references(
        &self,
        id: &str,
        offset: i64,
        limit: i64,
        fields: Option<&[String]>,
    ) -> Result<UpstreamPage> {
        self.get_relations(id, "references", offset, limit, fields).await
    }

    async fn get_relations(
        &self,
        id: &str,
        relation: &str,
        offset: i64,
        limit: i64,
        fields: Option<&[String]>,
    ) -> Result<UpstreamPage> {
        let fields_param = join_fields(fields, DEFAULT_PAPER_FIELDS);
        let needed = (offset.max(0) + limit.max(0)).max(0);
        let page_size = needed.clamp(1, 100);

        let request = self
            .http
            .get(self.url(&format!("paper/{id}/{relation}")))
            .query(&[("limit", page_size.to_string()), ("fields", fields_param.clone())]);
        let body = self.send(request).await?;

        let items = body.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut total = body.get("total").and_then(Value::as_i64);

        if total.is_none() {
            let probe_limit = self.relations_total_probe_cap.min(10_000) as i64;
            let probe_request = self
                .http
                .get(self.url(&format!("paper/{id}/{relation}")))
                .query(&[("limit", probe_limit.to_string()), ("fields", "paperId".to_string())]);
            match self.send(probe_request).await {
                Ok(probe_body) => {
                    total = probe_body
                        .get("data")
                        .and_then(Value::as_array)
                        .map(|a| a.len() as i64);
                }
                Err(e) => {
                    warn!(error = %e, id, relation, "total probe failed, falling back to page length");
                }
            }
        }

        let sliced = slice_page(items, offset, limit);
        Ok(UpstreamPage {
            total: total.unwrap_or(sliced.len() as i64),
            offset,
            data: sliced,
        })
    }

    /// Batch paper fetch (POST body with an id list, per spec.md §4.5/§4.8.2).
    #[instrument(skip(self, ids, fields))]
    pub async fn batch_get(&self, ids: &[String], fields: Option<&[String]>) -> Result<Vec<Option<Value>>> {
        let fields_param = join_fields(fields, DEFAULT_PAPER_FIELDS);
        let request = self
            .http
            .post(self.url("paper/batch"))
            .query(&[("fields", fields_param)])
            .json(&serde_json::json!({ "ids": ids }));

        let body = self.send(request).await?;
        let items = body.as_array().cloned().unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|v| if v.is_null() { None } else { Some(v) })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn autocomplete(&self, query: &str) -> Result<Vec<Value>> {
        let request = self.http.get(self.url("paper/autocomplete")).query(&[("query", query)]);
        let body = self.send(request).await?;
        Ok(body
            .get("matches")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    #[instrument(skip(self, fields))]
    pub async fn get_author(&self, id: &str, fields: Option<&[String]>) -> Result<Value> {
        let fields_param = fields.map(|f| f.join(","));
        let mut request = self.http.get(self.url(&format!("author/{id}")));
        if let Some(fields_param) = fields_param {
            request = request.query(&[("fields", fields_param)]);
        }
        self.send(request).await
    }

    /// Transparent pass-through for the proxy component (spec.md §4.5):
    /// forwards a path with arbitrary query params and returns the raw
    /// upstream body, unmodified and unprojected.
    #[instrument(skip(self, query))]
    pub async fn raw_pass_through(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let request = self.http.get(self.url(path)).query(query);
        self.send(request).await
    }
}

fn join_fields(fields: Option<&[String]>, default: &[&str]) -> String {
    match fields {
        Some(fields) if !fields.is_empty() => fields.join(","),
        _ => default.join(","),
    }
}

/// Slices a locally-fetched, upstream-deduplicated page the way the
/// original does: `items[offset:offset+limit]` when `offset` is set, else
/// `items[:limit]`.
fn slice_page(items: Vec<Value>, offset: i64, limit: i64) -> Vec<Value> {
    let offset = offset.max(0) as usize;
    let limit = limit.max(0) as usize;
    if offset >= items.len() {
        return Vec::new();
    }
    let end = (offset + limit).min(items.len());
    items[offset..end].to_vec()
}

fn classify_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(e.to_string())
    } else if e.is_connect() {
        GatewayError::NetworkError(e.to_string())
    } else if let Some(status) = e.status() {
        classify_upstream_error(Some(status.as_u16()), e.to_string())
    } else {
        GatewayError::NetworkError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slice_page_honors_offset_and_limit() {
        let items: Vec<Value> = (0..20).map(|i| json!({"paperId": i})).collect();
        let sliced = slice_page(items, 5, 5);
        assert_eq!(sliced.len(), 5);
        assert_eq!(sliced[0]["paperId"], 5);
    }

    #[test]
    fn slice_page_past_end_is_empty() {
        let items: Vec<Value> = (0..3).map(|i| json!({"paperId": i})).collect();
        assert!(slice_page(items, 10, 5).is_empty());
    }

    #[test]
    fn join_fields_falls_back_to_default() {
        assert_eq!(join_fields(None, &["a", "b"]), "a,b");
        assert_eq!(join_fields(Some(&[]), &["a", "b"]), "a,b");
        assert_eq!(join_fields(Some(&["c".to_string()]), &["a", "b"]), "c");
    }
}
