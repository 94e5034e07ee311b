//! Gateway configuration, loaded from the process environment.
//!
//! Every TTL class, page size, and deadline named in spec.md §4.3/§4.8/§5
//! is a field here with the documented default, so the struct is usable
//! with no environment variables at all (tests construct it with
//! `GatewayConfig::default()`). Grounded on the env-driven settings module
//! of `original_source/app/core/config.py` and on the teacher's
//! `dotenvy`-based startup in `ferrumyx-runtime-core`.

use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub upstream_base_url: String,
    pub upstream_api_key: Option<SecretString>,

    pub postgres_dsn: String,
    pub redis_url: String,

    /// TTL for `paper:{id}:full` and non-normal selector variants.
    pub ttl_paper_full: Duration,
    /// TTL for `search:{query_hash}`.
    pub ttl_search: Duration,
    /// TTL for `task:{id}:status` entries.
    pub ttl_task_status: Duration,
    /// TTL for system/health status entries.
    pub ttl_system_status: Duration,

    /// Freshness window for the graph tier (spec.md §4.4, §9 — default is
    /// deliberately generous; document it rather than silently "fixing" it).
    pub freshness_window: Duration,

    /// Page size used when segmenting citation/reference pagination (§4.8.1).
    pub relations_page_size: usize,
    /// Cap applied when probing upstream for a missing `total` (§4.5).
    pub relations_total_probe_cap: usize,

    /// Per-request upstream deadline (§5).
    pub request_deadline: Duration,
    /// Transport-level deadline for the upstream HTTP client (§5).
    pub transport_deadline: Duration,

    /// Bound on how long a waiter polls a `processing` flag before
    /// proceeding to fetch on its own (§4.8.1 single-flight note).
    pub coalesce_poll_timeout: Duration,

    /// Enable background `fetch_from_s2` warming of top search hits (§4.8.3).
    pub enable_background_refresh: bool,
    /// Prefer the graph tier's fulltext index before falling back upstream.
    pub prefer_local_search: bool,

    pub batch_max_ids: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: "https://api.semanticscholar.org/graph/v1".to_string(),
            upstream_api_key: None,
            postgres_dsn: "postgres://localhost/scholar_gateway".to_string(),
            redis_url: "redis://localhost:6379/0".to_string(),
            ttl_paper_full: Duration::from_secs(3600),
            ttl_search: Duration::from_secs(1800),
            ttl_task_status: Duration::from_secs(600),
            ttl_system_status: Duration::from_secs(300),
            freshness_window: Duration::from_secs(2400 * 3600),
            relations_page_size: 200,
            relations_total_probe_cap: 10_000,
            request_deadline: Duration::from_secs(25),
            transport_deadline: Duration::from_secs(60),
            coalesce_poll_timeout: Duration::from_secs(3),
            enable_background_refresh: true,
            prefer_local_search: true,
            batch_max_ids: 500,
        }
    }
}

impl GatewayConfig {
    /// Loads overrides from the environment (via `.env` if present, per the
    /// teacher's `dotenvy::dotenv().ok()` convention), falling back to
    /// `Default::default()` for anything unset.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SCHOLAR_UPSTREAM_BASE_URL") {
            cfg.upstream_base_url = v;
        }
        if let Ok(v) = std::env::var("SCHOLAR_UPSTREAM_API_KEY") {
            cfg.upstream_api_key = Some(SecretString::from(v));
        }
        if let Ok(v) = std::env::var("SCHOLAR_POSTGRES_DSN") {
            cfg.postgres_dsn = v;
        }
        if let Ok(v) = std::env::var("SCHOLAR_REDIS_URL") {
            cfg.redis_url = v;
        }
        if let Ok(v) = env_secs("SCHOLAR_TTL_PAPER_FULL_SECS") {
            cfg.ttl_paper_full = v;
        }
        if let Ok(v) = env_secs("SCHOLAR_TTL_SEARCH_SECS") {
            cfg.ttl_search = v;
        }
        if let Ok(v) = env_secs("SCHOLAR_FRESHNESS_WINDOW_SECS") {
            cfg.freshness_window = v;
        }
        if let Ok(v) = std::env::var("SCHOLAR_RELATIONS_PAGE_SIZE") {
            if let Ok(n) = v.parse() {
                cfg.relations_page_size = n;
            }
        }
        if let Ok(v) = std::env::var("SCHOLAR_ENABLE_BACKGROUND_REFRESH") {
            cfg.enable_background_refresh = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("SCHOLAR_PREFER_LOCAL_SEARCH") {
            cfg.prefer_local_search = v == "1" || v.eq_ignore_ascii_case("true");
        }

        cfg
    }
}

fn env_secs(key: &str) -> std::result::Result<Duration, ()> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .ok_or(())
}
