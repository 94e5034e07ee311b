//! Job payloads for the three kinds this queue carries (spec.md §4.7),
//! grounded on the three ARQ task functions in
//! `original_source/app/tasks/worker.py`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Re-runs the full read-through path server-side to refresh caches.
    FetchFromS2 {
        paper_id: String,
        fields: Option<String>,
    },
    /// Runs `merge_paper`, `merge_externalIds`, `merge_data_chunks`, and
    /// best-effort `merge_cites` against the graph tier.
    GraphMerge { full_doc: Value },
    /// Writes a paper (optionally selector-projected) into the cache tier.
    SetCache {
        paper_id: String,
        data: Value,
        fields: Option<String>,
    },
}

impl Job {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Job::FetchFromS2 { .. } => "fetch_from_s2",
            Job::GraphMerge { .. } => "graph_merge",
            Job::SetCache { .. } => "set_cache",
        }
    }
}
