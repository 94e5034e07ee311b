//! Cache key templates (spec.md §3/§6), grounded on
//! `original_source/app/core/config.py::CacheKeys`.

pub fn paper_full(paper_id: &str) -> String {
    format!("paper:{paper_id}:full")
}

/// Key for a non-normal selector variant — never the canonical `full` key,
/// so an unusual selector can't evict or shadow the normal view.
pub fn paper_selector(paper_id: &str, selector: &str) -> String {
    format!("paper:{paper_id}:selector:{selector}")
}

pub fn paper_citations_page(paper_id: &str, offset: i64, limit: i64) -> String {
    format!("paper:{paper_id}:citations:{offset}:{limit}")
}

pub fn paper_references_page(paper_id: &str, offset: i64, limit: i64) -> String {
    format!("paper:{paper_id}:references:{offset}:{limit}")
}

pub fn task_status(paper_id: &str) -> String {
    format!("task:{paper_id}:status")
}

pub fn search(query_hash: &str) -> String {
    format!("search:{query_hash}")
}

/// Glob used by `clear_cache` to delete every cache variant for a paper.
pub fn paper_glob(paper_id: &str) -> String {
    format!("paper:{paper_id}:*")
}
