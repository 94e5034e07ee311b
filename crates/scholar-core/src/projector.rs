//! C6 — Field Projector: selector parsing and response shaping.
//!
//! Grounded on the `fields` query-parameter handling threaded through every
//! method of `original_source/app/services/core_paper_service.py`
//! (`PaperFieldsConfig.normalize_fields` / `is_in_noraml_fields`) — a
//! comma-separated selector is split into a field tree, used both to
//! decide cacheability and to shape the final response.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Dotted field paths kept whole rather than split into a nested tree —
/// the original treats `embedding.specter_v2` as a single opaque field
/// name rather than a `{embedding: {specter_v2: ...}}` path, since the
/// upstream API itself addresses it that way.
const ATOMIC_DOTTED_FIELDS: &[&str] = &["embedding.specter_v2", "embedding.specter_v1", "tldr"];

/// The "normal" field set (spec.md §4.6): a selector that requests only
/// these fields (or is empty) uses the canonical `paper:{id}:full` cache
/// key; anything else cache-keys by the selector text.
const NORMAL_FIELDS: &[&str] = &[
    "paperId",
    "title",
    "abstract",
    "year",
    "authors",
    "citationCount",
    "referenceCount",
    "influentialCitationCount",
    "fieldsOfStudy",
    "s2FieldsOfStudy",
    "publicationDate",
    "journal",
    "venue",
    "externalIds",
    "url",
    "openAccessPdf",
    "publicationVenue",
    "publicationTypes",
    "isOpenAccess",
    "citations",
    "references",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTree(pub HashMap<String, FieldTree>);

impl FieldTree {
    fn insert_path(&mut self, path: &[&str]) {
        if path.is_empty() {
            return;
        }
        let entry = self.0.entry(path[0].to_string()).or_default();
        entry.insert_path(&path[1..]);
    }

    pub fn is_leaf(&self) -> bool {
        self.0.is_empty()
    }
}

/// Splits `s` on commas, then each token on dots into a nested tree,
/// except the atomic allow-list which is kept as a single whole-string key.
pub fn parse_selector(s: &str) -> FieldTree {
    let mut tree = FieldTree::default();

    for token in s.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if let Some(atomic) = ATOMIC_DOTTED_FIELDS.iter().find(|a| **a == token) {
            tree.0.entry(atomic.to_string()).or_default();
            continue;
        }

        let parts: Vec<&str> = token.split('.').collect();
        tree.insert_path(&parts);
    }

    tree
}

/// Recursively filters `value` to the paths named in `tree`. Maps keep
/// only keys present in the tree (recursing into their subtrees); lists
/// of maps are projected element-wise; scalars pass through untouched.
/// Unknown requested paths are silently dropped, never an error.
pub fn project(value: &Value, tree: &FieldTree) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, subtree) in &tree.0 {
                if let Some(v) = map.get(key) {
                    out.insert(key.clone(), project_value(v, subtree));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| project(v, tree)).collect()),
        other => other.clone(),
    }
}

fn project_value(value: &Value, subtree: &FieldTree) -> Value {
    if subtree.is_leaf() {
        return value.clone();
    }
    project(value, subtree)
}

/// True when `selector` is empty or every top-level field it names is a
/// member of `NORMAL_FIELDS`. A normal selector is safe to serve from (and
/// write to) the canonical `full` cache key.
pub fn is_normal(selector: Option<&str>) -> bool {
    let Some(selector) = selector else { return true };
    let selector = selector.trim();
    if selector.is_empty() {
        return true;
    }

    selector
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .all(|token| {
            let top = token.split('.').next().unwrap_or(token);
            NORMAL_FIELDS.contains(&top)
        })
}

/// Strips `citations`/`references` subtrees from a selector before issuing
/// the body-only upstream request — those relations are fetched through
/// their dedicated paginated endpoints instead.
pub fn remove_relations_fields(selector: &str) -> String {
    selector
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|t| {
            let top = t.split('.').next().unwrap_or(t);
            top != "citations" && top != "references"
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Applies the post-projection rule (spec.md §4.6): `paperId` is always
/// present, and `citations`/`references` are emitted as empty lists rather
/// than omitted when requested-but-absent, matching the upstream response
/// shape callers already depend on.
pub fn finalize_projection(mut projected: Value, original: &Value, tree: &FieldTree) -> Value {
    if let Value::Object(map) = &mut projected {
        if let Some(paper_id) = original.get("paperId") {
            map.entry("paperId").or_insert_with(|| paper_id.clone());
        }
        for relation in ["citations", "references"] {
            if tree.0.contains_key(relation) && !map.contains_key(relation) {
                map.insert(relation.to_string(), Value::Array(Vec::new()));
            }
        }
    }
    projected
}

/// Projects `doc` by `selector`; `None`/empty selector returns `doc`
/// unchanged (a normal, unfiltered view).
pub fn project_selector(doc: &Value, selector: Option<&str>) -> Value {
    let Some(selector) = selector else { return doc.clone() };
    let selector = selector.trim();
    if selector.is_empty() {
        return doc.clone();
    }

    let tree = parse_selector(selector);
    let projected = project(doc, &tree);
    finalize_projection(projected, doc, &tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_selector_is_normal() {
        assert!(is_normal(None));
        assert!(is_normal(Some("")));
        assert!(is_normal(Some("title,year")));
    }

    #[test]
    fn non_normal_field_is_detected() {
        assert!(!is_normal(Some("embedding.specter_v2")));
    }

    #[test]
    fn project_keeps_only_selected_keys() {
        let doc = json!({"paperId": "abc", "title": "T", "year": 2020, "venue": "X"});
        let tree = parse_selector("title,year");
        let projected = finalize_projection(project(&doc, &tree), &doc, &tree);
        assert_eq!(projected["title"], "T");
        assert_eq!(projected["year"], 2020);
        assert!(projected.get("venue").is_none());
        assert_eq!(projected["paperId"], "abc");
    }

    #[test]
    fn unknown_field_is_silently_dropped() {
        let doc = json!({"paperId": "abc", "title": "T"});
        let tree = parse_selector("title,doesNotExist");
        let projected = project(&doc, &tree);
        assert_eq!(projected["title"], "T");
        assert!(projected.get("doesNotExist").is_none());
    }

    #[test]
    fn missing_relations_emit_empty_lists_when_requested() {
        let doc = json!({"paperId": "abc", "title": "T"});
        let tree = parse_selector("title,citations,references");
        let projected = finalize_projection(project(&doc, &tree), &doc, &tree);
        assert_eq!(projected["citations"], json!([]));
        assert_eq!(projected["references"], json!([]));
    }

    #[test]
    fn projection_is_idempotent() {
        let doc = json!({"paperId": "abc", "title": "T", "year": 2020});
        let tree = parse_selector("title,year");
        let once = finalize_projection(project(&doc, &tree), &doc, &tree);
        let twice = finalize_projection(project(&once, &tree), &once, &tree);
        assert_eq!(once, twice);
    }

    #[test]
    fn atomic_dotted_field_kept_whole() {
        let doc = json!({"paperId": "abc", "embedding.specter_v2": {"vector": [1, 2, 3]}});
        let tree = parse_selector("embedding.specter_v2");
        let projected = project(&doc, &tree);
        assert_eq!(projected["embedding.specter_v2"]["vector"], json!([1, 2, 3]));
    }

    #[test]
    fn remove_relations_fields_strips_citations_and_references() {
        let stripped = remove_relations_fields("title,citations,year,references");
        assert_eq!(stripped, "title,year");
    }
}
