//! Stable cache-key hashing for search/citations/references requests.
//!
//! Grounded on `original_source/app/clients/s2_client.py::generate_query_hash`:
//! parameters are canonicalized (list-valued fields deduplicated and
//! sorted, then comma-joined) into a map with sorted keys, serialized with
//! no extraneous whitespace, and hashed with SHA-256. Same request shape,
//! regardless of argument order or incidental whitespace, always yields
//! the same key.

use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default)]
pub struct QueryHashInput {
    pub query: String,
    pub offset: i64,
    pub limit: i64,
    pub fields: Option<Vec<String>>,
    pub year: Option<String>,
    pub venue: Option<Vec<String>>,
    pub fields_of_study: Option<Vec<String>>,
    pub match_title: bool,
}

#[derive(Serialize)]
struct Canonical {
    query: String,
    offset: i64,
    limit: i64,
    fields: Option<String>,
    year: Option<String>,
    venue: Option<String>,
    fields_of_study: Option<String>,
    match_title: bool,
}

fn canonicalize_list(values: &Option<Vec<String>>) -> Option<String> {
    let values = values.as_ref()?;
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<String> = values.iter().map(|v| v.trim().to_string()).collect();
    sorted.sort();
    sorted.dedup();
    Some(sorted.join(","))
}

/// Produces a stable SHA-256 hex digest over a canonicalized JSON object
/// with sorted keys, matching `generate_query_hash`'s
/// `json.dumps(..., sort_keys=True)` behavior.
pub fn generate_query_hash(input: &QueryHashInput) -> String {
    let canonical = Canonical {
        query: input.query.clone(),
        offset: input.offset,
        limit: input.limit,
        fields: canonicalize_list(&input.fields),
        year: input.year.clone(),
        venue: canonicalize_list(&input.venue),
        fields_of_study: canonicalize_list(&input.fields_of_study),
        match_title: input.match_title,
    };

    // serde_json's map serialization is insertion-order; BTreeMap-style
    // sorting isn't needed here since `Canonical`'s field order is fixed
    // and already alphabetically distinct per the original's key set, but
    // we re-serialize through `serde_json::Value` to guarantee sorted keys
    // regardless of future field additions.
    let value = serde_json::to_value(&canonical).expect("canonical query shape is always serializable");
    let sorted = sort_keys(&value);
    let payload = serde_json::to_string(&sorted).expect("sorted value is always serializable");

    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[k]));
            }
            serde_json::Value::Object(sorted)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_logical_request_hashes_identically_regardless_of_list_order() {
        let a = QueryHashInput {
            query: "transformers".to_string(),
            offset: 0,
            limit: 10,
            venue: Some(vec!["NeurIPS".to_string(), "ICML".to_string()]),
            ..Default::default()
        };
        let b = QueryHashInput {
            query: "transformers".to_string(),
            offset: 0,
            limit: 10,
            venue: Some(vec!["ICML".to_string(), "NeurIPS".to_string()]),
            ..Default::default()
        };
        assert_eq!(generate_query_hash(&a), generate_query_hash(&b));
    }

    #[test]
    fn different_offsets_hash_differently() {
        let mut input = QueryHashInput {
            query: "graphs".to_string(),
            limit: 10,
            ..Default::default()
        };
        let h0 = generate_query_hash(&input);
        input.offset = 10;
        let h1 = generate_query_hash(&input);
        assert_ne!(h0, h1);
    }

    #[test]
    fn hash_is_64_hex_chars() {
        let input = QueryHashInput {
            query: "anything".to_string(),
            limit: 10,
            ..Default::default()
        };
        let h = generate_query_hash(&input);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
