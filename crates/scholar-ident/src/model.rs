//! C1 — Identifier Model: parsing and normalizing any accepted identifier
//! scheme into a `(type, value)` pair.
//!
//! Grounded on `original_source/app/services/external_id_mapping.py`
//! (`ExternalId`/`ExternalIdTypes`) and `original_source/app/utils/title_norm.py`;
//! the heuristic ordering follows spec.md §4.1 and §6.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExternalIdType {
    Doi,
    ArXiv,
    CorpusId,
    Mag,
    Acl,
    Pmid,
    Pmcid,
    Url,
    Dblp,
    TitleNorm,
    PaperId,
}

impl ExternalIdType {
    /// Case-insensitive prefix recognition, e.g. `DOI:`, `CORPUSID:`/`CORPUS:`,
    /// `PAPER_ID:`/`PAPERID:` (spec.md §6).
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_uppercase().as_str() {
            "DOI" => Some(Self::Doi),
            "ARXIV" => Some(Self::ArXiv),
            "CORPUSID" | "CORPUS" => Some(Self::CorpusId),
            "MAG" => Some(Self::Mag),
            "ACL" => Some(Self::Acl),
            "PMID" => Some(Self::Pmid),
            "PMCID" => Some(Self::Pmcid),
            "URL" => Some(Self::Url),
            "DBLP" => Some(Self::Dblp),
            "PAPER_ID" | "PAPERID" => Some(Self::PaperId),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doi => "DOI",
            Self::ArXiv => "ArXiv",
            Self::CorpusId => "CorpusId",
            Self::Mag => "MAG",
            Self::Acl => "ACL",
            Self::Pmid => "PMID",
            Self::Pmcid => "PMCID",
            Self::Url => "URL",
            Self::Dblp => "DBLP",
            Self::TitleNorm => "TITLE_NORM",
            Self::PaperId => "PaperId",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalId {
    pub id_type: ExternalIdType,
    pub value: String,
}

fn arxiv_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}\.\d{4,5}(v\d+)?$").unwrap())
}

fn arxiv_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^arxiv:").unwrap())
}

fn arxiv_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)v\d+$").unwrap())
}

fn arxiv_embedded_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4}\.\d{4,5})").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn punct_symbol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{P}\p{S}]").unwrap())
}

/// TITLE_NORM per the glossary: lower-case, tabs folded to spaces,
/// whitespace collapsed, Unicode punctuation/symbols stripped, trimmed.
/// Returns `None` for an empty result (never an empty-string external id).
pub fn normalize_title(title: &str) -> Option<String> {
    let lowered = title.to_lowercase().replace('\t', " ");
    let collapsed = whitespace_re().replace_all(&lowered, " ");
    let stripped = punct_symbol_re().replace_all(&collapsed, "");
    let trimmed = stripped.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn normalize_doi(value: &str) -> Option<String> {
    let v = value.trim().to_lowercase();
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

fn normalize_arxiv(value: &str) -> Option<String> {
    let s = value.trim();
    let s = arxiv_prefix_re().replace(s, "");
    let s = arxiv_version_re().replace(&s, "");
    let s = s.trim();
    if arxiv_re().is_match(s) {
        // arxiv_re still permits an optional version suffix; strip again in
        // case the caller passed a raw `vN`-suffixed id straight through.
        let bare = arxiv_version_re().replace(s, "").to_string();
        return Some(bare);
    }
    if let Some(cap) = arxiv_embedded_re().captures(s) {
        return Some(cap[1].to_string());
    }
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Lower-cases scheme/host, strips `utm_*` query params, drops a trailing
/// slash from the path. Grounded on `ExternalId._normalize_url`.
fn normalize_url(value: &str) -> Option<String> {
    let mut parsed = url::Url::parse(value.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let scheme = parsed.scheme().to_lowercase();

    let kept_pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.to_lowercase().starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    parsed.set_query(None);
    let _ = parsed.set_scheme(&scheme);
    let _ = parsed.set_host(Some(&host));

    if kept_pairs.is_empty() {
        parsed.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &kept_pairs {
            serializer.append_pair(k, v);
        }
        parsed.set_query(Some(&serializer.finish()));
    }

    let path = parsed.path().trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    parsed.set_path(path);

    Some(parsed.to_string())
}

fn normalize_numeric(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let n: i64 = trimmed.parse().ok()?;
    Some(n.to_string())
}

fn normalize_pmcid(value: &str) -> Option<String> {
    let s = value.trim().to_uppercase();
    let s = s.strip_prefix("PMC").unwrap_or(&s);
    normalize_numeric(s)
}

fn normalize_acl(value: &str) -> Option<String> {
    let v = value.trim().to_uppercase().replace('_', "-").replace(' ', "");
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

/// Per-type normalization (spec.md §3 "ExternalId" invariants). Idempotent:
/// `normalize(t, normalize(t, v)) == normalize(t, v)` for every type.
pub fn normalize(id_type: ExternalIdType, value: &str) -> Option<String> {
    match id_type {
        ExternalIdType::Doi => normalize_doi(value),
        ExternalIdType::ArXiv => normalize_arxiv(value),
        ExternalIdType::CorpusId | ExternalIdType::Mag | ExternalIdType::Pmid => {
            normalize_numeric(value)
        }
        ExternalIdType::Pmcid => normalize_pmcid(value),
        ExternalIdType::Acl => normalize_acl(value),
        ExternalIdType::Url => normalize_url(value),
        ExternalIdType::TitleNorm => normalize_title(value),
        ExternalIdType::Dblp => {
            let v = value.trim();
            if v.is_empty() {
                None
            } else {
                Some(v.to_string())
            }
        }
        ExternalIdType::PaperId => {
            let v = value.trim();
            if v.is_empty() {
                None
            } else {
                Some(v.to_string())
            }
        }
    }
}

fn is_forty_hex(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parses either an explicit `TYPE:value` form or a bare value, applying the
/// heuristic ordering from spec.md §4.1: DOI → URL → ArXiv → 40-hex PaperId
/// → all-digits CorpusId → TITLE_NORM. Unknown prefixes return `None` — the
/// caller decides whether that's a 400.
pub fn parse(raw: &str) -> Option<ExternalId> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some((head, tail)) = s.split_once(':') {
        if let Some(id_type) = ExternalIdType::from_prefix(head.trim()) {
            let value = normalize(id_type, tail.trim())?;
            return Some(ExternalId { id_type, value });
        }
    }

    if s.starts_with("10.") {
        if let Some(v) = normalize_doi(s) {
            return Some(ExternalId { id_type: ExternalIdType::Doi, value: v });
        }
    }

    let lower = s.to_lowercase();
    if lower.starts_with("http") {
        if let Some(v) = normalize_url(s) {
            return Some(ExternalId { id_type: ExternalIdType::Url, value: v });
        }
    }

    if lower.contains("arxiv") || arxiv_re().is_match(s) {
        if let Some(v) = normalize_arxiv(s) {
            return Some(ExternalId { id_type: ExternalIdType::ArXiv, value: v });
        }
    }

    if is_forty_hex(s) {
        return Some(ExternalId {
            id_type: ExternalIdType::PaperId,
            value: s.to_lowercase(),
        });
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        if let Some(v) = normalize_numeric(s) {
            return Some(ExternalId { id_type: ExternalIdType::CorpusId, value: v });
        }
    }

    normalize_title(s).map(|value| ExternalId { id_type: ExternalIdType::TitleNorm, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_doi() {
        let id = parse("DOI:10.1038/NATURE14539").unwrap();
        assert_eq!(id.id_type, ExternalIdType::Doi);
        assert_eq!(id.value, "10.1038/nature14539");
    }

    #[test]
    fn parses_bare_doi() {
        let id = parse("10.1038/nature14539").unwrap();
        assert_eq!(id.id_type, ExternalIdType::Doi);
    }

    #[test]
    fn parses_arxiv_with_version_and_prefix() {
        let id = parse("arXiv:1706.03762v5").unwrap();
        assert_eq!(id.id_type, ExternalIdType::ArXiv);
        assert_eq!(id.value, "1706.03762");
    }

    #[test]
    fn parses_forty_hex_as_paper_id() {
        let hex = "0".repeat(40);
        let id = parse(&hex).unwrap();
        assert_eq!(id.id_type, ExternalIdType::PaperId);
    }

    #[test]
    fn parses_all_digits_as_corpus_id() {
        let id = parse("204838007").unwrap();
        assert_eq!(id.id_type, ExternalIdType::CorpusId);
        assert_eq!(id.value, "204838007");
    }

    #[test]
    fn unknown_prefix_returns_none() {
        assert!(parse("BOGUS:xyz").is_none());
    }

    #[test]
    fn pmcid_strips_prefix() {
        assert_eq!(normalize(ExternalIdType::Pmcid, "PMC1234567").as_deref(), Some("1234567"));
    }

    #[test]
    fn url_normalization_strips_utm_and_trailing_slash() {
        let v = normalize(
            ExternalIdType::Url,
            "HTTPS://Example.COM/paper/123/?utm_source=x&ref=y",
        )
        .unwrap();
        assert_eq!(v, "https://example.com/paper/123?ref=y");
    }

    #[test]
    fn normalize_is_idempotent() {
        for (t, v) in [
            (ExternalIdType::Doi, "10.1038/Nature14539"),
            (ExternalIdType::ArXiv, "arXiv:1706.03762v2"),
            (ExternalIdType::Pmcid, "PMC9999"),
            (ExternalIdType::Acl, "p19-1001"),
            (ExternalIdType::TitleNorm, "  The Title: A Study!  "),
        ] {
            let once = normalize(t, v).unwrap();
            let twice = normalize(t, &once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn title_norm_strips_punctuation_and_collapses_whitespace() {
        let norm = normalize_title("  The \tTitle:  A Study! \n").unwrap();
        assert_eq!(norm, "the title a study");
    }
}
