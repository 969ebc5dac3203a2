// source_map.rs - Source Map v3 decoding and per-file extraction
// Purpose: Locate map references, decode inline/external payloads, cache decoded maps

use std::collections::{HashMap, VecDeque};
use std::string::FromUtf8Error;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::patterns::{first_group, is_sensitive_path, RE_SOURCE_MAP_URL};
use crate::url_helper::resolve_or_raw;

/// The only schema version we accept
pub const SUPPORTED_VERSION: i64 = 3;

/// Anti-XSSI prefix some servers put in front of map JSON
const XSSI_PREFIX: &str = ")]}'";

#[derive(Debug, Error)]
pub enum SourceMapError {
    #[error("malformed data URL: {0}")]
    InvalidDataUrl(&'static str),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("malformed source map JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("source map declares no version")]
    MissingVersion,

    #[error("unsupported source map version {0}")]
    UnsupportedVersion(i64),
}

/// Wire shape of a map document; only the fields we read
#[derive(Debug, Deserialize)]
struct RawSourceMap {
    #[serde(default)]
    version: Option<i64>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default, rename = "sourceRoot")]
    source_root: Option<String>,
    #[serde(default)]
    sources: Vec<Option<String>>,
    #[serde(default, rename = "sourcesContent")]
    sources_content: Option<Vec<Option<String>>>,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    mappings: String,
    /// Index maps carry their content in sections
    #[serde(default)]
    sections: Vec<RawSection>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    #[serde(default)]
    map: Option<RawSourceMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMapDocument {
    pub schema_version: i64,
    pub file: Option<String>,
    pub source_root: Option<String>,
    pub sources: Vec<String>,
    /// Index-aligned with `sources`; `None` means no embedded content
    pub sources_content: Vec<Option<String>>,
    pub names: Vec<String>,
    pub mappings: String,
    pub source_count: usize,
    pub has_embedded_content: bool,
}

impl SourceMapDocument {
    fn from_raw(raw: RawSourceMap) -> Result<Self, SourceMapError> {
        let version = raw.version.ok_or(SourceMapError::MissingVersion)?;
        if version != SUPPORTED_VERSION {
            return Err(SourceMapError::UnsupportedVersion(version));
        }

        let mut sources = Vec::new();
        let mut sources_content = Vec::new();
        let mut names = raw.names;
        append_aligned(&mut sources, &mut sources_content, raw.sources, raw.sources_content);

        // Flatten embedded section maps, skipping sections that point elsewhere
        for section in raw.sections {
            let Some(map) = section.map else { continue };
            match map.version {
                Some(SUPPORTED_VERSION) | None => {
                    append_aligned(&mut sources, &mut sources_content, map.sources, map.sources_content);
                    names.extend(map.names);
                }
                Some(other) => debug!("skipping index-map section with version {}", other),
            }
        }

        let has_embedded_content = sources_content.iter().any(Option::is_some);
        Ok(Self {
            schema_version: version,
            file: raw.file,
            source_root: raw.source_root,
            source_count: sources.len(),
            sources,
            sources_content,
            names,
            mappings: raw.mappings,
            has_embedded_content,
        })
    }
}

/// Keep `sourcesContent` 1:1 with `sources`: pad with `None`, drop extras
fn append_aligned(
    sources: &mut Vec<String>,
    contents: &mut Vec<Option<String>>,
    raw_sources: Vec<Option<String>>,
    raw_contents: Option<Vec<Option<String>>>,
) {
    let mut raw_contents = raw_contents.unwrap_or_default().into_iter();
    for source in raw_sources {
        sources.push(source.unwrap_or_default());
        contents.push(raw_contents.next().flatten());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFileRecord {
    pub index: usize,
    pub path: String,
    pub resolved_path: String,
    pub has_content: bool,
    pub content: Option<String>,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub map_url: String,
    pub document: SourceMapDocument,
    pub cached_at_ms: i64,
}

// ═══════════════════════════════════════════════════════════════════
// PAYLOAD DECODING
// ═══════════════════════════════════════════════════════════════════

/// Turn raw map text or a `data:` URL into JSON text
pub fn decode_payload(input: &str) -> Result<String, SourceMapError> {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix("data:") else {
        return Ok(strip_xssi_prefix(trimmed).to_string());
    };

    let (meta, payload) = rest
        .split_once(',')
        .ok_or(SourceMapError::InvalidDataUrl("missing ',' between media type and payload"))?;

    let is_base64 = meta.split(';').any(|part| part.trim().eq_ignore_ascii_case("base64"));
    let json = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        // `=` padding is sometimes percent-escaped inside URLs
        let compact = urlencoding::decode(&compact)?.into_owned();
        let bytes = STANDARD_NO_PAD.decode(compact.trim_end_matches('='))?;
        String::from_utf8(bytes)?
    } else {
        urlencoding::decode(payload)?.into_owned()
    };
    Ok(strip_xssi_prefix(json.trim()).to_string())
}

fn strip_xssi_prefix(text: &str) -> &str {
    match text.strip_prefix(XSSI_PREFIX) {
        Some(rest) => rest.split_once('\n').map(|(_, json)| json).unwrap_or(""),
        None => text,
    }
}

/// Absolute sources (http(s) or `webpack://`) are returned unchanged
fn resolve_source_path(source_root: Option<&str>, path: &str) -> String {
    let lower = path.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("webpack://") {
        return path.to_string();
    }
    let Some(root) = source_root.map(str::trim).filter(|root| !root.is_empty()) else {
        return path.to_string();
    };
    let relative = path.trim_start_matches("./").trim_start_matches('/');
    let root = root.trim_end_matches('/');
    let root_lower = root.to_lowercase();
    if root_lower.starts_with("http://") || root_lower.starts_with("https://") {
        // URL join normalizes `.` and `..` segments
        return resolve_or_raw(&format!("{}/", root), relative);
    }
    format!("{}/{}", root, relative)
}

// ═══════════════════════════════════════════════════════════════════
// DECODER
// ═══════════════════════════════════════════════════════════════════

pub struct SourceMapDecoder {
    capacity: usize,
    /// Insertion order doubles as eviction order
    order: VecDeque<String>,
    entries: HashMap<String, CacheEntry>,
}

impl Default for SourceMapDecoder {
    fn default() -> Self {
        Self::new(&ScanConfig::default())
    }
}

impl SourceMapDecoder {
    pub fn new(config: &ScanConfig) -> Self {
        Self::with_capacity(config.source_map_cache_capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), order: VecDeque::new(), entries: HashMap::new() }
    }

    /// First sourceMappingURL comment in source order, line or block form
    pub fn extract_reference_url(&self, code: &str) -> Option<String> {
        let caps = RE_SOURCE_MAP_URL.captures(code)?;
        first_group(&caps).map(|m| m.as_str().trim().to_string())
    }

    /// Reference resolved against the script URL; data URLs pass through
    pub fn resolve_reference_url(&self, code: &str, script_url: &str) -> Option<String> {
        let reference = self.extract_reference_url(code)?;
        if reference.starts_with("data:") {
            return Some(reference);
        }
        Some(resolve_or_raw(script_url, &reference))
    }

    /// Conventional `<script>.map` location for scripts without a reference comment
    pub fn guess_map_url(&self, script_url: &str) -> String {
        let without_query = script_url.split(['?', '#']).next().unwrap_or(script_url);
        format!("{}.map", without_query)
    }

    /// `None` for anything that is not a valid v3 document; the reason is logged
    pub fn decode(&self, input: &str) -> Option<SourceMapDocument> {
        match self.try_decode(input) {
            Ok(document) => Some(document),
            Err(e) => {
                warn!("source map rejected: {}", e);
                None
            }
        }
    }

    pub fn try_decode(&self, input: &str) -> Result<SourceMapDocument, SourceMapError> {
        let json = decode_payload(input)?;
        let raw: RawSourceMap = serde_json::from_str(&json)?;
        let document = SourceMapDocument::from_raw(raw)?;
        debug!(
            "decoded source map: {} sources, embedded content: {}",
            document.source_count, document.has_embedded_content
        );
        Ok(document)
    }

    /// Cache hit, or decode and cache on success
    pub fn decode_cached(&mut self, map_url: &str, input: &str) -> Option<SourceMapDocument> {
        if let Some(entry) = self.entries.get(map_url) {
            debug!("source map cache hit: {}", map_url);
            return Some(entry.document.clone());
        }
        let document = self.decode(input)?;
        self.cache_source_map(map_url, document.clone());
        Some(document)
    }

    pub fn list_source_files(&self, document: &SourceMapDocument) -> Vec<SourceFileRecord> {
        let root = document.source_root.as_deref();
        document
            .sources
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let content = document.sources_content.get(index).cloned().flatten();
                SourceFileRecord {
                    index,
                    path: path.clone(),
                    resolved_path: resolve_source_path(root, path),
                    has_content: content.is_some(),
                    size_bytes: content.as_ref().map_or(0, String::len),
                    content,
                }
            })
            .collect()
    }

    /// Embedded content of a source named exactly `needle`, else the first
    /// source whose path ends with it
    pub fn lookup_source<'d>(&self, document: &'d SourceMapDocument, needle: &str) -> Option<&'d str> {
        if needle.is_empty() {
            return None;
        }
        let content_at = |index: usize| document.sources_content.get(index).and_then(|c| c.as_deref());

        document
            .sources
            .iter()
            .position(|source| source == needle)
            .and_then(content_at)
            .or_else(|| {
                document
                    .sources
                    .iter()
                    .enumerate()
                    .filter(|(_, source)| source.ends_with(needle))
                    .find_map(|(index, _)| content_at(index))
            })
    }

    pub fn filter_sensitive_paths(&self, files: &[SourceFileRecord]) -> Vec<SourceFileRecord> {
        files.iter().filter(|file| is_sensitive_path(&file.path)).cloned().collect()
    }

    // ═══════════════════════════════════════════════════════════════════
    // CACHE
    // ═══════════════════════════════════════════════════════════════════

    /// Insert (or refresh in place) and evict oldest-first beyond capacity
    pub fn cache_source_map(&mut self, map_url: &str, document: SourceMapDocument) {
        let entry = CacheEntry {
            map_url: map_url.to_string(),
            document,
            cached_at_ms: Utc::now().timestamp_millis(),
        };
        if self.entries.insert(map_url.to_string(), entry).is_none() {
            self.order.push_back(map_url.to_string());
        }

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                debug!("evicted source map from cache: {}", oldest);
            }
        }
    }

    pub fn cached(&self, map_url: &str) -> Option<&CacheEntry> {
        self.entries.get(map_url)
    }

    /// Cached URLs, oldest first
    pub fn cached_urls(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn cache_len(&self) -> usize {
        self.order.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear_cache(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use pretty_assertions::assert_eq;

    const MAP: &str = r#"{
        "version": 3,
        "file": "main.js",
        "sourceRoot": "",
        "sources": ["webpack:///./src/index.js", "webpack:///./src/config/keys.js", "lib/util.js"],
        "sourcesContent": ["import k from './config/keys';", "export const API_KEY = 'abc';", null],
        "names": ["k"],
        "mappings": "AAAA"
    }"#;

    #[test]
    fn test_reference_url_forms_and_order() {
        let decoder = SourceMapDecoder::default();
        let code = "a();\n//# sourceMappingURL=first.js.map\n/*# sourceMappingURL=second.js.map */";
        assert_eq!(decoder.extract_reference_url(code).as_deref(), Some("first.js.map"));
        assert_eq!(decoder.extract_reference_url("//@ sourceMappingURL=old.map").as_deref(), Some("old.map"));
        assert_eq!(decoder.extract_reference_url("no map here"), None);
        assert_eq!(
            decoder.resolve_reference_url(code, "https://e.com/static/js/main.js").as_deref(),
            Some("https://e.com/static/js/first.js.map")
        );
    }

    #[test]
    fn test_source_files_are_index_aligned() {
        let decoder = SourceMapDecoder::default();
        let doc = decoder.decode(MAP).unwrap();
        assert_eq!(doc.source_count, 3);
        assert!(doc.has_embedded_content);

        let files = decoder.list_source_files(&doc);
        assert_eq!(files.len(), 3);
        let with_content: Vec<bool> = files.iter().map(|f| f.has_content).collect();
        assert_eq!(with_content, vec![true, true, false]);
        assert_eq!(files[2].content, None);
        assert_eq!(files[1].size_bytes, "export const API_KEY = 'abc';".len());
    }

    #[test]
    fn test_source_root_resolution() {
        let raw = r#"{"version":3,"sourceRoot":"https://cdn.example.com/src/","sources":["./a.js","webpack:///b.js","http://x.org/c.js"],"mappings":""}"#;
        let decoder = SourceMapDecoder::default();
        let doc = decoder.decode(raw).unwrap();
        let resolved: Vec<String> = decoder.list_source_files(&doc).into_iter().map(|f| f.resolved_path).collect();
        assert_eq!(resolved, vec!["https://cdn.example.com/src/a.js", "webpack:///b.js", "http://x.org/c.js"]);
        assert!(!doc.has_embedded_content);
    }

    #[test]
    fn test_source_root_joins_rooted_and_parent_paths() {
        assert_eq!(resolve_source_path(Some("https://cdn/x/"), "/src/a.js"), "https://cdn/x/src/a.js");
        assert_eq!(resolve_source_path(Some("https://cdn/x/src"), "../lib/b.js"), "https://cdn/x/lib/b.js");
        assert_eq!(resolve_source_path(Some("https://cdn/x/"), "./src/./c.js"), "https://cdn/x/src/c.js");
        assert_eq!(resolve_source_path(Some("build/"), "/src/a.js"), "build/src/a.js");
        assert_eq!(resolve_source_path(Some("  "), "/src/a.js"), "/src/a.js");
    }

    #[test]
    fn test_version_two_is_rejected() {
        let decoder = SourceMapDecoder::default();
        let raw = r#"{"version":2,"sources":["a.js"],"mappings":""}"#;
        assert!(decoder.decode(raw).is_none());
        assert!(matches!(decoder.try_decode(raw), Err(SourceMapError::UnsupportedVersion(2))));
        assert!(matches!(decoder.try_decode(r#"{"sources":[]}"#), Err(SourceMapError::MissingVersion)));
        assert!(matches!(decoder.try_decode("{not json"), Err(SourceMapError::Json(_))));
    }

    #[test]
    fn test_base64_data_url_is_idempotent() {
        let encoded = STANDARD.encode(MAP);
        let url = format!("data:application/json;charset=utf-8;base64,{}", encoded);
        let first = decode_payload(&url).unwrap();
        let second = decode_payload(&url).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, MAP.trim());

        let decoder = SourceMapDecoder::default();
        assert_eq!(decoder.decode(&url), decoder.decode(MAP));
    }

    #[test]
    fn test_percent_encoded_data_url() {
        let url = "data:application/json,%7B%22version%22%3A3%2C%22sources%22%3A%5B%22a.js%22%5D%2C%22mappings%22%3A%22%22%7D";
        let doc = SourceMapDecoder::default().decode(url).unwrap();
        assert_eq!(doc.sources, vec!["a.js".to_string()]);
        assert!(matches!(decode_payload("data:application/json;base64"), Err(SourceMapError::InvalidDataUrl(_))));
    }

    #[test]
    fn test_xssi_prefix_and_index_maps() {
        let raw = ")]}'\n{\"version\":3,\"sections\":[{\"offset\":{\"line\":0,\"column\":0},\"map\":{\"version\":3,\"sources\":[\"s.js\"],\"sourcesContent\":[\"x\"],\"mappings\":\"\"}},{\"offset\":{\"line\":9,\"column\":0},\"url\":\"other.map\"}]}";
        let doc = SourceMapDecoder::default().decode(raw).unwrap();
        assert_eq!(doc.sources, vec!["s.js".to_string()]);
        assert_eq!(doc.sources_content, vec![Some("x".to_string())]);
    }

    #[test]
    fn test_lookup_and_sensitive_filter() {
        let decoder = SourceMapDecoder::default();
        let doc = decoder.decode(MAP).unwrap();
        assert_eq!(decoder.lookup_source(&doc, "config/keys.js"), Some("export const API_KEY = 'abc';"));
        assert_eq!(decoder.lookup_source(&doc, "webpack:///./src/index.js"), Some("import k from './config/keys';"));
        assert_eq!(decoder.lookup_source(&doc, "lib/util.js"), None);
        assert_eq!(decoder.lookup_source(&doc, "missing.js"), None);

        let sensitive = decoder.filter_sensitive_paths(&decoder.list_source_files(&doc));
        assert_eq!(sensitive.len(), 1);
        assert_eq!(sensitive[0].path, "webpack:///./src/config/keys.js");
    }

    #[test]
    fn test_cache_evicts_first_inserted() {
        let mut decoder = SourceMapDecoder::with_capacity(3);
        let doc = decoder.decode(MAP).unwrap();
        for i in 0..4 {
            decoder.cache_source_map(&format!("https://e.com/{}.js.map", i), doc.clone());
        }
        assert_eq!(decoder.cache_len(), 3);
        assert!(decoder.cached("https://e.com/0.js.map").is_none());
        let urls: Vec<&str> = decoder.cached_urls().collect();
        assert_eq!(urls, vec!["https://e.com/1.js.map", "https://e.com/2.js.map", "https://e.com/3.js.map"]);

        decoder.clear_cache();
        assert_eq!(decoder.cache_len(), 0);
    }

    #[test]
    fn test_decode_cached_reuses_entry() {
        let mut decoder = SourceMapDecoder::with_capacity(2);
        let url = "https://e.com/main.js.map";
        assert!(decoder.decode_cached(url, MAP).is_some());
        // Second call never looks at the payload
        assert!(decoder.decode_cached(url, "garbage").is_some());
        assert!(decoder.decode_cached("https://e.com/bad.map", "garbage").is_none());
        assert_eq!(decoder.cache_len(), 1);
        assert_eq!(decoder.guess_map_url("https://e.com/a.js?v=2"), "https://e.com/a.js.map");
    }
}
