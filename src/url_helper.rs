// url_helper.rs - URL resolution and asset classification
// Purpose: Resolve relative/protocol-relative references, classify JS / map / chunk files

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

const JS_EXTENSIONS: &[&str] = &[".js", ".mjs", ".cjs", ".jsx"];
const SOURCE_MAP_EXTENSIONS: &[&str] = &[".js.map", ".mjs.map", ".css.map", ".map"];

lazy_static! {
    // 0.3f2a9c1b.js, chunk.12.abcd1234.js, vendors~main.1a2b3c.chunk.js, 345.js
    static ref RE_CHUNK_FILENAME: Regex = Regex::new(r"(?i)(?:^|[./~-])chunk(?:[.~-]|$)|^\d+(?:\.[0-9a-f]{6,})?\.m?js$").unwrap();
    static ref RE_CHUNK_ID_CHUNK_PREFIX: Regex = Regex::new(r"^chunk[.-]([\w~-]+?)(?:\.[0-9a-f]{6,})?\.m?js$").unwrap();
    static ref RE_CHUNK_ID_LEADING: Regex = Regex::new(r"^([\w~-]+?)(?:\.[0-9a-f]{6,})?(?:\.chunk)?\.m?js$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetKind {
    Chunk,
    JavaScript,
    SourceMap,
    Other,
}

/// Make URL absolute based on base URL
pub fn make_absolute_url(base: &str, relative: &str) -> Result<String, url::ParseError> {
    let relative = relative.trim();

    // Handle absolute URLs (http, https, data, webpack, ...)
    if let Ok(absolute) = Url::parse(relative) {
        if relative.starts_with("http://") || relative.starts_with("https://") {
            return Ok(relative.to_string());
        }
        return Ok(absolute.to_string());
    }

    let base_url = Url::parse(base)?;

    // Handle protocol-relative URLs
    if relative.starts_with("//") {
        return Ok(format!("{}:{}", base_url.scheme(), relative));
    }

    // Join relative URL with base
    let joined = base_url.join(relative)?;
    Ok(joined.to_string())
}

/// Like `make_absolute_url` but falls back to the raw reference when the base is unusable
pub fn resolve_or_raw(base: &str, relative: &str) -> String {
    make_absolute_url(base, relative).unwrap_or_else(|_| relative.trim().to_string())
}

/// Path component of a URL (or the input itself when it does not parse),
/// without query string or fragment
fn path_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

/// Last path segment of a URL
pub fn file_name(url: &str) -> String {
    let path = path_of(url);
    path.rsplit('/').next().unwrap_or("").to_string()
}

pub fn is_source_map_url(url: &str) -> bool {
    let path = path_of(url).to_lowercase();
    SOURCE_MAP_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub fn is_js_url(url: &str) -> bool {
    let path = path_of(url).to_lowercase();
    !is_source_map_url(url) && JS_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub fn is_chunk_url(url: &str) -> bool {
    is_js_url(url) && RE_CHUNK_FILENAME.is_match(&file_name(url))
}

/// Classify a URL; chunk beats plain JavaScript
pub fn classify_url(url: &str) -> AssetKind {
    if is_source_map_url(url) {
        AssetKind::SourceMap
    } else if is_chunk_url(url) {
        AssetKind::Chunk
    } else if is_js_url(url) {
        AssetKind::JavaScript
    } else {
        AssetKind::Other
    }
}

/// Chunk identifier from a chunk filename: `chunk.12.abc123.js` -> `12`,
/// `345.9f8e7d6c.js` -> `345`, `vendors~main.1a2b3c.chunk.js` -> `vendors~main`
pub fn extract_chunk_id(url: &str) -> Option<String> {
    let name = file_name(url);
    if name.is_empty() {
        return None;
    }
    if let Some(cap) = RE_CHUNK_ID_CHUNK_PREFIX.captures(&name) {
        return cap.get(1).map(|m| m.as_str().to_string());
    }
    RE_CHUNK_ID_LEADING
        .captures(&name)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| id != "chunk")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_resolution() {
        let base = "https://example.com/static/js/main.js";
        assert_eq!(make_absolute_url(base, "main.js.map").unwrap(), "https://example.com/static/js/main.js.map");
        assert_eq!(make_absolute_url(base, "/maps/a.map").unwrap(), "https://example.com/maps/a.map");
        assert_eq!(make_absolute_url(base, "../css/x.css").unwrap(), "https://example.com/static/css/x.css");
    }

    #[test]
    fn test_protocol_relative_resolution() {
        let resolved = make_absolute_url("https://example.com/", "//cdn.example.net/app.js").unwrap();
        assert_eq!(resolved, "https://cdn.example.net/app.js");
    }

    #[test]
    fn test_absolute_passthrough() {
        let abs = "http://other.example.org/x.js";
        assert_eq!(make_absolute_url("https://example.com/", abs).unwrap(), abs);
        assert!(make_absolute_url("not a base", "rel.js").is_err());
        assert_eq!(resolve_or_raw("not a base", " rel.js "), "rel.js");
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_url("https://e.com/static/js/main.3f2a9c1b.js.map"), AssetKind::SourceMap);
        assert_eq!(classify_url("https://e.com/static/js/12.9f8e7d6c.chunk.js"), AssetKind::Chunk);
        assert_eq!(classify_url("https://e.com/chunk.3.abcdef12.js?v=1"), AssetKind::Chunk);
        assert_eq!(classify_url("https://e.com/app.js"), AssetKind::JavaScript);
        assert_eq!(classify_url("https://e.com/index.html"), AssetKind::Other);
    }

    #[test]
    fn test_chunk_id_extraction() {
        assert_eq!(extract_chunk_id("https://e.com/chunk.12.abc123ef.js").as_deref(), Some("12"));
        assert_eq!(extract_chunk_id("/js/345.9f8e7d6c.js").as_deref(), Some("345"));
        assert_eq!(extract_chunk_id("vendors~main.1a2b3c.chunk.js").as_deref(), Some("vendors~main"));
        assert_eq!(extract_chunk_id("https://e.com/"), None);
    }
}
