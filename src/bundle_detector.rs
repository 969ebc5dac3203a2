// bundle_detector.rs - Webpack presence, version and build-mode detection
// Purpose: Probe a host runtime view (or raw bundle text) for webpack signatures

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::patterns::{
    PATCHED_PUSH_NAMES, PRODUCTION_SCRIPT_SUFFIXES, REQUIRE_VERSION_FIELD, RE_LINE_COMMENT,
    RE_CHUNK_GLOBAL_USE, RE_NODE_ENV_LITERAL, RE_RUNTIME_MARKER, RE_SOURCE_MAP_URL,
};
use crate::runtime_view::{HostValue, RuntimeHandle, RuntimeView};

/// Shortest inline script considered for the "readable code" heuristic
const NON_TRIVIAL_SCRIPT_LEN: usize = 500;
/// Average line length above which code is treated as minified
const MINIFIED_AVG_LINE_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebpackVersion {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "5")]
    V5,
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "unset")]
    Unset,
}

impl WebpackVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebpackVersion::V4 => "4",
            WebpackVersion::V5 => "5",
            WebpackVersion::Unknown => "unknown",
            WebpackVersion::Unset => "unset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Development,
    Production,
    Unknown,
}

impl BuildMode {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(BuildMode::Development),
            "production" | "prod" => Some(BuildMode::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub jsonp_array: bool,
    pub chunk_array: bool,
    pub require_function: bool,
    pub module_table: bool,
    pub source_map: bool,
}

impl FeatureFlags {
    /// Probe 5 (source maps) is informational and does not count
    pub fn any_webpack_signature(&self) -> bool {
        self.jsonp_array || self.chunk_array || self.require_function || self.module_table
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult<'a> {
    pub detected: bool,
    pub version: WebpackVersion,
    pub build_mode: BuildMode,
    pub features: FeatureFlags,
    #[serde(skip)]
    pub runtime_handle: Option<RuntimeHandle<'a>>,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl DetectionResult<'_> {
    fn negative(features: FeatureFlags, diagnostic: Option<String>) -> Self {
        Self {
            detected: false,
            version: WebpackVersion::Unset,
            build_mode: BuildMode::Unknown,
            features,
            runtime_handle: None,
            timestamp_ms: Utc::now().timestamp_millis(),
            diagnostic,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// LIVE RUNTIME PROBES
// ═══════════════════════════════════════════════════════════════════

fn probe_jsonp_array(view: &RuntimeView) -> bool {
    !view.jsonp_arrays().is_empty()
}

fn probe_chunk_array(view: &RuntimeView) -> bool {
    !view.chunk_arrays().is_empty()
}

fn probe_require_function(view: &RuntimeView, problems: &mut Vec<String>) -> bool {
    match view.require_function() {
        Ok(Some(_)) => return true,
        Ok(None) => {}
        Err(e) => problems.push(e.to_string()),
    }

    // The runtime replaces chunkArray.push with its own callback
    view.chunk_arrays()
        .into_iter()
        .chain(view.jsonp_arrays())
        .filter_map(|(_, array)| array.push_name())
        .any(|name| PATCHED_PUSH_NAMES.contains(&name))
}

fn probe_module_table(view: &RuntimeView, problems: &mut Vec<String>) -> bool {
    match view.direct_module_table() {
        Ok(Some(_)) => return true,
        Ok(None) => {}
        Err(e) => problems.push(e.to_string()),
    }
    match view.global_module_table() {
        Ok(found) => found.is_some(),
        Err(e) => {
            problems.push(e.to_string());
            false
        }
    }
}

fn probe_source_map(view: &RuntimeView) -> bool {
    view.scripts.iter().any(|script| script.references_source_map())
}

fn version_from_require(view: &RuntimeView) -> Option<WebpackVersion> {
    let require_fn = view.require_function().ok().flatten()?;
    let field = require_fn.property(REQUIRE_VERSION_FIELD).ok().flatten()?;
    let raw = match field {
        HostValue::String { value } => value.clone(),
        HostValue::Number { value } => value.to_string(),
        _ => return None,
    };
    match raw.trim().trim_start_matches('v').split('.').next() {
        Some("4") => Some(WebpackVersion::V4),
        Some("5") => Some(WebpackVersion::V5),
        _ => Some(WebpackVersion::Unknown),
    }
}

/// Readable code: non-trivial size, short lines, at least one line comment
fn looks_unminified(code: &str) -> bool {
    if code.len() < NON_TRIVIAL_SCRIPT_LEN {
        return false;
    }
    let lines = code.lines().count().max(1);
    code.len() / lines <= MINIFIED_AVG_LINE_LEN && RE_LINE_COMMENT.is_match(code)
}

fn looks_minified(code: &str) -> bool {
    if code.len() < NON_TRIVIAL_SCRIPT_LEN {
        return false;
    }
    let lines = code.lines().count().max(1);
    code.len() / lines > MINIFIED_AVG_LINE_LEN
}

fn development_text_signal(code: &str) -> bool {
    (code.contains("development") && RE_RUNTIME_MARKER.is_match(code)) || looks_unminified(code)
}

fn infer_build_mode(view: &RuntimeView) -> BuildMode {
    if let Some(mode) = view.node_env.as_deref().and_then(BuildMode::from_env_value) {
        return mode;
    }

    let inline_dev = view
        .scripts
        .iter()
        .filter_map(|script| script.inline.as_deref())
        .any(development_text_signal);
    if inline_dev {
        return BuildMode::Development;
    }

    let production_src = view
        .scripts
        .iter()
        .filter_map(|script| script.src.as_deref())
        .map(|src| src.split(['?', '#']).next().unwrap_or(src).to_lowercase())
        .any(|src| PRODUCTION_SCRIPT_SUFFIXES.iter().any(|suffix| src.ends_with(suffix)));
    if production_src {
        return BuildMode::Production;
    }

    BuildMode::Unknown
}

/// Run the five feature probes against a host view
pub fn detect(view: &RuntimeView) -> DetectionResult<'_> {
    let mut problems = Vec::new();

    let features = FeatureFlags {
        jsonp_array: probe_jsonp_array(view),
        chunk_array: probe_chunk_array(view),
        require_function: probe_require_function(view, &mut problems),
        module_table: probe_module_table(view, &mut problems),
        source_map: probe_source_map(view),
    };
    let diagnostic = if problems.is_empty() { None } else { Some(problems.join("; ")) };

    if !features.any_webpack_signature() {
        debug!("no webpack signature in runtime view ({} globals)", view.globals.len());
        return DetectionResult::negative(features, diagnostic);
    }

    let version = if features.chunk_array {
        WebpackVersion::V5
    } else if features.jsonp_array {
        WebpackVersion::V4
    } else {
        version_from_require(view).unwrap_or(WebpackVersion::Unknown)
    };

    let handle = RuntimeHandle::acquire(view);

    DetectionResult {
        detected: true,
        version,
        build_mode: infer_build_mode(view),
        features,
        runtime_handle: if handle.is_empty() { None } else { Some(handle) },
        timestamp_ms: Utc::now().timestamp_millis(),
        diagnostic,
    }
}

// ═══════════════════════════════════════════════════════════════════
// RAW TEXT DETECTION
// ═══════════════════════════════════════════════════════════════════

/// `webpackChunk<name>` used as a global; the `webpackChunkName` magic comment is not one
fn has_chunk_global(code: &str) -> bool {
    RE_CHUNK_GLOBAL_USE
        .captures_iter(code)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .any(|name| name.as_str() != "webpackChunkName")
}

/// Same decision over bundle text when no live runtime is available
pub fn detect_from_code(code: &str) -> DetectionResult<'static> {
    let features = FeatureFlags {
        jsonp_array: code.contains("webpackJsonp"),
        chunk_array: has_chunk_global(code),
        require_function: code.contains("__webpack_require__"),
        module_table: code.contains("__webpack_modules__") || code.contains("installedModules"),
        source_map: RE_SOURCE_MAP_URL.is_match(code),
    };

    if !features.any_webpack_signature() {
        return DetectionResult::negative(features, None);
    }

    let version = if features.chunk_array || code.contains("__webpack_modules__") {
        WebpackVersion::V5
    } else if features.jsonp_array {
        WebpackVersion::V4
    } else {
        WebpackVersion::Unknown
    };

    let build_mode = if let Some(cap) = RE_NODE_ENV_LITERAL.captures(code) {
        cap.get(1)
            .and_then(|m| BuildMode::from_env_value(m.as_str()))
            .unwrap_or(BuildMode::Unknown)
    } else if development_text_signal(code) {
        BuildMode::Development
    } else if looks_minified(code) {
        BuildMode::Production
    } else {
        BuildMode::Unknown
    };

    DetectionResult {
        detected: true,
        version,
        build_mode,
        features,
        runtime_handle: None,
        timestamp_ms: Utc::now().timestamp_millis(),
        diagnostic: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_view::ScriptTag;
    use indexmap::IndexMap;

    #[test]
    fn test_custom_chunk_array_means_webpack5() {
        let view = RuntimeView::default().with_global("webpackChunk_custom_app", HostValue::array(vec![]));
        let result = detect(&view);
        assert!(result.detected);
        assert_eq!(result.version, WebpackVersion::V5);
        assert_eq!(result.version.as_str(), "5");
        assert!(result.features.chunk_array);
        assert!(!result.features.jsonp_array);
    }

    #[test]
    fn test_jsonp_array_means_webpack4() {
        let view = RuntimeView::default().with_global("webpackJsonp", HostValue::array(vec![]));
        let result = detect(&view);
        assert!(result.detected);
        assert_eq!(result.version, WebpackVersion::V4);
    }

    #[test]
    fn test_chunk_array_outranks_jsonp() {
        let view = RuntimeView::default()
            .with_global("webpackJsonp", HostValue::array(vec![]))
            .with_global("webpackChunkapp", HostValue::array(vec![]));
        assert_eq!(detect(&view).version, WebpackVersion::V5);
    }

    #[test]
    fn test_nothing_detected() {
        let view = RuntimeView::default()
            .with_global("jQuery", HostValue::function("function(){}"))
            .with_script(ScriptTag::inline("var a = 1;\n//# sourceMappingURL=a.js.map"));
        let result = detect(&view);
        assert!(!result.detected);
        assert_eq!(result.version, WebpackVersion::Unset);
        assert!(result.features.source_map);
        assert!(result.runtime_handle.is_none());
    }

    #[test]
    fn test_inaccessible_require_folds_into_diagnostic() {
        let view = RuntimeView::default()
            .with_global("__webpack_require__", HostValue::Inaccessible { reason: "SecurityError".into() })
            .with_global("webpackChunkx", HostValue::array(vec![]));
        let result = detect(&view);
        assert!(result.detected);
        assert!(!result.features.require_function);
        assert!(result.diagnostic.unwrap().contains("SecurityError"));
    }

    #[test]
    fn test_unreadable_host_table_is_absent() {
        let view = RuntimeView {
            module_table: Some(HostValue::Inaccessible { reason: "SecurityError".into() }),
            ..RuntimeView::default()
        };
        let result = detect(&view);
        assert!(!result.detected);
        assert!(!result.features.module_table);
        assert!(result.diagnostic.unwrap().contains("SecurityError"));

        let view = RuntimeView {
            module_table: Some(HostValue::Inaccessible { reason: "SecurityError".into() }),
            ..RuntimeView::default().with_global("__webpack_modules__", HostValue::Object { entries: IndexMap::new() })
        };
        assert!(detect(&view).features.module_table);
    }

    #[test]
    fn test_patched_push_counts_as_require() {
        let view = RuntimeView::default().with_global(
            "webpackJsonp",
            HostValue::Array { items: vec![], push_name: Some("webpackJsonpCallback".into()) },
        );
        assert!(detect(&view).features.require_function);
    }

    #[test]
    fn test_version_field_on_require() {
        let mut properties = IndexMap::new();
        properties.insert("version".to_string(), HostValue::string("5.88.2"));
        let require = HostValue::Function { name: None, source: String::new(), properties };
        let view = RuntimeView::default().with_global("__webpack_require__", require);
        let result = detect(&view);
        assert_eq!(result.version, WebpackVersion::V5);
        assert!(result.runtime_handle.is_some());
    }

    #[test]
    fn test_build_mode_explicit_env_wins() {
        let mut view = RuntimeView::default()
            .with_global("webpackChunkapp", HostValue::array(vec![]))
            .with_script(ScriptTag::external("/js/main.min.js"));
        view.node_env = Some("development".into());
        assert_eq!(detect(&view).build_mode, BuildMode::Development);

        view.node_env = None;
        assert_eq!(detect(&view).build_mode, BuildMode::Production);
    }

    #[test]
    fn test_build_mode_from_inline_marker() {
        let view = RuntimeView::default()
            .with_global("webpackChunkapp", HostValue::array(vec![]))
            .with_script(ScriptTag::inline(r#"if ("development" === mode) __webpack_require__.x();"#));
        assert_eq!(detect(&view).build_mode, BuildMode::Development);
    }

    #[test]
    fn test_build_mode_unknown_without_signals() {
        let view = RuntimeView::default().with_global("webpackChunkapp", HostValue::array(vec![]));
        assert_eq!(detect(&view).build_mode, BuildMode::Unknown);
    }

    #[test]
    fn test_detect_from_code() {
        let code = r#"(self["webpackChunkshop"] = self["webpackChunkshop"] || []).push([[179],{}]);"#;
        let result = detect_from_code(code);
        assert!(result.detected);
        assert_eq!(result.version, WebpackVersion::V5);

        let minified = format!("!function(e){{var t={{}};return t}}({});window.webpackJsonp=[];", "x".repeat(600));
        let result = detect_from_code(&minified);
        assert_eq!(result.version, WebpackVersion::V4);
        assert_eq!(result.build_mode, BuildMode::Production);

        assert!(!detect_from_code("console.log('plain')").detected);
    }

    #[test]
    fn test_chunk_name_comment_is_not_a_chunk_global() {
        let code = r#"(window["webpackJsonp"]=window["webpackJsonp"]||[]).push([[1],{}]);n.e(2).then(function(){return import(/* webpackChunkName: "admin" */ "./Admin")});"#;
        let result = detect_from_code(code);
        assert!(result.detected);
        assert!(!result.features.chunk_array);
        assert_eq!(result.version, WebpackVersion::V4);

        let declared = "var webpackChunkshop = [];";
        assert_eq!(detect_from_code(declared).version, WebpackVersion::V5);
    }
}
