// module_analyzer.rs - Module table enumeration and chunk-loading analysis
// Purpose: Turn a webpack module table (live or bundle text) into per-module metadata

use std::cmp::Reverse;
use std::collections::hash_map::{Entry, HashMap};
use std::collections::HashSet;
use std::ops::Range;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::patterns::{
    count_keyword_hits, first_group, match_chunk_template, CONFIG_KEYWORDS, REQUIRE_ENSURE_FIELD, REQUIRE_MODULES_FIELD,
    REQUIRE_FUNCTION_NAMES, RE_RUNTIME_ALIAS_MEMBER,
    RE_ARRAY_FACTORY, RE_CHUNK_HASH_GROUP, RE_CHUNK_HASH_PAIR, RE_CHUNK_LOADING,
    RE_CHUNK_TEMPLATE_LITERAL, RE_CHUNK_URL_FN, RE_COMMONJS_REQUIRE_CALL, RE_DYNAMIC_IMPORT,
    RE_ENSURE_CALL, RE_EXPORTS_ASSIGN, RE_EXPORT_DEFINE_NAMED, RE_EXPORT_DEFINE_OBJECT,
    RE_EXPORT_GETTER, RE_FACTORY_PARAMS, RE_IMPORT_META_ENV, RE_JSONP_SCRIPT_SRC,
    RE_MODULE_PATH_BANNER, RE_OBJECT_FACTORY_KEY, RE_PROCESS_ENV_DOT, RE_PROCESS_ENV_INDEX,
    RE_PUBLIC_PATH_ASSIGN, RE_PUBLIC_PATH_OPTION, RE_WEBPACK_CHUNK_NAME, RE_WEBPACK_REQUIRE_CALL,
};
use crate::runtime_view::{HostValue, RuntimeHandle, RuntimeView};
use crate::url_helper::resolve_or_raw;

/// Module ids ending in one of these are taken as source paths
const SOURCE_EXTENSIONS: &[&str] = &[".js", ".jsx", ".mjs", ".cjs", ".ts", ".tsx", ".vue", ".json", ".css"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Function,
    Object,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: String,
    pub path: Option<String>,
    /// Required module ids, first occurrence order
    pub dependencies: Vec<String>,
    pub is_config_like: bool,
    pub export_count: usize,
    pub size_bytes: usize,
    pub kind: ModuleKind,
}

impl ModuleInfo {
    fn opaque(id: &str, kind: ModuleKind) -> Self {
        Self {
            id: id.to_string(),
            path: path_from_id(id),
            dependencies: Vec::new(),
            is_config_like: false,
            export_count: 0,
            size_bytes: 0,
            kind,
        }
    }
}

/// Module id -> info, in table enumeration order
pub type ModuleMap = IndexMap<String, ModuleInfo>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkLoadingInfo {
    pub has_async_loading: bool,
    pub chunk_ids: Vec<String>,
    pub chunk_hash_map: IndexMap<String, String>,
    /// One of the known chunk filename templates, if the runtime uses one
    pub naming_template: Option<String>,
}

/// Where an analysis reads from
#[derive(Debug, Clone, Copy)]
pub enum AnalysisInput<'a> {
    Runtime(&'a RuntimeView),
    Code(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvReference {
    pub name: String,
    /// Byte offset of the first reference
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportVia {
    /// `import("./x")`
    Import,
    /// `__webpack_require__.e(id)`
    Ensure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicImport {
    pub target: String,
    pub chunk_name: Option<String>,
    pub via: ImportVia,
    pub offset: usize,
}

// ═══════════════════════════════════════════════════════════════════
// ANALYZER
// ═══════════════════════════════════════════════════════════════════

pub struct ModuleAnalyzer {
    modules: ModuleMap,
    diagnostics: Vec<String>,
    config_keyword_threshold: usize,
    /// Compiled `<name>(id)` patterns, keyed by the factory's require parameter
    require_patterns: HashMap<String, Regex>,
}

impl Default for ModuleAnalyzer {
    fn default() -> Self {
        Self::new(&ScanConfig::default())
    }
}

impl ModuleAnalyzer {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            modules: ModuleMap::new(),
            diagnostics: Vec::new(),
            config_keyword_threshold: config.config_keyword_threshold.max(1),
            require_patterns: HashMap::new(),
        }
    }

    pub fn modules(&self) -> &ModuleMap {
        &self.modules
    }

    /// Problems met during the last extraction (skipped modules, unreadable tables)
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn clear(&mut self) {
        self.modules.clear();
        self.diagnostics.clear();
    }

    /// Enumerate the live module table. Priority: table handed over by the
    /// host, then `require.m`, then a global module table.
    pub fn extract_module_map(&mut self, view: &RuntimeView) -> &ModuleMap {
        self.clear();
        let handle = RuntimeHandle::acquire(view);

        // Unreadable host table counts as absent; lookup already fell through
        if let Err(e) = view.direct_module_table() {
            self.diagnostics.push(e.to_string());
        }

        let Some(table) = handle.module_table else {
            match view.require_function() {
                Ok(Some(require_fn)) => {
                    if let Ok(Some(modules)) = require_fn.property(REQUIRE_MODULES_FIELD) {
                        self.diagnostics.push(format!("module table has unexpected shape: {}", shape_name(modules)));
                    }
                }
                Ok(None) => {}
                Err(e) => self.diagnostics.push(e.to_string()),
            }
            if let Err(e) = view.global_module_table() {
                self.diagnostics.push(e.to_string());
            }
            debug!("no module table reachable from runtime view");
            return &self.modules;
        };

        match table {
            HostValue::Object { entries } => {
                for (id, value) in entries {
                    self.record_live_module(id, value);
                }
            }
            HostValue::Array { items, .. } => {
                for (index, value) in items.iter().enumerate() {
                    // Holes in sparse tables
                    if matches!(value, HostValue::Null) {
                        continue;
                    }
                    self.record_live_module(&index.to_string(), value);
                }
            }
            // acquire only hands out tables
            _ => {}
        }

        debug!("extracted {} modules from runtime view", self.modules.len());
        &self.modules
    }

    /// Locate the module table in bundle text and describe each factory
    pub fn extract_module_map_from_code(&mut self, code: &str) -> &ModuleMap {
        self.clear();

        let mut sites = keyed_sites(code);
        if sites.is_empty() {
            sites = indexed_sites(code);
        }
        let sites = select_table(sites);
        let spans = factory_spans(code, &sites);

        for (site, span) in sites.iter().zip(spans) {
            let body = code[span].trim_end().trim_end_matches(',').trim_end();
            let prefix = &code[site.prefix.clone()];
            let path = path_from_id(&site.id).or_else(|| {
                RE_MODULE_PATH_BANNER.captures(prefix).map(|caps| caps[1].to_string())
            });
            let info = self.describe_factory(&site.id, path, body);
            self.modules.insert(site.id.clone(), info);
        }

        debug!("extracted {} modules from bundle text", self.modules.len());
        &self.modules
    }

    pub fn analyze_chunk_loading(&self, input: AnalysisInput<'_>) -> ChunkLoadingInfo {
        match input {
            AnalysisInput::Runtime(view) => chunk_loading_from_view(view),
            AnalysisInput::Code(code) => chunk_loading_from_code(code),
        }
    }

    /// Base URL for chunk fetches; empty when unknown
    pub fn extract_public_path(&self, input: AnalysisInput<'_>) -> String {
        match input {
            AnalysisInput::Runtime(view) => {
                let handle = RuntimeHandle::acquire(view);
                if let Some(path) = handle.public_path {
                    return path.to_string();
                }
                view.scripts
                    .iter()
                    .filter_map(|script| script.inline.as_deref())
                    .map(public_path_from_code)
                    .find(|path| !path.is_empty())
                    .unwrap_or_default()
            }
            AnalysisInput::Code(code) => public_path_from_code(code),
        }
    }

    fn record_live_module(&mut self, id: &str, value: &HostValue) {
        let info = match value {
            HostValue::Function { source, .. } => self.describe_factory(id, path_from_id(id), source),
            HostValue::Object { .. } => ModuleInfo::opaque(id, ModuleKind::Object),
            HostValue::Inaccessible { reason } => {
                self.diagnostics.push(format!("module {}: {}", id, reason));
                return;
            }
            _ => ModuleInfo::opaque(id, ModuleKind::Unknown),
        };
        self.modules.insert(id.to_string(), info);
    }

    fn describe_factory(&mut self, id: &str, path: Option<String>, body: &str) -> ModuleInfo {
        let require_name = factory_require_param(body);
        let dependencies = self.collect_dependencies(id, body, require_name.as_deref());

        ModuleInfo {
            id: id.to_string(),
            path,
            dependencies,
            is_config_like: count_keyword_hits(body, CONFIG_KEYWORDS) >= self.config_keyword_threshold,
            export_count: count_exports(body),
            size_bytes: body.len(),
            kind: ModuleKind::Function,
        }
    }

    fn collect_dependencies(&mut self, id: &str, body: &str, require_name: Option<&str>) -> Vec<String> {
        let mut hits: Vec<(usize, String)> = Vec::new();

        for caps in RE_WEBPACK_REQUIRE_CALL.captures_iter(body) {
            if let (Some(whole), Some(dep)) = (caps.get(0), first_group(&caps)) {
                hits.push((whole.start(), dep.as_str().to_string()));
            }
        }
        for caps in RE_COMMONJS_REQUIRE_CALL.captures_iter(body) {
            if let (Some(whole), Some(dep)) = (caps.get(0), first_group(&caps)) {
                hits.push((whole.start(), dep.as_str().to_string()));
            }
        }

        if let Some(name) = require_name.filter(|n| *n != "__webpack_require__" && *n != "require") {
            match self.require_pattern(name) {
                Ok(re) => {
                    for caps in re.captures_iter(body) {
                        if let (Some(whole), Some(dep)) = (caps.get(0), first_group(&caps)) {
                            hits.push((whole.start(), dep.as_str().to_string()));
                        }
                    }
                }
                Err(e) => {
                    warn!("module {}: cannot build require pattern for `{}`: {}", id, name, e);
                    self.diagnostics.push(format!("module {}: dependency scan skipped ({})", id, e));
                }
            }
        }

        hits.sort_by_key(|(pos, _)| *pos);
        let mut dependencies: Vec<String> = Vec::new();
        for (_, dep) in hits {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }
        dependencies
    }

    fn require_pattern(&mut self, name: &str) -> Result<&Regex, regex::Error> {
        match self.require_patterns.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let pattern = format!(
                    r#"(?:^|[^\w$.]){}\(\s*(?:/\*[^*]*\*/\s*)*(?:"([^"\n]+)"|'([^'\n]+)'|(\d+))\s*\)"#,
                    regex::escape(name)
                );
                Ok(entry.insert(Regex::new(&pattern)?))
            }
        }
    }
}

fn shape_name(value: &HostValue) -> &'static str {
    match value {
        HostValue::Array { .. } => "array",
        HostValue::Function { .. } => "function",
        HostValue::Object { .. } => "object",
        HostValue::String { .. } => "string",
        HostValue::Number { .. } => "number",
        HostValue::Bool { .. } => "bool",
        HostValue::Null => "null",
        HostValue::Inaccessible { .. } => "inaccessible",
    }
}

fn path_from_id(id: &str) -> Option<String> {
    let looks_like_path = id.contains('/') || SOURCE_EXTENSIONS.iter().any(|ext| id.ends_with(ext));
    looks_like_path.then(|| id.to_string())
}

/// Third factory parameter is the require function (`function(module, exports, require)`)
fn factory_require_param(body: &str) -> Option<String> {
    let trimmed = body.trim_start();
    let unwrapped = trimmed
        .strip_prefix('(')
        .filter(|rest| {
            let rest = rest.trim_start();
            rest.starts_with("function") || rest.starts_with('(')
        })
        .unwrap_or(trimmed);

    let caps = RE_FACTORY_PARAMS.captures(unwrapped)?;
    caps[1]
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .nth(2)
        .map(str::to_string)
}

fn count_exports(body: &str) -> usize {
    let named = RE_EXPORT_DEFINE_NAMED.find_iter(body).count();

    let mut getters = 0;
    for define in RE_EXPORT_DEFINE_OBJECT.find_iter(body) {
        let open = define.end() - 1;
        if let Some(close) = balanced_end(body, open) {
            getters += RE_EXPORT_GETTER.find_iter(&body[open..close]).count();
        }
    }

    named + getters + RE_EXPORTS_ASSIGN.find_iter(body).count()
}

// ═══════════════════════════════════════════════════════════════════
// BRACKET-AWARE SCANNING
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Code,
    Single,
    Double,
    Template,
    LineComment,
    BlockComment,
}

/// Forward-only scanner tracking open brackets outside strings and comments.
/// Regex literals are not recognised.
struct DepthScanner<'t> {
    bytes: &'t [u8],
    pos: usize,
    state: LexState,
    /// (open position, commas seen at this level)
    levels: Vec<(usize, usize)>,
}

impl<'t> DepthScanner<'t> {
    fn new(text: &'t str) -> Self {
        Self { bytes: text.as_bytes(), pos: 0, state: LexState::Code, levels: Vec::new() }
    }

    fn depth(&self) -> usize {
        self.levels.len()
    }

    fn in_code(&self) -> bool {
        self.state == LexState::Code
    }

    fn container(&self) -> Option<usize> {
        self.levels.last().map(|(open, _)| *open)
    }

    fn commas(&self) -> usize {
        self.levels.last().map(|(_, commas)| *commas).unwrap_or(0)
    }

    fn step(&mut self) {
        let b = self.bytes[self.pos];
        let next = self.bytes.get(self.pos + 1).copied();
        match self.state {
            LexState::Code => match b {
                b'\'' => self.state = LexState::Single,
                b'"' => self.state = LexState::Double,
                b'`' => self.state = LexState::Template,
                b'/' if next == Some(b'/') => {
                    self.state = LexState::LineComment;
                    self.pos += 1;
                }
                b'/' if next == Some(b'*') => {
                    self.state = LexState::BlockComment;
                    self.pos += 1;
                }
                b'{' | b'[' | b'(' => self.levels.push((self.pos, 0)),
                b'}' | b']' | b')' => {
                    self.levels.pop();
                }
                b',' => {
                    if let Some(level) = self.levels.last_mut() {
                        level.1 += 1;
                    }
                }
                _ => {}
            },
            LexState::Single | LexState::Double | LexState::Template => {
                let quote = match self.state {
                    LexState::Single => b'\'',
                    LexState::Double => b'"',
                    _ => b'`',
                };
                if b == b'\\' {
                    self.pos += 1;
                } else if b == quote || (b == b'\n' && quote != b'`') {
                    self.state = LexState::Code;
                }
            }
            LexState::LineComment => {
                if b == b'\n' {
                    self.state = LexState::Code;
                }
            }
            LexState::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    self.state = LexState::Code;
                    self.pos += 1;
                }
            }
        }
        self.pos += 1;
    }

    /// Consume everything before `target`
    fn advance_to(&mut self, target: usize) {
        let target = target.min(self.bytes.len());
        while self.pos < target {
            self.step();
        }
    }

    /// Position of the bracket that takes depth below `floor`
    fn run_until_below(&mut self, floor: usize) -> usize {
        while self.pos < self.bytes.len() {
            let at = self.pos;
            self.step();
            if self.depth() < floor {
                return at;
            }
        }
        self.bytes.len()
    }

    /// End of the expression starting at the current position: a `;` or `,`
    /// at the starting depth, or the bracket closing the enclosing scope
    fn expression_end(&mut self) -> usize {
        let floor = self.depth();
        while self.pos < self.bytes.len() {
            let at = self.pos;
            if self.in_code()
                && self.depth() == floor
                && matches!(self.bytes[at], b';' | b',' | b'}' | b')' | b']')
            {
                return at;
            }
            self.step();
        }
        self.bytes.len()
    }
}

/// Index of the bracket matching the one at `open`
fn balanced_end(text: &str, open: usize) -> Option<usize> {
    let tail = text.get(open..)?;
    let mut scanner = DepthScanner::new(tail);
    scanner.advance_to(1);
    if scanner.depth() != 1 {
        return None;
    }
    let close = scanner.run_until_below(1);
    (close < tail.len()).then_some(open + close)
}

/// Split on `separator` where it appears outside brackets, strings and comments
fn split_top_level(expr: &str, separator: u8) -> Vec<&str> {
    let mut scanner = DepthScanner::new(expr);
    let mut parts = Vec::new();
    let mut start = 0;
    while scanner.pos < expr.len() {
        let at = scanner.pos;
        if scanner.in_code() && scanner.depth() == 0 && expr.as_bytes()[at] == separator {
            parts.push(&expr[start..at]);
            start = at + 1;
        }
        scanner.step();
    }
    parts.push(&expr[start..]);
    parts
}

// ═══════════════════════════════════════════════════════════════════
// MODULE TABLE LOCATION IN BUNDLE TEXT
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct FactorySite {
    id: String,
    /// The `{`, `[` or `,` that introduces the entry
    delimiter: usize,
    /// Text between the key and the factory (dev banners live here)
    prefix: Range<usize>,
    factory_start: usize,
    container: usize,
    depth: usize,
}

fn after_delimiter(code: &str, start: usize) -> usize {
    match code.as_bytes().get(start) {
        Some(b'{' | b'[' | b',') => start + 1,
        _ => start,
    }
}

/// Skip quotes, colons, whitespace and block comments between a key and its factory
fn skip_trivia(code: &str, mut pos: usize) -> usize {
    let bytes = code.as_bytes();
    loop {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || matches!(bytes[pos], b'"' | b'\'' | b':')) {
            pos += 1;
        }
        if !code[pos..].starts_with("/*") {
            return pos;
        }
        match code[pos + 2..].find("*/") {
            Some(end) => pos += 2 + end + 2,
            None => return bytes.len(),
        }
    }
}

/// `{ "./a.js": function(..){..}, 12: (e,t,n)=>{..} }` entries
fn keyed_sites(code: &str) -> Vec<FactorySite> {
    let mut scanner = DepthScanner::new(code);
    let mut sites = Vec::new();

    for caps in RE_OBJECT_FACTORY_KEY.captures_iter(code) {
        let (Some(whole), Some(key)) = (caps.get(0), first_group(&caps)) else {
            continue;
        };
        scanner.advance_to(after_delimiter(code, whole.start()));
        let Some(container) = scanner.container() else {
            continue;
        };
        if !scanner.in_code() {
            continue;
        }
        let factory_start = skip_trivia(code, key.end());
        sites.push(FactorySite {
            id: key.as_str().to_string(),
            delimiter: whole.start(),
            prefix: key.end()..factory_start,
            factory_start,
            container,
            depth: scanner.depth(),
        });
    }
    sites
}

/// `[function(e,t,n){..}, , function(e,t){..}]` entries; holes keep their index
fn indexed_sites(code: &str) -> Vec<FactorySite> {
    let mut scanner = DepthScanner::new(code);
    let mut sites = Vec::new();

    for whole in RE_ARRAY_FACTORY.find_iter(code) {
        scanner.advance_to(after_delimiter(code, whole.start()));
        let Some(container) = scanner.container() else {
            continue;
        };
        if !scanner.in_code() {
            continue;
        }
        let factory_start = skip_trivia(code, after_delimiter(code, whole.start()));
        sites.push(FactorySite {
            id: scanner.commas().to_string(),
            delimiter: whole.start(),
            prefix: factory_start..factory_start,
            factory_start,
            container,
            depth: scanner.depth(),
        });
    }
    sites
}

/// Keep the shallowest container holding the most factories
fn select_table(sites: Vec<FactorySite>) -> Vec<FactorySite> {
    let Some(min_depth) = sites.iter().map(|s| s.depth).min() else {
        return sites;
    };

    let mut counts: IndexMap<usize, usize> = IndexMap::new();
    for site in sites.iter().filter(|s| s.depth == min_depth) {
        *counts.entry(site.container).or_default() += 1;
    }
    let Some((chosen, _)) = counts.into_iter().max_by_key(|(container, count)| (*count, Reverse(*container))) else {
        return Vec::new();
    };

    sites.into_iter().filter(|s| s.container == chosen && s.depth == min_depth).collect()
}

/// Each factory runs up to the next entry's delimiter; the last one up to
/// the bracket closing the table
fn factory_spans(code: &str, sites: &[FactorySite]) -> Vec<Range<usize>> {
    let mut spans = Vec::with_capacity(sites.len());
    for pair in sites.windows(2) {
        let start = pair[0].factory_start;
        spans.push(start..pair[1].delimiter.max(start));
    }
    if let Some(last) = sites.last() {
        let mut scanner = DepthScanner::new(code);
        scanner.advance_to(last.factory_start);
        let end = scanner.run_until_below(last.depth);
        spans.push(last.factory_start..end.max(last.factory_start));
    }
    spans
}

// ═══════════════════════════════════════════════════════════════════
// CHUNK LOADING
// ═══════════════════════════════════════════════════════════════════

/// A live view only tells whether the async-loading entry point exists
fn chunk_loading_from_view(view: &RuntimeView) -> ChunkLoadingInfo {
    let handle = RuntimeHandle::acquire(view);
    let has_async_loading = handle
        .require_fn
        .is_some_and(|require| matches!(require.property(REQUIRE_ENSURE_FIELD), Ok(Some(f)) if f.is_function()));

    ChunkLoadingInfo { has_async_loading, ..ChunkLoadingInfo::default() }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn chunk_loading_from_code(code: &str) -> ChunkLoadingInfo {
    let mut info = ChunkLoadingInfo {
        has_async_loading: RE_CHUNK_LOADING.is_match(code),
        ..ChunkLoadingInfo::default()
    };

    if let Some((param, expr)) = chunk_url_expression(code) {
        info.has_async_loading = true;
        collect_hash_pairs(expr, &mut info.chunk_hash_map);
        info.naming_template = render_template(expr, param)
            .and_then(|rendered| match_chunk_template(&rendered))
            .map(str::to_string);
    }

    if info.chunk_hash_map.is_empty() && info.has_async_loading {
        for caps in RE_CHUNK_HASH_GROUP.captures_iter(code) {
            collect_hash_pairs(&caps[1], &mut info.chunk_hash_map);
        }
    }

    if info.naming_template.is_none() {
        info.naming_template = RE_CHUNK_TEMPLATE_LITERAL
            .captures_iter(code)
            .find_map(|caps| match_chunk_template(&caps[1]))
            .map(str::to_string);
    }

    for id in info.chunk_hash_map.keys() {
        push_unique(&mut info.chunk_ids, id.clone());
    }
    for caps in RE_ENSURE_CALL.captures_iter(code) {
        if let Some(id) = first_group(&caps) {
            push_unique(&mut info.chunk_ids, id.as_str().to_string());
        }
    }
    info
}

/// Parameter name and returned expression of the id-to-filename function
fn chunk_url_expression(code: &str) -> Option<(&str, &str)> {
    let caps = RE_CHUNK_URL_FN
        .captures(code)
        .or_else(|| RE_JSONP_SCRIPT_SRC.captures(code))?;
    let whole = caps.get(0)?;
    let param = first_group(&caps)?.as_str();

    let mut scanner = DepthScanner::new(&code[whole.end()..]);
    let end = scanner.expression_end();
    Some((param, code[whole.end()..whole.end() + end].trim()))
}

fn collect_hash_pairs(text: &str, map: &mut IndexMap<String, String>) {
    for caps in RE_CHUNK_HASH_PAIR.captures_iter(text) {
        map.entry(caps[1].to_string()).or_insert_with(|| caps[2].to_string());
    }
}

/// Symbolic rendering of `p + "" + id + "." + {..}[id] + ".js"` into `[id].[hash].js`
fn render_template(expr: &str, param: &str) -> Option<String> {
    let mut rendered = String::new();
    for term in split_top_level(expr, b'+') {
        let term = strip_wrapping_parens(term.trim());
        // publicPath prefix is not part of the file name
        if term.is_empty() || term.ends_with(".p") {
            continue;
        }
        if let Some(literal) = string_literal(term) {
            rendered.push_str(literal);
        } else if term == param {
            rendered.push_str("[id]");
        } else if term.ends_with(".h()") {
            rendered.push_str("[hash]");
        } else {
            rendered.push_str(lookup_placeholder(term, param)?);
        }
    }
    Some(rendered)
}

fn strip_wrapping_parens(mut term: &str) -> &str {
    while term.starts_with('(') && balanced_end(term, 0) == Some(term.len() - 1) {
        term = term[1..term.len() - 1].trim();
    }
    term
}

fn string_literal(term: &str) -> Option<&str> {
    let quote = term.chars().next().filter(|c| matches!(c, '"' | '\''))?;
    if term.len() < 2 || !term.ends_with(quote) {
        return None;
    }
    let inner = &term[1..term.len() - 1];
    (!inner.contains(quote)).then_some(inner)
}

/// `{..}[id]` lookups: hex values are hashes, other values are chunk names,
/// an empty map falls back to the id
fn lookup_placeholder(term: &str, param: &str) -> Option<&'static str> {
    let (lookup, has_fallback) = match term.split_once("||") {
        Some((left, right)) if right.trim() == param => (left.trim(), true),
        Some(_) => return None,
        None => (term, false),
    };

    let map = lookup.strip_suffix(&format!("[{}]", param))?.trim();
    if !map.starts_with('{') || !map.ends_with('}') {
        return None;
    }
    let entries = map[1..map.len() - 1].trim();
    if entries.is_empty() {
        return Some("[id]");
    }
    if !has_fallback && RE_CHUNK_HASH_PAIR.is_match(entries) {
        return Some("[hash]");
    }
    Some("[name]")
}

/// `__webpack_require__.p` first, then a short alias that also carries other
/// runtime members, then the `publicPath` config option
fn public_path_from_code(code: &str) -> String {
    let runtime_aliases: HashSet<&str> = RE_RUNTIME_ALIAS_MEMBER
        .captures_iter(code)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect();

    let assignments: Vec<(&str, &str)> = RE_PUBLIC_PATH_ASSIGN
        .captures_iter(code)
        .filter_map(|caps| Some((caps.name("alias")?.as_str(), caps.name("path")?.as_str())))
        .collect();

    let assigned = assignments
        .iter()
        .find(|(alias, _)| REQUIRE_FUNCTION_NAMES.contains(alias))
        .or_else(|| assignments.iter().find(|(alias, _)| runtime_aliases.contains(alias)))
        .map(|(_, path)| path.to_string());

    assigned
        .or_else(|| RE_PUBLIC_PATH_OPTION.captures(code).map(|caps| caps[1].to_string()))
        .unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════════
// BUNDLE-WIDE EXTRACTORS
// ═══════════════════════════════════════════════════════════════════

/// Build-time environment variables inlined or referenced in the bundle
pub fn extract_env_references(code: &str) -> Vec<EnvReference> {
    let mut refs: Vec<EnvReference> = Vec::new();
    for re in [&*RE_PROCESS_ENV_DOT, &*RE_PROCESS_ENV_INDEX, &*RE_IMPORT_META_ENV] {
        for caps in re.captures_iter(code) {
            let Some(name) = caps.get(1) else { continue };
            match refs.iter_mut().find(|r| r.name == name.as_str()) {
                Some(existing) => existing.offset = existing.offset.min(name.start()),
                None => refs.push(EnvReference { name: name.as_str().to_string(), offset: name.start() }),
            }
        }
    }
    refs.sort_by_key(|r| r.offset);
    refs
}

/// `import("./x")` targets and `require.e(id)` chunk loads, in source order
pub fn extract_dynamic_imports(code: &str) -> Vec<DynamicImport> {
    let mut imports = Vec::new();

    for caps in RE_DYNAMIC_IMPORT.captures_iter(code) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else { continue };
        let chunk_name = RE_WEBPACK_CHUNK_NAME
            .captures(whole.as_str())
            .map(|c| c[1].to_string());
        imports.push(DynamicImport {
            target: target.as_str().to_string(),
            chunk_name,
            via: ImportVia::Import,
            offset: whole.start(),
        });
    }
    for caps in RE_ENSURE_CALL.captures_iter(code) {
        let (Some(whole), Some(id)) = (caps.get(0), first_group(&caps)) else { continue };
        imports.push(DynamicImport {
            target: id.as_str().to_string(),
            chunk_name: None,
            via: ImportVia::Ensure,
            offset: whole.start(),
        });
    }

    imports.sort_by_key(|i| i.offset);
    imports
}

/// Absolute URLs of every chunk the hash map knows about
pub fn chunk_urls(info: &ChunkLoadingInfo, public_path: &str, base: &str) -> Vec<String> {
    let Some(template) = info.naming_template.as_deref() else {
        return Vec::new();
    };
    // webpack 5 `publicPath: "auto"` resolves against the script location
    let prefix = if public_path == "auto" { "" } else { public_path };

    info.chunk_hash_map
        .iter()
        .map(|(id, hash)| {
            let file = template.replace("[id]", id).replace("[name]", id).replace("[hash]", hash);
            resolve_or_raw(base, &format!("{}{}", prefix, file))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn require_fn(properties: Vec<(&str, HostValue)>) -> HostValue {
        HostValue::Function {
            name: Some("__webpack_require__".to_string()),
            source: "function r(e){}".to_string(),
            properties: properties.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn test_live_array_table_uses_index_ids() {
        let modules = HostValue::array(vec![
            HostValue::function("function(e,t,n){var r=n(1)}"),
            HostValue::function("function(e,t,n){t.a=1}"),
            HostValue::function("function(e,t){}"),
        ]);
        let view = RuntimeView::default()
            .with_global("webpackJsonp", HostValue::array(vec![]))
            .with_global("__webpack_require__", require_fn(vec![("m", modules)]));

        let mut analyzer = ModuleAnalyzer::default();
        let map = analyzer.extract_module_map(&view);
        let ids: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
        assert_eq!(map["0"].dependencies, vec!["1".to_string()]);
        assert!(map.values().all(|m| m.kind == ModuleKind::Function));
    }

    #[test]
    fn test_live_object_table_kinds_and_skips() {
        let mut entries = IndexMap::new();
        entries.insert(
            "./src/a.js".to_string(),
            HostValue::function(r#"function(e,t,n){var x=n("./src/b.js");n.d(t,"a",function(){return x})}"#),
        );
        entries.insert("./src/data.json".to_string(), HostValue::Object { entries: IndexMap::new() });
        entries.insert("broken".to_string(), HostValue::Inaccessible { reason: "getter threw".into() });
        entries.insert("42".to_string(), HostValue::string("weird"));

        let view = RuntimeView { module_table: Some(HostValue::Object { entries }), ..RuntimeView::default() };
        let mut analyzer = ModuleAnalyzer::default();
        let map = analyzer.extract_module_map(&view).clone();

        assert_eq!(map.len(), 3);
        let a = &map["./src/a.js"];
        assert_eq!(a.path.as_deref(), Some("./src/a.js"));
        assert_eq!(a.dependencies, vec!["./src/b.js".to_string()]);
        assert_eq!(a.export_count, 1);
        assert_eq!(map["./src/data.json"].kind, ModuleKind::Object);
        assert_eq!(map["42"].kind, ModuleKind::Unknown);
        assert_eq!(analyzer.diagnostics().len(), 1);
    }

    #[test]
    fn test_config_likelihood_threshold() {
        let mut entries = IndexMap::new();
        entries.insert("cfg".to_string(), HostValue::function(r#"function(e){e.exports={apiUrl:"/v1",token:"t"}}"#));
        entries.insert("plain".to_string(), HostValue::function("function(e){e.exports=1}"));
        let view = RuntimeView { module_table: Some(HostValue::Object { entries }), ..RuntimeView::default() };

        let mut analyzer = ModuleAnalyzer::default();
        let map = analyzer.extract_module_map(&view);
        assert!(map["cfg"].is_config_like);
        assert!(!map["plain"].is_config_like);
    }

    #[test]
    fn test_config_likeness_holds_as_keywords_grow() {
        let mut analyzer = ModuleAnalyzer::default();
        let mut body = String::from(r#"function(e){e.exports={apiUrl:"/v1",token:"t""#);
        for extra in ["", r#",secret:"s""#, r#",config:{}"#, r#",endpoint:"/e""#] {
            body.push_str(extra);
            let source = format!("{}}}}}", body);
            let mut entries = IndexMap::new();
            entries.insert("cfg".to_string(), HostValue::function(&source));
            let view = RuntimeView { module_table: Some(HostValue::Object { entries }), ..RuntimeView::default() };
            let map = analyzer.extract_module_map(&view);
            assert!(map["cfg"].is_config_like, "not config-like: {}", source);
        }
    }

    #[test]
    fn test_global_module_table_is_last_fallback() {
        let mut entries = IndexMap::new();
        entries.insert("./src/index.js".to_string(), HostValue::function(r#"function(e,t,n){n("./src/util.js")}"#));
        entries.insert("./src/util.js".to_string(), HostValue::function("function(e,t){t.a=1}"));
        let view = RuntimeView::default().with_global("__webpack_modules__", HostValue::Object { entries });

        let mut analyzer = ModuleAnalyzer::default();
        let map = analyzer.extract_module_map(&view);
        let ids: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["./src/index.js", "./src/util.js"]);
        assert_eq!(map["./src/index.js"].kind, ModuleKind::Function);
        assert!(analyzer.diagnostics().is_empty());
    }

    #[test]
    fn test_unreadable_host_table_falls_through_to_require_modules() {
        let modules = HostValue::array(vec![
            HostValue::function("function(e,t,n){n(1)}"),
            HostValue::function("function(e,t){e.exports={}}"),
        ]);
        let view = RuntimeView {
            module_table: Some(HostValue::Inaccessible { reason: "SecurityError".into() }),
            ..RuntimeView::default().with_global("__webpack_require__", require_fn(vec![("m", modules)]))
        };

        let mut analyzer = ModuleAnalyzer::default();
        let map = analyzer.extract_module_map(&view);
        let ids: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["0", "1"]);
        assert_eq!(analyzer.diagnostics().len(), 1);
        assert!(analyzer.diagnostics()[0].contains("SecurityError"));
    }

    #[test]
    fn test_no_table_yields_empty_map() {
        let mut analyzer = ModuleAnalyzer::default();
        assert!(analyzer.extract_module_map(&RuntimeView::default()).is_empty());
    }

    #[test]
    fn test_code_webpack5_chunk_file() {
        let code = r#"(self.webpackChunkapp=self.webpackChunkapp||[]).push([[179],{123:(e,t,n)=>{n.d(t,{Z:()=>r});var o=n(456);const r={apiUrl:"x",token:"y"}},456:function(e,t,n){e.exports="x"}}]);"#;
        let mut analyzer = ModuleAnalyzer::default();
        let map = analyzer.extract_module_map_from_code(code);

        let ids: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(ids, vec!["123", "456"]);
        let first = &map["123"];
        assert_eq!(first.dependencies, vec!["456".to_string()]);
        assert_eq!(first.export_count, 1);
        assert!(first.is_config_like);
        assert!(map["456"].size_bytes > 0);
        assert!(map["456"].dependencies.is_empty());
    }

    #[test]
    fn test_code_webpack4_dev_banners() {
        let code = r#"(function(modules) { /* bootstrap */ })
({

/***/ "./src/config.js":
/*!***********************!*\
  !*** ./src/config.js ***!
  \***********************/
/*! exports provided: default */
/***/ (function(module, __webpack_exports__, __webpack_require__) {

"use strict";
/* harmony import */ var _api__WEBPACK_IMPORTED_MODULE_0__ = __webpack_require__(/*! ./api */ "./src/api.js");
/* harmony default export */ __webpack_exports__["default"] = ({ endpoint: "/v1" });

/***/ }),

/***/ "./src/api.js":
/*!********************!*\
  !*** ./src/api.js ***!
  \********************/
/***/ (function(module, exports) {

module.exports.get = function() {};

/***/ })

/******/ });"#;
        let mut analyzer = ModuleAnalyzer::default();
        let map = analyzer.extract_module_map_from_code(code);

        let ids: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(ids, vec!["./src/config.js", "./src/api.js"]);
        assert_eq!(map["./src/config.js"].dependencies, vec!["./src/api.js".to_string()]);
        assert_eq!(map["./src/api.js"].export_count, 1);
        assert_eq!(map["./src/api.js"].path.as_deref(), Some("./src/api.js"));
    }

    #[test]
    fn test_code_array_table_with_holes() {
        let code = r#"!function(e){var t={};function n(r){return t[r]}n.p="/assets/";n.e=function(e){return 1}}([function(e,t,n){var r=n(2)},,function(e,t){e.exports={}}]);"#;
        let mut analyzer = ModuleAnalyzer::default();
        let map = analyzer.extract_module_map_from_code(code);

        let ids: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(ids, vec!["0", "2"]);
        assert_eq!(map["0"].dependencies, vec!["2".to_string()]);
        assert_eq!(analyzer.extract_public_path(AnalysisInput::Code(code)), "/assets/");
    }

    #[test]
    fn test_chunk_loading_webpack5_code() {
        let code = r#"r.u=e=>e+"."+{179:"8d2c2c3f",256:"1a2b3c4d"}[e]+".js",r.e=e=>Promise.all([]);"#;
        let analyzer = ModuleAnalyzer::default();
        let info = analyzer.analyze_chunk_loading(AnalysisInput::Code(code));

        assert!(info.has_async_loading);
        assert_eq!(info.naming_template.as_deref(), Some("[id].[hash].js"));
        assert_eq!(info.chunk_ids, vec!["179".to_string(), "256".to_string()]);
        assert_eq!(info.chunk_hash_map.get("256").map(String::as_str), Some("1a2b3c4d"));

        let urls = chunk_urls(&info, "/static/js/", "https://app.example.com/index.html");
        assert_eq!(urls[0], "https://app.example.com/static/js/179.8d2c2c3f.js");
    }

    #[test]
    fn test_chunk_loading_webpack4_jsonp_script_src() {
        let code = r#"function jsonpScriptSrc(chunkId) {
    return __webpack_require__.p + "" + ({}[chunkId]||chunkId) + "." + {"0":"31d6cfe0","1":"a1b2c3d4"}[chunkId] + ".js"
}"#;
        let info = ModuleAnalyzer::default().analyze_chunk_loading(AnalysisInput::Code(code));
        assert!(info.has_async_loading);
        assert_eq!(info.naming_template.as_deref(), Some("[id].[hash].js"));
        assert_eq!(info.chunk_hash_map.len(), 2);
    }

    #[test]
    fn test_unrecognised_template_is_none() {
        let code = r#"r.u=e=>"static/"+e+".bundle.js";"#;
        let info = ModuleAnalyzer::default().analyze_chunk_loading(AnalysisInput::Code(code));
        assert_eq!(info.naming_template, None);
        assert!(chunk_urls(&info, "", "https://e.com/").is_empty());
    }

    #[test]
    fn test_chunk_loading_from_live_runtime() {
        let ensure = HostValue::function("function(e){return Promise.resolve()}");
        let view = RuntimeView::default()
            .with_global("webpackChunkapp", HostValue::array(vec![]))
            .with_global("__webpack_require__", require_fn(vec![("e", ensure), ("p", HostValue::string("/js/"))]));

        let analyzer = ModuleAnalyzer::default();
        let info = analyzer.analyze_chunk_loading(AnalysisInput::Runtime(&view));
        assert!(info.has_async_loading);
        assert!(info.chunk_ids.is_empty());
        assert_eq!(info.naming_template, None);
        assert_eq!(analyzer.extract_public_path(AnalysisInput::Runtime(&view)), "/js/");

        let without_ensure = RuntimeView::default().with_global("__webpack_require__", require_fn(vec![]));
        assert!(!analyzer.analyze_chunk_loading(AnalysisInput::Runtime(&without_ensure)).has_async_loading);
    }

    #[test]
    fn test_public_path_fallbacks() {
        let analyzer = ModuleAnalyzer::default();
        assert_eq!(analyzer.extract_public_path(AnalysisInput::Code(r#"output:{publicPath:"/cdn/"}"#)), "/cdn/");
        assert_eq!(analyzer.extract_public_path(AnalysisInput::Code("var a = 1;")), "");
        assert_eq!(analyzer.extract_public_path(AnalysisInput::Runtime(&RuntimeView::default())), "");
    }

    #[test]
    fn test_public_path_ignores_unrelated_short_alias() {
        let code = r#"var o={};o.p="/not-webpack/";(()=>{var r={};r.p="/static/";r.u=e=>e+".js";})();"#;
        let analyzer = ModuleAnalyzer::default();
        assert_eq!(analyzer.extract_public_path(AnalysisInput::Code(code)), "/static/");

        let full = r#"o.p="/not-webpack/";__webpack_require__.p="/full/";"#;
        assert_eq!(analyzer.extract_public_path(AnalysisInput::Code(full)), "/full/");

        let app_only = r#"o.p="/not-webpack/";module.exports={output:{publicPath:"/cfg/"}}"#;
        assert_eq!(analyzer.extract_public_path(AnalysisInput::Code(app_only)), "/cfg/");
    }

    #[test]
    fn test_env_references_dedup_in_order() {
        let code = r#"a=process.env.REACT_APP_API_URL;b=process.env["SECRET_TOKEN"];c=process.env.REACT_APP_API_URL;d=import.meta.env.VITE_KEY"#;
        let names: Vec<String> = extract_env_references(code).into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["REACT_APP_API_URL", "SECRET_TOKEN", "VITE_KEY"]);
    }

    #[test]
    fn test_dynamic_imports() {
        let code = r#"import(/* webpackChunkName: "admin" */ "./pages/Admin");n.e(12).then(n.bind(n,5));"#;
        let imports = extract_dynamic_imports(code);
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].target, "./pages/Admin");
        assert_eq!(imports[0].chunk_name.as_deref(), Some("admin"));
        assert_eq!(imports[1].via, ImportVia::Ensure);
        assert_eq!(imports[1].target, "12");
    }

    #[test]
    fn test_split_and_strip_helpers() {
        assert_eq!(split_top_level(r#"a+"+"+(b+c)"#, b'+'), vec!["a", r#""+""#, "(b+c)"]);
        assert_eq!(strip_wrapping_parens("((x))"), "x");
        assert_eq!(strip_wrapping_parens("(a)+(b)"), "(a)+(b)");
    }
}
