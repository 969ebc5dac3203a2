// patterns.rs - Static pattern catalogue for webpack runtime and secret recognition
// Purpose: Compiled-once regexes plus the small stateless helpers that use them

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Bumped whenever a pattern in this file changes meaning
pub const CATALOGUE_VERSION: u32 = 3;

// ═══════════════════════════════════════════════════════════════════
// WEBPACK RUNTIME NAMING CONVENTIONS
// ═══════════════════════════════════════════════════════════════════

/// Exact global names of the webpack 4 JSONP chunk array
pub const JSONP_ARRAY_NAMES: &[&str] = &["webpackJsonp"];
/// Substring carried by renamed webpack 4 JSONP arrays (`output.jsonpFunction`)
pub const JSONP_ARRAY_SUBSTRING: &str = "webpackJsonp";
/// Prefix of webpack 5 chunk arrays (`webpackChunk` + sanitized package name)
pub const CHUNK_ARRAY_PREFIX: &str = "webpackChunk";
/// Names the runtime gives the function it installs as `chunkArray.push`
pub const PATCHED_PUSH_NAMES: &[&str] = &["webpackJsonpCallback", "bound webpackJsonpCallback"];
/// Globals that expose the require function directly
pub const REQUIRE_FUNCTION_NAMES: &[&str] = &["__webpack_require__"];
/// Globals that expose the module table directly
pub const MODULE_TABLE_NAMES: &[&str] = &["__webpack_modules__"];
/// Property names on the require function
pub const REQUIRE_MODULES_FIELD: &str = "m";
pub const REQUIRE_PUBLIC_PATH_FIELD: &str = "p";
pub const REQUIRE_ENSURE_FIELD: &str = "e";
pub const REQUIRE_VERSION_FIELD: &str = "version";

/// Script URL suffixes that indicate a production build
pub const PRODUCTION_SCRIPT_SUFFIXES: &[&str] = &[".min.js", ".prod.js", ".production.js", ".production.min.js"];

/// Chunk filename shapes we are willing to report
pub const KNOWN_CHUNK_TEMPLATES: &[&str] = &["[id].[hash].js", "chunk.[id].[hash].js", "[name].[hash].chunk.js"];

/// Keywords that make a module body look like configuration (matched case-sensitively)
pub const CONFIG_KEYWORDS: &[&str] = &[
    "api", "API", "Api",
    "secret", "SECRET", "Secret",
    "config", "CONFIG", "Config",
    "token", "TOKEN", "Token",
    "endpoint", "ENDPOINT", "Endpoint",
];

/// Keywords that make a reconstructed string worth reporting (matched case-insensitively)
pub const SENSITIVE_KEYWORDS: &[&str] = &[
    "key", "secret", "token", "password", "passwd", "pwd", "auth", "credential",
    "private", "bearer", "session", "api",
];

/// Substrings (lowercase) that mark a value as an example rather than a real secret
pub const PLACEHOLDER_TOKENS: &[&str] = &[
    "example", "sample", "placeholder", "your_", "your-", "yourkey", "changeme", "change_me",
    "replace_me", "replaceme", "insert_", "dummy", "redacted", "xxxxx", "undefined", "null",
];

// ═══════════════════════════════════════════════════════════════════
// CODE-TEXT PATTERNS
// ═══════════════════════════════════════════════════════════════════

lazy_static! {
    // publicPath assignment: __webpack_require__.p = "..." (also minified r.p="...")
    pub static ref RE_PUBLIC_PATH_ASSIGN: Regex = Regex::new(r#"(?P<alias>__webpack_require__|\b[A-Za-z_$][\w$]?)\.p\s*=\s*["'](?P<path>[^"'\n]*)["']"#).unwrap();
    // Runtime members written through a short require alias: r.u=, r.e=, r.d(
    pub static ref RE_RUNTIME_ALIAS_MEMBER: Regex = Regex::new(r"(?:^|[^\w$.])([A-Za-z_$][\w$]?)\.(?:[uemc]\s*=[^=]|[rdn]\s*\()").unwrap();
    pub static ref RE_PUBLIC_PATH_OPTION: Regex = Regex::new(r#"\bpublicPath\s*:\s*["']([^"'\n]*)["']"#).unwrap();

    // Chunk loading idioms
    pub static ref RE_CHUNK_LOADING: Regex = Regex::new(r"__webpack_require__\.e\b|__webpack_require__\.f\.j\b|\bjsonpScriptSrc\b|\bwebpackJsonpCallback\b|\.e\s*=\s*function\s*\(\s*[\w$]+\s*\)\s*\{|\bwebpackChunk[\w$]*").unwrap();
    // Brace-delimited chunk id -> hash groups: {0:"a1b2c3d4",12:"..."}
    pub static ref RE_CHUNK_HASH_GROUP: Regex = Regex::new(r#"\{((?:\s*["']?[\w$-]+["']?\s*:\s*["'][0-9a-f]{6,}["']\s*,?)+)\s*\}"#).unwrap();
    pub static ref RE_CHUNK_HASH_PAIR: Regex = Regex::new(r#"["']?([\w$-]+)["']?\s*:\s*["']([0-9a-f]{6,})["']"#).unwrap();
    // Chunk filename templates written literally
    pub static ref RE_CHUNK_TEMPLATE_LITERAL: Regex = Regex::new(r#"["']([^"'\s]*\[(?:id|name|hash|chunkhash|contenthash)(?::\d+)?\][^"'\s]*)["']"#).unwrap();
    // Start of the id-to-filename function; the returned expression begins at match end
    pub static ref RE_CHUNK_URL_FN: Regex = Regex::new(r"(?:__webpack_require__|\b[A-Za-z_$][\w$]?)\.u\s*=\s*(?:function\s*\(\s*([\w$]+)\s*\)\s*\{|\(?\s*([\w$]+)\s*\)?\s*=>\s*\{?)(?:\s*//[^\n]*)*\s*(?:return\s+)?").unwrap();
    pub static ref RE_JSONP_SCRIPT_SRC: Regex = Regex::new(r"function\s+jsonpScriptSrc\s*\(\s*([\w$]+)\s*\)\s*\{\s*return\s+").unwrap();

    // Module factory signatures
    pub static ref RE_FACTORY_PARAMS: Regex = Regex::new(r"^\s*(?:function\b\s*[\w$]*\s*)?\(\s*([\w$\s,]*)\)").unwrap();
    pub static ref RE_OBJECT_FACTORY_KEY: Regex = Regex::new(r#"(?:^|[{,])\s*(?:/\*(?:[^*]|\*+[^*/])*\*+/\s*)*(?:"([^"\n]+)"|'([^'\n]+)'|(\d+))\s*:\s*(?:/\*(?:[^*]|\*+[^*/])*\*+/\s*)*\(?\s*(?:function\b|\([\w$\s,]*\)\s*=>|[\w$]+\s*=>)"#).unwrap();
    pub static ref RE_ARRAY_FACTORY: Regex = Regex::new(r"(?:^|[\[,])\s*(?:function\s*\([\w$\s,]*\)|\([\w$\s,]*\)\s*=>)\s*\{").unwrap();

    // Require-call idioms
    pub static ref RE_WEBPACK_REQUIRE_CALL: Regex = Regex::new(r#"__webpack_require__\(\s*(?:/\*[^*]*\*/\s*)*(?:"([^"\n]+)"|'([^'\n]+)'|(\d+))\s*\)"#).unwrap();
    pub static ref RE_COMMONJS_REQUIRE_CALL: Regex = Regex::new(r#"\brequire\(\s*(?:"([^"\n]+)"|'([^'\n]+)')\s*\)"#).unwrap();
    // Export definitions: r.d(t,"a",function(){...}) (v4) and r.d(t,{a:()=>x}) (v5)
    pub static ref RE_EXPORT_DEFINE_NAMED: Regex = Regex::new(r#"(?:__webpack_require__|\b[A-Za-z_$][\w$]?)\.d\(\s*[\w$]+\s*,\s*["'][\w$]+["']"#).unwrap();
    pub static ref RE_EXPORT_DEFINE_OBJECT: Regex = Regex::new(r"(?:__webpack_require__|\b[A-Za-z_$][\w$]?)\.d\(\s*[\w$]+\s*,\s*\{").unwrap();
    pub static ref RE_EXPORT_GETTER: Regex = Regex::new(r#"["']?[\w$]+["']?\s*:\s*(?:function\s*\(\s*\)\s*\{\s*return|\(\s*\)\s*=>)"#).unwrap();
    pub static ref RE_MODULE_PATH_BANNER: Regex = Regex::new(r"!\*{3}\s+(\S+)\s+\*{3}!").unwrap();
    pub static ref RE_EXPORTS_ASSIGN: Regex = Regex::new(r"\b(?:module\.exports|exports)\.[\w$]+\s*=").unwrap();

    // process.env injection
    pub static ref RE_PROCESS_ENV_DOT: Regex = Regex::new(r"process\.env\.([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    pub static ref RE_PROCESS_ENV_INDEX: Regex = Regex::new(r#"process\.env\[\s*["']([A-Za-z_][A-Za-z0-9_]*)["']\s*\]"#).unwrap();
    pub static ref RE_IMPORT_META_ENV: Regex = Regex::new(r"import\.meta\.env\.([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    pub static ref RE_NODE_ENV_LITERAL: Regex = Regex::new(r#"(?:process\.env\.NODE_ENV|["']NODE_ENV["'])\s*[:=]{1,3}\s*["'](development|production)["']"#).unwrap();

    // Source map references; line form first, block form second
    pub static ref RE_SOURCE_MAP_URL: Regex = Regex::new(r#"//[#@][ \t]*sourceMappingURL[ \t]*=[ \t]*([^\s'"]+)|/\*[#@][ \t]*sourceMappingURL[ \t]*=[ \t]*([^\s*]+)[ \t]*\*/"#).unwrap();

    // Dynamic imports
    pub static ref RE_DYNAMIC_IMPORT: Regex = Regex::new(r#"\bimport\(\s*(?:/\*[^*]*\*/\s*)*["'`]([^"'`\n]+)["'`]\s*\)"#).unwrap();
    // Chunk-loading global in property, index, declaration or assignment position
    pub static ref RE_CHUNK_GLOBAL_USE: Regex = Regex::new(r#"(?:\.|\[\s*["']|\b(?:var|let|const)\s+)(webpackChunk[\w$]*)|\b(webpackChunk[\w$]*)\s*=[^=]"#).unwrap();
    pub static ref RE_WEBPACK_CHUNK_NAME: Regex = Regex::new(r#"webpackChunkName\s*:\s*["']([^"'\n]+)["']"#).unwrap();
    pub static ref RE_ENSURE_CALL: Regex = Regex::new(r#"(?:__webpack_require__|\b[A-Za-z_$][\w$]?)\.e\(\s*(?:"([^"\n]+)"|'([^'\n]+)'|(\d+))\s*\)"#).unwrap();

    // Build-mode text heuristics
    pub static ref RE_LINE_COMMENT: Regex = Regex::new(r"(?m)^\s*//[^\n]*$").unwrap();
    pub static ref RE_RUNTIME_MARKER: Regex = Regex::new(r"__webpack_require__|webpackJsonp|webpackChunk|__webpack_modules__").unwrap();

    // Debug markers
    pub static ref RE_LINE_MARKER: Regex = Regex::new(r"//[ \t]*(TODO|FIXME|HACK|XXX|DEBUG|NOTE)\b:?[ \t]*([^\n]*)").unwrap();
    pub static ref RE_BLOCK_MARKER: Regex = Regex::new(r"/\*[\s*]*(TODO|FIXME|HACK|XXX|DEBUG|NOTE)\b:?\s*((?s:.*?))\s*\*/").unwrap();
    pub static ref RE_CONSOLE_CALL: Regex = Regex::new(r#"console\.(log|debug|info|warn|error)\s*\(\s*(?:"((?:[^"\\\n]|\\.)*)"|'((?:[^'\\\n]|\\.)*)'|`([^`]*)`)"#).unwrap();

    // ═══════════════════════════════════════════════════════════════════
    // STRING RECONSTRUCTION
    // ═══════════════════════════════════════════════════════════════════

    pub static ref RE_CONCAT_DOUBLE: Regex = Regex::new(r#""(?:[^"\\\n]|\\.)*"(?:\s*\+\s*"(?:[^"\\\n]|\\.)*")+"#).unwrap();
    pub static ref RE_CONCAT_SINGLE: Regex = Regex::new(r#"'(?:[^'\\\n]|\\.)*'(?:\s*\+\s*'(?:[^'\\\n]|\\.)*')+"#).unwrap();
    pub static ref RE_STRING_LITERAL: Regex = Regex::new(r#""((?:[^"\\\n]|\\.)*)"|'((?:[^'\\\n]|\\.)*)'"#).unwrap();
    pub static ref RE_ARRAY_JOIN: Regex = Regex::new(r#"\[\s*((?:"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*')(?:\s*,\s*(?:"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'))*)\s*,?\s*\]\s*\.\s*join\s*\(\s*(?:"((?:[^"\\\n]|\\.)*)"|'((?:[^'\\\n]|\\.)*)')?\s*\)"#).unwrap();
    pub static ref RE_FROM_CHAR_CODE: Regex = Regex::new(r#"String\s*(?:\.\s*fromCharCode|\[\s*["']fromCharCode["']\s*\])\s*\(\s*([0-9a-fA-FxX,\s]+?)\s*\)"#).unwrap();
    pub static ref RE_BASE64_CALL: Regex = Regex::new(r#"(?:\b(?:window\.)?atob\s*\(\s*["']([A-Za-z0-9+/]+={0,2})["']\s*\)|Buffer\.from\(\s*["']([A-Za-z0-9+/]+={0,2})["']\s*,\s*["']base64["']\s*\))"#).unwrap();
    pub static ref RE_OPAQUE_TOKEN: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════
// SENSITIVE VALUE CATALOGUE
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensitiveCategory {
    ApiKey,
    Token,
    Password,
    CloudKey,
}

impl SensitiveCategory {
    pub fn label(&self) -> &'static str {
        match self {
            SensitiveCategory::ApiKey => "API_KEY",
            SensitiveCategory::Token => "TOKEN",
            SensitiveCategory::Password => "PASSWORD",
            SensitiveCategory::CloudKey => "CLOUD_KEY",
        }
    }
}

/// One catalogue entry; capture group 1 is always the value
pub struct SensitivePattern {
    pub id: &'static str,
    pub category: SensitiveCategory,
    pub regex: Regex,
}

fn entry(id: &'static str, category: SensitiveCategory, pattern: &str) -> SensitivePattern {
    SensitivePattern { id, category, regex: Regex::new(pattern).unwrap() }
}

lazy_static! {
    pub static ref SENSITIVE_CATALOGUE: Vec<SensitivePattern> = vec![
        // API keys
        entry("api_key_assign", SensitiveCategory::ApiKey,
            r#"(?i)\b(?:api[_-]?key|x-api-key|app[_-]?key)["']?\s*[:=]\s*["'`]([^"'`\s]{6,})["'`]"#),
        entry("secret_key_assign", SensitiveCategory::ApiKey,
            r#"(?i)\b(?:secret[_-]?key|client[_-]?secret|app[_-]?secret|api[_-]?secret)["']?\s*[:=]\s*["'`]([^"'`\s]{6,})["'`]"#),
        entry("access_key_assign", SensitiveCategory::ApiKey,
            r#"(?i)\baccess[_-]?key(?:[_-]?id)?["']?\s*[:=]\s*["'`]([^"'`\s]{6,})["'`]"#),
        // Tokens
        entry("auth_token_assign", SensitiveCategory::Token,
            r#"(?i)\b(?:auth[_-]?token|access[_-]?token|refresh[_-]?token|id[_-]?token|bearer[_-]?token|api[_-]?token)["']?\s*[:=]\s*["'`]([^"'`\s]{8,})["'`]"#),
        entry("bearer_header", SensitiveCategory::Token,
            r#"["'`]Bearer\s+([A-Za-z0-9\-._~+/]{16,}=*)["'`]"#),
        entry("jwt_literal", SensitiveCategory::Token,
            r"\b(eyJ[A-Za-z0-9_-]{8,}\.eyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,})"),
        // Passwords
        entry("db_password_assign", SensitiveCategory::Password,
            r#"(?i)\b(?:db|database|mysql|postgres|mongo|redis)[_-]?(?:password|passwd|pwd)["']?\s*[:=]\s*["'`]([^"'`\n]{4,})["'`]"#),
        entry("password_assign", SensitiveCategory::Password,
            r#"(?i)\b(?:password|passwd|pwd)["']?\s*[:=]\s*["'`]([^"'`\n]{4,})["'`]"#),
        // Cloud provider key formats
        entry("aws_access_key_id", SensitiveCategory::CloudKey,
            r"\b((?:AKIA|ASIA|AGPA|AIDA|AROA|AIPA|ANPA|ANVA)[A-Z0-9]{16})\b"),
        entry("aws_secret_access_key", SensitiveCategory::CloudKey,
            r#"(?i)aws[_-]?secret[_-]?(?:access[_-]?)?key["']?\s*[:=]\s*["'`]([A-Za-z0-9/+=]{40})["'`]"#),
        entry("google_api_key", SensitiveCategory::CloudKey,
            r"\b(AIza[0-9A-Za-z_-]{35})"),
        entry("aliyun_access_key_id", SensitiveCategory::CloudKey,
            r"\b(LTAI[A-Za-z0-9]{12,20})\b"),
        entry("tencent_secret_id", SensitiveCategory::CloudKey,
            r"\b(AKID[A-Za-z0-9]{13,40})\b"),
        entry("azure_account_key", SensitiveCategory::CloudKey,
            r"AccountKey=([A-Za-z0-9+/]{86}==)"),
    ];

    pub static ref SENSITIVE_PATH_INDICATORS: Vec<Regex> = vec![
        Regex::new(r"(?i)config").unwrap(),
        Regex::new(r"(?i)(?:^|[/._-])env(?:$|[/._-])").unwrap(),
        Regex::new(r"(?i)secret").unwrap(),
        Regex::new(r"(?i)(?:^|[/._-])keys?(?:$|[/._-])").unwrap(),
        Regex::new(r"(?i)(?:^|[/._-])api(?:$|[/._-])").unwrap(),
        Regex::new(r"(?i)auth").unwrap(),
        Regex::new(r"(?i)credential").unwrap(),
        Regex::new(r"(?i)passw(?:or)?d").unwrap(),
        Regex::new(r"(?i)token").unwrap(),
        Regex::new(r"(?i)dotenv").unwrap(),
    ];
}

// ═══════════════════════════════════════════════════════════════════
// STATELESS HELPERS
// ═══════════════════════════════════════════════════════════════════

/// Number of distinct keywords from `keywords` present in `body` (case-sensitive)
pub fn count_keyword_hits(body: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| body.contains(**kw)).count()
}

/// True if `value` contains any sensitive keyword, ignoring case
pub fn contains_sensitive_keyword(value: &str) -> bool {
    let lower = value.to_lowercase();
    SENSITIVE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Long run of `[A-Za-z0-9_-]` with no separators
pub fn is_opaque_token(value: &str, min_len: usize) -> bool {
    value.len() >= min_len && RE_OPAQUE_TOKEN.is_match(value)
}

/// Template markers, angle brackets or a known example token
pub fn is_placeholder(value: &str) -> bool {
    if value.contains("{{") || value.contains("}}") || value.contains("${") {
        return true;
    }
    if value.contains('<') || value.contains('>') {
        return true;
    }
    let lower = value.to_lowercase();
    PLACEHOLDER_TOKENS.iter().any(|token| lower.contains(token))
}

/// True if `path` hits any sensitive path indicator
pub fn is_sensitive_path(path: &str) -> bool {
    SENSITIVE_PATH_INDICATORS.iter().any(|re| re.is_match(path))
}

/// Reduce a filename template to its canonical shape and look it up
/// in the known template library
pub fn match_chunk_template(template: &str) -> Option<&'static str> {
    lazy_static! {
        static ref RE_HASH_PLACEHOLDER: Regex = Regex::new(r"\[(?:hash|chunkhash|contenthash)(?::\d+)?\]").unwrap();
    }
    let file_part = template.rsplit('/').next().unwrap_or(template);
    let canonical = RE_HASH_PLACEHOLDER.replace_all(file_part, "[hash]");
    KNOWN_CHUNK_TEMPLATES.iter().copied().find(|known| *known == canonical)
}

/// First non-empty capture group of a match (for alternation patterns)
pub fn first_group<'t>(caps: &regex::Captures<'t>) -> Option<regex::Match<'t>> {
    (1..caps.len()).filter_map(|i| caps.get(i)).next()
}
