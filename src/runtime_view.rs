// runtime_view.rs - Explicit model of what a host page exposes to the scanner
// Purpose: Capability view over globals, require function, module table and script tags

use indexmap::IndexMap;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patterns::{
    CHUNK_ARRAY_PREFIX, JSONP_ARRAY_NAMES, JSONP_ARRAY_SUBSTRING, MODULE_TABLE_NAMES,
    REQUIRE_FUNCTION_NAMES, REQUIRE_MODULES_FIELD, REQUIRE_PUBLIC_PATH_FIELD, RE_SOURCE_MAP_URL,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbeError {
    #[error("host value `{name}` is not accessible: {reason}")]
    Inaccessible { name: String, reason: String },

    #[error("host value `{name}` is not a {expected}")]
    WrongShape { name: String, expected: &'static str },
}

/// A value read from the host environment. `Inaccessible` stands in for a
/// property whose getter throws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostValue {
    Array {
        #[serde(default)]
        items: Vec<HostValue>,
        /// Name of the function currently installed as `push`
        #[serde(default)]
        push_name: Option<String>,
    },
    Function {
        #[serde(default)]
        name: Option<String>,
        /// `Function.prototype.toString()` output
        #[serde(default)]
        source: String,
        #[serde(default)]
        properties: IndexMap<String, HostValue>,
    },
    Object {
        #[serde(default)]
        entries: IndexMap<String, HostValue>,
    },
    String {
        value: String,
    },
    Number {
        value: f64,
    },
    Bool {
        value: bool,
    },
    Null,
    Inaccessible {
        #[serde(default)]
        reason: String,
    },
}

impl HostValue {
    pub fn function(source: &str) -> Self {
        HostValue::Function { name: None, source: source.to_string(), properties: IndexMap::new() }
    }

    pub fn string(value: &str) -> Self {
        HostValue::String { value: value.to_string() }
    }

    pub fn array(items: Vec<HostValue>) -> Self {
        HostValue::Array { items, push_name: None }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, HostValue::Array { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self, HostValue::Function { .. })
    }

    pub fn is_object(&self) -> bool {
        matches!(self, HostValue::Object { .. })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String { value } => Some(value.as_str()),
            _ => None,
        }
    }

    /// Property lookup on functions and objects. Throwing getters surface as `Err`.
    pub fn property(&self, key: &str) -> Result<Option<&HostValue>, ProbeError> {
        let found = match self {
            HostValue::Function { properties, .. } => properties.get(key),
            HostValue::Object { entries } => entries.get(key),
            _ => None,
        };
        match found {
            Some(HostValue::Inaccessible { reason }) => Err(ProbeError::Inaccessible {
                name: key.to_string(),
                reason: reason.clone(),
            }),
            other => Ok(other),
        }
    }

    /// Name of the function installed as `push` on an array, if any
    pub fn push_name(&self) -> Option<&str> {
        match self {
            HostValue::Array { push_name, .. } => push_name.as_deref(),
            _ => None,
        }
    }
}

/// A `<script>` element as seen in the DOM
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptTag {
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub inline: Option<String>,
}

impl ScriptTag {
    pub fn external(src: &str) -> Self {
        Self { src: Some(src.to_string()), inline: None }
    }

    pub fn inline(body: &str) -> Self {
        Self { src: None, inline: Some(body.to_string()) }
    }

    /// Enumerate script elements of a static HTML document
    pub fn from_html(html: &str) -> Vec<ScriptTag> {
        let document = Html::parse_document(html);
        let script_selector = match Selector::parse("script") {
            Ok(selector) => selector,
            Err(_) => return Vec::new(),
        };

        document
            .select(&script_selector)
            .map(|element| {
                let src = element.value().attr("src").map(|s| s.trim().to_string());
                let body: String = element.text().collect();
                let inline = if body.trim().is_empty() { None } else { Some(body) };
                ScriptTag { src, inline }
            })
            .collect()
    }

    /// Inline body carries a sourceMappingURL comment, or the src itself is a map
    pub fn references_source_map(&self) -> bool {
        let inline_hit = self.inline.as_deref().is_some_and(|body| RE_SOURCE_MAP_URL.is_match(body));
        let src_hit = self.src.as_deref().is_some_and(|src| src.to_lowercase().contains(".map"));
        inline_hit || src_hit
    }
}

/// Everything the host exposes for one analysis pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeView {
    /// Global bindings in enumeration order
    #[serde(default)]
    pub globals: IndexMap<String, HostValue>,
    /// Module table handed over directly by the host, outranks every other source
    #[serde(default)]
    pub module_table: Option<HostValue>,
    /// `process.env.NODE_ENV` if the host exposes it
    #[serde(default)]
    pub node_env: Option<String>,
    #[serde(default)]
    pub scripts: Vec<ScriptTag>,
}

impl RuntimeView {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn with_global(mut self, name: &str, value: HostValue) -> Self {
        self.globals.insert(name.to_string(), value);
        self
    }

    pub fn with_script(mut self, script: ScriptTag) -> Self {
        self.scripts.push(script);
        self
    }

    /// Global lookup; a throwing getter surfaces as `Err`
    pub fn global(&self, name: &str) -> Result<Option<&HostValue>, ProbeError> {
        match self.globals.get(name) {
            Some(HostValue::Inaccessible { reason }) => Err(ProbeError::Inaccessible {
                name: name.to_string(),
                reason: reason.clone(),
            }),
            other => Ok(other),
        }
    }

    /// Webpack 4 JSONP arrays: exact names first, then any key containing the marker
    pub fn jsonp_arrays(&self) -> Vec<(&str, &HostValue)> {
        let mut found: Vec<(&str, &HostValue)> = JSONP_ARRAY_NAMES
            .iter()
            .filter_map(|name| self.globals.get_key_value(*name))
            .filter(|(_, value)| value.is_array())
            .map(|(name, value)| (name.as_str(), value))
            .collect();

        for (name, value) in &self.globals {
            if name.contains(JSONP_ARRAY_SUBSTRING)
                && value.is_array()
                && !found.iter().any(|(seen, _)| *seen == name.as_str())
            {
                found.push((name.as_str(), value));
            }
        }
        found
    }

    /// Webpack 5 chunk arrays (`webpackChunk<name>`)
    pub fn chunk_arrays(&self) -> Vec<(&str, &HostValue)> {
        self.globals
            .iter()
            .filter(|(name, value)| name.starts_with(CHUNK_ARRAY_PREFIX) && value.is_array())
            .map(|(name, value)| (name.as_str(), value))
            .collect()
    }

    /// Global require function, if exposed and actually a function
    pub fn require_function(&self) -> Result<Option<&HostValue>, ProbeError> {
        for name in REQUIRE_FUNCTION_NAMES {
            if let Some(value) = self.global(name)? {
                if value.is_function() {
                    return Ok(Some(value));
                }
                return Err(ProbeError::WrongShape { name: name.to_string(), expected: "function" });
            }
        }
        Ok(None)
    }

    /// Module table handed over by the host; a throwing or non-table value is an error
    pub fn direct_module_table(&self) -> Result<Option<&HostValue>, ProbeError> {
        match &self.module_table {
            None => Ok(None),
            Some(HostValue::Inaccessible { reason }) => Err(ProbeError::Inaccessible {
                name: "module_table".to_string(),
                reason: reason.clone(),
            }),
            Some(value) if value.is_object() || value.is_array() => Ok(Some(value)),
            Some(_) => Err(ProbeError::WrongShape { name: "module_table".to_string(), expected: "module table" }),
        }
    }

    /// Global module table object (`__webpack_modules__`)
    pub fn global_module_table(&self) -> Result<Option<&HostValue>, ProbeError> {
        for name in MODULE_TABLE_NAMES {
            if let Some(value) = self.global(name)? {
                if value.is_object() || value.is_array() {
                    return Ok(Some(value));
                }
                return Err(ProbeError::WrongShape { name: name.to_string(), expected: "module table" });
            }
        }
        Ok(None)
    }
}

/// Borrowed handles into a `RuntimeView`, valid only as long as the view
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeHandle<'a> {
    pub chunk_registry: Option<&'a HostValue>,
    pub chunk_registry_name: Option<&'a str>,
    pub require_fn: Option<&'a HostValue>,
    pub module_table: Option<&'a HostValue>,
    pub public_path: Option<&'a str>,
}

impl<'a> RuntimeHandle<'a> {
    /// Collect whatever handles the view offers; failing lookups become `None`
    pub fn acquire(view: &'a RuntimeView) -> Self {
        let (chunk_registry_name, chunk_registry) = view
            .chunk_arrays()
            .into_iter()
            .chain(view.jsonp_arrays())
            .next()
            .map(|(name, value)| (Some(name), Some(value)))
            .unwrap_or((None, None));

        let require_fn = view.require_function().ok().flatten();

        let module_table = view
            .direct_module_table()
            .ok()
            .flatten()
            .or_else(|| {
                require_fn
                    .and_then(|f| f.property(REQUIRE_MODULES_FIELD).ok().flatten())
                    .filter(|table| table.is_object() || table.is_array())
            })
            .or_else(|| view.global_module_table().ok().flatten());

        let public_path = require_fn
            .and_then(|f| f.property(REQUIRE_PUBLIC_PATH_FIELD).ok().flatten())
            .and_then(HostValue::as_str);

        Self { chunk_registry, chunk_registry_name, require_fn, module_table, public_path }
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_registry.is_none() && self.require_fn.is_none() && self.module_table.is_none()
    }
}
