// config.rs - Scan tuning knobs
// Purpose: Thresholds for heuristics, cache sizing and windowed processing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Distinct config keywords a module body needs to be flagged config-like
    pub config_keyword_threshold: usize,
    /// Minimum length of an unbroken opaque token to count as sensitive
    pub opaque_token_min_len: usize,
    /// Reconstructed strings from concatenation / array-join must be longer than this
    pub concat_min_len: usize,
    /// Reconstructed strings from char codes / base64 must be longer than this
    pub decoded_min_len: usize,
    /// Characters captured on each side of a sensitive finding
    pub context_radius: usize,
    /// Source maps kept before FIFO eviction kicks in
    pub source_map_cache_capacity: usize,
    /// Bytes per processing window for large bundles
    pub window_size: usize,
    /// Content above this size is processed window by window
    pub large_content_threshold: usize,
    /// Pause between windows in milliseconds (0 = no pause)
    pub window_pause_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            config_keyword_threshold: 2,
            opaque_token_min_len: 20,
            concat_min_len: 5,
            decoded_min_len: 3,
            context_radius: 50,
            source_map_cache_capacity: 50,
            window_size: 512 * 1024,
            large_content_threshold: 1024 * 1024,
            window_pause_ms: 0,
        }
    }
}

impl ScanConfig {
    /// Wider context, bigger cache and smaller windows for careful manual review
    pub fn thorough() -> Self {
        Self {
            context_radius: 120,
            source_map_cache_capacity: 200,
            window_size: 256 * 1024,
            large_content_threshold: 512 * 1024,
            window_pause_ms: 5,
            ..Self::default()
        }
    }

    /// Large windows and no pauses for batch runs
    pub fn fast() -> Self {
        Self {
            context_radius: 30,
            window_size: 2 * 1024 * 1024,
            large_content_threshold: 4 * 1024 * 1024,
            window_pause_ms: 0,
            ..Self::default()
        }
    }

    /// Load a config from a JSON file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ScanConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config.sanitized())
    }

    /// Clamp values that would make the engine misbehave
    pub fn sanitized(mut self) -> Self {
        if self.window_size == 0 {
            self.window_size = Self::default().window_size;
        }
        if self.source_map_cache_capacity == 0 {
            self.source_map_cache_capacity = 1;
        }
        if self.config_keyword_threshold == 0 {
            self.config_keyword_threshold = 1;
        }
        self
    }
}
