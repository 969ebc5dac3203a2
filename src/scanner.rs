// scanner.rs - One-pass bundle scan combining every analysis
// Purpose: Drive detector, analyzer, decoder and reconstructor over a script and collect a report

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::bundle_detector::{detect, detect_from_code, DetectionResult};
use crate::config::ScanConfig;
use crate::module_analyzer::{
    chunk_urls, extract_dynamic_imports, extract_env_references, AnalysisInput, ChunkLoadingInfo,
    DynamicImport, EnvReference, ModuleAnalyzer, ModuleMap,
};
use crate::patterns::CATALOGUE_VERSION;
use crate::runtime_view::RuntimeView;
use crate::secrets_scanner::{
    extract_debug_markers, extract_sensitive_configs, reconstruct, DebugFinding, ReconstructedString,
    SensitiveFinding,
};
use crate::source_map::{SourceMapDecoder, SourceMapDocument};
use crate::url_helper::{classify_url, extract_chunk_id, AssetKind};
use crate::windows::scan_windowed;

// ═══════════════════════════════════════════════════════════════════
// REPORTS
// ═══════════════════════════════════════════════════════════════════

/// Sensitive value found inside embedded source content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceMapFinding {
    pub source: String,
    #[serde(flatten)]
    pub finding: SensitiveFinding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceMapReport {
    pub map_url: String,
    pub file: Option<String>,
    pub source_count: usize,
    pub has_embedded_content: bool,
    /// Resolved source paths, index-aligned with the map's `sources`
    pub sources: Vec<String>,
    pub sensitive_paths: Vec<String>,
    pub findings: Vec<SourceMapFinding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleReport {
    pub url: String,
    pub asset_kind: AssetKind,
    /// Set when the script itself is a lazily loaded chunk
    pub chunk_id: Option<String>,
    pub size_bytes: usize,
    pub scanned_at: String,
    /// Pattern catalogue the findings were produced with
    pub catalogue_version: u32,
    pub detection: DetectionResult<'static>,
    pub chunk_loading: ChunkLoadingInfo,
    pub public_path: String,
    pub chunk_urls: Vec<String>,
    pub modules: ModuleMap,
    pub module_diagnostics: Vec<String>,
    pub env_references: Vec<EnvReference>,
    pub dynamic_imports: Vec<DynamicImport>,
    pub source_map_url: Option<String>,
    pub source_map: Option<SourceMapReport>,
    pub reconstructed: Vec<ReconstructedString>,
    pub sensitive: Vec<SensitiveFinding>,
    pub debug_markers: Vec<DebugFinding>,
}

impl BundleReport {
    /// Findings from the script itself plus its embedded sources
    pub fn total_sensitive(&self) -> usize {
        self.sensitive.len() + self.source_map.as_ref().map_or(0, |map| map.findings.len())
    }
}

/// What a live runtime snapshot revealed
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeReport<'a> {
    pub detection: DetectionResult<'a>,
    pub modules: ModuleMap,
    pub module_diagnostics: Vec<String>,
    pub chunk_loading: ChunkLoadingInfo,
    pub public_path: String,
}

// ═══════════════════════════════════════════════════════════════════
// SCANNER
// ═══════════════════════════════════════════════════════════════════

pub struct BundleScanner {
    config: ScanConfig,
    analyzer: ModuleAnalyzer,
    decoder: SourceMapDecoder,
}

impl Default for BundleScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

impl BundleScanner {
    pub fn new(config: ScanConfig) -> Self {
        let config = config.sanitized();
        Self { analyzer: ModuleAnalyzer::new(&config), decoder: SourceMapDecoder::new(&config), config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn decoder(&self) -> &SourceMapDecoder {
        &self.decoder
    }

    /// Static analysis of one script's text
    pub fn scan_code(&mut self, url: &str, code: &str) -> BundleReport {
        let detection = detect_from_code(code);

        let chunk_loading = self.analyzer.analyze_chunk_loading(AnalysisInput::Code(code));
        let public_path = self.analyzer.extract_public_path(AnalysisInput::Code(code));
        let chunk_urls = chunk_urls(&chunk_loading, &public_path, url);
        let modules = self.analyzer.extract_module_map_from_code(code).clone();
        let module_diagnostics = self.analyzer.diagnostics().to_vec();

        let source_map_url = self.decoder.resolve_reference_url(code, url);
        let source_map = match source_map_url.as_deref() {
            Some(reference) if reference.starts_with("data:") => {
                let key = format!("{}#inline-map", url);
                self.decoder
                    .decode_cached(&key, reference)
                    .map(|document| self.summarize_source_map(&key, &document))
            }
            _ => None,
        };

        let config = &self.config;
        let mut reconstructed = scan_windowed(code, config, |window| {
            reconstruct(window.text, config)
                .into_iter()
                .map(|mut found| {
                    found.offset += window.offset;
                    found
                })
                .collect()
        });
        // Windows interleave techniques; the stable sort restores technique order
        reconstructed.sort_by_key(|found| found.technique);

        let sensitive = scan_windowed(code, config, |window| {
            extract_sensitive_configs(window.text, config)
                .into_iter()
                .map(|mut finding| {
                    finding.offset += window.offset;
                    finding
                })
                .collect()
        });

        let debug_markers = scan_windowed(code, config, |window| {
            extract_debug_markers(window.text)
                .into_iter()
                .map(|mut marker| {
                    marker.offset += window.offset;
                    marker
                })
                .collect()
        });

        info!(
            "{}: webpack {} ({} modules, {} reconstructed, {} sensitive, {} markers)",
            url,
            detection.version.as_str(),
            modules.len(),
            reconstructed.len(),
            sensitive.len(),
            debug_markers.len()
        );

        let asset_kind = classify_url(url);
        BundleReport {
            url: url.to_string(),
            asset_kind,
            chunk_id: if asset_kind == AssetKind::Chunk { extract_chunk_id(url) } else { None },
            size_bytes: code.len(),
            scanned_at: Utc::now().to_rfc3339(),
            catalogue_version: CATALOGUE_VERSION,
            detection,
            chunk_loading,
            public_path,
            chunk_urls,
            modules,
            module_diagnostics,
            env_references: extract_env_references(code),
            dynamic_imports: extract_dynamic_imports(code),
            source_map_url,
            source_map,
            reconstructed,
            sensitive,
            debug_markers,
        }
    }

    /// Decode a standalone source map (raw JSON or data URL) fetched from `map_url`
    pub fn scan_source_map(&mut self, map_url: &str, raw: &str) -> Option<SourceMapReport> {
        let document = self.decoder.decode_cached(map_url, raw)?;
        Some(self.summarize_source_map(map_url, &document))
    }

    /// Detection first; the module table is only walked on a positive result
    pub fn scan_runtime<'v>(&mut self, view: &'v RuntimeView) -> RuntimeReport<'v> {
        let detection = detect(view);
        if !detection.detected {
            debug!("runtime snapshot shows no webpack signature");
            return RuntimeReport {
                detection,
                modules: ModuleMap::new(),
                module_diagnostics: Vec::new(),
                chunk_loading: ChunkLoadingInfo::default(),
                public_path: String::new(),
            };
        }

        let modules = self.analyzer.extract_module_map(view).clone();
        info!("runtime snapshot: webpack {} with {} modules", detection.version.as_str(), modules.len());

        RuntimeReport {
            modules,
            module_diagnostics: self.analyzer.diagnostics().to_vec(),
            chunk_loading: self.analyzer.analyze_chunk_loading(AnalysisInput::Runtime(view)),
            public_path: self.analyzer.extract_public_path(AnalysisInput::Runtime(view)),
            detection,
        }
    }

    fn summarize_source_map(&self, map_url: &str, document: &SourceMapDocument) -> SourceMapReport {
        let files = self.decoder.list_source_files(document);
        let sensitive_paths = self
            .decoder
            .filter_sensitive_paths(&files)
            .into_iter()
            .map(|file| file.resolved_path)
            .collect();

        let mut findings = Vec::new();
        for file in &files {
            let Some(content) = file.content.as_deref() else {
                continue;
            };
            let found = scan_windowed(content, &self.config, |window| {
                extract_sensitive_configs(window.text, &self.config)
                    .into_iter()
                    .map(|mut finding| {
                        finding.offset += window.offset;
                        finding
                    })
                    .collect()
            });
            findings.extend(found.into_iter().map(|finding| SourceMapFinding {
                source: file.resolved_path.clone(),
                finding,
            }));
        }

        SourceMapReport {
            map_url: map_url.to_string(),
            file: document.file.clone(),
            source_count: document.source_count,
            has_embedded_content: document.has_embedded_content,
            sources: files.into_iter().map(|file| file.resolved_path).collect(),
            sensitive_paths,
            findings,
        }
    }
}

/// Serialize any report as pretty JSON
pub fn write_report<T: Serialize>(report: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}
