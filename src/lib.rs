// lib.rs - bundlerecon
// Purpose: Webpack bundle introspection, source map recovery and sensitive string reconstruction

pub mod bundle_detector;
pub mod config;
pub mod module_analyzer;
pub mod patterns;
pub mod runtime_view;
pub mod scanner;
pub mod secrets_scanner;
pub mod source_map;
pub mod url_helper;
pub mod windows;

pub use bundle_detector::{detect, detect_from_code, BuildMode, DetectionResult, FeatureFlags, WebpackVersion};
pub use config::ScanConfig;
pub use module_analyzer::{AnalysisInput, ChunkLoadingInfo, ModuleAnalyzer, ModuleInfo, ModuleMap};
pub use runtime_view::{HostValue, RuntimeHandle, RuntimeView, ScriptTag};
pub use scanner::{write_report, BundleReport, BundleScanner, RuntimeReport, SourceMapReport};
pub use secrets_scanner::{
    extract_debug_markers, extract_sensitive_configs, reconstruct, DebugFinding, DebugMarker,
    ReconstructedString, SensitiveFinding, Technique,
};
pub use source_map::{SourceFileRecord, SourceMapDecoder, SourceMapDocument, SourceMapError};
