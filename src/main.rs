// main.rs - bundlerecon
// Purpose: Command-line front end for webpack bundle introspection and secret recovery

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use colored::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use bundlerecon::secrets_scanner::create_safe_preview;
use bundlerecon::{
    write_report, BundleReport, BundleScanner, RuntimeReport, RuntimeView, ScanConfig, ScriptTag, SourceMapDecoder,
    SourceMapReport,
};

/// bundlerecon - Webpack bundle introspection and secret recovery
#[derive(Parser, Debug)]
#[command(
    name = "bundlerecon",
    version,
    about = "Webpack bundle introspection, source map recovery and sensitive string reconstruction",
    after_help = r#"
EXAMPLES:

  Analyze downloaded bundles:
    bundlerecon --js main.js vendor.js --url https://app.example.com/static/js/

  Decode a source map and list its sources:
    bundlerecon --map main.js.map

  Analyze a runtime snapshot plus the page that loaded it:
    bundlerecon --runtime snapshot.json --html index.html -o report.json
"#
)]
struct Args {
    // ═══════════════════════════════════════════════════════════════════════════
    // INPUTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Bundle files to analyze
    #[arg(long, value_name = "FILE", num_args = 1.., help_heading = "Inputs")]
    js: Vec<PathBuf>,

    /// Base URL for resolving source map and chunk references
    #[arg(long, default_value = "http://localhost/", value_name = "URL", help_heading = "Inputs")]
    url: String,

    /// Standalone source map to decode
    #[arg(long, value_name = "FILE", help_heading = "Inputs")]
    map: Option<PathBuf>,

    /// JSON runtime snapshot for live detection and module extraction
    #[arg(long, value_name = "FILE", help_heading = "Inputs")]
    runtime: Option<PathBuf>,

    /// HTML page whose script tags join the runtime snapshot
    #[arg(long, value_name = "FILE", help_heading = "Inputs")]
    html: Option<PathBuf>,

    // ═══════════════════════════════════════════════════════════════════════════
    // TUNING & OUTPUT
    // ═══════════════════════════════════════════════════════════════════════════

    /// JSON config file; missing keys use defaults
    #[arg(long, value_name = "FILE", help_heading = "Tuning")]
    config: Option<PathBuf>,

    /// Built-in threshold preset, ignored when --config is given
    #[arg(long, value_enum, default_value_t = Preset::Default, help_heading = "Tuning")]
    preset: Preset,

    /// Write the full JSON report here
    #[arg(short, long, value_name = "FILE", help_heading = "Output")]
    output: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG still wins when set)
    #[arg(short, long, help_heading = "Output")]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Preset {
    Default,
    Thorough,
    Fast,
}

/// Everything one invocation produced
#[derive(Serialize)]
struct ScanOutput<'a> {
    generated_at: String,
    base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime: Option<RuntimeReport<'a>>,
    source_maps: Vec<SourceMapReport>,
    bundles: Vec<BundleReport>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    print_banner();

    let config = load_config(&args)?;
    let mut scanner = BundleScanner::new(config);

    let view = load_runtime_view(&args)?;
    let runtime = view.as_ref().map(|view| scanner.scan_runtime(view));
    if let Some(report) = &runtime {
        display_runtime_report(report);
    }

    let mut source_maps = Vec::new();
    if let Some(path) = &args.map {
        let raw = read_text(path)?;
        let map_url = path.display().to_string();
        match scanner.scan_source_map(&map_url, &raw) {
            Some(report) => {
                display_source_map_report(&report);
                source_maps.push(report);
            }
            None => println!("{}", format!("[!] {} is not a usable v3 source map", map_url).red()),
        }
    }

    let mut bundles = Vec::new();
    for path in &args.js {
        let code = read_text(path)?;
        let script_url = script_url(&args.url, path);
        let report = scanner.scan_code(&script_url, &code);
        display_bundle_report(&report, scanner.decoder());
        bundles.push(report);
    }

    if runtime.is_none() && source_maps.is_empty() && bundles.is_empty() {
        println!("{}", "[!] Nothing to analyze. Pass --js, --map or --runtime (see --help).".yellow());
        return Ok(());
    }

    print_totals(&bundles, &source_maps);

    if let Some(path) = &args.output {
        let output = ScanOutput {
            generated_at: Utc::now().to_rfc3339(),
            base_url: args.url.clone(),
            runtime,
            source_maps,
            bundles,
        };
        write_report(&output, path)?;
        println!("{}", format!("[+] Report saved to: {}", path.display()).green());
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn load_config(args: &Args) -> Result<ScanConfig> {
    if let Some(path) = &args.config {
        let config = ScanConfig::from_file(path)?;
        println!("{}", format!("[*] Config loaded from {}", path.display()).cyan());
        return Ok(config);
    }
    Ok(match args.preset {
        Preset::Default => ScanConfig::default(),
        Preset::Thorough => ScanConfig::thorough(),
        Preset::Fast => ScanConfig::fast(),
    })
}

/// Runtime snapshot, HTML script tags, or both merged into one view
fn load_runtime_view(args: &Args) -> Result<Option<RuntimeView>> {
    let mut view = match &args.runtime {
        Some(path) => {
            let raw = read_text(path)?;
            let view = RuntimeView::from_json(&raw)
                .with_context(|| format!("Failed to parse runtime snapshot {}", path.display()))?;
            Some(view)
        }
        None => None,
    };

    if let Some(path) = &args.html {
        let html = read_text(path)?;
        let scripts = ScriptTag::from_html(&html);
        println!("{}", format!("[*] {} script tags found in {}", scripts.len(), path.display()).cyan());
        view.get_or_insert_with(RuntimeView::default).scripts.extend(scripts);
    }
    Ok(view)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Location the bundle was served from: base URL joined with the file name
fn script_url(base: &str, path: &Path) -> String {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("bundle.js");
    bundlerecon::url_helper::resolve_or_raw(base, name)
}

// ═══════════════════════════════════════════════════════════════════════════
// DISPLAY
// ═══════════════════════════════════════════════════════════════════════════

fn print_banner() {
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", format!("  bundlerecon v{} - Webpack Bundle Recon", env!("CARGO_PKG_VERSION")).white().bold());
    println!("{}", "  Module Maps | Source Maps | Hidden Secrets".white());
    println!("{}", "═══════════════════════════════════════════════════════════════\n".cyan().bold());
}

fn section(title: &str) {
    println!("\n{}", "═══════════════════════════════════════════════════════════════".yellow().bold());
    println!("{}", title.yellow().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".yellow().bold());
}

fn display_runtime_report(report: &RuntimeReport<'_>) {
    section("🧭 RUNTIME SNAPSHOT");
    let detection = &report.detection;
    if !detection.detected {
        println!("{}", "[*] No webpack runtime detected".white());
        if let Some(diagnostic) = &detection.diagnostic {
            println!("{}", format!("    {}", diagnostic).bright_black());
        }
        return;
    }

    println!(
        "{}",
        format!("[+] Webpack {} detected ({:?} build)", detection.version.as_str(), detection.build_mode).green().bold()
    );
    println!("{}", format!("    Modules: {}", report.modules.len()).white());
    println!(
        "{}",
        format!("    Async chunk loading: {}", if report.chunk_loading.has_async_loading { "yes" } else { "no" }).white()
    );
    if !report.public_path.is_empty() {
        println!("{}", format!("    Public path: {}", report.public_path).white());
    }
    for diagnostic in &report.module_diagnostics {
        println!("{}", format!("[!] {}", diagnostic).yellow());
    }
}

fn display_source_map_report(report: &SourceMapReport) {
    section(&format!("🗺️  SOURCE MAP: {}", report.map_url));
    println!(
        "{}",
        format!(
            "[+] {} sources ({})",
            report.source_count,
            if report.has_embedded_content { "content embedded" } else { "paths only" }
        )
        .green()
    );
    for source in report.sources.iter().take(20) {
        println!("    {}", source.white());
    }
    if report.sources.len() > 20 {
        println!("{}", format!("    ... and {} more", report.sources.len() - 20).bright_black());
    }
    for path in &report.sensitive_paths {
        println!("{}", format!("[!] Sensitive path: {}", path).red());
    }
    for found in &report.findings {
        println!(
            "{}",
            format!(
                "[!] {} in {}: {}",
                found.finding.category.label(),
                found.source,
                create_safe_preview(&found.finding.value)
            )
            .red()
            .bold()
        );
    }
}

fn display_bundle_report(report: &BundleReport, decoder: &SourceMapDecoder) {
    section(&format!("📦 BUNDLE: {}", report.url));
    if let Some(id) = &report.chunk_id {
        println!("{}", format!("[*] Lazy chunk {}", id).cyan());
    }

    let detection = &report.detection;
    if detection.detected {
        println!(
            "{}",
            format!("[+] Webpack {} ({:?} build)", detection.version.as_str(), detection.build_mode).green().bold()
        );
    } else {
        println!("{}", "[*] No webpack signature".white());
    }

    println!("{}", format!("[*] Modules: {}", report.modules.len()).cyan());
    let config_like = report.modules.values().filter(|m| m.is_config_like).count();
    if config_like > 0 {
        println!("{}", format!("[!] Config-like modules: {}", config_like).yellow());
    }

    if let Some(template) = &report.chunk_loading.naming_template {
        println!("{}", format!("[*] Chunk template: {}", template).cyan());
    }
    for url in report.chunk_urls.iter().take(10) {
        println!("    {}", url.white());
    }
    if report.chunk_urls.len() > 10 {
        println!("{}", format!("    ... and {} more chunk URLs", report.chunk_urls.len() - 10).bright_black());
    }

    if !report.env_references.is_empty() {
        let names: Vec<&str> = report.env_references.iter().map(|e| e.name.as_str()).collect();
        println!("{}", format!("[*] Env references: {}", names.join(", ")).cyan());
    }
    if !report.dynamic_imports.is_empty() {
        println!("{}", format!("[*] Dynamic imports: {}", report.dynamic_imports.len()).cyan());
    }

    match (&report.source_map_url, &report.source_map) {
        (_, Some(map)) => display_source_map_report(map),
        (Some(url), None) => println!("{}", format!("[*] Source map reference: {}", url).cyan()),
        (None, None) => println!(
            "{}",
            format!("[*] No sourceMappingURL; conventional location: {}", decoder.guess_map_url(&report.url)).bright_black()
        ),
    }

    if !report.reconstructed.is_empty() {
        println!("{}", format!("[!] Reconstructed strings: {}", report.reconstructed.len()).yellow().bold());
        for found in &report.reconstructed {
            println!(
                "    {:?} @ {}: {}",
                found.technique,
                found.offset,
                create_safe_preview(&found.value).yellow()
            );
        }
    }

    if report.sensitive.is_empty() {
        println!("{}", "[*] No sensitive values".white());
    } else {
        println!("{}", format!("[!] Sensitive values: {}", report.sensitive.len()).red().bold());
        for finding in &report.sensitive {
            println!(
                "    [{}] {} @ {}",
                finding.category.label().red(),
                create_safe_preview(&finding.value),
                finding.offset
            );
            println!("        {}", finding.surrounding_context.bright_black());
        }
    }

    if !report.debug_markers.is_empty() {
        println!("{}", format!("[*] Debug markers: {}", report.debug_markers.len()).cyan());
        for marker in report.debug_markers.iter().take(15) {
            println!("    {} {}", marker.marker.label().magenta(), marker.text);
        }
    }
}

fn print_totals(bundles: &[BundleReport], source_maps: &[SourceMapReport]) {
    let modules: usize = bundles.iter().map(|b| b.modules.len()).sum();
    let sensitive: usize =
        bundles.iter().map(BundleReport::total_sensitive).sum::<usize>() + source_maps.iter().map(|m| m.findings.len()).sum::<usize>();

    section("📊 SUMMARY");
    println!("{}", format!("  Bundles analyzed: {}", bundles.len()).white());
    println!("{}", format!("  Source maps decoded: {}", source_maps.len()).white());
    println!("{}", format!("  Modules recovered: {}", modules).white());
    if sensitive > 0 {
        println!("{}", format!("  Sensitive values: {}", sensitive).red().bold());
    } else {
        println!("{}", "  Sensitive values: 0".green());
    }
}
