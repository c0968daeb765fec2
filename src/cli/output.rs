//! Output formatting for CLI commands.
//!
//! Every command gets a machine-readable JSON rendering and a human one.
//! JSON always carries the full payload for scripting; the human format
//! favors compact summaries.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cache::{CacheEntry, CacheStats};
use crate::detect::{GpuInfo, PlatformInfo, SystemMemory};
use crate::manifest::RuntimeManifest;
use crate::memory::{MemoryEstimate, ModelMemoryConfig};
use crate::provider::ExecutionProvider;
use crate::util::format_bytes;

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// Human-readable formatted text
    Human,
}

/// Everything `modelyard detect` reports about the host.
#[derive(Debug, Serialize)]
pub struct DetectionReport {
    pub platform: PlatformInfo,
    pub memory: SystemMemory,
    pub gpus: Vec<GpuInfo>,
    pub available_providers: Vec<ExecutionProvider>,
    pub resolved_provider: ExecutionProvider,
}

/// Memory estimate together with fit checks against the detected host.
#[derive(Debug, Serialize)]
pub struct EstimateReport {
    pub config: ModelMemoryConfig,
    pub estimate: MemoryEstimate,
    pub system_available_bytes: u64,
    pub fits_system: bool,
    pub gpu_total_bytes: Option<u64>,
    pub fits_gpu: Option<bool>,
}

/// Output formatter for command results
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    /// Creates a new output formatter with the specified format
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the host detection report
    pub fn format_detection(&self, report: &DetectionReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .context("Failed to serialize detection report to JSON"),
            OutputFormat::Human => Ok(human_detection(report)),
        }
    }

    /// Formats the runtime manifest, optionally restricted to a single package
    pub fn format_manifest(
        &self,
        manifest: &RuntimeManifest,
        package: Option<&str>,
    ) -> Result<String> {
        if let Some(name) = package {
            let pkg = manifest
                .packages
                .get(name)
                .with_context(|| format!("Package '{name}' not found in manifest"))?;
            return match self.format {
                OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                    "version": manifest.version,
                    "updated": manifest.updated_at,
                    "packages": { name: pkg },
                }))
                .context("Failed to serialize manifest package to JSON"),
                OutputFormat::Human => Ok(human_manifest(manifest, Some(name))),
            };
        }

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(manifest)
                .context("Failed to serialize manifest to JSON"),
            OutputFormat::Human => Ok(human_manifest(manifest, None)),
        }
    }

    /// Formats the cached binary listing, most recently used first
    pub fn format_cache_entries(&self, entries: &[CacheEntry]) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(entries)
                .context("Failed to serialize cache entries to JSON"),
            OutputFormat::Human => Ok(human_cache_entries(entries)),
        }
    }

    /// Formats cache usage statistics
    pub fn format_cache_stats(&self, stats: &CacheStats) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(stats)
                .context("Failed to serialize cache stats to JSON"),
            OutputFormat::Human => Ok(human_cache_stats(stats)),
        }
    }

    /// Formats a model memory estimate report
    pub fn format_estimate(&self, report: &EstimateReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .context("Failed to serialize estimate report to JSON"),
            OutputFormat::Human => Ok(human_estimate(report)),
        }
    }
}

fn rule() -> String {
    "\u{2501}".repeat(42)
}

fn connector(index: usize, len: usize) -> &'static str {
    if index + 1 == len {
        "\u{2514}\u{2500}"
    } else {
        "\u{251C}\u{2500}"
    }
}

fn fit_marker(fits: bool) -> &'static str {
    if fits {
        "\u{2713}"
    } else {
        "\u{2717}"
    }
}

fn human_detection(report: &DetectionReport) -> String {
    let mut output = String::new();

    output.push_str("System Detection\n");
    output.push_str(&rule());
    output.push_str("\n\n");

    output.push_str(&format!(
        "Platform: {} ({}, {})\n",
        report.platform.rid, report.platform.os, report.platform.arch
    ));
    output.push_str(&format!(
        "Memory:   {} total, {} available\n\n",
        format_bytes(report.memory.total_bytes),
        format_bytes(report.memory.available_bytes)
    ));

    output.push_str("GPUs:\n");
    if report.gpus.is_empty() {
        output.push_str("  (none detected)\n");
    } else {
        for (i, gpu) in report.gpus.iter().enumerate() {
            output.push_str(&format!(
                "{} {} [{}]\n",
                connector(i, report.gpus.len()),
                gpu.device_name,
                gpu.vendor
            ));
            if let Some(total) = gpu.total_memory_bytes {
                output.push_str(&format!("     Memory: {}\n", format_bytes(total)));
            }
            if let Some(driver) = gpu.cuda_driver_version {
                output.push_str(&format!("     CUDA driver: {driver}\n"));
            }
            if let Some((major, minor)) = gpu.compute_capability {
                output.push_str(&format!("     Compute capability: {major}.{minor}\n"));
            }
        }
    }
    output.push('\n');

    output.push_str("Execution Providers:\n");
    for (i, provider) in report.available_providers.iter().enumerate() {
        let marker = if *provider == report.resolved_provider {
            "  \u{2713} resolved"
        } else {
            ""
        };
        output.push_str(&format!(
            "{} {provider}{marker}\n",
            connector(i, report.available_providers.len())
        ));
    }

    output
}

fn human_manifest(manifest: &RuntimeManifest, filter: Option<&str>) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Runtime Manifest (format {}, updated {})\n",
        manifest.version,
        manifest.updated_at.format("%Y-%m-%d")
    ));
    output.push_str(&rule());
    output.push_str("\n\n");

    let mut printed = 0usize;
    for (name, package) in &manifest.packages {
        if let Some(wanted) = filter {
            if name != wanted {
                continue;
            }
        }
        printed += 1;

        output.push_str(&format!("{name} - {}\n", package.description));
        for (version, published) in &package.versions {
            output.push_str(&format!(
                "  {version} (released {})\n",
                published.released_at.format("%Y-%m-%d")
            ));
            for (i, binary) in published.binaries.iter().enumerate() {
                output.push_str(&format!(
                    "    {} {}/{}  {}  {}\n",
                    connector(i, published.binaries.len()),
                    binary.rid,
                    binary.provider,
                    binary.file_name,
                    format_bytes(binary.size_bytes)
                ));
            }
        }
        output.push('\n');
    }

    if printed == 0 {
        output.push_str("(no packages)\n");
    }

    output
}

fn human_cache_entries(entries: &[CacheEntry]) -> String {
    let mut output = String::new();

    output.push_str("Cached Binaries\n");
    output.push_str(&rule());
    output.push_str("\n\n");

    if entries.is_empty() {
        output.push_str("(cache is empty)\n");
        return output;
    }

    for entry in entries {
        output.push_str(&format!(
            "{} {} ({}/{})\n",
            entry.package, entry.version, entry.rid, entry.provider
        ));
        output.push_str(&format!(
            "  \u{251C}\u{2500} File:      {}  {}\n",
            entry.file_name,
            format_bytes(entry.size_bytes)
        ));
        output.push_str(&format!(
            "  \u{251C}\u{2500} Cached:    {}\n",
            entry.cached_at.format("%Y-%m-%d %H:%M UTC")
        ));
        output.push_str(&format!(
            "  \u{2514}\u{2500} Last used: {}\n",
            entry.last_access.format("%Y-%m-%d %H:%M UTC")
        ));
    }

    output
}

fn human_cache_stats(stats: &CacheStats) -> String {
    let mut output = String::new();

    output.push_str("Cache Statistics\n");
    output.push_str(&rule());
    output.push_str("\n\n");

    let percent = if stats.max_bytes > 0 {
        (stats.total_bytes as f64 / stats.max_bytes as f64) * 100.0
    } else {
        0.0
    };

    output.push_str(&format!("Location: {}\n", stats.base_dir.display()));
    output.push_str(&format!("Entries:  {}\n", stats.entry_count));
    output.push_str(&format!(
        "Used:     {} of {} ({percent:.1}%)\n",
        format_bytes(stats.total_bytes),
        format_bytes(stats.max_bytes)
    ));

    output
}

fn human_estimate(report: &EstimateReport) -> String {
    let mut output = String::new();

    output.push_str("Memory Estimate\n");
    output.push_str(&rule());
    output.push_str("\n\n");

    let config = &report.config;
    output.push_str("Model:\n");
    output.push_str(&format!(
        "  \u{251C}\u{2500} Parameters: {} ({})\n",
        format_params(config.parameter_count),
        config.quantization
    ));
    output.push_str(&format!(
        "  \u{251C}\u{2500} Context:    {} tokens, batch {}\n",
        config.context_length, config.batch_size
    ));
    output.push_str(&format!(
        "  \u{2514}\u{2500} Geometry:   {} layers x {} hidden, {} kv cache\n\n",
        config.layer_count, config.hidden_size, config.kv_cache_quantization
    ));

    let estimate = &report.estimate;
    output.push_str("Estimated usage:\n");
    output.push_str(&format!(
        "  \u{251C}\u{2500} Weights:  {}\n",
        format_bytes(estimate.model_bytes)
    ));
    output.push_str(&format!(
        "  \u{251C}\u{2500} KV cache: {}\n",
        format_bytes(estimate.kv_cache_bytes)
    ));
    output.push_str(&format!(
        "  \u{251C}\u{2500} Overhead: {}\n",
        format_bytes(estimate.overhead_bytes)
    ));
    output.push_str(&format!(
        "  \u{2514}\u{2500} Total:    {}\n\n",
        format_bytes(estimate.total_bytes)
    ));

    output.push_str(&format!(
        "{} System memory ({} available)\n",
        fit_marker(report.fits_system),
        format_bytes(report.system_available_bytes)
    ));
    if let (Some(gpu_total), Some(fits)) = (report.gpu_total_bytes, report.fits_gpu) {
        output.push_str(&format!(
            "{} GPU memory ({} total)\n",
            fit_marker(fits),
            format_bytes(gpu_total)
        ));
    }

    output
}

fn format_params(count: u64) -> String {
    if count >= 1_000_000_000 {
        format!("{:.2}B", count as f64 / 1e9)
    } else if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1e6)
    } else {
        count.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{CpuArch, DriverVersion, GpuVendor, OsKind};
    use crate::memory::Quantization;

    fn sample_detection() -> DetectionReport {
        DetectionReport {
            platform: PlatformInfo {
                os: OsKind::Linux,
                arch: CpuArch::X64,
                rid: "linux-x64".to_string(),
            },
            memory: SystemMemory {
                total_bytes: 64 * 1024 * 1024 * 1024,
                available_bytes: 48 * 1024 * 1024 * 1024,
            },
            gpus: vec![GpuInfo {
                vendor: GpuVendor::Nvidia,
                device_name: "NVIDIA GeForce RTX 4090".to_string(),
                total_memory_bytes: Some(24 * 1024 * 1024 * 1024),
                compute_capability: Some((8, 9)),
                directml_supported: false,
                coreml_supported: false,
                cuda_driver_version: Some(DriverVersion {
                    major: 12,
                    minor: 4,
                }),
            }],
            available_providers: vec![ExecutionProvider::Cuda, ExecutionProvider::Cpu],
            resolved_provider: ExecutionProvider::Cuda,
        }
    }

    fn sample_estimate() -> EstimateReport {
        let config = ModelMemoryConfig::new(3_800_000_000, Quantization::Int4, 4096, 32, 3072);
        let estimate = crate::memory::estimate(&config);
        EstimateReport {
            config,
            estimate,
            system_available_bytes: 48 * 1024 * 1024 * 1024,
            fits_system: true,
            gpu_total_bytes: Some(24 * 1024 * 1024 * 1024),
            fits_gpu: Some(true),
        }
    }

    #[test]
    fn test_detection_json_is_valid() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_detection(&sample_detection()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["platform"]["rid"], "linux-x64");
        assert_eq!(parsed["resolved_provider"], "cuda");
    }

    #[test]
    fn test_detection_human_lists_gpus_and_providers() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_detection(&sample_detection()).unwrap();
        assert!(output.contains("Platform: linux-x64"));
        assert!(output.contains("NVIDIA GeForce RTX 4090"));
        assert!(output.contains("cuda  \u{2713} resolved"));
        assert!(output.contains("\u{2514}\u{2500} cpu"));
    }

    #[test]
    fn test_detection_human_without_gpus() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let mut report = sample_detection();
        report.gpus.clear();
        report.available_providers = vec![ExecutionProvider::Cpu];
        report.resolved_provider = ExecutionProvider::Cpu;
        let output = formatter.format_detection(&report).unwrap();
        assert!(output.contains("(none detected)"));
    }

    #[test]
    fn test_manifest_human_lists_packages() {
        let manifest = crate::manifest::provider::embedded_default();
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_manifest(&manifest, None).unwrap();
        assert!(output.contains("Runtime Manifest"));
        assert!(output.contains("onnxruntime"));
        assert!(output.contains("linux-x64/cpu"));
    }

    #[test]
    fn test_manifest_filter_unknown_package_errors() {
        let manifest = crate::manifest::provider::embedded_default();
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let err = formatter
            .format_manifest(&manifest, Some("no-such-package"))
            .unwrap_err();
        assert!(err.to_string().contains("no-such-package"));
    }

    #[test]
    fn test_manifest_json_filter_keeps_schema_fields() {
        let manifest = crate::manifest::provider::embedded_default();
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter
            .format_manifest(&manifest, Some("onnxruntime"))
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert!(parsed["packages"]["onnxruntime"].is_object());
        assert!(parsed["version"].is_string());
    }

    #[test]
    fn test_cache_entries_human_empty() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_cache_entries(&[]).unwrap();
        assert!(output.contains("(cache is empty)"));
    }

    #[test]
    fn test_estimate_human_shows_totals() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_estimate(&sample_estimate()).unwrap();
        assert!(output.contains("3.80B (int4)"));
        assert!(output.contains("Total:"));
        assert!(output.contains("\u{2713} System memory"));
        assert!(output.contains("\u{2713} GPU memory"));
    }

    #[test]
    fn test_estimate_json_carries_total() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let report = sample_estimate();
        let expected = report.estimate.total_bytes;
        let output = formatter.format_estimate(&report).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["estimate"]["total_bytes"].as_u64(), Some(expected));
    }
}
