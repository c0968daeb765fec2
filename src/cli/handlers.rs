//! Command handlers
//!
//! Each handler returns a process exit code. Errors are logged and printed
//! to stderr in one place so every command fails the same way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, error};

use crate::cache::CacheKey;
use crate::cli::commands::{
    CacheCommands, DetectArgs, EstimateArgs, ManifestArgs, PullArgs,
};
use crate::cli::output::{DetectionReport, EstimateReport, OutputFormatter};
use crate::config::YardConfig;
use crate::detect::SystemDetector;
use crate::memory::{self, ModelMemoryConfig, DEFAULT_SAFETY_MARGIN};
use crate::provider::{ExecutionProvider, ProviderResolver};
use crate::runtime::ModelRuntime;
use crate::transfer::{NoOpProgress, ProgressHandler, TransferEvent};
use crate::util::CancelToken;

/// Handles the detect command
pub async fn handle_detect(args: &DetectArgs) -> i32 {
    match detect(args) {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => report_error(&err),
    }
}

/// Handles the manifest command
pub async fn handle_manifest(args: &ManifestArgs) -> i32 {
    match manifest(args).await {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => report_error(&err),
    }
}

/// Handles the pull command
pub async fn handle_pull(args: &PullArgs, quiet: bool) -> i32 {
    match pull(args, quiet).await {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => report_error(&err),
    }
}

/// Handles the cache subcommands
pub async fn handle_cache(command: &CacheCommands) -> i32 {
    match cache(command).await {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => report_error(&err),
    }
}

/// Handles the estimate command
pub async fn handle_estimate(args: &EstimateArgs) -> i32 {
    match estimate(args) {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => report_error(&err),
    }
}

fn report_error(err: &anyhow::Error) -> i32 {
    error!("{err:#}");
    eprintln!("Error: {err:#}");
    1
}

fn detect(args: &DetectArgs) -> anyhow::Result<String> {
    let config = YardConfig::default();
    let detector = Arc::new(SystemDetector::new());
    let resolver = ProviderResolver::new(Arc::clone(&detector));

    let report = DetectionReport {
        platform: detector.platform(),
        memory: detector.memory(),
        gpus: detector.all_gpus().as_ref().clone(),
        available_providers: resolver.available(),
        resolved_provider: resolver.resolve(config.preferred_provider),
    };

    OutputFormatter::new(args.format.into()).format_detection(&report)
}

async fn manifest(args: &ManifestArgs) -> anyhow::Result<String> {
    let runtime = ModelRuntime::new(YardConfig::default()).await?;
    let cancel = cancel_on_ctrl_c();

    let manifest = if args.refresh {
        runtime.refresh_manifest(&cancel).await?
    } else {
        runtime.manifest().get(&cancel).await?
    };

    OutputFormatter::new(args.format.into()).format_manifest(&manifest, args.package.as_deref())
}

async fn pull(args: &PullArgs, quiet: bool) -> anyhow::Result<String> {
    let mut config = YardConfig::default();
    if let Some(provider) = args.provider {
        config.preferred_provider = provider.into();
    }
    let runtime = ModelRuntime::new(config).await?;
    let cancel = cancel_on_ctrl_c();

    let progress: Box<dyn ProgressHandler> = if quiet {
        Box::new(NoOpProgress)
    } else {
        Box::new(BarProgress::new())
    };

    let path = runtime
        .ensure_binary(&args.package, args.version.as_deref(), progress.as_ref(), &cancel)
        .await?;
    Ok(path.display().to_string())
}

async fn cache(command: &CacheCommands) -> anyhow::Result<String> {
    let runtime = ModelRuntime::new(YardConfig::default()).await?;

    match command {
        CacheCommands::List(args) => {
            let entries = runtime.cache().entries().await;
            OutputFormatter::new(args.format.into()).format_cache_entries(&entries)
        }
        CacheCommands::Stats(args) => {
            let stats = runtime.cache().stats().await;
            OutputFormatter::new(args.format.into()).format_cache_stats(&stats)
        }
        CacheCommands::Remove(args) => {
            let rid = runtime.detector().platform().rid;
            let provider = args
                .provider
                .map(ExecutionProvider::from)
                .unwrap_or_else(|| runtime.resolve_provider());
            let key = CacheKey::new(&args.package, &args.version, &rid, provider.as_str());
            if runtime.cache().remove(&key).await? {
                Ok(format!("Removed {key}"))
            } else {
                Ok(format!("Nothing cached for {key}"))
            }
        }
        CacheCommands::Clear => {
            runtime.cache().clear().await?;
            Ok("Cache cleared".to_string())
        }
    }
}

fn estimate(args: &EstimateArgs) -> anyhow::Result<String> {
    let config = ModelMemoryConfig::new(
        args.parameters,
        args.quant.into(),
        args.context,
        args.layers,
        args.hidden,
    )
    .with_batch_size(args.batch)
    .with_kv_cache_quantization(args.kv_quant.into());
    let usage = memory::estimate(&config);

    let detector = SystemDetector::new();
    let host_memory = detector.memory();
    let gpu_total = detector.primary_gpu().total_memory_bytes;

    let report = EstimateReport {
        fits_system: memory::can_fit(&usage, host_memory.available_bytes, DEFAULT_SAFETY_MARGIN),
        fits_gpu: gpu_total
            .map(|total| memory::can_fit(&usage, total, DEFAULT_SAFETY_MARGIN)),
        system_available_bytes: host_memory.available_bytes,
        gpu_total_bytes: gpu_total,
        config,
        estimate: usage,
    };

    OutputFormatter::new(args.format.into()).format_estimate(&report)
}

/// A token that fires on the first Ctrl-C, letting transfers stop at the
/// next chunk boundary instead of dying mid-write
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

/// Renders one indicatif bar per file being transferred
struct BarProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BarProgress {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn sized_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<36} [{bar:25}] {bytes:>10} / {total_bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }

    fn unsized_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<36} {spinner} {bytes:>10}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

impl ProgressHandler for BarProgress {
    fn on_event(&self, event: TransferEvent) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            TransferEvent::Started {
                file_name,
                total_bytes,
            } => {
                let bar = match total_bytes {
                    Some(total) => {
                        let bar = ProgressBar::new(total);
                        bar.set_style(Self::sized_style());
                        bar
                    }
                    None => {
                        let bar = ProgressBar::new_spinner();
                        bar.set_style(Self::unsized_style());
                        bar
                    }
                };
                bar.set_message(file_name.clone());
                bars.insert(file_name, self.multi.add(bar));
            }
            TransferEvent::Advanced {
                file_name,
                transferred_bytes,
                ..
            } => {
                if let Some(bar) = bars.get(&file_name) {
                    bar.set_position(transferred_bytes);
                }
            }
            TransferEvent::Finished {
                file_name,
                transferred_bytes,
            } => {
                if let Some(bar) = bars.remove(&file_name) {
                    bar.set_position(transferred_bytes);
                    bar.finish();
                }
            }
        }
    }
}
