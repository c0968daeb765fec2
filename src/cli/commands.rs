use clap::{Parser, Subcommand, ValueEnum};

use crate::memory::{parse_parameter_count, Quantization};
use crate::provider::ExecutionProvider;

/// Resource-aware runtime and model cache for local inference
#[derive(Parser, Debug)]
#[command(
    name = "modelyard",
    about = "Resource-aware runtime and model cache for local inference",
    version,
    long_about = "modelyard detects local compute (GPU vendor, driver, memory), resolves the \
                  best execution provider, keeps runtime binaries in a size-bounded cache fed \
                  from a hosted manifest, and budgets model loads against available memory."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Verbose output (debug logging)")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Show detected platform, GPUs, and memory",
        long_about = "Probes the host for OS, architecture, GPU vendor, driver version, and \
                      memory, then shows which execution providers are usable.\n\n\
                      Examples:\n  \
                      modelyard detect\n  \
                      modelyard detect --format json"
    )]
    Detect(DetectArgs),

    #[command(
        about = "Show the runtime manifest",
        long_about = "Fetches the runtime manifest (honoring the freshness window) and lists \
                      published packages, versions, and binaries.\n\n\
                      Examples:\n  \
                      modelyard manifest\n  \
                      modelyard manifest --refresh\n  \
                      modelyard manifest --package onnxruntime --format json"
    )]
    Manifest(ManifestArgs),

    #[command(
        about = "Download a runtime binary into the cache",
        long_about = "Resolves the execution provider for this host, downloads the matching \
                      binary and its dependencies, verifies checksums, and registers the \
                      result in the cache.\n\n\
                      Examples:\n  \
                      modelyard pull onnxruntime\n  \
                      modelyard pull onnxruntime --version 1.17.3\n  \
                      modelyard pull onnxruntime --provider cpu"
    )]
    Pull(PullArgs),

    #[command(subcommand, about = "Inspect and manage the binary cache")]
    Cache(CacheCommands),

    #[command(
        about = "Estimate memory for a model shape",
        long_about = "Computes weight, KV cache, and overhead bytes for a model shape and \
                      checks the total against detected memory.\n\n\
                      Examples:\n  \
                      modelyard estimate 3.8b\n  \
                      modelyard estimate 7b --quant int8 --context 8192\n  \
                      modelyard estimate 3.8b --layers 32 --hidden 3072 --format json"
    )]
    Estimate(EstimateArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct DetectArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ManifestArgs {
    #[arg(
        short = 'p',
        long,
        value_name = "NAME",
        help = "Show a single package instead of the whole manifest"
    )]
    pub package: Option<String>,

    #[arg(long, help = "Bypass the freshness window and revalidate now")]
    pub refresh: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct PullArgs {
    #[arg(value_name = "PACKAGE", help = "Package name, e.g. onnxruntime")]
    pub package: String,

    #[arg(
        long,
        value_name = "VERSION",
        help = "Exact version (defaults to the newest published)"
    )]
    pub version: Option<String>,

    #[arg(
        short = 'p',
        long,
        value_enum,
        help = "Force an execution provider (defaults to the resolved one)"
    )]
    pub provider: Option<ProviderArg>,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    #[command(about = "List cached binaries")]
    List(CacheListArgs),

    #[command(about = "Show cache occupancy and budget")]
    Stats(CacheStatsArgs),

    #[command(about = "Remove one cached binary")]
    Remove(CacheRemoveArgs),

    #[command(about = "Delete every cached binary")]
    Clear,
}

#[derive(Parser, Debug, Clone)]
pub struct CacheListArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct CacheStatsArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct CacheRemoveArgs {
    #[arg(value_name = "PACKAGE", help = "Package name")]
    pub package: String,

    #[arg(value_name = "VERSION", help = "Exact version")]
    pub version: String,

    #[arg(
        short = 'p',
        long,
        value_enum,
        help = "Provider variant to remove (defaults to the resolved one)"
    )]
    pub provider: Option<ProviderArg>,
}

#[derive(Parser, Debug, Clone)]
pub struct EstimateArgs {
    #[arg(
        value_name = "PARAMS",
        value_parser = parse_parameter_count,
        help = "Parameter count, e.g. 3.8b, 125m, or a raw number"
    )]
    pub parameters: u64,

    #[arg(long, value_enum, default_value = "int4", help = "Weight quantization")]
    pub quant: QuantArg,

    #[arg(
        long,
        value_name = "TOKENS",
        default_value = "4096",
        help = "Context length"
    )]
    pub context: u64,

    #[arg(long, default_value = "32", help = "Transformer layer count")]
    pub layers: u64,

    #[arg(long, default_value = "3072", help = "Hidden dimension")]
    pub hidden: u64,

    #[arg(long, default_value = "1", help = "Batch size")]
    pub batch: u64,

    #[arg(
        long,
        value_enum,
        default_value = "fp16",
        help = "KV cache quantization"
    )]
    pub kv_quant: QuantArg,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderArg {
    Auto,
    Cuda,
    Directml,
    Coreml,
    Cpu,
}

impl From<ProviderArg> for ExecutionProvider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Auto => ExecutionProvider::Auto,
            ProviderArg::Cuda => ExecutionProvider::Cuda,
            ProviderArg::Directml => ExecutionProvider::DirectML,
            ProviderArg::Coreml => ExecutionProvider::CoreML,
            ProviderArg::Cpu => ExecutionProvider::Cpu,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantArg {
    Fp32,
    Fp16,
    Int8,
    Int4,
}

impl From<QuantArg> for Quantization {
    fn from(arg: QuantArg) -> Self {
        match arg {
            QuantArg::Fp32 => Quantization::Fp32,
            QuantArg::Fp16 => Quantization::Fp16,
            QuantArg::Int8 => Quantization::Int8,
            QuantArg::Int4 => Quantization::Int4,
        }
    }
}
