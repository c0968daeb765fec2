//! Model memory estimation
//!
//! Pure arithmetic over model shape: weight bytes from parameter count and
//! quantization, KV cache bytes from context geometry, plus a fixed 10%
//! allocator overhead. No probing, no I/O; callers combine the estimate with
//! detected memory via [`can_fit`].
//!
//! # Example
//!
//! ```
//! use modelyard::memory::{estimate, ModelMemoryConfig, Quantization};
//!
//! let config = ModelMemoryConfig::new(3_800_000_000, Quantization::Int4, 4096, 32, 3072);
//! let usage = estimate(&config);
//! assert_eq!(usage.model_bytes, 1_900_000_000);
//! assert_eq!(usage.total_bytes, 3_861_674_009);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fraction of model + KV bytes added for allocator and framework overhead
pub const OVERHEAD_RATIO: f64 = 0.10;

/// Default headroom applied when checking an estimate against a budget
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.20;

/// Weight storage format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    Fp32,
    Fp16,
    Int8,
    Int4,
}

impl Quantization {
    /// Bytes per stored parameter
    pub fn bytes_per_param(&self) -> f64 {
        match self {
            Self::Fp32 => 4.0,
            Self::Fp16 => 2.0,
            Self::Int8 => 1.0,
            Self::Int4 => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fp32 => "fp32",
            Self::Fp16 => "fp16",
            Self::Int8 => "int8",
            Self::Int4 => "int4",
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quantization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fp32" | "f32" => Ok(Self::Fp32),
            "fp16" | "f16" => Ok(Self::Fp16),
            "int8" | "q8" => Ok(Self::Int8),
            "int4" | "q4" => Ok(Self::Int4),
            other => Err(format!(
                "unknown quantization '{other}' (expected fp32, fp16, int8, or int4)"
            )),
        }
    }
}

/// Shape of a model for estimation purposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMemoryConfig {
    pub parameter_count: u64,
    pub quantization: Quantization,
    pub context_length: u64,
    pub batch_size: u64,
    pub layer_count: u64,
    pub hidden_size: u64,
    /// KV cache entries may be stored narrower than the weights
    pub kv_cache_quantization: Quantization,
}

impl ModelMemoryConfig {
    /// Batch size defaults to 1 and the KV cache to fp16
    pub fn new(
        parameter_count: u64,
        quantization: Quantization,
        context_length: u64,
        layer_count: u64,
        hidden_size: u64,
    ) -> Self {
        Self {
            parameter_count,
            quantization,
            context_length,
            batch_size: 1,
            layer_count,
            hidden_size,
            kv_cache_quantization: Quantization::Fp16,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_kv_cache_quantization(mut self, quantization: Quantization) -> Self {
        self.kv_cache_quantization = quantization;
        self
    }
}

/// Estimated bytes for one loaded model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryEstimate {
    pub model_bytes: u64,
    pub kv_cache_bytes: u64,
    pub overhead_bytes: u64,
    pub total_bytes: u64,
}

/// Estimates memory for a model of the given shape
///
/// Weights are `parameters * bytes_per_param`. The KV cache holds a key and
/// a value per token per layer: `batch * context * 2 * layers * hidden`
/// entries at the KV storage width. Overhead is [`OVERHEAD_RATIO`] of both.
pub fn estimate(config: &ModelMemoryConfig) -> MemoryEstimate {
    let model_bytes =
        (config.parameter_count as f64 * config.quantization.bytes_per_param()) as u64;

    let kv_entries = config.batch_size
        * config.context_length
        * 2
        * config.layer_count
        * config.hidden_size;
    let kv_cache_bytes =
        (kv_entries as f64 * config.kv_cache_quantization.bytes_per_param()) as u64;

    let overhead_bytes = ((model_bytes + kv_cache_bytes) as f64 * OVERHEAD_RATIO) as u64;

    MemoryEstimate {
        model_bytes,
        kv_cache_bytes,
        overhead_bytes,
        total_bytes: model_bytes + kv_cache_bytes + overhead_bytes,
    }
}

/// Bytes to reserve for an estimate under a safety margin
pub fn required_with_margin(total_bytes: u64, safety_margin: f64) -> u64 {
    (total_bytes as f64 * (1.0 + safety_margin)) as u64
}

/// Whether an estimate fits in `available_bytes` with headroom to spare
pub fn can_fit(estimate: &MemoryEstimate, available_bytes: u64, safety_margin: f64) -> bool {
    required_with_margin(estimate.total_bytes, safety_margin) <= available_bytes
}

/// Parses human parameter counts: `3.8b`, `125M`, `500k`, or a raw number
pub fn parse_parameter_count(raw: &str) -> Result<u64, String> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return Err("empty parameter count".to_string());
    }
    let (number, multiplier) = if let Some(n) = lowered.strip_suffix('b') {
        (n, 1_000_000_000.0)
    } else if let Some(n) = lowered.strip_suffix('m') {
        (n, 1_000_000.0)
    } else if let Some(n) = lowered.strip_suffix('k') {
        (n, 1_000.0)
    } else {
        (lowered.as_str(), 1.0)
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid parameter count '{raw}'"))?;
    if value <= 0.0 {
        return Err(format!("parameter count must be positive, got '{raw}'"));
    }
    Ok((value * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[test]
    fn test_phi_class_model_int4() {
        let config = ModelMemoryConfig::new(3_800_000_000, Quantization::Int4, 4096, 32, 3072);
        let usage = estimate(&config);
        assert_eq!(usage.model_bytes, 1_900_000_000);
        assert_eq!(usage.kv_cache_bytes, 1_610_612_736);
        assert_eq!(usage.overhead_bytes, 351_061_273);
        assert_eq!(usage.total_bytes, 3_861_674_009);
    }

    #[parameterized(
        fp32 = { Quantization::Fp32, 4_000 },
        fp16 = { Quantization::Fp16, 2_000 },
        int8 = { Quantization::Int8, 1_000 },
        int4 = { Quantization::Int4, 500 },
    )]
    fn test_bytes_per_param(quant: Quantization, expected_model_bytes: u64) {
        let config = ModelMemoryConfig::new(1_000, quant, 0, 0, 0);
        assert_eq!(estimate(&config).model_bytes, expected_model_bytes);
    }

    #[test]
    fn test_kv_cache_scales_with_batch() {
        let base = ModelMemoryConfig::new(0, Quantization::Fp16, 2048, 16, 1024);
        let doubled = base.clone().with_batch_size(2);
        assert_eq!(
            estimate(&doubled).kv_cache_bytes,
            estimate(&base).kv_cache_bytes * 2
        );
    }

    #[test]
    fn test_kv_cache_quantization_narrows_cache() {
        let fp16 = ModelMemoryConfig::new(0, Quantization::Fp16, 2048, 16, 1024);
        let int8 = fp16
            .clone()
            .with_kv_cache_quantization(Quantization::Int8);
        assert_eq!(
            estimate(&int8).kv_cache_bytes * 2,
            estimate(&fp16).kv_cache_bytes
        );
    }

    #[test]
    fn test_overhead_is_ten_percent() {
        let config = ModelMemoryConfig::new(1_000_000, Quantization::Fp32, 0, 0, 0);
        let usage = estimate(&config);
        assert_eq!(usage.model_bytes, 4_000_000);
        assert_eq!(usage.overhead_bytes, 400_000);
        assert_eq!(usage.total_bytes, 4_400_000);
    }

    #[test]
    fn test_can_fit_boundary() {
        let config = ModelMemoryConfig::new(1_000_000, Quantization::Fp16, 0, 0, 0);
        let usage = estimate(&config);
        assert_eq!(usage.total_bytes, 2_200_000);
        // 50% margin is exact in binary: required is 3,300,000.
        assert!(can_fit(&usage, 3_300_000, 0.5));
        assert!(!can_fit(&usage, 3_299_999, 0.5));
    }

    #[test]
    fn test_can_fit_default_margin() {
        let config = ModelMemoryConfig::new(3_800_000_000, Quantization::Int4, 4096, 32, 3072);
        let usage = estimate(&config);
        assert!(can_fit(&usage, 8 * 1024 * 1024 * 1024, DEFAULT_SAFETY_MARGIN));
        assert!(!can_fit(&usage, 4 * 1024 * 1024 * 1024, DEFAULT_SAFETY_MARGIN));
    }

    #[test]
    fn test_zero_margin_is_exact_total() {
        let config = ModelMemoryConfig::new(1_000, Quantization::Int8, 0, 0, 0);
        let usage = estimate(&config);
        assert!(can_fit(&usage, usage.total_bytes, 0.0));
        assert!(!can_fit(&usage, usage.total_bytes - 1, 0.0));
    }

    #[parameterized(
        billions = { "3.8b", 3_800_000_000 },
        uppercase = { "7B", 7_000_000_000 },
        millions = { "125M", 125_000_000 },
        thousands = { "500k", 500_000 },
        raw = { "1000000", 1_000_000 },
        padded = { " 1.5b ", 1_500_000_000 },
    )]
    fn test_parse_parameter_count(input: &str, expected: u64) {
        assert_eq!(parse_parameter_count(input).unwrap(), expected);
    }

    #[parameterized(
        empty = { "" },
        garbage = { "lots" },
        negative = { "-3b" },
        zero = { "0" },
    )]
    fn test_parse_parameter_count_rejects(input: &str) {
        assert!(parse_parameter_count(input).is_err());
    }

    #[test]
    fn test_quantization_from_str_aliases() {
        assert_eq!("Q4".parse::<Quantization>().unwrap(), Quantization::Int4);
        assert_eq!("f16".parse::<Quantization>().unwrap(), Quantization::Fp16);
        assert!("fp8".parse::<Quantization>().is_err());
    }
}
