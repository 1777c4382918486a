//! Best-effort cost estimates from published per-token rates

use super::types::TokenUsage;
use serde::{Deserialize, Serialize};

/// USD per million tokens for each of the four usage counters.
///
/// Defaults are Opus list prices. This is an estimate, not a billing lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default = "default_input")]
    pub input_per_mtok: f64,
    #[serde(default = "default_output")]
    pub output_per_mtok: f64,
    #[serde(default = "default_cache_read")]
    pub cache_read_per_mtok: f64,
    #[serde(default = "default_cache_write")]
    pub cache_write_per_mtok: f64,
}

fn default_input() -> f64 {
    15.0
}

fn default_output() -> f64 {
    75.0
}

fn default_cache_read() -> f64 {
    1.5
}

fn default_cache_write() -> f64 {
    18.75
}

impl Default for Pricing {
    fn default() -> Self {
        Pricing {
            input_per_mtok: default_input(),
            output_per_mtok: default_output(),
            cache_read_per_mtok: default_cache_read(),
            cache_write_per_mtok: default_cache_write(),
        }
    }
}

impl Pricing {
    /// Estimated USD cost of the given token totals
    pub fn estimate(&self, usage: &TokenUsage) -> f64 {
        const PER_MTOK: f64 = 1_000_000.0;
        usage.input as f64 * self.input_per_mtok / PER_MTOK
            + usage.output as f64 * self.output_per_mtok / PER_MTOK
            + usage.cache_read as f64 * self.cache_read_per_mtok / PER_MTOK
            + usage.cache_write as f64 * self.cache_write_per_mtok / PER_MTOK
    }
}
