//! Batch translation pipeline.
//!
//! Produces a fluent rendering and a literal, segment-aligned rendering for
//! every text unit of a document:
//!
//! 1. Select units missing either form, after the job's checkpoint.
//! 2. Interleave them into waves ([`waves`]); each wave finishes before the
//!    next starts, so later waves see earlier translations as context.
//! 3. Pack units needing both forms into token-budgeted batches
//!    ([`batching`]); units missing one form take a single-form path.
//! 4. Parse the structured response ([`parse`]), check segment integrity
//!    ([`integrity`]), and fall back to per-unit calls for anything missing
//!    or invalid.
//! 5. Checkpoint after every batch.

pub mod batching;
pub mod integrity;
pub mod parse;
mod pipeline;
pub mod pool;
pub mod prompts;
pub mod waves;

use std::time::Duration;

use interlinear_core::{
    content_hash, defaults, CacheKey, GenerationOptions, TextUnit, TranslationParams,
};

pub use pipeline::{TranslationHandler, TranslationSummary};

/// Tuning for the translation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationConfig {
    /// Distance between units of the same wave.
    pub wave_stride: usize,
    /// Estimated source tokens allowed per batch request.
    pub token_budget: usize,
    /// Batch and single-unit requests in flight at once within one job.
    pub unit_concurrency: usize,
    /// Deadline for every individual generation call.
    pub call_timeout: Duration,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            wave_stride: defaults::TRANSLATION_WAVE_STRIDE,
            token_budget: defaults::TRANSLATION_TOKEN_BUDGET,
            unit_concurrency: defaults::TRANSLATION_UNIT_CONCURRENCY,
            call_timeout: Duration::from_secs(defaults::TRANSLATION_CALL_TIMEOUT_SECS),
            temperature: defaults::TRANSLATION_TEMPERATURE,
            max_output_tokens: defaults::TRANSLATION_MAX_OUTPUT_TOKENS,
        }
    }
}

impl TranslationConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TRANSLATION_WAVE_STRIDE` | `10` | Units between members of one wave |
    /// | `TRANSLATION_TOKEN_BUDGET` | `4000` | Estimated source tokens per batch |
    /// | `TRANSLATION_UNIT_CONCURRENCY` | `3` | Concurrent requests per job |
    /// | `TRANSLATION_CALL_TIMEOUT_SECS` | `120` | Per-call deadline |
    /// | `TRANSLATION_TEMPERATURE` | `0.3` | Sampling temperature |
    /// | `TRANSLATION_MAX_OUTPUT_TOKENS` | `8192` | Output cap per call |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let wave_stride = std::env::var("TRANSLATION_WAVE_STRIDE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.wave_stride)
            .max(1);

        let token_budget = std::env::var("TRANSLATION_TOKEN_BUDGET")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.token_budget)
            .max(1);

        let unit_concurrency = std::env::var("TRANSLATION_UNIT_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.unit_concurrency)
            .max(1);

        let call_timeout = std::env::var("TRANSLATION_CALL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.call_timeout);

        let temperature = std::env::var("TRANSLATION_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(defaults.temperature);

        let max_output_tokens = std::env::var("TRANSLATION_MAX_OUTPUT_TOKENS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.max_output_tokens);

        Self {
            wave_stride,
            token_budget,
            unit_concurrency,
            call_timeout,
            temperature,
            max_output_tokens,
        }
    }

    pub fn with_wave_stride(mut self, stride: usize) -> Self {
        self.wave_stride = stride.max(1);
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = budget.max(1);
        self
    }

    pub fn with_unit_concurrency(mut self, concurrency: usize) -> Self {
        self.unit_concurrency = concurrency.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }

    /// Apply per-job overrides.
    pub fn for_params(&self, params: &TranslationParams) -> Self {
        let mut config = self.clone();
        if let Some(stride) = params.wave_stride {
            config.wave_stride = stride.max(1);
        }
        if let Some(budget) = params.token_budget {
            config.token_budget = budget.max(1);
        }
        config
    }
}

/// Cache key for one derived form of one unit.
///
/// The source text hash makes any edit to the unit a cache miss.
pub fn cache_key(params: &TranslationParams, unit: &TextUnit, operation_kind: &str) -> CacheKey {
    CacheKey {
        target_id: unit.parent_id,
        sub_unit_id: Some(unit.id),
        operation_kind: operation_kind.to_string(),
        source_lang: Some(params.source_lang.clone()),
        target_lang: Some(params.target_lang.clone()),
        variant: params.variant.clone(),
        content_hash: content_hash(&unit.source_text),
    }
}
