//! Translation job handler and run orchestration.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use interlinear_core::{
    defaults, Error, GenerationBackend, GenerationOptions, IndexService, JobParams, JobRepository,
    JobType, LiteralRendering, NoOpIndex, Result, TextUnit, TextUnitRepository, TranslationParams,
    UnitNeed,
};

use super::batching::{pack_batches, Batch};
use super::integrity::verified_segments;
use super::parse::{
    parse_batch_response, parse_fluent_response, parse_literal_response, ParsedUnit,
};
use super::pool::run_bounded;
use super::prompts::{self, PromptUnit};
use super::waves::plan_waves;
use super::{cache_key, TranslationConfig};
use crate::cache::ResultCache;
use crate::handler::{JobContext, JobHandler, JobResult};

/// Outcome of one translation run, stored as the job's result reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationSummary {
    /// Units in the document.
    pub total_units: i32,
    /// Units with both forms before this run started.
    pub complete_before: i32,
    /// Units with both forms when this run ended.
    pub complete: i32,
    /// Units completed by a generation call in this run.
    pub translated: usize,
    /// Units completed from the result cache.
    pub cached: usize,
    /// Units still missing a form after every fallback.
    pub failed: usize,
    /// Failures whose error can never clear on another run.
    #[serde(default)]
    pub permanent_failures: usize,
    pub waves: usize,
    pub batches: usize,
    pub provider_calls: usize,
    pub checkpoint: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TranslationSummary {
    fn completed_nothing(&self) -> bool {
        self.failed > 0 && self.translated == 0 && self.cached == 0
    }

    /// Nothing was completed and every failure was permanent, such as a
    /// model the provider does not have.
    pub fn should_fail(&self) -> bool {
        self.completed_nothing() && self.permanent_failures == self.failed
    }

    /// Nothing was completed but some failure may clear on another run.
    pub fn should_retry(&self) -> bool {
        self.completed_nothing() && self.permanent_failures < self.failed
    }

    fn failure_message(&self) -> String {
        self.last_error
            .clone()
            .unwrap_or_else(|| format!("{} units failed", self.failed))
    }

    pub fn to_result_ref(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("translated {}/{} units", self.complete, self.total_units)
        })
    }
}

/// Handler for [`JobType::Translation`] jobs.
pub struct TranslationHandler {
    jobs: Arc<dyn JobRepository>,
    units: Arc<dyn TextUnitRepository>,
    index: Arc<dyn IndexService>,
    cache: ResultCache,
    backend: Arc<dyn GenerationBackend>,
    config: TranslationConfig,
}

impl TranslationHandler {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        units: Arc<dyn TextUnitRepository>,
        cache: ResultCache,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            jobs,
            units,
            index: Arc::new(NoOpIndex),
            cache,
            backend,
            config: TranslationConfig::default(),
        }
    }

    pub fn with_index(mut self, index: Arc<dyn IndexService>) -> Self {
        self.index = index;
        self
    }

    pub fn with_config(mut self, config: TranslationConfig) -> Self {
        self.config = config;
        self
    }

    /// Translate every incomplete unit of the job's target document.
    #[instrument(
        skip(self, ctx, params),
        fields(subsystem = "translation", component = "pipeline", job_id = %ctx.job.id, target_id = %ctx.job.target_id)
    )]
    pub async fn run(
        &self,
        ctx: &JobContext,
        params: &TranslationParams,
    ) -> Result<TranslationSummary> {
        let start = Instant::now();
        let target_id = ctx.target_id();

        if !self.index.document_exists(target_id).await? {
            return Err(Error::Permanent(format!("document {target_id} not found")));
        }

        let mut units = self.units.list_for_parent(target_id).await?;
        if units.is_empty() {
            return Err(Error::Permanent(format!(
                "document {target_id} has no text units"
            )));
        }
        units.sort_by_key(|u| u.index);

        if let Ok(Some(indexed)) = self.index.unit_count(target_id).await {
            if indexed != units.len() as i64 {
                debug!(
                    indexed,
                    stored = units.len(),
                    "Index unit count differs from stored units"
                );
            }
        }

        let config = self.config.for_params(params);
        let run = Run::new(self, ctx, params, &config, &units);
        run.start().await;

        let floor = ctx.last_checkpoint();
        let selected: Vec<TextUnit> = units
            .into_iter()
            .filter(|u| u.need() != UnitNeed::Nothing)
            .filter(|u| floor.is_none_or(|f| u.index > f))
            .collect();
        let first_index = run.order.first().copied().unwrap_or_default();
        let waves = plan_waves(selected, first_index, config.wave_stride);

        info!(
            total_units = run.total,
            complete_before = run.complete_before,
            waves = waves.len(),
            checkpoint = ?floor,
            "Starting translation run"
        );

        let mut wave_count = 0;
        let mut batch_count = 0;
        for wave in waves {
            wave_count += 1;
            let (both, partial): (Vec<TextUnit>, Vec<TextUnit>) = wave
                .units
                .into_iter()
                .partition(|u| u.need() == UnitNeed::Both);
            let batches = pack_batches(both, config.token_budget);
            batch_count += batches.len();

            debug!(
                wave = wave.number,
                batches = batches.len(),
                partial = partial.len(),
                "Processing wave"
            );

            let mut work: Vec<Work> = batches.into_iter().map(Work::Batch).collect();
            work.extend(partial.into_iter().map(Work::Partial));

            let run_ref = &run;
            let wave_number = wave.number;
            run_bounded(work, config.unit_concurrency, move |item| {
                run_ref.process(item, wave_number)
            })
            .await;
        }

        run.persist_checkpoint().await;
        let summary = run.summary(wave_count, batch_count);

        info!(
            complete = summary.complete,
            total_units = summary.total_units,
            translated = summary.translated,
            cached = summary.cached,
            failed = summary.failed,
            provider_calls = summary.provider_calls,
            duration_ms = start.elapsed().as_millis() as u64,
            "Translation run finished"
        );
        Ok(summary)
    }
}

#[async_trait]
impl JobHandler for TranslationHandler {
    fn job_type(&self) -> JobType {
        JobType::Translation
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let JobParams::Translation(params) = ctx.params().clone() else {
            return JobResult::Failed(format!(
                "translation handler received {} params",
                ctx.job.job_type
            ));
        };

        match self.run(&ctx, &params).await {
            Ok(summary) if summary.should_fail() => JobResult::Failed(summary.failure_message()),
            Ok(summary) if summary.should_retry() => JobResult::Retry(summary.failure_message()),
            Ok(summary) => JobResult::Success(Some(summary.to_result_ref())),
            Err(e) => e.into(),
        }
    }
}

enum Work {
    Batch(Batch),
    Partial(TextUnit),
}

enum Outcome {
    Translated { fluent: Option<String> },
    Cached { fluent: Option<String> },
    Failed(Error),
}

#[derive(Default)]
struct RunState {
    done: HashSet<i32>,
    /// Known fluent renderings, used as predecessor context.
    fluent: HashMap<i32, String>,
    complete: i32,
    translated: usize,
    cached: usize,
    failed: usize,
    permanent_failures: usize,
    provider_calls: usize,
    last_error: Option<String>,
}

struct Mark {
    checkpoint: Option<i32>,
    progress: i32,
}

/// State for one execution of a translation job.
struct Run<'a> {
    handler: &'a TranslationHandler,
    ctx: &'a JobContext,
    params: &'a TranslationParams,
    options: GenerationOptions,
    config: &'a TranslationConfig,
    batch_system: String,
    fluent_system: String,
    literal_system: String,
    /// Every unit index of the document, ascending.
    order: Vec<i32>,
    previous: HashMap<i32, i32>,
    total: i32,
    complete_before: i32,
    state: Mutex<RunState>,
    mark: tokio::sync::Mutex<Mark>,
}

impl<'a> Run<'a> {
    fn new(
        handler: &'a TranslationHandler,
        ctx: &'a JobContext,
        params: &'a TranslationParams,
        config: &'a TranslationConfig,
        units: &[TextUnit],
    ) -> Self {
        let order: Vec<i32> = units.iter().map(|u| u.index).collect();
        let previous = order.windows(2).map(|w| (w[1], w[0])).collect();

        let mut state = RunState::default();
        for unit in units {
            if unit.is_complete() {
                state.done.insert(unit.index);
                state.complete += 1;
            }
            if let Some(fluent) = unit.derived.fluent.as_ref().filter(|_| unit.has_fluent()) {
                state.fluent.insert(unit.index, fluent.clone());
            }
        }
        let complete_before = state.complete;

        Self {
            handler,
            ctx,
            params,
            options: config.generation_options(),
            config,
            batch_system: prompts::batch_system(params),
            fluent_system: prompts::fluent_system(params),
            literal_system: prompts::literal_system(params),
            order,
            previous,
            total: units.len() as i32,
            complete_before,
            state: Mutex::new(state),
            mark: tokio::sync::Mutex::new(Mark {
                checkpoint: ctx.last_checkpoint(),
                progress: complete_before,
            }),
        }
    }

    fn job_id(&self) -> uuid::Uuid {
        self.ctx.job.id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the progress baseline before any work starts.
    async fn start(&self) {
        if let Err(e) = self
            .handler
            .jobs
            .set_progress(self.job_id(), self.complete_before, self.total)
            .await
        {
            warn!(error = %e, "Failed to record initial progress");
        }
        self.ctx.report_progress(self.complete_before, self.total);
    }

    async fn process(&self, work: Work, wave: usize) {
        match work {
            Work::Batch(batch) => self.process_batch(batch, wave).await,
            Work::Partial(unit) => {
                let index = unit.index;
                let outcome = self.process_partial(unit).await;
                self.record(index, outcome);
            }
        }
        self.persist_checkpoint().await;
    }

    // ─── Batch path ──────────────────────────────────────────────────────

    async fn process_batch(&self, batch: Batch, wave: usize) {
        let mut pending = Vec::new();
        for unit in batch.units {
            match self.apply_cached(unit).await {
                Cached::Both(index, fluent) => self.record(
                    index,
                    Outcome::Cached {
                        fluent: Some(fluent),
                    },
                ),
                Cached::Partial(unit) => {
                    let index = unit.index;
                    let outcome = self.process_partial(unit).await;
                    self.record(index, outcome);
                }
                Cached::Miss(unit) => pending.push(unit),
            }
        }
        if pending.is_empty() {
            return;
        }

        debug!(
            wave,
            batch_size = pending.len(),
            first_index = pending[0].index,
            "Submitting batch"
        );

        let content = {
            let context = self.context_for(&pending);
            let items: Vec<PromptUnit<'_>> = pending
                .iter()
                .zip(context.iter())
                .map(|(unit, previous)| PromptUnit {
                    unit,
                    previous: previous.as_deref(),
                })
                .collect();
            prompts::batch_content(self.params, &items)
        };

        let parsed = match self.generate(&self.batch_system, &content).await {
            Ok(text) => parse_batch_response(&text),
            Err(e) => Err(e),
        };

        let mut parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    wave,
                    batch_size = pending.len(),
                    error = %e,
                    "Batch failed, falling back to per-unit requests"
                );
                for unit in pending {
                    let index = unit.index;
                    let outcome = self.process_individually(unit).await;
                    self.record(index, outcome);
                }
                return;
            }
        };

        let positional = parsed.len() == pending.len() && parsed.iter().all(|p| p.index.is_none());
        let mut retry = Vec::new();
        for (position, unit) in pending.into_iter().enumerate() {
            let item = if positional {
                parsed.get_mut(position).map(std::mem::take)
            } else {
                take_item(&mut parsed, unit.index)
            };
            let Some(item) = item else {
                debug!(unit_index = unit.index, "Unit missing from batch response");
                retry.push(unit);
                continue;
            };
            match self.accept_both(&unit, item, true).await {
                Ok(fluent) => self.record(
                    unit.index,
                    Outcome::Translated {
                        fluent: Some(fluent),
                    },
                ),
                Err(e) => {
                    debug!(unit_index = unit.index, error = %e, "Batch item rejected");
                    retry.push(unit);
                }
            }
        }

        for unit in retry {
            let index = unit.index;
            let outcome = self.process_individually(unit).await;
            self.record(index, outcome);
        }
    }

    /// Both forms for one unit in its own request.
    async fn process_individually(&self, unit: TextUnit) -> Outcome {
        let previous = self.context_for(std::slice::from_ref(&unit)).pop().flatten();
        let content = prompts::batch_content(
            self.params,
            &[PromptUnit {
                unit: &unit,
                previous: previous.as_deref(),
            }],
        );

        let result = async {
            let text = self.generate(&self.batch_system, &content).await?;
            let mut parsed = parse_batch_response(&text)?;
            let item = take_item(&mut parsed, unit.index)
                .or_else(|| parsed.into_iter().next())
                .ok_or_else(|| Error::Parse("empty response".to_string()))?;
            self.accept_both(&unit, item, false).await
        }
        .await;

        match result {
            Ok(fluent) => Outcome::Translated {
                fluent: Some(fluent),
            },
            Err(e) => Outcome::Failed(e),
        }
    }

    /// Validate a parsed item and write both forms.
    ///
    /// With `strict`, segments that fail the integrity check reject the whole
    /// item so it gets a dedicated retry. Otherwise only the segments are
    /// dropped.
    async fn accept_both(&self, unit: &TextUnit, item: ParsedUnit, strict: bool) -> Result<String> {
        let fluent = item
            .fluent
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| Error::Parse(format!("unit {} has no fluent rendering", unit.index)))?;
        let literal = item
            .literal
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| Error::Parse(format!("unit {} has no literal rendering", unit.index)))?;

        let (segments, integrity) = verified_segments(&unit.source_text, item.segments);
        if let Some(e) = integrity {
            if strict {
                return Err(e);
            }
            warn!(unit_index = unit.index, error = %e, "Discarding misaligned segments");
        }

        let rendering = LiteralRendering {
            text: literal,
            segments,
            annotations: item.annotations,
        };
        self.write_fluent(unit, &fluent).await?;
        self.write_literal(unit, &rendering).await?;
        Ok(fluent)
    }

    // ─── Partial path ────────────────────────────────────────────────────

    /// Fill in whichever single form a unit is missing.
    async fn process_partial(&self, unit: TextUnit) -> Outcome {
        match unit.need() {
            UnitNeed::FluentOnly => self.fill_fluent(&unit).await,
            UnitNeed::LiteralOnly => self.fill_literal(&unit).await,
            UnitNeed::Both => self.process_individually(unit).await,
            UnitNeed::Nothing => Outcome::Cached { fluent: None },
        }
    }

    async fn fill_fluent(&self, unit: &TextUnit) -> Outcome {
        let key = cache_key(self.params, unit, defaults::CACHE_OP_FLUENT);
        if let Some(fluent) = self.cached_json::<String>(&key).await {
            return match self.handler.units.write_fluent(unit.id, &fluent).await {
                Ok(()) => Outcome::Cached {
                    fluent: Some(fluent),
                },
                Err(e) => Outcome::Failed(e),
            };
        }

        let previous = self.context_for(std::slice::from_ref(unit)).pop().flatten();
        let content = prompts::single_content(
            self.params,
            &PromptUnit {
                unit,
                previous: previous.as_deref(),
            },
        );
        let result = async {
            let text = self.generate(&self.fluent_system, &content).await?;
            let fluent = parse_fluent_response(&text)?;
            self.write_fluent(unit, &fluent).await?;
            Ok::<_, Error>(fluent)
        }
        .await;

        match result {
            Ok(fluent) => Outcome::Translated {
                fluent: Some(fluent),
            },
            Err(e) => Outcome::Failed(e),
        }
    }

    async fn fill_literal(&self, unit: &TextUnit) -> Outcome {
        let key = cache_key(self.params, unit, defaults::CACHE_OP_LITERAL);
        if let Some(rendering) = self.cached_json::<LiteralRendering>(&key).await {
            return match self.handler.units.write_literal(unit.id, &rendering).await {
                Ok(()) => Outcome::Cached { fluent: None },
                Err(e) => Outcome::Failed(e),
            };
        }

        let content = prompts::single_content(
            self.params,
            &PromptUnit {
                unit,
                previous: None,
            },
        );
        let result = async {
            let text = self.generate(&self.literal_system, &content).await?;
            let item = parse_literal_response(&text)?;
            let literal = item
                .literal
                .ok_or_else(|| Error::Parse("response has no literal rendering".to_string()))?;
            let (segments, integrity) = verified_segments(&unit.source_text, item.segments);
            if let Some(e) = integrity {
                warn!(unit_index = unit.index, error = %e, "Discarding misaligned segments");
            }
            let rendering = LiteralRendering {
                text: literal,
                segments,
                annotations: item.annotations,
            };
            self.write_literal(unit, &rendering).await
        }
        .await;

        match result {
            Ok(()) => Outcome::Translated { fluent: None },
            Err(e) => Outcome::Failed(e),
        }
    }

    // ─── Cache ───────────────────────────────────────────────────────────

    async fn cached_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &interlinear_core::CacheKey,
    ) -> Option<T> {
        match self.handler.cache.get_json(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Apply cached results for a unit needing both forms.
    async fn apply_cached(&self, mut unit: TextUnit) -> Cached {
        let fluent_key = cache_key(self.params, &unit, defaults::CACHE_OP_FLUENT);
        let literal_key = cache_key(self.params, &unit, defaults::CACHE_OP_LITERAL);
        let fluent = self.cached_json::<String>(&fluent_key).await;
        let literal = self.cached_json::<LiteralRendering>(&literal_key).await;

        if fluent.is_none() && literal.is_none() {
            return Cached::Miss(unit);
        }

        if let Some(fluent) = &fluent {
            match self.handler.units.write_fluent(unit.id, fluent).await {
                Ok(()) => unit.derived.fluent = Some(fluent.clone()),
                Err(e) => warn!(unit_index = unit.index, error = %e, "Failed to apply cached fluent"),
            }
        }
        if let Some(literal) = &literal {
            match self.handler.units.write_literal(unit.id, literal).await {
                Ok(()) => {
                    unit.derived.literal = Some(literal.text.clone());
                    unit.derived.aligned_segments = literal.segments.clone();
                }
                Err(e) => warn!(unit_index = unit.index, error = %e, "Failed to apply cached literal"),
            }
        }

        match (unit.need(), unit.derived.fluent.clone()) {
            (UnitNeed::Nothing, Some(fluent)) => Cached::Both(unit.index, fluent),
            (UnitNeed::Both, _) => Cached::Miss(unit),
            _ => Cached::Partial(unit),
        }
    }

    async fn write_fluent(&self, unit: &TextUnit, fluent: &str) -> Result<()> {
        self.handler.units.write_fluent(unit.id, fluent).await?;
        let key = cache_key(self.params, unit, defaults::CACHE_OP_FLUENT);
        if let Err(e) = self.handler.cache.put_json(&key, &fluent).await {
            warn!(unit_index = unit.index, error = %e, "Failed to cache fluent rendering");
        }
        Ok(())
    }

    async fn write_literal(&self, unit: &TextUnit, rendering: &LiteralRendering) -> Result<()> {
        self.handler.units.write_literal(unit.id, rendering).await?;
        let key = cache_key(self.params, unit, defaults::CACHE_OP_LITERAL);
        if let Err(e) = self.handler.cache.put_json(&key, rendering).await {
            warn!(unit_index = unit.index, error = %e, "Failed to cache literal rendering");
        }
        Ok(())
    }

    // ─── Provider ────────────────────────────────────────────────────────

    /// One generation call raced against the per-call deadline.
    async fn generate(&self, system: &str, content: &str) -> Result<String> {
        self.lock().provider_calls += 1;
        let call = self.handler.backend.generate(system, content, &self.options);
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "generation call exceeded {}s",
                self.config.call_timeout.as_secs()
            ))),
        }
    }

    /// Predecessor translations for `units`, skipping predecessors that are
    /// part of the same request.
    fn context_for(&self, units: &[TextUnit]) -> Vec<Option<String>> {
        let in_request: HashSet<i32> = units.iter().map(|u| u.index).collect();
        let state = self.lock();
        units
            .iter()
            .map(|unit| {
                self.previous
                    .get(&unit.index)
                    .filter(|prev| !in_request.contains(prev))
                    .and_then(|prev| state.fluent.get(prev).cloned())
            })
            .collect()
    }

    // ─── Bookkeeping ─────────────────────────────────────────────────────

    fn record(&self, index: i32, outcome: Outcome) {
        let mut state = self.lock();
        match outcome {
            Outcome::Translated { fluent } | Outcome::Cached { fluent }
                if state.done.contains(&index) =>
            {
                if let Some(fluent) = fluent {
                    state.fluent.insert(index, fluent);
                }
            }
            Outcome::Translated { fluent } => {
                state.translated += 1;
                state.complete += 1;
                state.done.insert(index);
                if let Some(fluent) = fluent {
                    state.fluent.insert(index, fluent);
                }
            }
            Outcome::Cached { fluent } => {
                state.cached += 1;
                state.complete += 1;
                state.done.insert(index);
                if let Some(fluent) = fluent {
                    state.fluent.insert(index, fluent);
                }
            }
            Outcome::Failed(e) => {
                warn!(
                    unit_index = index,
                    error = %e,
                    transient = e.is_transient(),
                    "Unit left incomplete"
                );
                state.failed += 1;
                if e.is_permanent() {
                    state.permanent_failures += 1;
                }
                state.last_error = Some(e.to_string());
            }
        }
    }

    /// Highest index such that every unit after the previous checkpoint, up
    /// to and including it, is complete.
    fn low_water(&self, done: &HashSet<i32>) -> Option<i32> {
        let floor = self.ctx.last_checkpoint();
        let mut mark = floor;
        for &index in self.order.iter().filter(|&&i| floor.is_none_or(|f| i > f)) {
            if !done.contains(&index) {
                break;
            }
            mark = Some(index);
        }
        mark
    }

    /// Persist checkpoint and progress when either moved.
    async fn persist_checkpoint(&self) {
        let mut mark = self.mark.lock().await;
        let (checkpoint, progress) = {
            let state = self.lock();
            (self.low_water(&state.done), state.complete)
        };
        if checkpoint == mark.checkpoint && progress == mark.progress {
            return;
        }

        let jobs = &self.handler.jobs;
        let written = match checkpoint {
            Some(value) => jobs.checkpoint(self.job_id(), value, progress).await,
            None => jobs.set_progress(self.job_id(), progress, self.total).await,
        };
        match written {
            Ok(()) => {
                debug!(checkpoint = ?checkpoint, progress, "Checkpoint saved");
                mark.checkpoint = checkpoint;
                mark.progress = progress;
                self.ctx.report_progress(progress, self.total);
            }
            Err(e) => warn!(error = %e, "Failed to save checkpoint"),
        }
    }

    fn summary(&self, waves: usize, batches: usize) -> TranslationSummary {
        let state = self.lock();
        TranslationSummary {
            total_units: self.total,
            complete_before: self.complete_before,
            complete: state.complete,
            translated: state.translated,
            cached: state.cached,
            failed: state.failed,
            permanent_failures: state.permanent_failures,
            waves,
            batches,
            provider_calls: state.provider_calls,
            checkpoint: self.low_water(&state.done),
            last_error: state.last_error.clone(),
        }
    }
}

enum Cached {
    /// Both forms applied from cache.
    Both(i32, String),
    /// One form applied; the other still needs generating.
    Partial(TextUnit),
    Miss(TextUnit),
}

/// Remove and return the parsed item labelled `index`.
fn take_item(parsed: &mut Vec<ParsedUnit>, index: i32) -> Option<ParsedUnit> {
    let position = parsed.iter().position(|p| p.index == Some(index))?;
    Some(parsed.swap_remove(position))
}
