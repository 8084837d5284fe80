//! Translation audit job.
//!
//! Recounts how many units of a document carry both derived forms and
//! re-checks stored aligned segments against their source text. With
//! `repair` set, segments that no longer reconstruct the source are cleared
//! so the next translation run or reader never sees a silent mismatch.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use interlinear_core::{
    AuditParams, Error, IndexService, JobParams, JobRepository, JobType, NoOpIndex, Result,
    TextUnitRepository, UnitNeed,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::translation::integrity::check_segments;

/// Counts produced by one audit run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_units: i32,
    /// Units with both forms.
    pub complete: i32,
    /// Units with exactly one form.
    pub partial: i32,
    /// Units with neither form.
    pub missing: i32,
    /// Units whose stored segments fail the integrity check.
    pub misaligned: i32,
    /// Misaligned units whose segments were cleared.
    pub repaired: i32,
}

/// Handler for [`JobType::TranslationAudit`] jobs.
pub struct TranslationAuditHandler {
    jobs: Arc<dyn JobRepository>,
    units: Arc<dyn TextUnitRepository>,
    index: Arc<dyn IndexService>,
}

impl TranslationAuditHandler {
    pub fn new(jobs: Arc<dyn JobRepository>, units: Arc<dyn TextUnitRepository>) -> Self {
        Self {
            jobs,
            units,
            index: Arc::new(NoOpIndex),
        }
    }

    pub fn with_index(mut self, index: Arc<dyn IndexService>) -> Self {
        self.index = index;
        self
    }

    #[instrument(
        skip(self, ctx, params),
        fields(subsystem = "jobs", component = "audit", job_id = %ctx.job.id)
    )]
    pub async fn run(&self, ctx: &JobContext, params: &AuditParams) -> Result<AuditSummary> {
        let target_id = ctx.target_id();
        if !self.index.document_exists(target_id).await? {
            return Err(Error::Permanent(format!("document {target_id} not found")));
        }

        let units = self.units.list_for_parent(target_id).await?;
        if units.is_empty() {
            return Err(Error::Permanent(format!(
                "document {target_id} has no text units"
            )));
        }

        let mut summary = AuditSummary {
            total_units: units.len() as i32,
            ..Default::default()
        };

        for unit in &units {
            match unit.need() {
                UnitNeed::Nothing => summary.complete += 1,
                UnitNeed::Both => summary.missing += 1,
                UnitNeed::FluentOnly | UnitNeed::LiteralOnly => summary.partial += 1,
            }

            let Some(segments) = unit.derived.aligned_segments.as_deref() else {
                continue;
            };
            if segments.is_empty() {
                continue;
            }
            if let Err(e) = check_segments(&unit.source_text, segments) {
                summary.misaligned += 1;
                warn!(unit_index = unit.index, error = %e, "Stored segments are misaligned");
                if params.repair {
                    self.units.clear_segments(unit.id).await?;
                    summary.repaired += 1;
                }
            }
        }

        self.jobs
            .set_progress(ctx.job.id, summary.complete, summary.total_units)
            .await?;
        ctx.report_progress(summary.complete, summary.total_units);

        info!(
            total_units = summary.total_units,
            complete = summary.complete,
            partial = summary.partial,
            missing = summary.missing,
            misaligned = summary.misaligned,
            repaired = summary.repaired,
            "Audit finished"
        );
        Ok(summary)
    }
}

#[async_trait]
impl JobHandler for TranslationAuditHandler {
    fn job_type(&self) -> JobType {
        JobType::TranslationAudit
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let JobParams::TranslationAudit(params) = ctx.params().clone() else {
            return JobResult::Failed(format!(
                "audit handler received {} params",
                ctx.job.job_type
            ));
        };

        match self.run(&ctx, &params).await {
            Ok(summary) => match serde_json::to_string(&summary) {
                Ok(json) => JobResult::Success(Some(json)),
                Err(e) => JobResult::Failed(format!("failed to encode audit summary: {e}")),
            },
            Err(e) => e.into(),
        }
    }
}
