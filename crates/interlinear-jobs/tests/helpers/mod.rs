//! In-memory stores shared by the integration tests.
//!
//! These mirror the PostgreSQL repositories' transition rules closely enough
//! that queue, worker and pipeline behavior can be exercised without a
//! database.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use interlinear_core::{
    CacheEntry, CacheKey, CacheRepository, DerivedForms, Error, IndexService, Job, JobFilter,
    JobList, JobNotifier, JobRepository, JobStatus, JobType, JobView, LiteralRendering, NewJob,
    Pagination, QueueStats, Result, StatusTransition, TextUnit, TextUnitRepository,
};

// ============================================================================
// JOBS
// ============================================================================

#[derive(Default)]
struct JobTable {
    rows: HashMap<Uuid, Job>,
    /// Insertion order, used as the FIFO tie-break.
    seq: HashMap<Uuid, u64>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryJobs {
    table: Mutex<JobTable>,
    checkpoints: Mutex<Vec<(Uuid, i32, i32)>>,
    heartbeats: Mutex<Vec<Uuid>>,
}

impl MemoryJobs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self, id: Uuid) -> Job {
        self.table.lock().unwrap().rows[&id].clone()
    }

    /// Overwrite a stored job, for setting up states directly.
    pub fn edit(&self, id: Uuid, f: impl FnOnce(&mut Job)) {
        let mut table = self.table.lock().unwrap();
        f(table.rows.get_mut(&id).unwrap());
    }

    /// Every `checkpoint` call in order: `(job_id, checkpoint, progress)`.
    pub fn checkpoint_log(&self) -> Vec<(Uuid, i32, i32)> {
        self.checkpoints.lock().unwrap().clone()
    }

    pub fn heartbeat_count(&self, id: Uuid) -> usize {
        self.heartbeats
            .lock()
            .unwrap()
            .iter()
            .filter(|j| **j == id)
            .count()
    }
}

#[async_trait]
impl JobRepository for MemoryJobs {
    async fn insert(&self, new: NewJob) -> Result<Job> {
        let mut table = self.table.lock().unwrap();
        let job = Job {
            id: Uuid::new_v4(),
            job_type: new.params.job_type(),
            status: JobStatus::Pending,
            owner_id: new.owner_id,
            target_id: new.target_id,
            params: new.params,
            priority: new.priority,
            retry_count: 0,
            retry_after: None,
            heartbeat_at: None,
            last_checkpoint: None,
            progress: 0,
            total_items: 0,
            result_ref: None,
            error_message: None,
            notify_target: new.notify_target,
            notified_at: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            expires_at: new.expires_at,
        };
        let seq = table.next_seq;
        table.next_seq += 1;
        table.seq.insert(job.id, seq);
        table.rows.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.table.lock().unwrap().rows.get(&id).cloned())
    }

    async fn list(&self, filter: &JobFilter, page: Pagination) -> Result<JobList> {
        let table = self.table.lock().unwrap();
        let mut matching: Vec<&Job> = table.rows.values().filter(|j| filter.matches(j)).collect();
        matching.sort_by_key(|j| std::cmp::Reverse(table.seq[&j.id]));
        let total = matching.len() as i64;
        let jobs = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .map(JobView::from)
            .collect();
        Ok(JobList {
            jobs,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    async fn claim_next(&self, job_types: &[JobType], now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut table = self.table.lock().unwrap();
        let next = table
            .rows
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .filter(|j| job_types.is_empty() || job_types.contains(&j.job_type))
            .filter(|j| j.retry_after.is_none_or(|t| t <= now))
            .filter(|j| j.expires_at.is_none_or(|t| t > now))
            .min_by_key(|j| (std::cmp::Reverse(j.priority), table.seq[&j.id]))
            .map(|j| j.id);

        Ok(next.map(|id| {
            let job = table.rows.get_mut(&id).unwrap();
            job.status = JobStatus::Processing;
            job.started_at = Some(now);
            job.heartbeat_at = Some(now);
            job.clone()
        }))
    }

    async fn update_status(&self, id: Uuid, transition: StatusTransition) -> Result<Option<Job>> {
        let mut table = self.table.lock().unwrap();
        let Some(job) = table.rows.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != transition.from_status() {
            return Ok(None);
        }
        let now = Utc::now();
        job.status = transition.to_status();
        match transition {
            StatusTransition::Complete { result_ref } => {
                job.completed_at = Some(now);
                job.result_ref = result_ref;
                job.error_message = None;
                job.heartbeat_at = None;
            }
            StatusTransition::Fail { error } => {
                job.completed_at = Some(now);
                job.error_message = Some(error);
                job.heartbeat_at = None;
            }
            StatusTransition::Retry {
                retry_count,
                retry_after,
                error,
            } => {
                job.retry_count = retry_count;
                job.retry_after = Some(retry_after);
                job.error_message = Some(error);
                job.started_at = None;
                job.heartbeat_at = None;
            }
            StatusTransition::Reset => {
                job.retry_count = 0;
                job.retry_after = None;
                job.error_message = None;
                job.last_checkpoint = None;
                job.heartbeat_at = None;
                job.started_at = None;
                job.completed_at = None;
                job.notified_at = None;
            }
        }
        Ok(Some(job.clone()))
    }

    async fn checkpoint(&self, id: Uuid, checkpoint: i32, progress: i32) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .push((id, checkpoint, progress));
        let mut table = self.table.lock().unwrap();
        if let Some(job) = table.rows.get_mut(&id) {
            if job.status == JobStatus::Processing {
                job.last_checkpoint = Some(job.last_checkpoint.map_or(checkpoint, |c| c.max(checkpoint)));
                job.progress = progress;
                job.heartbeat_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn set_progress(&self, id: Uuid, progress: i32, total_items: i32) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        if let Some(job) = table.rows.get_mut(&id) {
            job.progress = progress;
            job.total_items = total_items;
        }
        Ok(())
    }

    async fn heartbeat(&self, id: Uuid) -> Result<()> {
        self.heartbeats.lock().unwrap().push(id);
        let mut table = self.table.lock().unwrap();
        if let Some(job) = table.rows.get_mut(&id) {
            if job.status == JobStatus::Processing {
                job.heartbeat_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn reclaim_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut table = self.table.lock().unwrap();
        let mut ids = Vec::new();
        for job in table.rows.values_mut() {
            if job.status == JobStatus::Processing
                && job.heartbeat_at.is_none_or(|h| h < stale_before)
            {
                job.status = JobStatus::Pending;
                job.started_at = None;
                job.heartbeat_at = None;
                ids.push(job.id);
            }
        }
        Ok(ids)
    }

    async fn mark_notified(&self, id: Uuid) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        if let Some(job) = table.rows.get_mut(&id) {
            job.notified_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut table = self.table.lock().unwrap();
        let before = table.rows.len();
        table.rows.retain(|_, j| {
            !(j.status.is_terminal() && j.expires_at.is_some_and(|t| t <= now))
        });
        Ok((before - table.rows.len()) as u64)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let table = self.table.lock().unwrap();
        let count = |s: JobStatus| table.rows.values().filter(|j| j.status == s).count() as i64;
        Ok(QueueStats {
            pending: count(JobStatus::Pending),
            processing: count(JobStatus::Processing),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            total: table.rows.len() as i64,
        })
    }
}

// ============================================================================
// CACHE
// ============================================================================

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    /// Seed an entry directly.
    pub fn put(&self, key: CacheKey, result_ref: &str) {
        let now = Utc::now();
        self.entries.lock().unwrap().insert(
            key.clone(),
            CacheEntry {
                id: Uuid::new_v4(),
                key,
                result_ref: result_ref.to_string(),
                size: result_ref.len() as i64,
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
            },
        );
    }
}

#[async_trait]
impl CacheRepository for MemoryCache {
    async fn check(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries.get_mut(key).map(|entry| {
            entry.access_count += 1;
            entry.last_accessed_at = Utc::now();
            entry.clone()
        }))
    }

    async fn insert(&self, key: &CacheKey, result_ref: &str) -> Result<CacheEntry> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            return Err(Error::Conflict("result_cache_key".to_string()));
        }
        let now = Utc::now();
        let entry = CacheEntry {
            id: Uuid::new_v4(),
            key: key.clone(),
            result_ref: result_ref.to_string(),
            size: result_ref.len() as i64,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        };
        entries.insert(key.clone(), entry.clone());
        Ok(entry)
    }
}

// ============================================================================
// TEXT UNITS
// ============================================================================

#[derive(Default)]
pub struct MemoryUnits {
    units: Mutex<HashMap<Uuid, TextUnit>>,
    hidden: Mutex<HashSet<Uuid>>,
}

impl MemoryUnits {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a document with one unit per text, indexed from 1.
    pub fn document<S: AsRef<str>>(&self, texts: &[S]) -> Uuid {
        let parent_id = Uuid::new_v4();
        let mut units = self.units.lock().unwrap();
        for (i, text) in texts.iter().enumerate() {
            let unit = TextUnit {
                id: Uuid::new_v4(),
                parent_id,
                index: i as i32 + 1,
                source_text: text.as_ref().to_string(),
                derived: DerivedForms::default(),
            };
            units.insert(unit.id, unit);
        }
        parent_id
    }

    /// Units of a document ordered by index.
    pub fn units(&self, parent_id: Uuid) -> Vec<TextUnit> {
        let mut units: Vec<TextUnit> = self
            .units
            .lock()
            .unwrap()
            .values()
            .filter(|u| u.parent_id == parent_id)
            .cloned()
            .collect();
        units.sort_by_key(|u| u.index);
        units
    }

    pub fn unit(&self, parent_id: Uuid, index: i32) -> TextUnit {
        self.units(parent_id)
            .into_iter()
            .find(|u| u.index == index)
            .unwrap()
    }

    pub fn edit(&self, parent_id: Uuid, index: i32, f: impl FnOnce(&mut DerivedForms)) {
        let id = self.unit(parent_id, index).id;
        let mut units = self.units.lock().unwrap();
        f(&mut units.get_mut(&id).unwrap().derived);
    }

    pub fn complete_count(&self, parent_id: Uuid) -> usize {
        self.units(parent_id)
            .iter()
            .filter(|u| u.is_complete())
            .count()
    }

    /// Make the index report the document as missing.
    pub fn hide(&self, parent_id: Uuid) {
        self.hidden.lock().unwrap().insert(parent_id);
    }
}

#[async_trait]
impl TextUnitRepository for MemoryUnits {
    async fn list_for_parent(&self, parent_id: Uuid) -> Result<Vec<TextUnit>> {
        Ok(self.units(parent_id))
    }

    async fn write_fluent(&self, unit_id: Uuid, fluent: &str) -> Result<()> {
        let mut units = self.units.lock().unwrap();
        let unit = units
            .get_mut(&unit_id)
            .ok_or_else(|| Error::NotFound(format!("text unit {unit_id}")))?;
        unit.derived.fluent = Some(fluent.to_string());
        Ok(())
    }

    async fn write_literal(&self, unit_id: Uuid, literal: &LiteralRendering) -> Result<()> {
        let mut units = self.units.lock().unwrap();
        let unit = units
            .get_mut(&unit_id)
            .ok_or_else(|| Error::NotFound(format!("text unit {unit_id}")))?;
        unit.derived.literal = Some(literal.text.clone());
        unit.derived.aligned_segments = literal.segments.clone();
        unit.derived.annotations = Some(literal.annotations.clone());
        Ok(())
    }

    async fn clear_segments(&self, unit_id: Uuid) -> Result<()> {
        let mut units = self.units.lock().unwrap();
        if let Some(unit) = units.get_mut(&unit_id) {
            unit.derived.aligned_segments = None;
        }
        Ok(())
    }
}

#[async_trait]
impl IndexService for MemoryUnits {
    async fn document_exists(&self, target_id: Uuid) -> Result<bool> {
        if self.hidden.lock().unwrap().contains(&target_id) {
            return Ok(false);
        }
        let units = self.units.lock().unwrap();
        Ok(units.values().any(|u| u.parent_id == target_id))
    }

    async fn unit_count(&self, target_id: Uuid) -> Result<Option<i64>> {
        let units = self.units.lock().unwrap();
        Ok(Some(
            units.values().filter(|u| u.parent_id == target_id).count() as i64,
        ))
    }
}

// ============================================================================
// NOTIFIER
// ============================================================================

/// Notifier that records which jobs it was told about.
#[derive(Default)]
pub struct RecordingNotifier {
    pub completed: Mutex<Vec<Uuid>>,
    pub failed: Mutex<Vec<Uuid>>,
    pub fail_delivery: bool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_delivery: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl JobNotifier for RecordingNotifier {
    async fn on_job_completed(&self, job: &Job) -> Result<()> {
        self.completed.lock().unwrap().push(job.id);
        if self.fail_delivery {
            return Err(Error::Request("delivery refused".to_string()));
        }
        Ok(())
    }

    async fn on_job_failed(&self, job: &Job) -> Result<()> {
        self.failed.lock().unwrap().push(job.id);
        if self.fail_delivery {
            return Err(Error::Request("delivery refused".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// RESPONSE BUILDERS
// ============================================================================

/// Extract `(index, source_text)` pairs from a request's unit blocks.
pub fn request_units(content: &str) -> Vec<(i32, String)> {
    let mut out = Vec::new();
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        let Some(rest) = line.strip_prefix("[[UNIT ") else {
            continue;
        };
        let Some(index) = rest.strip_suffix("]]").and_then(|n| n.trim().parse().ok()) else {
            continue;
        };
        let mut text = Vec::new();
        for body in lines.by_ref() {
            if body == "[[END]]" {
                break;
            }
            text.push(body);
        }
        out.push((index, text.join("\n")));
    }
    out
}

/// A well-formed response block whose segments reproduce `source` word by word.
pub fn good_block(index: i32, source: &str) -> String {
    let segments: Vec<String> = source
        .split_whitespace()
        .map(|w| format!("{w} ||| lit-{w}"))
        .collect();
    format!(
        "[[UNIT {index}]]\nFLUENT: fluent {index}\nLITERAL: literal {index}\nSEGMENTS:\n{}\nNOTES:\n[[END]]\n",
        segments.join("\n")
    )
}

/// Reply to every unit in the request with a good block.
pub fn echo_response(content: &str) -> String {
    request_units(content)
        .iter()
        .map(|(index, text)| good_block(*index, text))
        .collect::<Vec<_>>()
        .join("\n")
}
