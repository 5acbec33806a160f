//! Job-state store.
//!
//! The webhook receiver creates job records and the dashboard polls them; the
//! worker is the only writer while a job runs. Every save overwrites the whole
//! record so a reader never observes a half-applied update.

use crate::models::*;
use crate::Database;
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Persistence seam for [`ProcessingJob`] records
pub trait JobStore {
    /// Load a job, `None` if no such id exists
    fn load(&mut self, job_id: i64) -> Result<Option<ProcessingJob>>;

    /// Overwrite the stored record with `job`
    fn save(&mut self, job: &ProcessingJob) -> Result<()>;

    /// All jobs still waiting to run, oldest first
    fn pending(&mut self) -> Result<Vec<ProcessingJob>>;
}

/// SQLite-backed job store
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    /// Create a new job store with the given database
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new pending job and return it
    pub fn create(&mut self, job: &NewJob) -> Result<ProcessingJob> {
        let conn = self.db.conn_mut();
        let now = chrono::Utc::now();

        conn.execute(
            "INSERT INTO processing_jobs (
                source_asset_id, target_asset_id, sensitivity,
                status, progress, message, created_at, updated_at
            ) VALUES (?1, ?2, ?3, 'pending', 0.0, 'Queued', ?4, ?4)",
            params![
                job.source_asset_id,
                job.target_asset_id,
                job.sensitivity.map(|s| s.to_string()),
                now,
            ],
        )
        .context("Failed to insert job")?;

        let id = conn.last_insert_rowid();
        info!(
            job_id = id,
            source = %job.source_asset_id,
            target = %job.target_asset_id,
            "Created job"
        );

        self.load(id)?
            .with_context(|| format!("Job {} vanished after insert", id))
    }
}

impl JobStore for SqliteJobStore {
    fn load(&mut self, job_id: i64) -> Result<Option<ProcessingJob>> {
        let job = self
            .db
            .conn()
            .query_row(
                "SELECT * FROM processing_jobs WHERE id = ?1",
                params![job_id],
                row_to_job,
            )
            .optional()
            .with_context(|| format!("Failed to load job {}", job_id))?;

        Ok(job)
    }

    fn save(&mut self, job: &ProcessingJob) -> Result<()> {
        let conn = self.db.conn_mut();

        conn.execute(
            "INSERT INTO processing_jobs (
                id, source_asset_id, target_asset_id, sensitivity,
                status, progress, message,
                matches_found, comments_transferred, error_message,
                created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                source_asset_id = excluded.source_asset_id,
                target_asset_id = excluded.target_asset_id,
                sensitivity = excluded.sensitivity,
                status = excluded.status,
                progress = excluded.progress,
                message = excluded.message,
                matches_found = excluded.matches_found,
                comments_transferred = excluded.comments_transferred,
                error_message = excluded.error_message,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at",
            params![
                job.id,
                job.source_asset_id,
                job.target_asset_id,
                job.sensitivity.map(|s| s.to_string()),
                job.status.to_string(),
                job.progress,
                job.message,
                job.matches_found,
                job.comments_transferred,
                job.error_message,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )
        .with_context(|| format!("Failed to save job {}", job.id))?;

        debug!(
            job_id = job.id,
            status = %job.status,
            progress = %format!("{:.1}%", job.progress * 100.0),
            "Saved job"
        );

        Ok(())
    }

    fn pending(&mut self) -> Result<Vec<ProcessingJob>> {
        let conn = self.db.conn();

        let mut stmt = conn.prepare(
            "SELECT * FROM processing_jobs WHERE status = 'pending' ORDER BY created_at ASC, id ASC",
        )?;

        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(jobs)
    }
}

/// In-memory store for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: BTreeMap<i64, ProcessingJob>,
    /// Every saved version of every job, in save order
    history: Vec<ProcessingJob>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending job with the next free id
    pub fn create(&mut self, job: &NewJob) -> ProcessingJob {
        let id = self.jobs.keys().next_back().copied().unwrap_or(0) + 1;
        let now = chrono::Utc::now();
        let record = ProcessingJob {
            id,
            source_asset_id: job.source_asset_id.clone(),
            target_asset_id: job.target_asset_id.clone(),
            sensitivity: job.sensitivity,
            status: JobStatus::Pending,
            progress: 0.0,
            message: "Queued".to_string(),
            matches_found: 0,
            comments_transferred: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.jobs.insert(id, record.clone());
        record
    }

    /// Saved versions of one job, oldest first
    pub fn history(&self, job_id: i64) -> Vec<&ProcessingJob> {
        self.history.iter().filter(|j| j.id == job_id).collect()
    }
}

impl JobStore for MemoryJobStore {
    fn load(&mut self, job_id: i64) -> Result<Option<ProcessingJob>> {
        Ok(self.jobs.get(&job_id).cloned())
    }

    fn save(&mut self, job: &ProcessingJob) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        self.history.push(job.clone());
        Ok(())
    }

    fn pending(&mut self) -> Result<Vec<ProcessingJob>> {
        let mut jobs: Vec<_> = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        Ok(jobs)
    }
}

/// Helper: Convert a database row to a ProcessingJob
fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ProcessingJob> {
    Ok(ProcessingJob {
        id: row.get(0)?,
        source_asset_id: row.get(1)?,
        target_asset_id: row.get(2)?,
        sensitivity: row
            .get::<_, Option<String>>(3)?
            .and_then(|s| s.parse().ok()),
        status: row
            .get::<_, String>(4)?
            .parse()
            .unwrap_or(JobStatus::Failed),
        progress: row.get(5)?,
        message: row.get(6)?,
        matches_found: row.get::<_, i64>(7)? as u32,
        comments_transferred: row.get::<_, i64>(8)? as u32,
        error_message: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        completed_at: row.get(12)?,
    })
}
