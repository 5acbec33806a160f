//! Job orchestration.
//!
//! Drives one job through `pending -> processing -> terminal`: resolve the
//! assets, hash the target pool once, hash the commented source frames,
//! match, then transfer. Anything failing before the transfer phase fails
//! the whole job; transfer failures are per comment. The caller's session is
//! renewed in place whenever it nears expiry.

use comment_transfer::{
    transfer, ApiError, AssetApi, Session, TransferOptions, TransferOutcome, TransferStatus,
    TransferSummary,
};
use frame_matcher::{Decoder, FrameExtractor, FrameMatcher, MatchError, MatchOutcome};
use shared::config::TransferConfig;
use shared::{JobResult, JobStatus, JobStore, ProcessingJob};
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Failures that end a job
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("job {id} already finished with status {status}")]
    AlreadyFinished { id: i64, status: JobStatus },

    #[error("source asset {0} has no frame comments to transfer")]
    NoComments(String),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl JobError {
    pub fn is_auth(&self) -> bool {
        matches!(self, JobError::Api(e) if e.is_auth())
    }
}

/// Runs jobs against one store, one asset API and one decoder
pub struct JobOrchestrator<S, A, D> {
    store: S,
    api: A,
    extractor: FrameExtractor<D>,
    matcher: FrameMatcher,
    transfer: TransferConfig,
    dry_run: bool,
}

impl<S: JobStore, A: AssetApi, D: Decoder> JobOrchestrator<S, A, D> {
    pub fn new(
        store: S,
        api: A,
        extractor: FrameExtractor<D>,
        matcher: FrameMatcher,
        transfer: TransferConfig,
    ) -> Self {
        Self {
            store,
            api,
            extractor,
            matcher,
            transfer,
            dry_run: false,
        }
    }

    /// Match and record but never create comments
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[cfg(test)]
    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Run one job to a terminal status.
    ///
    /// Failures after the job was loaded are recorded on the job before the
    /// error is returned.
    pub async fn run(&mut self, job_id: i64, session: &mut Session) -> Result<JobResult, JobError> {
        let mut job = self
            .store
            .load(job_id)?
            .ok_or(JobError::JobNotFound(job_id))?;

        if job.status.is_terminal() {
            return Err(JobError::AlreadyFinished {
                id: job.id,
                status: job.status,
            });
        }

        info!(
            job_id,
            source = %job.source_asset_id,
            target = %job.target_asset_id,
            dry_run = self.dry_run,
            "Starting job"
        );
        job.status = JobStatus::Processing;
        self.checkpoint(&mut job, 0.05, "Resolving assets")?;

        match self.execute(&mut job, session).await {
            Ok(result) => {
                job.status = if result.success {
                    JobStatus::Completed
                } else {
                    JobStatus::CompletedWithErrors
                };
                job.comments_transferred = result.transferred as u32;
                job.completed_at = Some(chrono::Utc::now());
                self.checkpoint(&mut job, 1.0, &result.message)?;
                info!(job_id, status = %job.status, "{}", result.message);
                Ok(result)
            }
            Err(e) => {
                error!(job_id, error = %e, "Job failed");
                job.status = JobStatus::Failed;
                job.error_message = Some(e.to_string());
                job.completed_at = Some(chrono::Utc::now());
                let progress = job.progress;
                self.checkpoint(&mut job, progress, "Failed")?;
                Err(e)
            }
        }
    }

    async fn execute(
        &mut self,
        job: &mut ProcessingJob,
        session: &mut Session,
    ) -> Result<JobResult, JobError> {
        *session = self.api.ensure_fresh(session.clone()).await?;
        let source_url = self
            .api
            .resolve_video_url(session, &job.source_asset_id)
            .await?;
        let target_url = self
            .api
            .resolve_video_url(session, &job.target_asset_id)
            .await?;
        let comments = self.api.list_comments(session, &job.source_asset_id).await?;
        if comments.is_empty() {
            return Err(JobError::NoComments(job.source_asset_id.clone()));
        }

        self.checkpoint(job, 0.20, "Hashing target frame pool")?;
        let target = self.extractor.open(&target_url).await?;
        let source = self.extractor.open(&source_url).await?;
        let factor = self.extractor.config().decimation_factor;
        let pool = self.extractor.extract_hashed(&target, factor).await?;

        self.checkpoint(
            job,
            0.60,
            &format!("Hashing source frames for {} comments", comments.len()),
        )?;
        let mut frames: Vec<u64> = comments
            .iter()
            .map(|c| c.source_frame_number)
            .filter(|&f| f < source.metadata.frame_count)
            .collect();
        frames.sort_unstable();
        frames.dedup();
        let extracted = self
            .extractor
            .extract_source_frames(&source.url, &frames, source.metadata.fps)
            .await?;
        let source_hashes: HashMap<u64, _> = self
            .extractor
            .hash_frames(extracted)
            .await?
            .into_iter()
            .map(|h| (h.position.frame_number(source.metadata.fps), h.bits))
            .collect();

        self.checkpoint(job, 0.80, &format!("Matching {} comments", comments.len()))?;
        let outcomes = self
            .matcher
            .match_comments(
                &self.extractor,
                &source,
                &target,
                &comments,
                &source_hashes,
                &pool,
            )
            .await?;

        let mut matches = Vec::new();
        let mut unmatched = Vec::new();
        for outcome in outcomes {
            match outcome {
                MatchOutcome::Matched(m) => matches.push(m),
                MatchOutcome::Skipped { comment, reason } => {
                    unmatched.push(TransferOutcome::skipped(&comment.id, reason))
                }
            }
        }
        job.matches_found = matches.len() as u32;
        info!(
            job_id = job.id,
            matched = matches.len(),
            unmatched = unmatched.len(),
            "Matching finished"
        );

        self.checkpoint(job, 0.95, &format!("Transferring {} matches", matches.len()))?;
        let sensitivity = job
            .sensitivity
            .unwrap_or(self.transfer.default_sensitivity);
        let mut summary = if self.dry_run {
            let mut summary = TransferSummary::default();
            for m in &matches {
                summary.record(TransferOutcome::for_match(
                    m,
                    TransferStatus::Skipped {
                        reason: "dry run".to_string(),
                    },
                ));
            }
            summary
        } else {
            let options = TransferOptions::from_config(&self.transfer, sensitivity);
            transfer(&self.api, session, &job.target_asset_id, &matches, &options).await
        };
        for outcome in unmatched {
            summary.record(outcome);
        }

        if summary.failed > 0 {
            warn!(job_id = job.id, failed = summary.failed, "Some comments failed to transfer");
        }
        if let Some(reason) = &summary.aborted {
            job.error_message = Some(reason.clone());
        }

        Ok(JobResult {
            success: summary.success(),
            transferred: summary.transferred,
            skipped: summary.skipped,
            failed: summary.failed,
            message: format!(
                "Transferred {} of {} comments ({} skipped, {} failed)",
                summary.transferred,
                comments.len(),
                summary.skipped,
                summary.failed
            ),
        })
    }

    /// Record progress; progress never moves backwards
    fn checkpoint(&mut self, job: &mut ProcessingJob, progress: f64, message: &str) -> anyhow::Result<()> {
        job.progress = job.progress.max(progress);
        job.message = message.to_string();
        job.updated_at = chrono::Utc::now();
        self.store.save(job)
    }
}
