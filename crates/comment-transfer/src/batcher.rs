//! Comment transfer batcher.
//!
//! Writes matched comments to the target asset in fixed-size batches with a
//! fixed pause between batches, which keeps the worker under the platform's
//! write rate limit. Items are independent: one failed write is recorded and
//! the rest of the batch continues. The session is checked before every
//! batch and replaced when it is about to expire.

use crate::api::{AssetApi, NewComment, Session};
use frame_matcher::MatchResult;
use serde::Serialize;
use shared::config::TransferConfig;
use shared::Sensitivity;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// The target platform displays a comment one frame before the one requested
pub const DISPLAY_FRAME_COMPENSATION: u64 = 1;

/// Frame number to send so the comment shows on `target_frame`
pub fn display_frame(target_frame: u64) -> u64 {
    target_frame + DISPLAY_FRAME_COMPENSATION
}

/// How a transfer run behaves
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOptions {
    /// Matches below this similarity are skipped
    pub min_similarity: f64,
    /// Prefix relocated text with a marker naming the confidence tier
    pub add_prefix: bool,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl TransferOptions {
    pub fn from_config(config: &TransferConfig, sensitivity: Sensitivity) -> Self {
        Self {
            min_similarity: config.floors.floor(sensitivity),
            add_prefix: config.add_prefix,
            batch_size: config.batch_size,
            batch_delay: Duration::from_secs(config.batch_delay_seconds),
        }
    }
}

/// What happened to one match
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferStatus {
    Transferred { created_id: String },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferOutcome {
    pub comment_id: String,
    /// Absent when the matcher found no position
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_result: Option<MatchResult>,
    #[serde(flatten)]
    pub status: TransferStatus,
}

impl TransferOutcome {
    /// Outcome for a comment the matcher could not place
    pub fn skipped(comment_id: &str, reason: impl Into<String>) -> Self {
        Self {
            comment_id: comment_id.to_string(),
            match_result: None,
            status: TransferStatus::Skipped {
                reason: reason.into(),
            },
        }
    }

    pub fn for_match(result: &MatchResult, status: TransferStatus) -> Self {
        Self {
            comment_id: result.comment.id.clone(),
            match_result: Some(result.clone()),
            status,
        }
    }

    pub fn target_frame_number(&self) -> Option<u64> {
        self.match_result.as_ref().map(|m| m.target_frame_number)
    }
}

/// Aggregated result of a transfer run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferSummary {
    pub transferred: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<TransferOutcome>,
    /// Set when the run stopped early because the session could not be renewed
    pub aborted: Option<String>,
}

impl TransferSummary {
    pub fn record(&mut self, outcome: TransferOutcome) {
        match outcome.status {
            TransferStatus::Transferred { .. } => self.transferred += 1,
            TransferStatus::Skipped { .. } => self.skipped += 1,
            TransferStatus::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Relocated comment body
pub fn format_comment(result: &MatchResult, add_prefix: bool) -> String {
    if add_prefix {
        format!(
            "[relayed, {} confidence] {}",
            result.confidence, result.comment.text
        )
    } else {
        result.comment.text.clone()
    }
}

/// Write every qualifying match to `target_asset_id`.
///
/// `session` is replaced in place whenever it is refreshed. If a refresh
/// fails, the remaining matches are recorded as failed and the run stops.
pub async fn transfer<A: AssetApi>(
    api: &A,
    session: &mut Session,
    target_asset_id: &str,
    matches: &[MatchResult],
    options: &TransferOptions,
) -> TransferSummary {
    let mut summary = TransferSummary::default();
    let mut qualifying = Vec::with_capacity(matches.len());

    for result in matches {
        if result.similarity < options.min_similarity {
            debug!(
                comment_id = %result.comment.id,
                similarity = result.similarity,
                floor = options.min_similarity,
                "Below similarity floor"
            );
            summary.record(TransferOutcome::for_match(
                result,
                TransferStatus::Skipped {
                    reason: "low similarity".to_string(),
                },
            ));
        } else {
            qualifying.push(result);
        }
    }

    let batches: Vec<&[&MatchResult]> = qualifying.chunks(options.batch_size.max(1)).collect();
    let total = batches.len();

    for (index, batch) in batches.iter().enumerate() {
        if index > 0 {
            info!(
                delay_secs = options.batch_delay.as_secs(),
                "Waiting before next batch"
            );
            sleep(options.batch_delay).await;
        }

        match api.ensure_fresh(session.clone()).await {
            Ok(fresh) => *session = fresh,
            Err(e) => {
                warn!(error = %e, "Session could not be renewed; abandoning remaining comments");
                let error = e.to_string();
                for result in batches[index..].iter().flat_map(|b| b.iter()) {
                    summary.record(TransferOutcome::for_match(
                        result,
                        TransferStatus::Failed {
                            error: error.clone(),
                        },
                    ));
                }
                summary.aborted = Some(error);
                break;
            }
        }
        info!(batch = index + 1, total, comments = batch.len(), "Transferring batch");

        for result in batch.iter() {
            let comment = NewComment {
                text: format_comment(result, options.add_prefix),
                frame_number: display_frame(result.target_frame_number),
            };

            let status = match api.create_comment(&*session, target_asset_id, &comment).await {
                Ok(created_id) => TransferStatus::Transferred { created_id },
                Err(e) => {
                    warn!(comment_id = %result.comment.id, error = %e, "Comment transfer failed");
                    TransferStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            summary.record(TransferOutcome::for_match(result, status));
        }
    }

    info!(
        transferred = summary.transferred,
        skipped = summary.skipped,
        failed = summary.failed,
        "Transfer finished"
    );
    summary
}
