//! Data models shared by the worker and its collaborators.
//!
//! This module defines the persisted job record, the comment shape read from
//! the source asset, and the aggregated result of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sensitivity tier chosen for a job; higher means a stricter similarity floor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sensitivity::High => write!(f, "high"),
            Sensitivity::Medium => write!(f, "medium"),
            Sensitivity::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Sensitivity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Sensitivity::High),
            "medium" => Ok(Sensitivity::Medium),
            "low" => Ok(Sensitivity::Low),
            _ => Err(anyhow::anyhow!("Invalid sensitivity: {}", s)),
        }
    }
}

/// Lifecycle of a processing job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    /// Terminal statuses are never left again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "completed_with_errors" => Ok(JobStatus::CompletedWithErrors),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// Persisted state of one source/target relocation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: i64,
    pub source_asset_id: String,
    pub target_asset_id: String,
    pub sensitivity: Option<Sensitivity>,

    // Job status
    pub status: JobStatus,
    pub progress: f64, // 0.0 to 1.0
    pub message: String,

    // Results
    pub matches_found: u32,
    pub comments_transferred: u32,
    pub error_message: Option<String>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Job to be created by the webhook receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub source_asset_id: String,
    pub target_asset_id: String,
    pub sensitivity: Option<Sensitivity>,
}

/// Timestamped comment on the source asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceComment {
    pub id: String,
    pub text: String,
    pub source_frame_number: u64,
}

/// Final aggregated outcome of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub transferred: usize,
    pub skipped: usize,
    pub failed: usize,
    pub message: String,
}
