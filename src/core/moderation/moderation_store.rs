// Storage ports for the moderation pipeline.
//
// The job ledger is owned by this subsystem. Content lives elsewhere; the
// pipeline only reads the text and writes the moderation fields.

use super::moderation_models::{
    JobStatus, ModeratableContent, ModerationJob, ModerationState, TargetRef,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record not found")]
    NotFound,

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Persisted ledger of moderation attempts, used for retries and audit.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new Pending row for the target.
    async fn create_job(&self, target: TargetRef) -> Result<ModerationJob, StoreError>;

    /// The most recently created row for the target, if any.
    async fn latest_job(&self, target: TargetRef) -> Result<Option<ModerationJob>, StoreError>;

    async fn mark_processing(&self, job_id: i64) -> Result<(), StoreError>;

    /// Mark Done. `attempts` and `last_error` are kept as history.
    async fn mark_done(&self, job_id: i64) -> Result<(), StoreError>;

    /// Mark Error, bump `attempts`, record the message. Returns the new attempt count.
    async fn mark_error(&self, job_id: i64, error: &str) -> Result<u32, StoreError>;

    /// Newest first, optionally filtered by status.
    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<ModerationJob>, StoreError>;

    /// Every row for one target, newest first.
    async fn jobs_for_target(&self, target: TargetRef) -> Result<Vec<ModerationJob>, StoreError>;
}

/// Read/write access to the moderation fields of reviews and event reviews.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Current content, or `None` if it was deleted.
    async fn load_content(
        &self,
        target: TargetRef,
    ) -> Result<Option<ModeratableContent>, StoreError>;

    /// Overwrite the moderation fields. `StoreError::NotFound` if the record is gone.
    async fn save_moderation(
        &self,
        target: TargetRef,
        state: &ModerationState,
    ) -> Result<(), StoreError>;
}
