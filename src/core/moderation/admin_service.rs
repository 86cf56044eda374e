// Manual override surface - operator actions that bypass or re-drive the queue.
//
// - set_level: synchronous, immediate human verdict
// - requeue: new Pending ledger row + new message, older rows untouched
// - list_jobs / jobs_for_target: read-only inspection

use super::moderation_models::{
    JobStatus, Language, ManualOverride, ModeratableContent, ModerationJob, ModerationLevel,
    TargetRef,
};
use super::moderation_store::{ContentStore, JobStore, StoreError};
use super::producer::{ModerationProducer, ProducerError};
use super::verdict_applier::apply_manual_override;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Hard cap on rows returned by `list_jobs`.
pub const MAX_LIST_LIMIT: u32 = 500;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0} is not a verdict level")]
    InvalidLevel(ModerationLevel),

    #[error("{0} does not exist")]
    NotFound(TargetRef),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Producer(#[from] ProducerError),
}

pub struct ModerationAdminService {
    jobs: Arc<dyn JobStore>,
    content: Arc<dyn ContentStore>,
    producer: ModerationProducer,
}

impl ModerationAdminService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        content: Arc<dyn ContentStore>,
        producer: ModerationProducer,
    ) -> Self {
        Self {
            jobs,
            content,
            producer,
        }
    }

    /// Set a verdict by hand. Takes effect immediately, source = Manual.
    pub async fn set_level(
        &self,
        target: TargetRef,
        level: ModerationLevel,
        reason: Option<String>,
        reason_localized: BTreeMap<Language, String>,
    ) -> Result<ModeratableContent, AdminError> {
        if level == ModerationLevel::Pending {
            return Err(AdminError::InvalidLevel(level));
        }

        let content = self
            .content
            .load_content(target)
            .await?
            .ok_or(AdminError::NotFound(target))?;

        let decision = ManualOverride {
            level,
            reason: reason.filter(|r| !r.trim().is_empty()),
            reason_localized,
        };
        let updated = apply_manual_override(&content, &decision, Utc::now());

        self.content
            .save_moderation(target, &updated.moderation)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AdminError::NotFound(target),
                other => AdminError::Store(other),
            })?;

        tracing::info!(
            target = %target,
            level = %level,
            reason = %updated.moderation.reason,
            "Moderation level set manually"
        );
        Ok(updated)
    }

    /// Schedule another automatic pass, e.g. after an edit or a disputed verdict.
    pub async fn requeue(&self, target: TargetRef) -> Result<ModerationJob, AdminError> {
        Ok(self.producer.enqueue(target).await?)
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<ModerationJob>, AdminError> {
        Ok(self
            .jobs
            .list_jobs(status, limit.min(MAX_LIST_LIMIT))
            .await?)
    }

    pub async fn jobs_for_target(
        &self,
        target: TargetRef,
    ) -> Result<Vec<ModerationJob>, AdminError> {
        Ok(self.jobs.jobs_for_target(target).await?)
    }
}
