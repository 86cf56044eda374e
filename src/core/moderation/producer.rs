// Producer - called from the content-creation path.
//
// Writes a Pending ledger row, then publishes `{targetType, targetId}`.
// The two steps are not one transaction: a crash in between leaves an
// orphaned Pending row, which the worker and operators tolerate.

use super::moderation_models::{ModerationJob, QueueMessage, TargetRef};
use super::moderation_store::{JobStore, StoreError};
use super::queue::{QueueError, QueueTransport};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Failed to record moderation job: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to publish moderation job: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Clone)]
pub struct ModerationProducer {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn QueueTransport>,
}

impl ModerationProducer {
    pub fn new(jobs: Arc<dyn JobStore>, queue: Arc<dyn QueueTransport>) -> Self {
        Self { jobs, queue }
    }

    /// Schedule moderation for a target. Returns the new ledger row.
    pub async fn enqueue(&self, target: TargetRef) -> Result<ModerationJob, ProducerError> {
        let job = self.jobs.create_job(target).await?;

        if let Err(e) = self.queue.publish(&QueueMessage::from(target)).await {
            tracing::warn!(
                job_id = job.id,
                target = %target,
                error = %e,
                "Ledger row written but publish failed; row stays Pending"
            );
            return Err(e.into());
        }

        tracing::info!(job_id = job.id, target = %target, "Moderation job enqueued");
        Ok(job)
    }
}
