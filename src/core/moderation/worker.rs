// Moderation worker - the long-running consumer of the moderation queue.
//
// One message at a time:
//   Received -> Classifying -> Applying -> Acked
//   Received -> Nacked (requeued) on any transient failure
//   Received -> Terminated once unreadable content has used up its attempts
//
// The worker is the only error boundary of the pipeline. Nothing that
// happens to a single message, and no broker outage, ends the process;
// only the cancellation token does.

use super::classifier::{ClassifierError, ModerationClassifier};
use super::moderation_models::{ModerationJob, QueueMessage, TargetRef};
use super::moderation_store::{ContentStore, JobStore, StoreError};
use super::queue::{Delivery, QueueTransport};
use super::verdict_applier::apply_llm_verdict;
use crate::core::ai::AiProvider;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// How long a single poll waits for a message.
    pub poll_timeout: Duration,
    /// Pause after a classifier failure.
    pub classifier_backoff: Duration,
    /// Pause after a persistence failure.
    pub store_backoff: Duration,
    /// Upper bound for the reconnect backoff.
    pub reconnect_max: Duration,
    /// Failed attempts after which a job whose content can't be processed
    /// is dead-lettered. Classifier and persistence failures are always
    /// retried. 0 = never.
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(1),
            classifier_backoff: Duration::from_secs(5),
            store_backoff: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// How long to wait before the next poll after a requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Poll,
    Store,
    Classifier,
}

/// Result category of the classify-and-apply step.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("transient failure: {reason}")]
    Transient { backoff: Backoff, reason: String },

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("target no longer exists")]
    NotFound,
}

impl ProcessError {
    fn store(err: StoreError) -> Self {
        ProcessError::Transient {
            backoff: Backoff::Store,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Requeued(Backoff),
    /// Terminated with the broker; the ledger row keeps the failure.
    DeadLettered,
}

// ============================================================================
// WORKER
// ============================================================================

pub struct ModerationWorker {
    jobs: Arc<dyn JobStore>,
    content: Arc<dyn ContentStore>,
    queue: Arc<dyn QueueTransport>,
    classifier: Arc<ModerationClassifier<Box<dyn AiProvider>>>,
    config: WorkerConfig,
}

impl ModerationWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        content: Arc<dyn ContentStore>,
        queue: Arc<dyn QueueTransport>,
        classifier: Arc<ModerationClassifier<Box<dyn AiProvider>>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            content,
            queue,
            classifier,
            config,
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "Moderation worker starting"
        );

        let mut reconnect_delay = self.config.poll_interval;

        while !cancel.is_cancelled() {
            if let Err(e) = self.queue.ensure_connected().await {
                error!(
                    error = %e,
                    retry_in_ms = reconnect_delay.as_millis() as u64,
                    "Broker unavailable"
                );
                if !sleep_or_cancel(reconnect_delay, &cancel).await {
                    break;
                }
                reconnect_delay = self.next_reconnect_delay(reconnect_delay);
                continue;
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.queue.consume_one(self.config.poll_timeout) => polled,
            };

            match polled {
                Ok(None) => {
                    reconnect_delay = self.config.poll_interval;
                    debug!("Moderation queue empty");
                    if !sleep_or_cancel(self.config.poll_interval, &cancel).await {
                        break;
                    }
                }
                Ok(Some(delivery)) => {
                    reconnect_delay = self.config.poll_interval;
                    let outcome = self.handle_delivery(&delivery, &cancel).await;
                    if let DeliveryOutcome::Requeued(backoff) = outcome {
                        if !sleep_or_cancel(self.backoff_duration(backoff), &cancel).await {
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in_ms = reconnect_delay.as_millis() as u64,
                        "Failed to poll moderation queue"
                    );
                    if !sleep_or_cancel(reconnect_delay, &cancel).await {
                        break;
                    }
                    reconnect_delay = self.next_reconnect_delay(reconnect_delay);
                }
            }
        }

        info!("Moderation worker stopped");
    }

    /// Process one delivery and settle it with the broker.
    pub async fn handle_delivery(
        &self,
        delivery: &Delivery,
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        let message = match QueueMessage::from_bytes(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                // Never ack what we can't read, or the job is silently lost.
                warn!(
                    tag = delivery.tag,
                    error = %e,
                    "Malformed moderation message, requeueing"
                );
                self.nack(delivery).await;
                return DeliveryOutcome::Requeued(Backoff::Poll);
            }
        };

        let target = message.target();
        debug!(
            tag = delivery.tag,
            target = %target,
            redelivered = delivery.redelivered,
            "Received moderation message"
        );

        match self.classify_and_apply(target, cancel).await {
            Ok(()) => {
                self.ack(delivery).await;
                DeliveryOutcome::Acked
            }
            Err(ProcessError::NotFound) => {
                info!(target = %target, "Moderation target no longer exists, nothing to do");
                self.ack(delivery).await;
                DeliveryOutcome::Acked
            }
            Err(ProcessError::Permanent(reason)) => {
                warn!(target = %target, reason = %reason, "Giving up on moderation job");
                self.dead_letter(delivery).await;
                DeliveryOutcome::DeadLettered
            }
            Err(ProcessError::Transient { backoff, reason }) => {
                warn!(target = %target, reason = %reason, "Moderation failed, requeueing");
                self.nack(delivery).await;
                DeliveryOutcome::Requeued(backoff)
            }
        }
    }

    /// Resolve live content, classify it, apply the verdict, update the ledger.
    async fn classify_and_apply(
        &self,
        target: TargetRef,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError> {
        let job = self
            .jobs
            .latest_job(target)
            .await
            .map_err(ProcessError::store)?;

        let content = match self.content.load_content(target).await {
            Ok(Some(content)) => content,
            Ok(None) => return Err(ProcessError::NotFound),
            Err(StoreError::Corrupt(detail)) => {
                return Err(self
                    .unexpected_failure(job.as_ref(), format!("unreadable content: {}", detail))
                    .await);
            }
            Err(e) => return Err(ProcessError::store(e)),
        };

        match &job {
            Some(job) => {
                self.jobs
                    .mark_processing(job.id)
                    .await
                    .map_err(ProcessError::store)?;
            }
            None => {
                warn!(target = %target, "No ledger row for target, applying verdict without it");
            }
        }

        let verdict = match self.classifier.classify(&content.text, cancel).await {
            Ok(verdict) => verdict,
            Err(ClassifierError::Cancelled) => {
                return Err(ProcessError::Transient {
                    backoff: Backoff::None,
                    reason: ClassifierError::Cancelled.to_string(),
                });
            }
            Err(e) => {
                return Err(self
                    .retryable_failure(job.as_ref(), Backoff::Classifier, e.to_string())
                    .await);
            }
        };

        let updated = apply_llm_verdict(&content, &verdict, Utc::now());
        match self.content.save_moderation(target, &updated.moderation).await {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Err(ProcessError::NotFound),
            Err(e) => {
                return Err(self
                    .retryable_failure(
                        job.as_ref(),
                        Backoff::Store,
                        format!("failed to save verdict: {}", e),
                    )
                    .await);
            }
        }

        if let Some(job) = &job {
            if let Err(e) = self.jobs.mark_done(job.id).await {
                return Err(self
                    .retryable_failure(
                        Some(job),
                        Backoff::Store,
                        format!("failed to mark job done: {}", e),
                    )
                    .await);
            }
        }

        info!(
            target = %target,
            job_id = job.as_ref().map(|j| j.id),
            level = %verdict.level,
            categories = ?verdict.categories,
            "Moderation verdict applied"
        );
        Ok(())
    }

    /// Classifier or persistence failure: recorded, then always requeued.
    async fn retryable_failure(
        &self,
        job: Option<&ModerationJob>,
        backoff: Backoff,
        reason: String,
    ) -> ProcessError {
        self.record_failure(job, &reason).await;
        ProcessError::Transient { backoff, reason }
    }

    /// Any other failure: recorded, requeued until the attempt cap is reached.
    async fn unexpected_failure(&self, job: Option<&ModerationJob>, reason: String) -> ProcessError {
        match self.record_failure(job, &reason).await {
            Some(attempts) if self.attempts_exhausted(attempts) => ProcessError::Permanent(format!(
                "{} (attempt {} of {})",
                reason, attempts, self.config.max_attempts
            )),
            _ => ProcessError::Transient {
                backoff: Backoff::Poll,
                reason,
            },
        }
    }

    /// Best-effort ledger update for a failed attempt. Returns the new attempt count.
    async fn record_failure(&self, job: Option<&ModerationJob>, reason: &str) -> Option<u32> {
        let job = job?;
        match self.jobs.mark_error(job.id, reason).await {
            Ok(attempts) => {
                debug!(job_id = job.id, attempts, "Recorded failed attempt");
                Some(attempts)
            }
            Err(e) => {
                warn!(job_id = job.id, error = %e, "Failed to record job failure");
                None
            }
        }
    }

    fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.config.max_attempts > 0 && attempts >= self.config.max_attempts
    }

    fn backoff_duration(&self, backoff: Backoff) -> Duration {
        match backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Poll => self.config.poll_interval,
            Backoff::Store => self.config.store_backoff,
            Backoff::Classifier => self.config.classifier_backoff,
        }
    }

    fn next_reconnect_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.config.reconnect_max)
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            error!(tag = delivery.tag, error = %e, "Failed to ack moderation message");
        }
    }

    async fn nack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.nack(delivery, true).await {
            error!(tag = delivery.tag, error = %e, "Failed to nack moderation message");
        }
    }

    async fn dead_letter(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.nack(delivery, false).await {
            error!(tag = delivery.tag, error = %e, "Failed to terminate moderation message");
        }
    }
}

/// Returns `false` if cancelled before the duration elapsed.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// ============================================================================
// TESTS
// ============================================================================
