// In-memory implementations of the moderation ports, used by tests.
//
// They follow the same contracts as the SQLite stores and the NATS queue,
// plus a few switches for injecting failures.

use crate::core::moderation::{
    ContentStore, Delivery, JobStatus, JobStore, ModeratableContent, ModerationJob,
    ModerationState, QueueError, QueueMessage, QueueTransport, StoreError, TargetRef,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// JOB LEDGER
// ============================================================================

pub struct InMemoryJobStore {
    jobs: DashMap<i64, ModerationJob>,
    next_id: AtomicI64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn get(&self, job_id: i64) -> Option<ModerationJob> {
        self.jobs.get(&job_id).map(|j| j.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    fn newest_first(mut jobs: Vec<ModerationJob>) -> Vec<ModerationJob> {
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs
    }

    fn update<F: FnOnce(&mut ModerationJob)>(&self, job_id: i64, f: F) -> Result<(), StoreError> {
        let mut job = self.jobs.get_mut(&job_id).ok_or(StoreError::NotFound)?;
        f(&mut *job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, target: TargetRef) -> Result<ModerationJob, StoreError> {
        let now = Utc::now();
        let job = ModerationJob {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            target,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn latest_job(&self, target: TargetRef) -> Result<Option<ModerationJob>, StoreError> {
        Ok(self.jobs_for_target(target).await?.into_iter().next())
    }

    async fn mark_processing(&self, job_id: i64) -> Result<(), StoreError> {
        self.update(job_id, |job| job.status = JobStatus::Processing)
    }

    async fn mark_done(&self, job_id: i64) -> Result<(), StoreError> {
        self.update(job_id, |job| job.status = JobStatus::Done)
    }

    async fn mark_error(&self, job_id: i64, error: &str) -> Result<u32, StoreError> {
        let mut attempts = 0;
        self.update(job_id, |job| {
            job.status = JobStatus::Error;
            job.attempts += 1;
            job.last_error = Some(error.to_string());
            attempts = job.attempts;
        })?;
        Ok(attempts)
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<ModerationJob>, StoreError> {
        let jobs = self
            .jobs
            .iter()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .map(|j| j.clone())
            .collect();
        Ok(Self::newest_first(jobs)
            .into_iter()
            .take(limit as usize)
            .collect())
    }

    async fn jobs_for_target(&self, target: TargetRef) -> Result<Vec<ModerationJob>, StoreError> {
        let jobs = self
            .jobs
            .iter()
            .filter(|j| j.target == target)
            .map(|j| j.clone())
            .collect();
        Ok(Self::newest_first(jobs))
    }
}

// ============================================================================
// CONTENT
// ============================================================================

pub struct InMemoryContentStore {
    content: DashMap<TargetRef, ModeratableContent>,
    fail_saves: AtomicBool,
    corrupt_loads: AtomicBool,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            content: DashMap::new(),
            fail_saves: AtomicBool::new(false),
            corrupt_loads: AtomicBool::new(false),
        }
    }

    /// Add a freshly created (Pending) record.
    pub fn insert(&self, target: TargetRef, text: &str) {
        self.content.insert(
            target,
            ModeratableContent {
                target,
                text: text.to_string(),
                moderation: ModerationState::default(),
            },
        );
    }

    pub fn remove(&self, target: TargetRef) {
        self.content.remove(&target);
    }

    pub fn get(&self, target: TargetRef) -> Option<ModeratableContent> {
        self.content.get(&target).map(|c| c.clone())
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make every load report an unreadable record.
    pub fn set_corrupt_loads(&self, corrupt: bool) {
        self.corrupt_loads.store(corrupt, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn load_content(
        &self,
        target: TargetRef,
    ) -> Result<Option<ModeratableContent>, StoreError> {
        if self.corrupt_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt(
                "unknown moderation level 'Purple'".to_string(),
            ));
        }
        Ok(self.get(target))
    }

    async fn save_moderation(
        &self,
        target: TargetRef,
        state: &ModerationState,
    ) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Database("disk I/O error".to_string()));
        }
        let mut content = self.content.get_mut(&target).ok_or(StoreError::NotFound)?;
        content.moderation = state.clone();
        Ok(())
    }
}

// ============================================================================
// QUEUE
// ============================================================================

/// Single-process queue with broker-like ack/nack bookkeeping.
pub struct InMemoryQueue {
    ready: Mutex<VecDeque<Delivery>>,
    published: Mutex<Vec<QueueMessage>>,
    acked: Mutex<Vec<u64>>,
    nacked: Mutex<Vec<(u64, bool)>>,
    connected: AtomicBool,
    failing_connects: AtomicU32,
    connects: AtomicU32,
    next_tag: AtomicU64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
            acked: Mutex::new(Vec::new()),
            nacked: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            failing_connects: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            next_tag: AtomicU64::new(1),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Successful (re)connects, each of which redeclares topology.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Enqueue a raw payload as if another producer had published it.
    pub fn push_raw(&self, payload: &[u8]) -> u64 {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        self.lock(&self.ready).push_back(Delivery {
            tag,
            payload: payload.to_vec(),
            redelivered: false,
        });
        tag
    }

    pub fn published(&self) -> Vec<QueueMessage> {
        self.lock(&self.published).clone()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.lock(&self.acked).clone()
    }

    pub fn nacked(&self) -> Vec<(u64, bool)> {
        self.lock(&self.nacked).clone()
    }

    pub fn pending(&self) -> usize {
        self.lock(&self.ready).len()
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn ensure_connected(&self) -> Result<(), QueueError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(QueueError::Broker("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(QueueError::NotConnected);
        }
        let payload = message.to_bytes()?;
        self.lock(&self.published).push(*message);
        self.push_raw(&payload);
        Ok(())
    }

    async fn consume_one(&self, _timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(QueueError::NotConnected);
        }
        Ok(self.lock(&self.ready).pop_front())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.lock(&self.acked).push(delivery.tag);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        self.lock(&self.nacked).push((delivery.tag, requeue));
        if requeue {
            self.lock(&self.ready).push_back(Delivery {
                redelivered: true,
                ..delivery.clone()
            });
        }
        Ok(())
    }
}
