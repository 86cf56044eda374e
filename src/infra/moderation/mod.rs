// Moderation infrastructure - storage and broker bindings for the pipeline.

pub mod nats_queue;
pub mod sqlite_content_store;
pub mod sqlite_job_store;

#[cfg(test)]
pub mod in_memory;

pub use nats_queue::{NatsQueue, NatsQueueConfig};
pub use sqlite_content_store::SqliteContentStore;
pub use sqlite_job_store::SqliteJobStore;
