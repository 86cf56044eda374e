// Core moderation module - the asynchronous review screening pipeline.
// Following the same pattern as the ai module: models, ports, services.

pub mod admin_service;
pub mod classifier;
pub mod moderation_models;
pub mod moderation_store;
pub mod producer;
pub mod queue;
pub mod verdict_applier;
pub mod worker;

pub use admin_service::{AdminError, ModerationAdminService};
pub use classifier::{ClassifierError, ModerationClassifier};
pub use moderation_models::*;
pub use moderation_store::{ContentStore, JobStore, StoreError};
pub use producer::{ModerationProducer, ProducerError};
pub use queue::{Delivery, QueueError, QueueTransport};
pub use worker::{ModerationWorker, WorkerConfig};
