// Application configuration loaded from environment variables.
//
// Every setting has a default so a bare `.env` (or none) starts a worker
// against local SQLite, NATS and an OpenAI-compatible model server.

use crate::core::ai::AiConfig;
use crate::core::moderation::WorkerConfig;
use crate::infra::moderation::NatsQueueConfig;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub ai: AiConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub nats: NatsQueueConfig,
    pub worker: WorkerConfig,
    pub classifier: ClassifierSettings,
}

impl AppConfig {
    /// Load configuration from the process environment (after `.env`).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let worker_defaults = WorkerConfig::default();
        let nats_defaults = NatsQueueConfig::default();

        Self {
            database_url: env.string("DATABASE_URL", "sqlite://data/moderation.db"),
            nats: NatsQueueConfig {
                url: env.string("NATS_URL", &nats_defaults.url),
                user: env.optional("NATS_USER"),
                password: env.optional("NATS_PASSWORD"),
                stream: env.string("MODERATION_STREAM", &nats_defaults.stream),
                subject: env.string("MODERATION_SUBJECT", &nats_defaults.subject),
                consumer: env.string("MODERATION_CONSUMER", &nats_defaults.consumer),
                ack_wait: Duration::from_secs(
                    env.parsed("MODERATION_ACK_WAIT_SECS", nats_defaults.ack_wait.as_secs()),
                ),
            },
            worker: WorkerConfig {
                poll_interval: env.millis(
                    "MODERATION_POLL_INTERVAL_MS",
                    worker_defaults.poll_interval,
                ),
                poll_timeout: env.millis("MODERATION_POLL_TIMEOUT_MS", worker_defaults.poll_timeout),
                classifier_backoff: env.millis(
                    "MODERATION_CLASSIFIER_BACKOFF_MS",
                    worker_defaults.classifier_backoff,
                ),
                store_backoff: env.millis(
                    "MODERATION_STORE_BACKOFF_MS",
                    worker_defaults.store_backoff,
                ),
                reconnect_max: env.millis(
                    "MODERATION_RECONNECT_MAX_MS",
                    worker_defaults.reconnect_max,
                ),
                max_attempts: env.parsed("MODERATION_MAX_ATTEMPTS", worker_defaults.max_attempts),
            },
            classifier: ClassifierSettings {
                base_url: env.string("CLASSIFIER_BASE_URL", "http://127.0.0.1:11434/v1"),
                api_key: env.optional("CLASSIFIER_API_KEY"),
                timeout: Duration::from_secs(env.parsed("CLASSIFIER_TIMEOUT_SECS", 30)),
                ai: AiConfig {
                    model: env.string("CLASSIFIER_MODEL", "llama3.1:8b"),
                    temperature: env.parsed("CLASSIFIER_TEMPERATURE", 0.0),
                    max_tokens: Some(env.parsed("CLASSIFIER_MAX_TOKENS", 300)),
                },
            },
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Display,
    {
        match self.optional(key) {
            None => default,
            Some(raw) => raw.parse::<T>().unwrap_or_else(|_| {
                tracing::warn!(
                    key,
                    value = %raw,
                    default = %default,
                    "Malformed configuration value, using default"
                );
                default
            }),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        Duration::from_millis(self.parsed(key, default.as_millis() as u64))
    }
}
