// Moderation domain models - data structures for the review screening pipeline.
//
// These are pure domain types with no database, HTTP or broker dependencies.
// The infra layer converts them to rows and wire messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Which kind of content a moderation job points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetType {
    Review,
    EventReview,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Review => "Review",
            TargetType::EventReview => "EventReview",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "review" => Ok(TargetType::Review),
            "eventreview" => Ok(TargetType::EventReview),
            _ => Err(format!("unknown target type '{}'", s)),
        }
    }
}

/// A `{targetType, targetId}` reference to one piece of moderated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetRef {
    pub target_type: TargetType,
    pub target_id: i64,
}

impl TargetRef {
    pub fn new(target_type: TargetType, target_id: i64) -> Self {
        Self {
            target_type,
            target_id,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.target_type, self.target_id)
    }
}

/// The only thing that travels over the queue. No content payload: the worker
/// always re-reads live content so it never acts on a stale copy.
///
/// Wire format: `{"TargetType": "Review", "TargetId": 42}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueMessage {
    pub target_type: TargetType,
    pub target_id: i64,
}

impl QueueMessage {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn target(&self) -> TargetRef {
        TargetRef::new(self.target_type, self.target_id)
    }
}

impl From<TargetRef> for QueueMessage {
    fn from(target: TargetRef) -> Self {
        Self {
            target_type: target.target_type,
            target_id: target.target_id,
        }
    }
}

/// Lifecycle of one moderation attempt in the job ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Processing => "Processing",
            JobStatus::Done => "Done",
            JobStatus::Error => "Error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            _ => Err(format!("unknown job status '{}'", s)),
        }
    }
}

/// One row of the job ledger. Rows are never deleted; a requeue adds a new
/// row and the most recently created row for a target is the "current" one.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationJob {
    pub id: i64,
    pub target: TargetRef,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Traffic-light moderation level shown next to content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModerationLevel {
    #[default]
    Pending,
    Green,
    Yellow,
    Red,
}

impl ModerationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationLevel::Pending => "Pending",
            ModerationLevel::Green => "Green",
            ModerationLevel::Yellow => "Yellow",
            ModerationLevel::Red => "Red",
        }
    }

    /// Maps a free-form classifier label onto a concrete verdict level.
    /// Anything unrecognised (including "Pending") becomes Yellow.
    pub fn from_classifier_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "green" => ModerationLevel::Green,
            "red" => ModerationLevel::Red,
            _ => ModerationLevel::Yellow,
        }
    }
}

impl fmt::Display for ModerationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ModerationLevel::Pending),
            "green" => Ok(ModerationLevel::Green),
            "yellow" => Ok(ModerationLevel::Yellow),
            "red" => Ok(ModerationLevel::Red),
            _ => Err(format!("unknown moderation level '{}'", s)),
        }
    }
}

/// Who produced the current moderation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModerationSource {
    #[default]
    None,
    Llm,
    Manual,
}

impl ModerationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationSource::None => "None",
            ModerationSource::Llm => "LLM",
            ModerationSource::Manual => "Manual",
        }
    }
}

impl fmt::Display for ModerationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(ModerationSource::None),
            "llm" => Ok(ModerationSource::Llm),
            "manual" => Ok(ModerationSource::Manual),
            _ => Err(format!("unknown moderation source '{}'", s)),
        }
    }
}

/// Languages a moderation reason is shown in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    En,
    Ru,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::En, Language::Ru];

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
        }
    }
}

/// The moderation fields carried by every moderated record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModerationState {
    pub level: ModerationLevel,
    pub source: ModerationSource,
    pub moderated_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub reason_localized: BTreeMap<Language, String>,
}

/// A review or event review, reduced to what the pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeratableContent {
    pub target: TargetRef,
    pub text: String,
    pub moderation: ModerationState,
}

/// Classifier output. Consumed immediately by the applier, never stored as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationVerdict {
    pub level: ModerationLevel,
    pub reason: String,
    pub categories: BTreeSet<String>,
}

impl ModerationVerdict {
    pub const MAX_REASON_CHARS: usize = 200;
    pub const FALLBACK_REASON: &'static str = "fallback";

    /// The verdict used whenever the model output can't be trusted.
    pub fn fallback() -> Self {
        Self {
            level: ModerationLevel::Yellow,
            reason: Self::FALLBACK_REASON.to_string(),
            categories: BTreeSet::new(),
        }
    }
}

/// A human decision entered through the admin surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualOverride {
    pub level: ModerationLevel,
    pub reason: Option<String>,
    pub reason_localized: BTreeMap<Language, String>,
}
