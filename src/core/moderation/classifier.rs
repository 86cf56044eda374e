// Review classifier - turns free text into a moderation verdict via an AiProvider.
//
// The model is asked for strict JSON, but output is treated as untrusted:
// `extract_verdict` is the only place that interprets it and it never fails.

use super::moderation_models::{ModerationLevel, ModerationVerdict};
use crate::core::ai::{AiConfig, AiError, AiMessage, AiProvider};
use std::collections::BTreeSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const MODERATION_SYSTEM_PROMPT: &str = r#"You moderate feedback that dancers leave about each other and about dance events.
Reply with ONLY a JSON object, no markdown, in exactly this shape:
{"level": "Green" | "Yellow" | "Red", "reason": "<at most 200 characters>", "categories": ["<tag>", ...]}

Rules:
- Green: acceptable. Polite but negative or critical feedback is Green (e.g. "leads too hard", "was often off the beat", "event started late").
- Yellow: borderline. Borderline rudeness, mild profanity, remarks about personal hygiene stated as fact.
- Red: unacceptable. Direct insults, slurs, harassment, sexual remarks about a person, threats.
Judge the tone, not the opinion. Use short lowercase tags such as "insult", "profanity", "hygiene", "harassment", "threat"."#;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Provider(#[from] AiError),

    #[error("classification cancelled")]
    Cancelled,
}

/// Outcome of reading model output.
#[derive(Debug, Clone, PartialEq)]
pub enum VerdictExtraction {
    Parsed(ModerationVerdict),
    Fallback(ModerationVerdict),
}

impl VerdictExtraction {
    pub fn is_fallback(&self) -> bool {
        matches!(self, VerdictExtraction::Fallback(_))
    }

    pub fn into_verdict(self) -> ModerationVerdict {
        match self {
            VerdictExtraction::Parsed(verdict) | VerdictExtraction::Fallback(verdict) => verdict,
        }
    }
}

/// Pull a verdict out of raw model text.
///
/// Only the slice between the first `{` and the last `}` is parsed, so
/// reasoning or markdown around the object is ignored. Missing `level` or
/// unparseable JSON yields the fallback verdict; unknown levels become Yellow.
pub fn extract_verdict(raw: &str) -> VerdictExtraction {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return VerdictExtraction::Fallback(ModerationVerdict::fallback());
    };
    if end < start {
        return VerdictExtraction::Fallback(ModerationVerdict::fallback());
    }

    let value: serde_json::Value = match serde_json::from_str(&raw[start..=end]) {
        Ok(value) => value,
        Err(_) => return VerdictExtraction::Fallback(ModerationVerdict::fallback()),
    };

    let Some(level) = value.get("level").and_then(|v| v.as_str()) else {
        return VerdictExtraction::Fallback(ModerationVerdict::fallback());
    };
    let level = ModerationLevel::from_classifier_label(level);

    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(level.as_str());
    let reason: String = reason
        .chars()
        .take(ModerationVerdict::MAX_REASON_CHARS)
        .collect();

    let categories: BTreeSet<String> = value
        .get("categories")
        .and_then(|v| v.as_array())
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t.as_str())
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    VerdictExtraction::Parsed(ModerationVerdict {
        level,
        reason,
        categories,
    })
}

pub struct ModerationClassifier<P: AiProvider> {
    provider: P,
    config: AiConfig,
}

impl<P: AiProvider> ModerationClassifier<P> {
    pub fn new(provider: P, config: AiConfig) -> Self {
        Self { provider, config }
    }

    /// Classify one piece of text.
    ///
    /// Transport errors and timeouts are returned so the caller can retry;
    /// bad model output is not an error. Cancelling `cancel` aborts the
    /// in-flight request.
    pub async fn classify(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ModerationVerdict, ClassifierError> {
        let messages = [
            AiMessage::system(MODERATION_SYSTEM_PROMPT),
            AiMessage::user(text),
        ];

        let raw = tokio::select! {
            _ = cancel.cancelled() => return Err(ClassifierError::Cancelled),
            result = self.provider.chat_complete(&messages, &self.config) => result?,
        };

        let extraction = extract_verdict(&raw);
        if extraction.is_fallback() {
            tracing::warn!(
                model = %self.config.model,
                raw_len = raw.len(),
                "Classifier output had no usable verdict, using fallback"
            );
        }

        Ok(extraction.into_verdict())
    }
}
