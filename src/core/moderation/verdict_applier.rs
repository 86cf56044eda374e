// Verdict applier - maps a verdict onto a record's moderation fields.
//
// Pure functions: the caller supplies "now" and persists the result.
// Every application overwrites the previous moderation state (last write wins).

use super::moderation_models::{
    Language, ManualOverride, ModeratableContent, ModerationSource, ModerationState,
    ModerationVerdict,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Apply an automatic classifier verdict.
pub fn apply_llm_verdict(
    content: &ModeratableContent,
    verdict: &ModerationVerdict,
    now: DateTime<Utc>,
) -> ModeratableContent {
    // The model answers in English; older translations must not outlive it.
    let mut reason_localized = BTreeMap::new();
    reason_localized.insert(Language::En, verdict.reason.clone());

    ModeratableContent {
        moderation: ModerationState {
            level: verdict.level,
            source: ModerationSource::Llm,
            moderated_at: Some(now),
            reason: verdict.reason.clone(),
            reason_localized,
        },
        ..content.clone()
    }
}

/// Apply a human decision.
///
/// Any language without its own value gets the main reason, so a localized
/// reason is always present after moderation.
pub fn apply_manual_override(
    content: &ModeratableContent,
    decision: &ManualOverride,
    now: DateTime<Utc>,
) -> ModeratableContent {
    let reason = decision
        .reason
        .clone()
        .or_else(|| decision.reason_localized.get(&Language::En).cloned())
        .or_else(|| decision.reason_localized.values().next().cloned())
        .unwrap_or_default();

    // Languages without their own translation fall back to the main reason.
    let mut reason_localized = decision.reason_localized.clone();
    if !reason.is_empty() {
        for lang in Language::ALL {
            reason_localized
                .entry(lang)
                .or_insert_with(|| reason.clone());
        }
    }

    ModeratableContent {
        moderation: ModerationState {
            level: decision.level,
            source: ModerationSource::Manual,
            moderated_at: Some(now),
            reason,
            reason_localized,
        },
        ..content.clone()
    }
}
