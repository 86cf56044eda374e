// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

pub mod database;

#[path = "ai/mod.rs"]
pub mod ai;

#[path = "moderation/mod.rs"]
pub mod moderation;
