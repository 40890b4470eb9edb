// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "leveling/score_store.rs"]
pub mod leveling;
