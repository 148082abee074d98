//! Cross-module solver scenarios and invariant checks.

pub mod invariants;
pub mod scenarios;
