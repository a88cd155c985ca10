//! Core data model, configuration, and git workspace for auto-mend.
//!
//! Everything the other crates share lives here: the persisted record types
//! (feedback, tasks, stages, token usage, breaker events), ID and branch-name
//! generation, environment-driven configuration, and the scoped git workspace
//! with its snapshot ring.

pub mod config;
pub mod ids;
pub mod types;
pub mod workspace;
