//! Stage services and pipeline orchestration for auto-mend.
//!
//! The five stage services (analyzer, planner, modifier, tester, publisher)
//! share one interface and are composed exclusively by the [`orchestrator`],
//! which owns retry, human-handoff, and abort policy.

pub mod browser;
pub mod orchestrator;
pub mod prompts;
pub mod publish;
pub mod stages;

pub use orchestrator::Orchestrator;
