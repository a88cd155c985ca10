//! Logging setup and request correlation for auto-mend.

pub mod logging;
pub mod tracing_setup;
