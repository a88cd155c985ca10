//! Daemon wiring for auto-mend.

pub mod daemon;

pub use daemon::run;
