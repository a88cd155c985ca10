//! Admission control and lifecycle harness for auto-mend.
//!
//! The [`breaker`] module is the single policy point that rations external
//! model usage across concurrent tasks; [`shutdown`] provides the cooperative
//! shutdown signal every long-running component selects on.

pub mod breaker;
pub mod shutdown;

pub use breaker::{Admission, BreakerConfig, BreakerSink, NullSink, TokenBreaker};
pub use shutdown::ShutdownSignal;
