//! Record store for auto-mend.
//!
//! A facade over an in-memory document with an optional file-backed mode.
//! Owns the Feedback, Task, Token-usage, and Breaker-event records; every
//! reader gets copies, every list is bounded, and aggregates are computed on
//! read over the filtered slice.

pub mod store;

pub use store::{
    BreakerEventQuery, FeedbackQuery, Page, Store, StoreError, TaskQuery, TokenUsageQuery,
    UsageAggregates,
};
