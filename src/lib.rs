//! Adaptive load generation against signed inference endpoints.
//!
//! The [`loadtest`] module holds the engine: load shapes, request signing,
//! virtual users, population scheduling, metrics and reporting.

pub mod loadtest;
