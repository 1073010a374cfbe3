//! Load generation engine for inference endpoints.
//!
//! Provides load shapes, SigV4 request signing, virtual users, a
//! rate-limited population scheduler, HdrHistogram-based metrics, typed TOML
//! configuration and JSON/CSV/terminal reporting.

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod report;
pub mod scheduler;
pub mod shape;
pub mod signer;
pub mod summary;
pub mod target;
pub mod vu;
