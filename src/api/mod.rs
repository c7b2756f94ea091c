//! HTTP API for the classification service
//!
//! Provides:
//! - Training and classification endpoints
//! - Feedback and labeling endpoints
//! - Per-owner stats, reset, and persistence introspection
//! - Health check

pub mod server;

pub use server::{ApiError, ApiServer};
