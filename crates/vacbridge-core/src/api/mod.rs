//! REST client module for the provider's cloud services.
//!
//! This module provides the `ApiClient` for signing in and for reading and
//! writing device properties, plus `ApiError` and its coarse
//! `ErrorCategory` classification.
//!
//! The client never retries; retry policy belongs to the callers.

pub mod client;
pub mod endpoints;
pub mod error;

pub use client::ApiClient;
pub use endpoints::{Endpoints, Region};
pub use error::{ApiError, ErrorCategory};
