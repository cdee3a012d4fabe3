//! Device state caching and poll scheduling.
//!
//! This module provides the `DeviceStateCache`, which keeps the last
//! fetched value of every property of every managed device and turns
//! fresh fetches into change events, and the `Debouncer` that coalesces
//! bursts of refresh triggers into a single fetch.

pub mod debounce;
pub mod manager;

pub use debounce::Debouncer;
pub use manager::DeviceStateCache;
