//! Core of vacbridge: the session and state-synchronization engine that
//! sits between a cloud-connected robot vacuum and a smart-home bridge.
//!
//! - `auth`: persisted tokens and the login/refresh state machine
//! - `api`: stateless request executor for the provider's services
//! - `cache`: per-device property cache with debounced polling
//! - `device`: typed `Vacuum` reads and commands
//! - `bridge`: the owned context a host initializes and shuts down

pub mod api;
pub mod auth;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod models;

pub use bridge::Bridge;
pub use config::Config;
pub use device::Vacuum;
pub use error::{Error, Result};
