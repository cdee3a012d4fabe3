//! Authentication module for the provider account.
//!
//! This module provides:
//! - `CredentialStore`: the two persisted token files (primary and OAuth)
//! - `SessionManager`: login state machine with single-flight renewal
//! - `LoginMethod`: password or OAuth-code login, resolved once from config

pub mod credentials;
pub mod session;

pub use credentials::CredentialStore;
pub use session::{
    LoginCredentials, LoginMethod, Session, SessionManager, SessionSource, SessionStatus,
};
