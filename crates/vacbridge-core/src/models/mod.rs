//! Data models for the provider's accounts and devices.
//!
//! - `PrimaryToken`, `OAuthToken`, `CredentialRecord`: persisted credentials
//! - `DeviceIdentity`, `DeviceSnapshot`, `PropertyValue`: cached device state
//! - `ChangeEvent`: one observed property transition
//! - `OperatingMode`, `PowerMode`, `property`: vacuum vocabulary

pub mod device;
pub mod token;
pub mod vacuum;

pub use device::{ChangeEvent, DeviceIdentity, DeviceSnapshot, PropertyValue};
pub use token::{CredentialRecord, OAuthToken, PrimaryToken, TokenKind};
pub use vacuum::{property, OperatingMode, PowerMode};
