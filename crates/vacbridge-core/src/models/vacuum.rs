//! Robot vacuum vocabulary: property names and typed modes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider property names. `GET_*` are read, `SET_*` are written.
pub mod property {
    pub const DOCKED_STATUS: &str = "GET_Docked_Status";
    pub const CHARGING_STATUS: &str = "GET_Charging_Status";
    pub const OPERATING_MODE: &str = "GET_Operating_Mode";
    pub const POWER_MODE: &str = "GET_Power_Mode";
    pub const BATTERY_CAPACITY: &str = "GET_Battery_Capacity";
    pub const ERROR_CODE: &str = "GET_Error_Code";

    pub const SET_OPERATING_MODE: &str = "SET_Operating_Mode";
    pub const SET_POWER_MODE: &str = "SET_Power_Mode";

    /// Everything polled on each cycle.
    pub const POLLED: &[&str] = &[
        DOCKED_STATUS,
        CHARGING_STATUS,
        OPERATING_MODE,
        POWER_MODE,
        BATTERY_CAPACITY,
        ERROR_CODE,
    ];

    /// The read property a write lands on.
    pub fn read_counterpart(set_name: &str) -> Option<&'static str> {
        match set_name {
            SET_OPERATING_MODE => Some(OPERATING_MODE),
            SET_POWER_MODE => Some(POWER_MODE),
            _ => None,
        }
    }
}

/// Interpret a property value as an integer.
///
/// The provider reports integers, but booleans and numeric strings show
/// up on some firmware.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Stop,
    Pause,
    Start,
    Return,
}

impl OperatingMode {
    pub fn code(self) -> i64 {
        match self {
            OperatingMode::Stop => 0,
            OperatingMode::Pause => 1,
            OperatingMode::Start => 2,
            OperatingMode::Return => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(OperatingMode::Stop),
            1 => Some(OperatingMode::Pause),
            2 => Some(OperatingMode::Start),
            3 => Some(OperatingMode::Return),
            _ => None,
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        value_as_i64(value).and_then(Self::from_code)
    }

    /// Whether the vacuum is out doing something.
    pub fn is_active(self) -> bool {
        matches!(self, OperatingMode::Start | OperatingMode::Pause)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    Eco,
    Normal,
    Max,
}

impl PowerMode {
    pub fn code(self) -> i64 {
        match self {
            PowerMode::Normal => 0,
            PowerMode::Eco => 1,
            PowerMode::Max => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PowerMode::Normal),
            1 => Some(PowerMode::Eco),
            2 => Some(PowerMode::Max),
            _ => None,
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        value_as_i64(value).and_then(Self::from_code)
    }
}
