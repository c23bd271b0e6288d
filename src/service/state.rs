//! Charging state translation
//!
//! The controller reports one charging state; the bus publishes it twice, as
//! an MPPT operation mode and as a charger state. Both tables are partial: a
//! state without an entry leaves the published value untouched.
//!
//! Entries match one exact charging state each; the register holds an
//! enumeration, not a bit set.

use crate::rover::ChargingState;

/// `/MppOperationMode` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum OperationMode {
    Off = 0,
    Limiting = 1,
    Tracking = 2,
}

/// `/State` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ChargerState {
    Off = 0,
    Fault = 2,
    Bulk = 3,
    Absorption = 4,
    Float = 5,
    Storage = 6,
    Equalize = 7,
    ExternalControl = 252,
}

impl OperationMode {
    pub fn from_charging_state(state: ChargingState) -> Option<Self> {
        match state {
            ChargingState::Deactivated => Some(OperationMode::Off),
            ChargingState::CurrentLimiting => Some(OperationMode::Limiting),
            ChargingState::Mppt => Some(OperationMode::Tracking),
            ChargingState::Activated
            | ChargingState::Equalizing
            | ChargingState::Boost
            | ChargingState::Floating => None,
        }
    }

    pub fn value(self) -> i64 {
        self as i64
    }
}

impl ChargerState {
    pub fn from_charging_state(state: ChargingState) -> Option<Self> {
        match state {
            ChargingState::Deactivated => Some(ChargerState::Off),
            ChargingState::Floating => Some(ChargerState::Float),
            ChargingState::Boost => Some(ChargerState::Bulk),
            ChargingState::Equalizing => Some(ChargerState::Equalize),
            ChargingState::Activated | ChargingState::Mppt | ChargingState::CurrentLimiting => {
                None
            }
        }
    }

    pub fn value(self) -> i64 {
        self as i64
    }
}
