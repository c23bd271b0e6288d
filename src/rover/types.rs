//! Data types for Rover responses

use crate::errors::RoverError;

/// Charging state as reported by the controller in register 0x0120
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChargingState {
    Deactivated,
    Activated,
    Mppt,
    Equalizing,
    Boost,
    Floating,
    CurrentLimiting,
}

impl ChargingState {
    /// Every state the controller can report, in register order
    pub const ALL: [ChargingState; 7] = [
        ChargingState::Deactivated,
        ChargingState::Activated,
        ChargingState::Mppt,
        ChargingState::Equalizing,
        ChargingState::Boost,
        ChargingState::Floating,
        ChargingState::CurrentLimiting,
    ];
}

impl TryFrom<u8> for ChargingState {
    type Error = RoverError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChargingState::Deactivated),
            1 => Ok(ChargingState::Activated),
            2 => Ok(ChargingState::Mppt),
            3 => Ok(ChargingState::Equalizing),
            4 => Ok(ChargingState::Boost),
            5 => Ok(ChargingState::Floating),
            6 => Ok(ChargingState::CurrentLimiting),
            other => Err(RoverError::UnknownChargingState(other)),
        }
    }
}

impl std::fmt::Display for ChargingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChargingState::Deactivated => "deactivated",
            ChargingState::Activated => "activated",
            ChargingState::Mppt => "mppt",
            ChargingState::Equalizing => "equalizing",
            ChargingState::Boost => "boost",
            ChargingState::Floating => "floating",
            ChargingState::CurrentLimiting => "current limiting",
        };
        write!(f, "{}", name)
    }
}
