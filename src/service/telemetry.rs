//! Per-tick telemetry collection
//!
//! Each field is read independently. A failed read is logged with its field
//! name and the dependent paths are left out of the frame; nothing is ever
//! zero-filled.

use tracing::{error, warn};

use super::state::{ChargerState, OperationMode};
use crate::bus::{BusValue, Updates};
use crate::errors::RoverError;
use crate::rover::ChargeController;

pub const PV_VOLTAGE: &str = "/Pv/V";
pub const PV_CURRENT: &str = "/Pv/I";
pub const YIELD_POWER: &str = "/Yield/Power";
pub const DC_VOLTAGE: &str = "/Dc/0/Voltage";
pub const DC_CURRENT: &str = "/Dc/0/Current";
pub const TEMPERATURE_SENSE: &str = "/Link/TemperatureSense";
pub const DAILY_YIELD: &str = "/History/Daily/0/Yield";
pub const DAILY_MAX_POWER: &str = "/History/Daily/0/MaxPower";
pub const DAILY_PV_YIELD: &str = "/History/Daily/0/Pv/0/Yield";
pub const DAILY_PV_MAX_POWER: &str = "/History/Daily/0/Pv/0/MaxPower";
pub const MPP_OPERATION_MODE: &str = "/MppOperationMode";
pub const STATE: &str = "/State";

/// Every path a frame may contain
pub const TELEMETRY_PATHS: [&str; 12] = [
    PV_VOLTAGE,
    PV_CURRENT,
    YIELD_POWER,
    DC_VOLTAGE,
    DC_CURRENT,
    TEMPERATURE_SENSE,
    DAILY_YIELD,
    DAILY_MAX_POWER,
    DAILY_PV_YIELD,
    DAILY_PV_MAX_POWER,
    MPP_OPERATION_MODE,
    STATE,
];

/// Attempt a fallible read, logging the field name on failure
pub fn read_field<T>(field: &str, read: impl FnOnce() -> Result<T, RoverError>) -> Option<T> {
    match read() {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Error getting `{}` value from rover: {}", field, e);
            None
        }
    }
}

/// PV power in W
pub fn solar_power(voltage: Option<f64>, current: Option<f64>) -> Option<f64> {
    Some(voltage? * current?)
}

/// Battery charging current in A, undefined without a positive battery voltage
pub fn battery_current(power: Option<f64>, voltage: Option<f64>) -> Option<f64> {
    let voltage = voltage.filter(|v| *v > 0.0)?;
    Some(power? / voltage)
}

/// The daily yield register counts Wh while the bus expects kWh. The daily
/// max power register is already in W and is published as is.
fn kilowatt_hours(watt_hours: f64) -> f64 {
    watt_hours / 1000.0
}

/// The set of path updates computed in one tick
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TelemetryFrame {
    updates: Updates,
}

impl TelemetryFrame {
    /// Read the controller and compute every path whose inputs are available
    pub fn collect<D: ChargeController + ?Sized>(device: &mut D) -> Self {
        let solar_voltage = read_field("solar_voltage", || device.solar_voltage());
        let solar_current = read_field("solar_current", || device.solar_current());
        let battery_voltage = read_field("battery_voltage", || device.battery_voltage());
        let charging_power = read_field("charging_power", || device.charging_power());
        let battery_temperature =
            read_field("battery_temperature", || device.battery_temperature());
        let daily_yield = read_field("power_generation_today", || {
            device.power_generation_today()
        })
        .map(kilowatt_hours);
        let daily_max_power = read_field("max_charging_power_today", || {
            device.max_charging_power_today()
        });
        let charging_state = read_field("charging_state", || device.charging_state());

        let mut frame = Self::default();
        frame.insert(PV_VOLTAGE, solar_voltage);
        frame.insert(PV_CURRENT, solar_current);
        frame.insert(YIELD_POWER, solar_power(solar_voltage, solar_current));
        frame.insert(DC_VOLTAGE, battery_voltage);
        frame.insert(DC_CURRENT, battery_current(charging_power, battery_voltage));
        frame.insert(TEMPERATURE_SENSE, battery_temperature);
        frame.insert(DAILY_YIELD, daily_yield);
        frame.insert(DAILY_MAX_POWER, daily_max_power);
        frame.insert(DAILY_PV_YIELD, daily_yield);
        frame.insert(DAILY_PV_MAX_POWER, daily_max_power);

        if let Some(state) = charging_state {
            match OperationMode::from_charging_state(state) {
                Some(mode) => frame.insert(MPP_OPERATION_MODE, Some(mode.value())),
                None => warn!("Unknown operation mode for charging state: {}", state),
            }
            frame.insert(
                STATE,
                ChargerState::from_charging_state(state).map(ChargerState::value),
            );
        }

        frame
    }

    fn insert<V: Into<BusValue>>(&mut self, path: &'static str, value: Option<V>) {
        if let Some(value) = value {
            self.updates.insert(path, value.into());
        }
    }

    pub fn get(&self, path: &str) -> Option<&BusValue> {
        self.updates.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.updates.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn updates(&self) -> &Updates {
        &self.updates
    }
}
