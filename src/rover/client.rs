//! Rover client
//!
//! High-level interface to the Renogy Rover register map

use std::io::{Read, Write};

use super::modbus::ModbusRtu;
use super::types::ChargingState;
use crate::errors::RoverError;

const REG_PRODUCT_MODEL: u16 = 0x000c;
const REG_SOFTWARE_VERSION: u16 = 0x0014;
const REG_HARDWARE_VERSION: u16 = 0x0016;
const REG_SERIAL_NUMBER: u16 = 0x0018;
const REG_BATTERY_VOLTAGE: u16 = 0x0101;
const REG_TEMPERATURES: u16 = 0x0103;
const REG_SOLAR_VOLTAGE: u16 = 0x0107;
const REG_SOLAR_CURRENT: u16 = 0x0108;
const REG_CHARGING_POWER: u16 = 0x0109;
const REG_MAX_CHARGING_POWER_TODAY: u16 = 0x010f;
const REG_POWER_GENERATION_TODAY: u16 = 0x0113;
const REG_CHARGING_STATE: u16 = 0x0120;

/// Readings the bridge needs from a solar charge controller.
///
/// Every read is independent and may fail on its own.
pub trait ChargeController {
    fn product_model(&mut self) -> Result<String, RoverError>;
    fn serial_number(&mut self) -> Result<String, RoverError>;
    fn software_version(&mut self) -> Result<String, RoverError>;
    fn hardware_version(&mut self) -> Result<String, RoverError>;

    /// PV input voltage in V
    fn solar_voltage(&mut self) -> Result<f64, RoverError>;
    /// PV input current in A
    fn solar_current(&mut self) -> Result<f64, RoverError>;
    /// Battery voltage in V
    fn battery_voltage(&mut self) -> Result<f64, RoverError>;
    /// Charging power in W
    fn charging_power(&mut self) -> Result<f64, RoverError>;
    /// Battery temperature in °C
    fn battery_temperature(&mut self) -> Result<f64, RoverError>;
    /// Energy generated today in Wh
    fn power_generation_today(&mut self) -> Result<f64, RoverError>;
    /// Peak charging power today in W
    fn max_charging_power_today(&mut self) -> Result<f64, RoverError>;
    fn charging_state(&mut self) -> Result<ChargingState, RoverError>;
}

/// Renogy Rover MPPT controller reached over Modbus RTU
pub struct Rover<T> {
    master: ModbusRtu<T>,
}

/// Decode a sign-magnitude byte (bit 7 is the sign)
fn signed_magnitude(byte: u8) -> f64 {
    let magnitude = f64::from(byte & 0x7f);
    if byte & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn version_string(registers: &[u16]) -> String {
    let [_, major] = registers[0].to_be_bytes();
    let [minor, patch] = registers[1].to_be_bytes();
    format!("V{}.{}.{}", major, minor, patch)
}

impl<T: Read + Write> Rover<T> {
    pub fn new(transport: T, address: u8) -> Self {
        Self {
            master: ModbusRtu::new(transport, address),
        }
    }

    pub fn transport(&self) -> &T {
        self.master.transport()
    }

    fn registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, RoverError> {
        let registers = self.master.read_holding_registers(address, count)?;
        if registers.len() != usize::from(count) {
            return Err(RoverError::InvalidValue {
                address,
                reason: format!("expected {} registers, got {}", count, registers.len()),
            });
        }
        Ok(registers)
    }

    fn register(&mut self, address: u16) -> Result<u16, RoverError> {
        Ok(self.registers(address, 1)?[0])
    }

    fn scaled(&mut self, address: u16, divisor: f64) -> Result<f64, RoverError> {
        Ok(f64::from(self.register(address)?) / divisor)
    }
}

impl<T: Read + Write> ChargeController for Rover<T> {
    fn product_model(&mut self) -> Result<String, RoverError> {
        let registers = self.registers(REG_PRODUCT_MODEL, 8)?;
        let bytes: Vec<u8> = registers.iter().flat_map(|r| r.to_be_bytes()).collect();
        let model = String::from_utf8(bytes).map_err(|e| RoverError::InvalidValue {
            address: REG_PRODUCT_MODEL,
            reason: e.to_string(),
        })?;
        Ok(model
            .trim_matches(|c: char| c.is_whitespace() || c == '\0')
            .to_string())
    }

    fn serial_number(&mut self) -> Result<String, RoverError> {
        let registers = self.registers(REG_SERIAL_NUMBER, 2)?;
        let serial = (u32::from(registers[0]) << 16) | u32::from(registers[1]);
        Ok(serial.to_string())
    }

    fn software_version(&mut self) -> Result<String, RoverError> {
        let registers = self.registers(REG_SOFTWARE_VERSION, 2)?;
        Ok(version_string(&registers))
    }

    fn hardware_version(&mut self) -> Result<String, RoverError> {
        let registers = self.registers(REG_HARDWARE_VERSION, 2)?;
        Ok(version_string(&registers))
    }

    fn solar_voltage(&mut self) -> Result<f64, RoverError> {
        self.scaled(REG_SOLAR_VOLTAGE, 10.0)
    }

    fn solar_current(&mut self) -> Result<f64, RoverError> {
        self.scaled(REG_SOLAR_CURRENT, 100.0)
    }

    fn battery_voltage(&mut self) -> Result<f64, RoverError> {
        self.scaled(REG_BATTERY_VOLTAGE, 10.0)
    }

    fn charging_power(&mut self) -> Result<f64, RoverError> {
        self.scaled(REG_CHARGING_POWER, 1.0)
    }

    fn battery_temperature(&mut self) -> Result<f64, RoverError> {
        // High byte is the controller temperature, low byte the battery
        let [_, battery] = self.register(REG_TEMPERATURES)?.to_be_bytes();
        Ok(signed_magnitude(battery))
    }

    fn power_generation_today(&mut self) -> Result<f64, RoverError> {
        self.scaled(REG_POWER_GENERATION_TODAY, 1.0)
    }

    fn max_charging_power_today(&mut self) -> Result<f64, RoverError> {
        self.scaled(REG_MAX_CHARGING_POWER_TODAY, 1.0)
    }

    fn charging_state(&mut self) -> Result<ChargingState, RoverError> {
        let [_, state] = self.register(REG_CHARGING_STATE)?.to_be_bytes();
        ChargingState::try_from(state)
    }
}
