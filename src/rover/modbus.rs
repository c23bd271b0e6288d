//! Minimal Modbus RTU master
//!
//! Only function 0x03 (read holding registers) is needed to talk to a Rover.

use std::io::{Read, Write};

use tracing::trace;

use crate::errors::RoverError;

const READ_HOLDING_REGISTERS: u8 = 0x03;
const EXCEPTION_FLAG: u8 = 0x80;

/// Largest register count allowed in a single 0x03 request
pub const MAX_REGISTERS: u16 = 125;

/// CRC16/MODBUS over `data`
pub fn crc(data: &[u8]) -> u16 {
    crc16::State::<crc16::MODBUS>::calculate(data)
}

fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

fn check_crc(frame: &[u8]) -> Result<(), RoverError> {
    let (body, tail) = frame.split_at(frame.len() - 2);
    let actual = u16::from_le_bytes([tail[0], tail[1]]);
    let expected = crc(body);
    if actual != expected {
        return Err(RoverError::CrcMismatch { expected, actual });
    }
    Ok(())
}

/// Build a read holding registers request frame
pub fn read_request(slave: u8, address: u16, count: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(slave);
    frame.push(READ_HOLDING_REGISTERS);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(&mut frame);
    frame
}

/// Modbus RTU master bound to one slave over any byte transport
pub struct ModbusRtu<T> {
    transport: T,
    slave: u8,
}

impl<T: Read + Write> ModbusRtu<T> {
    pub fn new(transport: T, slave: u8) -> Self {
        Self { transport, slave }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read `count` consecutive holding registers starting at `address`
    pub fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, RoverError> {
        if count == 0 || count > MAX_REGISTERS {
            return Err(RoverError::InvalidValue {
                address,
                reason: format!("register count {} out of range", count),
            });
        }

        let request = read_request(self.slave, address, count);
        trace!("Modbus request: {:02x?}", request);
        self.transport.write_all(&request)?;
        self.transport.flush()?;

        let mut header = [0u8; 3];
        self.transport.read_exact(&mut header)?;

        if header[0] != self.slave {
            return Err(RoverError::UnexpectedResponse(format!(
                "reply from slave {} while talking to {}",
                header[0], self.slave
            )));
        }

        if header[1] == READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
            let mut rest = [0u8; 2];
            self.transport.read_exact(&mut rest)?;
            let frame = [header[0], header[1], header[2], rest[0], rest[1]];
            check_crc(&frame)?;
            return Err(RoverError::Exception {
                function: READ_HOLDING_REGISTERS,
                code: header[2],
            });
        }

        if header[1] != READ_HOLDING_REGISTERS {
            return Err(RoverError::UnexpectedResponse(format!(
                "function code {:#04x}",
                header[1]
            )));
        }

        let byte_count = usize::from(header[2]);
        if byte_count != usize::from(count) * 2 {
            return Err(RoverError::UnexpectedResponse(format!(
                "expected {} data bytes, got {}",
                usize::from(count) * 2,
                byte_count
            )));
        }

        let mut frame = header.to_vec();
        frame.resize(3 + byte_count + 2, 0);
        self.transport.read_exact(&mut frame[3..])?;
        trace!("Modbus response: {:02x?}", frame);
        check_crc(&frame)?;

        Ok(frame[3..3 + byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }
}
