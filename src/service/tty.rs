//! Serial device path handling
//!
//! Only USB serial adapters are supported: `/dev/ttyUSB<n>` (or a bare
//! `ttyUSB<n>`) maps to device instance `288 + n`.

use crate::errors::ServiceError;
use crate::info::PRODUCT_NAME;

const DEVICE_DIR: &str = "/dev";
const SERVICE_PREFIX: &str = "com.victronenergy.solarcharger";
const USB_INSTANCE_BASE: u32 = 288;

/// Prefix a bare device name with the device directory
pub fn device_path(device: &str) -> String {
    let device = device.trim();
    if device.starts_with('/') {
        device.to_string()
    } else {
        format!("{}/{}", DEVICE_DIR, device)
    }
}

/// Bus service name for a tty, e.g. `/dev/ttyUSB0` -> `com.victronenergy.solarcharger.ttyUSB0`
pub fn service_name(tty: &str) -> String {
    let name = tty.rsplit('/').next().unwrap_or(tty);
    format!("{}.{}", SERVICE_PREFIX, name)
}

/// A parsed `ttyUSB<n>` device path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbTty {
    path: String,
    number: u32,
    instance: u32,
}

impl UsbTty {
    pub fn parse(tty: &str) -> Result<Self, ServiceError> {
        let unsupported = || ServiceError::UnsupportedTty(tty.to_string());

        let lower = tty.to_lowercase();
        let mut parts = lower.split("ttyusb");
        let (Some(_), Some(digits), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(unsupported());
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unsupported());
        }
        let number: u32 = digits.parse().map_err(|_| unsupported())?;
        let instance = USB_INSTANCE_BASE
            .checked_add(number)
            .ok_or_else(unsupported)?;

        Ok(Self {
            path: tty.to_string(),
            number,
            instance,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn usb_number(&self) -> u32 {
        self.number
    }

    pub fn device_instance(&self) -> u32 {
        self.instance
    }

    /// Human readable connection description for `/Mgmt/Connection`
    pub fn connection(&self) -> String {
        format!("{} on USB{}", PRODUCT_NAME, self.number)
    }

    pub fn service_name(&self) -> String {
        service_name(&self.path)
    }
}
