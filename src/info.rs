//! Persisted device identity
//!
//! A small JSON record holding the serial, firmware/hardware versions and the
//! user-assigned name. Loading never fails: a missing or unreadable file
//! yields defaults so startup is never blocked.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::rover::ChargeController;

pub const PRODUCT_NAME: &str = "Renogy Rover MPPT";
pub const DEFAULT_SERIAL: &str = "RNG-CTRL-RVR";
pub const DEFAULT_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub firmware_version: String,
    pub hardware_version: String,
    pub custom_name: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            serial: DEFAULT_SERIAL.to_string(),
            firmware_version: DEFAULT_VERSION.to_string(),
            hardware_version: DEFAULT_VERSION.to_string(),
            custom_name: PRODUCT_NAME.to_string(),
        }
    }
}

fn random_serial() -> String {
    let suffix = rand::thread_rng().gen_range(1000..9999);
    format!("{}_{}", DEFAULT_SERIAL, suffix)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

impl DeviceInfo {
    pub fn product_name(&self) -> &'static str {
        PRODUCT_NAME
    }

    /// Load from `path`, falling back to defaults when the file is missing or invalid
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No device info at {}, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read device info from {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<Map<String, Value>>(&contents) {
            Ok(fields) => Self::from_fields(&fields),
            Err(e) => {
                debug!("Ignoring invalid device info at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Build from arbitrary key/value input.
    ///
    /// Unknown keys are ignored and known keys that are missing or not strings
    /// keep their defaults. A random serial is generated only when `serial` is
    /// absent altogether.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
        let defaults = Self::default();

        let serial = match fields.get("serial") {
            None => random_serial(),
            Some(_) => text("serial").unwrap_or(defaults.serial),
        };

        Self {
            serial,
            firmware_version: text("firmware_version").unwrap_or(defaults.firmware_version),
            hardware_version: text("hardware_version").unwrap_or(defaults.hardware_version),
            custom_name: text("custom_name").unwrap_or(defaults.custom_name),
        }
    }

    /// Write the record atomically (temp file then rename)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let path = path.as_ref();
        let io_error = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let temp = temp_path(path);
        fs::write(&temp, json).map_err(io_error)?;
        fs::rename(&temp, path).map_err(io_error)?;

        debug!("Saved device info to {}", path.display());
        Ok(())
    }

    /// Refresh identity fields from the controller.
    ///
    /// Each of the three reads is independent; a failed read keeps the current
    /// value and logs a warning.
    pub fn refresh_from_device<D: ChargeController + ?Sized>(&mut self, device: &mut D) {
        match device
            .product_model()
            .and_then(|model| Ok((model, device.serial_number()?)))
        {
            Ok((model, serial)) => self.serial = format!("{}_{}", model, serial),
            Err(e) => warn!(
                "Failed to read product model and serial number, keeping {}: {}",
                self.serial, e
            ),
        }

        match device.software_version() {
            Ok(version) => self.firmware_version = version,
            Err(e) => warn!(
                "Failed to read firmware version, keeping {}: {}",
                self.firmware_version, e
            ),
        }

        match device.hardware_version() {
            Ok(version) => self.hardware_version = version,
            Err(e) => warn!(
                "Failed to read hardware version, keeping {}: {}",
                self.hardware_version, e
            ),
        }
    }
}
