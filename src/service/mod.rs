//! Rover bus service
//!
//! Declares the solar charger paths once, registers them, then refreshes the
//! telemetry on every tick. `/CustomName` is the only writable path; changes
//! are persisted to the device info file.

pub mod state;
pub mod telemetry;
pub mod tty;

use std::cell::RefCell;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, error, info};

use crate::bus::{BusService, BusValue};
use crate::errors::{BusError, ServiceError};
use crate::info::DeviceInfo;
use crate::rover::ChargeController;

pub use state::{ChargerState, OperationMode};
pub use telemetry::TelemetryFrame;
pub use tty::UsbTty;

/// Product id announced on the bus
pub const PRODUCT_ID: i64 = 0xf102;

pub const CUSTOM_NAME: &str = "/CustomName";

const PROCESS_NAME: &str = env!("CARGO_PKG_NAME");
const PROCESS_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct RoverService<D, B> {
    tty: UsbTty,
    device: D,
    bus: B,
    device_info: Rc<RefCell<DeviceInfo>>,
    settings_path: PathBuf,
}

impl<D: ChargeController, B: BusService> RoverService<D, B> {
    /// Validate the tty, declare and register every path.
    ///
    /// Fails before touching the bus when `tty` is not a `ttyUSB<n>` device.
    pub fn new(
        tty: &str,
        mut device: D,
        mut bus: B,
        settings_path: impl Into<PathBuf>,
    ) -> Result<Self, ServiceError> {
        let tty = UsbTty::parse(tty)?;
        let settings_path = settings_path.into();

        let mut info = DeviceInfo::load(&settings_path);
        info.refresh_from_device(&mut device);
        info!(
            "Device {} serial={} firmware={} hardware={}",
            tty.path(),
            info.serial,
            info.firmware_version,
            info.hardware_version
        );
        let device_info = Rc::new(RefCell::new(info));

        declare_paths(&mut bus, &tty, &device_info, &settings_path)?;
        bus.register()?;
        info!(
            "Registered {} as device instance {}",
            tty.service_name(),
            tty.device_instance()
        );

        Ok(Self {
            tty,
            device,
            bus,
            device_info,
            settings_path,
        })
    }

    pub fn tty(&self) -> &UsbTty {
        &self.tty
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.device_info.borrow().clone()
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// One telemetry cycle. Always asks to be scheduled again.
    pub fn tick(&mut self) -> ControlFlow<()> {
        let frame = TelemetryFrame::collect(&mut self.device);

        if let Err(e) = self.bus.update(frame.updates()) {
            error!("Error updating path values: {}", e);
            return ControlFlow::Continue(());
        }

        for path in frame.updates().keys() {
            if let Some(value) = self.bus.value(path) {
                debug!("{}: {}", path, value);
            }
        }
        ControlFlow::Continue(())
    }
}

fn declare_paths<B: BusService>(
    bus: &mut B,
    tty: &UsbTty,
    device_info: &Rc<RefCell<DeviceInfo>>,
    settings_path: &Path,
) -> Result<(), BusError> {
    let info = device_info.borrow().clone();

    // Management objects, as required by the ccgx dbus-api
    bus.add_path("/Mgmt/ProcessName", PROCESS_NAME.into())?;
    bus.add_path("/Mgmt/ProcessVersion", PROCESS_VERSION.into())?;
    bus.add_path("/Mgmt/Connection", tty.connection().into())?;

    // Mandatory objects
    bus.add_path("/DeviceInstance", tty.device_instance().into())?;
    bus.add_path("/ProductId", PRODUCT_ID.into())?;
    bus.add_path("/ProductName", info.product_name().into())?;
    bus.add_writable_path(
        CUSTOM_NAME,
        info.custom_name.clone().into(),
        custom_name_callback(Rc::clone(device_info), settings_path.to_path_buf()),
    )?;
    bus.add_path("/Serial", info.serial.clone().into())?;
    bus.add_path("/FirmwareVersion", info.firmware_version.clone().into())?;
    bus.add_path("/HardwareVersion", info.hardware_version.clone().into())?;
    bus.add_path("/Connected", BusValue::Int(1))?;

    // Solar charger static values
    bus.add_path("/NrOfTrackers", BusValue::Int(1))?;
    bus.add_path("/Mode", BusValue::Int(1))?;
    bus.add_path("/ErrorCode", BusValue::Int(0))?;
    bus.add_path("/DeviceOffReason", BusValue::Int(0))?;
    bus.add_path("/Link/TemperatureSenseActive", BusValue::Bool(true))?;

    // Refreshed every tick
    for path in telemetry::TELEMETRY_PATHS {
        let initial = match path {
            telemetry::MPP_OPERATION_MODE => OperationMode::Off.value(),
            telemetry::STATE => ChargerState::Off.value(),
            _ => 0,
        };
        bus.add_path(path, BusValue::Int(initial))?;
    }

    Ok(())
}

/// Persist a new custom name before accepting it.
///
/// The in-memory record only changes when the file was written.
fn custom_name_callback(
    device_info: Rc<RefCell<DeviceInfo>>,
    settings_path: PathBuf,
) -> crate::bus::ChangeCallback {
    Box::new(move |path: &str, value: &BusValue| {
        let Some(name) = value.as_str() else {
            error!("Rejecting non-text value for {}: {}", path, value);
            return false;
        };

        let mut updated = device_info.borrow().clone();
        updated.custom_name = name.to_string();
        match updated.save(&settings_path) {
            Ok(()) => {
                info!("Custom name changed to {:?}", name);
                *device_info.borrow_mut() = updated;
                true
            }
            Err(e) => {
                error!("Failed to save custom name: {}", e);
                false
            }
        }
    })
}
