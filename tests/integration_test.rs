//! Integration tests for rover-venus-rs
//!
//! These tests drive the service against a scripted controller and the
//! in-process bus, without requiring actual Rover hardware.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use rover_venus_rs::bus::{BusService, BusValue, ChangeCallback, LocalBus, Updates};
use rover_venus_rs::errors::{BusError, RoverError, ServiceError};
use rover_venus_rs::rover::{ChargeController, ChargingState};
use rover_venus_rs::service::telemetry::*;
use rover_venus_rs::service::{RoverService, TelemetryFrame};
use rover_venus_rs::DeviceInfo;

/// Controller returning fixed readings; any field listed in `failing` errors
struct FakeRover {
    charging_state: ChargingState,
    battery_voltage: f64,
    failing: HashSet<&'static str>,
}

impl Default for FakeRover {
    fn default() -> Self {
        Self {
            charging_state: ChargingState::Mppt,
            battery_voltage: 12.8,
            failing: HashSet::new(),
        }
    }
}

impl FakeRover {
    fn failing(fields: &[&'static str]) -> Self {
        Self {
            failing: fields.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn read<T>(&self, field: &'static str, value: T) -> Result<T, RoverError> {
        if self.failing.contains(field) {
            Err(RoverError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no reply",
            )))
        } else {
            Ok(value)
        }
    }
}

impl ChargeController for FakeRover {
    fn product_model(&mut self) -> Result<String, RoverError> {
        self.read("product_model", "RNG-CTRL-RVR".to_string())
    }
    fn serial_number(&mut self) -> Result<String, RoverError> {
        self.read("serial_number", "12345".to_string())
    }
    fn software_version(&mut self) -> Result<String, RoverError> {
        self.read("software_version", "V1.0.0".to_string())
    }
    fn hardware_version(&mut self) -> Result<String, RoverError> {
        self.read("hardware_version", "V2.0.0".to_string())
    }
    fn solar_voltage(&mut self) -> Result<f64, RoverError> {
        self.read("solar_voltage", 24.5)
    }
    fn solar_current(&mut self) -> Result<f64, RoverError> {
        self.read("solar_current", 2.1)
    }
    fn battery_voltage(&mut self) -> Result<f64, RoverError> {
        self.read("battery_voltage", self.battery_voltage)
    }
    fn charging_power(&mut self) -> Result<f64, RoverError> {
        self.read("charging_power", 50.0)
    }
    fn battery_temperature(&mut self) -> Result<f64, RoverError> {
        self.read("battery_temperature", 25.0)
    }
    fn power_generation_today(&mut self) -> Result<f64, RoverError> {
        self.read("power_generation_today", 1200.0)
    }
    fn max_charging_power_today(&mut self) -> Result<f64, RoverError> {
        self.read("max_charging_power_today", 500.0)
    }
    fn charging_state(&mut self) -> Result<ChargingState, RoverError> {
        self.read("charging_state", self.charging_state)
    }
}

/// Bus that stores declarations but refuses update batches while `rejecting`
#[derive(Default)]
struct RejectingBus {
    inner: LocalBus,
    rejecting: bool,
    rejected: usize,
}

impl BusService for RejectingBus {
    fn add_path(&mut self, path: &str, value: BusValue) -> Result<(), BusError> {
        self.inner.add_path(path, value)
    }

    fn add_writable_path(
        &mut self,
        path: &str,
        value: BusValue,
        on_change: ChangeCallback,
    ) -> Result<(), BusError> {
        self.inner.add_writable_path(path, value, on_change)
    }

    fn register(&mut self) -> Result<(), BusError> {
        self.inner.register()
    }

    fn update(&mut self, updates: &Updates) -> Result<(), BusError> {
        if self.rejecting {
            self.rejected += 1;
            return Err(BusError::PublishFailed {
                topic: "venus/N/svc/Pv/V".to_string(),
                reason: "queue full".to_string(),
            });
        }
        self.inner.update(updates)
    }

    fn value(&self, path: &str) -> Option<&BusValue> {
        self.inner.value(path)
    }

    fn dispatch_writes(&mut self, timeout: Duration) -> Result<(), BusError> {
        self.inner.dispatch_writes(timeout)
    }
}

fn float(frame: &TelemetryFrame, path: &str) -> f64 {
    frame
        .get(path)
        .and_then(BusValue::as_f64)
        .unwrap_or_else(|| panic!("{} missing", path))
}

fn settings(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("renogy").join("rover.json")
}

// ============================================================================
// Telemetry Mapper Tests
// ============================================================================

#[test]
fn test_all_reads_succeed() {
    let frame = TelemetryFrame::collect(&mut FakeRover::default());

    assert_eq!(frame.len(), TELEMETRY_PATHS.len() - 1); // Mppt has no /State entry
    assert_eq!(float(&frame, PV_VOLTAGE), 24.5);
    assert_eq!(float(&frame, PV_CURRENT), 2.1);
    assert!((float(&frame, YIELD_POWER) - 51.45).abs() < 1e-9);
    assert_eq!(float(&frame, DC_VOLTAGE), 12.8);
    assert!((float(&frame, DC_CURRENT) - 3.906).abs() < 1e-3);
    assert_eq!(float(&frame, TEMPERATURE_SENSE), 25.0);
    assert_eq!(float(&frame, DAILY_YIELD), 1.2);
    assert_eq!(float(&frame, DAILY_PV_YIELD), 1.2);
    assert_eq!(float(&frame, DAILY_MAX_POWER), 500.0);
    assert_eq!(float(&frame, DAILY_PV_MAX_POWER), 500.0);
    assert_eq!(frame.get(MPP_OPERATION_MODE), Some(&BusValue::Int(2)));
    assert!(!frame.contains(STATE));
}

#[test]
fn test_battery_voltage_failure_drops_dependants_only() {
    let frame = TelemetryFrame::collect(&mut FakeRover::failing(&["battery_voltage"]));

    assert!(!frame.contains(DC_VOLTAGE));
    assert!(!frame.contains(DC_CURRENT));
    assert!(frame.contains(PV_VOLTAGE));
    assert!(frame.contains(YIELD_POWER));
    assert!(frame.contains(TEMPERATURE_SENSE));
}

#[test]
fn test_solar_current_failure_drops_power() {
    let frame = TelemetryFrame::collect(&mut FakeRover::failing(&["solar_current"]));

    assert!(frame.contains(PV_VOLTAGE));
    assert!(!frame.contains(PV_CURRENT));
    assert!(!frame.contains(YIELD_POWER));
    assert!(frame.contains(DC_CURRENT));
}

#[test]
fn test_zero_battery_voltage_has_no_current() {
    let mut rover = FakeRover {
        battery_voltage: 0.0,
        ..FakeRover::default()
    };
    let frame = TelemetryFrame::collect(&mut rover);

    assert_eq!(float(&frame, DC_VOLTAGE), 0.0);
    assert!(!frame.contains(DC_CURRENT));
}

#[test]
fn test_history_failure_drops_both_history_paths() {
    let frame = TelemetryFrame::collect(&mut FakeRover::failing(&[
        "power_generation_today",
        "max_charging_power_today",
    ]));

    assert!(!frame.contains(DAILY_YIELD));
    assert!(!frame.contains(DAILY_PV_YIELD));
    assert!(!frame.contains(DAILY_MAX_POWER));
    assert!(!frame.contains(DAILY_PV_MAX_POWER));
}

#[test]
fn test_everything_fails_gives_empty_frame() {
    let frame = TelemetryFrame::collect(&mut FakeRover::failing(&[
        "solar_voltage",
        "solar_current",
        "battery_voltage",
        "charging_power",
        "battery_temperature",
        "power_generation_today",
        "max_charging_power_today",
        "charging_state",
    ]));
    assert!(frame.is_empty());
}

#[test]
fn test_state_and_mode_follow_charging_state() {
    let cases = [
        (ChargingState::Deactivated, Some(0), Some(0)),
        (ChargingState::Activated, None, None),
        (ChargingState::Mppt, Some(2), None),
        (ChargingState::Equalizing, None, Some(7)),
        (ChargingState::Boost, None, Some(3)),
        (ChargingState::Floating, None, Some(5)),
        (ChargingState::CurrentLimiting, Some(1), None),
    ];

    for (state, mode, charger) in cases {
        let mut rover = FakeRover {
            charging_state: state,
            ..FakeRover::default()
        };
        let frame = TelemetryFrame::collect(&mut rover);
        assert_eq!(
            frame.get(MPP_OPERATION_MODE),
            mode.map(BusValue::Int).as_ref(),
            "mode for {}",
            state
        );
        assert_eq!(
            frame.get(STATE),
            charger.map(BusValue::Int).as_ref(),
            "state for {}",
            state
        );
    }
}

// ============================================================================
// Service Registrar Tests
// ============================================================================

#[test]
fn test_registration_declares_all_paths() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        RoverService::new("/dev/ttyUSB1", FakeRover::default(), LocalBus::new(), settings(&dir))
            .unwrap();
    let bus = service.bus();

    assert!(bus.is_registered());
    assert_eq!(bus.value("/DeviceInstance"), Some(&BusValue::Int(289)));
    assert_eq!(
        bus.value("/Mgmt/Connection"),
        Some(&BusValue::from("Renogy Rover MPPT on USB1"))
    );
    assert_eq!(bus.value("/ProductId"), Some(&BusValue::Int(0xf102)));
    assert_eq!(bus.value("/ProductName"), Some(&BusValue::from("Renogy Rover MPPT")));
    assert_eq!(bus.value("/CustomName"), Some(&BusValue::from("Renogy Rover MPPT")));
    assert_eq!(bus.value("/Serial"), Some(&BusValue::from("RNG-CTRL-RVR_12345")));
    assert_eq!(bus.value("/FirmwareVersion"), Some(&BusValue::from("V1.0.0")));
    assert_eq!(bus.value("/HardwareVersion"), Some(&BusValue::from("V2.0.0")));
    assert_eq!(bus.value("/Connected"), Some(&BusValue::Int(1)));
    assert_eq!(bus.value("/NrOfTrackers"), Some(&BusValue::Int(1)));
    assert_eq!(bus.value("/Mode"), Some(&BusValue::Int(1)));
    assert_eq!(bus.value("/ErrorCode"), Some(&BusValue::Int(0)));
    assert_eq!(bus.value("/DeviceOffReason"), Some(&BusValue::Int(0)));
    assert_eq!(
        bus.value("/Link/TemperatureSenseActive"),
        Some(&BusValue::Bool(true))
    );
    for path in ["/Mgmt/ProcessName", "/Mgmt/ProcessVersion"] {
        assert!(bus.value(path).is_some(), "{} missing", path);
    }
    for path in TELEMETRY_PATHS {
        assert_eq!(bus.value(path), Some(&BusValue::Int(0)), "{}", path);
    }

    assert!(bus.is_writeable("/CustomName"));
    assert_eq!(bus.paths().filter(|(p, _)| bus.is_writeable(p)).count(), 1);
}

#[test]
fn test_bare_tty_name() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        RoverService::new("ttyUSB0", FakeRover::default(), LocalBus::new(), settings(&dir))
            .unwrap();
    assert_eq!(service.bus().value("/DeviceInstance"), Some(&BusValue::Int(288)));
}

#[test]
fn test_unsupported_tty_fails_before_declaring() {
    let dir = tempfile::tempdir().unwrap();
    for tty in ["/dev/ttyACM0", "/dev/ttyUSB", "/dev/serial0"] {
        let result = RoverService::new(tty, FakeRover::default(), LocalBus::new(), settings(&dir));
        assert!(matches!(result, Err(ServiceError::UnsupportedTty(_))));
    }
    assert!(!settings(&dir).exists());
}

#[test]
fn test_identity_read_failures_keep_stored_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = settings(&dir);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        r#"{"serial": "RNG-CTRL-RVR_1234", "firmware_version": "V0.9.0", "custom_name": "Shed"}"#,
    )
    .unwrap();

    let rover = FakeRover::failing(&["serial_number", "hardware_version"]);
    let service = RoverService::new("/dev/ttyUSB0", rover, LocalBus::new(), &path).unwrap();
    let info = service.device_info();

    assert_eq!(info.serial, "RNG-CTRL-RVR_1234");
    assert_eq!(info.firmware_version, "V1.0.0");
    assert_eq!(info.hardware_version, "0.0.0");
    assert_eq!(info.custom_name, "Shed");
    assert_eq!(service.bus().value("/CustomName"), Some(&BusValue::from("Shed")));
}

#[test]
fn test_tick_updates_bus() {
    let dir = tempfile::tempdir().unwrap();
    let mut service =
        RoverService::new("/dev/ttyUSB0", FakeRover::default(), LocalBus::new(), settings(&dir))
            .unwrap();

    assert!(service.tick().is_continue());

    let bus = service.bus();
    assert_eq!(bus.value(PV_VOLTAGE), Some(&BusValue::Float(24.5)));
    assert_eq!(bus.value(DC_VOLTAGE), Some(&BusValue::Float(12.8)));
    assert_eq!(bus.value(MPP_OPERATION_MODE), Some(&BusValue::Int(2)));
    // Mppt has no charger state mapping, so the initial value stays
    assert_eq!(bus.value(STATE), Some(&BusValue::Int(0)));
}

#[test]
fn test_failed_reads_leave_previous_values() {
    let dir = tempfile::tempdir().unwrap();
    let mut service =
        RoverService::new("/dev/ttyUSB0", FakeRover::default(), LocalBus::new(), settings(&dir))
            .unwrap();
    service.tick();

    service.device_mut().failing.insert("battery_voltage");
    service.device_mut().battery_voltage = 13.4;
    assert!(service.tick().is_continue());

    assert_eq!(service.bus().value(DC_VOLTAGE), Some(&BusValue::Float(12.8)));
    assert_eq!(service.bus().value(PV_VOLTAGE), Some(&BusValue::Float(24.5)));
}

#[test]
fn test_rejected_batch_keeps_running() {
    let dir = tempfile::tempdir().unwrap();
    let bus = RejectingBus {
        rejecting: true,
        ..RejectingBus::default()
    };
    let mut service =
        RoverService::new("/dev/ttyUSB0", FakeRover::default(), bus, settings(&dir)).unwrap();

    let before: Vec<_> = TELEMETRY_PATHS
        .iter()
        .map(|path| service.bus().value(path).cloned())
        .collect();

    assert!(service.tick().is_continue());
    assert!(service.tick().is_continue());
    assert_eq!(service.bus().rejected, 2);

    let after: Vec<_> = TELEMETRY_PATHS
        .iter()
        .map(|path| service.bus().value(path).cloned())
        .collect();
    assert_eq!(before, after);
    assert_eq!(service.bus().value(PV_VOLTAGE), Some(&BusValue::Int(0)));

    service.bus_mut().rejecting = false;
    assert!(service.tick().is_continue());
    assert_eq!(service.bus().value(PV_VOLTAGE), Some(&BusValue::Float(24.5)));
}

#[test]
fn test_unmapped_state_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let mut service = RoverService::new(
        "/dev/ttyUSB0",
        FakeRover {
            charging_state: ChargingState::Floating,
            ..FakeRover::default()
        },
        LocalBus::new(),
        settings(&dir),
    )
    .unwrap();
    service.tick();
    assert_eq!(service.bus().value(STATE), Some(&BusValue::Int(5)));

    service.device_mut().charging_state = ChargingState::Activated;
    service.tick();
    assert_eq!(service.bus().value(STATE), Some(&BusValue::Int(5)));
}

// ============================================================================
// Custom Name Tests
// ============================================================================

#[test]
fn test_custom_name_write_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = settings(&dir);
    let mut service =
        RoverService::new("/dev/ttyUSB0", FakeRover::default(), LocalBus::new(), &path).unwrap();

    let accepted = service
        .bus_mut()
        .write("/CustomName", BusValue::from("Shed Rover"))
        .unwrap();

    assert!(accepted);
    assert_eq!(service.device_info().custom_name, "Shed Rover");
    assert_eq!(
        service.bus().value("/CustomName"),
        Some(&BusValue::from("Shed Rover"))
    );

    let saved = DeviceInfo::load(&path);
    assert_eq!(saved.custom_name, "Shed Rover");
    assert_eq!(saved.serial, "RNG-CTRL-RVR_12345");
    assert_eq!(saved, service.device_info());
}

#[test]
fn test_custom_name_rejects_non_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = settings(&dir);
    let mut service =
        RoverService::new("/dev/ttyUSB0", FakeRover::default(), LocalBus::new(), &path).unwrap();

    let accepted = service
        .bus_mut()
        .write("/CustomName", BusValue::Int(7))
        .unwrap();

    assert!(!accepted);
    assert!(!path.exists());
    assert_eq!(service.device_info().custom_name, "Renogy Rover MPPT");
}

#[test]
fn test_custom_name_save_failure_rejects_write() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the settings directory should be
    let blocker = dir.path().join("renogy");
    fs::write(&blocker, "not a directory").unwrap();

    let mut service =
        RoverService::new("/dev/ttyUSB0", FakeRover::default(), LocalBus::new(), settings(&dir))
            .unwrap();

    let accepted = service
        .bus_mut()
        .write("/CustomName", BusValue::from("Shed Rover"))
        .unwrap();

    assert!(!accepted);
    assert_eq!(service.device_info().custom_name, "Renogy Rover MPPT");
    assert_eq!(
        service.bus().value("/CustomName"),
        Some(&BusValue::from("Renogy Rover MPPT"))
    );
}

#[test]
fn test_read_only_path_write_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut service =
        RoverService::new("/dev/ttyUSB0", FakeRover::default(), LocalBus::new(), settings(&dir))
            .unwrap();

    assert!(service
        .bus_mut()
        .write("/Serial", BusValue::from("spoofed"))
        .is_err());
}

// ============================================================================
// Error Type Tests
// ============================================================================

#[test]
fn test_error_display() {
    let error = ServiceError::UnsupportedTty("/dev/ttyACM0".to_string());
    assert!(error.to_string().contains("/dev/ttyACM0"));

    let error = RoverError::CrcMismatch {
        expected: 0x0a84,
        actual: 0x1234,
    };
    let error_string = error.to_string();
    assert!(error_string.contains("0x0a84"));
    assert!(error_string.contains("0x1234"));
}
