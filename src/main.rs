use std::cmp::{max, min};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use tracing::{debug, error, info, warn};

use rover_venus_rs::bus::{BusService, LocalBus, MqttBus};
use rover_venus_rs::config::{Config, LogLevel};
use rover_venus_rs::rover::{ChargeController, Rover, SerialLink};
use rover_venus_rs::service::tty::{device_path, service_name};
use rover_venus_rs::RoverService;

/// Venus OS driver for Renogy Rover MPPT solar charge controllers
#[derive(Parser)]
#[command(name = "rover-venus-rs")]
#[command(version)]
#[command(about = "Venus OS driver for Renogy Rover MPPT solar charge controllers", long_about = None)]
struct Cli {
    /// Serial device to use, e.g. /dev/ttyUSB0 or ttyUSB0
    device: String,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Next multiple of `interval` after `time`
fn next_interval(time: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let period = max(interval.num_milliseconds(), 1);
    let since_last = Duration::milliseconds(time.timestamp_millis().rem_euclid(period));
    time - since_last + Duration::milliseconds(period)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let log_level = if cli.debug {
        LogLevel::Debug
    } else {
        config.default.log_level
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("rover_venus_rs={}", log_level.as_str()).parse()?)
                .add_directive("rumqttc=warn".parse()?),
        )
        .init();

    if let Some(path) = &cli.config {
        info!("Configuration loaded from: {}", path.display());
    }
    info!("Log level: {}", log_level);
    debug!("Debug logging is enabled");

    let device = device_path(&cli.device);
    let interval = Duration::from_std(config.rover.interval)?;
    info!("Starting driver on device: {}", device);
    info!("  Modbus address: {}", config.rover.address);
    info!("  Baud rate: {}", config.rover.baud_rate);
    info!("  Interval: {:?}", config.rover.interval);
    info!("  Settings: {}", config.rover.settings_path.display());

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let link = SerialLink::new(device.as_str(), config.rover.baud_rate, config.rover.timeout);
    let rover = Rover::new(link, config.rover.address);
    let settings_path = config.rover.settings_path.clone();

    match &config.mqtt {
        Some(mqtt_config) => {
            info!("MQTT config: {:?}", mqtt_config);
            let bus = MqttBus::new(mqtt_config, &service_name(&device))?;
            let service = RoverService::new(&device, rover, bus, settings_path)?;
            info!("Service initialization complete.");
            run(service, interval, &running)?;
        }
        None => {
            warn!("No [mqtt] section configured, values stay on a local bus");
            let service = RoverService::new(&device, rover, LocalBus::new(), settings_path)?;
            info!("Service initialization complete.");
            run(service, interval, &running)?;
        }
    }

    info!("Driver exiting cleanly");
    Ok(())
}

/// Tick on every interval boundary and deliver bus writes in between
fn run<D: ChargeController, B: BusService>(
    mut service: RoverService<D, B>,
    interval: Duration,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let mut next_tick = next_interval(Utc::now(), interval);
    let mut dispatching = true;

    while running.load(Ordering::SeqCst) {
        let now = Utc::now();
        if now >= next_tick {
            next_tick = next_interval(now, interval);
            if service.tick().is_break() {
                break;
            }
        }

        // Wake at least once a second so Ctrl-C is noticed promptly
        let wait = min(
            max(next_tick - Utc::now(), Duration::milliseconds(100)),
            Duration::seconds(1),
        )
        .to_std()?;

        if dispatching {
            if let Err(e) = service.bus_mut().dispatch_writes(wait) {
                error!("Bus stopped delivering writes: {}", e);
                dispatching = false;
            }
        } else {
            std::thread::sleep(wait);
        }
    }

    Ok(())
}
