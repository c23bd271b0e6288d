//! MQTT-backed bus service
//!
//! Every path is published retained as `{"value": ...}` under
//! `<root>/N/<service><path>`. Writable paths accept writes on
//! `<root>/W/<service><path>`. The network event loop runs on a helper thread
//! and forwards writes over a channel so callbacks run on the caller's thread.
//! Publishing never blocks; a full request queue surfaces as an error.
//! After every reconnect all paths are republished and the write topics
//! resubscribed, replacing the retained last will on `/Connected`.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{BusService, BusValue, ChangeCallback, PathTable, Updates};
use crate::config::MqttConfig;
use crate::errors::BusError;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;

#[derive(Serialize)]
struct Notification<'a> {
    value: &'a BusValue,
}

#[derive(Deserialize)]
struct WriteRequest {
    value: BusValue,
}

/// Serialize a value as the notification payload
pub fn payload(value: &BusValue) -> Result<String, BusError> {
    serde_json::to_string(&Notification { value })
        .map_err(|error| BusError::SerializationError { error })
}

/// Parse a write request payload
pub fn parse_write(payload: &[u8]) -> Result<BusValue, BusError> {
    serde_json::from_slice::<WriteRequest>(payload)
        .map(|request| request.value)
        .map_err(|error| BusError::SerializationError { error })
}

/// Topic layout for one service
#[derive(Debug, Clone)]
pub struct Topics {
    notify: String,
    write: String,
}

impl Topics {
    pub fn new(root: &str, service_name: &str) -> Self {
        Self {
            notify: format!("{}/N/{}", root, service_name),
            write: format!("{}/W/{}", root, service_name),
        }
    }

    pub fn notify(&self, path: &str) -> String {
        format!("{}{}", self.notify, path)
    }

    pub fn write(&self, path: &str) -> String {
        format!("{}{}", self.write, path)
    }

    /// Bus path addressed by a write topic, if it belongs to this service
    pub fn path_of_write<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.write.as_str())
            .filter(|path| path.starts_with('/'))
    }
}

/// Messages forwarded by the network thread
#[derive(Debug)]
enum Inbound {
    /// The broker acknowledged a connection, possibly after a drop
    Connected,
    Write { topic: String, payload: Vec<u8> },
}

pub struct MqttBus {
    client: Client,
    topics: Topics,
    table: PathTable,
    inbound: Receiver<Inbound>,
    needs_resync: bool,
}

impl MqttBus {
    pub fn new(config: &MqttConfig, service_name: &str) -> Result<Self, BusError> {
        let client_id = format!("rover-venus-rs-{}", service_name);
        let topics = Topics::new(&config.root, service_name);

        info!("Using MQTT TCP connection: {}:{}", config.host, config.port);
        let mut mqtt_options = MqttOptions::new(client_id, &config.host, config.port);

        if !config.username.is_empty() {
            mqtt_options.set_credentials(&config.username, &config.password);
        }

        mqtt_options.set_keep_alive(Duration::from_secs(60));

        // Last Will: mark the device disconnected when the session is lost
        let offline = payload(&BusValue::Int(0))?;
        mqtt_options.set_last_will(rumqttc::LastWill {
            topic: topics.notify("/Connected"),
            message: offline.into_bytes().into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        let (client, mut connection) = Client::new(mqtt_options, REQUEST_CAPACITY);
        let (tx, inbound) = mpsc::channel();

        let write_prefix = topics.write("");
        thread::Builder::new()
            .name("mqtt-events".to_string())
            .spawn(move || forward_events(&mut connection, &write_prefix, tx))
            .map_err(|e| BusError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            topics,
            table: PathTable::new(),
            inbound,
            needs_resync: false,
        })
    }

    fn announce(&self) -> Result<(), BusError> {
        announce(
            &self.table,
            |path, value| publish(&self.client, &self.topics, path, value),
            |path| subscribe(&self.client, &self.topics, path),
        )
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Connected => {
                // A fresh session has lost our retained state and subscriptions
                if self.table.is_registered() {
                    self.needs_resync = true;
                }
            }
            Inbound::Write { topic, payload } => {
                if let Err(e) = self.handle_write(&topic, &payload) {
                    warn!("Ignoring write on {}: {}", topic, e);
                }
            }
        }
    }

    fn handle_write(&mut self, topic: &str, raw: &[u8]) -> Result<(), BusError> {
        let Some(path) = self.topics.path_of_write(topic) else {
            return Ok(());
        };
        let value = parse_write(raw)?;
        debug!("Write request {} = {}", path, value);

        let path = path.to_string();
        if self.table.write(&path, value)? {
            if let Some(value) = self.table.get(&path) {
                publish(&self.client, &self.topics, &path, value)?;
            }
        }
        Ok(())
    }

    /// Republish every path and resubscribe after the broker reconnected.
    ///
    /// The flag is kept on failure so the next dispatch tries again.
    fn resync(&mut self) -> Result<(), BusError> {
        if !self.needs_resync {
            return Ok(());
        }
        self.announce()?;
        self.needs_resync = false;
        info!("Republished {} paths after reconnect", self.table.paths().count());
        Ok(())
    }
}

fn publish(
    client: &Client,
    topics: &Topics,
    path: &str,
    value: &BusValue,
) -> Result<(), BusError> {
    let topic = topics.notify(path);
    client
        .try_publish(&topic, QoS::AtLeastOnce, true, payload(value)?)
        .map_err(|e| BusError::PublishFailed {
            topic,
            reason: e.to_string(),
        })
}

fn subscribe(client: &Client, topics: &Topics, path: &str) -> Result<(), BusError> {
    client
        .try_subscribe(topics.write(path), QoS::AtLeastOnce)
        .map_err(|e| BusError::ClientError(e.to_string()))
}

/// Publish every declared path and subscribe to each writable one
fn announce<P, S>(table: &PathTable, mut publish: P, mut subscribe: S) -> Result<(), BusError>
where
    P: FnMut(&str, &BusValue) -> Result<(), BusError>,
    S: FnMut(&str) -> Result<(), BusError>,
{
    for (path, value) in table.paths() {
        publish(path, value)?;
        if table.is_writeable(path) {
            subscribe(path)?;
        }
    }
    Ok(())
}

/// Publish the entries of `updates` that changed.
///
/// A value is stored only after its publish was accepted, so whatever fails
/// still differs from the table and goes out with the next update.
fn publish_changes<P>(
    table: &mut PathTable,
    updates: &Updates,
    mut publish: P,
) -> Result<(), BusError>
where
    P: FnMut(&str, &BusValue) -> Result<(), BusError>,
{
    for (path, value) in table.changes(updates)? {
        publish(path, &value)?;
        table.set(path, value)?;
    }
    Ok(())
}

fn forward_events(
    connection: &mut rumqttc::Connection,
    write_prefix: &str,
    tx: Sender<Inbound>,
) {
    for notification in connection.iter() {
        let inbound = match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                Inbound::Connected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if !publish.topic.starts_with(write_prefix) {
                    continue;
                }
                Inbound::Write {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                }
            }
            Ok(_) => continue,
            Err(e) => {
                error!("MQTT connection error: {:?}", e);
                thread::sleep(RECONNECT_DELAY);
                continue;
            }
        };
        if tx.send(inbound).is_err() {
            // Bus dropped, nobody left to deliver to
            return;
        }
    }
}

impl BusService for MqttBus {
    fn add_path(&mut self, path: &str, value: BusValue) -> Result<(), BusError> {
        self.table.declare(path, value, None)
    }

    fn add_writable_path(
        &mut self,
        path: &str,
        value: BusValue,
        on_change: ChangeCallback,
    ) -> Result<(), BusError> {
        self.table.declare(path, value, Some(on_change))
    }

    fn register(&mut self) -> Result<(), BusError> {
        self.announce()?;
        self.table.mark_registered();
        info!("Registered {} paths", self.table.paths().count());
        Ok(())
    }

    fn update(&mut self, updates: &Updates) -> Result<(), BusError> {
        if !self.table.is_registered() {
            self.table.set_all(updates)?;
            return Ok(());
        }
        let (client, topics) = (&self.client, &self.topics);
        publish_changes(&mut self.table, updates, |path, value| {
            publish(client, topics, path, value)
        })
    }

    fn value(&self, path: &str) -> Option<&BusValue> {
        self.table.get(path)
    }

    fn dispatch_writes(&mut self, timeout: Duration) -> Result<(), BusError> {
        match self.inbound.recv_timeout(timeout) {
            Ok(first) => {
                let pending: Vec<_> = std::iter::once(first)
                    .chain(self.inbound.try_iter())
                    .collect();
                for inbound in pending {
                    self.handle_inbound(inbound);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(BusError::ClientError("MQTT event loop stopped".to_string()))
            }
        }

        if let Err(e) = self.resync() {
            warn!("Republishing after reconnect failed: {}", e);
        }
        Ok(())
    }
}
