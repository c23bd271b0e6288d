//! System bus abstraction
//!
//! A bus service publishes typed values under hierarchical paths such as
//! `/Dc/0/Voltage`. Paths are declared first, then the service is registered
//! and becomes visible. Writable paths carry a callback that decides whether
//! an external write is accepted.

pub mod mqtt;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::BusError;

pub use mqtt::MqttBus;

/// A single published value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl BusValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BusValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            BusValue::Int(i) => Some(*i as f64),
            BusValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for BusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusValue::Bool(b) => write!(f, "{}", b),
            BusValue::Int(i) => write!(f, "{}", i),
            BusValue::Float(v) => write!(f, "{}", v),
            BusValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for BusValue {
    fn from(value: bool) -> Self {
        BusValue::Bool(value)
    }
}

impl From<i64> for BusValue {
    fn from(value: i64) -> Self {
        BusValue::Int(value)
    }
}

impl From<u32> for BusValue {
    fn from(value: u32) -> Self {
        BusValue::Int(i64::from(value))
    }
}

impl From<f64> for BusValue {
    fn from(value: f64) -> Self {
        BusValue::Float(value)
    }
}

impl From<&str> for BusValue {
    fn from(value: &str) -> Self {
        BusValue::Text(value.to_string())
    }
}

impl From<String> for BusValue {
    fn from(value: String) -> Self {
        BusValue::Text(value)
    }
}

/// Invoked with `(path, new_value)` when an external writer changes a writable
/// path. Returning `false` rejects the write.
pub type ChangeCallback = Box<dyn FnMut(&str, &BusValue) -> bool>;

/// A batch of path updates applied together
pub type Updates = BTreeMap<&'static str, BusValue>;

/// Publish/subscribe service object
pub trait BusService {
    /// Declare a read-only path with its initial value
    fn add_path(&mut self, path: &str, value: BusValue) -> Result<(), BusError>;

    /// Declare a writable path; `on_change` runs for every external write
    fn add_writable_path(
        &mut self,
        path: &str,
        value: BusValue,
        on_change: ChangeCallback,
    ) -> Result<(), BusError>;

    /// Make the declared paths visible
    fn register(&mut self) -> Result<(), BusError>;

    /// Apply a batch of updates to declared paths
    fn update(&mut self, updates: &Updates) -> Result<(), BusError>;

    /// Current value of a declared path
    fn value(&self, path: &str) -> Option<&BusValue>;

    /// Wait up to `timeout` for external writes and hand them to their
    /// callbacks on the calling thread
    fn dispatch_writes(&mut self, timeout: Duration) -> Result<(), BusError>;
}

struct Item {
    value: BusValue,
    on_change: Option<ChangeCallback>,
}

/// Declared paths, their values and write callbacks
#[derive(Default)]
pub struct PathTable {
    items: BTreeMap<String, Item>,
    registered: bool,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn mark_registered(&mut self) {
        self.registered = true;
    }

    pub fn declare(
        &mut self,
        path: &str,
        value: BusValue,
        on_change: Option<ChangeCallback>,
    ) -> Result<(), BusError> {
        if self.items.contains_key(path) {
            return Err(BusError::DuplicatePath(path.to_string()));
        }
        self.items.insert(path.to_string(), Item { value, on_change });
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&BusValue> {
        self.items.get(path).map(|item| &item.value)
    }

    pub fn is_writeable(&self, path: &str) -> bool {
        self.items
            .get(path)
            .is_some_and(|item| item.on_change.is_some())
    }

    pub fn paths(&self) -> impl Iterator<Item = (&str, &BusValue)> {
        self.items
            .iter()
            .map(|(path, item)| (path.as_str(), &item.value))
    }

    /// Store a new value; returns whether it differs from the previous one
    pub fn set(&mut self, path: &str, value: BusValue) -> Result<bool, BusError> {
        let item = self
            .items
            .get_mut(path)
            .ok_or_else(|| BusError::UnknownPath(path.to_string()))?;
        let changed = item.value != value;
        item.value = value;
        Ok(changed)
    }

    /// Entries of `updates` that differ from the stored values, without
    /// storing them. Fails if any path is not declared.
    pub fn changes(&self, updates: &Updates) -> Result<Vec<(&'static str, BusValue)>, BusError> {
        let mut changed = Vec::new();
        for (path, value) in updates {
            let current = self
                .get(path)
                .ok_or_else(|| BusError::UnknownPath(path.to_string()))?;
            if current != value {
                changed.push((*path, value.clone()));
            }
        }
        Ok(changed)
    }

    /// Validate every path before applying so a batch is all or nothing
    pub fn set_all(&mut self, updates: &Updates) -> Result<Vec<&'static str>, BusError> {
        if let Some(path) = updates.keys().find(|path| !self.items.contains_key(**path)) {
            return Err(BusError::UnknownPath(path.to_string()));
        }
        let mut changed = Vec::new();
        for (path, value) in updates {
            if self.set(path, value.clone())? {
                changed.push(*path);
            }
        }
        Ok(changed)
    }

    /// Run the callback for an external write; stores the value if accepted
    pub fn write(&mut self, path: &str, value: BusValue) -> Result<bool, BusError> {
        let item = self
            .items
            .get_mut(path)
            .ok_or_else(|| BusError::UnknownPath(path.to_string()))?;
        let on_change = item
            .on_change
            .as_mut()
            .ok_or_else(|| BusError::NotWriteable(path.to_string()))?;

        if !on_change(path, &value) {
            debug!("Write to {} rejected", path);
            return Ok(false);
        }
        item.value = value;
        Ok(true)
    }
}

/// In-process bus without a transport.
///
/// Used when no broker is configured; values are kept and logged but nothing
/// leaves the process. External writes can be injected with [`LocalBus::write`].
#[derive(Default)]
pub struct LocalBus {
    table: PathTable,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self) -> bool {
        self.table.is_registered()
    }

    pub fn is_writeable(&self, path: &str) -> bool {
        self.table.is_writeable(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = (&str, &BusValue)> {
        self.table.paths()
    }

    /// Simulate an external write to `path`
    pub fn write(&mut self, path: &str, value: BusValue) -> Result<bool, BusError> {
        self.table.write(path, value)
    }
}

impl BusService for LocalBus {
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
        self.table.mark_registered();
        Ok(())
    }

    fn update(&mut self, updates: &Updates) -> Result<(), BusError> {
        self.table.set_all(updates)?;
        Ok(())
    }

    fn value(&self, path: &str) -> Option<&BusValue> {
        self.table.get(path)
    }

    fn dispatch_writes(&mut self, timeout: Duration) -> Result<(), BusError> {
        std::thread::sleep(timeout);
        Ok(())
    }
}
