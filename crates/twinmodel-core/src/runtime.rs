//! Device runtime: owns the frozen schema registry and every live device
//!
//! Devices are created and destroyed through the runtime and addressed by
//! opaque [`DeviceId`]s.

use crate::device::Device;
use crate::dispatch::{ActionHandler, ActionOutcome};
use crate::error::{Error, Result};
use crate::schema::SchemaRegistry;
use crate::twin::{apply_twin_update, TwinUpdateKind};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// How a desired-properties document is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwinIngestion {
    /// Decode the whole document first; store nothing on failure
    #[default]
    Atomic,
    /// Store each property as it decodes; a failure leaves earlier ones applied
    BestEffort,
}

/// Configuration for the runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Always place values at their full property path
    pub include_property_path: bool,

    /// Largest encoded document a transaction may produce
    pub max_payload_size: Option<usize>,

    pub twin_ingestion: TwinIngestion,
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

/// Unique identifier for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    /// Create a new unique device ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub devices: usize,
    pub models: usize,
    pub structs: usize,
}

/// A device held by the runtime, locked independently of the arena
type SharedDevice = Arc<Mutex<Device>>;

/// The main runtime for managing devices.
///
/// Closures passed to [`Runtime::with_device`] run with only that device
/// locked. They may call back into the runtime, except for the same device.
pub struct Runtime {
    config: RuntimeConfig,
    registry: Arc<SchemaRegistry>,
    devices: DashMap<DeviceId, SharedDevice>,
}

impl Runtime {
    /// Create a runtime, freezing the registry
    pub fn new(registry: SchemaRegistry, config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(registry), config)
    }

    /// Create a runtime over a registry shared with other runtimes
    pub fn with_registry(registry: Arc<SchemaRegistry>, config: RuntimeConfig) -> Self {
        Self {
            config,
            registry,
            devices: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Create a device of a declared model
    pub fn create_device(&self, model: &str, handler: impl ActionHandler + 'static) -> Result<DeviceId> {
        let device = Device::with_handler(
            self.registry.clone(),
            model,
            Arc::new(handler),
            self.config.clone(),
        )?;
        let id = DeviceId::new();
        self.devices.insert(id, Arc::new(Mutex::new(device)));
        debug!(device = %id, model, "device created");
        Ok(id)
    }

    pub fn destroy_device(&self, id: DeviceId) -> Result<()> {
        let (_, device) = self
            .devices
            .remove(&id)
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))?;
        let device = device.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(device = %id, model = device.model_name(), "device destroyed");
        Ok(())
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|entry| *entry.key()).collect()
    }

    /// Run a closure with exclusive access to one device
    pub fn with_device<R>(&self, id: DeviceId, f: impl FnOnce(&mut Device) -> R) -> Result<R> {
        // Clone the handle out so the shard guard drops before `f` runs
        let shared = self
            .devices
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))?;
        let mut device = shared.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut device))
    }

    /// Apply an inbound twin notification to a device
    pub fn ingest_twin(&self, id: DeviceId, kind: TwinUpdateKind, payload: &[u8]) -> Result<()> {
        self.with_device(id, |device| apply_twin_update(device, kind, payload))?
    }

    /// Invoke a method with a named-argument payload on a device
    pub fn invoke_method(&self, id: DeviceId, name: &str, payload: &[u8]) -> Result<ActionOutcome> {
        self.with_device(id, |device| device.invoke_method(name, payload))?
    }

    /// Execute a command envelope on a device
    pub fn execute_command(&self, id: DeviceId, payload: &[u8]) -> Result<ActionOutcome> {
        self.with_device(id, |device| device.execute_command(payload))?
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            devices: self.devices.len(),
            models: self.registry.model_count(),
            structs: self.registry.struct_count(),
        }
    }
}
