//! Device instance: live property state bound to a model, outbound
//! transactions and desired-property ingestion

use crate::codec::{self, decode_value};
use crate::command::{decode_arguments, parse_method_arguments, CommandEnvelope};
use crate::dispatch::{self, ActionHandler, ActionOutcome};
use crate::error::{Error, Result};
use crate::runtime::{RuntimeConfig, TwinIngestion};
use crate::schema::{ModelDescriptor, PropertyKind, PropertyRole, SchemaRegistry};
use crate::value::Value;
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Callback fired after a desired property (or a nested model holding
/// desired properties) has been updated
pub type ChangeCallback = Arc<dyn Fn(&mut Device) + Send + Sync>;

/// One unit of desired-property ingestion
#[derive(Debug)]
enum Step {
    Apply(String, Value),
    Notify(String),
}

/// A live device bound to one model
pub struct Device {
    model: String,
    registry: Arc<SchemaRegistry>,
    handler: Arc<dyn ActionHandler>,
    config: RuntimeConfig,
    /// Current value per property path
    properties: BTreeMap<String, Value>,
    callbacks: HashMap<String, ChangeCallback>,
    transaction: Option<Vec<(String, Value)>>,
    reported: Option<Vec<(String, Value)>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("model", &self.model)
            .field("properties", &self.properties)
            .field("transaction_open", &self.transaction.is_some())
            .field("reported_open", &self.reported.is_some())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Bind a new device to a declared model
    pub fn new(
        registry: Arc<SchemaRegistry>,
        model: &str,
        handler: impl ActionHandler + 'static,
        config: RuntimeConfig,
    ) -> Result<Self> {
        Self::with_handler(registry, model, Arc::new(handler), config)
    }

    pub(crate) fn with_handler(
        registry: Arc<SchemaRegistry>,
        model: &str,
        handler: Arc<dyn ActionHandler>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        registry.model(model)?;
        Ok(Self {
            model: model.to_string(),
            registry,
            handler,
            config,
            properties: BTreeMap::new(),
            callbacks: HashMap::new(),
            transaction: None,
            reported: None,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn handler(&self) -> Arc<dyn ActionHandler> {
        self.handler.clone()
    }

    fn descriptor(&self) -> Result<&ModelDescriptor> {
        self.registry.model(&self.model)
    }

    /// Current value of a property
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.properties.get(normalize(path))
    }

    /// All current values keyed by path
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    /// Set a property's live value, checked against its declared type
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let path = normalize(path);
        let descriptor = self.descriptor()?;
        let property = self.registry.resolve_property(descriptor, path)?;
        if let Some(ty) = property.value_type() {
            self.registry.check_value(&value, ty)?;
        }
        self.properties.insert(path.to_string(), value);
        Ok(())
    }

    /// Register a callback for a desired property, or for a nested model
    /// (fired after its children are ingested)
    pub fn on_desired_change<F>(&mut self, path: &str, callback: F) -> Result<()>
    where
        F: Fn(&mut Device) + Send + Sync + 'static,
    {
        let path = normalize(path);
        let descriptor = self.descriptor()?;
        let is_target = match self.registry.resolve_property(descriptor, path) {
            Ok(property) => property.role() == Some(PropertyRole::Desired),
            Err(_) => self.is_nested_model(descriptor, path),
        };
        if !is_target {
            return Err(Error::UnknownProperty(path.to_string()));
        }
        self.callbacks.insert(path.to_string(), Arc::new(callback));
        Ok(())
    }

    fn is_nested_model(&self, descriptor: &ModelDescriptor, path: &str) -> bool {
        let mut model = descriptor;
        for segment in path.split('/') {
            match model.property(segment).map(|p| &p.kind) {
                Some(PropertyKind::Model(nested)) => match self.registry.model(nested) {
                    Ok(next) => model = next,
                    Err(_) => return false,
                },
                _ => return false,
            }
        }
        true
    }

    fn check_role(&self, path: &str, value: &Value, role: PropertyRole) -> Result<()> {
        let descriptor = self.descriptor()?;
        let property = self.registry.resolve_property(descriptor, path)?;
        match (&property.kind, property.role()) {
            (PropertyKind::Value { ty, .. }, Some(actual)) if actual == role => {
                self.registry.check_value(value, ty)
            }
            _ => Err(Error::UnknownProperty(path.to_string())),
        }
    }

    // Data transactions

    pub fn start_transaction(&mut self) -> Result<()> {
        if self.transaction.is_some() {
            return Err(Error::TransactionState("transaction already open"));
        }
        self.transaction = Some(Vec::new());
        Ok(())
    }

    pub fn is_transaction_open(&self) -> bool {
        self.transaction.is_some()
    }

    /// Queue a data property; a repeated path replaces the queued value
    pub fn publish(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let path = normalize(path);
        if self.transaction.is_none() {
            return Err(Error::TransactionState("publish outside an open transaction"));
        }
        self.check_role(path, &value, PropertyRole::Data)?;
        if let Some(batch) = self.transaction.as_mut() {
            upsert(batch, path, value);
        }
        Ok(())
    }

    /// Close the transaction and encode its batch
    pub fn end_transaction(&mut self) -> Result<Vec<u8>> {
        let batch = self
            .transaction
            .take()
            .ok_or(Error::TransactionState("no open transaction"))?;
        if batch.is_empty() {
            return Err(Error::EmptyTransaction);
        }
        let document = codec::marshal(&batch, self.config.include_property_path)?;
        let bytes = codec::to_bytes(&document, self.config.max_payload_size)?;
        debug!(model = %self.model, values = batch.len(), size = bytes.len(), "transaction ended");
        Ok(bytes)
    }

    pub fn cancel_transaction(&mut self) -> Result<()> {
        self.transaction
            .take()
            .map(|_| ())
            .ok_or(Error::TransactionState("no open transaction"))
    }

    // Reported-property transactions

    pub fn start_reported(&mut self) -> Result<()> {
        if self.reported.is_some() {
            return Err(Error::TransactionState("reported transaction already open"));
        }
        self.reported = Some(Vec::new());
        Ok(())
    }

    /// Queue a reported property; a repeated path replaces the queued value
    pub fn publish_reported(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let path = normalize(path);
        if self.reported.is_none() {
            return Err(Error::TransactionState("publish outside an open reported transaction"));
        }
        self.check_role(path, &value, PropertyRole::Reported)?;
        if let Some(batch) = self.reported.as_mut() {
            upsert(batch, path, value);
        }
        Ok(())
    }

    /// Close the reported transaction and encode it as one dotted-path document
    pub fn commit_reported(&mut self) -> Result<Vec<u8>> {
        let batch = self
            .reported
            .take()
            .ok_or(Error::TransactionState("no open reported transaction"))?;
        if batch.is_empty() {
            return Err(Error::EmptyTransaction);
        }
        let document = codec::encode_reported(&batch)?;
        let bytes = codec::to_bytes(&document, self.config.max_payload_size)?;
        debug!(model = %self.model, values = batch.len(), size = bytes.len(), "reported properties committed");
        Ok(bytes)
    }

    pub fn cancel_reported(&mut self) -> Result<()> {
        self.reported
            .take()
            .map(|_| ())
            .ok_or(Error::TransactionState("no open reported transaction"))
    }

    /// Encode every data property that currently has a value
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let descriptor = self.descriptor()?;
        let mut values = Vec::new();
        self.collect_data(descriptor, "", &mut values)?;
        let document = codec::marshal(&values, self.config.include_property_path)?;
        codec::to_bytes(&document, self.config.max_payload_size)
    }

    fn collect_data(
        &self,
        model: &ModelDescriptor,
        prefix: &str,
        out: &mut Vec<(String, Value)>,
    ) -> Result<()> {
        for property in &model.properties {
            let path = format!("{prefix}{}", property.name);
            match &property.kind {
                PropertyKind::Value {
                    role: PropertyRole::Data,
                    ..
                } => {
                    if let Some(value) = self.properties.get(&path) {
                        out.push((path, value.clone()));
                    }
                }
                PropertyKind::Value { .. } => {}
                PropertyKind::Model(nested) => {
                    let nested = self.registry.model(nested)?;
                    self.collect_data(nested, &format!("{path}/"), out)?;
                }
            }
        }
        Ok(())
    }

    // Inbound actions

    /// Dispatch an already-decoded argument list
    pub fn dispatch(&mut self, action: &str, args: &[Value]) -> Result<ActionOutcome> {
        dispatch::dispatch(self, action, args)
    }

    /// Execute a `{"Name":..,"Parameters":{..}}` command
    pub fn execute_command(&mut self, payload: &[u8]) -> Result<ActionOutcome> {
        let envelope = CommandEnvelope::parse(payload).map_err(|e| {
            warn!(model = %self.model, error = %e, "rejected: malformed command");
            e
        })?;
        self.invoke_with(&envelope.name, &envelope.parameters)
    }

    /// Invoke a method whose payload is an object of named arguments
    pub fn invoke_method(&mut self, name: &str, payload: &[u8]) -> Result<ActionOutcome> {
        let arguments = parse_method_arguments(payload).map_err(|e| {
            warn!(model = %self.model, method = name, error = %e, "rejected: malformed arguments");
            e
        })?;
        self.invoke_with(name, &arguments)
    }

    fn invoke_with(&mut self, name: &str, arguments: &Map<String, Json>) -> Result<ActionOutcome> {
        let registry = self.registry.clone();
        let descriptor = registry.model(&self.model)?;
        let action = registry.resolve_action(descriptor, name).map_err(|e| {
            warn!(model = %self.model, action = name, "rejected: unknown action");
            e
        })?;
        let args = decode_arguments(&registry, action, arguments)?;
        self.dispatch(name, &args)
    }

    // Desired-property ingestion

    /// Apply a desired-properties object.
    ///
    /// Keys naming desired properties are decoded and stored, then their
    /// callbacks fire in document order. Nested models recurse. Other keys
    /// are ignored. Under `TwinIngestion::Atomic` nothing is stored unless
    /// the whole document decodes.
    pub fn ingest_desired(&mut self, payload: &[u8]) -> Result<()> {
        let document: Json = serde_json::from_slice(payload)?;
        let object = document
            .as_object()
            .ok_or_else(|| Error::JsonShape("desired properties must be an object".into()))?;

        let registry = self.registry.clone();
        let descriptor = registry.model(&self.model)?;
        let mode = self.config.twin_ingestion;
        let mut staged = Vec::new();

        let result = self.walk_desired(&registry, descriptor, "", object, mode, &mut staged);
        if let Err(e) = result {
            warn!(model = %self.model, ?mode, error = %e, "desired-property ingestion aborted");
            return Err(e);
        }

        // Atomic: commit every value before any callback observes the device
        let mut notify = Vec::new();
        for step in staged {
            match step {
                Step::Apply(path, value) => {
                    self.properties.insert(path, value);
                }
                Step::Notify(path) => notify.push(path),
            }
        }
        for path in notify {
            self.notify(&path);
        }
        Ok(())
    }

    fn walk_desired(
        &mut self,
        registry: &SchemaRegistry,
        model: &ModelDescriptor,
        prefix: &str,
        object: &Map<String, Json>,
        mode: TwinIngestion,
        staged: &mut Vec<Step>,
    ) -> Result<()> {
        for (key, node) in object {
            let Some(property) = model.property(key) else {
                debug!(model = %model.name, key = %key, "ignoring unknown desired key");
                continue;
            };
            let path = format!("{prefix}{key}");
            match &property.kind {
                PropertyKind::Value {
                    ty,
                    role: PropertyRole::Desired,
                } => {
                    let value = decode_value(node, ty, registry)?;
                    trace!(model = %model.name, path = %path, %value, "desired property");
                    self.emit(mode, Step::Apply(path.clone(), value), staged);
                    self.emit(mode, Step::Notify(path), staged);
                }
                PropertyKind::Value { role, .. } => {
                    debug!(model = %model.name, path = %path, ?role, "ignoring non-desired key");
                }
                PropertyKind::Model(nested) => {
                    let nested = registry.model(nested)?;
                    let children = node.as_object().ok_or_else(|| {
                        Error::JsonShape(format!("'{path}' must be an object"))
                    })?;
                    self.walk_desired(registry, nested, &format!("{path}/"), children, mode, staged)?;
                    self.emit(mode, Step::Notify(path), staged);
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, mode: TwinIngestion, step: Step, staged: &mut Vec<Step>) {
        match (mode, step) {
            (TwinIngestion::Atomic, step) => staged.push(step),
            (TwinIngestion::BestEffort, Step::Apply(path, value)) => {
                self.properties.insert(path, value);
            }
            (TwinIngestion::BestEffort, Step::Notify(path)) => self.notify(&path),
        }
    }

    fn notify(&mut self, path: &str) {
        if let Some(callback) = self.callbacks.get(path).cloned() {
            callback(self);
        }
    }
}

fn normalize(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

fn upsert(batch: &mut Vec<(String, Value)>, path: &str, value: Value) {
    match batch.iter_mut().find(|(queued, _)| queued == path) {
        Some((_, slot)) => *slot = value,
        None => batch.push((path.to_string(), value)),
    }
}
