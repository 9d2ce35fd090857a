//! TwinModel Core
//!
//! Data-modeling and marshalling core for IoT device clients:
//! - Typed values and declared device models (properties, structs, actions)
//! - JSON encoding of telemetry and reported properties
//! - Validated dispatch of inbound commands and method calls
//! - Device-twin desired-property synchronization

pub mod codec;
pub mod command;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod runtime;
pub mod schema;
pub mod tree;
pub mod twin;
pub mod value;

pub use device::{ChangeCallback, Device};
pub use dispatch::{ActionHandler, ActionOutcome, DeclineAll};
pub use error::{Error, Result};
pub use runtime::{DeviceId, Runtime, RuntimeConfig, RuntimeStats, TwinIngestion};
pub use schema::{
    ActionDescriptor, FieldDescriptor, ModelDescriptor, PropertyDescriptor, PropertyKind, PropertyRole,
    SchemaRegistry, StructDescriptor, TypeRef,
};
pub use tree::PropertyTree;
pub use twin::TwinUpdateKind;
pub use value::{Composite, DateTimeOffset, Value, ValueKind};
