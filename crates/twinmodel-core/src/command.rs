//! Inbound command and method-call envelopes

use crate::codec::decode_value;
use crate::error::{Error, Result};
use crate::schema::{ActionDescriptor, SchemaRegistry, TypeRef};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::warn;

/// `{"Name": "<action path>", "Parameters": {"<arg>": <json>, ...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandEnvelope {
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Json>,
}

impl CommandEnvelope {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Parse a method payload into named arguments.
///
/// An empty body or `null` means no arguments; anything else must be an
/// object.
pub fn parse_method_arguments(payload: &[u8]) -> Result<Map<String, Json>> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Json>(payload)? {
        Json::Null => Ok(Map::new()),
        Json::Object(arguments) => Ok(arguments),
        other => Err(Error::JsonShape(format!(
            "method arguments must be an object, got {other}"
        ))),
    }
}

/// Decode named JSON arguments into the action's declared parameter order.
///
/// Every declared parameter must be present and well typed. Extra names are
/// ignored. A struct argument with no fields, at any depth, is refused.
pub fn decode_arguments(
    registry: &SchemaRegistry,
    action: &ActionDescriptor,
    arguments: &Map<String, Json>,
) -> Result<Vec<Value>> {
    action
        .params
        .iter()
        .map(|param| {
            let json = arguments.get(&param.name).ok_or_else(|| {
                warn!(action = %action.name, param = %param.name, "missing argument");
                Error::ArgumentMismatch(action.name.clone())
            })?;
            if has_empty_struct(registry, &param.ty) {
                warn!(action = %action.name, param = %param.name, "struct argument with no fields");
                return Err(Error::ArgumentMismatch(action.name.clone()));
            }
            decode_value(json, &param.ty, registry).map_err(|e| {
                warn!(action = %action.name, param = %param.name, error = %e, "undecodable argument");
                Error::ArgumentMismatch(action.name.clone())
            })
        })
        .collect()
}

fn has_empty_struct(registry: &SchemaRegistry, ty: &TypeRef) -> bool {
    match ty {
        TypeRef::Primitive(_) => false,
        TypeRef::Struct(name) => registry.struct_type(name).is_ok_and(|descriptor| {
            descriptor.fields.is_empty()
                || descriptor
                    .fields
                    .iter()
                    .any(|field| has_empty_struct(registry, &field.ty))
        }),
    }
}
