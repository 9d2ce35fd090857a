//! Model registry: struct, model, property and action descriptors
//!
//! Declarations happen once at start-up through the builder methods below.
//! Once the registry is wrapped in an `Arc` and handed to a runtime it is
//! read-only.

use crate::error::{Error, Result};
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared type of a property, struct field or action parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Primitive(ValueKind),
    Struct(String),
}

impl TypeRef {
    /// Primitive kinds win; any other name is a struct reference
    pub fn parse(name: &str) -> Self {
        ValueKind::from_type_name(name)
            .map(Self::Primitive)
            .unwrap_or_else(|| Self::Struct(name.to_string()))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Primitive(kind) => kind.name(),
            Self::Struct(name) => name,
        }
    }
}

impl From<ValueKind> for TypeRef {
    fn from(kind: ValueKind) -> Self {
        Self::Primitive(kind)
    }
}

impl From<&str> for TypeRef {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

/// A named, typed slot: struct field or action parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl StructDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            ty: ty.into(),
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// How a value property participates in device traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyRole {
    /// Telemetry, sent through data transactions
    Data,
    /// Device-twin reported property, written by the device
    Reported,
    /// Device-twin desired property, written remotely
    Desired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Value { ty: TypeRef, role: PropertyRole },
    /// Nested model, addressed by `/` paths
    Model(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
}

impl PropertyDescriptor {
    pub fn data(name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        Self::with_role(name, ty, PropertyRole::Data)
    }

    pub fn reported(name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        Self::with_role(name, ty, PropertyRole::Reported)
    }

    pub fn desired(name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        Self::with_role(name, ty, PropertyRole::Desired)
    }

    pub fn model(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Model(model.into()),
        }
    }

    fn with_role(name: impl Into<String>, ty: impl Into<TypeRef>, role: PropertyRole) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Value {
                ty: ty.into(),
                role,
            },
        }
    }

    pub fn role(&self) -> Option<PropertyRole> {
        match &self.kind {
            PropertyKind::Value { role, .. } => Some(*role),
            PropertyKind::Model(_) => None,
        }
    }

    pub fn value_type(&self) -> Option<&TypeRef> {
        match &self.kind {
            PropertyKind::Value { ty, .. } => Some(ty),
            PropertyKind::Model(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub params: Vec<FieldDescriptor>,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        self.params.push(FieldDescriptor {
            name: name.into(),
            ty: ty.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub properties: Vec<PropertyDescriptor>,
    pub actions: Vec<ActionDescriptor>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_action(mut self, action: ActionDescriptor) -> Self {
        self.actions.push(action);
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.iter().find(|a| a.name == name)
    }
}

/// Registry of every declared struct and model
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    structs: HashMap<String, StructDescriptor>,
    models: HashMap<String, ModelDescriptor>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a struct type.
    ///
    /// Re-declaring an identical shape is a no-op; a different shape under
    /// the same name fails. Field types must already be declared.
    pub fn register_struct(&mut self, descriptor: StructDescriptor) -> Result<()> {
        if let Some(existing) = self.structs.get(&descriptor.name) {
            if *existing == descriptor {
                return Ok(());
            }
            return Err(Error::shape(
                &descriptor.name,
                "already registered with a different shape",
            ));
        }
        if ValueKind::from_type_name(&descriptor.name).is_some() {
            return Err(Error::duplicate("type", &descriptor.name));
        }
        for (i, field) in descriptor.fields.iter().enumerate() {
            if descriptor.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::duplicate("field", &field.name));
            }
            self.check_type_declared(&field.ty)?;
        }

        self.structs.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Declare a model type.
    ///
    /// Nested models and struct types it references must already be declared.
    pub fn register_model(&mut self, descriptor: ModelDescriptor) -> Result<()> {
        if self.models.contains_key(&descriptor.name) {
            return Err(Error::duplicate("model", &descriptor.name));
        }
        for (i, property) in descriptor.properties.iter().enumerate() {
            if descriptor.properties[..i]
                .iter()
                .any(|p| p.name == property.name)
            {
                return Err(Error::duplicate("property", &property.name));
            }
            if property.name.is_empty() || property.name.contains('/') {
                return Err(Error::EmptyPathSegment {
                    path: property.name.clone(),
                });
            }
            match &property.kind {
                PropertyKind::Value { ty, .. } => self.check_type_declared(ty)?,
                PropertyKind::Model(model) => {
                    self.model(model)?;
                }
            }
        }
        for (i, action) in descriptor.actions.iter().enumerate() {
            if descriptor.actions[..i].iter().any(|a| a.name == action.name) {
                return Err(Error::duplicate("action", &action.name));
            }
            for (j, param) in action.params.iter().enumerate() {
                if action.params[..j].iter().any(|p| p.name == param.name) {
                    return Err(Error::duplicate("parameter", &param.name));
                }
                self.check_type_declared(&param.ty)?;
            }
        }

        self.models.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn model(&self, name: &str) -> Result<&ModelDescriptor> {
        self.models
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn struct_type(&self, name: &str) -> Result<&StructDescriptor> {
        self.structs
            .get(name)
            .ok_or_else(|| Error::UnknownStruct(name.to_string()))
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn struct_count(&self) -> usize {
        self.structs.len()
    }

    fn check_type_declared(&self, ty: &TypeRef) -> Result<()> {
        match ty {
            TypeRef::Primitive(_) => Ok(()),
            TypeRef::Struct(name) => self.struct_type(name).map(|_| ()),
        }
    }

    /// Walk a `/` path through nested models down to a value property
    pub fn resolve_property<'a>(
        &'a self,
        model: &'a ModelDescriptor,
        path: &str,
    ) -> Result<&'a PropertyDescriptor> {
        let (owner, leaf) = self.resolve_owner(model, path)?;
        match owner.property(leaf) {
            Some(property) if property.value_type().is_some() => Ok(property),
            _ => Err(Error::UnknownProperty(path.to_string())),
        }
    }

    /// Walk a `/` path through nested models down to an action
    pub fn resolve_action<'a>(
        &'a self,
        model: &'a ModelDescriptor,
        path: &str,
    ) -> Result<&'a ActionDescriptor> {
        let (owner, leaf) = self
            .resolve_owner(model, path)
            .map_err(|_| Error::UnknownAction(path.to_string()))?;
        owner
            .action(leaf)
            .ok_or_else(|| Error::UnknownAction(path.to_string()))
    }

    fn resolve_owner<'a, 'p>(
        &'a self,
        model: &'a ModelDescriptor,
        path: &'p str,
    ) -> Result<(&'a ModelDescriptor, &'p str)> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let mut segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::EmptyPathSegment {
                path: path.to_string(),
            });
        }
        // split always yields at least one segment
        let leaf = segments.pop().unwrap_or_default();

        let mut owner = model;
        for segment in segments {
            owner = match owner.property(segment).map(|p| &p.kind) {
                Some(PropertyKind::Model(nested)) => self.model(nested)?,
                _ => return Err(Error::UnknownProperty(path.to_string())),
            };
        }
        Ok((owner, leaf))
    }

    /// Check a value against a declared type.
    ///
    /// Composites must carry exactly the struct's fields, each matching
    /// recursively; field order is irrelevant.
    pub fn check_value(&self, value: &Value, ty: &TypeRef) -> Result<()> {
        match (ty, value) {
            (TypeRef::Primitive(kind), _) => match value.kind() {
                Some(actual) if actual == *kind => Ok(()),
                _ => Err(Error::shape(
                    kind.name(),
                    format!("got {}", value.type_name()),
                )),
            },
            (TypeRef::Struct(name), Value::Composite(composite)) => {
                let descriptor = self.struct_type(name)?;
                if composite.len() != descriptor.fields.len() {
                    return Err(Error::shape(
                        name,
                        format!(
                            "expected {} fields, got {}",
                            descriptor.fields.len(),
                            composite.len()
                        ),
                    ));
                }
                for field in &descriptor.fields {
                    let member = composite
                        .get(&field.name)
                        .ok_or_else(|| Error::shape(name, format!("missing field '{}'", field.name)))?;
                    self.check_value(member, &field.ty)?;
                }
                Ok(())
            }
            (TypeRef::Struct(name), other) => Err(Error::shape(
                name,
                format!("got {}", other.type_name()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite;

    fn geo_registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register_struct(
                StructDescriptor::new("Geo")
                    .with_field("Lat", "double")
                    .with_field("Long", "double"),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_type_names() {
        assert_eq!(TypeRef::parse("int32_t"), TypeRef::Primitive(ValueKind::Int32));
        assert_eq!(TypeRef::parse("_Bool"), TypeRef::Primitive(ValueKind::Boolean));
        assert_eq!(TypeRef::parse("Geo"), TypeRef::Struct("Geo".into()));
    }

    #[test]
    fn test_struct_redeclaration() {
        let mut registry = geo_registry();
        let same = StructDescriptor::new("Geo")
            .with_field("Lat", "double")
            .with_field("Long", "double");
        assert!(registry.register_struct(same).is_ok());

        let different = StructDescriptor::new("Geo").with_field("Lat", "float");
        assert!(matches!(
            registry.register_struct(different),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_check_value_is_order_insensitive() {
        let registry = geo_registry();
        let geo = TypeRef::parse("Geo");
        let value = composite! { "Long" => 4.0, "Lat" => 3.0 }.unwrap();
        assert!(registry.check_value(&value, &geo).is_ok());

        let short = composite! { "Lat" => 3.0 }.unwrap();
        assert!(registry.check_value(&short, &geo).is_err());

        let wrong_kind = composite! { "Lat" => 3.0f32, "Long" => 4.0 }.unwrap();
        assert!(registry.check_value(&wrong_kind, &geo).is_err());
    }

    #[test]
    fn test_resolve_nested_paths() {
        let mut registry = SchemaRegistry::new();
        registry
            .register_model(
                ModelDescriptor::new("Engine")
                    .with_property(PropertyDescriptor::data("rpm", "int"))
                    .with_action(ActionDescriptor::new("start")),
            )
            .unwrap();
        registry
            .register_model(
                ModelDescriptor::new("Car").with_property(PropertyDescriptor::model("engine", "Engine")),
            )
            .unwrap();

        let car = registry.model("Car").unwrap();
        assert_eq!(registry.resolve_property(car, "engine/rpm").unwrap().name, "rpm");
        assert_eq!(registry.resolve_action(car, "engine/start").unwrap().name, "start");
        assert!(registry.resolve_property(car, "engine").is_err());
        assert!(registry.resolve_action(car, "start").is_err());
    }
}
