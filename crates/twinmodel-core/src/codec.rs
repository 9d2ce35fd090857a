//! JSON codec: property tree encoding, typed decoding and the two outbound
//! document shapes (data marshalling and reported properties)

use crate::error::{Error, Result};
use crate::schema::{SchemaRegistry, TypeRef};
use crate::tree::{Node, PropertyTree};
use crate::value::{binary_from_text, binary_text, guid_text, DateTimeOffset, Value, ValueKind};
use ordered_float::OrderedFloat;
use serde_json::{Map, Number, Value as Json};
use uuid::Uuid;

/// Render a value as a JSON node.
///
/// Composites expand into nested objects. Unquoted strings must hold a
/// parseable JSON fragment.
pub fn value_to_json(value: &Value) -> Result<Json> {
    let json = match value {
        Value::Boolean(b) => Json::Bool(*b),
        Value::Int8(i) => Json::from(*i),
        Value::Int16(i) => Json::from(*i),
        Value::Int32(i) => Json::from(*i),
        Value::Int64(i) => Json::from(*i),
        Value::Single(f) => {
            // shortest f32 text, so 0.1f32 is written as 0.1
            let widened: f64 = f
                .to_string()
                .parse()
                .map_err(|_| Error::conversion("single", format!("{f} has no JSON form")))?;
            finite_number("single", widened)?
        }
        Value::Double(f) => finite_number("double", f.into_inner())?,
        Value::String(s) => Json::String(s.clone()),
        Value::StringNoQuotes(s) => serde_json::from_str(s)
            .map_err(|e| Error::conversion("string_no_quotes", e.to_string()))?,
        Value::DateTimeOffset(dt) => Json::String(dt.to_string()),
        Value::Guid(g) => Json::String(guid_text(g)),
        Value::Binary(b) => Json::String(binary_text(b)),
        Value::Composite(c) => {
            let mut object = Map::with_capacity(c.len());
            for (name, field) in c.iter() {
                object.insert(name.to_string(), value_to_json(field)?);
            }
            Json::Object(object)
        }
    };
    Ok(json)
}

fn finite_number(kind: &'static str, f: f64) -> Result<Json> {
    Number::from_f64(f)
        .map(Json::Number)
        .ok_or_else(|| Error::conversion(kind, format!("{f} has no JSON form")))
}

/// Convert a JSON node into a value of the declared type.
///
/// No coercion: a number where a string is declared (or an out-of-range
/// integer) is an error.
pub fn decode_value(json: &Json, ty: &TypeRef, registry: &SchemaRegistry) -> Result<Value> {
    match ty {
        TypeRef::Primitive(kind) => decode_primitive(json, *kind),
        TypeRef::Struct(name) => {
            let descriptor = registry.struct_type(name)?;
            let object = json
                .as_object()
                .ok_or_else(|| Error::shape(name, format!("expected an object, got {json}")))?;
            if object.len() != descriptor.fields.len() {
                return Err(Error::shape(
                    name,
                    format!(
                        "expected {} fields, got {}",
                        descriptor.fields.len(),
                        object.len()
                    ),
                ));
            }
            let mut fields = Vec::with_capacity(descriptor.fields.len());
            for field in &descriptor.fields {
                let node = object
                    .get(&field.name)
                    .ok_or_else(|| Error::shape(name, format!("missing field '{}'", field.name)))?;
                fields.push((field.name.clone(), decode_value(node, &field.ty, registry)?));
            }
            Value::composite(fields)
        }
    }
}

fn decode_primitive(json: &Json, kind: ValueKind) -> Result<Value> {
    let mismatch = || Error::conversion(kind.name(), format!("unexpected JSON {json}"));
    let value = match kind {
        ValueKind::Boolean => Value::Boolean(json.as_bool().ok_or_else(mismatch)?),
        ValueKind::Int8 => Value::Int8(narrow(json, kind)?),
        ValueKind::Int16 => Value::Int16(narrow(json, kind)?),
        ValueKind::Int32 => Value::Int32(narrow(json, kind)?),
        ValueKind::Int64 => Value::Int64(narrow(json, kind)?),
        ValueKind::Single => {
            let f = json.as_f64().ok_or_else(mismatch)? as f32;
            if !f.is_finite() {
                return Err(Error::conversion("single", format!("{json} out of range")));
            }
            Value::Single(OrderedFloat(f))
        }
        ValueKind::Double => Value::Double(OrderedFloat(json.as_f64().ok_or_else(mismatch)?)),
        ValueKind::String => Value::String(json.as_str().ok_or_else(mismatch)?.to_string()),
        ValueKind::StringNoQuotes => Value::StringNoQuotes(serde_json::to_string(json)?),
        ValueKind::DateTimeOffset => {
            let text = json.as_str().ok_or_else(mismatch)?;
            Value::DateTimeOffset(text.parse::<DateTimeOffset>()?)
        }
        ValueKind::Guid => {
            let text = json.as_str().ok_or_else(mismatch)?;
            Value::Guid(Uuid::parse_str(text).map_err(|e| Error::conversion("guid", e.to_string()))?)
        }
        ValueKind::Binary => Value::Binary(binary_from_text(json.as_str().ok_or_else(mismatch)?)?),
    };
    Ok(value)
}

fn narrow<T: TryFrom<i64>>(json: &Json, kind: ValueKind) -> Result<T> {
    json.as_i64()
        .and_then(|i| T::try_from(i).ok())
        .ok_or_else(|| Error::conversion(kind.name(), format!("{json} is not a valid {kind}")))
}

/// Render a property tree as a JSON object whose nesting mirrors the tree
pub fn encode_tree(tree: &PropertyTree) -> Result<Json> {
    encode_children(tree.children())
}

fn encode_children(children: &[(String, Node)]) -> Result<Json> {
    let mut object = Map::with_capacity(children.len());
    for (name, node) in children {
        let json = match node {
            Node::Leaf(value) => value_to_json(value)?,
            Node::Interior(grandchildren) => encode_children(grandchildren)?,
        };
        object.insert(name.clone(), json);
    }
    Ok(Json::Object(object))
}

/// Parse a payload, then decode each requested `/` path as its declared type.
///
/// A requested path missing from the document is a shape error.
pub fn decode(
    bytes: &[u8],
    requested: &[(&str, TypeRef)],
    registry: &SchemaRegistry,
) -> Result<Vec<(String, Value)>> {
    let document: Json = serde_json::from_slice(bytes)?;
    requested
        .iter()
        .map(|(path, ty)| {
            let node = lookup(&document, path)
                .ok_or_else(|| Error::JsonShape(format!("no value at '{path}'")))?;
            Ok((path.to_string(), decode_value(node, ty, registry)?))
        })
        .collect()
}

fn lookup<'a>(document: &'a Json, path: &str) -> Option<&'a Json> {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.split('/')
        .try_fold(document, |node, segment| node.as_object()?.get(segment))
}

/// Build the outbound document for a batch of (path, value) pairs.
///
/// With `include_property_path` off, a lone composite has its fields placed
/// at the root. Any batch of more than one value where a composite is
/// present keeps full paths, whatever the flag says.
pub fn marshal(properties: &[(String, Value)], include_property_path: bool) -> Result<Json> {
    let has_composite = properties
        .iter()
        .any(|(_, value)| matches!(value, Value::Composite(_)));
    let include_property_path = include_property_path || (properties.len() > 1 && has_composite);

    let mut tree = PropertyTree::new();
    for (path, value) in properties {
        match value {
            Value::Composite(composite) if !include_property_path => {
                for (field, member) in composite.iter() {
                    tree.insert(field, member.clone())?;
                }
            }
            _ => tree.insert(path, value.clone())?,
        }
    }
    encode_tree(&tree)
}

/// Build a reported-properties document.
///
/// Each value becomes a JSON fragment placed at its path with `/` turned
/// into `.` and then into nesting. Any failing fragment fails the whole
/// document.
pub fn encode_reported(properties: &[(String, Value)]) -> Result<Json> {
    let mut root = Map::new();
    for (path, value) in properties {
        let fragment = value_to_json(value)?;
        let dotted = path.strip_prefix('/').unwrap_or(path).replace('/', ".");
        dot_set(&mut root, &dotted, fragment)?;
    }
    Ok(Json::Object(root))
}

fn dot_set(root: &mut Map<String, Json>, dotted: &str, fragment: Json) -> Result<()> {
    let conflict = || Error::StructuralConflict {
        path: dotted.to_string(),
    };
    let mut segments: Vec<&str> = dotted.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::EmptyPathSegment {
            path: dotted.to_string(),
        });
    }
    let leaf = segments.pop().ok_or_else(conflict)?;

    let mut object = root;
    for segment in segments {
        let entry = object
            .entry(segment.to_string())
            .or_insert_with(|| Json::Object(Map::new()));
        object = entry.as_object_mut().ok_or_else(conflict)?;
    }
    object.insert(leaf.to_string(), fragment);
    Ok(())
}

/// Serialize a document to compact UTF-8 bytes, enforcing an optional size cap
pub fn to_bytes(document: &Json, limit: Option<usize>) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(document)?;
    match limit {
        Some(limit) if bytes.len() > limit => Err(Error::PayloadTooLarge {
            size: bytes.len(),
            limit,
        }),
        _ => Ok(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite;
    use crate::schema::StructDescriptor;
    use serde_json::json;

    fn props(pairs: Vec<(&str, Value)>) -> Vec<(String, Value)> {
        pairs.into_iter().map(|(p, v)| (p.to_string(), v)).collect()
    }

    #[test]
    fn test_flat_batch_keeps_paths_at_root() {
        let doc = marshal(
            &props(vec![("x", Value::from(10.5f32)), ("y", Value::from(10))]),
            true,
        )
        .unwrap();
        assert_eq!(to_bytes(&doc, None).unwrap(), br#"{"x":10.5,"y":10}"#);
    }

    #[test]
    fn test_lone_composite_is_flattened() {
        let geo = composite! { "Lat" => 3.0, "Long" => 4.0 }.unwrap();
        let doc = marshal(&props(vec![("where", geo.clone())]), false).unwrap();
        assert_eq!(doc, json!({"Lat": 3.0, "Long": 4.0}));

        let doc = marshal(&props(vec![("where", geo)]), true).unwrap();
        assert_eq!(doc, json!({"where": {"Lat": 3.0, "Long": 4.0}}));
    }

    #[test]
    fn test_mixed_batch_falls_back_to_paths() {
        let geo = composite! { "Lat" => 3.0, "Long" => 4.0 }.unwrap();
        let doc = marshal(
            &props(vec![("where", geo), ("speed", Value::from(5))]),
            false,
        )
        .unwrap();
        assert_eq!(doc, json!({"where": {"Lat": 3.0, "Long": 4.0}, "speed": 5}));
    }

    #[test]
    fn test_reported_nesting() {
        let doc = encode_reported(&props(vec![("a/b", Value::from(2.4))])).unwrap();
        assert_eq!(to_bytes(&doc, None).unwrap(), br#"{"a":{"b":2.4}}"#);
    }

    #[test]
    fn test_reported_bad_fragment_aborts() {
        let result = encode_reported(&props(vec![
            ("ok", Value::from(1)),
            ("raw", Value::StringNoQuotes("{not json".into())),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_strings_are_escaped_on_the_wire() {
        let doc = marshal(&props(vec![("s", Value::from("say \"hi\""))]), true).unwrap();
        assert_eq!(to_bytes(&doc, None).unwrap(), br#"{"s":"say \"hi\""}"#);
    }

    #[test]
    fn test_decode_is_strict() {
        let mut registry = SchemaRegistry::new();
        registry
            .register_struct(StructDescriptor::new("Geo").with_field("Lat", "double").with_field("Long", "double"))
            .unwrap();

        let decoded = decode(
            br#"{"a":{"b":7},"g":{"Lat":1.5,"Long":2}}"#,
            &[("a/b", TypeRef::parse("int8_t")), ("g", TypeRef::parse("Geo"))],
            &registry,
        )
        .unwrap();
        assert_eq!(decoded[0].1, Value::Int8(7));
        assert_eq!(decoded[1].1, composite! { "Lat" => 1.5, "Long" => 2.0 }.unwrap());

        assert!(decode(br#"{"a":"7"}"#, &[("a", TypeRef::parse("int"))], &registry).is_err());
        assert!(decode(br#"{"a":300}"#, &[("a", TypeRef::parse("int8_t"))], &registry).is_err());
        assert!(decode(br#"{"a":1}"#, &[("b", TypeRef::parse("int"))], &registry).is_err());
    }

    #[test]
    fn test_payload_limit() {
        let doc = json!({"k": "0123456789"});
        assert!(matches!(
            to_bytes(&doc, Some(8)),
            Err(Error::PayloadTooLarge { limit: 8, .. })
        ));
    }
}
