//! Tests for device state and outbound transactions

use serde_json::{json, Value as Json};
use std::sync::Arc;
use twinmodel_core::{
    composite, DeclineAll, Device, Error, ModelDescriptor, PropertyDescriptor, RuntimeConfig,
    SchemaRegistry, StructDescriptor, Value,
};

fn registry() -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry
        .register_struct(
            StructDescriptor::new("Geo")
                .with_field("Lat", "double")
                .with_field("Long", "double"),
        )
        .unwrap();
    registry
        .register_model(
            ModelDescriptor::new("Engine")
                .with_property(PropertyDescriptor::data("rpm", "int"))
                .with_property(PropertyDescriptor::reported("hours", "double"))
                .with_property(PropertyDescriptor::desired("idle", "int")),
        )
        .unwrap();
    registry
        .register_model(
            ModelDescriptor::new("Truck")
                .with_property(PropertyDescriptor::data("speed", "float"))
                .with_property(PropertyDescriptor::data("position", "Geo"))
                .with_property(PropertyDescriptor::model("engine", "Engine"))
                .with_property(PropertyDescriptor::reported("firmware", "ascii_char_ptr"))
                .with_property(PropertyDescriptor::reported("home", "Geo"))
                .with_property(PropertyDescriptor::desired("limit", "int")),
        )
        .unwrap();
    Arc::new(registry)
}

fn truck(config: RuntimeConfig) -> Device {
    Device::new(registry(), "Truck", DeclineAll, config).unwrap()
}

fn parse(bytes: &[u8]) -> Json {
    serde_json::from_slice(bytes).unwrap()
}

#[test]
fn test_unknown_model() {
    assert!(matches!(
        Device::new(registry(), "Boat", DeclineAll, RuntimeConfig::default()),
        Err(Error::UnknownModel(_))
    ));
}

#[test]
fn test_set_and_get() {
    let mut device = truck(RuntimeConfig::default());
    device.set("speed", 55.5f32).unwrap();
    device.set("/engine/rpm", 1800).unwrap();
    device.set("limit", 70).unwrap();

    assert_eq!(device.get("speed"), Some(&Value::from(55.5f32)));
    assert_eq!(device.get("engine/rpm"), Some(&Value::from(1800)));
    assert_eq!(device.properties().len(), 3);

    assert!(matches!(device.set("speed", 55.5), Err(Error::ShapeMismatch { .. })));
    assert!(matches!(device.set("engine", 1), Err(Error::UnknownProperty(_))));
    assert!(matches!(device.set("wheels", 6), Err(Error::UnknownProperty(_))));
}

#[test]
fn test_lone_struct_is_flattened() {
    let mut device = truck(RuntimeConfig::default());
    device.start_transaction().unwrap();
    device
        .publish("position", composite! { "Lat" => 47.6, "Long" => -122.3 }.unwrap())
        .unwrap();
    let bytes = device.end_transaction().unwrap();
    assert_eq!(bytes, br#"{"Lat":47.6,"Long":-122.3}"#);
}

#[test]
fn test_include_property_path() {
    let mut device = truck(RuntimeConfig {
        include_property_path: true,
        ..RuntimeConfig::default()
    });
    device.start_transaction().unwrap();
    device
        .publish("position", composite! { "Lat" => 1.0, "Long" => 2.0 }.unwrap())
        .unwrap();
    let bytes = device.end_transaction().unwrap();
    assert_eq!(parse(&bytes), json!({"position": {"Lat": 1.0, "Long": 2.0}}));
}

#[test]
fn test_mixed_batch_keeps_paths() {
    let mut device = truck(RuntimeConfig::default());
    device.start_transaction().unwrap();
    device.publish("speed", 80.0f32).unwrap();
    device.publish("engine/rpm", 2100).unwrap();
    device
        .publish("position", composite! { "Lat" => 1.0, "Long" => 2.0 }.unwrap())
        .unwrap();
    let bytes = device.end_transaction().unwrap();
    assert_eq!(
        bytes,
        br#"{"speed":80.0,"engine":{"rpm":2100},"position":{"Lat":1.0,"Long":2.0}}"#
    );
}

#[test]
fn test_publish_rules() {
    let mut device = truck(RuntimeConfig::default());
    device.start_transaction().unwrap();

    // reported and desired properties do not travel as telemetry
    assert!(matches!(device.publish("firmware", "1.0"), Err(Error::UnknownProperty(_))));
    assert!(matches!(device.publish("limit", 3), Err(Error::UnknownProperty(_))));
    assert!(matches!(device.publish("engine", 3), Err(Error::UnknownProperty(_))));
    assert!(matches!(
        device.publish("position", composite! { "Lat" => 1.0 }.unwrap()),
        Err(Error::ShapeMismatch { .. })
    ));

    // failed publishes leave the transaction open and empty
    assert!(device.is_transaction_open());
    assert!(matches!(device.end_transaction(), Err(Error::EmptyTransaction)));
    assert!(matches!(device.end_transaction(), Err(Error::TransactionState(_))));
}

#[test]
fn test_cancel_discards_batch() {
    let mut device = truck(RuntimeConfig::default());
    device.start_transaction().unwrap();
    device.publish("speed", 1.0f32).unwrap();
    device.cancel_transaction().unwrap();

    device.start_transaction().unwrap();
    device.publish("engine/rpm", 5).unwrap();
    assert_eq!(device.end_transaction().unwrap(), br#"{"engine":{"rpm":5}}"#);
}

#[test]
fn test_payload_limit() {
    let mut device = truck(RuntimeConfig {
        max_payload_size: Some(10),
        ..RuntimeConfig::default()
    });
    device.start_transaction().unwrap();
    device.publish("engine/rpm", 123_456).unwrap();
    assert!(matches!(
        device.end_transaction(),
        Err(Error::PayloadTooLarge { limit: 10, .. })
    ));
    assert!(!device.is_transaction_open());
}

#[test]
fn test_reported_transaction() {
    let mut device = truck(RuntimeConfig::default());
    assert!(device.publish_reported("firmware", "1.0").is_err());

    device.start_reported().unwrap();
    assert!(device.start_reported().is_err());
    device.publish_reported("firmware", "1.0").unwrap();
    device.publish_reported("engine/hours", 12.5).unwrap();
    device
        .publish_reported("home", composite! { "Lat" => 1.0, "Long" => 2.0 }.unwrap())
        .unwrap();
    device.publish_reported("firmware", "1.1").unwrap();
    assert!(matches!(
        device.publish_reported("speed", 1.0f32),
        Err(Error::UnknownProperty(_))
    ));

    let bytes = device.commit_reported().unwrap();
    assert_eq!(
        bytes,
        br#"{"firmware":"1.1","engine":{"hours":12.5},"home":{"Lat":1.0,"Long":2.0}}"#
    );

    device.start_reported().unwrap();
    assert!(matches!(device.commit_reported(), Err(Error::EmptyTransaction)));
    assert!(device.cancel_reported().is_err());
}

#[test]
fn test_transactions_are_independent() {
    let mut device = truck(RuntimeConfig::default());
    device.start_transaction().unwrap();
    device.start_reported().unwrap();
    device.publish("speed", 3.0f32).unwrap();
    device.publish_reported("firmware", "2.0").unwrap();
    device.cancel_reported().unwrap();
    assert_eq!(device.end_transaction().unwrap(), br#"{"speed":3.0}"#);
}

#[test]
fn test_snapshot() {
    let mut device = truck(RuntimeConfig::default());
    assert_eq!(device.snapshot().unwrap(), b"{}");

    device.set("speed", 10.0f32).unwrap();
    device.set("engine/rpm", 700).unwrap();
    device.set("firmware", "1.0").unwrap();
    device.set("limit", 9).unwrap();
    assert_eq!(parse(&device.snapshot().unwrap()), json!({"speed": 10.0, "engine": {"rpm": 700}}));
}
