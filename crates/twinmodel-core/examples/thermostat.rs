//! Thermostat example: telemetry, reported properties, a method call and a
//! twin patch against one device

use anyhow::Result;
use twinmodel_core::{
    composite, ActionDescriptor, ActionOutcome, Device, ModelDescriptor, PropertyDescriptor,
    Runtime, RuntimeConfig, SchemaRegistry, StructDescriptor, TwinUpdateKind, Value,
};
use tracing_subscriber::EnvFilter;

fn declare() -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.register_struct(
        StructDescriptor::new("Geo")
            .with_field("Lat", "double")
            .with_field("Long", "double"),
    )?;
    registry.register_model(
        ModelDescriptor::new("Thermostat")
            .with_property(PropertyDescriptor::data("temperature", "double"))
            .with_property(PropertyDescriptor::data("humidity", "float"))
            .with_property(PropertyDescriptor::reported("firmware", "ascii_char_ptr"))
            .with_property(PropertyDescriptor::reported("location", "Geo"))
            .with_property(PropertyDescriptor::desired("setpoint", "double"))
            .with_action(ActionDescriptor::new("setSetpoint").with_param("value", "double")),
    )?;
    Ok(registry)
}

fn on_action(device: &mut Device, action: &str, args: &[Value]) -> ActionOutcome {
    match (action, args) {
        ("setSetpoint", [value]) => match device.set("setpoint", value.clone()) {
            Ok(()) => ActionOutcome::Success,
            Err(_) => ActionOutcome::Error,
        },
        _ => ActionOutcome::Abandoned,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("twinmodel_core=debug")),
        )
        .init();

    let runtime = Runtime::new(declare()?, RuntimeConfig::default());

    println!("=== TwinModel Thermostat Example ===\n");

    let id = runtime.create_device("Thermostat", on_action)?;
    println!("Created device: {id}");

    runtime.with_device(id, |device| -> twinmodel_core::Result<()> {
        device.on_desired_change("setpoint", |device: &mut Device| {
            if let Some(setpoint) = device.get("setpoint") {
                println!("  setpoint changed to {setpoint}");
            }
        })
    })??;

    // Telemetry
    let telemetry = runtime.with_device(id, |device| -> twinmodel_core::Result<Vec<u8>> {
        device.start_transaction()?;
        device.publish("temperature", 21.5)?;
        device.publish("humidity", 40.0f32)?;
        device.end_transaction()
    })??;
    println!("\nTelemetry: {}", String::from_utf8_lossy(&telemetry));

    // Reported properties
    let reported = runtime.with_device(id, |device| -> twinmodel_core::Result<Vec<u8>> {
        device.start_reported()?;
        device.publish_reported("firmware", "1.4.2")?;
        device.publish_reported("location", composite! { "Lat" => 47.6, "Long" => -122.3 }?)?;
        device.commit_reported()
    })??;
    println!("Reported:  {}", String::from_utf8_lossy(&reported));

    // Remote method call
    let outcome = runtime.invoke_method(id, "setSetpoint", br#"{"value":22.0}"#)?;
    println!("\nsetSetpoint -> {outcome:?}");

    // Desired-property patch
    println!("\nApplying twin patch...");
    runtime.ingest_twin(id, TwinUpdateKind::Partial, br#"{"setpoint":19.5,"$version":12}"#)?;

    let stats = runtime.stats();
    println!("\nRuntime stats: {stats:?}");

    runtime.destroy_device(id)?;
    Ok(())
}
