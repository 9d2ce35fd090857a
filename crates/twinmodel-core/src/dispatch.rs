//! Action dispatch
//!
//! One call moves Received → Resolved → Validated → Invoked → Completed.
//! Resolution or validation failure rejects the call before any device code
//! runs; rejection is reported as an `Err`, never as an outcome.

use crate::device::Device;
use crate::error::{Error, Result};
use crate::schema::{ActionDescriptor, SchemaRegistry};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Result reported by device code for an invoked action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionOutcome {
    /// Handled
    Success,
    /// Declined
    Abandoned,
    /// Failed
    Error,
}

/// Device code bound to a model's actions.
///
/// Receives the device, the full action path and arguments in declaration
/// order, already validated against the action's signature.
pub trait ActionHandler: Send + Sync {
    fn handle(&self, device: &mut Device, action: &str, args: &[Value]) -> ActionOutcome;
}

impl<F> ActionHandler for F
where
    F: Fn(&mut Device, &str, &[Value]) -> ActionOutcome + Send + Sync,
{
    fn handle(&self, device: &mut Device, action: &str, args: &[Value]) -> ActionOutcome {
        self(device, action, args)
    }
}

/// Handler for models that declare no actions, or devices that decline all
pub struct DeclineAll;

impl ActionHandler for DeclineAll {
    fn handle(&self, _device: &mut Device, _action: &str, _args: &[Value]) -> ActionOutcome {
        ActionOutcome::Abandoned
    }
}

/// Structural match of an argument list against an action signature.
///
/// Arity first, then each argument against its parameter type, recursing
/// into composites by field name.
pub fn matches_signature(registry: &SchemaRegistry, action: &ActionDescriptor, args: &[Value]) -> bool {
    args.len() == action.params.len()
        && action
            .params
            .iter()
            .zip(args)
            .all(|(param, arg)| registry.check_value(arg, &param.ty).is_ok())
}

/// Resolve, validate and invoke one action call on a device
pub fn dispatch(device: &mut Device, path: &str, args: &[Value]) -> Result<ActionOutcome> {
    let registry = device.registry().clone();
    let model = registry.model(device.model_name())?;

    let action = registry.resolve_action(model, path).map_err(|e| {
        warn!(model = %model.name, action = path, "rejected: unknown action");
        e
    })?;

    if !matches_signature(&registry, action, args) {
        warn!(
            model = %model.name,
            action = path,
            expected = action.params.len(),
            supplied = args.len(),
            "rejected: argument mismatch"
        );
        return Err(Error::ArgumentMismatch(path.to_string()));
    }

    let handler = device.handler();
    let outcome = handler.handle(device, path, args);
    debug!(model = %model.name, action = path, ?outcome, "action completed");
    Ok(outcome)
}
