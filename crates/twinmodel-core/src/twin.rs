//! Device-twin synchronization: classify an inbound twin document and feed
//! its desired section to a device

use crate::device::Device;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

const VERSION_KEY: &str = "$version";
const DESIRED_KEY: &str = "desired";

/// Shape of an inbound twin notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TwinUpdateKind {
    /// Full twin document; desired properties live under `"desired"`
    Complete,
    /// The body itself is the desired-properties patch
    Partial,
}

/// Extract the desired-properties object, without `$version`.
///
/// Returns `None` for a complete document that has no desired section, or
/// whose `"desired"` is not an object.
pub fn extract_desired(kind: TwinUpdateKind, payload: &[u8]) -> Result<Option<Map<String, Json>>> {
    let document: Json = serde_json::from_slice(payload)?;
    let Json::Object(mut root) = document else {
        return Err(Error::JsonShape("twin document must be an object".into()));
    };

    let mut desired = match kind {
        TwinUpdateKind::Partial => root,
        TwinUpdateKind::Complete => match root.remove(DESIRED_KEY) {
            Some(Json::Object(desired)) => desired,
            _ => return Ok(None),
        },
    };
    // keep document order; callbacks fire in it
    desired.shift_remove(VERSION_KEY);
    Ok(Some(desired))
}

/// Apply an inbound twin notification to a device
pub fn apply_twin_update(device: &mut Device, kind: TwinUpdateKind, payload: &[u8]) -> Result<()> {
    let desired = match extract_desired(kind, payload) {
        Ok(Some(desired)) => desired,
        Ok(None) => {
            debug!(model = %device.model_name(), "twin document has no desired section");
            return Ok(());
        }
        Err(e) => {
            warn!(model = %device.model_name(), ?kind, error = %e, "twin update dropped");
            return Err(e);
        }
    };
    let normalized = serde_json::to_vec(&Json::Object(desired))?;
    device.ingest_desired(&normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_strips_version() {
        let desired = extract_desired(
            TwinUpdateKind::Complete,
            br#"{"desired":{"a":1,"$version":7},"reported":{"$version":3}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(Json::Object(desired), json!({"a": 1}));
    }

    #[test]
    fn test_complete_without_desired_is_noop() {
        let result = extract_desired(TwinUpdateKind::Complete, br#"{"reported":{}}"#).unwrap();
        assert!(result.is_none());

        for payload in [&br#"{"desired":5}"#[..], br#"{"desired":null}"#, br#"{"desired":[1]}"#] {
            assert!(extract_desired(TwinUpdateKind::Complete, payload).unwrap().is_none());
        }
    }

    #[test]
    fn test_partial_is_the_patch() {
        let desired = extract_desired(TwinUpdateKind::Partial, br#"{"a":1,"$version":9}"#)
            .unwrap()
            .unwrap();
        assert_eq!(Json::Object(desired), json!({"a": 1}));
    }

    #[test]
    fn test_non_object_documents() {
        assert!(extract_desired(TwinUpdateKind::Partial, b"[1]").is_err());
        assert!(extract_desired(TwinUpdateKind::Complete, b"[1]").is_err());
        assert!(extract_desired(TwinUpdateKind::Partial, b"{").is_err());
    }
}
