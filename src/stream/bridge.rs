//! Decoding of Hue bridge event payloads.
//!
//! Each stream record carries a JSON array of event containers, each holding the
//! resources that changed:
//!
//! ```text
//! [{"type":"update","id":"...","creationtime":"...",
//!   "data":[{"id":"<light id>","type":"light","on":{"on":false}}]}]
//! ```

use crate::error::DecodeError;
use crate::model::DeviceChange;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct EventContainer {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    on: Option<OnState>,
    dimming: Option<serde_json::Value>,
    color: Option<serde_json::Value>,
    color_temperature: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OnState {
    on: bool,
}

/// Flatten one record payload into per-resource changes.
pub(crate) fn decode_changes(data: &str) -> Result<Vec<DeviceChange>, DecodeError> {
    let data = data.trim();
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    let containers: Vec<EventContainer> = serde_json::from_str(data)?;

    Ok(containers
        .into_iter()
        .flat_map(|container| {
            let event_type = container.kind;
            container
                .data
                .into_iter()
                .filter(|r| !r.id.is_empty())
                .map(move |r| DeviceChange {
                    event_type: event_type.clone(),
                    resource_type: r.kind,
                    device_id: r.id,
                    power: r.on.map(|o| o.on),
                    attributes_changed: r.dimming.is_some()
                        || r.color.is_some()
                        || r.color_temperature.is_some(),
                })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_power_and_attribute_updates() {
        let payload = r#"[
          {"creationtime":"2026-10-17T10:00:00Z","id":"e1","type":"update","data":[
            {"id":"k1","id_v1":"/lights/1","on":{"on":false},"owner":{"rid":"d1","rtype":"device"},"type":"light"},
            {"id":"k2","dimming":{"brightness":42.5},"type":"light"},
            {"id":"k3","color":{"xy":{"x":0.4,"y":0.3}},"type":"light"}
          ]},
          {"id":"e2","type":"update","data":[{"id":"m1","motion":{"motion":true},"type":"motion"}]}
        ]"#;

        let changes = decode_changes(payload).unwrap();
        assert_eq!(changes.len(), 4);
        assert_eq!(changes[0].device_id, "k1");
        assert_eq!(changes[0].power, Some(false));
        assert!(!changes[0].attributes_changed);
        assert!(changes[1].attributes_changed);
        assert!(changes[2].attributes_changed);
        assert!(changes[0].is_device_update());
        assert!(!changes[3].is_device_update());
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(matches!(decode_changes("  "), Err(DecodeError::Empty)));
        assert!(matches!(decode_changes("{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode_changes(r#"{"type":"update"}"#), Err(DecodeError::Json(_))));
    }

    #[test]
    fn resources_without_id_are_skipped() {
        let changes =
            decode_changes(r#"[{"type":"delete","data":[{"type":"light"},{"id":"x","type":"light"}]}]"#)
                .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].event_type, "delete");
    }
}
