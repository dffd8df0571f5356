//! Split one raw frame into per-source sub-payloads.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::MonitorError;
use crate::registry::SourceRegistry;
use crate::types::SubPayload;

/// Parse a raw text frame. Anything that is not JSON is a decoding fault.
pub fn parse_frame(raw: &str) -> Result<Value, MonitorError> {
  serde_json::from_str(raw).map_err(|e| MonitorError::decode(format!("malformed frame: {}", e)))
}

/// Sub-payloads for every registered source present in the frame's `data`
/// section, in registry order. Unregistered ids are ignored; every returned
/// entry shares `observed_at`.
pub fn split<'a>(
  frame: &'a Value,
  registry: &'a SourceRegistry,
  observed_at: DateTime<Utc>,
) -> Vec<SubPayload<'a>> {
  let data = match frame.get("data").and_then(Value::as_object) {
    Some(d) => d,
    None => return Vec::new(),
  };

  registry
    .ids()
    .filter_map(|id| {
      data.get(id).map(|payload| SubPayload {
        source_id: id,
        payload,
        observed_at,
      })
    })
    .collect()
}

/// `(event type, detail)` entries of a sub-payload's `event` map.
pub fn event_details(payload: &Value) -> impl Iterator<Item = (&str, &Value)> {
  payload
    .get("event")
    .and_then(Value::as_object)
    .into_iter()
    .flat_map(|events| events.iter().map(|(kind, detail)| (kind.as_str(), detail)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;

  fn registry() -> SourceRegistry {
    SourceRegistry::new([("cam-a", "Lobby"), ("cam-b", "Dock")])
  }

  #[test]
  fn malformed_frame_is_decode_error() {
    let err = parse_frame("{not json").unwrap_err();
    assert!(matches!(err, MonitorError::Decode(_)));
  }

  #[test]
  fn splits_known_sources_and_shares_timestamp() {
    let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let frame = json!({
      "data": {
        "cam-b": {"event": {}},
        "cam-a": {"pre": "x"},
        "cam-z": {"event": {}}
      }
    });
    let reg = registry();
    let parts = split(&frame, &reg, at);
    let ids: Vec<_> = parts.iter().map(|p| p.source_id).collect();
    assert_eq!(ids, vec!["cam-a", "cam-b"]);
    assert!(parts.iter().all(|p| p.observed_at == at));
  }

  #[test]
  fn frame_without_data_yields_nothing() {
    let reg = registry();
    let at = Utc::now();
    assert!(split(&json!({"status": "ok"}), &reg, at).is_empty());
    assert!(split(&json!([1, 2, 3]), &reg, at).is_empty());
    assert!(split(&json!({"data": "cam-a"}), &reg, at).is_empty());
  }

  #[test]
  fn event_details_skips_payloads_without_event_map() {
    assert_eq!(event_details(&json!({"pre": 1})).count(), 0);
    assert_eq!(event_details(&json!({"event": [1]})).count(), 0);
    let payload = json!({"event": {"ALRS": {"ns": 103}, "ANNT": {"ns": 105}}});
    let kinds: Vec<_> = event_details(&payload).map(|(k, _)| k).collect();
    assert_eq!(kinds, vec!["ALRS", "ANNT"]);
  }

  #[test]
  fn event_details_follow_wire_order() {
    let frame = parse_frame(r#"{"event": {"ZZZ": {"ns": 101}, "MMM": {"ns": 102}, "AAA": {"ns": 103}}}"#).unwrap();
    let kinds: Vec<_> = event_details(&frame).map(|(k, _)| k).collect();
    assert_eq!(kinds, vec!["ZZZ", "MMM", "AAA"]);
  }
}
