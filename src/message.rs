//! Detection message wire format.
//!
//! `{"timestamp": <epoch seconds>, "objects": {"class_id", "label", "confidence", "bbox"}}`
//! encoded as UTF-8 JSON. Field order follows struct declaration order.

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::detect::DetectionRecord;
use crate::error::PipelineError;

/// Date-time format of `LogEntry::timestamp`.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionMessage {
    pub timestamp: f64,
    pub objects: DetectionRecord,
}

impl DetectionMessage {
    /// Stamp a record with the current wall-clock time.
    pub fn now(record: DetectionRecord) -> Result<Self, PipelineError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PipelineError::Schema(format!("system clock before epoch: {}", e)))?
            .as_secs_f64();
        Ok(Self {
            timestamp,
            objects: record,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, PipelineError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Inbound payload after the first decode step.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// The payload carries no detection (`objects` absent or falsy).
    Empty,
    Detection(DetectionMessage),
}

/// Decode an inbound payload, distinguishing "no objects" from bad input.
///
/// `objects` counts as absent when it is missing, `null`, `false`, zero, an
/// empty string, an empty array or an empty object. Invalid UTF-8 or JSON
/// is `Decode`; any other malformed detection is `Schema`.
pub fn decode_inbound(payload: &[u8]) -> Result<Inbound, PipelineError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| PipelineError::Decode(format!("payload is not UTF-8: {}", e)))?;
    let value: Value = serde_json::from_str(text)
        .map_err(|e| PipelineError::Decode(e.to_string()))?;
    let root = value
        .as_object()
        .ok_or_else(|| PipelineError::Schema("payload is not a JSON object".into()))?;

    if !root.get("objects").is_some_and(is_truthy) {
        return Ok(Inbound::Empty);
    }

    Ok(Inbound::Detection(serde_json::from_value(value)?))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Format epoch seconds in local time as `LOG_TIMESTAMP_FORMAT`.
pub fn format_timestamp(epoch_s: f64) -> Result<String, PipelineError> {
    format_timestamp_in(epoch_s, &Local)
}

/// Format epoch seconds in the given zone. Fractional seconds are dropped.
pub fn format_timestamp_in<Tz>(epoch_s: f64, tz: &Tz) -> Result<String, PipelineError>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    if !epoch_s.is_finite() {
        return Err(PipelineError::Schema(format!(
            "timestamp {} is not finite",
            epoch_s
        )));
    }
    let secs = epoch_s.floor();
    let nanos = ((epoch_s - secs) * 1e9) as u32;
    let utc = DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
        .ok_or_else(|| PipelineError::Schema(format!("timestamp {} out of range", epoch_s)))?;
    Ok(utc
        .with_timezone(tz)
        .format(LOG_TIMESTAMP_FORMAT)
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> DetectionRecord {
        DetectionRecord {
            class_id: 1,
            label: "car".to_string(),
            confidence: 0.91,
            bbox: [0.5, 0.5, 0.2, 0.3],
        }
    }

    #[test]
    fn encodes_fields_in_wire_order() {
        let msg = DetectionMessage {
            timestamp: 1_700_000_000.5,
            objects: record(),
        };
        let json = String::from_utf8(msg.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":1700000000.5,"objects":{"class_id":1,"label":"car","confidence":0.91,"bbox":[0.5,0.5,0.2,0.3]}}"#
        );
    }

    #[test]
    fn published_record_survives_decode() {
        let msg = DetectionMessage::now(record()).unwrap();
        let decoded = match decode_inbound(&msg.encode().unwrap()).unwrap() {
            Inbound::Detection(decoded) => decoded,
            Inbound::Empty => panic!("expected a detection"),
        };
        assert_eq!(decoded.objects, record());
    }

    #[test]
    fn missing_or_empty_objects_decode_as_empty() {
        assert_eq!(decode_inbound(br#"{"foo": 1}"#).unwrap(), Inbound::Empty);
        assert_eq!(
            decode_inbound(br#"{"timestamp": 1.0, "objects": null}"#).unwrap(),
            Inbound::Empty
        );
        assert_eq!(
            decode_inbound(br#"{"timestamp": 1.0, "objects": {}}"#).unwrap(),
            Inbound::Empty
        );
    }

    #[test]
    fn falsy_objects_decode_as_empty() {
        for objects in ["[]", "false", "0", "0.0", "\"\""] {
            let payload = format!(r#"{{"timestamp": 1.0, "objects": {}}}"#, objects);
            assert_eq!(
                decode_inbound(payload.as_bytes()).unwrap(),
                Inbound::Empty,
                "objects = {}",
                objects
            );
        }
    }

    #[test]
    fn truthy_non_object_objects_are_schema_errors() {
        for objects in ["[1]", "true", "3", "\"car\""] {
            let payload = format!(r#"{{"timestamp": 1.0, "objects": {}}}"#, objects);
            assert!(matches!(
                decode_inbound(payload.as_bytes()).unwrap_err(),
                PipelineError::Schema(_)
            ));
        }
    }

    #[test]
    fn bad_json_is_a_decode_error() {
        assert!(matches!(
            decode_inbound(b"{\"objects\": ").unwrap_err(),
            PipelineError::Decode(_)
        ));
        assert!(matches!(
            decode_inbound(&[0xff, 0xfe]).unwrap_err(),
            PipelineError::Decode(_)
        ));
    }

    #[test]
    fn malformed_detection_is_a_schema_error() {
        let payload = br#"{"timestamp": 1.0, "objects": {"label": "car"}}"#;
        assert!(matches!(
            decode_inbound(payload).unwrap_err(),
            PipelineError::Schema(_)
        ));
        assert!(matches!(
            decode_inbound(b"[1, 2]").unwrap_err(),
            PipelineError::Schema(_)
        ));
    }

    #[test]
    fn formats_epoch_seconds() {
        assert_eq!(
            format_timestamp_in(1_700_000_000.75, &Utc).unwrap(),
            "2023-11-14 22:13:20"
        );
        assert_eq!(format_timestamp(0.0).unwrap().len(), 19);
    }

    #[test]
    fn non_finite_timestamps_are_rejected() {
        assert!(format_timestamp_in(f64::NAN, &Utc).is_err());
        assert!(format_timestamp_in(f64::INFINITY, &Utc).is_err());
    }
}
