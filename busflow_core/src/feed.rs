//! Feed Wire Format
//! ================
//!
//! The live feed is a JSON array of GeoJSON point features:
//!
//! ```json
//! [{ "type": "Feature",
//!    "properties": { "b": "1203", "r": "7", "line": "Downtown" },
//!    "geometry": { "type": "Point", "coordinates": [-104.61, 50.45] } }]
//! ```
//!
//! Records stay as raw `serde_json::Value`s until the validator has looked at
//! them; a single bad record must never take the batch down with it.
//! `FeedFeature` is the typed encoding used by producers (simulators, tests).

use crate::geo_point::GeoPoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed payload is not a JSON array (got {0})")]
    NotAnArray(&'static str),

    #[error("feed payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("feed returned HTTP {0}")]
    BadStatus(u16),
}

/// Properties block of one feed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedProperties {
    /// Vehicle identity
    pub b: String,
    /// Route label
    pub r: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
}

/// One well-formed feed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedFeature {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: FeedProperties,
    pub geometry: FeedGeometry,
}

impl FeedFeature {
    pub fn new(id: impl Into<String>, route: impl Into<String>, position: GeoPoint) -> Self {
        Self {
            kind: "Feature".to_string(),
            properties: FeedProperties {
                b: id.into(),
                r: route.into(),
                line: None,
            },
            geometry: FeedGeometry {
                kind: "Point".to_string(),
                coordinates: [position.lng, position.lat],
            },
        }
    }

    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.properties.line = Some(line.into());
        self
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::from_lng_lat(self.geometry.coordinates[0], self.geometry.coordinates[1])
    }

    /// Raw JSON form, as the tracker receives it.
    ///
    /// Non-finite coordinates become `null`, which the validator rejects.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<FeedError> for busflow_env::EnvError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::BadStatus(status) => busflow_env::EnvError::BadStatus(status),
            other => busflow_env::EnvError::payload(other),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Splits a raw feed body into records.
///
/// An empty (or whitespace-only) body is an empty batch. Anything that is
/// not a JSON array is an error; the caller treats it as "no batch".
pub fn decode_payload(body: &str) -> Result<Vec<Value>, FeedError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(body)? {
        Value::Array(records) => Ok(records),
        other => Err(FeedError::NotAnArray(kind_of(&other))),
    }
}

/// Like `decode_payload`, but for an HTTP response.
///
/// `204 No Content` is an empty batch; any other non-2xx status is an error.
pub fn decode_response(status: u16, body: &str) -> Result<Vec<Value>, FeedError> {
    match status {
        204 => Ok(Vec::new()),
        200..=299 => decode_payload(body),
        _ => Err(FeedError::BadStatus(status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_record;

    #[test]
    fn test_feature_round_trips_through_validator() {
        let feature = FeedFeature::new("1203", "7", GeoPoint::new(50.45, -104.61)).with_line("Downtown");
        let rec = validate_record(&feature.to_value()).unwrap();

        assert_eq!(rec.id, "1203");
        assert_eq!(rec.line.as_deref(), Some("Downtown"));
        assert_eq!(rec.position, feature.position());
    }

    #[test]
    fn test_wire_order_is_lng_lat() {
        let value = FeedFeature::new("B1", "7", GeoPoint::new(50.45, -104.61)).to_value();
        assert_eq!(value["geometry"]["coordinates"][0], -104.61);
        assert_eq!(value["geometry"]["coordinates"][1], 50.45);
        assert!(value["properties"].get("line").is_none());
    }

    #[test]
    fn test_decode_payload() {
        assert!(decode_payload("").unwrap().is_empty());
        assert!(decode_payload("  \n").unwrap().is_empty());
        assert!(decode_payload("[]").unwrap().is_empty());

        let records = decode_payload(r#"[{"properties":{"b":"B1"}}, 42]"#).unwrap();
        assert_eq!(records.len(), 2);

        assert!(matches!(decode_payload(r#"{"error":"down"}"#), Err(FeedError::NotAnArray("object"))));
        assert!(matches!(decode_payload("<html>"), Err(FeedError::Parse(_))));
    }

    #[test]
    fn test_decode_response_status() {
        assert!(decode_response(204, "ignored").unwrap().is_empty());
        assert_eq!(decode_response(200, "[1]").unwrap().len(), 1);
        assert!(matches!(decode_response(503, "[]"), Err(FeedError::BadStatus(503))));
    }

    #[test]
    fn test_converts_to_env_error() {
        use busflow_env::EnvError;

        let err: EnvError = decode_payload("{}").unwrap_err().into();
        assert!(matches!(err, EnvError::PayloadError(_)));
        let err: EnvError = FeedError::BadStatus(502).into();
        assert!(matches!(err, EnvError::BadStatus(502)));
    }
}
