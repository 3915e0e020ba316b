//! Validation Module - per-record identity and coordinate checks
//! ==============================================================
//!
//! Every record of a feed batch passes through `validate_record` before it
//! may touch the registry. The checks run in a fixed order and stop at the
//! first failure:
//!
//! 1. identity (`properties.b`) present and non-empty after string coercion
//! 2. classification (`properties.r`) present and non-empty
//! 3. `geometry.coordinates` is exactly two numeric components
//! 4. both components are finite after numeric coercion
//!
//! A rejection is a diagnostic, never an error for the batch.
//!
//! Usage:
//! ```ignore
//! use busflow_core::validation::validate_record;
//!
//! match validate_record(&raw) {
//!     Ok(record) => registry.reconcile(record, now),
//!     Err(reason) => tracing::warn!(%reason, "skipping record"),
//! }
//! ```

use crate::geo_point::GeoPoint;
use serde_json::Value;

// =============================================================================
// RESULT TYPES
// =============================================================================

/// A record that passed every check, ready for the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    pub id: String,
    pub route_id: String,
    /// Optional display label (`properties.line`)
    pub line: Option<String>,
    pub position: GeoPoint,
}

/// Why a record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Rejection {
    #[error("missing-identity")]
    MissingIdentity,

    #[error("missing-route")]
    MissingRoute,

    #[error("malformed-coordinates")]
    MalformedCoordinates,
}

impl Rejection {
    /// Stable diagnostic code.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::MissingIdentity => "missing-identity",
            Rejection::MissingRoute => "missing-route",
            Rejection::MalformedCoordinates => "malformed-coordinates",
        }
    }
}

// =============================================================================
// COERCION
// =============================================================================

/// Largest integer an f64 holds exactly.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// String coercion for identity-like fields.
///
/// Strings are trimmed, numbers use their decimal text. Anything else
/// (null, booleans, objects, arrays) is not an identity.
fn coerce_label(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => number_text(n),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Decimal text of a JSON number; integral floats drop the fraction, so
/// `1203.0` and `1203` name the same vehicle.
fn number_text(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < MAX_EXACT_INT => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

/// Numeric coercion for a coordinate component.
///
/// Numeric strings are accepted (the feed has shipped `"50.45"` before);
/// the parsed value may still be non-finite, which is checked separately.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// =============================================================================
// VALIDATOR
// =============================================================================

/// Validates one raw feed record.
///
/// Pure: no logging, no side effects. The caller decides what to do with a
/// rejection.
pub fn validate_record(raw: &Value) -> Result<ValidatedRecord, Rejection> {
    let properties = raw.get("properties");

    let id = coerce_label(properties.and_then(|p| p.get("b")))
        .ok_or(Rejection::MissingIdentity)?;

    let route_id = coerce_label(properties.and_then(|p| p.get("r")))
        .ok_or(Rejection::MissingRoute)?;

    let coords = raw
        .get("geometry")
        .and_then(|g| g.get("coordinates"))
        .and_then(Value::as_array)
        .ok_or(Rejection::MalformedCoordinates)?;

    if coords.len() != 2 {
        return Err(Rejection::MalformedCoordinates);
    }

    let lng = coerce_number(&coords[0]).ok_or(Rejection::MalformedCoordinates)?;
    let lat = coerce_number(&coords[1]).ok_or(Rejection::MalformedCoordinates)?;

    let position = GeoPoint::from_lng_lat(lng, lat);
    if !position.is_finite() {
        return Err(Rejection::MalformedCoordinates);
    }

    let line = coerce_label(properties.and_then(|p| p.get("line")));

    Ok(ValidatedRecord {
        id,
        route_id,
        line,
        position,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(b: Value, r: Value, coords: Value) -> Value {
        json!({
            "type": "Feature",
            "properties": { "b": b, "r": r, "line": "Downtown" },
            "geometry": { "type": "Point", "coordinates": coords }
        })
    }

    #[test]
    fn test_valid_record_swaps_coordinates() {
        let raw = record(json!("B1"), json!("7"), json!([-104.61, 50.45]));
        let rec = validate_record(&raw).unwrap();

        assert_eq!(rec.id, "B1");
        assert_eq!(rec.route_id, "7");
        assert_eq!(rec.line.as_deref(), Some("Downtown"));
        assert_eq!(rec.position, GeoPoint::new(50.45, -104.61));
    }

    #[test]
    fn test_numeric_identity_is_coerced() {
        let raw = record(json!(1203), json!(7), json!([-104.61, 50.45]));
        let rec = validate_record(&raw).unwrap();
        assert_eq!(rec.id, "1203");
        assert_eq!(rec.route_id, "7");
    }

    #[test]
    fn test_integral_float_identity_matches_integer() {
        let from_int = validate_record(&record(json!(1203), json!(7), json!([0.0, 0.0]))).unwrap();
        let from_float = validate_record(&record(json!(1203.0), json!(7.0), json!([0.0, 0.0]))).unwrap();
        assert_eq!(from_float.id, from_int.id);
        assert_eq!(from_float.route_id, "7");

        let fractional = validate_record(&record(json!(12.5), json!(7), json!([0.0, 0.0]))).unwrap();
        assert_eq!(fractional.id, "12.5");
    }

    #[test]
    fn test_numeric_string_coordinates_accepted() {
        let raw = record(json!("B1"), json!("7"), json!(["-104.61", " 50.45 "]));
        let rec = validate_record(&raw).unwrap();
        assert_eq!(rec.position, GeoPoint::new(50.45, -104.61));
    }

    #[test]
    fn test_missing_identity() {
        assert_eq!(
            validate_record(&record(json!(null), json!("7"), json!([0.0, 0.0]))),
            Err(Rejection::MissingIdentity)
        );
        assert_eq!(
            validate_record(&record(json!("   "), json!("7"), json!([0.0, 0.0]))),
            Err(Rejection::MissingIdentity)
        );
        assert_eq!(
            validate_record(&json!({ "geometry": { "coordinates": [0.0, 0.0] } })),
            Err(Rejection::MissingIdentity)
        );
        assert_eq!(validate_record(&json!("not a record")), Err(Rejection::MissingIdentity));
    }

    #[test]
    fn test_identity_checked_before_route() {
        // Both missing: the identity failure wins
        let raw = record(json!(""), json!(""), json!("garbage"));
        assert_eq!(validate_record(&raw), Err(Rejection::MissingIdentity));
    }

    #[test]
    fn test_missing_route() {
        let raw = record(json!("B1"), json!(null), json!([0.0, 0.0]));
        assert_eq!(validate_record(&raw), Err(Rejection::MissingRoute));

        let raw = record(json!("B1"), json!(false), json!([0.0, 0.0]));
        assert_eq!(validate_record(&raw), Err(Rejection::MissingRoute));
    }

    #[test]
    fn test_malformed_coordinates() {
        let cases = [
            json!(null),
            json!([]),
            json!([1.0]),
            json!([1.0, 2.0, 3.0]),
            json!([1.0, null]),
            json!(["abc", 2.0]),
            json!(["NaN", 2.0]),
            json!([1.0, "Infinity"]),
            json!(["1e999", 2.0]),
            json!({ "lat": 1.0, "lng": 2.0 }),
        ];
        for coords in cases {
            let raw = record(json!("B1"), json!("7"), coords.clone());
            assert_eq!(
                validate_record(&raw),
                Err(Rejection::MalformedCoordinates),
                "coords {} should be rejected",
                coords
            );
        }
    }

    #[test]
    fn test_rejection_codes() {
        assert_eq!(Rejection::MissingIdentity.code(), "missing-identity");
        assert_eq!(Rejection::MissingRoute.to_string(), "missing-route");
        assert_eq!(Rejection::MalformedCoordinates.code(), "malformed-coordinates");
    }

    proptest! {
        #[test]
        fn prop_finite_coordinates_always_accepted(lng in -180.0f64..180.0, lat in -90.0f64..90.0) {
            let raw = record(json!("X"), json!("1"), json!([lng, lat]));
            let rec = validate_record(&raw).unwrap();
            prop_assert_eq!(rec.position, GeoPoint::new(lat, lng));
        }
    }
}
