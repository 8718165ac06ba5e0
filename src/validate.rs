use serde_json::{Map, Value};
use crate::error::ApiError;
use crate::model::LocationRecord;

pub const LAT_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;
pub const LON_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

/// Turns a raw ingest payload into a record ready for storage.
///
/// Rules are checked in order and the first failure wins:
/// 1. `userId` must be a non-empty string
/// 2. `lat` and `lon` must be numbers (or numeric strings)
/// 3. `lat`/`lon` must lie within geographic bounds
///
/// `ts` falls back to `now_ms` when missing, zero or not numeric. `acc` and
/// `provider` are kept only when usable, otherwise stored as null.
pub fn validate(payload: &Value, now_ms: i64) -> Result<LocationRecord, ApiError> {
    let empty = Map::new();
    let fields = payload.as_object().unwrap_or(&empty);

    let user_id = match fields.get("userId") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err(ApiError::InvalidPayload),
    };

    let (Some(lat), Some(lon)) = (coerce_number(fields.get("lat")), coerce_number(fields.get("lon"))) else {
        return Err(ApiError::InvalidPayload);
    };

    if !LAT_RANGE.contains(&lat) || !LON_RANGE.contains(&lon) {
        return Err(ApiError::OutOfRange);
    }

    let ts = coerce_number(fields.get("ts"))
        .map(|t| t as i64)
        .filter(|t| *t != 0)
        .unwrap_or(now_ms);

    let provider = match fields.get("provider") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    Ok(LocationRecord {
        user_id,
        lat,
        lon,
        ts,
        acc: coerce_number(fields.get("acc")),
        provider,
    })
}

/// JSON numbers and numeric strings become finite `f64`s. Everything else,
/// including empty strings, booleans and null, is not a number. This is
/// intentionally stricter than the legacy service, which read them as 0 or 1.
fn coerce_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}
