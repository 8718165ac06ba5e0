use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// One GPS fix as it is stored on disk and returned by the query routes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub user_id: String,

    /// Degrees, always within [-90, 90]
    pub lat: f64,

    /// Degrees, always within [-180, 180]
    pub lon: f64,

    /// Epoch milliseconds
    #[serde(default, deserialize_with = "lenient_millis")]
    pub ts: i64,

    /// Accuracy radius reported by the device
    pub acc: Option<f64>,

    /// Source label (e.g. "gps", "network")
    #[serde(default, deserialize_with = "lenient_label")]
    pub provider: Option<String>,
}

impl LocationRecord {
    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

// Files written by older deployments may carry a fractional or null `ts`.
// Accept both instead of discarding the whole collection.
fn lenient_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<Number>::deserialize(deserializer)?;
    Ok(number
        .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)))
        .unwrap_or_default())
}

// Older deployments stored whatever the client sent as the provider.
fn lenient_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(label)) => Some(label),
        Some(other) => Some(other.to_string()),
    })
}
