use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored nonce or token.
///
/// A true nonce validates exactly once and is deleted when read. A token
/// (non-true-nonce) stays valid until its expiry. Records whose data
/// carries a truthy `permanent` flag are stored with `expiry == 0` and
/// never expire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nonce {
    pub nonce: String,
    pub true_nonce: bool,
    pub expiry: i64,
    pub data: Map<String, Value>,
}

impl Nonce {
    pub fn is_permanent(&self) -> bool {
        self.data.get("permanent").is_some_and(truthy)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry < now && !self.is_permanent()
    }
}

/// Loose boolean parsing for flags arriving over the wire: accepts JSON
/// booleans, nonzero numbers, and the usual string spellings.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0) || n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.to_lowercase().as_str(), "1" | "true" | "on" | "yes"),
        _ => false,
    }
}
