// 📄 Raw provenance documents attached to holders and transactions
//
// Bank formats hand us loosely-typed JSON (the raw CSV row, account info).
// RawData makes "no document" an explicit case so that comparing two payloads
// is always defined: absent == absent, document == document when deep-equal.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// Fingerprint stored for rows without a document. Never produced by a real
/// document because canonical JSON is never empty.
const ABSENT_FINGERPRINT: &str = "absent";

/// Largest integer an f64 represents exactly.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Optional opaque JSON document.
///
/// Serializes as `null` or the document itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Option<Value>", into = "Option<Value>")]
pub enum RawData {
    #[default]
    Absent,
    Document(Value),
}

impl RawData {
    /// Serialize any value into a document.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(serde_json::to_value(value)?.into())
    }

    /// Parse a nullable text column.
    pub fn parse(text: Option<&str>) -> Result<Self, serde_json::Error> {
        match text {
            None => Ok(RawData::Absent),
            Some(text) => Ok(serde_json::from_str::<Value>(text)?.into()),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RawData::Absent)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            RawData::Absent => None,
            RawData::Document(value) => Some(value),
        }
    }

    /// Text stored in a nullable JSON column.
    pub fn to_column(&self) -> Option<String> {
        self.as_value().map(|value| value.to_string())
    }

    /// Structural equality: object key order is ignored, array order is not,
    /// and numbers compare by value (`1` equals `1.0`).
    pub fn structurally_eq(&self, other: &RawData) -> bool {
        match (self, other) {
            (RawData::Absent, RawData::Absent) => true,
            (RawData::Document(a), RawData::Document(b)) => json_equal(a, b),
            _ => false,
        }
    }

    /// Key-sorted, number-normalized serialization. Two documents are
    /// structurally equal exactly when their canonical forms are equal.
    pub fn canonical(&self) -> Option<String> {
        self.as_value().map(|value| {
            let mut out = String::new();
            write_canonical(value, &mut out);
            out
        })
    }

    /// SHA-256 of the canonical form, used by the storage-level uniqueness
    /// constraint on transactions.
    pub fn fingerprint(&self) -> String {
        match self.canonical() {
            None => ABSENT_FINGERPRINT.to_string(),
            Some(canonical) => {
                let mut hasher = Sha256::new();
                hasher.update(canonical.as_bytes());
                format!("{:x}", hasher.finalize())
            }
        }
    }
}

impl From<Option<Value>> for RawData {
    fn from(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => RawData::Absent,
            Some(value) => RawData::Document(value),
        }
    }
}

impl From<Value> for RawData {
    fn from(value: Value) -> Self {
        Some(value).into()
    }
}

impl From<RawData> for Option<Value> {
    fn from(data: RawData) -> Self {
        match data {
            RawData::Absent => None,
            RawData::Document(value) => Some(value),
        }
    }
}

impl PartialEq for RawData {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_eq(other)
    }
}

impl Eq for RawData {}

// ============================================================================
// JSON HELPERS
// ============================================================================

fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, value)| right.get(key).is_some_and(|other| json_equal(value, other)))
        }
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left.iter().zip(right).all(|(value, other)| json_equal(value, other))
        }
        (Value::Number(left), Value::Number(right)) => number_equal(left, right),
        _ => a == b,
    }
}

/// Same rule as the canonical form, so equality and fingerprints agree.
fn number_equal(left: &Number, right: &Number) -> bool {
    canonical_number(left) == canonical_number(right)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Number(number) => out.push_str(&canonical_number(number)),
        other => out.push_str(&other.to_string()),
    }
}

fn canonical_number(number: &Number) -> String {
    if let Some(i) = number.as_i64() {
        return i.to_string();
    }
    if let Some(u) = number.as_u64() {
        return u.to_string();
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT_INT => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => number.to_string(),
    }
}
