//! Generic business record with server-attached ownership metadata.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys the remote assigns; never accepted from client payloads.
pub const RESERVED_KEYS: [&str; 3] = ["id", "_userId", "_userName"];

/// Record identifier. The remote uses numeric ids for some entities and string
/// ids for others; two ids are equal when their textual forms are.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(i64),
    Text(String),
}

impl RecordId {
    /// Parse an id taken from a URL path segment.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => RecordId::Number(n),
            Err(_) => RecordId::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Number(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl PartialEq for RecordId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RecordId::Number(a), RecordId::Number(b)) => a == b,
            (RecordId::Text(a), RecordId::Text(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl Eq for RecordId {}

impl Hash for RecordId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Number(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Text(s.to_string())
    }
}

/// A business record as returned by the remote.
///
/// `owner_id`/`owner_name` are read-only provenance (`_userId`/`_userName` on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(rename = "_userId", default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(rename = "_userName", default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Copy of this record with `patch` merged over its business fields.
    pub fn patched(&self, patch: &Map<String, Value>) -> Record {
        let mut next = self.clone();
        for (key, value) in patch {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            next.fields.insert(key.clone(), value.clone());
        }
        next
    }
}

/// Strip server-assigned keys from a create/update payload.
pub fn sanitize_input(mut input: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_KEYS {
        if input.remove(key).is_some() {
            tracing::debug!(key, "dropping server-assigned key from payload");
        }
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_compares_textually() {
        assert_eq!(RecordId::Number(42), RecordId::Text("42".to_string()));
        assert_eq!(RecordId::parse("42"), RecordId::Number(42));
        assert_eq!(RecordId::parse("abc"), RecordId::from("abc"));
        assert_ne!(RecordId::Number(1), RecordId::from("01"));
    }

    #[test]
    fn test_record_wire_format() {
        let record: Record = serde_json::from_value(json!({
            "id": 7,
            "_userId": "u-1",
            "_userName": "Amina",
            "customer": "Acme"
        }))
        .unwrap();

        assert_eq!(record.id, RecordId::Number(7));
        assert_eq!(record.owner_id.as_deref(), Some("u-1"));
        assert_eq!(record.fields["customer"], "Acme");
        assert!(!record.fields.contains_key("_userId"));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["_userName"], "Amina");
        assert_eq!(back["id"], 7);
    }

    #[test]
    fn test_patch_keeps_provenance() {
        let record: Record = serde_json::from_value(json!({
            "id": "r-1",
            "_userId": "u-1",
            "status": "open"
        }))
        .unwrap();
        let patch = json!({ "status": "closed", "_userId": "u-2", "id": "r-9" });
        let patched = record.patched(patch.as_object().unwrap());

        assert_eq!(patched.fields["status"], "closed");
        assert_eq!(patched.owner_id.as_deref(), Some("u-1"));
        assert_eq!(patched.id, RecordId::from("r-1"));
    }

    #[test]
    fn test_sanitize_input_strips_owner_metadata() {
        let input = json!({ "title": "Call back", "_userId": "u-1", "_userName": "x", "id": 3 });
        let clean = sanitize_input(input.as_object().unwrap().clone());
        assert_eq!(clean.len(), 1);
        assert_eq!(clean["title"], "Call back");
    }
}
