//! Persisted last-known-good snapshot of the team view.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityKind, Record, ScopeSpec, TeamMember};

/// Snapshot key for an identity.
pub fn snapshot_key(identity_id: &str) -> String {
    format!("cache_{}", identity_id)
}

/// Every entity list of the team view plus the time it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSnapshot {
    pub entities: BTreeMap<EntityKind, Vec<Record>>,
    #[serde(default)]
    pub team_members: Vec<TeamMember>,
    /// Scope the lists were fetched under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeSpec>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_key_is_identity_scoped() {
        assert_eq!(snapshot_key("u-42"), "cache_u-42");
    }

    #[test]
    fn test_snapshot_wire_format() {
        let record: Record = serde_json::from_value(json!({ "id": 1, "_userId": "u-1" })).unwrap();
        let mut entities = BTreeMap::new();
        entities.insert(EntityKind::Debt, vec![record]);
        let snapshot = TeamSnapshot {
            entities,
            team_members: Vec::new(),
            scope: Some(ScopeSpec::all()),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["entities"]["debt"][0]["_userId"], "u-1");
        assert_eq!(value["scope"]["fetchAll"], true);

        let parsed: TeamSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
