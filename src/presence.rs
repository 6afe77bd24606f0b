use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::session::SessionKey;

/// Milliseconds since the Unix epoch, as stamped into `lastUpdated`.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One participant's entry in a session document.
///
/// Every field deserializes leniently: a missing or wrongly typed value turns
/// into its default instead of failing the whole snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub online: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub touching: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_updated: Option<u64>,
}

/// A merge write against one participant's record. `None` fields are left
/// as they are in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touching: Option<bool>,
}

impl PresenceUpdate {
    /// Written when the shared view is mounted.
    pub fn entered() -> Self {
        PresenceUpdate {
            online: Some(true),
            touching: Some(false),
        }
    }

    /// Written when the shared view is torn down.
    pub fn left() -> Self {
        PresenceUpdate {
            online: Some(false),
            touching: Some(false),
        }
    }

    pub fn touching(touching: bool) -> Self {
        PresenceUpdate {
            online: None,
            touching: Some(touching),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_none() && self.touching.is_none()
    }

    /// Applies the update and stamps `last_updated`, never moving it backwards.
    pub fn apply_to(&self, record: &mut PresenceRecord, now: u64) {
        if let Some(online) = self.online {
            record.online = online;
        }
        if let Some(touching) = self.touching {
            record.touching = touching;
        }
        record.last_updated = Some(record.last_updated.map_or(now, |prev| prev.max(now)));
    }
}

/// Full contents of a session document at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: SessionKey,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub exists: bool,
    #[serde(default, deserialize_with = "lenient_records")]
    pub participants: BTreeMap<String, PresenceRecord>,
}

impl SessionSnapshot {
    pub fn missing(session: SessionKey) -> Self {
        SessionSnapshot {
            session,
            exists: false,
            participants: BTreeMap::new(),
        }
    }

    /// The participant's record, or the default (offline, not touching) when absent.
    pub fn record(&self, participant: &str) -> PresenceRecord {
        self.participants
            .get(participant)
            .copied()
            .unwrap_or_default()
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_bool().unwrap_or(false))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_u64())
}

fn lenient_records<'de, D>(deserializer: D) -> Result<BTreeMap<String, PresenceRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(participant, record)| {
                (participant, serde_json::from_value(record).unwrap_or_default())
            })
            .collect()),
        _ => Ok(BTreeMap::new()),
    }
}
