use serde::{Deserialize, Serialize};

use crate::presence::{PresenceUpdate, SessionSnapshot};
use crate::session::SessionKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceMessage {
    Identify {
        participant: String,
    },
    Subscribe {
        session: SessionKey,
    },
    Unsubscribe {
        session: SessionKey,
    },
    Update {
        session: SessionKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        online: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        touching: Option<bool>,
    },
    Snapshot(SessionSnapshot),
    Rejected {
        reason: String,
    },
    KeepAlive {},
}

impl PresenceMessage {
    pub fn update(session: SessionKey, update: PresenceUpdate) -> Self {
        PresenceMessage::Update {
            session,
            online: update.online,
            touching: update.touching,
        }
    }
}
