use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PresenceError;

pub const SEPARATOR: char = '_';

pub fn validate_participant(id: &str) -> Result<(), PresenceError> {
    if id.is_empty() {
        return Err(PresenceError::EmptyParticipant);
    }
    if id.contains(SEPARATOR) {
        return Err(PresenceError::InvalidParticipant(id.to_owned()));
    }
    Ok(())
}

/// Identifies the shared document of two participants.
///
/// The pair is stored sorted by UTF-16 code units, the order the mobile
/// clients sort ids in, so both sides derive the same key no matter who
/// opened the shared space first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey {
    first: String,
    second: String,
}

impl SessionKey {
    pub fn new(a: &str, b: &str) -> Result<Self, PresenceError> {
        validate_participant(a)?;
        validate_participant(b)?;
        if a == b {
            return Err(PresenceError::SameParticipant(a.to_owned()));
        }
        let (first, second) = if a.encode_utf16().lt(b.encode_utf16()) {
            (a, b)
        } else {
            (b, a)
        };
        Ok(SessionKey {
            first: first.to_owned(),
            second: second.to_owned(),
        })
    }

    pub fn participants(&self) -> (&str, &str) {
        (&self.first, &self.second)
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.first == participant || self.second == participant
    }

    /// The other member of the pair, if `participant` is a member at all.
    pub fn other(&self, participant: &str) -> Option<&str> {
        if self.first == participant {
            Some(&self.second)
        } else if self.second == participant {
            Some(&self.first)
        } else {
            None
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.first, SEPARATOR, self.second)
    }
}

impl FromStr for SessionKey {
    type Err = PresenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once(SEPARATOR)
            .ok_or_else(|| PresenceError::MalformedSessionKey(s.to_owned()))?;
        SessionKey::new(a, b).map_err(|_| PresenceError::MalformedSessionKey(s.to_owned()))
    }
}

impl TryFrom<String> for SessionKey {
    type Error = PresenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_symmetric() {
        let ab = SessionKey::new("alice", "bob").unwrap();
        let ba = SessionKey::new("bob", "alice").unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.to_string(), "alice_bob");
        assert_eq!(ba.to_string(), "alice_bob");
    }

    #[test]
    fn key_sorts_like_the_app_did() {
        let key = SessionKey::new("zQ81", "Ab9x").unwrap();
        assert_eq!(key.to_string(), "Ab9x_zQ81");
        assert_eq!(key.participants(), ("Ab9x", "zQ81"));
    }

    #[test]
    fn key_sorts_by_utf16_code_units() {
        // U+1F338 encodes as a surrogate pair below U+FF61 in UTF-16,
        // although its UTF-8 bytes sort after it.
        let key = SessionKey::new("\u{FF61}", "\u{1F338}").unwrap();
        assert_eq!(key.participants(), ("\u{1F338}", "\u{FF61}"));
        assert_eq!(key, SessionKey::new("\u{1F338}", "\u{FF61}").unwrap());
    }

    #[test]
    fn rejects_bad_pairs() {
        assert_eq!(
            SessionKey::new("alice", "alice"),
            Err(PresenceError::SameParticipant("alice".into()))
        );
        assert_eq!(
            SessionKey::new("", "bob"),
            Err(PresenceError::EmptyParticipant)
        );
        assert_eq!(
            SessionKey::new("al_ice", "bob"),
            Err(PresenceError::InvalidParticipant("al_ice".into()))
        );
    }

    #[test]
    fn parses_unsorted_keys_into_canonical_form() {
        let key: SessionKey = "bob_alice".parse().unwrap();
        assert_eq!(key.to_string(), "alice_bob");
        assert!("alice".parse::<SessionKey>().is_err());
        assert!("alice_alice".parse::<SessionKey>().is_err());
    }

    #[test]
    fn other_member() {
        let key = SessionKey::new("alice", "bob").unwrap();
        assert_eq!(key.other("alice"), Some("bob"));
        assert_eq!(key.other("bob"), Some("alice"));
        assert_eq!(key.other("carol"), None);
        assert!(!key.contains("carol"));
    }

    #[test]
    fn serializes_as_a_plain_string() {
        let key = SessionKey::new("bob", "alice").unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"alice_bob\"");
        let back: SessionKey = serde_json::from_str("\"alice_bob\"").unwrap();
        assert_eq!(back, key);
    }
}
