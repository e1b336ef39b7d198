use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an [`Entity`] (UUIDv7 — time-sortable for log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of thing an [`Entity`] row represents (§3 DATA MODEL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    #[default]
    Person,
    Model,
    Org,
    Agent,
    Project,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Person => "person",
            EntityType::Model => "model",
            EntityType::Org => "org",
            EntityType::Agent => "agent",
            EntityType::Project => "project",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "person" => Ok(EntityType::Person),
            "model" => Ok(EntityType::Model),
            "org" => Ok(EntityType::Org),
            "agent" => Ok(EntityType::Agent),
            "project" => Ok(EntityType::Project),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// Identifies which App (agent factory) a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppName(pub String);

impl AppName {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AppName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Gateway-visible session key: `[appName:]localKey` (spec §6).
///
/// `appName` is omitted when the key routes to the gateway's `defaultApp`.
/// Max 256 bytes; both segments match `[a-zA-Z0-9_.-]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey {
    pub app: Option<String>,
    pub local: String,
}

/// Maximum wire length of a session key, in bytes (spec §6).
pub const SESSION_KEY_MAX_BYTES: usize = 256;

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

impl SessionKey {
    /// Construct a key scoped to `app`.
    pub fn scoped(app: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            app: Some(app.into()),
            local: local.into(),
        }
    }

    /// Construct a key with no App prefix (routes to `defaultApp`).
    pub fn unscoped(local: impl Into<String>) -> Self {
        Self {
            app: None,
            local: local.into(),
        }
    }

    /// Parse the wire format `[appName:]localKey`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.as_bytes().len() > SESSION_KEY_MAX_BYTES {
            return Err(format!(
                "session key exceeds {SESSION_KEY_MAX_BYTES} bytes"
            ));
        }
        match raw.split_once(':') {
            Some((app, local)) => {
                if !is_valid_segment(app) || !is_valid_segment(local) {
                    return Err(format!("malformed session key: {raw:?}"));
                }
                Ok(Self {
                    app: Some(app.to_string()),
                    local: local.to_string(),
                })
            }
            None => {
                if !is_valid_segment(raw) {
                    return Err(format!("malformed session key: {raw:?}"));
                }
                Ok(Self {
                    app: None,
                    local: raw.to_string(),
                })
            }
        }
    }

    pub fn app_name(&self) -> Option<&str> {
        self.app.as_deref()
    }

    pub fn local_key(&self) -> &str {
        &self.local
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.app {
            Some(app) => write!(f, "{app}:{}", self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

impl TryFrom<String> for SessionKey {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.to_string()
    }
}

/// Per-connection identifier (random UUID, not persisted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub String);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scoped_key() {
        let key = SessionKey::parse("telegram:alice").unwrap();
        assert_eq!(key.app_name(), Some("telegram"));
        assert_eq!(key.local_key(), "alice");
        assert_eq!(key.to_string(), "telegram:alice");
    }

    #[test]
    fn parse_unscoped_key() {
        let key = SessionKey::parse("alice").unwrap();
        assert_eq!(key.app_name(), None);
        assert_eq!(key.local_key(), "alice");
        assert_eq!(key.to_string(), "alice");
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(SessionKey::parse("alice bob").is_err());
        assert!(SessionKey::parse("a:b:c").is_err());
        assert!(SessionKey::parse("").is_err());
    }

    #[test]
    fn rejects_oversized_key() {
        let huge = "a".repeat(SESSION_KEY_MAX_BYTES + 1);
        assert!(SessionKey::parse(&huge).is_err());
    }
}
