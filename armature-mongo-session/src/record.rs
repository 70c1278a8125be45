//! Session record and session data types.

use crate::error::{SessionError, SessionResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Session data handed over by the session middleware.
///
/// An arbitrary JSON object. The store only looks inside it for the
/// expiration hint at `cookie.expires` (or the legacy `cookie._expires`),
/// given either as an RFC 3339 string or as epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData {
    data: Map<String, Value>,
}

impl SessionData {
    /// Create empty session data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value from the session data.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a value in the session data.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        let json_value =
            serde_json::to_value(value).map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.data.insert(key.to_string(), json_value);
        Ok(())
    }

    /// Set a value, consuming and returning the session data.
    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> SessionResult<Self> {
        self.set(key, value)?;
        Ok(self)
    }

    /// Remove a value from the session data.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Check if a key exists in the session data.
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the session data has no keys.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Attach an expiration hint under `cookie.expires`.
    pub fn with_expires(mut self, expires_at: DateTime<Utc>) -> Self {
        let stamp = Value::String(expires_at.to_rfc3339_opts(SecondsFormat::Millis, true));
        match self.data.get_mut("cookie") {
            Some(Value::Object(cookie)) => {
                cookie.remove("_expires");
                cookie.insert("expires".to_string(), stamp);
            }
            _ => {
                let mut cookie = Map::new();
                cookie.insert("expires".to_string(), stamp);
                self.data.insert("cookie".to_string(), Value::Object(cookie));
            }
        }
        self
    }

    /// Read the expiration hint, if the caller attached one.
    ///
    /// A hint that is present but cannot be read as a timestamp is an error,
    /// so that a corrupted cookie never persists as a session without expiry.
    pub fn expiration_hint(&self) -> SessionResult<Option<DateTime<Utc>>> {
        let Some(cookie) = self.data.get("cookie").and_then(Value::as_object) else {
            return Ok(None);
        };

        match cookie.get("expires").or_else(|| cookie.get("_expires")) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|at| Some(at.with_timezone(&Utc)))
                .map_err(|e| {
                    SessionError::Serialization(format!("invalid cookie expiration {:?}: {}", s, e))
                }),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .map(Some)
                .ok_or_else(|| {
                    SessionError::Serialization(format!("invalid cookie expiration {}", n))
                }),
            Some(other) => Err(SessionError::Serialization(format!(
                "invalid cookie expiration {}",
                other
            ))),
        }
    }
}

impl From<Map<String, Value>> for SessionData {
    fn from(data: Map<String, Value>) -> Self {
        Self { data }
    }
}

/// A persisted session, as stored in the document collection.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// Session identifier, supplied by the middleware
    pub id: String,
    /// Serialized session data
    pub payload: String,
    /// When the record stops being live; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Serialize session data into a record for `id`.
    ///
    /// Fails before producing a record if the data or its expiration hint
    /// cannot be encoded.
    pub fn encode(id: &str, data: &SessionData) -> SessionResult<Self> {
        let expires_at = data.expiration_hint()?;
        let payload =
            serde_json::to_string(data).map_err(|e| SessionError::Serialization(e.to_string()))?;

        Ok(Self {
            id: id.to_string(),
            payload,
            expires_at,
        })
    }

    /// Parse the stored payload back into session data.
    pub fn decode(&self) -> SessionResult<SessionData> {
        serde_json::from_str(&self.payload).map_err(|e| {
            SessionError::Deserialization(format!("session {}: {}", self.id, e))
        })
    }

    /// Check whether the record is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// Check whether the record is expired right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
