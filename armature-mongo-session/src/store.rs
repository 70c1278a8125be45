//! Session store trait and the document-backed implementation.

use crate::collection::DocumentCollection;
use crate::error::{Operation, SessionError, SessionResult, StoreError};
use crate::record::{SessionData, SessionRecord};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Session store capability set used by session middleware.
///
/// The middleware owns cookies and session ID generation; the store only
/// persists what it is given under the ID it is given. Every call resolves
/// exactly once, to either a value or an error.
///
/// # Examples
///
/// ```
/// use armature_mongo_session::prelude::*;
///
/// # async fn example(store: &impl SessionStore) -> SessionResult<()> {
/// let session = SessionData::new().with("user", "alice")?;
/// store.set("abc", &session).await?;
///
/// let loaded = store.get("abc").await?;
/// assert_eq!(loaded, Some(session));
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get a session by ID.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(session))` if found and live, `Ok(None)` if not found
    /// or expired.
    async fn get(&self, session_id: &str) -> SessionResult<Option<SessionData>>;

    /// Store a session, replacing any session with the same ID.
    async fn set(&self, session_id: &str, session: &SessionData) -> SessionResult<()>;

    /// Delete a session. Deleting a missing session succeeds.
    async fn destroy(&self, session_id: &str) -> SessionResult<()>;

    /// Number of stored sessions, including expired sessions not yet purged.
    async fn length(&self) -> SessionResult<u64>;

    /// Delete all sessions (use with caution!).
    ///
    /// # Returns
    ///
    /// Returns the number of removed sessions.
    async fn clear(&self) -> SessionResult<u64>;
}

/// Session store over any [`DocumentCollection`].
///
/// Cloning is cheap and clones share the same collection handle.
///
/// # Examples
///
/// ```
/// use armature_mongo_session::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> SessionResult<()> {
/// let store = DocumentSessionStore::new(MemoryCollection::new());
///
/// store.set("abc", &SessionData::new().with("user", "alice")?).await?;
/// assert_eq!(store.length().await?, 1);
///
/// store.destroy("abc").await?;
/// assert!(store.get("abc").await?.is_none());
/// # Ok(())
/// # }
/// ```
pub struct DocumentSessionStore<C> {
    collection: Arc<C>,
}

impl<C> Clone for DocumentSessionStore<C> {
    fn clone(&self) -> Self {
        Self {
            collection: Arc::clone(&self.collection),
        }
    }
}

impl<C: DocumentCollection> DocumentSessionStore<C> {
    /// Create a store over the given collection.
    pub fn new(collection: C) -> Self {
        Self::from_shared(Arc::new(collection))
    }

    /// Create a store over an already shared collection.
    pub fn from_shared(collection: Arc<C>) -> Self {
        Self { collection }
    }

    /// Get the underlying collection.
    pub fn collection(&self) -> &C {
        &self.collection
    }

    /// Remove an expired record in the background.
    ///
    /// The read that found the record has already answered; a failure here
    /// is only logged.
    fn purge_expired(&self, session_id: &str) {
        let collection = Arc::clone(&self.collection);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            match collection.remove_if_expired(&session_id, Utc::now()).await {
                Ok(true) => debug!("Removed expired session {}", session_id),
                Ok(false) => debug!("Session {} was rewritten before purge", session_id),
                Err(e) => warn!("Failed to remove expired session {}: {}", session_id, e),
            }
        });
    }

    /// Remove every session whose expiration has elapsed.
    ///
    /// # Returns
    ///
    /// Returns the number of removed sessions.
    pub async fn cleanup_expired(&self) -> SessionResult<u64> {
        let removed = self
            .collection
            .remove_expired(Utc::now())
            .await
            .map_err(|e| SessionError::transport(Operation::Cleanup, e))?;

        debug!("Cleaned up {} expired sessions", removed);
        Ok(removed)
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every `interval` on a
    /// background task.
    ///
    /// Failures are logged and the next tick tries again. Abort the returned
    /// handle to stop the reaper. A zero interval is rejected with
    /// [`SessionError::Config`].
    pub fn spawn_reaper(&self, interval: Duration) -> SessionResult<JoinHandle<()>> {
        if interval.is_zero() {
            return Err(SessionError::Config(
                "reaper interval must be non-zero".to_string(),
            ));
        }

        let store = self.clone();

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = store.cleanup_expired().await {
                    warn!("Expired session cleanup failed: {}", e);
                }
            }
        }))
    }
}

#[async_trait]
impl<C: DocumentCollection> SessionStore for DocumentSessionStore<C> {
    async fn get(&self, session_id: &str) -> SessionResult<Option<SessionData>> {
        debug!("Loading session {}", session_id);

        let record = self
            .collection
            .find_one(session_id)
            .await
            .map_err(|e| match e {
                StoreError::Malformed(reason) => SessionError::Deserialization(reason),
                e => SessionError::transport(Operation::Get, e),
            })?;

        match record {
            Some(record) if record.is_expired() => {
                debug!("Session {} expired at {:?}", session_id, record.expires_at);
                self.purge_expired(session_id);
                Ok(None)
            }
            Some(record) => record.decode().map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, session_id: &str, session: &SessionData) -> SessionResult<()> {
        let record = SessionRecord::encode(session_id, session)?;

        debug!(
            "Saving session {} (expires: {:?})",
            session_id, record.expires_at
        );

        self.collection
            .save(&record)
            .await
            .map_err(|e| SessionError::transport(Operation::Set, e))
    }

    async fn destroy(&self, session_id: &str) -> SessionResult<()> {
        debug!("Destroying session {}", session_id);

        self.collection
            .remove(session_id)
            .await
            .map_err(|e| SessionError::transport(Operation::Destroy, e))
    }

    async fn length(&self) -> SessionResult<u64> {
        self.collection
            .count()
            .await
            .map_err(|e| SessionError::transport(Operation::Length, e))
    }

    async fn clear(&self) -> SessionResult<u64> {
        let removed = self
            .collection
            .remove_all()
            .await
            .map_err(|e| SessionError::transport(Operation::Clear, e))?;

        debug!("Cleared {} sessions", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use chrono::Duration as ChronoDuration;

    fn store() -> DocumentSessionStore<MemoryCollection> {
        DocumentSessionStore::new(MemoryCollection::new())
    }

    #[tokio::test]
    async fn test_get_unknown_is_absent() {
        assert_eq!(store().get("never-written").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let store = store();
        let session = SessionData::new().with("user", "alice").unwrap();

        store.set("abc", &session).await.unwrap();

        let loaded = store.get("abc").await.unwrap().unwrap();
        assert_eq!(loaded.get::<String>("user").as_deref(), Some("alice"));
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_second_write_supersedes_first() {
        let store = store();

        store
            .set("abc", &SessionData::new().with("a", 1).unwrap())
            .await
            .unwrap();
        store
            .set("abc", &SessionData::new().with("b", 2).unwrap())
            .await
            .unwrap();

        let loaded = store.get("abc").await.unwrap().unwrap();
        assert!(!loaded.contains("a"));
        assert_eq!(loaded.get::<i32>("b"), Some(2));
        assert_eq!(store.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_absent_and_purged() {
        let store = store();
        let session = SessionData::new()
            .with("user", "alice")
            .unwrap()
            .with_expires(Utc::now() - ChronoDuration::seconds(1));

        store.set("abc", &session).await.unwrap();
        assert_eq!(store.length().await.unwrap(), 1);

        assert_eq!(store.get("abc").await.unwrap(), None);

        // Let the background purge run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = store();
        let past = Utc::now() - ChronoDuration::minutes(1);
        let future = Utc::now() + ChronoDuration::minutes(1);

        store
            .set("old", &SessionData::new().with_expires(past))
            .await
            .unwrap();
        store
            .set("new", &SessionData::new().with_expires(future))
            .await
            .unwrap();

        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert_eq!(store.length().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_runs_periodically() {
        let store = store();
        store
            .set(
                "old",
                &SessionData::new().with_expires(Utc::now() - ChronoDuration::minutes(1)),
            )
            .await
            .unwrap();

        let reaper = store.spawn_reaper(Duration::from_secs(60)).unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.length().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.length().await.unwrap(), 0);

        reaper.abort();
    }

    #[tokio::test]
    async fn test_zero_reaper_interval_is_rejected() {
        let err = store().spawn_reaper(Duration::ZERO).unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[tokio::test]
    async fn test_purge_spares_session_rewritten_after_read() {
        let store = store();
        let expired = SessionData::new()
            .with("user", "old")
            .unwrap()
            .with_expires(Utc::now() - ChronoDuration::seconds(1));

        store.set("abc", &expired).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), None);

        let fresh = SessionData::new().with("user", "new").unwrap();
        store.set("abc", &fresh).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("abc").await.unwrap(), Some(fresh));
    }
}
