//! Document collection trait definition and in-memory implementation.

use crate::error::StoreResult;
use crate::record::SessionRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A collection of session records keyed by session ID.
///
/// This is the whole surface the session store needs from a document
/// database. Each method is a single request; the only atomicity assumed is
/// the backend's own single-document atomicity.
#[async_trait]
pub trait DocumentCollection: Send + Sync + 'static {
    /// Find the record stored under `id`.
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if no record exists.
    async fn find_one(&self, id: &str) -> StoreResult<Option<SessionRecord>>;

    /// Insert or replace the record with the same ID.
    async fn save(&self, record: &SessionRecord) -> StoreResult<()>;

    /// Remove the record stored under `id`.
    ///
    /// Removing a missing record is not an error.
    async fn remove(&self, id: &str) -> StoreResult<()>;

    /// Remove every record.
    ///
    /// # Returns
    ///
    /// Returns the number of removed records.
    async fn remove_all(&self) -> StoreResult<u64>;

    /// Count stored records, expired ones included.
    async fn count(&self) -> StoreResult<u64>;

    /// Remove the record stored under `id` only if it is expired at `now`.
    ///
    /// A record rewritten since it was seen expired is left alone.
    ///
    /// # Returns
    ///
    /// Returns `true` if a record was removed.
    async fn remove_if_expired(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Remove every record whose expiration is before `now`.
    ///
    /// # Returns
    ///
    /// Returns the number of removed records.
    async fn remove_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
impl<C: DocumentCollection + ?Sized> DocumentCollection for Arc<C> {
    async fn find_one(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        (**self).find_one(id).await
    }

    async fn save(&self, record: &SessionRecord) -> StoreResult<()> {
        (**self).save(record).await
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        (**self).remove(id).await
    }

    async fn remove_if_expired(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        (**self).remove_if_expired(id, now).await
    }

    async fn remove_all(&self) -> StoreResult<u64> {
        (**self).remove_all().await
    }

    async fn count(&self) -> StoreResult<u64> {
        (**self).count().await
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        (**self).remove_expired(now).await
    }
}

/// In-memory collection.
///
/// Useful for development and tests; records live as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemoryCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    async fn find_one(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn save(&self, record: &SessionRecord) -> StoreResult<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn remove_if_expired(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        if records.get(id).is_some_and(|record| record.is_expired_at(now)) {
            records.remove(id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn remove_all(&self) -> StoreResult<u64> {
        let mut records = self.records.write().await;
        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.records.read().await.len() as u64)
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, payload: &str, expires_at: Option<DateTime<Utc>>) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            payload: payload.to_string(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_save_replaces_whole_record() {
        let collection = MemoryCollection::new();
        let expires = Utc::now() + Duration::hours(1);

        collection
            .save(&record("abc", r#"{"a":1}"#, Some(expires)))
            .await
            .unwrap();
        collection
            .save(&record("abc", r#"{"b":2}"#, None))
            .await
            .unwrap();

        let stored = collection.find_one("abc").await.unwrap().unwrap();
        assert_eq!(stored.payload, r#"{"b":2}"#);
        assert_eq!(stored.expires_at, None);
        assert_eq!(collection.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let collection = MemoryCollection::new();
        collection.remove("missing").await.unwrap();
        assert!(collection.find_one("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_expired_keeps_live_records() {
        let collection = MemoryCollection::new();
        let now = Utc::now();

        collection
            .save(&record("old", "{}", Some(now - Duration::seconds(5))))
            .await
            .unwrap();
        collection
            .save(&record("new", "{}", Some(now + Duration::seconds(5))))
            .await
            .unwrap();
        collection.save(&record("forever", "{}", None)).await.unwrap();

        assert_eq!(collection.remove_expired(now).await.unwrap(), 1);
        assert_eq!(collection.count().await.unwrap(), 2);
        assert!(collection.find_one("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_if_expired_spares_live_record() {
        let collection = MemoryCollection::new();
        let now = Utc::now();

        collection
            .save(&record("abc", "{}", Some(now - Duration::seconds(5))))
            .await
            .unwrap();
        assert!(collection.remove_if_expired("abc", now).await.unwrap());
        assert!(!collection.remove_if_expired("abc", now).await.unwrap());

        collection.save(&record("abc", "{}", None)).await.unwrap();
        assert!(!collection.remove_if_expired("abc", now).await.unwrap());
        assert!(collection.find_one("abc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_all_reports_count() {
        let collection = MemoryCollection::new();
        for id in ["a", "b", "c"] {
            collection.save(&record(id, "{}", None)).await.unwrap();
        }

        assert_eq!(collection.remove_all().await.unwrap(), 3);
        assert_eq!(collection.count().await.unwrap(), 0);
    }
}
