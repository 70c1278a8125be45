//! MongoDB session storage implementation.

use crate::collection::DocumentCollection;
use crate::config::{ResolvedConfig, SessionConfig};
use crate::error::{SessionError, SessionResult, StoreError, StoreResult};
use crate::record::SessionRecord;
use crate::store::DocumentSessionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use mongodb::bson::{self, Bson, Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};

/// MongoDB-backed session store.
pub type MongoSessionStore = DocumentSessionStore<MongoCollection>;

/// Session collection in MongoDB.
///
/// Documents have the shape
/// `{ _id: <session id>, session: <JSON text>, expires: <date> }`, with
/// `expires` omitted for sessions without an expiration.
#[derive(Clone)]
pub struct MongoCollection {
    collection: Collection<Document>,
}

impl MongoCollection {
    /// Connect to MongoDB with resolved settings.
    pub async fn connect(config: &ResolvedConfig) -> SessionResult<Self> {
        let options = ClientOptions::parse(config.connection_uri())
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let client =
            Client::with_options(options).map_err(|e| SessionError::Connection(e.to_string()))?;

        Ok(Self::from_client(&client, config))
    }

    /// Use an existing client.
    pub fn from_client(client: &Client, config: &ResolvedConfig) -> Self {
        Self::from_collection(
            client
                .database(&config.database)
                .collection::<Document>(&config.collection),
        )
    }

    /// Use an existing collection handle.
    pub fn from_collection(collection: Collection<Document>) -> Self {
        Self { collection }
    }

    /// Get the collection name.
    pub fn name(&self) -> &str {
        self.collection.name()
    }
}

fn id_filter(id: &str) -> Document {
    doc! { "_id": id }
}

/// Matches records expired at `now`, optionally narrowed to one ID.
fn expired_filter(id: Option<&str>, now: DateTime<Utc>) -> Document {
    let mut filter = doc! { "expires": { "$lt": to_bson_date(now) } };
    if let Some(id) = id {
        filter.insert("_id", id);
    }
    filter
}

fn to_bson_date(at: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(at.timestamp_millis())
}

fn to_document(record: &SessionRecord) -> Document {
    let mut document = doc! {
        "_id": record.id.as_str(),
        "session": record.payload.as_str(),
    };

    if let Some(at) = record.expires_at {
        document.insert("expires", to_bson_date(at));
    }

    document
}

fn from_document(document: &Document) -> StoreResult<SessionRecord> {
    let id = document
        .get_str("_id")
        .map_err(|e| StoreError::Malformed(format!("_id: {}", e)))?;
    let payload = document
        .get_str("session")
        .map_err(|e| StoreError::Malformed(format!("session {}: {}", id, e)))?;

    let expires_at = match document.get("expires") {
        None | Some(Bson::Null) => None,
        Some(Bson::DateTime(at)) => Some(
            DateTime::from_timestamp_millis(at.timestamp_millis()).ok_or_else(|| {
                StoreError::Malformed(format!("session {}: expires out of range", id))
            })?,
        ),
        Some(other) => {
            return Err(StoreError::Malformed(format!(
                "session {}: expires is not a date: {}",
                id, other
            )));
        }
    };

    Ok(SessionRecord {
        id: id.to_string(),
        payload: payload.to_string(),
        expires_at,
    })
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    async fn find_one(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        self.collection
            .find_one(id_filter(id))
            .await?
            .as_ref()
            .map(from_document)
            .transpose()
    }

    async fn save(&self, record: &SessionRecord) -> StoreResult<()> {
        self.collection
            .replace_one(id_filter(&record.id), to_document(record))
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        self.collection.delete_one(id_filter(id)).await?;
        Ok(())
    }

    async fn remove_if_expired(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = self
            .collection
            .delete_one(expired_filter(Some(id), now))
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn remove_all(&self) -> StoreResult<u64> {
        let result = self.collection.delete_many(doc! {}).await?;
        Ok(result.deleted_count)
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.collection.count_documents(doc! {}).await?)
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = self
            .collection
            .delete_many(expired_filter(None, now))
            .await?;
        Ok(result.deleted_count)
    }
}

impl DocumentSessionStore<MongoCollection> {
    /// Connect a MongoDB session store.
    ///
    /// Configuration is resolved before any connection attempt, so a missing
    /// database name fails immediately with [`SessionError::Config`]. Starts
    /// the expired-session reaper when `clear_interval` is set.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use armature_mongo_session::prelude::*;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = SessionConfig::from_url("mongodb://localhost:27017/myapp/sessions");
    /// let store = MongoSessionStore::connect(config).await?;
    ///
    /// store.set("abc", &SessionData::new().with("user", "alice")?).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: SessionConfig) -> SessionResult<Self> {
        let resolved = config.resolve()?;
        debug!("Resolved session store config: {:?}", resolved);

        let collection = MongoCollection::connect(&resolved).await?;
        info!(
            "MongoDB session store ready on {}:{} ({}.{})",
            resolved.host, resolved.port, resolved.database, resolved.collection
        );

        let store = Self::new(collection);
        if let Some(interval) = resolved.clear_interval {
            store.spawn_reaper(interval)?;
        }

        Ok(store)
    }
}
