//! CouchDB session storage implementation.
//!
//! This module requires the `couchdb` feature flag.

use crate::collection::DocumentCollection;
use crate::error::{SessionError, SessionResult, StoreError, StoreResult};
use crate::record::SessionRecord;
use crate::store::DocumentSessionStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// CouchDB-backed session store.
pub type CouchDbSessionStore = DocumentSessionStore<CouchDbCollection>;

/// CouchDB document wrapper for sessions.
#[derive(Debug, Serialize, Deserialize)]
struct CouchDbSession {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<String>,
}

impl CouchDbSession {
    fn from_record(record: &SessionRecord, rev: Option<String>) -> Self {
        Self {
            id: record.id.clone(),
            rev,
            session: record.payload.clone(),
            expires: record.expires_at.map(format_timestamp),
        }
    }

    fn into_record(self) -> StoreResult<SessionRecord> {
        let expires_at = self
            .expires
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|e| StoreError::Malformed(format!("session {}: {}", self.id, e)))
            })
            .transpose()?;

        Ok(SessionRecord {
            id: self.id,
            payload: self.session,
            expires_at,
        })
    }
}

/// Fixed-width UTC timestamps, so string order matches time order in
/// Mango selectors.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn count_deleted(results: &[BulkResult]) -> u64 {
    results.iter().filter(|result| result.ok).count() as u64
}

#[derive(Deserialize)]
struct AllDocsResponse {
    rows: Vec<DocRow>,
}

#[derive(Deserialize)]
struct DocRow {
    id: String,
    value: DocValue,
}

#[derive(Deserialize)]
struct DocValue {
    rev: String,
}

/// Per-document outcome in a `_bulk_docs` response.
#[derive(Deserialize)]
struct BulkResult {
    #[serde(default)]
    ok: bool,
}

/// Documents fetched per `_find` round when cleaning up.
const EXPIRED_BATCH_SIZE: usize = 1_000;

#[derive(Deserialize)]
struct FindResponse {
    docs: Vec<FoundDoc>,
}

#[derive(Deserialize)]
struct FoundDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev")]
    rev: String,
}

/// Session collection in a CouchDB database.
///
/// # Database Setup
///
/// Create the database before connecting, and an index on `expires` if
/// expired sessions are cleaned up in bulk:
///
/// ```bash
/// curl -X PUT http://localhost:5984/sessions
///
/// curl -X POST http://localhost:5984/sessions/_index \
///   -H "Content-Type: application/json" \
///   -d '{"index": {"fields": ["expires"]}, "name": "by-expiration"}'
/// ```
///
/// # Examples
///
/// ```ignore
/// use armature_mongo_session::{CouchDbCollection, CouchDbSessionStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let collection = CouchDbCollection::connect_with_auth(
///         "http://localhost:5984",
///         "sessions",
///         "admin",
///         "password",
///     )
///     .await?;
///     let store = CouchDbSessionStore::new(collection);
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CouchDbCollection {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl CouchDbCollection {
    /// Connect to a CouchDB database.
    ///
    /// # Arguments
    ///
    /// * `url` - CouchDB server URL (e.g., "http://localhost:5984")
    /// * `database` - Database holding the sessions
    pub async fn connect(url: &str, database: &str) -> SessionResult<Self> {
        Self::connect_with(url, database, None).await
    }

    /// Connect to a CouchDB database with basic authentication.
    pub async fn connect_with_auth(
        url: &str,
        database: &str,
        username: &str,
        password: &str,
    ) -> SessionResult<Self> {
        Self::connect_with(url, database, Some((username, password))).await
    }

    async fn connect_with(
        url: &str,
        database: &str,
        auth: Option<(&str, &str)>,
    ) -> SessionResult<Self> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SessionError::InvalidUrl(
                "CouchDB URL must start with http:// or https://".to_string(),
            ));
        }

        if database.is_empty() {
            return Err(SessionError::Config(
                "CouchDB database name is required".to_string(),
            ));
        }

        let client = Client::builder()
            .build()
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let collection = Self {
            client,
            base_url: format!("{}/{}", url.trim_end_matches('/'), database),
            username: auth.map(|(user, _)| user.to_string()),
            password: auth.map(|(_, pass)| pass.to_string()),
        };

        // Verify the database exists
        let response = collection
            .request(Method::HEAD, &collection.base_url)
            .send()
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SessionError::Connection(format!(
                "Failed to open CouchDB database '{}': {}",
                database,
                response.status()
            )));
        }

        info!("CouchDB session collection ready at {}", collection.base_url);
        Ok(collection)
    }

    fn doc_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(id))
    }

    /// Build an authenticated request.
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);

        match (&self.username, &self.password) {
            (Some(username), password) => request.basic_auth(username, password.as_ref()),
            _ => request,
        }
    }

    async fn fetch(&self, id: &str) -> StoreResult<Option<CouchDbSession>> {
        let response = self.request(Method::GET, &self.doc_url(id)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(StoreError::Server(format!(
                "Failed to get session: {}",
                response.status()
            )));
        }

        Ok(Some(response.json().await?))
    }

    /// Delete documents in one `_bulk_docs` request.
    ///
    /// Conflicts are reported per document; only successful deletions are
    /// counted.
    async fn delete_many(&self, docs: Vec<(String, String)>) -> StoreResult<u64> {
        if docs.is_empty() {
            return Ok(0);
        }

        let body = json!({
            "docs": docs
                .into_iter()
                .map(|(id, rev)| json!({ "_id": id, "_rev": rev, "_deleted": true }))
                .collect::<Vec<_>>()
        });

        let url = format!("{}/_bulk_docs", self.base_url);
        let response = self.request(Method::POST, &url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(StoreError::Server(format!(
                "Failed to delete sessions: {}",
                response.status()
            )));
        }

        let results: Vec<BulkResult> = response.json().await?;
        Ok(count_deleted(&results))
    }

    /// Fetch one batch of expired document IDs and revisions.
    async fn find_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<(String, String)>> {
        let url = format!("{}/_find", self.base_url);
        let query = json!({
            "selector": { "expires": { "$lt": format_timestamp(now) } },
            "fields": ["_id", "_rev"],
            "limit": EXPIRED_BATCH_SIZE,
        });

        let response = self.request(Method::POST, &url).json(&query).send().await?;

        if !response.status().is_success() {
            return Err(StoreError::Server(format!(
                "Failed to query expired sessions: {}",
                response.status()
            )));
        }

        let found: FindResponse = response.json().await?;
        Ok(found.docs.into_iter().map(|doc| (doc.id, doc.rev)).collect())
    }

    async fn all_docs(&self) -> StoreResult<Vec<DocRow>> {
        let url = format!("{}/_all_docs", self.base_url);
        let response = self.request(Method::GET, &url).send().await?;

        if !response.status().is_success() {
            return Err(StoreError::Server(format!(
                "Failed to list sessions: {}",
                response.status()
            )));
        }

        let docs: AllDocsResponse = response.json().await?;

        Ok(docs
            .rows
            .into_iter()
            .filter(|row| !row.id.starts_with("_design/"))
            .collect())
    }
}

#[async_trait]
impl DocumentCollection for CouchDbCollection {
    async fn find_one(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        self.fetch(id)
            .await?
            .map(CouchDbSession::into_record)
            .transpose()
    }

    async fn save(&self, record: &SessionRecord) -> StoreResult<()> {
        // Replacing a document requires its current revision
        let rev = self.fetch(&record.id).await?.and_then(|doc| doc.rev);
        let doc = CouchDbSession::from_record(record, rev);

        let response = self
            .request(Method::PUT, &self.doc_url(&record.id))
            .json(&doc)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(StoreError::Server(format!(
                "Failed to save session ({}): {}",
                status, error_text
            )));
        }

        Ok(())
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        let Some(rev) = self.fetch(id).await?.and_then(|doc| doc.rev) else {
            return Ok(()); // Already deleted
        };

        let url = format!("{}?rev={}", self.doc_url(id), rev);
        let response = self.request(Method::DELETE, &url).send().await?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(StoreError::Server(format!(
                "Failed to delete session: {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn remove_all(&self) -> StoreResult<u64> {
        let docs = self
            .all_docs()
            .await?
            .into_iter()
            .map(|row| (row.id, row.value.rev))
            .collect();

        self.delete_many(docs).await
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.all_docs().await?.len() as u64)
    }

    async fn remove_if_expired(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let Some(doc) = self.fetch(id).await? else {
            return Ok(false);
        };
        let Some(rev) = doc.rev.clone() else {
            return Ok(false);
        };
        if !doc.into_record()?.is_expired_at(now) {
            return Ok(false);
        }

        // Deleting by the fetched revision leaves a concurrent rewrite intact
        let url = format!("{}?rev={}", self.doc_url(id), rev);
        let response = self.request(Method::DELETE, &url).send().await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Ok(false),
            status => Err(StoreError::Server(format!(
                "Failed to delete expired session: {}",
                status
            ))),
        }
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut removed = 0;

        loop {
            let batch = self.find_expired(now).await?;
            if batch.is_empty() {
                break;
            }

            let batch_len = batch.len();
            let deleted = self.delete_many(batch).await?;
            debug!(
                "Deleted {} of {} expired CouchDB sessions",
                deleted, batch_len
            );
            removed += deleted;

            // Nothing deletable left in this batch; stop instead of refetching it
            if deleted == 0 || batch_len < EXPIRED_BATCH_SIZE {
                break;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_shape() {
        let record = SessionRecord {
            id: "abc".to_string(),
            payload: r#"{"user":"alice"}"#.to_string(),
            expires_at: DateTime::from_timestamp_millis(1_700_000_000_000),
        };

        let doc = CouchDbSession::from_record(&record, Some("1-xyz".to_string()));
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["_id"], "abc");
        assert_eq!(value["_rev"], "1-xyz");
        assert_eq!(value["expires"], "2023-11-14T22:13:20.000Z");
        assert_eq!(doc.into_record().unwrap(), record);
    }

    #[test]
    fn test_document_without_expiry_or_rev() {
        let record = SessionRecord {
            id: "abc".to_string(),
            payload: "{}".to_string(),
            expires_at: None,
        };

        let value = serde_json::to_value(CouchDbSession::from_record(&record, None)).unwrap();
        assert!(value.get("_rev").is_none());
        assert!(value.get("expires").is_none());
    }

    #[test]
    fn test_timestamps_sort_chronologically() {
        let earlier = DateTime::from_timestamp_millis(999).unwrap();
        let later = DateTime::from_timestamp_millis(1_000).unwrap();
        assert!(format_timestamp(earlier) < format_timestamp(later));
    }

    #[test]
    fn test_bulk_conflicts_are_not_counted() {
        let results: Vec<BulkResult> = serde_json::from_str(
            r#"[
                {"id": "a", "rev": "2-x", "ok": true},
                {"id": "b", "error": "conflict", "reason": "Document update conflict."},
                {"id": "c", "rev": "3-y", "ok": true}
            ]"#,
        )
        .unwrap();

        assert_eq!(count_deleted(&results), 2);
    }

    #[tokio::test]
    async fn test_rejects_non_http_url() {
        let result = CouchDbCollection::connect("couchdb://localhost", "sessions").await;
        assert!(matches!(result, Err(SessionError::InvalidUrl(_))));
    }
}
