//! Document-database session storage for Armature framework.
//!
//! A session store in the shape pluggable session middleware expects:
//! `get`, `set`, `destroy`, `length` and `clear`, keyed by a session ID the
//! middleware supplies. Sessions are persisted as one document per ID; the
//! session data is stored as JSON text next to an optional expiration date
//! copied from the session cookie.
//!
//! # Expiration
//!
//! A session whose expiration has passed is never returned. The read that
//! finds it answers `None` and removes the record in the background.
//! [`SessionStore::length`] counts stored documents, so expired sessions
//! still count until they are read, cleaned up with
//! [`DocumentSessionStore::cleanup_expired`], or removed by the reaper
//! enabled with `clear_interval`.
//!
//! # Features
//!
//! - `mongodb` - MongoDB session storage (enabled by default)
//! - `couchdb` - CouchDB session storage
//!
//! The in-memory collection is always available.
//!
//! # Examples
//!
//! ## MongoDB Session Store (Default)
//!
//! ```no_run
//! use armature_mongo_session::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     // Database and collection come from the URL path
//!     let config = SessionConfig::from_url("mongodb://localhost:27017/myapp/sessions");
//!     let store = MongoSessionStore::connect(config).await?;
//!
//!     // The middleware supplies the session ID
//!     let session = SessionData::new().with("user", "alice")?;
//!     store.set("abc", &session).await?;
//!
//!     if let Some(session) = store.get("abc").await? {
//!         let user: Option<String> = session.get("user");
//!         println!("User: {:?}", user);
//!     }
//!
//!     // Logout
//!     store.destroy("abc").await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## In-Memory Session Store
//!
//! ```
//! use armature_mongo_session::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let store = DocumentSessionStore::new(MemoryCollection::new());
//!
//!     store.set("abc", &SessionData::new().with("user", "alice")?).await?;
//!     assert_eq!(store.length().await?, 1);
//!
//!     store.clear().await?;
//!     assert_eq!(store.length().await?, 0);
//!
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod config;
pub mod error;
pub mod record;
pub mod store;

#[cfg(feature = "mongodb")]
pub mod mongodb_session;

#[cfg(feature = "couchdb")]
pub mod couchdb_session;

pub use collection::{DocumentCollection, MemoryCollection};
pub use config::{ResolvedConfig, SessionConfig, resolve_config};
pub use error::{Operation, SessionError, SessionResult, StoreError, StoreResult};
pub use record::{SessionData, SessionRecord};
pub use store::{DocumentSessionStore, SessionStore};

#[cfg(feature = "mongodb")]
pub use mongodb_session::{MongoCollection, MongoSessionStore};

#[cfg(feature = "couchdb")]
pub use couchdb_session::{CouchDbCollection, CouchDbSessionStore};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::collection::{DocumentCollection, MemoryCollection};
    pub use crate::config::{ResolvedConfig, SessionConfig, resolve_config};
    pub use crate::error::{Operation, SessionError, SessionResult, StoreError, StoreResult};
    pub use crate::record::{SessionData, SessionRecord};
    pub use crate::store::{DocumentSessionStore, SessionStore};

    #[cfg(feature = "mongodb")]
    pub use crate::mongodb_session::{MongoCollection, MongoSessionStore};

    #[cfg(feature = "couchdb")]
    pub use crate::couchdb_session::{CouchDbCollection, CouchDbSessionStore};
}
