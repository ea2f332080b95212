//! Document store client seam.
//!
//! The model layer talks to a store only through these traits: a client
//! hands out (lazy) connections, a connection hands out databases, a
//! database hands out collections. The SQLite backend in [`crate::sqlite`]
//! is the bundled implementation; [`NullCollection`] stands in for
//! interface-only model types.

mod cursor;
mod null;

pub use cursor::Cursor;
pub use null::NullCollection;

use crate::document::RawDocument;
use crate::error::Result;
use crate::query::Filter;
use crate::schema::IndexSpec;
use serde_json::Value;
use std::sync::Arc;

/// Factory for connections to a (host, port) target.
pub trait StoreClient: Send + Sync {
    /// Create a connection handle. Implementations must not perform network
    /// or file I/O here; the handle connects on first use.
    fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn ConnectionHandle>>;
}

pub trait ConnectionHandle: Send + Sync {
    fn host(&self) -> &str;
    fn port(&self) -> u16;
    /// Whether the underlying connection has actually been established.
    fn is_connected(&self) -> bool;
    fn database(&self, name: &str) -> Result<Arc<dyn DatabaseHandle>>;
}

pub trait DatabaseHandle: Send + Sync {
    fn name(&self) -> &str;
    fn collection(&self, name: &str) -> Result<Arc<dyn CollectionHandle>>;
    fn collection_names(&self) -> Result<Vec<String>>;
}

/// Options for [`CollectionHandle::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document built from the filter when nothing matches.
    pub upsert: bool,
    /// Update every match instead of the first one.
    pub multi: bool,
}

pub trait CollectionHandle: Send + Sync {
    fn name(&self) -> &str;
    /// Owning database, or `None` for placeholder collections.
    fn database_name(&self) -> Option<&str>;
    /// Make sure the index exists. Ensuring an equivalent index again is a no-op.
    fn ensure_index(&self, spec: &IndexSpec) -> Result<()>;
    fn index_information(&self) -> Result<Vec<IndexSpec>>;
    fn find_one(&self, filter: &Filter, fields: Option<&[String]>) -> Result<Option<RawDocument>>;
    fn find(&self, filter: &Filter) -> Result<Cursor>;
    /// Returns the number of documents modified or inserted.
    fn update(&self, filter: &Filter, update: &Value, options: UpdateOptions) -> Result<u64>;
    /// Returns the number of documents removed.
    fn remove(&self, filter: &Filter) -> Result<u64>;
    /// Upsert by `_id`; the document must carry one.
    fn save(&self, document: &RawDocument) -> Result<()>;
}
