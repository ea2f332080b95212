pub mod client;
pub mod document;
pub mod error;
pub mod mapper;
pub mod model;
pub mod pool;
pub mod query;
pub mod reference;
pub mod registry;
pub mod schema;
pub mod sqlite;
pub mod util;

pub use client::{CollectionHandle, ConnectionHandle, Cursor, DatabaseHandle, StoreClient, UpdateOptions};
pub use document::{Attr, AttrDoc, Document, RawDocument, ID_FIELD};
pub use error::{DocBindError, Result};
pub use mapper::{FieldMap, FieldMapper};
pub use model::Model;
pub use pool::ConnectionPool;
pub use query::Filter;
pub use reference::{BackwardReference, DocRef, RemovalPlan, RemovalStep};
pub use registry::{Catalog, CollectionBinder, DirectBinder, ModelStatus, Registry};
pub use schema::{
    parse_declarations, parse_declarations_str, CascadePolicy, DeclarationFile, Defaults,
    IdStrategy, IndexSpec, ModelDeclaration, ReferenceSpec, ResolvedOptions,
};
pub use sqlite::SqliteClient;
pub use util::to_snake;
