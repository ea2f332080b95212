use super::{CollectionHandle, Cursor, UpdateOptions};
use crate::document::RawDocument;
use crate::error::{DocBindError, Result};
use crate::query::Filter;
use crate::schema::IndexSpec;
use serde_json::Value;

/// Placeholder collection bound to interface-only model types.
/// Every store operation fails with [`DocBindError::InterfaceModel`].
#[derive(Debug, Clone)]
pub struct NullCollection {
    model: String,
    name: String,
}

impl NullCollection {
    pub fn new(model: &str, name: &str) -> Self {
        NullCollection {
            model: model.to_string(),
            name: name.to_string(),
        }
    }

    fn refuse<T>(&self) -> Result<T> {
        Err(DocBindError::InterfaceModel(self.model.clone()))
    }
}

impl CollectionHandle for NullCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn database_name(&self) -> Option<&str> {
        None
    }

    fn ensure_index(&self, _spec: &IndexSpec) -> Result<()> {
        self.refuse()
    }

    fn index_information(&self) -> Result<Vec<IndexSpec>> {
        self.refuse()
    }

    fn find_one(&self, _filter: &Filter, _fields: Option<&[String]>) -> Result<Option<RawDocument>> {
        self.refuse()
    }

    fn find(&self, _filter: &Filter) -> Result<Cursor> {
        self.refuse()
    }

    fn update(&self, _filter: &Filter, _update: &Value, _options: UpdateOptions) -> Result<u64> {
        self.refuse()
    }

    fn remove(&self, _filter: &Filter) -> Result<u64> {
        self.refuse()
    }

    fn save(&self, _document: &RawDocument) -> Result<()> {
        self.refuse()
    }
}
