use crate::client::{CollectionHandle, ConnectionHandle, UpdateOptions};
use crate::document::{AttrDoc, Document, RawDocument, ID_FIELD};
use crate::error::{DocBindError, Result};
use crate::query::{self, Filter};
use crate::reference::{self, BackwardReference, DocRef, RemovalPlan};
use crate::schema::{IndexSpec, ResolvedOptions};
use crate::util::display_value;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// A registered model type: resolved options, the bound collection and the
/// frozen list of backward references pointing at it.
///
/// Models are created by [`crate::Registry`] and handed out by
/// [`crate::Catalog`] as `Arc<Model>`; nothing about them changes afterwards.
pub struct Model {
    name: Arc<str>,
    options: ResolvedOptions,
    collection: Arc<dyn CollectionHandle>,
    connection: Option<Arc<dyn ConnectionHandle>>,
    backward_references: Vec<BackwardReference>,
}

impl Model {
    pub(crate) fn new(
        options: ResolvedOptions,
        collection: Arc<dyn CollectionHandle>,
        connection: Option<Arc<dyn ConnectionHandle>>,
        backward_references: Vec<BackwardReference>,
    ) -> Self {
        Model {
            name: Arc::from(options.name.as_str()),
            options,
            collection,
            connection,
            backward_references,
        }
    }

    // ── Metadata ───────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    pub fn is_interface(&self) -> bool {
        self.options.interface
    }

    pub fn collection(&self) -> &Arc<dyn CollectionHandle> {
        &self.collection
    }

    /// Shared connection handle; `None` for interface-only types.
    pub fn connection(&self) -> Option<&Arc<dyn ConnectionHandle>> {
        self.connection.as_ref()
    }

    /// Entries in the order they are applied on removal.
    pub fn backward_references(&self) -> &[BackwardReference] {
        &self.backward_references
    }

    // ── Documents ──────────────────────────────────────────────────

    pub fn new_document(&self) -> Document {
        Document::new(Arc::clone(&self.name), self.options.field_map.clone())
    }

    /// Build a document from a JSON object, mapping every field.
    pub fn document(&self, value: Value) -> Result<Document> {
        self.hydrate(AttrDoc::try_from(value)?.into_map())
    }

    pub(crate) fn hydrate(&self, raw: RawDocument) -> Result<Document> {
        Document::from_raw(Arc::clone(&self.name), self.options.field_map.clone(), raw)
    }

    fn check_owned(&self, doc: &Document) -> Result<()> {
        if doc.model() != self.name() {
            return Err(DocBindError::ModelMismatch {
                expected: self.name().to_string(),
                found: doc.model().to_string(),
            });
        }
        Ok(())
    }

    fn require_id<'a>(&self, doc: &'a Document) -> Result<&'a Value> {
        doc.id().ok_or_else(|| DocBindError::MissingId {
            model: self.name().to_string(),
        })
    }

    fn ensure_id(&self, doc: &mut Document) -> Value {
        if let Some(id) = doc.id() {
            return id.clone();
        }
        let id = Value::String(self.options.id_strategy.generate());
        doc.assign_id(id.clone());
        id
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn find(&self, filter: &Filter) -> Result<Vec<Document>> {
        self.collection
            .find(filter)?
            .into_iter()
            .map(|raw| self.hydrate(raw))
            .collect()
    }

    pub fn find_one(&self, filter: &Filter) -> Result<Option<Document>> {
        self.collection
            .find_one(filter, None)?
            .map(|raw| self.hydrate(raw))
            .transpose()
    }

    pub fn get(&self, id: &Value) -> Result<Option<Document>> {
        self.find_one(&query::by_id(id))
    }

    pub fn count(&self, filter: &Filter) -> Result<u64> {
        Ok(self.collection.find(filter)?.count())
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Upsert the whole document by identifier, generating one if absent.
    pub fn save(&self, doc: &mut Document) -> Result<()> {
        self.check_owned(doc)?;
        self.ensure_id(doc);
        self.collection.save(&doc.to_raw())
    }

    /// Apply `patch` to the stored document matched by identifier. Without a
    /// patch (or with an empty one), every field except `_id` is `$set`.
    pub fn update(&self, doc: &Document, patch: Option<Value>) -> Result<()> {
        self.check_owned(doc)?;
        let id = self.require_id(doc)?;
        let patch = match patch {
            Some(patch) if !patch.as_object().is_some_and(|m| m.is_empty()) => patch,
            _ => {
                let mut fields = doc.to_raw();
                fields.remove(ID_FIELD);
                json!({ "$set": fields })
            }
        };
        self.collection
            .update(&query::by_id(id), &patch, UpdateOptions::default())?;
        Ok(())
    }

    /// Re-fetch by identifier and merge the stored fields into `doc`. Fields
    /// not returned (or not selected) are left as they are.
    pub fn load(&self, doc: &mut Document, fields: Option<&[String]>) -> Result<()> {
        self.check_owned(doc)?;
        let id = self.require_id(doc)?.clone();
        let raw = self
            .collection
            .find_one(&query::by_id(&id), fields)?
            .ok_or_else(|| DocBindError::DocumentNotFound {
                collection: self.options.collection.clone(),
                id: display_value(&id),
            })?;
        doc.merge(raw)
    }

    /// Remove the document, first applying every backward reference's policy.
    /// A DENY entry with live referents aborts before anything is changed.
    pub fn remove(&self, doc: &mut Document) -> Result<RemovalPlan> {
        self.check_owned(doc)?;
        let id = self.require_id(doc)?.clone();

        let outcome = if self.backward_references.is_empty() {
            RemovalPlan {
                model: self.name().to_string(),
                reference: Value::Null,
                steps: Vec::new(),
            }
        } else {
            let reference = self.reference_to(doc, true)?.to_value()?;
            reference::cascade(self.name(), &reference, &self.backward_references)?
        };

        let removed = self.collection.remove(&query::by_id(&id))?;
        log::debug!("Removed {removed} {} document(s) with _id {}", self.name, display_value(&id));
        Ok(outcome)
    }

    /// Report what [`Model::remove`] would do, without changing anything.
    pub fn removal_plan(&self, doc: &Document) -> Result<RemovalPlan> {
        self.check_owned(doc)?;
        let id = self.require_id(doc)?.clone();
        let reference = DocRef::new(&self.options.collection, id, self.options.database.as_deref()).to_value()?;
        reference::plan(self.name(), &reference, &self.backward_references)
    }

    // ── References ─────────────────────────────────────────────────

    /// Reference value for `doc`. An identifier is generated and attached
    /// first if the document has none.
    pub fn reference_to(&self, doc: &mut Document, include_database: bool) -> Result<DocRef> {
        self.reference_with(doc, include_database, RawDocument::new())
    }

    /// Like [`Model::reference_to`], with extra fields on the reference value.
    pub fn reference_with(
        &self,
        doc: &mut Document,
        include_database: bool,
        extra: RawDocument,
    ) -> Result<DocRef> {
        self.check_owned(doc)?;
        let id = self.ensure_id(doc);
        let database = if include_database {
            self.options.database.as_deref()
        } else {
            None
        };
        let mut reference = DocRef::new(&self.options.collection, id, database);
        reference.extra = extra;
        Ok(reference)
    }

    /// Fetch the document a reference points at.
    pub fn dereference(&self, reference: &DocRef) -> Result<Option<Document>> {
        if reference.collection != self.options.collection {
            return Err(DocBindError::ForeignReference(format!(
                "{reference} is not in collection {}",
                self.options.collection
            )));
        }
        if let Some(db) = &reference.database {
            if self.options.database.as_deref() != Some(db.as_str()) {
                return Err(DocBindError::ForeignReference(format!(
                    "{reference} is not in database {}",
                    self.options.database.as_deref().unwrap_or("<none>")
                )));
            }
        }
        self.get(&reference.id)
    }

    // ── Indexes ────────────────────────────────────────────────────

    /// Ensure every declared index exists. Already-present equivalent indexes
    /// are left alone.
    pub fn auto_index(&self) -> Result<()> {
        for index in &self.options.indices {
            log::debug!("Ensuring index {} on {}", index.index_name(), self.options.collection);
            self.collection.ensure_index(index)?;
        }
        Ok(())
    }

    pub fn index_information(&self) -> Result<Vec<IndexSpec>> {
        self.collection.index_information()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("collection", &self.options.collection)
            .field("database", &self.options.database)
            .field("interface", &self.options.interface)
            .field("backward_references", &self.backward_references)
            .finish()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.options.database {
            Some(db) => write!(f, "{} ({db}.{})", self.name, self.options.collection),
            None => write!(f, "{} ({})", self.name, self.options.collection),
        }
    }
}
