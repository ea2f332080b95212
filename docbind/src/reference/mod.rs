// Reference values and the delete-time cascade engine

use crate::client::CollectionHandle;
use crate::document::RawDocument;
use crate::error::{DocBindError, Result};
use crate::query;
use crate::schema::CascadePolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Reference to a document in another (or the same) collection.
///
/// Serialises as `{"$ref": collection, "$id": id, "$db": database, ...extra}`.
/// Referencing documents store this value verbatim in their reference field,
/// and cascades match it by equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocRef {
    #[serde(rename = "$ref")]
    pub collection: String,
    #[serde(rename = "$id")]
    pub id: Value,
    #[serde(rename = "$db", default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(flatten)]
    pub extra: RawDocument,
}

impl DocRef {
    pub fn new(collection: &str, id: Value, database: Option<&str>) -> Self {
        DocRef {
            collection: collection.to_string(),
            id,
            database: database.map(str::to_string),
            extra: RawDocument::new(),
        }
    }

    /// Attach an extra field to the reference value.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse a stored reference value. Returns `None` for anything that is
    /// not shaped like a reference.
    pub fn from_value(value: &Value) -> Option<DocRef> {
        serde_json::from_value(value.clone()).ok()
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(db) = &self.database {
            write!(f, "{db}.")?;
        }
        write!(f, "{}/{}", self.collection, crate::util::display_value(&self.id))
    }
}

/// Entry owned by a referenced type: "documents of `referent` point at me
/// through `field`, and `policy` decides what happens when I am removed".
#[derive(Clone)]
pub struct BackwardReference {
    pub field: String,
    pub referent: String,
    pub referent_collection: Arc<dyn CollectionHandle>,
    pub policy: CascadePolicy,
}

impl fmt::Debug for BackwardReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackwardReference")
            .field("field", &self.field)
            .field("referent", &self.referent)
            .field("collection", &self.referent_collection.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl fmt::Display for BackwardReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.referent, self.field, self.policy)
    }
}

/// Effect of one backward-reference entry on a removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalStep {
    pub referent: String,
    pub field: String,
    pub policy: CascadePolicy,
    /// Referents found (dry run) or touched (actual removal).
    pub count: u64,
}

/// Per-entry outcome of removing one document, in backward-reference order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovalPlan {
    pub model: String,
    pub reference: Value,
    pub steps: Vec<RemovalStep>,
}

impl RemovalPlan {
    /// First DENY entry with live referents, if any.
    pub fn blocking(&self) -> Option<&RemovalStep> {
        self.steps
            .iter()
            .find(|s| s.policy == CascadePolicy::Deny && s.count > 0)
    }

    pub fn is_allowed(&self) -> bool {
        self.blocking().is_none()
    }
}

fn referent_filter(entry: &BackwardReference, reference: &Value) -> query::Filter {
    query::field_eq(&entry.field, reference.clone())
}

/// Count referents per entry without changing anything.
pub(crate) fn plan(model: &str, reference: &Value, entries: &[BackwardReference]) -> Result<RemovalPlan> {
    let mut steps = Vec::with_capacity(entries.len());
    for entry in entries {
        let count = match entry.policy {
            CascadePolicy::Nothing => 0,
            _ => entry
                .referent_collection
                .find(&referent_filter(entry, reference))?
                .count(),
        };
        steps.push(RemovalStep {
            referent: entry.referent.clone(),
            field: entry.field.clone(),
            policy: entry.policy,
            count,
        });
    }
    Ok(RemovalPlan {
        model: model.to_string(),
        reference: reference.clone(),
        steps,
    })
}

/// Apply every entry's policy for the removal of the document identified by
/// `reference`. The caller deletes the document itself afterwards.
///
/// All DENY entries are checked before any CASCADE or NULLIFY runs, so a
/// refused removal leaves the store untouched.
pub(crate) fn cascade(model: &str, reference: &Value, entries: &[BackwardReference]) -> Result<RemovalPlan> {
    for entry in entries.iter().filter(|e| e.policy == CascadePolicy::Deny) {
        let count = entry
            .referent_collection
            .find(&referent_filter(entry, reference))?
            .count();
        if count > 0 {
            return Err(DocBindError::ExistingReferences {
                model: model.to_string(),
                referent: entry.referent.clone(),
                field: entry.field.clone(),
                count,
            });
        }
    }

    let mut steps = Vec::with_capacity(entries.len());
    for entry in entries {
        let filter = referent_filter(entry, reference);
        let count = match entry.policy {
            CascadePolicy::Nothing | CascadePolicy::Deny => 0,
            CascadePolicy::Cascade => {
                let removed = entry.referent_collection.remove(&filter)?;
                if removed > 0 {
                    log::info!("Cascade removed {removed} {} document(s) via {}", entry.referent, entry.field);
                }
                removed
            }
            CascadePolicy::Nullify => {
                let mut nullified = 0;
                for mut referent in entry.referent_collection.find(&filter)? {
                    query::unset_path(&mut referent, &entry.field);
                    entry.referent_collection.save(&referent)?;
                    nullified += 1;
                }
                if nullified > 0 {
                    log::info!("Nullified {} on {nullified} {} document(s)", entry.field, entry.referent);
                }
                nullified
            }
        };
        steps.push(RemovalStep {
            referent: entry.referent.clone(),
            field: entry.field.clone(),
            policy: entry.policy,
            count,
        });
    }

    Ok(RemovalPlan {
        model: model.to_string(),
        reference: reference.clone(),
        steps,
    })
}
