// Documents: attribute-style access over JSON mappings, and model-bound instances

use crate::error::{DocBindError, Result};
use crate::mapper::FieldMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::{Deref, Index};
use std::sync::Arc;

/// A document as the store sees it: a plain JSON object.
pub type RawDocument = Map<String, Value>;

/// Name of the identifier field.
pub const ID_FIELD: &str = "_id";

static NULL: Value = Value::Null;

/// Coarse value type used to detect kind-preserving field mappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(n) if n.is_f64() => ValueKind::Float,
            Value::Number(_) => ValueKind::Integer,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Attribute-style access. A missing field is reported as
/// [`DocBindError::FieldNotFound`] rather than as an absent `Option`.
///
/// Nested objects are plain [`Value::Object`]s, which also implement this
/// trait, so `doc.attr("a")?.attr("b")?` and `doc["a"]["b"]` read the same
/// value at any depth.
pub trait Attr {
    fn attr(&self, key: &str) -> Result<&Value>;

    /// Follow a dotted path such as `"address.city"`.
    fn attr_path(&self, path: &str) -> Result<&Value> {
        let mut segments = path.split('.');
        let first = segments.next().unwrap_or_default();
        let mut current = self.attr(first)?;
        for segment in segments {
            current = current
                .attr(segment)
                .map_err(|_| DocBindError::FieldNotFound(path.to_string()))?;
        }
        Ok(current)
    }
}

impl Attr for Value {
    fn attr(&self, key: &str) -> Result<&Value> {
        self.as_object()
            .and_then(|m| m.get(key))
            .ok_or_else(|| DocBindError::FieldNotFound(key.to_string()))
    }
}

/// A JSON mapping with both subscript (`doc["a"]`) and attribute
/// (`doc.attr("a")`) access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrDoc(RawDocument);

impl AttrDoc {
    pub fn new() -> Self {
        AttrDoc(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Delete a field, reporting a missing one as `FieldNotFound`.
    pub fn del_attr(&mut self, key: &str) -> Result<Value> {
        self.0
            .remove(key)
            .ok_or_else(|| DocBindError::FieldNotFound(key.to_string()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &RawDocument {
        &self.0
    }

    pub fn into_map(self) -> RawDocument {
        self.0
    }
}

impl Attr for AttrDoc {
    fn attr(&self, key: &str) -> Result<&Value> {
        self.0
            .get(key)
            .ok_or_else(|| DocBindError::FieldNotFound(key.to_string()))
    }
}

impl Index<&str> for AttrDoc {
    type Output = Value;

    /// Missing keys index to `Null`, like `serde_json::Value`.
    fn index(&self, key: &str) -> &Value {
        self.0.get(key).unwrap_or(&NULL)
    }
}

impl From<RawDocument> for AttrDoc {
    fn from(map: RawDocument) -> Self {
        AttrDoc(map)
    }
}

impl TryFrom<Value> for AttrDoc {
    type Error = DocBindError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(AttrDoc(map)),
            other => Err(DocBindError::Other(format!(
                "Document must be a JSON object, got {}",
                ValueKind::of(&other)
            ))),
        }
    }
}

impl IntoIterator for AttrDoc {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An instance of a model type.
///
/// Every write goes through the owning model's field-mapper pipeline. Reads
/// are available through `Deref` to [`AttrDoc`].
#[derive(Debug, Clone)]
pub struct Document {
    model: Arc<str>,
    mappers: FieldMap,
    fields: AttrDoc,
}

impl Document {
    pub(crate) fn new(model: Arc<str>, mappers: FieldMap) -> Self {
        Document {
            model,
            mappers,
            fields: AttrDoc::new(),
        }
    }

    /// Build a document from raw fields, mapping each one.
    pub(crate) fn from_raw(model: Arc<str>, mappers: FieldMap, raw: RawDocument) -> Result<Self> {
        let mut doc = Document::new(model, mappers);
        doc.merge(raw)?;
        Ok(doc)
    }

    /// Name of the owning model type.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn id(&self) -> Option<&Value> {
        self.fields.get(ID_FIELD)
    }

    /// Assign a field, passing the value through the field mappers.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = self.mappers.map_value(&self.model, key, value.into())?;
        self.fields.insert(key, value);
        Ok(())
    }

    /// Merge fields into this document. Fields not in `raw` are kept.
    pub fn merge(&mut self, raw: RawDocument) -> Result<()> {
        for (key, value) in raw {
            self.set(&key, value)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn del_attr(&mut self, key: &str) -> Result<Value> {
        self.fields.del_attr(key)
    }

    pub fn fields(&self) -> &AttrDoc {
        &self.fields
    }

    pub fn into_fields(self) -> AttrDoc {
        self.fields
    }

    pub(crate) fn assign_id(&mut self, id: Value) {
        self.fields.insert(ID_FIELD, id);
    }

    pub(crate) fn to_raw(&self) -> RawDocument {
        self.fields.as_map().clone()
    }
}

impl Deref for Document {
    type Target = AttrDoc;

    fn deref(&self) -> &AttrDoc {
        &self.fields
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model && self.fields == other.fields
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = serde_json::to_string(self.fields.as_map()).map_err(|_| fmt::Error)?;
        write!(f, "{}({})", self.model, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::FieldMapper;
    use serde_json::json;

    fn doc_from(value: Value) -> AttrDoc {
        AttrDoc::try_from(value).unwrap()
    }

    #[test]
    fn test_subscript_and_attr_agree_at_depth() {
        let mut doc = AttrDoc::new();
        doc.insert("a", json!({ "b": 1, "c": { "d": "deep" } }));

        assert_eq!(doc.attr("a").unwrap().attr("b").unwrap(), &doc["a"]["b"]);
        assert_eq!(doc.attr_path("a.c.d").unwrap(), &json!("deep"));
        assert_eq!(doc["a"]["c"]["d"], json!("deep"));
    }

    #[test]
    fn test_missing_attr_is_field_not_found() {
        let doc = doc_from(json!({ "x": 1 }));
        assert!(matches!(doc.attr("y"), Err(DocBindError::FieldNotFound(ref k)) if k == "y"));
        assert!(matches!(
            doc.attr_path("x.y"),
            Err(DocBindError::FieldNotFound(ref k)) if k == "x.y"
        ));
        // Subscript stays a raw lookup.
        assert_eq!(doc["y"], Value::Null);
        assert!(doc.get("y").is_none());
    }

    #[test]
    fn test_del_attr() {
        let mut doc = doc_from(json!({ "x": 1, "y": 426 }));
        assert_eq!(doc.del_attr("x").unwrap(), json!(1));
        assert_eq!(doc, doc_from(json!({ "y": 426 })));
        assert!(matches!(doc.del_attr("x"), Err(DocBindError::FieldNotFound(_))));
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(AttrDoc::try_from(json!([1, 2])).is_err());
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(ValueKind::of(&json!(1)), ValueKind::Integer);
        assert_eq!(ValueKind::of(&json!(1.5)), ValueKind::Float);
        assert_eq!(ValueKind::of(&json!({})), ValueKind::Object);
        assert_eq!(ValueKind::Float.to_string(), "float");
    }

    #[test]
    fn test_document_set_runs_mappers() {
        let mappers = FieldMap::new(vec![FieldMapper::for_field(
            "x",
            |v| v.is_i64(),
            |v| json!(v.as_i64().unwrap_or_default() as f64),
        )]);
        let mut doc = Document::new(Arc::from("Thing"), mappers);
        doc.set("x", 6).unwrap();
        doc.set("y", 7).unwrap();

        assert_eq!(doc["x"], json!(6.0));
        assert_eq!(doc["y"], json!(7));
        assert_eq!(doc.model(), "Thing");
    }

    #[test]
    fn test_merge_keeps_existing_fields() {
        let mut doc = Document::new(Arc::from("Thing"), FieldMap::default());
        doc.set("x", 1).unwrap();
        doc.set("y", 1).unwrap();

        let mut incoming = RawDocument::new();
        incoming.insert("x".into(), json!(2));
        doc.merge(incoming).unwrap();

        assert_eq!(doc["x"], json!(2));
        assert_eq!(doc["y"], json!(1));
    }

    #[test]
    fn test_display() {
        let mut doc = Document::new(Arc::from("TestModel"), FieldMap::default());
        assert_eq!(doc.to_string(), "TestModel({})");
        doc.set("foo", "bar").unwrap();
        assert_eq!(doc.to_string(), r#"TestModel({"foo":"bar"})"#);
    }
}
