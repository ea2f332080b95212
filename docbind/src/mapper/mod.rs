// Field-mapper pipeline applied to every field write on a model document

use crate::document::ValueKind;
use crate::error::{DocBindError, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type MatchFn = dyn Fn(&str, &Value) -> bool + Send + Sync;
type TransformFn = dyn Fn(Value) -> Value + Send + Sync;

/// A (predicate, transform) pair. When the predicate accepts a field name and
/// value, the transform replaces the value before it is stored.
///
/// The transform must change the value's kind. Data read back from the store
/// goes through the same pipeline, and a kind-preserving transform would be
/// applied a second time.
#[derive(Clone)]
pub struct FieldMapper {
    matcher: Arc<MatchFn>,
    transform: Arc<TransformFn>,
}

impl FieldMapper {
    pub fn new<M, T>(matcher: M, transform: T) -> Self
    where
        M: Fn(&str, &Value) -> bool + Send + Sync + 'static,
        T: Fn(Value) -> Value + Send + Sync + 'static,
    {
        FieldMapper {
            matcher: Arc::new(matcher),
            transform: Arc::new(transform),
        }
    }

    /// Mapper that only looks at one field name.
    pub fn for_field<M, T>(field: &str, matcher: M, transform: T) -> Self
    where
        M: Fn(&Value) -> bool + Send + Sync + 'static,
        T: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let field = field.to_string();
        Self::new(move |name, value| name == field && matcher(value), transform)
    }

    pub fn matches(&self, field: &str, value: &Value) -> bool {
        (self.matcher)(field, value)
    }
}

impl fmt::Debug for FieldMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldMapper { .. }")
    }
}

/// Ordered, shareable list of field mappers.
#[derive(Clone, Default, Debug)]
pub struct FieldMap(Arc<Vec<FieldMapper>>);

impl FieldMap {
    pub fn new(mappers: Vec<FieldMapper>) -> Self {
        FieldMap(Arc::new(mappers))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Run a value through every matching mapper, in order.
    pub fn map_value(&self, model: &str, field: &str, mut value: Value) -> Result<Value> {
        for mapper in self.0.iter() {
            if !mapper.matches(field, &value) {
                continue;
            }
            let before = ValueKind::of(&value);
            let mapped = (mapper.transform)(value);
            if ValueKind::of(&mapped) == before {
                return Err(DocBindError::FieldMapper {
                    model: model.to_string(),
                    field: field.to_string(),
                    kind: before.to_string(),
                });
            }
            value = mapped;
        }
        Ok(value)
    }
}

impl From<Vec<FieldMapper>> for FieldMap {
    fn from(mappers: Vec<FieldMapper>) -> Self {
        FieldMap::new(mappers)
    }
}
