// Filter matching, update application and projection over raw JSON documents

use crate::document::{RawDocument, ID_FIELD};
use crate::error::{DocBindError, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A query filter: field path -> literal or operator object.
pub type Filter = Map<String, Value>;

const FILTER_OPERATORS: &[&str] = &["$eq", "$ne", "$exists", "$in"];

/// Filter matching one document by identifier.
pub fn by_id(id: &Value) -> Filter {
    field_eq(ID_FIELD, id.clone())
}

/// Filter matching documents whose `field` equals `value`.
pub fn field_eq(field: &str, value: Value) -> Filter {
    let mut filter = Filter::new();
    filter.insert(field.to_string(), value);
    filter
}

/// The identifier when the filter is exactly `{ "_id": <literal> }`.
pub fn id_only(filter: &Filter) -> Option<&Value> {
    if filter.len() != 1 {
        return None;
    }
    filter
        .get(ID_FIELD)
        .filter(|value| operator_object(value).is_none())
}

/// Resolve a dotted path inside a document.
pub fn lookup<'a>(doc: &'a RawDocument, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// True when every condition of the filter holds for the document.
pub fn matches(doc: &RawDocument, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(path, condition)| condition_holds(lookup(doc, path), condition))
}

/// Plain-equality conditions of a filter, as seed fields for an upsert.
pub fn literal_conditions(filter: &Filter) -> RawDocument {
    let mut seed = RawDocument::new();
    for (path, condition) in filter {
        if operator_object(condition).is_none() {
            set_path(&mut seed, path, condition.clone());
        }
    }
    seed
}

fn operator_object(value: &Value) -> Option<&Map<String, Value>> {
    let map = value.as_object()?;
    let all_operators = !map.is_empty() && map.keys().all(|k| FILTER_OPERATORS.contains(&k.as_str()));
    all_operators.then_some(map)
}

fn condition_holds(actual: Option<&Value>, condition: &Value) -> bool {
    let Some(operators) = operator_object(condition) else {
        return equals(actual, condition);
    };
    operators.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => equals(actual, operand),
        "$ne" => !equals(actual, operand),
        "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
        "$in" => operand
            .as_array()
            .map(|candidates| candidates.iter().any(|c| equals(actual, c)))
            .unwrap_or(false),
        _ => false,
    })
}

// Array fields match a scalar operand when any element equals it. A missing
// field matches null.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(value) if value == expected => true,
        Some(Value::Array(items)) if !expected.is_array() => items.iter().any(|i| i == expected),
        Some(_) => false,
    }
}

/// Apply an update document. `$set`, `$unset` and `$inc` are supported; an
/// update without operators replaces the document, keeping its `_id`.
pub fn apply_update(doc: &mut RawDocument, update: &Value) -> Result<()> {
    let update = update
        .as_object()
        .ok_or_else(|| DocBindError::Other("Update must be a JSON object".into()))?;

    let has_operators = update.keys().any(|k| k.starts_with('$'));
    if !has_operators {
        let id = doc.get(ID_FIELD).cloned();
        *doc = update.clone();
        if let Some(id) = id {
            doc.insert(ID_FIELD.to_string(), id);
        }
        return Ok(());
    }

    for (op, fields) in update {
        let fields = fields.as_object().ok_or_else(|| {
            DocBindError::Other(format!("Operand of {op} must be a JSON object"))
        })?;
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone());
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    unset_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    let current = lookup(doc, path).cloned().unwrap_or(Value::from(0));
                    let sum = add_numbers(&current, delta).ok_or_else(|| {
                        DocBindError::Other(format!("Cannot $inc non-numeric field '{path}'"))
                    })?;
                    set_path(doc, path, sum);
                }
            }
            other => {
                return Err(DocBindError::Other(format!("Unsupported update operator {other}")));
            }
        }
    }
    Ok(())
}

fn add_numbers(a: &Value, b: &Value) -> Option<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(Value::from(x.checked_add(y)?));
    }
    let sum = a.as_f64()? + b.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}

/// Set a dotted path, creating intermediate objects as needed.
pub fn set_path(doc: &mut RawDocument, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

/// Remove a dotted path. Missing paths are ignored.
pub fn unset_path(doc: &mut RawDocument, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = doc.get_mut(head) {
                unset_path(child, rest);
            }
        }
    }
}

/// Keep only the selected fields (and `_id`).
pub fn project(doc: &RawDocument, fields: &[String]) -> RawDocument {
    let mut projected = RawDocument::new();
    if let Some(id) = doc.get(ID_FIELD) {
        projected.insert(ID_FIELD.to_string(), id.clone());
    }
    for field in fields {
        if let Some(value) = lookup(doc, field) {
            set_path(&mut projected, field, value.clone());
        }
    }
    projected
}

/// Total order used for sorting: missing < null < bool < number < string < others.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank(a) == rank(b) => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> RawDocument {
        value.as_object().cloned().unwrap()
    }

    fn filter(value: Value) -> Filter {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_equality_and_nested_paths() {
        let d = doc(json!({ "x": 1, "a": { "b": "c" }, "tags": ["rust", "db"] }));
        assert!(matches(&d, &filter(json!({ "x": 1 }))));
        assert!(matches(&d, &filter(json!({ "a.b": "c" }))));
        assert!(matches(&d, &filter(json!({ "tags": "rust" }))));
        assert!(!matches(&d, &filter(json!({ "x": 2 }))));
        assert!(matches(&d, &filter(json!({}))));
    }

    #[test]
    fn test_operators() {
        let d = doc(json!({ "x": 1, "time": "now" }));
        assert!(matches(&d, &filter(json!({ "time": { "$exists": true } }))));
        assert!(matches(&d, &filter(json!({ "y": { "$exists": false } }))));
        assert!(matches(&d, &filter(json!({ "x": { "$ne": 2 } }))));
        assert!(matches(&d, &filter(json!({ "x": { "$in": [0, 1] } }))));
        assert!(!matches(&d, &filter(json!({ "x": { "$in": [] } }))));
    }

    #[test]
    fn test_reference_objects_compare_literally() {
        let reference = json!({ "$ref": "author", "$id": "a1", "$db": "blog" });
        let d = doc(json!({ "author": reference.clone() }));
        assert!(matches(&d, &filter(json!({ "author": reference }))));
        assert!(!matches(
            &d,
            &filter(json!({ "author": { "$ref": "author", "$id": "a2", "$db": "blog" } }))
        ));
    }

    #[test]
    fn test_id_only() {
        assert_eq!(id_only(&by_id(&json!("a1"))), Some(&json!("a1")));
        assert!(id_only(&filter(json!({ "_id": { "$in": ["a1"] } }))).is_none());
        assert!(id_only(&filter(json!({ "_id": "a1", "x": 1 }))).is_none());
    }

    #[test]
    fn test_apply_update_operators() {
        let mut d = doc(json!({ "_id": "1", "counter": 10, "x": 0, "y": 1 }));
        apply_update(
            &mut d,
            &json!({ "$set": { "y": 2, "meta.seen": true }, "$unset": { "x": "" }, "$inc": { "counter": 1 } }),
        )
        .unwrap();
        assert_eq!(
            Value::Object(d),
            json!({ "_id": "1", "counter": 11, "y": 2, "meta": { "seen": true } })
        );
    }

    #[test]
    fn test_apply_update_replacement_keeps_id() {
        let mut d = doc(json!({ "_id": "1", "x": 0 }));
        apply_update(&mut d, &json!({ "z": 3 })).unwrap();
        assert_eq!(Value::Object(d), json!({ "_id": "1", "z": 3 }));
    }

    #[test]
    fn test_apply_update_rejects_unknown_operator() {
        let mut d = doc(json!({ "_id": "1" }));
        assert!(apply_update(&mut d, &json!({ "$rename": { "a": "b" } })).is_err());
        assert!(apply_update(&mut d, &json!({ "$inc": { "_id": 1 } })).is_err());
    }

    #[test]
    fn test_project() {
        let d = doc(json!({ "_id": "1", "x": 0, "y": 1, "a": { "b": 2, "c": 3 } }));
        let p = project(&d, &["x".to_string(), "a.b".to_string()]);
        assert_eq!(Value::Object(p), json!({ "_id": "1", "x": 0, "a": { "b": 2 } }));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(Some(&json!(1)), Some(&json!(2.5))), Ordering::Less);
        assert_eq!(compare_values(None, Some(&json!(null))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(compare_values(Some(&json!(3)), Some(&json!("a"))), Ordering::Less);
    }
}
