//! C1 — validation primitives.
//!
//! The smallest, most-reused layer of the engine: "does this value count as
//! present", "which required fields are missing", and "what are this
//! object's coerced primary-key values".

use crate::meta::Meta;
use crate::types::TypeRegistry;
use serde_json::Value as RawValue;

/// False for null, NaN, and whitespace-only strings; true otherwise
/// (including numeric zero, false, empty arrays/objects).
pub fn has_value(v: &RawValue) -> bool {
    match v {
        RawValue::Null => false,
        RawValue::String(s) => !s.trim().is_empty(),
        RawValue::Number(n) => n.as_f64().map(|f| !f.is_nan()).unwrap_or(true),
        RawValue::Bool(_) | RawValue::Array(_) | RawValue::Object(_) => true,
    }
}

fn field_has_value(obj: &serde_json::Map<String, RawValue>, name: &str) -> bool {
    obj.get(name).map(has_value).unwrap_or(false)
}

/// Returns the subset of `names` where `obj[name]` lacks a value.
pub fn missing_required(
    obj: &serde_json::Map<String, RawValue>,
    names: impl IntoIterator<Item = impl AsRef<str>>,
) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| !field_has_value(obj, name.as_ref()))
        .map(|name| name.as_ref().to_string())
        .collect()
}

/// Extracts and type-coerces the primary-key field values of `obj` according
/// to `meta`. Returns `None` if any primary-key field is missing or fails
/// coercion.
pub fn primary_key_query(
    obj: &serde_json::Map<String, RawValue>,
    meta: &Meta,
    types: &TypeRegistry,
) -> Option<indexmap::IndexMap<String, RawValue>> {
    let mut out = indexmap::IndexMap::new();
    for pk in &meta.primary_keys {
        let field = meta.fields_map.get(pk)?;
        let raw = obj.get(pk)?;
        if !has_value(raw) {
            return None;
        }
        let converter = types.get(&field.type_name)?;
        let coerced = converter.convert(raw).ok()?;
        out.insert(pk.clone(), coerced);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertr::prelude::*;
    use serde_json::json;

    #[test]
    fn has_value_rejects_null_and_blank_strings() {
        assert_that(has_value(&RawValue::Null)).is_false();
        assert_that(has_value(&json!("   "))).is_false();
        assert_that(has_value(&json!(""))).is_false();
    }

    #[test]
    fn has_value_accepts_falsy_but_present_values() {
        assert_that(has_value(&json!(0))).is_true();
        assert_that(has_value(&json!(false))).is_true();
        assert_that(has_value(&json!([]))).is_true();
        assert_that(has_value(&json!({}))).is_true();
    }

    #[test]
    fn missing_required_reports_only_absent_fields() {
        let obj = json!({"name": "ada", "age": null, "email": "  "})
            .as_object()
            .unwrap()
            .clone();
        let missing = missing_required(&obj, ["name", "age", "email", "role"]);
        assert_that(missing.as_slice()).contains_exactly_in_any_order(vec![
            "age".to_string(),
            "email".to_string(),
            "role".to_string(),
        ]);
    }
}
