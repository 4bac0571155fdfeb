//! Field coercion for create/update/clone/batch_update inputs (spec §4.2
//! "Conversion modes").

use crate::meta::Meta;
use crate::types::TypeRegistry;
use crate::validate::has_value;
use serde_json::{Map, Value as RawValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoerceMode {
    /// For each defined field with a value, coerce it; undefined/empty
    /// fields are dropped entirely.
    Strict,
    /// Same, but a present-yet-empty field is stored as an explicit empty
    /// string rather than dropped.
    UpdatePreserving,
}

pub struct Coerced {
    pub object: Map<String, RawValue>,
    pub failed_fields: Vec<String>,
}

pub fn coerce_fields(
    field_names: &[String],
    params: &Map<String, RawValue>,
    meta: &Meta,
    types: &TypeRegistry,
    mode: CoerceMode,
) -> Coerced {
    let mut object = Map::new();
    let mut failed_fields = Vec::new();

    for name in field_names {
        let Some(field) = meta.fields_map.get(name) else {
            continue;
        };
        let Some(raw) = params.get(name) else {
            continue;
        };

        if !has_value(raw) {
            if mode == CoerceMode::UpdatePreserving {
                object.insert(name.clone(), RawValue::String(String::new()));
            }
            continue;
        }

        match types.get(&field.type_name) {
            Some(converter) => match converter.convert(raw) {
                Ok(value) => {
                    object.insert(name.clone(), value);
                }
                Err(_) => failed_fields.push(name.clone()),
            },
            None => failed_fields.push(name.clone()),
        }
    }

    Coerced { object, failed_fields }
}

/// Restricts `field_names` to those visible under `view` (spec §3 Field:
/// `view` tags editable fields; `"*"` on either side means unrestricted).
pub fn fields_for_view(field_names: &[String], meta: &Meta, view: &str) -> Vec<String> {
    if view == "*" {
        return field_names.to_vec();
    }
    field_names
        .iter()
        .filter(|name| {
            meta.fields_map
                .get(name.as_str())
                .map(|f| matches!(f.view.as_deref(), Some("*") | None) || f.view.as_deref() == Some(view))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Restricts a client-requested `attr_names` list (`"*"` meaning "every
/// allowed field") to `allowed`, silently dropping anything else
/// (spec §6, `attr_names`).
pub fn resolve_projection(attr_names: &[String], allowed: &[String]) -> Vec<String> {
    if attr_names.iter().any(|n| n == "*") {
        return allowed.to_vec();
    }
    attr_names.iter().filter(|n| allowed.contains(n)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Field, MetaDef, MetaRegistry};
    use crate::roles::RoleRegistry;
    use crate::types::builtin::NoopPasswordHasher;
    use assertr::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    fn meta() -> Meta {
        let mut registry = MetaRegistry::new();
        let mut def = MetaDef::new("users");
        def.primary_keys = vec!["name".to_string()];
        def.creatable = true;
        def.fields = vec![Field::new("name", "string"), Field::new("age", "int")];
        registry.register(def).unwrap();
        registry.validate_all_metas(&RoleRegistry::new()).unwrap();
        (*registry.get("users").unwrap()).clone()
    }

    #[test]
    fn strict_mode_drops_absent_fields_and_collects_failures() {
        let meta = meta();
        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let mut params = Map::new();
        params.insert("name".to_string(), json!("ada"));
        params.insert("age".to_string(), json!("not-a-number"));

        let coerced = coerce_fields(&meta.create_fields, &params, &meta, &types, CoerceMode::Strict);
        assert_that(coerced.object.get("name").unwrap().clone()).is_equal_to(json!("ada"));
        assert_that(coerced.failed_fields.as_slice()).contains_exactly_in_any_order(vec!["age".to_string()]);
    }

    #[test]
    fn update_preserving_stores_explicit_empty_string() {
        let meta = meta();
        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let mut params = Map::new();
        params.insert("name".to_string(), json!(""));

        let coerced = coerce_fields(&meta.update_fields, &params, &meta, &types, CoerceMode::UpdatePreserving);
        assert_that(coerced.object.get("name").unwrap().clone()).is_equal_to(json!(""));
    }

    #[test]
    fn projection_star_means_every_allowed_field() {
        let allowed = vec!["name".to_string(), "age".to_string()];
        let resolved = resolve_projection(&["*".to_string()], &allowed);
        assert_that(resolved.as_slice()).contains_exactly_in_any_order(allowed);
    }

    #[test]
    fn projection_drops_disallowed_names() {
        let allowed = vec!["name".to_string()];
        let resolved = resolve_projection(&["name".to_string(), "secret".to_string()], &allowed);
        assert_that(resolved.as_slice()).contains_exactly_in_any_order(vec!["name".to_string()]);
    }
}
