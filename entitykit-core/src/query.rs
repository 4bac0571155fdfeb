//! C5 — the query builder.
//!
//! Translates a flat `{field_name: raw}` search-parameter map into a
//! structured store query, grounded directly on the
//! `crudkit_condition::{Condition, ConditionClause, Operator}` shape the
//! teacher's resource layer already uses to describe comparison/containment
//! predicates, extended here with the `In`/`All`/`Regex` operators spec §4.5
//! requires.

use crate::meta::{Field, Meta};
use crate::types::TypeRegistry;
use crate::validate::has_value;
use serde_json::{Map, Value as RawValue};
use std::future::Future;
use std::pin::Pin;

/// A single comparison/containment operator a search clause can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    All,
    Regex,
}

/// One resolved `field OP value` predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionClause {
    pub field: String,
    pub operator: Operator,
    pub value: RawValue,
}

impl ConditionClause {
    fn into_query_entry(self) -> (String, RawValue) {
        match self.operator {
            Operator::Equal => (self.field, self.value),
            op => {
                let key = match op {
                    Operator::Gt => "$gt",
                    Operator::Gte => "$gte",
                    Operator::Lt => "$lt",
                    Operator::Lte => "$lte",
                    Operator::In => "$in",
                    Operator::All => "$all",
                    Operator::Regex => "$regex",
                    Operator::Equal => unreachable!(),
                };
                let mut inner = Map::new();
                inner.insert(key.to_string(), self.value);
                if op == Operator::Regex {
                    inner.insert("$options".to_string(), RawValue::String("i".to_string()));
                }
                (self.field, RawValue::Object(inner))
            }
        }
    }
}

/// A tree of search predicates. The builder only ever produces a flat
/// `And` of clauses, but callers (e.g. a `list_query` hook) may graft in
/// their own nested conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Clause(ConditionClause),
    And(Vec<Condition>),
}

impl Condition {
    pub fn into_query(self) -> Map<String, RawValue> {
        match self {
            Condition::Clause(clause) => {
                let (field, value) = clause.into_query_entry();
                let mut map = Map::new();
                map.insert(field, value);
                map
            }
            Condition::And(conditions) => {
                if conditions.is_empty() {
                    return Map::new();
                }
                let entries: Vec<RawValue> = conditions
                    .into_iter()
                    .map(|c| RawValue::Object(c.into_query()))
                    .collect();
                let mut map = Map::new();
                map.insert("$and".to_string(), RawValue::Array(entries));
                map
            }
        }
    }
}

const NUMERIC_TYPES: &[&str] = &["number", "int", "uint", "float", "ufloat", "decimal", "percentage", "currency"];

fn raw_as_display_string(raw: &RawValue) -> Option<String> {
    match raw {
        RawValue::String(s) => Some(s.clone()),
        RawValue::Number(n) => Some(n.to_string()),
        RawValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce(field: &Field, text: &str, types: &TypeRegistry) -> Option<RawValue> {
    let converter = types.get(&field.type_name)?;
    converter.convert(&RawValue::String(text.to_string())).ok()
}

/// Build the clause for a single field's raw search value, applying the
/// value-dispatch and numeric-zero rules of spec §4.5. Returns `None` when
/// the field should be skipped entirely (no value, or the numeric-zero rule
/// applies).
fn build_clause(field_name: &str, field: &Field, raw: &RawValue, types: &TypeRegistry) -> Option<ConditionClause> {
    if !has_value(raw) {
        return None;
    }
    let display = raw_as_display_string(raw)?;
    let trimmed = display.trim();
    let is_numeric = NUMERIC_TYPES.contains(&field.type_name.as_str());

    for (prefix, op) in [(">=", Operator::Gte), ("<=", Operator::Lte), (">", Operator::Gt), ("<", Operator::Lt)] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            let value = coerce(field, rest.trim(), types)?;
            return Some(ConditionClause {
                field: field_name.to_string(),
                operator: op,
                value,
            });
        }
    }

    if is_numeric && trimmed == "0" {
        return None;
    }

    if trimmed.contains(',') {
        let values: Vec<RawValue> = trimmed
            .split(',')
            .map(str::trim)
            .filter_map(|part| coerce(field, part, types))
            .collect();
        if values.is_empty() {
            return None;
        }
        return Some(ConditionClause {
            field: field_name.to_string(),
            operator: Operator::In,
            value: RawValue::Array(values),
        });
    }

    if field.type_name == "array" {
        return Some(ConditionClause {
            field: field_name.to_string(),
            operator: Operator::All,
            value: RawValue::Array(vec![raw.clone()]),
        });
    }

    if let Some(converter) = types.get(&field.type_name) {
        if let Ok(RawValue::String(s)) = converter.convert(raw) {
            return Some(ConditionClause {
                field: field_name.to_string(),
                operator: Operator::Regex,
                value: RawValue::String(regex::escape(&s)),
            });
        }
    }

    let value = coerce(field, trimmed, types)?;
    Some(ConditionClause {
        field: field_name.to_string(),
        operator: Operator::Equal,
        value,
    })
}

/// Resolves a reference field's raw search values (identifiers or labels)
/// into the referenced entity's stored ids. The engine implements this by
/// composing the referenced entity's `ref_filter` into a store lookup; kept
/// as a trait here so the pure query-building logic doesn't need a `Store`.
pub trait RefValueResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        ref_collection: &'a str,
        raw_value: &'a RawValue,
    ) -> Pin<Box<dyn Future<Output = Vec<RawValue>> + Send + 'a>>;
}

/// Build the full search query for `search_params` against `meta`, per spec
/// §4.5. Returns `None` if `meta` has no search fields at all (caller must
/// refuse the list request); returns `Some(empty map)` if every participating
/// field was skipped.
pub async fn build_search_query(
    meta: &Meta,
    search_params: &Map<String, RawValue>,
    types: &TypeRegistry,
    resolver: &dyn RefValueResolver,
) -> Option<Map<String, RawValue>> {
    if meta.search_fields.is_empty() {
        return None;
    }

    let mut clauses = Vec::new();

    for field_name in &meta.search_fields {
        let Some(raw) = search_params.get(field_name) else {
            continue;
        };
        if !has_value(raw) {
            continue;
        }
        let field = meta.fields_map.get(field_name)?;

        if let Some(ref_collection) = &field.ref_target {
            let display = raw_as_display_string(raw);
            let candidates: Vec<String> = display
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            let mut resolved = Vec::new();
            for candidate in candidates {
                let ids = resolver.resolve(ref_collection, &RawValue::String(candidate)).await;
                resolved.extend(ids);
            }
            if resolved.is_empty() {
                continue;
            }
            let operator = if field.type_name == "array" { Operator::All } else { Operator::In };
            clauses.push(Condition::Clause(ConditionClause {
                field: field_name.clone(),
                operator,
                value: RawValue::Array(resolved),
            }));
            continue;
        }

        if let Some(clause) = build_clause(field_name, field, raw, types) {
            clauses.push(Condition::Clause(clause));
        }
    }

    Some(Condition::And(clauses).into_query())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{MetaDef, MetaRegistry};
    use crate::types::builtin::NoopPasswordHasher;
    use assertr::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    struct NoRefs;
    impl RefValueResolver for NoRefs {
        fn resolve<'a>(
            &'a self,
            _ref_collection: &'a str,
            _raw_value: &'a RawValue,
        ) -> Pin<Box<dyn Future<Output = Vec<RawValue>> + Send + 'a>> {
            Box::pin(async { Vec::new() })
        }
    }

    fn sample_meta() -> Meta {
        let mut registry = MetaRegistry::new();
        let mut def = MetaDef::new("users");
        def.primary_keys = vec!["name".to_string()];
        def.readable = true;
        def.fields = vec![
            Field::new("name", "string"),
            Field::new("age", "int"),
            Field::new("tags", "array"),
        ];
        registry.register(def).unwrap();
        registry
            .validate_all_metas(&crate::roles::RoleRegistry::new())
            .unwrap();
        (*registry.get("users").unwrap()).clone()
    }

    #[tokio::test]
    async fn numeric_zero_is_skipped_but_comparisons_are_not() {
        let meta = sample_meta();
        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));

        let mut params = Map::new();
        params.insert("age".to_string(), json!("0"));
        let query = build_search_query(&meta, &params, &types, &NoRefs).await.unwrap();
        assert_that(query.get("$and").unwrap().as_array().unwrap().is_empty()).is_true();

        let mut params = Map::new();
        params.insert("age".to_string(), json!(">0"));
        let query = build_search_query(&meta, &params, &types, &NoRefs).await.unwrap();
        assert_that(query.get("$and").unwrap().as_array().unwrap().len()).is_equal_to(1);
    }

    #[tokio::test]
    async fn array_field_uses_all_with_single_element() {
        let meta = sample_meta();
        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let mut params = Map::new();
        params.insert("tags".to_string(), json!("blue"));
        let query = build_search_query(&meta, &params, &types, &NoRefs).await.unwrap();
        let clauses = query.get("$and").unwrap().as_array().unwrap();
        let tags_clause = clauses[0].as_object().unwrap().get("tags").unwrap();
        assert_that(tags_clause.get("$all").unwrap().clone()).is_equal_to(json!(["blue"]));
    }

    #[tokio::test]
    async fn string_field_becomes_case_insensitive_regex() {
        let meta = sample_meta();
        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let mut params = Map::new();
        params.insert("name".to_string(), json!("ada"));
        let query = build_search_query(&meta, &params, &types, &NoRefs).await.unwrap();
        let clauses = query.get("$and").unwrap().as_array().unwrap();
        let clause = clauses[0].as_object().unwrap().get("name").unwrap();
        assert_that(clause.get("$regex").is_some()).is_true();
        assert_that(clause.get("$options").unwrap().clone()).is_equal_to(json!("i"));
    }

    #[tokio::test]
    async fn building_twice_with_equal_params_is_idempotent() {
        let meta = sample_meta();
        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let mut params = Map::new();
        params.insert("age".to_string(), json!(">5"));
        params.insert("name".to_string(), json!("ada"));
        let first = build_search_query(&meta, &params, &types, &NoRefs).await.unwrap();
        let second = build_search_query(&meta, &params, &types, &NoRefs).await.unwrap();
        assert_that(second).is_equal_to(first);
    }

    #[test]
    fn no_search_fields_yields_none() {
        let mut registry = MetaRegistry::new();
        let mut def = MetaDef::new("system_flags");
        def.primary_keys = vec!["name".to_string()];
        let mut name_field = Field::new("name", "string");
        name_field.search = false;
        def.fields = vec![name_field];
        registry.register(def).unwrap();
        registry
            .validate_all_metas(&crate::roles::RoleRegistry::new())
            .unwrap();
        let meta = registry.get("system_flags").unwrap();

        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let params = Map::new();
        let result = block_on(build_search_query(&meta, &params, &types, &NoRefs));
        assert_that(result.is_none()).is_true();
    }

    fn block_on<F: Future>(fut: F) -> F::Output {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(fut)
    }
}
