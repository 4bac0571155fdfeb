//! C6 — the entity engine.
//!
//! Orchestrates one entity's CRUD pipeline: hook chain, type coercion,
//! reference resolution, referential integrity, pagination. Split across
//! submodules the way `crudkit_rs`'s resource-service layer separates
//! per-operation concerns instead of one monolithic `impl` block.

mod coerce;
mod delete;
mod hooks;
mod refs;

pub use coerce::{fields_for_view, resolve_projection, CoerceMode};
pub use hooks::{EntityLifecycle, HookError, HookRegistry, HookResult, NoopLifecycle};

use crate::config::EngineConfig;
use crate::error::{OpResult, ResultCode};
use crate::meta::{Meta, MetaRegistry};
use crate::query::build_search_query;
use crate::roles::{evaluate, RoleRegistry};
use crate::store::{FindOptions, Query, Store, UpdateOptions};
use crate::types::TypeRegistry;
use crate::validate::{missing_required, primary_key_query};
use serde_json::{Map, Value as RawValue};
use std::sync::Arc;

/// A client-facing projection of one field, as returned by
/// [`EntityEngine::meta_describe`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub type_name: String,
    pub required: bool,
    pub view: Option<String>,
    pub group: Option<String>,
    pub secure: bool,
}

/// Pagination/projection/sort knobs for [`EntityEngine::list`] (spec §4.6.1).
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub attr_names: Vec<String>,
    pub sort_by: Vec<String>,
    pub desc: Vec<String>,
    pub page: u64,
    pub limit: Option<u64>,
}

/// The bound CRUD surface for one entity. Holds a reference to the whole
/// [`MetaRegistry`] (and the shared [`Store`]) because reference resolution
/// and cascade delete reach across entities; the public operations below
/// only ever act on `self.meta`.
pub struct EntityEngine<'a, S: Store> {
    meta: Arc<Meta>,
    metas: &'a MetaRegistry,
    types: &'a TypeRegistry,
    store: &'a S,
    config: &'a EngineConfig,
    hooks: &'a HookRegistry,
}

impl<'a, S: Store> EntityEngine<'a, S> {
    /// Bind an engine to `collection`. Returns `None` if no such meta is
    /// registered.
    pub fn new(
        collection: &str,
        metas: &'a MetaRegistry,
        types: &'a TypeRegistry,
        store: &'a S,
        config: &'a EngineConfig,
        hooks: &'a HookRegistry,
    ) -> Option<Self> {
        let meta = metas.get(collection)?;
        Some(Self { meta, metas, types, store, config, hooks })
    }

    pub fn collection(&self) -> &str {
        &self.meta.collection
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Resolve the effective `(mode, view)` access for `user_role` against
    /// this entity (spec §4.4); callers check the mode letter they need
    /// before invoking an operation.
    pub fn access(&self, roles: &RoleRegistry, user_role: Option<&str>) -> crate::roles::Access {
        evaluate(&self.meta, roles, user_role)
    }

    /// C1/C2/C3 projection of this entity's fields for client consumption,
    /// filtered by `view` and gated by `roles`/`user_role` (spec §6).
    pub fn meta_describe(&self, view: &str, roles: &RoleRegistry, user_role: Option<&str>) -> Vec<FieldDescriptor> {
        let access = self.access(roles, user_role);
        if access.is_denied() {
            return Vec::new();
        }
        self.meta
            .client_fields
            .iter()
            .filter_map(|name| self.meta.fields_map.get(name))
            .filter(|f| view == "*" || matches!(f.view.as_deref(), Some("*") | None) || f.view.as_deref() == Some(view))
            .map(|f| FieldDescriptor {
                name: f.name.clone(),
                type_name: f.type_name.clone(),
                required: f.required,
                view: f.view.clone(),
                group: f.group.clone(),
                secure: f.secure,
            })
            .collect()
    }

    #[tracing::instrument(level = "info", skip(self, params))]
    pub async fn create(&self, params: &Map<String, RawValue>, view: &str) -> OpResult<Map<String, RawValue>> {
        let hooks = self.hooks.get(&self.meta.collection);

        let create_fields = fields_for_view(&self.meta.create_fields, &self.meta, view);
        let coerced = coerce::coerce_fields(&create_fields, params, &self.meta, self.types, CoerceMode::Strict);
        if !coerced.failed_fields.is_empty() {
            return OpResult::code(ResultCode::InvalidParams, coerced.failed_fields);
        }
        let mut obj = coerced.object;

        if let Err(e) = hooks.before_create(&mut obj).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        let missing = missing_required(&obj, self.meta.required_field_names.iter());
        if !missing.is_empty() {
            return OpResult::code(ResultCode::NoParams, missing);
        }

        if let Some(pk) = primary_key_query(&obj, &self.meta, self.types) {
            let query: Query = pk.into_iter().collect();
            match self.store.count(&self.meta.collection, &query).await {
                Ok(n) if n > 0 => return OpResult::bare(ResultCode::DuplicateKey),
                Err(e) => return crate::error::log_store_error(&self.meta.collection, e),
                _ => {}
            }
        }

        if let Err((code, err)) = self.resolve_refs(&self.meta, &mut obj).await {
            return OpResult { code, err: Some(err), data: None, total: None };
        }

        let inserted = match hooks.override_create(&obj).await {
            Some(Ok(doc)) => doc,
            Some(Err(e)) => {
                let (code, err) = e.into_result_parts();
                return OpResult { code, err, data: None, total: None };
            }
            None => match self.store.insert(&self.meta.collection, obj).await {
                Ok(doc) => doc,
                Err(e) => return crate::error::log_store_error(&self.meta.collection, e),
            },
        };

        if !inserted.contains_key("_id") {
            tracing::error!(collection = %self.meta.collection, "store did not allocate an id for the inserted record");
            return OpResult::bare(ResultCode::Error);
        }

        if let Err(e) = hooks.after_create(&inserted).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        OpResult::success(client_view(&self.meta, inserted))
    }

    #[tracing::instrument(level = "info", skip(self, params))]
    pub async fn clone_record(&self, params: &Map<String, RawValue>, view: &str) -> OpResult<Map<String, RawValue>> {
        let hooks = self.hooks.get(&self.meta.collection);

        let clone_fields = fields_for_view(&self.meta.clone_fields, &self.meta, view);
        let coerced = coerce::coerce_fields(&clone_fields, params, &self.meta, self.types, CoerceMode::Strict);
        if !coerced.failed_fields.is_empty() {
            return OpResult::code(ResultCode::InvalidParams, coerced.failed_fields);
        }
        let mut obj = coerced.object;

        if let Err(e) = hooks.before_clone(&mut obj).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        let missing = missing_required(&obj, self.meta.required_field_names.iter());
        if !missing.is_empty() {
            return OpResult::code(ResultCode::NoParams, missing);
        }

        if let Some(pk) = primary_key_query(&obj, &self.meta, self.types) {
            let query: Query = pk.into_iter().collect();
            match self.store.count(&self.meta.collection, &query).await {
                Ok(n) if n > 0 => return OpResult::bare(ResultCode::DuplicateKey),
                Err(e) => return crate::error::log_store_error(&self.meta.collection, e),
                _ => {}
            }
        }

        if let Err((code, err)) = self.resolve_refs(&self.meta, &mut obj).await {
            return OpResult { code, err: Some(err), data: None, total: None };
        }

        let inserted = match hooks.override_clone(&obj).await {
            Some(Ok(doc)) => doc,
            Some(Err(e)) => {
                let (code, err) = e.into_result_parts();
                return OpResult { code, err, data: None, total: None };
            }
            None => match self.store.insert(&self.meta.collection, obj).await {
                Ok(doc) => doc,
                Err(e) => return crate::error::log_store_error(&self.meta.collection, e),
            },
        };

        if let Err(e) = hooks.after_clone(&inserted).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        OpResult::success(client_view(&self.meta, inserted))
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn read(&self, id: &RawValue, attr_names: &[String]) -> OpResult<Map<String, RawValue>> {
        if !crate::validate::has_value(id) {
            return OpResult::bare(ResultCode::InvalidParams);
        }

        let projection = resolve_projection(attr_names, &self.meta.property_fields);
        let mut query = Map::new();
        query.insert("_id".to_string(), id.clone());

        let found = match self.store.find_one(&self.meta.collection, &query, Some(&projection)).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return OpResult::bare(ResultCode::NotFound),
            Err(e) => return crate::error::log_store_error(&self.meta.collection, e),
        };

        let hooks = self.hooks.get(&self.meta.collection);
        if let Err(e) = hooks.after_read(id, attr_names, &found).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        let expanded = self.expand_refs(&self.meta, found).await;
        OpResult::success(expanded)
    }

    #[tracing::instrument(level = "info", skip(self, query_params, explicit_query))]
    pub async fn list(
        &self,
        query_params: &ListParams,
        explicit_query: Option<Query>,
        search_params: &Map<String, RawValue>,
    ) -> OpResult<Vec<Map<String, RawValue>>> {
        let projection = resolve_projection(&query_params.attr_names, &self.meta.list_fields);

        let query = match explicit_query {
            Some(q) => q,
            None => match build_search_query(&self.meta, search_params, self.types, self).await {
                Some(q) => q,
                None => return OpResult::bare(ResultCode::InvalidParams),
            },
        };

        let page = query_params.page.max(1);
        let limit = query_params
            .limit
            .unwrap_or(self.config.default_page_size)
            .min(self.config.default_list_limit);
        let skip = (page - 1) * limit;

        let sort = query_params
            .sort_by
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let desc = query_params.desc.get(i).map(|d| d == "true").unwrap_or(false);
                (field.clone(), desc)
            })
            .collect();

        let total = match self.store.count(&self.meta.collection, &query).await {
            Ok(n) => n,
            Err(e) => return crate::error::log_store_error(&self.meta.collection, e),
        };

        let find_options = FindOptions { sort, skip: Some(skip), limit: Some(limit) };
        let docs = match self.store.find(&self.meta.collection, &query, Some(&projection), find_options).await {
            Ok(docs) => docs,
            Err(e) => return crate::error::log_store_error(&self.meta.collection, e),
        };

        let mut data = Vec::with_capacity(docs.len());
        for doc in docs {
            data.push(self.expand_refs(&self.meta, doc).await);
        }

        OpResult { code: ResultCode::Success, err: None, data: Some(data), total: Some(total) }
    }

    #[tracing::instrument(level = "info", skip(self, params))]
    pub async fn update(&self, id: Option<RawValue>, params: &Map<String, RawValue>, view: &str) -> OpResult<()> {
        let hooks = self.hooks.get(&self.meta.collection);

        let update_fields = fields_for_view(&self.meta.update_fields, &self.meta, view);
        let coerced = coerce::coerce_fields(&update_fields, params, &self.meta, self.types, CoerceMode::UpdatePreserving);
        if !coerced.failed_fields.is_empty() {
            return OpResult::code(ResultCode::InvalidParams, coerced.failed_fields);
        }
        let mut obj = coerced.object;

        if let Err(e) = hooks.before_update(id.as_ref(), &mut obj).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        let query: Query = match &id {
            Some(id_value) => {
                let mut q = Map::new();
                q.insert("_id".to_string(), id_value.clone());
                q
            }
            None => match primary_key_query(params, &self.meta, self.types) {
                Some(pk) => pk.into_iter().collect(),
                None => return OpResult::bare(ResultCode::InvalidParams),
            },
        };

        match self.store.count(&self.meta.collection, &query).await {
            Ok(0) => return OpResult::bare(ResultCode::NotFound),
            Ok(n) if n > 1 => return OpResult::bare(ResultCode::InvalidParams),
            Err(e) => return crate::error::log_store_error(&self.meta.collection, e),
            _ => {}
        }

        if let Err((code, err)) = self.resolve_refs(&self.meta, &mut obj).await {
            return OpResult { code, err: Some(err), data: None, total: None };
        }

        let write_result = match hooks.override_update(&query, &obj).await {
            Some(Ok(wr)) => wr,
            Some(Err(e)) => {
                let (code, err) = e.into_result_parts();
                return OpResult { code, err, data: None, total: None };
            }
            None => match self.store.update(&self.meta.collection, &query, &obj, UpdateOptions::default()).await {
                Ok(wr) => wr,
                Err(e) => return crate::error::log_store_error(&self.meta.collection, e),
            },
        };

        if !write_result.ok {
            return OpResult::bare(ResultCode::Error);
        }

        if let Err(e) = hooks.after_update(id.as_ref(), &obj).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        OpResult::ok_no_data()
    }

    #[tracing::instrument(level = "info", skip(self, ids, params))]
    pub async fn batch_update(&self, ids: Vec<RawValue>, params: &Map<String, RawValue>, view: &str) -> OpResult<()> {
        let hooks = self.hooks.get(&self.meta.collection);

        let update_fields = fields_for_view(&self.meta.update_fields, &self.meta, view);
        let coerced = coerce::coerce_fields(&update_fields, params, &self.meta, self.types, CoerceMode::UpdatePreserving);
        if !coerced.failed_fields.is_empty() {
            return OpResult::code(ResultCode::InvalidParams, coerced.failed_fields);
        }
        let mut obj = coerced.object;

        if let Err(e) = hooks.before_batch_update(&ids, &mut obj).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        if let Err((code, err)) = self.resolve_refs(&self.meta, &mut obj).await {
            return OpResult { code, err: Some(err), data: None, total: None };
        }

        let mut query = Map::new();
        query.insert("_id".to_string(), serde_json::json!({ "$in": ids.clone() }));

        let write_result = match hooks.override_batch_update(&ids, &obj).await {
            Some(Ok(wr)) => wr,
            Some(Err(e)) => {
                let (code, err) = e.into_result_parts();
                return OpResult { code, err, data: None, total: None };
            }
            None => match self
                .store
                .update(&self.meta.collection, &query, &obj, UpdateOptions { upsert: false, multi: true })
                .await
            {
                Ok(wr) => wr,
                Err(e) => return crate::error::log_store_error(&self.meta.collection, e),
            },
        };

        if !write_result.ok {
            return OpResult::bare(ResultCode::Error);
        }

        if let Err(e) = hooks.after_batch_update(&ids, &obj).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        OpResult::ok_no_data()
    }
}

/// Drop `sys` fields from a freshly-inserted record before handing it back
/// to a client (spec §4.6.1 create step 1 / §8 "after successful create").
fn client_view(meta: &Meta, mut doc: Map<String, RawValue>) -> Map<String, RawValue> {
    doc.retain(|key, _| key == "_id" || meta.client_fields.iter().any(|f| f == key));
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Field, MetaDef};
    use crate::store::{Document, WriteResult};
    use crate::types::builtin::NoopPasswordHasher;
    use assertr::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct MemError;
    impl std::fmt::Display for MemError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "mem store error")
        }
    }
    impl std::error::Error for MemError {}

    #[derive(Default)]
    struct MemStore {
        collections: Mutex<HashMap<String, Vec<Document>>>,
        next_id: Mutex<u64>,
    }

    impl MemStore {
        fn seed(&self, collection: &str, docs: Vec<Document>) {
            self.collections.lock().unwrap().insert(collection.to_string(), docs);
        }

        fn matches(doc: &Document, query: &Query) -> bool {
            query.iter().all(|(k, v)| match doc.get(k) {
                Some(existing) => match v.as_object() {
                    Some(ops) => {
                        if let Some(options) = ops.get("$in").and_then(|v| v.as_array()) {
                            options.contains(existing)
                        } else if let Some(options) = ops.get("$all").and_then(|v| v.as_array()) {
                            match existing {
                                RawValue::Array(actual) => options.iter().all(|needed| actual.contains(needed)),
                                scalar => options.iter().all(|needed| needed == scalar),
                            }
                        } else {
                            false
                        }
                    }
                    None => existing == v,
                },
                None => false,
            })
        }
    }

    impl Store for MemStore {
        type Error = MemError;

        async fn insert(&self, collection: &str, mut obj: Document) -> Result<Document, Self::Error> {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            obj.insert("_id".to_string(), json!(format!("id-{next_id}")));
            self.collections.lock().unwrap().entry(collection.to_string()).or_default().push(obj.clone());
            Ok(obj)
        }

        async fn update(&self, collection: &str, query: &Query, obj: &Document, _options: UpdateOptions) -> Result<WriteResult, Self::Error> {
            let mut collections = self.collections.lock().unwrap();
            let docs = collections.entry(collection.to_string()).or_default();
            let mut n = 0;
            for doc in docs.iter_mut() {
                if Self::matches(doc, query) {
                    for (k, v) in obj {
                        doc.insert(k.clone(), v.clone());
                    }
                    n += 1;
                }
            }
            Ok(WriteResult { ok: true, n })
        }

        async fn remove(&self, collection: &str, query: &Query) -> Result<WriteResult, Self::Error> {
            let mut collections = self.collections.lock().unwrap();
            let docs = collections.entry(collection.to_string()).or_default();
            let before = docs.len();
            docs.retain(|doc| !Self::matches(doc, query));
            let removed = (before - docs.len()) as u64;
            Ok(WriteResult { ok: true, n: removed })
        }

        async fn find(&self, collection: &str, query: &Query, _projection: Option<&[String]>, _options: FindOptions) -> Result<Vec<Document>, Self::Error> {
            let collections = self.collections.lock().unwrap();
            Ok(collections.get(collection).map(|docs| docs.iter().filter(|d| Self::matches(d, query)).cloned().collect()).unwrap_or_default())
        }

        async fn find_one(&self, collection: &str, query: &Query, _projection: Option<&[String]>) -> Result<Option<Document>, Self::Error> {
            let collections = self.collections.lock().unwrap();
            Ok(collections.get(collection).and_then(|docs| docs.iter().find(|d| Self::matches(d, query)).cloned()))
        }

        async fn count(&self, collection: &str, query: &Query) -> Result<u64, Self::Error> {
            let collections = self.collections.lock().unwrap();
            Ok(collections.get(collection).map(|docs| docs.iter().filter(|d| Self::matches(d, query)).count() as u64).unwrap_or(0))
        }
    }

    fn roles_meta() -> MetaDef {
        let mut def = MetaDef::new("roles");
        def.primary_keys = vec!["name".to_string()];
        def.ref_label = Some("name".to_string());
        def.readable = true;
        def.fields = vec![Field::new("name", "string")];
        def
    }

    fn users_meta() -> MetaDef {
        let mut def = MetaDef::new("users");
        def.primary_keys = vec!["name".to_string()];
        def.creatable = true;
        let mut role_field = Field::new("role", "string");
        role_field.ref_target = Some("roles".to_string());
        def.fields = vec![Field::new("name", "string"), Field::new("age", "int"), role_field];
        def
    }

    #[tokio::test]
    async fn create_resolves_ref_label_to_target_id() {
        let mut registry = MetaRegistry::new();
        registry.register(roles_meta()).unwrap();
        registry.register(users_meta()).unwrap();
        registry.validate_all_metas(&RoleRegistry::new()).unwrap();

        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let store = MemStore::default();
        store.seed("roles", vec![
            [("_id".to_string(), json!("r1")), ("name".to_string(), json!("role1"))].into_iter().collect(),
        ]);
        let config = EngineConfig::default();
        let hooks = HookRegistry::new();

        let engine = EntityEngine::new("users", &registry, &types, &store, &config, &hooks).unwrap();
        let mut params = Map::new();
        params.insert("name".to_string(), json!("user1"));
        params.insert("age".to_string(), json!("10"));
        params.insert("role".to_string(), json!("role1"));

        let result = engine.create(&params, "*").await;
        assert_that(result.is_success()).is_true();
        assert_that(result.data.unwrap().get("role").unwrap().clone()).is_equal_to(json!("r1"));
    }

    #[tokio::test]
    async fn create_with_unresolvable_ref_fails() {
        let mut registry = MetaRegistry::new();
        registry.register(roles_meta()).unwrap();
        registry.register(users_meta()).unwrap();
        registry.validate_all_metas(&RoleRegistry::new()).unwrap();

        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let store = MemStore::default();
        store.seed("roles", vec![
            [("_id".to_string(), json!("r1")), ("name".to_string(), json!("role1"))].into_iter().collect(),
        ]);
        let config = EngineConfig::default();
        let hooks = HookRegistry::new();
        let engine = EntityEngine::new("users", &registry, &types, &store, &config, &hooks).unwrap();

        let mut params = Map::new();
        params.insert("name".to_string(), json!("user3"));
        params.insert("age".to_string(), json!("20"));
        params.insert("role".to_string(), json!("rolef2"));

        let result = engine.create(&params, "*").await;
        assert_that(result.code).is_equal_to(ResultCode::RefNotFound);
    }

    #[tokio::test]
    async fn duplicate_primary_key_is_rejected() {
        let mut registry = MetaRegistry::new();
        let mut def = MetaDef::new("widgets");
        def.primary_keys = vec!["name".to_string()];
        def.creatable = true;
        def.fields = vec![Field::new("name", "string")];
        registry.register(def).unwrap();
        registry.validate_all_metas(&RoleRegistry::new()).unwrap();

        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let store = MemStore::default();
        let config = EngineConfig::default();
        let hooks = HookRegistry::new();
        let engine = EntityEngine::new("widgets", &registry, &types, &store, &config, &hooks).unwrap();

        let mut params = Map::new();
        params.insert("name".to_string(), json!("first"));
        let first = engine.create(&params, "*").await;
        assert_that(first.is_success()).is_true();

        let second = engine.create(&params, "*").await;
        assert_that(second.code).is_equal_to(ResultCode::DuplicateKey);
    }

    #[tokio::test]
    async fn delete_cascades_through_two_levels() {
        let mut registry = MetaRegistry::new();

        let mut role_def = MetaDef::new("role_nine");
        role_def.primary_keys = vec!["name".to_string()];
        role_def.ref_label = Some("name".to_string());
        role_def.deleteable = true;
        role_def.fields = vec![Field::new("name", "string")];
        registry.register(role_def).unwrap();

        let mut user_def = MetaDef::new("user_nine");
        user_def.primary_keys = vec!["name".to_string()];
        user_def.deleteable = true;
        let mut role_field = Field::new("role", "string");
        role_field.ref_target = Some("role_nine".to_string());
        role_field.delete = Some(crate::meta::DeleteMode::Cascade);
        user_def.fields = vec![Field::new("name", "string"), role_field];
        registry.register(user_def).unwrap();

        let mut log_def = MetaDef::new("log_nine");
        log_def.primary_keys = vec!["name".to_string()];
        let mut user_field = Field::new("user", "string");
        user_field.ref_target = Some("user_nine".to_string());
        user_field.delete = Some(crate::meta::DeleteMode::Cascade);
        log_def.fields = vec![Field::new("name", "string"), user_field];
        registry.register(log_def).unwrap();

        registry.validate_all_metas(&RoleRegistry::new()).unwrap();

        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let store = MemStore::default();
        store.seed("role_nine", vec![[("_id".to_string(), json!("r1")), ("name".to_string(), json!("role1"))].into_iter().collect()]);
        store.seed("user_nine", vec![[("_id".to_string(), json!("u1")), ("name".to_string(), json!("user1")), ("role".to_string(), json!("r1"))].into_iter().collect()]);
        store.seed("log_nine", vec![[("_id".to_string(), json!("l1")), ("name".to_string(), json!("log1")), ("user".to_string(), json!("u1"))].into_iter().collect()]);

        let config = EngineConfig::default();
        let hooks = HookRegistry::new();
        let engine = EntityEngine::new("role_nine", &registry, &types, &store, &config, &hooks).unwrap();

        let result = engine.delete(vec![json!("r1")]).await;
        assert_that(result.is_success()).is_true();

        let query = Map::new();
        assert_that(store.count("user_nine", &query).await.unwrap()).is_equal_to(0);
        assert_that(store.count("log_nine", &query).await.unwrap()).is_equal_to(0);
        assert_that(store.count("role_nine", &query).await.unwrap()).is_equal_to(0);
    }

    #[tokio::test]
    async fn delete_blocked_by_unset_delete_mode_removes_nothing() {
        let mut registry = MetaRegistry::new();
        let mut role_def = MetaDef::new("role_blocked");
        role_def.primary_keys = vec!["name".to_string()];
        role_def.ref_label = Some("name".to_string());
        role_def.deleteable = true;
        role_def.fields = vec![Field::new("name", "string")];
        registry.register(role_def).unwrap();

        let mut user_def = MetaDef::new("user_blocked");
        user_def.primary_keys = vec!["name".to_string()];
        let mut role_field = Field::new("role", "string");
        role_field.ref_target = Some("role_blocked".to_string());
        user_def.fields = vec![Field::new("name", "string"), role_field];
        registry.register(user_def).unwrap();

        registry.validate_all_metas(&RoleRegistry::new()).unwrap();

        let types = TypeRegistry::with_builtins(Arc::new(NoopPasswordHasher));
        let store = MemStore::default();
        store.seed("role_blocked", vec![[("_id".to_string(), json!("r1")), ("name".to_string(), json!("role1"))].into_iter().collect()]);
        store.seed("user_blocked", vec![[("_id".to_string(), json!("u1")), ("name".to_string(), json!("user1")), ("role".to_string(), json!("r1"))].into_iter().collect()]);

        let config = EngineConfig::default();
        let hooks = HookRegistry::new();
        let engine = EntityEngine::new("role_blocked", &registry, &types, &store, &config, &hooks).unwrap();

        let result = engine.delete(vec![json!("r1")]).await;
        assert_that(result.code).is_equal_to(ResultCode::HasRef);
        assert_that(store.count("role_blocked", &Map::new()).await.unwrap()).is_equal_to(1);
    }
}
