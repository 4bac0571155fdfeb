//! C3 — the meta registry.
//!
//! A [`Meta`] is a validated entity definition: a frozen set of [`Field`]s
//! plus the derived subsets (`create_fields`, `search_fields`, …) the rest of
//! the engine reads instead of re-deriving them on every call. Registration
//! is two-phase, mirroring `crudkit_resource`'s "build then validate the
//! resource graph" split: [`MetaRegistry::register`] performs every check
//! that only needs the meta being registered; [`MetaRegistry::validate_all_metas`]
//! performs the checks that need every meta to already exist (reference
//! targets, link-field inheritance, reverse edges).

use crate::roles::{RoleEntry, RoleRegistry};
use indexmap::IndexMap;
use serde_json::{Map, Value as RawValue};
use std::collections::HashMap;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a `ref` field's referent should be treated when the referenced record
/// is deleted (spec §3, Field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    Keep,
    Cascade,
}

/// A field of an entity, as supplied by the definition author. Unknown
/// attributes don't exist in this representation at all — the struct *is*
/// the whitelist.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub type_name: String,
    pub required: bool,
    pub ref_target: Option<String>,
    pub link: Option<String>,
    pub delete: Option<DeleteMode>,
    pub create: bool,
    pub list: bool,
    pub search: bool,
    pub update: bool,
    pub clone: bool,
    pub sys: bool,
    pub secure: bool,
    pub group: Option<String>,
    pub view: Option<String>,
}

impl Field {
    /// A field with every visibility flag defaulted to `true` the way spec §3
    /// describes ("default true"), as a starting point for a definition author.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            required: false,
            ref_target: None,
            link: None,
            delete: None,
            create: true,
            list: true,
            search: true,
            update: true,
            clone: true,
            sys: false,
            secure: false,
            group: None,
            view: None,
        }
    }

    fn editable(&self) -> bool {
        self.create || self.update
    }
}

/// Why a meta failed to register or validate. Displays with the
/// `meta:<collection>[,field:<name>]` prefix spec §4.3 requires.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaError(pub String);

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MetaError {}

fn meta_err(collection: &str, field: Option<&str>, message: impl std::fmt::Display) -> MetaError {
    match field {
        Some(f) => MetaError(format!("meta:{collection},field:{f}: {message}")),
        None => MetaError(format!("meta:{collection}: {message}")),
    }
}

/// An entity definition as supplied by the caller, before derivation.
#[derive(Debug, Clone)]
pub struct MetaDef {
    pub collection: String,
    pub primary_keys: Vec<String>,
    pub fields: Vec<Field>,
    pub ref_label: Option<String>,
    pub ref_filter: Option<Map<String, RawValue>>,
    pub user_field: Option<String>,
    pub roles: Vec<String>,
    pub creatable: bool,
    pub readable: bool,
    pub updatable: bool,
    pub deleteable: bool,
    pub cloneable: bool,
    pub importable: bool,
    pub exportable: bool,
}

impl MetaDef {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            primary_keys: Vec::new(),
            fields: Vec::new(),
            ref_label: None,
            ref_filter: None,
            user_field: None,
            roles: Vec::new(),
            creatable: false,
            readable: false,
            updatable: false,
            deleteable: false,
            cloneable: false,
            importable: false,
            exportable: false,
        }
    }
}

/// A registered, validated entity definition with every derived field subset
/// spec §3 names precomputed.
#[derive(Debug, Clone)]
pub struct Meta {
    pub collection: String,
    pub primary_keys: Vec<String>,
    pub fields: Vec<Field>,
    pub fields_map: IndexMap<String, Field>,
    pub ref_label: Option<String>,
    pub ref_filter: Option<Map<String, RawValue>>,
    pub user_field: Option<String>,
    pub roles: Vec<RoleEntry>,
    pub creatable: bool,
    pub readable: bool,
    pub updatable: bool,
    pub deleteable: bool,
    pub cloneable: bool,
    pub importable: bool,
    pub exportable: bool,

    pub mode: String,
    pub create_fields: Vec<String>,
    pub update_fields: Vec<String>,
    pub search_fields: Vec<String>,
    pub clone_fields: Vec<String>,
    pub list_fields: Vec<String>,
    pub property_fields: Vec<String>,
    pub client_fields: Vec<String>,
    pub primary_key_fields: Vec<String>,
    pub file_fields: Vec<String>,
    pub ref_fields: Vec<String>,
    pub link_fields: Vec<String>,
    pub required_field_names: Vec<String>,
    /// Back-edges: collections that declare a `ref` field targeting this one.
    pub ref_by_metas: Vec<String>,
}

fn compute_mode(meta: &Meta) -> String {
    let mut mode = String::new();
    if meta.creatable {
        mode.push('c');
    }
    if meta.readable {
        mode.push('r');
        mode.push('s');
    }
    if meta.updatable {
        mode.push('u');
        mode.push('b');
    }
    if meta.deleteable {
        mode.push('d');
    }
    if meta.cloneable {
        mode.push('o');
    }
    if meta.importable {
        mode.push('i');
    }
    if meta.exportable {
        mode.push('e');
    }
    mode
}

fn derive_subsets(meta: &mut Meta) {
    meta.fields_map = meta
        .fields
        .iter()
        .cloned()
        .map(|f| (f.name.clone(), f))
        .collect();

    let pk: HashSet<&str> = meta.primary_keys.iter().map(|s| s.as_str()).collect();

    meta.create_fields = meta
        .fields
        .iter()
        .filter(|f| f.create && !f.sys)
        .map(|f| f.name.clone())
        .collect();
    meta.update_fields = meta
        .fields
        .iter()
        .filter(|f| f.update && !f.sys)
        .map(|f| f.name.clone())
        .collect();
    meta.clone_fields = meta
        .fields
        .iter()
        .filter(|f| f.clone && !f.sys)
        .map(|f| f.name.clone())
        .collect();
    // `sys` only withholds a field from client create/update/clone input and
    // from output (`list`/`property` views); it stays searchable so the
    // server can still filter on an internal flag clients never see.
    meta.search_fields = meta
        .fields
        .iter()
        .filter(|f| f.search)
        .map(|f| f.name.clone())
        .collect();
    meta.property_fields = meta
        .fields
        .iter()
        .filter(|f| !f.secure)
        .map(|f| f.name.clone())
        .collect();
    meta.client_fields = meta
        .fields
        .iter()
        .filter(|f| !f.secure && !f.sys)
        .map(|f| f.name.clone())
        .collect();
    meta.list_fields = meta
        .fields
        .iter()
        .filter(|f| !f.secure && !f.sys && f.list)
        .map(|f| f.name.clone())
        .collect();
    meta.primary_key_fields = meta
        .fields
        .iter()
        .filter(|f| pk.contains(f.name.as_str()))
        .map(|f| f.name.clone())
        .collect();
    meta.file_fields = meta
        .fields
        .iter()
        .filter(|f| f.type_name == "file")
        .map(|f| f.name.clone())
        .collect();
    meta.ref_fields = meta
        .fields
        .iter()
        .filter(|f| f.ref_target.is_some())
        .map(|f| f.name.clone())
        .collect();
    meta.link_fields = meta
        .fields
        .iter()
        .filter(|f| f.link.is_some())
        .map(|f| f.name.clone())
        .collect();
    meta.required_field_names = meta
        .fields
        .iter()
        .filter(|f| f.required || pk.contains(f.name.as_str()))
        .map(|f| f.name.clone())
        .collect();

    meta.mode = compute_mode(meta);
}

/// Process-wide registry of [`Meta`] definitions. Owned by the caller
/// (typically behind an `Arc`) rather than a true global singleton, which
/// avoids the genuine global-mutable-singleton some source frameworks reach
/// for while preserving the same frozen-after-validation contract.
pub struct MetaRegistry {
    metas: IndexMap<String, Arc<Meta>>,
    frozen: AtomicBool,
}

impl Default for MetaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaRegistry {
    pub fn new() -> Self {
        Self {
            metas: IndexMap::new(),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub fn get(&self, collection: &str) -> Option<Arc<Meta>> {
        self.metas.get(collection).cloned()
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.metas.keys().map(|s| s.as_str())
    }

    /// Construct and insert a [`Meta`], performing every check that does not
    /// need other metas to exist yet. Panics if called after
    /// [`MetaRegistry::validate_all_metas`] — registering after the registry
    /// is frozen is a programmer error, not a recoverable runtime condition.
    pub fn register(&mut self, def: MetaDef) -> Result<(), MetaError> {
        assert!(
            !self.is_frozen(),
            "MetaRegistry::register('{}') called after validate_all_metas; the registry is frozen",
            def.collection
        );

        let collection = def.collection.clone();

        if self.metas.contains_key(&collection) {
            return Err(meta_err(&collection, None, "a meta with this collection is already registered"));
        }

        if def.primary_keys.is_empty() {
            return Err(meta_err(&collection, None, "primary_keys must be non-empty"));
        }

        let mut seen_names = HashSet::new();
        for field in &def.fields {
            if !seen_names.insert(field.name.clone()) {
                return Err(meta_err(&collection, Some(&field.name), "field name is declared more than once"));
            }
        }

        let sibling_ref_map: HashMap<String, bool> =
            def.fields.iter().map(|f| (f.name.clone(), f.ref_target.is_some())).collect();
        let sibling_has_ref = |name: &str| -> Option<bool> { sibling_ref_map.get(name).copied() };

        let mut fields = Vec::with_capacity(def.fields.len());
        for mut field in def.fields.into_iter() {
            if field.delete.is_some() && field.ref_target.is_none() {
                return Err(meta_err(&collection, Some(&field.name), "'delete' is only legal when 'ref' is set"));
            }

            if let Some(link_target) = field.link.clone() {
                match sibling_has_ref(&link_target) {
                    None => {
                        return Err(meta_err(
                            &collection,
                            Some(&field.name),
                            format!("link target '{link_target}' is not a field of this entity"),
                        ));
                    }
                    Some(false) => {
                        return Err(meta_err(
                            &collection,
                            Some(&field.name),
                            format!("link target '{link_target}' does not declare a 'ref'"),
                        ));
                    }
                    Some(true) => {}
                }
                // Legal attributes for a link field are {name, link, list}; every
                // other flag is forced, overriding whatever the author supplied.
                field.required = false;
                field.create = false;
                field.search = false;
                field.update = false;
                field.clone = false;
                field.delete = Some(DeleteMode::Cascade);
                field.view = None;
                // type_name/ref_target are resolved once every meta is registered.
            } else if field.editable() {
                if field.view.is_none() {
                    field.view = Some("*".to_string());
                }
            } else if field.view.is_some() {
                return Err(meta_err(
                    &collection,
                    Some(&field.name),
                    "'view' is only legal on fields that allow create or update",
                ));
            }

            fields.push(field);
        }

        for pk in &def.primary_keys {
            let field = fields
                .iter_mut()
                .find(|f| &f.name == pk)
                .ok_or_else(|| meta_err(&collection, None, format!("primary key '{pk}' is not a declared field")))?;
            field.required = true;
        }

        if let Some(ref_label) = &def.ref_label {
            if !fields.iter().any(|f| &f.name == ref_label) {
                return Err(meta_err(&collection, None, format!("ref_label '{ref_label}' is not a declared field")));
            }
        }

        if let Some(user_field) = &def.user_field {
            if !fields.iter().any(|f| &f.name == user_field) {
                return Err(meta_err(&collection, None, format!("user_field '{user_field}' is not a declared field")));
            }
        }

        if let Some(ref_filter) = &def.ref_filter {
            for (key, value) in ref_filter {
                if matches!(value, RawValue::Object(_) | RawValue::Array(_)) {
                    return Err(meta_err(&collection, None, format!("ref_filter.{key} must be a flat (non-nested) value")));
                }
            }
        }

        let roles = def
            .roles
            .iter()
            .map(|entry| RoleEntry::from_str(entry).map_err(|e| meta_err(&collection, None, e)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut meta = Meta {
            collection: collection.clone(),
            primary_keys: def.primary_keys,
            fields,
            fields_map: IndexMap::new(),
            ref_label: def.ref_label,
            ref_filter: def.ref_filter,
            user_field: def.user_field,
            roles,
            creatable: def.creatable,
            readable: def.readable,
            updatable: def.updatable,
            deleteable: def.deleteable,
            cloneable: def.cloneable,
            importable: def.importable,
            exportable: def.exportable,
            mode: String::new(),
            create_fields: Vec::new(),
            update_fields: Vec::new(),
            search_fields: Vec::new(),
            clone_fields: Vec::new(),
            list_fields: Vec::new(),
            property_fields: Vec::new(),
            client_fields: Vec::new(),
            primary_key_fields: Vec::new(),
            file_fields: Vec::new(),
            ref_fields: Vec::new(),
            link_fields: Vec::new(),
            required_field_names: Vec::new(),
            ref_by_metas: Vec::new(),
        };
        derive_subsets(&mut meta);

        self.metas.insert(collection, Arc::new(meta));
        Ok(())
    }

    /// Cross-cutting validation that needs every meta to already be
    /// registered: resolves `ref`/`link` targets, populates `ref_by_metas`
    /// back-edges, and checks role entries against `roles`. Freezes the
    /// registry on success; further [`MetaRegistry::register`] calls panic.
    pub fn validate_all_metas(&mut self, roles: &RoleRegistry) -> Result<(), MetaError> {
        let snapshot = self.metas.clone();
        let mut resolved_fields: IndexMap<String, Vec<Field>> = IndexMap::new();
        let mut ref_by_updates: IndexMap<String, Vec<String>> = IndexMap::new();

        for (collection, meta) in snapshot.iter() {
            let mut fields = meta.fields.clone();

            for field in fields.iter_mut() {
                if let Some(ref_target) = field.ref_target.clone() {
                    let target = snapshot.get(&ref_target).ok_or_else(|| {
                        meta_err(collection, Some(&field.name), format!("ref target '{ref_target}' is not registered"))
                    })?;
                    if target.ref_label.is_none() {
                        return Err(meta_err(
                            collection,
                            Some(&field.name),
                            format!("ref target '{ref_target}' does not declare a ref_label"),
                        ));
                    }
                    ref_by_updates.entry(ref_target).or_default().push(collection.clone());
                }

                if let Some(link_sibling) = field.link.clone() {
                    let sibling = meta.fields_map.get(&link_sibling).ok_or_else(|| {
                        meta_err(collection, Some(&field.name), format!("link target '{link_sibling}' is not a field of this entity"))
                    })?;
                    let sibling_ref = sibling.ref_target.clone().ok_or_else(|| {
                        meta_err(collection, Some(&field.name), format!("link target '{link_sibling}' does not declare a ref"))
                    })?;
                    let target_meta = snapshot.get(&sibling_ref).ok_or_else(|| {
                        meta_err(collection, Some(&field.name), format!("link target entity '{sibling_ref}' is not registered"))
                    })?;
                    let target_field = target_meta.fields_map.get(&field.name).ok_or_else(|| {
                        meta_err(
                            collection,
                            Some(&field.name),
                            format!("referenced entity '{sibling_ref}' has no field named '{}'", field.name),
                        )
                    })?;
                    field.type_name = target_field.type_name.clone();
                    field.ref_target = target_field.ref_target.clone();
                }
            }

            for role in &meta.roles {
                if !roles.is_registered(&role.role) {
                    return Err(meta_err(collection, None, format!("role '{}' is not registered", role.role)));
                }
                if role.mode != "*" {
                    for letter in role.mode.chars() {
                        if !meta.mode.contains(letter) {
                            return Err(meta_err(
                                collection,
                                None,
                                format!("role '{}' grants mode letter '{letter}' which is not part of this entity's mode '{}'", role.role, meta.mode),
                            ));
                        }
                    }
                }
            }

            resolved_fields.insert(collection.clone(), fields);
        }

        for (collection, fields) in resolved_fields {
            if let Some(meta) = self.metas.get(&collection) {
                let mut rebuilt = (**meta).clone();
                rebuilt.fields = fields;
                derive_subsets(&mut rebuilt);
                self.metas.insert(collection, Arc::new(rebuilt));
            }
        }

        for (target, mut referrers) in ref_by_updates {
            if let Some(meta) = self.metas.get(&target) {
                let mut rebuilt = (**meta).clone();
                for r in referrers.drain(..) {
                    if !rebuilt.ref_by_metas.contains(&r) {
                        rebuilt.ref_by_metas.push(r);
                    }
                }
                self.metas.insert(target, Arc::new(rebuilt));
            }
        }

        self.frozen.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertr::prelude::*;

    fn role_field() -> Field {
        let mut f = Field::new("name", "string");
        f.required = true;
        f
    }

    #[test]
    fn register_rejects_duplicate_field_names() {
        let mut registry = MetaRegistry::new();
        let mut def = MetaDef::new("widgets");
        def.primary_keys = vec!["name".to_string()];
        def.fields = vec![role_field(), role_field()];
        assert_that(registry.register(def).is_err()).is_true();
    }

    #[test]
    fn register_rejects_duplicate_collection() {
        let mut registry = MetaRegistry::new();
        let mut def = MetaDef::new("widgets");
        def.primary_keys = vec!["name".to_string()];
        def.fields = vec![role_field()];
        registry.register(def.clone()).unwrap();
        assert_that(registry.register(def).is_err()).is_true();
    }

    #[test]
    fn primary_keys_become_required() {
        let mut registry = MetaRegistry::new();
        let mut def = MetaDef::new("widgets");
        def.primary_keys = vec!["name".to_string()];
        def.fields = vec![Field::new("name", "string")];
        registry.register(def).unwrap();
        let meta = registry.get("widgets").unwrap();
        assert_that(meta.fields_map.get("name").unwrap().required).is_true();
        assert_that(meta.required_field_names.clone().as_slice()).contains_exactly_in_any_order(vec!["name".to_string()]);
    }

    #[test]
    fn validate_all_metas_resolves_ref_and_back_edges() {
        let mut registry = MetaRegistry::new();

        let mut role_def = MetaDef::new("roles");
        role_def.primary_keys = vec!["name".to_string()];
        role_def.ref_label = Some("name".to_string());
        role_def.fields = vec![Field::new("name", "string")];
        registry.register(role_def).unwrap();

        let mut user_def = MetaDef::new("users");
        user_def.primary_keys = vec!["name".to_string()];
        let mut role_field = Field::new("role", "string");
        role_field.ref_target = Some("roles".to_string());
        user_def.fields = vec![Field::new("name", "string"), role_field];
        registry.register(user_def).unwrap();

        let role_registry = RoleRegistry::new();
        registry.validate_all_metas(&role_registry).unwrap();

        let roles_meta = registry.get("roles").unwrap();
        assert_that(roles_meta.ref_by_metas.clone().as_slice()).contains_exactly_in_any_order(vec!["users".to_string()]);
        assert_that(registry.is_frozen()).is_true();
    }

    #[test]
    fn validate_all_metas_rejects_dangling_ref() {
        let mut registry = MetaRegistry::new();
        let mut user_def = MetaDef::new("users");
        user_def.primary_keys = vec!["name".to_string()];
        let mut role_field = Field::new("role", "string");
        role_field.ref_target = Some("missing".to_string());
        user_def.fields = vec![Field::new("name", "string"), role_field];
        registry.register(user_def).unwrap();

        let role_registry = RoleRegistry::new();
        assert_that(registry.validate_all_metas(&role_registry).is_err()).is_true();
    }

    #[test]
    fn link_field_inherits_type_and_ref_from_target_entity() {
        let mut registry = MetaRegistry::new();

        let mut role_def = MetaDef::new("roles");
        role_def.primary_keys = vec!["name".to_string()];
        role_def.ref_label = Some("name".to_string());
        role_def.fields = vec![Field::new("name", "string"), Field::new("desc", "string")];
        registry.register(role_def).unwrap();

        let mut user_def = MetaDef::new("users");
        user_def.primary_keys = vec!["name".to_string()];
        let mut role_field = Field::new("role", "string");
        role_field.ref_target = Some("roles".to_string());
        let mut role_link = Field::new("desc", "ignored");
        role_link.link = Some("role".to_string());
        user_def.fields = vec![Field::new("name", "string"), role_field, role_link];
        registry.register(user_def).unwrap();

        let role_registry = RoleRegistry::new();
        registry.validate_all_metas(&role_registry).unwrap();

        let users_meta = registry.get("users").unwrap();
        let link = users_meta.fields_map.get("desc").unwrap();
        assert_that(link.type_name.clone()).is_equal_to("string".to_string());
        assert_that(link.update).is_false();
        assert_that(link.create).is_false();
    }
}
