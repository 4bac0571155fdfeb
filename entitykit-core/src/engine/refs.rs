//! Reference resolution and expansion (spec §4.6.3 and the ref-label
//! expansion step of `read`/`list`).

use crate::error::{ErrPayload, ResultCode};
use crate::meta::Meta;
use crate::query::RefValueResolver;
use crate::store::{FindOptions, Store};
use crate::validate::has_value;
use serde_json::{Map, Value as RawValue};
use std::future::Future;
use std::pin::Pin;

use super::EntityEngine;

enum RefResolution {
    Found(RawValue),
    NotFound,
    NotUnique,
}

impl<'a, S: Store> EntityEngine<'a, S> {
    /// Resolve every ref field present in `obj` in place, replacing each
    /// supplied identifier-or-label with the target's allocated id.
    pub(super) async fn resolve_refs(&self, meta: &Meta, obj: &mut Map<String, RawValue>) -> Result<(), (ResultCode, ErrPayload)> {
        for field_name in &meta.ref_fields {
            let Some(raw) = obj.get(field_name).cloned() else {
                continue;
            };
            if !has_value(&raw) {
                continue;
            }
            let field = meta.fields_map.get(field_name).expect("ref_fields names a declared field");
            let target_collection = field.ref_target.as_ref().expect("ref_fields field has ref_target");
            let Some(target_meta) = self.metas.get(target_collection) else {
                return Err((ResultCode::RefNotFound, ErrPayload::Fields(vec![field_name.clone()])));
            };

            let is_array = matches!(raw, RawValue::Array(_));
            let elements: Vec<RawValue> = match raw {
                RawValue::Array(items) => items,
                other => vec![other],
            };

            let mut resolved_ids = Vec::with_capacity(elements.len());
            for element in &elements {
                match self.resolve_single_ref(&target_meta, element).await {
                    RefResolution::Found(id) => resolved_ids.push(id),
                    RefResolution::NotFound => {
                        return Err((ResultCode::RefNotFound, ErrPayload::Fields(vec![field_name.clone()])));
                    }
                    RefResolution::NotUnique => {
                        return Err((ResultCode::RefNotUnique, ErrPayload::Fields(vec![field_name.clone()])));
                    }
                }
            }

            if is_array {
                obj.insert(field_name.clone(), RawValue::Array(resolved_ids));
            } else if let Some(id) = resolved_ids.into_iter().next() {
                obj.insert(field_name.clone(), id);
            }
        }
        Ok(())
    }

    /// Resolve a single raw ref element against `target_meta`: by identifier
    /// first, then by `ref_label`, always composing `target_meta.ref_filter`
    /// so filter-excluded records cannot be referenced (spec §4.6.3).
    async fn resolve_single_ref(&self, target_meta: &Meta, element: &RawValue) -> RefResolution {
        let base_filter = target_meta.ref_filter.clone().unwrap_or_default();

        let mut id_query = base_filter.clone();
        id_query.insert("_id".to_string(), element.clone());
        if let Ok(Some(doc)) = self.store.find_one(&target_meta.collection, &id_query, None).await {
            if let Some(id) = doc.get("_id") {
                return RefResolution::Found(id.clone());
            }
        }

        let Some(label_field) = &target_meta.ref_label else {
            return RefResolution::NotFound;
        };
        let mut label_query = base_filter;
        label_query.insert(label_field.clone(), element.clone());

        match self.store.find(&target_meta.collection, &label_query, None, FindOptions::default()).await {
            Ok(docs) if docs.len() == 1 => docs[0].get("_id").cloned().map(RefResolution::Found).unwrap_or(RefResolution::NotFound),
            Ok(docs) if docs.is_empty() => RefResolution::NotFound,
            Ok(_) => RefResolution::NotUnique,
            Err(_) => RefResolution::NotFound,
        }
    }

    /// Replace every ref field's stored id(s) with the target entity's
    /// `ref_label` value, for `read`/`list` responses. An id that no longer
    /// resolves yields `null` for that element (spec §9: the source leaves
    /// this silently undefined; this is the one place entitykit fixes it).
    pub(super) async fn expand_refs(&self, meta: &Meta, mut doc: Map<String, RawValue>) -> Map<String, RawValue> {
        for field_name in &meta.ref_fields {
            let Some(raw) = doc.get(field_name).cloned() else {
                continue;
            };
            let field = meta.fields_map.get(field_name).expect("ref_fields names a declared field");
            let Some(target_collection) = &field.ref_target else {
                continue;
            };
            let Some(target_meta) = self.metas.get(target_collection) else {
                continue;
            };
            let Some(label_field) = &target_meta.ref_label else {
                continue;
            };

            let is_array = matches!(raw, RawValue::Array(_));
            let ids: Vec<RawValue> = match raw {
                RawValue::Array(items) => items,
                other => vec![other],
            };

            let mut labels = Vec::with_capacity(ids.len());
            for id in ids {
                let mut query = Map::new();
                query.insert("_id".to_string(), id);
                let label = match self.store.find_one(target_collection, &query, Some(std::slice::from_ref(label_field))).await {
                    Ok(Some(target_doc)) => target_doc.get(label_field).cloned().unwrap_or(RawValue::Null),
                    _ => RawValue::Null,
                };
                labels.push(label);
            }

            if is_array {
                doc.insert(field_name.clone(), RawValue::Array(labels));
            } else if let Some(label) = labels.into_iter().next() {
                doc.insert(field_name.clone(), label);
            }
        }
        doc
    }
}

impl<'a, S: Store> RefValueResolver for EntityEngine<'a, S> {
    fn resolve<'b>(&'b self, ref_collection: &'b str, raw_value: &'b RawValue) -> Pin<Box<dyn Future<Output = Vec<RawValue>> + Send + 'b>> {
        Box::pin(async move {
            let Some(target_meta) = self.metas.get(ref_collection) else {
                return Vec::new();
            };
            match self.resolve_single_ref(&target_meta, raw_value).await {
                RefResolution::Found(id) => vec![id],
                _ => Vec::new(),
            }
        })
    }
}
