//! Delete with referential integrity (spec §4.6.4).

use crate::error::{ErrPayload, OpResult, ResultCode};
use crate::meta::DeleteMode;
use crate::store::{FindOptions, Store};
use indexmap::IndexMap;
use serde_json::{Map, Value as RawValue};
use std::collections::{HashSet, VecDeque};

use super::EntityEngine;

fn id_key(id: &RawValue) -> String {
    id.to_string()
}

struct DeletePlan {
    /// Discovery order, root collection first — reversed before execution so
    /// leaves (the deepest cascade targets) are removed first.
    to_delete: IndexMap<String, Vec<RawValue>>,
    blocked: Vec<RawValue>,
}

impl<'a, S: Store> EntityEngine<'a, S> {
    async fn plan_delete(&self, root_collection: &str, ids: Vec<RawValue>) -> DeletePlan {
        let mut to_delete: IndexMap<String, Vec<RawValue>> = IndexMap::new();
        let mut blocked = Vec::new();
        let mut visited: HashSet<(String, String)> = HashSet::new();
        let mut queue: VecDeque<(String, RawValue)> = VecDeque::new();

        for id in ids {
            visited.insert((root_collection.to_string(), id_key(&id)));
            to_delete.entry(root_collection.to_string()).or_default().push(id.clone());
            queue.push_back((root_collection.to_string(), id));
        }

        while let Some((collection, id)) = queue.pop_front() {
            let Some(meta) = self.metas.get(&collection) else {
                continue;
            };

            for referrer_collection in &meta.ref_by_metas {
                let Some(referrer_meta) = self.metas.get(referrer_collection) else {
                    continue;
                };

                for field_name in &referrer_meta.ref_fields {
                    let field = referrer_meta.fields_map.get(field_name).expect("ref_fields names a declared field");
                    if field.ref_target.as_deref() != Some(collection.as_str()) {
                        continue;
                    }

                    // Use containment ($all) rather than scalar equality: a
                    // ref field may itself be array-typed (a multi-reference
                    // field), in which case the id we're looking for is one
                    // element among several, not the whole stored value.
                    let mut query = Map::new();
                    query.insert(field_name.clone(), serde_json::json!({"$all": [id.clone()]}));
                    let matches = match self
                        .store
                        .find(referrer_collection, &query, Some(&["_id".to_string()]), FindOptions::default())
                        .await
                    {
                        Ok(docs) => docs,
                        Err(e) => {
                            tracing::warn!(collection = %referrer_collection, error = ?e, "referential-integrity scan failed, treating as no referrers");
                            continue;
                        }
                    };
                    if matches.is_empty() {
                        continue;
                    }

                    match field.delete {
                        Some(DeleteMode::Cascade) => {
                            for doc in matches {
                                let Some(child_id) = doc.get("_id").cloned() else {
                                    continue;
                                };
                                let key = (referrer_collection.clone(), id_key(&child_id));
                                if visited.insert(key) {
                                    to_delete.entry(referrer_collection.clone()).or_default().push(child_id.clone());
                                    queue.push_back((referrer_collection.clone(), child_id));
                                }
                            }
                        }
                        Some(DeleteMode::Keep) => {}
                        None => blocked.push(id.clone()),
                    }
                }
            }
        }

        DeletePlan { to_delete, blocked }
    }

    /// Delete `ids` from this engine's bound entity, cascading or blocking
    /// per each referring field's `delete` mode (spec §4.6.4).
    #[tracing::instrument(level = "info", skip(self, ids))]
    pub async fn delete(&self, ids: Vec<RawValue>) -> OpResult<()> {
        let collection = self.meta.collection.clone();
        let hooks = self.hooks.get(&collection);

        if let Err(e) = hooks.before_delete(&ids).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        let plan = self.plan_delete(&collection, ids.clone()).await;

        if !plan.blocked.is_empty() {
            let blocked_repr = plan.blocked.iter().map(|v| v.to_string()).collect();
            return OpResult::code(ResultCode::HasRef, ErrPayload::Fields(blocked_repr));
        }

        for (affected_collection, affected_ids) in plan.to_delete.into_iter().rev() {
            let mut query = Map::new();
            query.insert("_id".to_string(), serde_json::json!({ "$in": affected_ids }));

            let affected_hooks = self.hooks.get(&affected_collection);
            let outcome = affected_hooks.override_delete(&affected_collection, &affected_ids).await;
            let write_result = match outcome {
                Some(Ok(wr)) => wr,
                Some(Err(e)) => {
                    let (code, err) = e.into_result_parts();
                    return OpResult { code, err, data: None, total: None };
                }
                None => match self.store.remove(&affected_collection, &query).await {
                    Ok(wr) => wr,
                    Err(e) => return crate::error::log_store_error(&affected_collection, e),
                },
            };

            if !write_result.ok {
                return OpResult::bare(ResultCode::Error);
            }
        }

        if let Err(e) = hooks.after_delete(&ids).await {
            let (code, err) = e.into_result_parts();
            return OpResult { code, err, data: None, total: None };
        }

        OpResult::ok_no_data()
    }
}
