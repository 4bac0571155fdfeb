//! An in-memory [`entitykit_core::store::Store`] implementation.
//!
//! Used by entitykit-core's own doctests/integration tests and as a minimal
//! runnable demo of the `Store` contract: one [`HashMap`] of collections,
//! each an insertion-ordered [`IndexMap`] of `_id -> Document`, guarded by a
//! single `RwLock`. Not meant for production use — no persistence, no
//! concurrency tuning beyond "don't block forever".

use entitykit_core::store::{Document, FindOptions, Query, Store, UpdateOptions, WriteResult};
use indexmap::IndexMap;
use serde_json::Value as RawValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug)]
pub struct MemoryStoreError(String);

impl std::fmt::Display for MemoryStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MemoryStoreError {}

pub struct MemoryStore {
    collections: RwLock<HashMap<String, IndexMap<String, Document>>>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Insert `docs` into `collection` verbatim, keyed by each document's own
    /// `_id` (panics if one is missing). Intended for test/demo fixture
    /// setup, bypassing id allocation.
    pub fn seed(&self, collection: &str, docs: Vec<Document>) {
        let mut collections = self.collections.write().expect("lock poisoned");
        let entry = collections.entry(collection.to_string()).or_default();
        for doc in docs {
            let id = doc.get("_id").and_then(|v| v.as_str()).expect("seeded document must have a string _id").to_string();
            entry.insert(id, doc);
        }
    }

    fn allocate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("id-{n}")
    }

    fn project(doc: &Document, projection: Option<&[String]>) -> Document {
        match projection {
            None => doc.clone(),
            Some(fields) => doc
                .iter()
                .filter(|(k, _)| k.as_str() == "_id" || fields.iter().any(|f| f == k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

fn apply_sort(docs: &mut [Document], sort: &[(String, bool)]) {
    docs.sort_by(|a, b| {
        for (field, desc) in sort {
            let ordering = compare_values(a.get(field), b.get(field));
            let ordering = if *desc { ordering.reverse() } else { ordering };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn compare_values(a: Option<&RawValue>, b: Option<&RawValue>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(RawValue::Number(x)), Some(RawValue::Number(y))) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Some(RawValue::String(x)), Some(RawValue::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Whether `value` satisfies `condition`, the store side of the operator set
/// spec §4.6.5 requires from the query builder: `$and`, `$in`, `$all`,
/// `$gt`, `$gte`, `$lt`, `$lte`, and case-insensitive `$regex`.
fn matches_condition(value: Option<&RawValue>, condition: &RawValue) -> bool {
    let RawValue::Object(ops) = condition else {
        return value == Some(condition);
    };

    if let Some(wanted) = ops.get("$in") {
        let Some(options) = wanted.as_array() else { return false };
        let Some(v) = value else { return false };
        return options.contains(v);
    }

    if let Some(wanted) = ops.get("$all") {
        let Some(options) = wanted.as_array() else { return false };
        let Some(v) = value else { return false };
        return match v {
            RawValue::Array(actual) => options.iter().all(|needed| actual.contains(needed)),
            scalar => options.iter().all(|needed| needed == scalar),
        };
    }

    if let Some(pattern) = ops.get("$regex").and_then(|v| v.as_str()) {
        let Some(RawValue::String(s)) = value else { return false };
        let case_insensitive = ops.get("$options").and_then(|v| v.as_str()).map(|o| o.contains('i')).unwrap_or(false);
        let built = if case_insensitive { format!("(?i){pattern}") } else { pattern.to_string() };
        return regex::Regex::new(&built).map(|re| re.is_match(s)).unwrap_or(false);
    }

    let Some(v) = value else { return false };
    let numeric_cmp = |threshold: &RawValue| -> Option<std::cmp::Ordering> {
        let a = v.as_f64()?;
        let b = threshold.as_f64()?;
        a.partial_cmp(&b)
    };

    if let Some(threshold) = ops.get("$gt") {
        if numeric_cmp(threshold) != Some(std::cmp::Ordering::Greater) {
            return false;
        }
    }
    if let Some(threshold) = ops.get("$gte") {
        if !matches!(numeric_cmp(threshold), Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)) {
            return false;
        }
    }
    if let Some(threshold) = ops.get("$lt") {
        if numeric_cmp(threshold) != Some(std::cmp::Ordering::Less) {
            return false;
        }
    }
    if let Some(threshold) = ops.get("$lte") {
        if !matches!(numeric_cmp(threshold), Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)) {
            return false;
        }
    }

    true
}

fn matches_query(doc: &Document, query: &Query) -> bool {
    for (key, condition) in query {
        if key == "$and" {
            let Some(clauses) = condition.as_array() else { return false };
            let all_match = clauses.iter().all(|clause| {
                clause
                    .as_object()
                    .map(|obj| matches_query(doc, obj))
                    .unwrap_or(false)
            });
            if !all_match {
                return false;
            }
            continue;
        }

        if !matches_condition(doc.get(key), condition) {
            return false;
        }
    }
    true
}

impl Store for MemoryStore {
    type Error = MemoryStoreError;

    async fn insert(&self, collection: &str, mut obj: Document) -> Result<Document, Self::Error> {
        let id = self.allocate_id();
        obj.insert("_id".to_string(), RawValue::String(id.clone()));
        let mut collections = self.collections.write().map_err(|_| MemoryStoreError("lock poisoned".to_string()))?;
        collections.entry(collection.to_string()).or_default().insert(id, obj.clone());
        Ok(obj)
    }

    async fn update(&self, collection: &str, query: &Query, obj: &Document, options: UpdateOptions) -> Result<WriteResult, Self::Error> {
        let mut collections = self.collections.write().map_err(|_| MemoryStoreError("lock poisoned".to_string()))?;
        let entry = collections.entry(collection.to_string()).or_default();

        let matching_ids: Vec<String> = entry.iter().filter(|(_, doc)| matches_query(doc, query)).map(|(id, _)| id.clone()).collect();

        if matching_ids.is_empty() {
            if options.upsert {
                let id = self.allocate_id();
                let mut inserted = obj.clone();
                inserted.insert("_id".to_string(), RawValue::String(id.clone()));
                entry.insert(id, inserted);
                return Ok(WriteResult { ok: true, n: 1 });
            }
            return Ok(WriteResult { ok: true, n: 0 });
        }

        let targets = if options.multi { matching_ids.as_slice() } else { &matching_ids[..1] };
        for id in targets {
            if let Some(doc) = entry.get_mut(id) {
                for (k, v) in obj {
                    if k != "_id" {
                        doc.insert(k.clone(), v.clone());
                    }
                }
            }
        }

        Ok(WriteResult { ok: true, n: targets.len() as u64 })
    }

    async fn remove(&self, collection: &str, query: &Query) -> Result<WriteResult, Self::Error> {
        let mut collections = self.collections.write().map_err(|_| MemoryStoreError("lock poisoned".to_string()))?;
        let entry = collections.entry(collection.to_string()).or_default();
        let before = entry.len();
        entry.retain(|_, doc| !matches_query(doc, query));
        Ok(WriteResult { ok: true, n: (before - entry.len()) as u64 })
    }

    async fn find(&self, collection: &str, query: &Query, projection: Option<&[String]>, options: FindOptions) -> Result<Vec<Document>, Self::Error> {
        let collections = self.collections.read().map_err(|_| MemoryStoreError("lock poisoned".to_string()))?;
        let mut docs: Vec<Document> = collections
            .get(collection)
            .map(|entries| entries.values().filter(|doc| matches_query(doc, query)).cloned().collect())
            .unwrap_or_default();

        apply_sort(&mut docs, &options.sort);

        let skip = options.skip.unwrap_or(0) as usize;
        let docs = if skip < docs.len() { docs.split_off(skip) } else { Vec::new() };
        let docs = if let Some(limit) = options.limit { docs.into_iter().take(limit as usize).collect() } else { docs };

        Ok(docs.iter().map(|doc| Self::project(doc, projection)).collect())
    }

    async fn find_one(&self, collection: &str, query: &Query, projection: Option<&[String]>) -> Result<Option<Document>, Self::Error> {
        let collections = self.collections.read().map_err(|_| MemoryStoreError("lock poisoned".to_string()))?;
        Ok(collections
            .get(collection)
            .and_then(|entries| entries.values().find(|doc| matches_query(doc, query)))
            .map(|doc| Self::project(doc, projection)))
    }

    async fn count(&self, collection: &str, query: &Query) -> Result<u64, Self::Error> {
        let collections = self.collections.read().map_err(|_| MemoryStoreError("lock poisoned".to_string()))?;
        Ok(collections
            .get(collection)
            .map(|entries| entries.values().filter(|doc| matches_query(doc, query)).count() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertr::prelude::*;
    use serde_json::json;

    fn doc(id: &str, name: &str, age: i64) -> Document {
        [
            ("_id".to_string(), json!(id)),
            ("name".to_string(), json!(name)),
            ("age".to_string(), json!(age)),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn insert_allocates_sequential_ids() {
        let store = MemoryStore::new();
        let first = store.insert("widgets", Document::new()).await.unwrap();
        let second = store.insert("widgets", Document::new()).await.unwrap();
        assert_that(first.get("_id") == second.get("_id")).is_false();
    }

    #[tokio::test]
    async fn find_applies_gte_and_sort() {
        let store = MemoryStore::new();
        store.seed("users", vec![doc("a", "ann", 30), doc("b", "bob", 20), doc("c", "cid", 40)]);

        let mut query = Query::new();
        query.insert("age".to_string(), json!({"$gte": 25}));
        let options = FindOptions { sort: vec![("age".to_string(), false)], skip: None, limit: None };
        let results = store.find("users", &query, None, options).await.unwrap();

        let names: Vec<_> = results.iter().map(|d| d.get("name").unwrap().clone()).collect();
        assert_that(names).is_equal_to(vec![json!("ann"), json!("cid")]);
    }

    #[tokio::test]
    async fn remove_deletes_matching_and_reports_count() {
        let store = MemoryStore::new();
        store.seed("users", vec![doc("a", "ann", 30), doc("b", "bob", 20)]);

        let mut query = Query::new();
        query.insert("_id".to_string(), json!({"$in": [json!("a")]}));
        let result = store.remove("users", &query).await.unwrap();
        assert_that(result.n).is_equal_to(1);
        assert_that(store.count("users", &Query::new()).await.unwrap()).is_equal_to(1);
    }

    #[tokio::test]
    async fn update_multi_applies_to_every_match() {
        let store = MemoryStore::new();
        store.seed("users", vec![doc("a", "ann", 30), doc("b", "bob", 30)]);

        let mut query = Query::new();
        query.insert("age".to_string(), json!(30));
        let mut patch = Document::new();
        patch.insert("age".to_string(), json!(31));
        let result = store.update("users", &query, &patch, UpdateOptions { upsert: false, multi: true }).await.unwrap();
        assert_that(result.n).is_equal_to(2);
    }

    #[tokio::test]
    async fn case_insensitive_regex_matches_any_case() {
        let store = MemoryStore::new();
        store.seed("users", vec![doc("a", "Ada", 30)]);

        let mut query = Query::new();
        query.insert("name".to_string(), json!({"$regex": "ada", "$options": "i"}));
        let results = store.find("users", &query, None, FindOptions::default()).await.unwrap();
        assert_that(results.len()).is_equal_to(1);
    }
}
