//! C7 — the store abstraction.
//!
//! The engine is a stateless transformer over an external document store; it
//! never owns data itself. This module defines the surface it needs —
//! nothing implements it here, the way `crudkit_rs` leaves `sea-orm`/`mongodb`
//! wiring to a separate adapter crate (`entitykit-memstore` plays that role
//! for tests and demos).

use serde_json::{Map, Value as RawValue};
use std::fmt::Debug;
use std::future::Future;

/// A query document. Spec §4.6.5 requires `$and, $in, $all, $gt, $gte, $lt,
/// $lte` plus case-insensitive regex matching on string fields; an empty
/// object matches every record.
pub type Query = Map<String, RawValue>;

/// A stored document. Always contains at least the entity's primary-key
/// fields and an allocated identifier under `"_id"`.
pub type Document = Map<String, RawValue>;

/// Sort/pagination knobs for [`Store::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// `(field, descending)` pairs, applied in order.
    pub sort: Vec<(String, bool)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

/// Options for [`Store::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub upsert: bool,
    pub multi: bool,
}

/// Outcome of a write operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteResult {
    pub ok: bool,
    pub n: u64,
}

/// The collection-store contract the entity engine is written against.
/// `E` is the store's own error type; implementors decide what it means.
pub trait Store: Send + Sync {
    type Error: std::fmt::Display + Debug + Send + Sync + 'static;

    fn insert(
        &self,
        collection: &str,
        obj: Document,
    ) -> impl Future<Output = Result<Document, Self::Error>> + Send;

    fn update(
        &self,
        collection: &str,
        query: &Query,
        obj: &Document,
        options: UpdateOptions,
    ) -> impl Future<Output = Result<WriteResult, Self::Error>> + Send;

    fn remove(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<WriteResult, Self::Error>> + Send;

    fn find(
        &self,
        collection: &str,
        query: &Query,
        projection: Option<&[String]>,
        options: FindOptions,
    ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send;

    fn find_one(
        &self,
        collection: &str,
        query: &Query,
        projection: Option<&[String]>,
    ) -> impl Future<Output = Result<Option<Document>, Self::Error>> + Send;

    fn count(&self, collection: &str, query: &Query) -> impl Future<Output = Result<u64, Self::Error>> + Send;
}
