//! Lifecycle hook contract (spec §4.6.2).
//!
//! Hooks are expressed as named trait methods rather than reflecting over
//! function arity, per spec §9 ("Hook polymorphism"). `Meta` is runtime data
//! rather than a type parameter, so — unlike `crudkit_rs`'s generic
//! `CrudLifetime<R>` — hooks here are stored as `Arc<dyn EntityLifecycle>`
//! and need `#[async_trait]` for object safety, the same reason
//! `crudkit_rs`'s `ValidationResultRepository` uses it while the purely
//! generic `Repository<R>` trait does not.

use crate::error::{ErrPayload, ResultCode};
use crate::store::{Document, Query, WriteResult};
use async_trait::async_trait;
use serde_json::Value as RawValue;

/// Failure modes a hook can report. Mirrors the Forbidden / Unprocessable /
/// Internal split `crudkit_rs::lifetime::HookError<E>` uses, with the
/// internal error type-erased so `EntityLifecycle` stays object-safe
/// regardless of which `Store::Error` the engine is instantiated with.
#[derive(Debug)]
pub enum HookError {
    Forbidden(String),
    UnprocessableEntity(Vec<String>),
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl HookError {
    pub fn into_result_parts(self) -> (ResultCode, Option<ErrPayload>) {
        match self {
            HookError::Forbidden(msg) => (ResultCode::NoRights, Some(ErrPayload::Message(msg))),
            HookError::UnprocessableEntity(fields) => (ResultCode::InvalidParams, Some(ErrPayload::Fields(fields))),
            HookError::Internal(reason) => {
                tracing::error!(error = %reason, "lifecycle hook failed");
                (ResultCode::Error, Some(ErrPayload::Message("internal error".to_string())))
            }
        }
    }
}

pub type HookResult<T = ()> = Result<T, HookError>;

/// One entity's lifecycle interposition points. Every method defaults to a
/// no-op / "use the default store behavior", so an implementor only
/// overrides the hooks it actually needs.
#[async_trait]
pub trait EntityLifecycle: Send + Sync {
    async fn before_create(&self, _obj: &mut Document) -> HookResult {
        Ok(())
    }
    async fn after_create(&self, _obj: &Document) -> HookResult {
        Ok(())
    }
    /// If `Some`, replaces the default `store.insert` call entirely.
    async fn override_create(&self, _obj: &Document) -> Option<HookResult<Document>> {
        None
    }

    async fn before_clone(&self, _obj: &mut Document) -> HookResult {
        Ok(())
    }
    async fn after_clone(&self, _obj: &Document) -> HookResult {
        Ok(())
    }
    async fn override_clone(&self, _obj: &Document) -> Option<HookResult<Document>> {
        None
    }

    async fn before_update(&self, _id: Option<&RawValue>, _obj: &mut Document) -> HookResult {
        Ok(())
    }
    async fn after_update(&self, _id: Option<&RawValue>, _obj: &Document) -> HookResult {
        Ok(())
    }
    async fn override_update(&self, _query: &Query, _obj: &Document) -> Option<HookResult<WriteResult>> {
        None
    }

    async fn before_batch_update(&self, _ids: &[RawValue], _obj: &mut Document) -> HookResult {
        Ok(())
    }
    async fn after_batch_update(&self, _ids: &[RawValue], _obj: &Document) -> HookResult {
        Ok(())
    }
    async fn override_batch_update(&self, _ids: &[RawValue], _obj: &Document) -> Option<HookResult<WriteResult>> {
        None
    }

    async fn after_read(&self, _id: &RawValue, _attr_names: &[String], _record: &Document) -> HookResult {
        Ok(())
    }

    async fn before_delete(&self, _ids: &[RawValue]) -> HookResult {
        Ok(())
    }
    async fn after_delete(&self, _ids: &[RawValue]) -> HookResult {
        Ok(())
    }
    /// If `Some`, replaces the default `store.remove` call for `collection`
    /// during a cascade (the owning entity's hooks are consulted for every
    /// collection a delete touches, not just the one the caller named).
    async fn override_delete(&self, _collection: &str, _ids: &[RawValue]) -> Option<HookResult<WriteResult>> {
        None
    }
}

/// A lifecycle with every hook at its default no-op, the way `crudkit_rs`
/// ships `NoopLifetimeHooks` for resources that need none of them.
pub struct NoopLifecycle;

impl EntityLifecycle for NoopLifecycle {}

/// Maps a collection name to the [`EntityLifecycle`] governing it. Missing
/// entries behave as [`NoopLifecycle`].
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: std::collections::HashMap<String, std::sync::Arc<dyn EntityLifecycle>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collection: impl Into<String>, hooks: std::sync::Arc<dyn EntityLifecycle>) {
        self.hooks.insert(collection.into(), hooks);
    }

    pub fn get(&self, collection: &str) -> std::sync::Arc<dyn EntityLifecycle> {
        self.hooks
            .get(collection)
            .cloned()
            .unwrap_or_else(|| std::sync::Arc::new(NoopLifecycle))
    }
}
