//! Result codes and internal error types for the entity engine.
//!
//! `ResultCode` is the stable, serializable enum callers switch on (spec §6/§7).
//! `EngineError` is the `snafu`-derived cause behind a `ResultCode::Error`; it is
//! meant for `tracing::error!`, never serialized back to a caller directly.

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::sync::Arc;

/// Stable result-code enum returned by every entity-engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    Error,
    NoParams,
    InvalidParams,
    DuplicateKey,
    NotFound,
    RefNotFound,
    RefNotUnique,
    HasRef,
    NoSession,
    NoRights,
}

/// The user-visible error payload: either a freeform message or a list of
/// offending field names. Callers distinguish by variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrPayload {
    Message(String),
    Fields(Vec<String>),
}

impl From<String> for ErrPayload {
    fn from(value: String) -> Self {
        ErrPayload::Message(value)
    }
}

impl From<Vec<String>> for ErrPayload {
    fn from(value: Vec<String>) -> Self {
        ErrPayload::Fields(value)
    }
}

/// Outcome of an entity-engine operation, as specified in spec §4.6.1.
#[derive(Debug, Clone)]
pub struct OpResult<T> {
    pub code: ResultCode,
    pub err: Option<ErrPayload>,
    pub data: Option<T>,
    pub total: Option<u64>,
}

impl Default for ResultCode {
    fn default() -> Self {
        ResultCode::Success
    }
}

impl<T> OpResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: ResultCode::Success,
            err: None,
            data: Some(data),
            total: None,
        }
    }

    pub fn ok_no_data() -> Self {
        Self {
            code: ResultCode::Success,
            err: None,
            data: None,
            total: None,
        }
    }

    pub fn code(code: ResultCode, err: impl Into<ErrPayload>) -> Self {
        Self {
            code,
            err: Some(err.into()),
            data: None,
            total: None,
        }
    }

    pub fn bare(code: ResultCode) -> Self {
        Self {
            code,
            err: None,
            data: None,
            total: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }
}

/// Programmer-error-free failure modes surfaced internally while servicing a
/// request. These never leave the engine directly; `ResultCode::Error` plus a
/// logged `EngineError` is what callers see instead (spec §7).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EngineError {
    #[snafu(display("store operation failed: {reason}"))]
    Store { reason: Arc<dyn StoreError> },

    #[snafu(display("lifecycle hook failed: {reason}"))]
    Hook { reason: String },

    #[snafu(display("store did not allocate an id for the inserted record"))]
    NoAllocatedId,
}

/// Marker trait for error types returned by `Store` implementations.
pub trait StoreError: std::fmt::Display + std::fmt::Debug + Send + Sync {}

impl<E: std::fmt::Display + std::fmt::Debug + Send + Sync> StoreError for E {}

/// Wrap a store failure as the logged cause of a generic `ResultCode::Error`,
/// per spec §7 ("store/hook failures are logged, never serialized to the
/// caller directly").
pub fn log_store_error<T>(collection: &str, cause: impl StoreError + 'static) -> OpResult<T> {
    let err = EngineError::Store { reason: Arc::new(cause) };
    tracing::error!(collection = %collection, error = %err, "store operation failed");
    OpResult::bare(ResultCode::Error)
}
