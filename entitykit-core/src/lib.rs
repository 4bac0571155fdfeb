//! entitykit-core
//!
//! A metadata-driven entity engine: register [`meta::MetaDef`]s describing an
//! entity's fields, plug in a [`store::Store`], and get create/read/list/
//! update/batch_update/clone/delete with reference resolution, role-based
//! access, referential-integrity-on-delete, and lifecycle hooks for free.
//!
//! The engine owns no storage itself — `entitykit-memstore` is one adapter,
//! but any [`store::Store`] implementor works.

pub mod config;
pub mod engine;
pub mod error;
pub mod meta;
pub mod query;
pub mod roles;
pub mod store;
pub mod types;
pub mod validate;

pub use engine::{EntityEngine, FieldDescriptor, ListParams};
pub use error::{ErrPayload, OpResult, ResultCode};
pub use meta::{Meta, MetaDef, MetaRegistry};
pub use roles::{Access, RoleRegistry};
pub use store::Store;
