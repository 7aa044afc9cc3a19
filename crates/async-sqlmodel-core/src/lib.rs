//! Core types and traits for async-sqlmodel.
//!
//! This crate provides the foundational abstractions for awaitable ORM
//! attribute access:
//!
//! - `Model` trait for ORM-style struct mapping
//! - `Awaitable` declaration markers and the per-model awaitable registry
//! - `ExecutionBridge` for marshalling blocking reads off the async caller
//! - `Connection` trait for database connections
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod awaitable;
pub mod bridge;
pub mod connection;
pub mod error;
pub mod field;
pub mod model;
pub mod relationship;
pub mod row;
pub mod types;
pub mod validate;
pub mod value;

pub use awaitable::{AsyncModel, Awaitable, AwaitableFieldInfo, AwaitableRead};
pub use bridge::{BridgeFuture, ExecutionBridge, Job, SyncDriver, WorkerBridge, run_sync};
pub use connection::{Connection, outcome_to_result};
pub use error::{
    ConnectionError, ConnectionErrorKind, Error, FieldValidationError, QueryError, QueryErrorKind,
    Result, SessionError, SessionErrorKind, TypeError, ValidationError, ValidationErrorKind,
};
pub use field::FieldInfo;
pub use model::{Model, ModelConfig};
pub use relationship::{
    FromRelated, RelationshipInfo, RelationshipKind, find_relationship,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::SqlType;
pub use validate::validate_model;
pub use value::Value;
