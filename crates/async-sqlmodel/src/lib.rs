//! async-sqlmodel - awaitable attribute access for SQL models in async Rust.
//!
//! An ORM session that expires objects on commit leaves their attributes
//! unreadable until the next database round trip, and a plain field read has
//! no way to perform one from async code. async-sqlmodel closes that gap:
//!
//! - Declare a field `Awaitable<T>` with `#[awaitable(field = "...")]` and
//!   apply `#[async_model]` above `#[derive(Model)]`. The marker field is
//!   stripped before the schema derive runs, so it never becomes a column.
//! - In its place the model gains an accessor method returning a future, plus
//!   a compile-time registry of every declared accessor.
//! - [`AsyncSession`] dispatches the blocking read to an execution bridge
//!   whose worker owns a single-threaded runtime, so reading an expired
//!   attribute refreshes the object and resolves the future.
//!
//! # Quick Start
//!
//! ```ignore
//! use async_sqlmodel::prelude::*;
//!
//! #[async_model]
//! #[derive(Model, Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Hero {
//!     #[sqlmodel(primary_key)]
//!     id: Option<i64>,
//!     name: String,
//!     secret_name: String,
//!     #[awaitable(field = "name")]
//!     awaitable_name: Awaitable<String>,
//! }
//!
//! async fn example(cx: &Cx, conn: impl Connection + 'static) -> Result<()> {
//!     let hero = Hero { id: Some(1), name: "Deadpond".into(), secret_name: "Dive Wilson".into() };
//!
//!     let mut session = Session::new(conn);
//!     session.add(&hero);
//!     // commit expires the tracked instance (expire_on_commit)
//!
//!     let session = AsyncSession::with_worker(session)?;
//!     let name = hero.awaitable_name(cx, &session).await?;
//!     assert_eq!(name, "Deadpond");
//!     Ok(())
//! }
//! ```
//!
//! # Design
//!
//! - **Declaration markers, not data**: `Awaitable<T>` fields exist only in
//!   source text; the struct that compiles does not contain them.
//! - **Lazy target validation**: a marker naming a nonexistent field compiles
//!   fine and fails at the first await with an attribute-lookup error.
//! - **Structured concurrency**: built on asupersync; every database
//!   operation takes a `Cx` and returns `Outcome` or a `Cx`-aware future.

pub use async_sqlmodel_core::{
    // asupersync re-exports
    Budget,
    // Core types
    Connection,
    Cx,
    Error,
    FieldInfo,
    Model,
    ModelConfig,
    Outcome,
    RegionId,
    Result,
    Row,
    SqlType,
    TaskId,
    Value,
    // Awaitable declarations
    AsyncModel,
    Awaitable,
    AwaitableFieldInfo,
    AwaitableRead,
    // Execution bridge
    BridgeFuture,
    ExecutionBridge,
    SyncDriver,
    WorkerBridge,
    // Errors
    SessionError,
    SessionErrorKind,
    ValidationError,
    // Relationships
    FromRelated,
    RelationshipInfo,
    RelationshipKind,
    // Rows and validation
    FromValue,
    validate_model,
};

pub use async_sqlmodel_macros::{Model, async_model};

pub use async_sqlmodel_session::{
    AsyncSession, ObjectKey, ObjectState, Session, SessionConfig, SessionEvent,
};

/// Common imports for model definitions and session use.
pub mod prelude {
    pub use crate::{
        AsyncModel, AsyncSession, Awaitable, AwaitableRead, Connection, Cx, Error, Model, Outcome,
        Result, Session, SessionConfig, Value, WorkerBridge, async_model,
    };
    pub use serde::{Deserialize, Serialize};
}
