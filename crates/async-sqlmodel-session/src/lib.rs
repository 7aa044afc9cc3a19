//! Session and Unit of Work for async-sqlmodel.
//!
//! `async-sqlmodel-session` is the **unit-of-work layer**. It coordinates
//! object identity, change tracking, and transactional persistence, and it
//! carries the synchronous read path that awaitable accessors marshal through
//! the execution bridge.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: ensures a single in-memory instance per primary key.
//! - **Change tracking**: records inserts, updates, and deletes before flush.
//! - **Expiry**: commit expires persistent objects; the next read reloads.
//! - **Awaitable reads**: `AsyncSession` implements `AwaitableRead` so the
//!   accessors generated by `#[async_model]` can read expired attributes and
//!   relationships from async code.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: No autoflush by default.
//! - **Ownership clarity**: Session owns the connection.
//! - **Type erasure**: Identity map stores `Box<dyn Any>` for heterogeneous models.
//! - **Cancel-correct**: All async operations use `Cx` + `Outcome` via
//!   `async-sqlmodel-core`.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(connection);
//!
//! // Add new objects (will be INSERTed on flush)
//! session.add(&hero);
//!
//! // Commit; with expire_on_commit the tracked instance is now expired
//! session.commit(&cx).await?;
//!
//! // An awaitable accessor can still read it through the bridge
//! let session = AsyncSession::with_worker(session)?;
//! let name = hero.awaitable_name(&cx, &session).await?;
//! ```

pub mod async_session;

pub use async_session::AsyncSession;

use asupersync::{Cx, Outcome};
use async_sqlmodel_core::bridge::SyncDriver;
use async_sqlmodel_core::{
    Connection, Error, FromRelated, FromValue, Model, QueryError, QueryErrorKind,
    RelationshipKind, Result, SessionError, Value, find_relationship, outcome_to_result,
};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

// ============================================================================
// Session Events
// ============================================================================

/// Type alias for session event callbacks.
///
/// Callbacks receive no arguments and return `Result<(), Error>`.
/// Returning `Err` will abort the operation (e.g., prevent commit).
type SessionEventFn = Box<dyn FnMut() -> Result<()> + Send>;

/// Holds registered session-level event callbacks.
///
/// These are fired at key points in the session lifecycle:
/// before/after flush, commit, and rollback.
#[derive(Default)]
pub struct SessionEventCallbacks {
    before_flush: Vec<SessionEventFn>,
    after_flush: Vec<SessionEventFn>,
    before_commit: Vec<SessionEventFn>,
    after_commit: Vec<SessionEventFn>,
    after_rollback: Vec<SessionEventFn>,
}

impl std::fmt::Debug for SessionEventCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventCallbacks")
            .field("before_flush", &self.before_flush.len())
            .field("after_flush", &self.after_flush.len())
            .field("before_commit", &self.before_commit.len())
            .field("after_commit", &self.after_commit.len())
            .field("after_rollback", &self.after_rollback.len())
            .finish()
    }
}

impl SessionEventCallbacks {
    #[allow(clippy::result_large_err)]
    fn fire(&mut self, event: SessionEvent) -> Result<()> {
        let callbacks = match event {
            SessionEvent::BeforeFlush => &mut self.before_flush,
            SessionEvent::AfterFlush => &mut self.after_flush,
            SessionEvent::BeforeCommit => &mut self.before_commit,
            SessionEvent::AfterCommit => &mut self.after_commit,
            SessionEvent::AfterRollback => &mut self.after_rollback,
        };
        for cb in callbacks.iter_mut() {
            cb()?;
        }
        Ok(())
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Fired before flush executes pending changes.
    BeforeFlush,
    /// Fired after flush completes successfully.
    AfterFlush,
    /// Fired before commit (after flush).
    BeforeCommit,
    /// Fired after commit completes successfully.
    AfterCommit,
    /// Fired after rollback completes.
    AfterRollback,
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether to auto-begin a transaction on first operation.
    pub auto_begin: bool,
    /// Whether to auto-flush before queries (not recommended for performance).
    pub auto_flush: bool,
    /// Whether to expire objects after commit (reload from DB on next access).
    pub expire_on_commit: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_begin: true,
            auto_flush: false,
            expire_on_commit: true,
        }
    }
}

// ============================================================================
// Object Key and State
// ============================================================================

/// Unique key for an object in the identity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Type identifier for the Model type.
    type_id: TypeId,
    /// Hash of the primary key value(s).
    pk_hash: u64,
}

impl ObjectKey {
    /// Create an object key from a model instance.
    pub fn from_model<M: Model + 'static>(obj: &M) -> Self {
        let pk_values = obj.primary_key_value();
        Self {
            type_id: TypeId::of::<M>(),
            pk_hash: hash_values(&pk_values),
        }
    }

    /// Create an object key from type and primary key.
    pub fn from_pk<M: Model + 'static>(pk: &[Value]) -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            pk_hash: hash_values(pk),
        }
    }

    /// Get the primary key hash.
    pub fn pk_hash(&self) -> u64 {
        self.pk_hash
    }

    /// Get the type identifier.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

/// Hash a slice of values for use as a primary key hash.
fn hash_values(values: &[Value]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    for v in values {
        hash_value(v, &mut hasher);
    }
    hasher.finish()
}

/// Hash a single value into the hasher, discriminating by variant.
fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Int(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::BigInt(i) => {
            3u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Float(f) => {
            4u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Double(f) => {
            5u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Text(s) => {
            6u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            7u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Json(j) => {
            8u8.hash(hasher);
            j.to_string().hash(hasher);
        }
        Value::Array(arr) => {
            9u8.hash(hasher);
            arr.len().hash(hasher);
            for item in arr {
                hash_value(item, hasher);
            }
        }
    }
}

/// State of a tracked object in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// New object, needs INSERT on flush.
    New,
    /// Persistent object loaded from database.
    Persistent,
    /// Object marked for deletion, needs DELETE on flush.
    Deleted,
    /// Object detached from session.
    Detached,
    /// Object expired, needs reload from database.
    Expired,
}

/// A tracked object in the session.
struct TrackedObject {
    /// The actual object (type-erased).
    object: Box<dyn Any + Send + Sync>,
    /// Original serialized state for dirty checking.
    original_state: Option<Vec<u8>>,
    /// Current object state.
    state: ObjectState,
    /// Table name for this object.
    table_name: &'static str,
    /// Column names for this object.
    column_names: Vec<&'static str>,
    /// Current values for each column (for INSERT/UPDATE).
    values: Vec<Value>,
    /// Primary key column names.
    pk_columns: Vec<&'static str>,
    /// Primary key values (for DELETE/UPDATE WHERE clause).
    pk_values: Vec<Value>,
    /// Set of expired attribute names (None = all expired when state is
    /// Expired). When Some(non-empty), only those attributes need reload.
    expired_attributes: Option<std::collections::HashSet<String>>,
}

impl TrackedObject {
    /// Is this attribute stale and in need of a database round trip?
    fn is_attribute_expired(&self, name: &str) -> bool {
        if self.state != ObjectState::Expired {
            return false;
        }
        match &self.expired_attributes {
            None => true,
            Some(attrs) => attrs.contains(name),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// The Session is the central unit-of-work manager.
///
/// It tracks objects loaded from or added to the database and coordinates
/// flushing changes back to the database. Its synchronous read methods
/// (`attribute`, `related`) are the target of the execution bridge: they may
/// drive connection futures through the thread-local `SyncDriver` and fail
/// with the unavailable-context error when none is installed.
pub struct Session<C: Connection> {
    /// The database connection.
    connection: C,
    /// Whether we're in a transaction.
    in_transaction: bool,
    /// Identity map: ObjectKey -> TrackedObject.
    identity_map: HashMap<ObjectKey, TrackedObject>,
    /// Objects marked as new (need INSERT).
    pending_new: Vec<ObjectKey>,
    /// Objects marked as deleted (need DELETE).
    pending_delete: Vec<ObjectKey>,
    /// Objects that are dirty (need UPDATE).
    pending_dirty: Vec<ObjectKey>,
    /// Configuration.
    config: SessionConfig,
    /// Session-level event callbacks.
    event_callbacks: SessionEventCallbacks,
}

impl<C: Connection> Session<C> {
    /// Create a new session from an existing connection.
    pub fn new(connection: C) -> Self {
        Self::with_config(connection, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(connection: C, config: SessionConfig) -> Self {
        Self {
            connection,
            in_transaction: false,
            identity_map: HashMap::new(),
            pending_new: Vec::new(),
            pending_delete: Vec::new(),
            pending_dirty: Vec::new(),
            config,
            event_callbacks: SessionEventCallbacks::default(),
        }
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ========================================================================
    // Session Events
    // ========================================================================

    /// Register a callback to run before flush.
    ///
    /// The callback can abort the flush by returning `Err`.
    pub fn on_before_flush(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.event_callbacks.before_flush.push(Box::new(f));
    }

    /// Register a callback to run after a successful flush.
    pub fn on_after_flush(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.event_callbacks.after_flush.push(Box::new(f));
    }

    /// Register a callback to run before commit (after flush).
    ///
    /// The callback can abort the commit by returning `Err`.
    pub fn on_before_commit(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.event_callbacks.before_commit.push(Box::new(f));
    }

    /// Register a callback to run after a successful commit.
    pub fn on_after_commit(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.event_callbacks.after_commit.push(Box::new(f));
    }

    /// Register a callback to run after rollback.
    pub fn on_after_rollback(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.event_callbacks.after_rollback.push(Box::new(f));
    }

    // ========================================================================
    // Object Tracking
    // ========================================================================

    /// Add a new object to the session.
    ///
    /// The object will be INSERTed on the next `flush()` call.
    pub fn add<M: Model + Clone + Send + Sync + Serialize + 'static>(&mut self, obj: &M) {
        let key = ObjectKey::from_model(obj);

        // If already tracked, update the object and its values
        if let Some(tracked) = self.identity_map.get_mut(&key) {
            tracked.object = Box::new(obj.clone());

            let row_data = obj.to_row();
            tracked.column_names = row_data.iter().map(|(name, _)| *name).collect();
            tracked.values = row_data.into_iter().map(|(_, v)| v).collect();
            tracked.pk_values = obj.primary_key_value();

            if tracked.state == ObjectState::Deleted {
                // Un-delete: remove from pending_delete and restore state
                self.pending_delete.retain(|k| k != &key);

                if tracked.original_state.is_some() {
                    tracked.state = ObjectState::Persistent;
                } else {
                    tracked.state = ObjectState::New;
                    if !self.pending_new.contains(&key) {
                        self.pending_new.push(key);
                    }
                }
            }
            return;
        }

        // Extract column data from the model while we have the concrete type
        let row_data = obj.to_row();
        let column_names: Vec<&'static str> = row_data.iter().map(|(name, _)| *name).collect();
        let values: Vec<Value> = row_data.into_iter().map(|(_, v)| v).collect();

        let pk_columns: Vec<&'static str> = M::PRIMARY_KEY.to_vec();
        let pk_values = obj.primary_key_value();

        let tracked = TrackedObject {
            object: Box::new(obj.clone()),
            original_state: None, // New objects have no original state
            state: ObjectState::New,
            table_name: M::TABLE_NAME,
            column_names,
            values,
            pk_columns,
            pk_values,
            expired_attributes: None,
        };

        self.identity_map.insert(key, tracked);
        self.pending_new.push(key);
    }

    /// Add multiple objects to the session at once.
    ///
    /// All objects will be INSERTed on the next `flush()` call.
    pub fn add_all<'a, M, I>(&mut self, objects: I)
    where
        M: Model + Clone + Send + Sync + Serialize + 'static,
        I: IntoIterator<Item = &'a M>,
    {
        for obj in objects {
            self.add(obj);
        }
    }

    /// Delete an object from the session.
    ///
    /// The object will be DELETEd on the next `flush()` call.
    pub fn delete<M: Model + 'static>(&mut self, obj: &M) {
        let key = ObjectKey::from_model(obj);

        if let Some(tracked) = self.identity_map.get_mut(&key) {
            match tracked.state {
                ObjectState::New => {
                    // If it's new, just remove it entirely
                    self.identity_map.remove(&key);
                    self.pending_new.retain(|k| k != &key);
                }
                ObjectState::Persistent | ObjectState::Expired => {
                    tracked.state = ObjectState::Deleted;
                    self.pending_delete.push(key);
                    self.pending_dirty.retain(|k| k != &key);
                }
                ObjectState::Deleted | ObjectState::Detached => {
                    // Already deleted or detached, nothing to do
                }
            }
        }
    }

    /// Mark an object as dirty (modified) so it will be UPDATEd on flush.
    ///
    /// This updates the stored values from the object and schedules an UPDATE.
    /// Only works for objects that are already tracked as Persistent.
    pub fn mark_dirty<M: Model + Clone + Send + Sync + Serialize + 'static>(&mut self, obj: &M) {
        let key = ObjectKey::from_model(obj);

        if let Some(tracked) = self.identity_map.get_mut(&key) {
            if tracked.state != ObjectState::Persistent {
                return;
            }

            tracked.object = Box::new(obj.clone());
            let row_data = obj.to_row();
            tracked.column_names = row_data.iter().map(|(name, _)| *name).collect();
            tracked.values = row_data.into_iter().map(|(_, v)| v).collect();
            tracked.pk_values = obj.primary_key_value();

            if !self.pending_dirty.contains(&key) {
                self.pending_dirty.push(key);
            }
        }
    }

    /// Get an object by primary key.
    ///
    /// First checks the identity map, then queries the database if not found.
    pub async fn get<M>(&mut self, cx: &Cx, pk: impl Into<Value>) -> Outcome<Option<M>, Error>
    where
        M: Model + Clone + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
    {
        let pk_values = vec![pk.into()];
        self.get_by_pk::<M>(cx, &pk_values).await
    }

    /// Get an object by (possibly composite) primary key.
    ///
    /// First checks the identity map, then queries the database if not found.
    /// Expired objects skip the cache and reload from the database.
    pub async fn get_by_pk<M>(&mut self, cx: &Cx, pk_values: &[Value]) -> Outcome<Option<M>, Error>
    where
        M: Model + Clone + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
    {
        let key = ObjectKey::from_pk::<M>(pk_values);

        if let Some(tracked) = self.identity_map.get(&key) {
            match tracked.state {
                ObjectState::Deleted | ObjectState::Detached => {
                    // Return None for deleted/detached objects
                }
                ObjectState::Expired => {
                    tracing::debug!("Object is expired, reloading from database");
                }
                ObjectState::New | ObjectState::Persistent => {
                    if let Some(obj) = tracked.object.downcast_ref::<M>() {
                        return Outcome::Ok(Some(obj.clone()));
                    }
                }
            }
        }

        let sql = match select_by_pk_sql::<M>(pk_values.len()) {
            Ok(sql) => sql,
            Err(e) => return Outcome::Err(e),
        };

        let rows = match self.connection.query(cx, &sql, pk_values).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        if rows.is_empty() {
            return Outcome::Ok(None);
        }

        let obj = match M::from_row(&rows[0]) {
            Ok(obj) => obj,
            Err(e) => return Outcome::Err(e),
        };

        self.track_loaded(&obj);
        Outcome::Ok(Some(obj))
    }

    /// Check if an object is tracked by this session.
    pub fn contains<M: Model + 'static>(&self, obj: &M) -> bool {
        let key = ObjectKey::from_model(obj);
        self.identity_map.contains_key(&key)
    }

    /// Detach an object from the session.
    pub fn expunge<M: Model + 'static>(&mut self, obj: &M) {
        let key = ObjectKey::from_model(obj);
        if let Some(tracked) = self.identity_map.get_mut(&key) {
            tracked.state = ObjectState::Detached;
        }
        self.pending_new.retain(|k| k != &key);
        self.pending_delete.retain(|k| k != &key);
        self.pending_dirty.retain(|k| k != &key);
    }

    /// Detach all objects from the session.
    pub fn expunge_all(&mut self) {
        for tracked in self.identity_map.values_mut() {
            tracked.state = ObjectState::Detached;
        }
        self.pending_new.clear();
        self.pending_delete.clear();
        self.pending_dirty.clear();
    }

    /// Check if an object has pending changes.
    pub fn is_modified<M: Model + Serialize + 'static>(&self, obj: &M) -> bool {
        let key = ObjectKey::from_model(obj);

        let Some(tracked) = self.identity_map.get(&key) else {
            return false;
        };

        match tracked.state {
            ObjectState::New | ObjectState::Deleted => true,
            ObjectState::Detached | ObjectState::Expired => false,
            ObjectState::Persistent => {
                if self.pending_dirty.contains(&key) {
                    return true;
                }
                let current_state = serde_json::to_vec(&tracked.values).unwrap_or_default();
                tracked.original_state.as_ref() != Some(&current_state)
            }
        }
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Expire an object so the next access reloads it from the database.
    ///
    /// Passing `None` expires all attributes; passing a slice expires only
    /// those attributes.
    #[tracing::instrument(level = "debug", skip(self, obj), fields(table = M::TABLE_NAME))]
    pub fn expire<M: Model + 'static>(&mut self, obj: &M, attributes: Option<&[&str]>) {
        let key = ObjectKey::from_model(obj);

        let Some(tracked) = self.identity_map.get_mut(&key) else {
            tracing::debug!("Object not tracked, nothing to expire");
            return;
        };

        match tracked.state {
            ObjectState::New | ObjectState::Detached | ObjectState::Deleted => {
                tracing::debug!(state = ?tracked.state, "Cannot expire object in this state");
                return;
            }
            ObjectState::Persistent | ObjectState::Expired => {}
        }

        match attributes {
            None => {
                tracked.state = ObjectState::Expired;
                tracked.expired_attributes = None;
                tracing::debug!("Expired all attributes");
            }
            Some(attrs) => {
                // A fully expired object stays fully expired; a named subset
                // must never narrow it back to only those attributes.
                if tracked.state == ObjectState::Expired && tracked.expired_attributes.is_none() {
                    tracing::debug!("Object already fully expired, nothing to narrow");
                    return;
                }

                let mut expired = tracked.expired_attributes.take().unwrap_or_default();
                for attr in attrs {
                    expired.insert((*attr).to_string());
                }
                tracked.expired_attributes = Some(expired);

                if tracked.state == ObjectState::Persistent {
                    tracked.state = ObjectState::Expired;
                }
                tracing::debug!(attributes = ?attrs, "Expired specific attributes");
            }
        }
    }

    /// Expire all persistent objects in the session.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn expire_all(&mut self) {
        let mut expired_count = 0;
        for tracked in self.identity_map.values_mut() {
            if tracked.state == ObjectState::Persistent {
                tracked.state = ObjectState::Expired;
                tracked.expired_attributes = None;
                expired_count += 1;
            }
        }
        tracing::debug!(count = expired_count, "Expired all session objects");
    }

    /// Check if an object is expired (needs reload from database).
    pub fn is_expired<M: Model + 'static>(&self, obj: &M) -> bool {
        let key = ObjectKey::from_model(obj);
        self.identity_map
            .get(&key)
            .is_some_and(|t| t.state == ObjectState::Expired)
    }

    /// Get the expired attribute names for an object.
    ///
    /// Returns:
    /// - `None` if the object is not tracked or not expired
    /// - `Some(None)` if all attributes are expired
    /// - `Some(Some(set))` if only specific attributes are expired
    pub fn expired_attributes<M: Model + 'static>(
        &self,
        obj: &M,
    ) -> Option<Option<&std::collections::HashSet<String>>> {
        let key = ObjectKey::from_model(obj);
        let tracked = self.identity_map.get(&key)?;

        if tracked.state != ObjectState::Expired {
            return None;
        }

        Some(tracked.expired_attributes.as_ref())
    }

    /// Refresh an object by reloading it from the database immediately.
    ///
    /// Returns `Ok(Some(refreshed))` if the object was found, `Ok(None)` if it
    /// no longer exists. Pending changes on the cached copy are discarded.
    #[tracing::instrument(level = "debug", skip(self, cx, obj), fields(table = M::TABLE_NAME))]
    pub async fn refresh<M>(&mut self, cx: &Cx, obj: &M) -> Outcome<Option<M>, Error>
    where
        M: Model + Clone + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
    {
        let pk_values = obj.primary_key_value();
        let key = ObjectKey::from_model(obj);

        tracing::debug!(pk = ?pk_values, "Refreshing object from database");

        self.pending_dirty.retain(|k| k != &key);
        self.identity_map.remove(&key);

        self.get_by_pk::<M>(cx, &pk_values).await
    }

    // ========================================================================
    // Transaction Management
    // ========================================================================

    /// Begin a transaction.
    pub async fn begin(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.in_transaction {
            return Outcome::Ok(());
        }

        match self.connection.execute(cx, "BEGIN", &[]).await {
            Outcome::Ok(_) => {
                self.in_transaction = true;
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Flush pending changes to the database.
    ///
    /// This executes INSERT, UPDATE, and DELETE statements but does NOT commit.
    pub async fn flush(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if let Err(e) = self.event_callbacks.fire(SessionEvent::BeforeFlush) {
            return Outcome::Err(e);
        }

        // Auto-begin transaction if configured
        if self.config.auto_begin && !self.in_transaction {
            match self.begin(cx).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        // 1. Execute DELETEs first (to respect FK constraints)
        let deletes: Vec<ObjectKey> = std::mem::take(&mut self.pending_delete);
        let mut actually_deleted: Vec<ObjectKey> = Vec::new();
        for key in &deletes {
            if let Some(tracked) = self.identity_map.get(key) {
                // Skip if object was un-deleted (state changed from Deleted)
                if tracked.state != ObjectState::Deleted {
                    continue;
                }

                // Cannot safely DELETE without a WHERE clause
                if tracked.pk_columns.is_empty() || tracked.pk_values.is_empty() {
                    tracing::warn!(
                        table = tracked.table_name,
                        "Skipping DELETE for object without primary key"
                    );
                    continue;
                }

                let where_parts: Vec<String> = tracked
                    .pk_columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| format!("\"{}\" = ${}", col, i + 1))
                    .collect();

                let sql = format!(
                    "DELETE FROM \"{}\" WHERE {}",
                    tracked.table_name,
                    where_parts.join(" AND ")
                );
                let pk_values = tracked.pk_values.clone();

                match self.connection.execute(cx, &sql, &pk_values).await {
                    Outcome::Ok(_) => {
                        actually_deleted.push(*key);
                    }
                    Outcome::Err(e) => {
                        // Restore deletes that weren't already executed
                        self.pending_delete = deletes
                            .iter()
                            .filter(|k| !actually_deleted.contains(*k))
                            .copied()
                            .collect();
                        for key in &actually_deleted {
                            self.identity_map.remove(key);
                        }
                        return Outcome::Err(e);
                    }
                    Outcome::Cancelled(r) => {
                        self.pending_delete = deletes
                            .iter()
                            .filter(|k| !actually_deleted.contains(*k))
                            .copied()
                            .collect();
                        for key in &actually_deleted {
                            self.identity_map.remove(key);
                        }
                        return Outcome::Cancelled(r);
                    }
                    Outcome::Panicked(p) => {
                        self.pending_delete = deletes
                            .iter()
                            .filter(|k| !actually_deleted.contains(*k))
                            .copied()
                            .collect();
                        for key in &actually_deleted {
                            self.identity_map.remove(key);
                        }
                        return Outcome::Panicked(p);
                    }
                }
            }
        }

        for key in &actually_deleted {
            self.identity_map.remove(key);
        }

        // 2. Execute INSERTs
        let inserts: Vec<ObjectKey> = std::mem::take(&mut self.pending_new);
        for key in &inserts {
            if let Some(tracked) = self.identity_map.get_mut(key) {
                // Skip if already persistent (inserted in a previous attempt before error)
                if tracked.state == ObjectState::Persistent {
                    continue;
                }

                let columns_sql: Vec<String> = tracked
                    .column_names
                    .iter()
                    .map(|c| format!("\"{c}\""))
                    .collect();
                let placeholders: Vec<String> = (1..=tracked.column_names.len())
                    .map(|i| format!("${i}"))
                    .collect();

                let sql = format!(
                    "INSERT INTO \"{}\" ({}) VALUES ({})",
                    tracked.table_name,
                    columns_sql.join(", "),
                    placeholders.join(", ")
                );

                match self.connection.execute(cx, &sql, &tracked.values).await {
                    Outcome::Ok(_) => {
                        tracked.state = ObjectState::Persistent;
                        // Record state for future dirty checking
                        tracked.original_state =
                            Some(serde_json::to_vec(&tracked.values).unwrap_or_default());
                    }
                    Outcome::Err(e) => {
                        self.pending_new = inserts.clone();
                        return Outcome::Err(e);
                    }
                    Outcome::Cancelled(r) => {
                        self.pending_new = inserts.clone();
                        return Outcome::Cancelled(r);
                    }
                    Outcome::Panicked(p) => {
                        self.pending_new = inserts.clone();
                        return Outcome::Panicked(p);
                    }
                }
            }
        }

        // 3. Execute UPDATEs for dirty objects
        let dirty: Vec<ObjectKey> = std::mem::take(&mut self.pending_dirty);
        for key in &dirty {
            if let Some(tracked) = self.identity_map.get_mut(key) {
                if tracked.state != ObjectState::Persistent {
                    continue;
                }

                if tracked.pk_columns.is_empty() || tracked.pk_values.is_empty() {
                    tracing::warn!(
                        table = tracked.table_name,
                        "Skipping UPDATE for object without primary key"
                    );
                    continue;
                }

                // Check if actually dirty by comparing serialized state
                let current_state = serde_json::to_vec(&tracked.values).unwrap_or_default();
                if tracked.original_state.as_ref() == Some(&current_state) {
                    continue;
                }

                let mut set_parts = Vec::new();
                let mut params = Vec::new();
                let mut param_idx = 1;

                for (i, col) in tracked.column_names.iter().enumerate() {
                    // Primary key columns stay out of the SET clause
                    if !tracked.pk_columns.contains(col) {
                        set_parts.push(format!("\"{col}\" = ${param_idx}"));
                        params.push(tracked.values[i].clone());
                        param_idx += 1;
                    }
                }

                let where_parts: Vec<String> = tracked
                    .pk_columns
                    .iter()
                    .map(|col| {
                        let clause = format!("\"{col}\" = ${param_idx}");
                        param_idx += 1;
                        clause
                    })
                    .collect();

                params.extend(tracked.pk_values.clone());

                if set_parts.is_empty() {
                    continue;
                }

                let sql = format!(
                    "UPDATE \"{}\" SET {} WHERE {}",
                    tracked.table_name,
                    set_parts.join(", "),
                    where_parts.join(" AND ")
                );

                match self.connection.execute(cx, &sql, &params).await {
                    Outcome::Ok(_) => {
                        tracked.original_state = Some(current_state);
                    }
                    Outcome::Err(e) => {
                        self.pending_dirty = dirty.clone();
                        return Outcome::Err(e);
                    }
                    Outcome::Cancelled(r) => {
                        self.pending_dirty = dirty.clone();
                        return Outcome::Cancelled(r);
                    }
                    Outcome::Panicked(p) => {
                        self.pending_dirty = dirty.clone();
                        return Outcome::Panicked(p);
                    }
                }
            }
        }

        if let Err(e) = self.event_callbacks.fire(SessionEvent::AfterFlush) {
            return Outcome::Err(e);
        }

        Outcome::Ok(())
    }

    /// Commit the current transaction.
    ///
    /// Flushes pending changes, commits, and (with `expire_on_commit`) marks
    /// every persistent object expired so the next read refreshes it.
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<(), Error> {
        match self.flush(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        // Fire before_commit event (can abort)
        if let Err(e) = self.event_callbacks.fire(SessionEvent::BeforeCommit) {
            return Outcome::Err(e);
        }

        if self.in_transaction {
            match self.connection.execute(cx, "COMMIT", &[]).await {
                Outcome::Ok(_) => {
                    self.in_transaction = false;
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        if self.config.expire_on_commit {
            for tracked in self.identity_map.values_mut() {
                if tracked.state == ObjectState::Persistent {
                    tracked.state = ObjectState::Expired;
                }
            }
        }

        if let Err(e) = self.event_callbacks.fire(SessionEvent::AfterCommit) {
            return Outcome::Err(e);
        }

        Outcome::Ok(())
    }

    /// Rollback the current transaction.
    pub async fn rollback(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.in_transaction {
            match self.connection.execute(cx, "ROLLBACK", &[]).await {
                Outcome::Ok(_) => {
                    self.in_transaction = false;
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        self.pending_new.clear();
        self.pending_delete.clear();
        self.pending_dirty.clear();

        // Remove never-persisted objects; expire the rest
        let mut to_remove = Vec::new();
        for (key, tracked) in &mut self.identity_map {
            match tracked.state {
                ObjectState::New => to_remove.push(*key),
                ObjectState::Deleted | ObjectState::Persistent => {
                    tracked.state = ObjectState::Expired;
                }
                ObjectState::Detached | ObjectState::Expired => {}
            }
        }
        for key in &to_remove {
            self.identity_map.remove(key);
        }

        if let Err(e) = self.event_callbacks.fire(SessionEvent::AfterRollback) {
            return Outcome::Err(e);
        }

        Outcome::Ok(())
    }

    // ========================================================================
    // Synchronous read path (driven through the execution bridge)
    // ========================================================================

    /// Read a column attribute of a tracked object, identified by primary key.
    ///
    /// If the attribute is expired the object is refreshed in place, which
    /// requires a `SyncDriver` on the current thread; without one this fails
    /// with the unavailable-context error. An attribute name that matches no
    /// column fails with an attribute-lookup error, which is how a
    /// misconfigured awaitable declaration surfaces at its first await.
    #[allow(clippy::result_large_err)]
    pub fn attribute<M, T>(&mut self, cx: &Cx, pk: &[Value], name: &'static str) -> Result<T>
    where
        M: Model + Clone + Send + Sync + Serialize + 'static,
        T: FromValue,
    {
        let key = ObjectKey::from_pk::<M>(pk);

        let Some(tracked) = self.identity_map.get(&key) else {
            return Err(Error::Session(SessionError::not_tracked(M::TABLE_NAME)));
        };

        if !tracked.column_names.contains(&name) {
            return Err(Error::Session(SessionError::unknown_attribute(name)));
        }

        if tracked.is_attribute_expired(name) {
            if !SyncDriver::is_active() {
                return Err(Error::unavailable_context(name));
            }
            tracing::debug!(table = M::TABLE_NAME, attribute = name, "refreshing expired attribute");
            self.refresh_in_place::<M>(cx, key, pk)?;
        }

        let tracked = self
            .identity_map
            .get(&key)
            .ok_or_else(|| Error::Session(SessionError::not_tracked(M::TABLE_NAME)))?;
        let index = tracked
            .column_names
            .iter()
            .position(|col| *col == name)
            .ok_or_else(|| Error::Session(SessionError::unknown_attribute(name)))?;

        T::from_value(&tracked.values[index])
    }

    /// Load the objects behind a relationship of a tracked object.
    ///
    /// Always queries the database, so it requires a `SyncDriver` on the
    /// current thread. Loaded targets are registered in the identity map.
    #[allow(clippy::result_large_err)]
    pub fn related<M, R>(&mut self, cx: &Cx, pk: &[Value], name: &'static str) -> Result<R>
    where
        M: Model + Clone + Send + Sync + Serialize + 'static,
        R: FromRelated,
    {
        let Some(rel) = find_relationship::<M>(name) else {
            return Err(Error::Session(SessionError::unknown_attribute(name)));
        };

        if !SyncDriver::is_active() {
            return Err(Error::unavailable_context(name));
        }

        let key = ObjectKey::from_pk::<M>(pk);
        let Some(tracked) = self.identity_map.get(&key) else {
            return Err(Error::Session(SessionError::not_tracked(M::TABLE_NAME)));
        };

        // A stale FK would resolve the wrong target; refresh first.
        if tracked.state == ObjectState::Expired {
            self.refresh_in_place::<M>(cx, key, pk)?;
        }

        let target_table = <R::Target as Model>::TABLE_NAME;
        let rows = match rel.kind {
            RelationshipKind::ManyToOne => {
                let local_key = rel.local_key.ok_or_else(|| {
                    Error::Custom(format!("relationship '{name}' has no local key"))
                })?;
                let tracked = self
                    .identity_map
                    .get(&key)
                    .ok_or_else(|| Error::Session(SessionError::not_tracked(M::TABLE_NAME)))?;
                let index = tracked
                    .column_names
                    .iter()
                    .position(|col| *col == local_key)
                    .ok_or_else(|| Error::Session(SessionError::unknown_attribute(local_key)))?;
                let fk_value = tracked.values[index].clone();

                if fk_value.is_null() {
                    return Ok(R::from_objects(Vec::new()));
                }

                let target_pk = <R::Target as Model>::PRIMARY_KEY.first().unwrap_or(&"id");
                let sql = format!(
                    "SELECT * FROM \"{target_table}\" WHERE \"{target_pk}\" = $1 LIMIT 1"
                );
                outcome_to_result(SyncDriver::drive(
                    self.connection.query(cx, &sql, &[fk_value]),
                )?)?
            }
            RelationshipKind::OneToMany => {
                let remote_key = rel.remote_key.ok_or_else(|| {
                    Error::Custom(format!("relationship '{name}' has no remote key"))
                })?;
                let pk_value = pk
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::Custom("relationship owner has no primary key".into()))?;

                let sql =
                    format!("SELECT * FROM \"{target_table}\" WHERE \"{remote_key}\" = $1");
                outcome_to_result(SyncDriver::drive(
                    self.connection.query(cx, &sql, &[pk_value]),
                )?)?
            }
        };

        let targets = R::targets_from_rows(&rows)?;
        for target in &targets {
            self.track_loaded(target);
        }

        Ok(R::from_objects(targets))
    }

    /// Reload a tracked object from the database on the current thread,
    /// driving the query through the installed `SyncDriver`.
    #[allow(clippy::result_large_err)]
    fn refresh_in_place<M>(&mut self, cx: &Cx, key: ObjectKey, pk: &[Value]) -> Result<()>
    where
        M: Model + Clone + Send + Sync + Serialize + 'static,
    {
        let sql = select_by_pk_sql::<M>(pk.len())?;
        let rows = outcome_to_result(SyncDriver::drive(self.connection.query(cx, &sql, pk))?)?;

        let Some(row) = rows.first() else {
            self.identity_map.remove(&key);
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::NotFound,
                sql: Some(sql),
                message: format!("row in \"{}\" no longer exists", M::TABLE_NAME),
                source: None,
            }));
        };

        let obj = M::from_row(row)?;
        self.track_loaded(&obj);
        Ok(())
    }

    /// Register a freshly loaded object as persistent in the identity map.
    fn track_loaded<M: Model + Clone + Send + Sync + Serialize + 'static>(&mut self, obj: &M) {
        let key = ObjectKey::from_model(obj);

        let row_data = obj.to_row();
        let column_names: Vec<&'static str> = row_data.iter().map(|(name, _)| *name).collect();
        let values: Vec<Value> = row_data.into_iter().map(|(_, v)| v).collect();
        let serialized = serde_json::to_vec(&values).ok();

        let tracked = TrackedObject {
            object: Box::new(obj.clone()),
            original_state: serialized,
            state: ObjectState::Persistent,
            table_name: M::TABLE_NAME,
            column_names,
            values,
            pk_columns: M::PRIMARY_KEY.to_vec(),
            pk_values: obj.primary_key_value(),
            expired_attributes: None,
        };

        self.identity_map.insert(key, tracked);
    }
}

/// Build the SELECT-by-primary-key statement for `M`.
#[allow(clippy::result_large_err)]
fn select_by_pk_sql<M: Model>(pk_len: usize) -> Result<String> {
    let pk_columns = M::PRIMARY_KEY;
    if pk_columns.len() != pk_len {
        return Err(Error::Custom(format!(
            "Primary key mismatch: expected {} values, got {}",
            pk_columns.len(),
            pk_len
        )));
    }

    let where_parts: Vec<String> = pk_columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("\"{}\" = ${}", col, i + 1))
        .collect();

    Ok(format!(
        "SELECT * FROM \"{}\" WHERE {} LIMIT 1",
        M::TABLE_NAME,
        where_parts.join(" AND ")
    ))
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::manual_async_fn)] // Mock trait impls must match trait signatures
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use async_sqlmodel_core::{FieldInfo, Row, SessionErrorKind, SqlType};
    use std::future::Future;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert!(config.auto_begin);
        assert!(!config.auto_flush);
        assert!(config.expire_on_commit);
    }

    #[test]
    fn test_object_key_hash_consistency() {
        let values1 = vec![Value::BigInt(42)];
        let values2 = vec![Value::BigInt(42)];
        assert_eq!(hash_values(&values1), hash_values(&values2));
    }

    #[test]
    fn test_object_key_hash_different_values() {
        let values1 = vec![Value::BigInt(42)];
        let values2 = vec![Value::BigInt(43)];
        assert_ne!(hash_values(&values1), hash_values(&values2));
    }

    #[test]
    fn test_object_key_hash_different_types() {
        let values1 = vec![Value::BigInt(42)];
        let values2 = vec![Value::Text("42".to_string())];
        assert_ne!(hash_values(&values1), hash_values(&values2));
    }

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Team {
        id: Option<i64>,
        name: String,
    }

    impl Model for Team {
        const TABLE_NAME: &'static str = "teams";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        const RELATIONSHIPS: &'static [async_sqlmodel_core::RelationshipInfo] =
            &[async_sqlmodel_core::RelationshipInfo::new(
                "heroes",
                "heroes",
                RelationshipKind::OneToMany,
            )
            .remote_key("team_id")];

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] = &[
                FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                FieldInfo::new("name", "name", SqlType::Text),
            ];
            FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", self.id.map_or(Value::Null, Value::BigInt)),
                ("name", Value::Text(self.name.clone())),
            ]
        }

        fn from_row(row: &Row) -> Result<Self> {
            let id: i64 = row.get_named("id")?;
            let name: String = row.get_named("name")?;
            Ok(Self { id: Some(id), name })
        }

        fn primary_key_value(&self) -> Vec<Value> {
            self.id
                .map_or_else(|| vec![Value::Null], |id| vec![Value::BigInt(id)])
        }

        fn is_new(&self) -> bool {
            self.id.is_none()
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Hero {
        id: Option<i64>,
        name: String,
        team_id: Option<i64>,
    }

    impl Model for Hero {
        const TABLE_NAME: &'static str = "heroes";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        const RELATIONSHIPS: &'static [async_sqlmodel_core::RelationshipInfo] =
            &[async_sqlmodel_core::RelationshipInfo::new(
                "team",
                "teams",
                RelationshipKind::ManyToOne,
            )
            .local_key("team_id")];

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] = &[
                FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                FieldInfo::new("name", "name", SqlType::Text),
                FieldInfo::new("team_id", "team_id", SqlType::BigInt).nullable(true),
            ];
            FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", self.id.map_or(Value::Null, Value::BigInt)),
                ("name", Value::Text(self.name.clone())),
                ("team_id", self.team_id.map_or(Value::Null, Value::BigInt)),
            ]
        }

        fn from_row(row: &Row) -> Result<Self> {
            let id: i64 = row.get_named("id")?;
            let name: String = row.get_named("name")?;
            let team_id: Option<i64> = row.get_named("team_id")?;
            Ok(Self {
                id: Some(id),
                name,
                team_id,
            })
        }

        fn primary_key_value(&self) -> Vec<Value> {
            self.id
                .map_or_else(|| vec![Value::Null], |id| vec![Value::BigInt(id)])
        }

        fn is_new(&self) -> bool {
            self.id.is_none()
        }
    }

    #[derive(Debug, Default)]
    struct MockState {
        query_log: Vec<String>,
        executed: Vec<(String, Vec<Value>)>,
    }

    #[derive(Debug, Clone)]
    struct MockConnection {
        state: Arc<Mutex<MockState>>,
    }

    impl MockConnection {
        fn new(state: Arc<Mutex<MockState>>) -> Self {
            Self { state }
        }

        fn hero_row(id: i64, name: &str, team_id: Option<i64>) -> Row {
            Row::new(
                vec!["id".into(), "name".into(), "team_id".into()],
                vec![
                    Value::BigInt(id),
                    Value::Text(name.into()),
                    team_id.map_or(Value::Null, Value::BigInt),
                ],
            )
        }

        fn team_row(id: i64, name: &str) -> Row {
            Row::new(
                vec!["id".into(), "name".into()],
                vec![Value::BigInt(id), Value::Text(name.into())],
            )
        }
    }

    impl Connection for MockConnection {
        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            let state = Arc::clone(&self.state);
            let sql = sql.to_string();
            let params = params.to_vec();
            async move {
                state
                    .lock()
                    .expect("lock poisoned")
                    .query_log
                    .push(sql.clone());

                let mut rows = Vec::new();
                if sql.contains("\"teams\"") {
                    if let Some(Value::BigInt(7)) = params.first() {
                        rows.push(Self::team_row(7, "Preventers"));
                    }
                } else if sql.contains("\"heroes\"") {
                    if sql.contains("\"team_id\" =") {
                        // One-to-many child rows keyed by team_id.
                        if let Some(Value::BigInt(7)) = params.first() {
                            rows.push(Self::hero_row(101, "Rusty-Man", Some(7)));
                            rows.push(Self::hero_row(102, "Spider-Boy", Some(7)));
                        }
                    } else if let Some(Value::BigInt(1)) = params.first() {
                        rows.push(Self::hero_row(1, "Deadpond", Some(7)));
                    }
                }

                Outcome::Ok(rows)
            }
        }

        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            let state = Arc::clone(&self.state);
            let sql = sql.to_string();
            let params = params.to_vec();
            async move {
                state
                    .lock()
                    .expect("lock poisoned")
                    .executed
                    .push((sql, params));
                Outcome::Ok(1)
            }
        }
    }

    fn test_session() -> (Session<MockConnection>, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let conn = MockConnection::new(Arc::clone(&state));
        (Session::new(conn), state)
    }

    fn deadpond() -> Hero {
        Hero {
            id: Some(1),
            name: "Deadpond".to_string(),
            team_id: Some(7),
        }
    }

    #[test]
    fn test_add_then_flush_inserts() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, state) = test_session();

        let hero = deadpond();
        session.add(&hero);
        assert!(session.contains(&hero));
        assert!(session.is_modified(&hero));

        rt.block_on(async {
            unwrap_outcome(session.flush(&cx).await);
        });

        let executed = &state.lock().expect("lock poisoned").executed;
        assert_eq!(executed[0].0, "BEGIN");
        assert_eq!(
            executed[1].0,
            "INSERT INTO \"heroes\" (\"id\", \"name\", \"team_id\") VALUES ($1, $2, $3)"
        );
        assert_eq!(executed[1].1[1], Value::Text("Deadpond".into()));
        assert!(!session.is_modified(&hero));
    }

    #[test]
    fn test_commit_expires_persistent_objects() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, state) = test_session();

        let hero = deadpond();
        session.add(&hero);
        rt.block_on(async {
            unwrap_outcome(session.commit(&cx).await);
        });

        assert!(session.is_expired(&hero));
        // All attributes expired, not a partial set
        assert_eq!(session.expired_attributes(&hero), Some(None));

        let executed = &state.lock().expect("lock poisoned").executed;
        assert!(executed.iter().any(|(sql, _)| sql == "COMMIT"));
    }

    #[test]
    fn test_delete_persistent_flushes_delete() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, state) = test_session();

        let hero = deadpond();
        session.add(&hero);
        rt.block_on(async {
            unwrap_outcome(session.flush(&cx).await);
            session.delete(&hero);
            unwrap_outcome(session.flush(&cx).await);
        });

        let executed = &state.lock().expect("lock poisoned").executed;
        assert!(
            executed
                .iter()
                .any(|(sql, _)| sql == "DELETE FROM \"heroes\" WHERE \"id\" = $1")
        );
        assert!(!session.contains(&hero));
    }

    #[test]
    fn test_delete_new_object_is_dropped_without_sql() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, state) = test_session();

        let hero = deadpond();
        session.add(&hero);
        session.delete(&hero);
        assert!(!session.contains(&hero));

        rt.block_on(async {
            unwrap_outcome(session.flush(&cx).await);
        });
        let executed = &state.lock().expect("lock poisoned").executed;
        assert!(!executed.iter().any(|(sql, _)| sql.starts_with("DELETE")));
        assert!(!executed.iter().any(|(sql, _)| sql.starts_with("INSERT")));
    }

    #[test]
    fn test_mark_dirty_updates_on_flush() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, state) = test_session();

        let mut hero = deadpond();
        session.add(&hero);
        rt.block_on(async {
            unwrap_outcome(session.flush(&cx).await);
        });

        hero.name = "Deadpuddle".to_string();
        session.mark_dirty(&hero);
        rt.block_on(async {
            unwrap_outcome(session.flush(&cx).await);
        });

        let executed = &state.lock().expect("lock poisoned").executed;
        let update = executed
            .iter()
            .find(|(sql, _)| sql.starts_with("UPDATE"))
            .expect("update statement");
        assert_eq!(
            update.0,
            "UPDATE \"heroes\" SET \"name\" = $1, \"team_id\" = $2 WHERE \"id\" = $3"
        );
        assert_eq!(update.1[0], Value::Text("Deadpuddle".into()));
    }

    #[test]
    fn test_rollback_discards_new_objects() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, _state) = test_session();

        let hero = deadpond();
        session.add(&hero);
        rt.block_on(async {
            unwrap_outcome(session.rollback(&cx).await);
        });
        assert!(!session.contains(&hero));
    }

    #[test]
    fn test_before_commit_error_aborts_commit() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, state) = test_session();

        session.on_before_commit(|| Err(Error::Custom("vetoed".to_string())));
        session.add(&deadpond());

        rt.block_on(async {
            let outcome = session.commit(&cx).await;
            assert!(matches!(outcome, Outcome::Err(Error::Custom(_))));
        });

        let executed = &state.lock().expect("lock poisoned").executed;
        assert!(!executed.iter().any(|(sql, _)| sql == "COMMIT"));
    }

    #[test]
    fn test_expunge_detaches_object() {
        let (mut session, _state) = test_session();
        let hero = deadpond();
        session.add(&hero);
        session.expunge(&hero);
        assert!(session.contains(&hero));
        assert!(!session.is_modified(&hero));
    }

    // ------------------------------------------------------------------
    // Synchronous read path
    // ------------------------------------------------------------------

    #[test]
    fn test_attribute_reads_tracked_value_without_driver() {
        let cx = Cx::for_testing();
        let (mut session, _state) = test_session();

        session.add(&deadpond());
        let name: String = session
            .attribute::<Hero, String>(&cx, &[Value::BigInt(1)], "name")
            .expect("attribute read");
        assert_eq!(name, "Deadpond");
    }

    #[test]
    fn test_unknown_attribute_fails_at_lookup() {
        let cx = Cx::for_testing();
        let (mut session, _state) = test_session();

        session.add(&deadpond());
        let err = session
            .attribute::<Hero, String>(&cx, &[Value::BigInt(1)], "shoe_size")
            .expect_err("unknown attribute");
        match err {
            Error::Session(e) => assert_eq!(e.kind, SessionErrorKind::UnknownAttribute),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_untracked_object_fails_at_lookup() {
        let cx = Cx::for_testing();
        let (mut session, _state) = test_session();

        let err = session
            .attribute::<Hero, String>(&cx, &[Value::BigInt(999)], "name")
            .expect_err("not tracked");
        match err {
            Error::Session(e) => assert_eq!(e.kind, SessionErrorKind::NotTracked),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_expired_attribute_without_driver_is_unavailable_context() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, _state) = test_session();

        let hero = deadpond();
        session.add(&hero);
        rt.block_on(async {
            unwrap_outcome(session.commit(&cx).await);
        });

        let err = session
            .attribute::<Hero, String>(&cx, &[Value::BigInt(1)], "name")
            .expect_err("no driver installed");
        assert!(err.is_unavailable_context());
    }

    #[test]
    fn test_partial_expire_keeps_fully_expired_object_expired() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, _state) = test_session();

        let hero = deadpond();
        session.add(&hero);
        rt.block_on(async {
            unwrap_outcome(session.commit(&cx).await);
        });
        assert_eq!(session.expired_attributes(&hero), Some(None));

        session.expire(&hero, Some(&["name"]));

        // Still fully expired; naming a subset must not revive the rest.
        assert_eq!(session.expired_attributes(&hero), Some(None));
        let err = session
            .attribute::<Hero, Option<i64>>(&cx, &[Value::BigInt(1)], "team_id")
            .expect_err("no driver installed");
        assert!(err.is_unavailable_context());
    }

    #[test]
    fn test_expired_attribute_refreshes_through_driver() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, state) = test_session();

        let hero = deadpond();
        session.add(&hero);
        rt.block_on(async {
            unwrap_outcome(session.commit(&cx).await);
        });
        assert!(session.is_expired(&hero));

        let driver = RuntimeBuilder::current_thread()
            .build()
            .expect("create driver runtime");
        let name: String = SyncDriver::enter(driver, || {
            session.attribute::<Hero, String>(&cx, &[Value::BigInt(1)], "name")
        })
        .expect("refresh through driver");
        assert_eq!(name, "Deadpond");
        assert!(!session.is_expired(&hero));

        let queries = &state.lock().expect("lock poisoned").query_log;
        assert_eq!(
            queries.last().map(String::as_str),
            Some("SELECT * FROM \"heroes\" WHERE \"id\" = $1 LIMIT 1")
        );
    }

    #[test]
    fn test_related_many_to_one_loads_target() {
        let cx = Cx::for_testing();
        let (mut session, _state) = test_session();

        session.add(&deadpond());
        let driver = RuntimeBuilder::current_thread()
            .build()
            .expect("create driver runtime");
        let team: Option<Team> = SyncDriver::enter(driver, || {
            session.related::<Hero, Option<Team>>(&cx, &[Value::BigInt(1)], "team")
        })
        .expect("load relationship");
        let team = team.expect("team loaded");
        assert_eq!(team.name, "Preventers");

        // Loaded target is now tracked
        assert!(session.contains(&team));
    }

    #[test]
    fn test_related_null_fk_is_none_without_query() {
        let cx = Cx::for_testing();
        let (mut session, state) = test_session();

        let hero = Hero {
            id: Some(1),
            name: "Loner".to_string(),
            team_id: None,
        };
        session.add(&hero);
        let driver = RuntimeBuilder::current_thread()
            .build()
            .expect("create driver runtime");
        let team: Option<Team> = SyncDriver::enter(driver, || {
            session.related::<Hero, Option<Team>>(&cx, &[Value::BigInt(1)], "team")
        })
        .expect("load relationship");
        assert!(team.is_none());
        assert!(state.lock().expect("lock poisoned").query_log.is_empty());
    }

    #[test]
    fn test_related_one_to_many_loads_children() {
        let cx = Cx::for_testing();
        let (mut session, _state) = test_session();

        let team = Team {
            id: Some(7),
            name: "Preventers".to_string(),
        };
        session.add(&team);
        let driver = RuntimeBuilder::current_thread()
            .build()
            .expect("create driver runtime");
        let heroes: Vec<Hero> = SyncDriver::enter(driver, || {
            session.related::<Team, Vec<Hero>>(&cx, &[Value::BigInt(7)], "heroes")
        })
        .expect("load relationship");
        assert_eq!(heroes.len(), 2);
        assert_eq!(heroes[0].name, "Rusty-Man");
        assert_eq!(heroes[1].name, "Spider-Boy");
    }

    #[test]
    fn test_related_without_driver_is_unavailable_context() {
        let cx = Cx::for_testing();
        let (mut session, _state) = test_session();

        session.add(&deadpond());
        let err = session
            .related::<Hero, Option<Team>>(&cx, &[Value::BigInt(1)], "team")
            .expect_err("no driver installed");
        assert!(err.is_unavailable_context());
    }

    #[test]
    fn test_related_unknown_relationship_fails_at_lookup() {
        let cx = Cx::for_testing();
        let (mut session, _state) = test_session();

        session.add(&deadpond());
        let err = session
            .related::<Hero, Option<Team>>(&cx, &[Value::BigInt(1)], "squad")
            .expect_err("unknown relationship");
        match err {
            Error::Session(e) => assert_eq!(e.kind, SessionErrorKind::UnknownAttribute),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_get_by_pk_returns_cached_instance() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (mut session, state) = test_session();

        let hero = deadpond();
        session.add(&hero);
        rt.block_on(async {
            let cached: Option<Hero> =
                unwrap_outcome(session.get(&cx, Value::BigInt(1)).await);
            assert_eq!(cached, Some(hero));
        });
        assert!(state.lock().expect("lock poisoned").query_log.is_empty());
    }
}
