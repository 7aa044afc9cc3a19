//! Async facade over [`Session`] for awaitable accessors.
//!
//! `AsyncSession` wraps a session in `Arc<Mutex<..>>` and pairs it with an
//! [`ExecutionBridge`]. It implements [`AwaitableRead`], so the accessor
//! methods generated by `#[async_model]` can hand it a primary key and a
//! target name and get back a future: the blocking read runs on the bridge's
//! worker, where a `SyncDriver` is installed, and the caller only awaits.

use crate::Session;
use asupersync::Cx;
use async_sqlmodel_core::bridge::{BridgeFuture, ExecutionBridge, WorkerBridge, run_sync};
use async_sqlmodel_core::{
    AwaitableRead, Connection, Error, FromRelated, FromValue, Model, Result, SessionError, Value,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// A session handle usable from async code.
///
/// Cloning is cheap; all clones share the same session and bridge.
pub struct AsyncSession<C: Connection> {
    inner: Arc<Mutex<Session<C>>>,
    bridge: Arc<dyn ExecutionBridge>,
}

impl<C: Connection> Clone for AsyncSession<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            bridge: Arc::clone(&self.bridge),
        }
    }
}

impl<C: Connection> std::fmt::Debug for AsyncSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSession").finish_non_exhaustive()
    }
}

impl<C: Connection> AsyncSession<C> {
    /// Wrap `session` with an explicit bridge.
    pub fn new(session: Session<C>, bridge: Arc<dyn ExecutionBridge>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
            bridge,
        }
    }

    /// Wrap `session` with a freshly spawned [`WorkerBridge`].
    #[allow(clippy::result_large_err)]
    pub fn with_worker(session: Session<C>) -> Result<Self> {
        let bridge = WorkerBridge::new()?;
        Ok(Self::new(session, Arc::new(bridge)))
    }

    /// Run `f` against the wrapped session.
    #[allow(clippy::result_large_err)]
    pub fn with<R>(&self, f: impl FnOnce(&mut Session<C>) -> R) -> Result<R> {
        let mut session = self
            .inner
            .lock()
            .map_err(|_| Error::Session(SessionError::lock_poisoned()))?;
        Ok(f(&mut session))
    }
}

impl<C, M> AwaitableRead<M> for AsyncSession<C>
where
    C: Connection + 'static,
    M: Model + Clone + Send + Sync + Serialize + 'static,
{
    fn read_attribute<T>(&self, cx: &Cx, pk: Vec<Value>, attribute: &'static str) -> BridgeFuture<T>
    where
        T: FromValue + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let cx = cx.clone();
        run_sync(self.bridge.as_ref(), move || {
            let mut session = inner
                .lock()
                .map_err(|_| Error::Session(SessionError::lock_poisoned()))?;
            session.attribute::<M, T>(&cx, &pk, attribute)
        })
    }

    fn read_related<R>(&self, cx: &Cx, pk: Vec<Value>, relationship: &'static str) -> BridgeFuture<R>
    where
        R: FromRelated + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let cx = cx.clone();
        run_sync(self.bridge.as_ref(), move || {
            let mut session = inner
                .lock()
                .map_err(|_| Error::Session(SessionError::lock_poisoned()))?;
            session.related::<M, R>(&cx, &pk, relationship)
        })
    }
}
