//! The execution bridge.
//!
//! Awaitable accessors hand a synchronous attribute read to a bridge, which
//! runs it on a worker able to drive connection futures to completion, and
//! surface the result through a `BridgeFuture`. The bridge is an injected
//! capability (`ExecutionBridge`), so the read path is testable without the
//! default worker.
//!
//! The worker installs a thread-local `SyncDriver`: the session's
//! synchronous read path asks it to drive a query future when an expired
//! attribute needs a database round trip. Off the worker there is no driver
//! and such reads fail with the unavailable-context error.

use crate::Result;
use crate::error::{Error, SessionError};
use asupersync::runtime::{Runtime, RuntimeBuilder};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};
use std::thread;

/// A dispatched unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs synchronous jobs on a worker that can drive futures.
///
/// Implementations must run (or drop) every dispatched job; dropping a job
/// without running it resolves its future with a bridge-closed error.
pub trait ExecutionBridge: Send + Sync {
    /// Hand a job to the worker. Must not block on the job's completion.
    fn dispatch(&self, job: Job);
}

struct SlotState<T> {
    result: Option<Result<T>>,
    waker: Option<Waker>,
}

struct Shared<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                result: None,
                waker: None,
            }),
        }
    }

    fn fulfill(&self, result: Result<T>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.result.is_none() {
            state.result = Some(result);
        }
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }
}

/// Completion future for a dispatched read. Resolves exactly once.
///
/// Dropping the future abandons the result; the dispatched job is not
/// interrupted (cancellation is pass-through).
pub struct BridgeFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Future for BridgeFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(result) = state.result.take() {
            Poll::Ready(result)
        } else {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Resolves the future with a bridge-closed error if the job is dropped
/// without running (worker gone, queue closed).
struct JobGuard<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> JobGuard<T> {
    fn complete(&mut self, result: Result<T>) {
        if let Some(shared) = self.shared.take() {
            shared.fulfill(result);
        }
    }
}

impl<T> Drop for JobGuard<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.fulfill(Err(Error::Session(SessionError::bridge_closed())));
        }
    }
}

/// Run a synchronous, fallible read on the bridge and get its result back
/// as a future.
///
/// Errors from the read propagate through the future unchanged; a read
/// that panics resolves the future with an error instead of killing the
/// worker.
pub fn run_sync<T, F>(bridge: &dyn ExecutionBridge, f: F) -> BridgeFuture<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let shared = Arc::new(Shared::new());
    let mut guard = JobGuard {
        shared: Some(Arc::clone(&shared)),
    };
    bridge.dispatch(Box::new(move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
            .unwrap_or_else(|_| Err(Error::Custom("dispatched read panicked".to_string())));
        guard.complete(result);
    }));
    BridgeFuture { shared }
}

thread_local! {
    static DRIVER: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Thread-local capability to drive a future to completion synchronously.
///
/// Installed by `WorkerBridge` for the lifetime of its worker thread.
pub struct SyncDriver;

impl SyncDriver {
    /// Is a driver installed on the current thread?
    pub fn is_active() -> bool {
        DRIVER.with(|d| d.borrow().is_some())
    }

    /// Install `runtime` as the current thread's driver for the duration
    /// of `f`.
    pub fn enter<R>(runtime: Runtime, f: impl FnOnce() -> R) -> R {
        DRIVER.with(|d| *d.borrow_mut() = Some(runtime));
        let result = f();
        DRIVER.with(|d| d.borrow_mut().take());
        result
    }

    /// Drive `future` to completion on the current thread's driver.
    ///
    /// Fails with the unavailable-context error when no driver is
    /// installed. Must not be called reentrantly from a driven future.
    pub fn drive<F: Future>(future: F) -> Result<F::Output> {
        DRIVER.with(|d| {
            let driver = d.borrow();
            match driver.as_ref() {
                Some(runtime) => Ok(runtime.block_on(future)),
                None => Err(Error::Session(SessionError::no_driver())),
            }
        })
    }
}

/// Default `ExecutionBridge`: a dedicated worker thread owning a
/// current-thread runtime, fed through an mpsc queue. Dropping the bridge
/// closes the queue and joins the worker.
pub struct WorkerBridge {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl WorkerBridge {
    /// Spawn the worker and wait until its runtime is up.
    pub fn new() -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        let worker = thread::Builder::new()
            .name("awaitable-bridge".to_string())
            .spawn(move || {
                let runtime = match RuntimeBuilder::current_thread().build() {
                    Ok(runtime) => {
                        let _ = ready_tx.send(Ok(()));
                        runtime
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{e:?}")));
                        return;
                    }
                };
                SyncDriver::enter(runtime, || {
                    while let Ok(job) = job_rx.recv() {
                        job();
                    }
                });
                tracing::debug!("bridge worker shutting down");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => {
                return Err(Error::Custom(format!("bridge runtime failed: {msg}")));
            }
            Err(_) => return Err(Error::Session(SessionError::bridge_closed())),
        }

        tracing::debug!("bridge worker started");
        Ok(Self {
            sender: Mutex::new(Some(job_tx)),
            worker: Some(worker),
        })
    }
}

impl ExecutionBridge for WorkerBridge {
    fn dispatch(&self, job: Job) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = sender.as_ref() {
            // A failed send drops the job, which resolves its future as
            // bridge-closed.
            let _ = tx.send(job);
        }
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionErrorKind;

    fn block_on<F: Future>(future: F) -> F::Output {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(future)
    }

    #[test]
    fn run_sync_resolves_with_closure_result() {
        let bridge = WorkerBridge::new().expect("spawn bridge");
        let future = run_sync(&bridge, || Ok(41 + 1));
        assert_eq!(block_on(future).unwrap(), 42);
    }

    #[test]
    fn run_sync_propagates_errors_unchanged() {
        let bridge = WorkerBridge::new().expect("spawn bridge");
        let future = run_sync::<i64, _>(&bridge, || {
            Err(Error::Custom("boom".to_string()))
        });
        match block_on(future) {
            Err(Error::Custom(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn driver_is_active_only_on_worker() {
        assert!(!SyncDriver::is_active());
        let bridge = WorkerBridge::new().expect("spawn bridge");
        let future = run_sync(&bridge, || Ok(SyncDriver::is_active()));
        assert!(block_on(future).unwrap());
        assert!(!SyncDriver::is_active());
    }

    #[test]
    fn driver_can_drive_futures_on_worker() {
        let bridge = WorkerBridge::new().expect("spawn bridge");
        let future = run_sync(&bridge, || SyncDriver::drive(async { 7 }));
        assert_eq!(block_on(future).unwrap(), 7);
    }

    #[test]
    fn drive_off_worker_is_unavailable_context() {
        match SyncDriver::drive(async {}) {
            Err(Error::Session(e)) => {
                assert_eq!(e.kind, SessionErrorKind::UnavailableContext);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    /// Bridge that drops every job: dispatch succeeds, the read never runs.
    struct ClosedBridge;

    impl ExecutionBridge for ClosedBridge {
        fn dispatch(&self, job: Job) {
            drop(job);
        }
    }

    #[test]
    fn dropped_job_resolves_as_bridge_closed() {
        let future = run_sync::<i64, _>(&ClosedBridge, || Ok(1));
        match block_on(future) {
            Err(Error::Session(e)) => assert_eq!(e.kind, SessionErrorKind::BridgeClosed),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn panicking_read_resolves_as_error() {
        let bridge = WorkerBridge::new().expect("spawn bridge");
        let future = run_sync::<i64, _>(&bridge, || panic!("bad read"));
        assert!(block_on(future).is_err());

        // Worker survives the panic and keeps serving jobs.
        let future = run_sync(&bridge, || Ok(5));
        assert_eq!(block_on(future).unwrap(), 5);
    }
}
