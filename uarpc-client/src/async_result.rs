//! Single-assignment completion of asynchronous operations.
//!
//! An [`AsyncResult`] holds at most one of result or error; the first
//! writer wins and later writes are no-ops. Waiters block with a timeout,
//! listeners are delivered exactly once, and completion can be chained
//! between results. Listener delivery goes through an explicit [`Spawner`]
//! rather than an ambient executor: the component that completes results
//! is handed the execution context it should use.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uarpc_wire::StatusCode;

/// The failure outcome of an asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFault {
    pub status: StatusCode,
    pub message: String,
}

impl ServiceFault {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Fault for an elapsed deadline.
    pub fn timeout(elapsed: Duration) -> Self {
        Self::new(
            StatusCode::BAD_TIMEOUT,
            format!("no completion within {:?}", elapsed),
        )
    }
}

impl fmt::Display for ServiceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

/// Terminal outcome of an operation.
pub type Completion<T> = Result<T, ServiceFault>;

/// Execution context for listener delivery.
pub trait Spawner: Send + Sync {
    fn spawn(&self, task: Box<dyn FnOnce() + Send>);
}

/// Delivers listeners on the tokio runtime behind the given handle.
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime of the calling context.
    ///
    /// Panics outside a tokio runtime, like `Handle::current`.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Spawner for TokioSpawner {
    fn spawn(&self, task: Box<dyn FnOnce() + Send>) {
        self.handle.spawn(async move { task() });
    }
}

/// Runs listeners directly on the completing thread.
///
/// This is the explicit synchronous variant: the thread calling
/// `set_result`/`set_error` delivers the callback, and anything the
/// listener panics with surfaces to that caller.
pub struct InlineSpawner;

impl Spawner for InlineSpawner {
    fn spawn(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

type Listener<T> = Box<dyn FnOnce(Completion<T>) + Send>;

enum State<T> {
    Waiting { listeners: Vec<Listener<T>> },
    Done(Completion<T>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Condvar,
    spawner: Arc<dyn Spawner>,
}

/// A single-assignment future.
///
/// Exactly one terminal state ever wins. Clones share the same completion.
pub struct AsyncResult<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock() {
            State::Waiting { listeners } => format!("waiting ({} listeners)", listeners.len()),
            State::Done(Ok(_)) => "succeeded".to_string(),
            State::Done(Err(fault)) => format!("failed ({})", fault.status),
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}

impl<T: Clone + Send + 'static> AsyncResult<T> {
    pub fn new(spawner: Arc<dyn Spawner>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Waiting {
                    listeners: Vec::new(),
                }),
                done: Condvar::new(),
                spawner,
            }),
        }
    }

    /// Completes with a result. Returns false if already terminal.
    pub fn set_result(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Completes with an error. Returns false if already terminal.
    pub fn set_error(&self, fault: ServiceFault) -> bool {
        self.complete(Err(fault))
    }

    fn complete(&self, completion: Completion<T>) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                // First writer wins; not an error to lose the race.
                State::Done(_) => return false,
                State::Waiting { listeners } => {
                    let listeners = std::mem::take(listeners);
                    *state = State::Done(completion.clone());
                    listeners
                }
            }
        };
        self.inner.done.notify_all();
        for listener in listeners {
            let completion = completion.clone();
            self.inner
                .spawner
                .spawn(Box::new(move || listener(completion)));
        }
        true
    }

    /// Returns whether a terminal state has been reached.
    pub fn is_done(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Done(_))
    }

    /// Returns the completion if terminal, without blocking.
    pub fn peek(&self) -> Option<Completion<T>> {
        match &*self.inner.state.lock() {
            State::Done(completion) => Some(completion.clone()),
            State::Waiting { .. } => None,
        }
    }

    /// Blocks the calling thread until terminal or the timeout elapses.
    ///
    /// Expiry yields a distinct timeout fault; it does not complete the
    /// result itself, and a late completion is still observed by other
    /// waiters and listeners.
    pub fn wait_for_result(&self, timeout: Duration) -> Completion<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let State::Done(completion) = &*state {
                return completion.clone();
            }
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                if let State::Done(completion) = &*state {
                    return completion.clone();
                }
                return Err(ServiceFault::timeout(timeout));
            }
        }
    }

    /// Attaches a completion listener.
    ///
    /// Attached after completion, the listener runs immediately and
    /// synchronously on the calling thread with the already-known outcome.
    /// Attached before, it runs exactly once on the spawner when
    /// completion happens.
    pub fn on_completion(&self, listener: impl FnOnce(Completion<T>) + Send + 'static) {
        let completion = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Done(completion) => completion.clone(),
                State::Waiting { listeners } => {
                    listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(completion);
    }

    /// Completes `target` from this result, exactly once.
    pub fn forward_to(&self, target: &AsyncResult<T>) {
        let target = target.clone();
        self.on_completion(move |completion| {
            match completion {
                Ok(value) => target.set_result(value),
                Err(fault) => target.set_error(fault),
            };
        });
    }

    /// Awaits the completion from async context.
    pub async fn wait(&self) -> Completion<T> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.on_completion(move |completion| {
            let _ = tx.send(completion);
        });
        rx.await.unwrap_or_else(|_| {
            Err(ServiceFault::new(
                StatusCode::BAD_UNEXPECTED_ERROR,
                "completion channel dropped before a terminal state",
            ))
        })
    }
}
