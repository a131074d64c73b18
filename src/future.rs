//! Completion handles for asynchronous session operations
//!
//! Every handle can be awaited, waited on from a blocking thread, or given listeners that run
//! on whichever thread completes it.

use futures_lite::future;
use parking_lot::Mutex;
use smol::Timer;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::session::Session;

type Listener<T> = Box<dyn FnOnce(&T) + Send>;

/// Boxed future returned by awaiting a completion handle
pub type Completion<T> = Pin<Box<dyn Future<Output = T> + Send>>;

struct State<T> {
    value: Option<T>,
    listeners: Vec<Listener<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done_tx: async_broadcast::Sender<T>,
    done_rx: async_broadcast::InactiveReceiver<T>,
}

/// A value that is set exactly once by the I/O side and observed by any number of waiters.
///
/// Waiters subscribe to a one-slot broadcast channel that carries the value and is closed
/// right after, so late subscribers fall through to the stored copy.
pub struct IoFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for IoFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for IoFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> IoFuture<T> {
    /// Creates a new pending IoFuture
    pub fn new() -> Self {
        let (done_tx, done_rx) = async_broadcast::broadcast(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    value: None,
                    listeners: Vec::new(),
                }),
                done_tx,
                done_rx: done_rx.deactivate(),
            }),
        }
    }

    /// Returns true once a value has been set
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().value.is_some()
    }

    /// Returns the value if it has been set
    pub fn get(&self) -> Option<T> {
        self.inner.state.lock().value.clone()
    }

    /// Sets the value. Only the first call has any effect; returns false for the others.
    pub(crate) fn complete(&self, value: T) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value.clone());
            std::mem::take(&mut state.listeners)
        };
        // inactive when nobody is waiting
        let _ = self.inner.done_tx.try_broadcast(value.clone());
        self.inner.done_tx.close();
        for listener in listeners {
            listener(&value);
        }
        true
    }

    /// Resolves once the value is set
    pub async fn completed(&self) -> T {
        let mut done_rx = self.inner.done_rx.activate_cloned();
        loop {
            if let Some(value) = self.get() {
                return value;
            }
            if let Ok(value) = done_rx.recv().await {
                return value;
            }
        }
    }

    /// Blocks the calling thread until the value is set
    pub fn wait(&self) -> T {
        smol::block_on(self.completed())
    }

    /// Blocks the calling thread until the value is set or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        smol::block_on(future::or(
            async { Some(self.completed().await) },
            async {
                Timer::after(timeout).await;
                None
            },
        ))
    }

    /// Registers a callback run once the value is set, immediately if it already is
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let value = {
            let mut state = self.inner.state.lock();
            match &state.value {
                Some(value) => value.clone(),
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(&value);
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for IoFuture<T> {
    type Output = T;
    type IntoFuture = Completion<T>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.completed().await })
    }
}

const PENDING: u8 = 0;
const COMMITTED: u8 = 1;
const CANCELLED: u8 = 2;

/// Completion handle of a [WriteRequest](crate::session::WriteRequest).
///
/// A write can be cancelled until the processor commits it for transmission; after that
/// [cancel](WriteFuture::cancel) is a no-op.
#[derive(Clone, Default)]
pub struct WriteFuture {
    inner: IoFuture<Result<()>>,
    state: Arc<AtomicU8>,
}

impl WriteFuture {
    /// Creates a new pending WriteFuture
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the write has completed, failed or been cancelled
    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    /// Returns true if the message was written to the transport
    pub fn is_written(&self) -> bool {
        matches!(self.inner.get(), Some(Ok(())))
    }

    /// Returns true if the write was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Returns the failure cause, if the write failed
    pub fn exception(&self) -> Option<Error> {
        match self.inner.get() {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }

    /// Marks the write as successfully completed
    pub fn set_written(&self) -> bool {
        self.inner.complete(Ok(()))
    }

    /// Marks the write as failed
    pub fn set_exception(&self, err: Error) -> bool {
        self.inner.complete(Err(err))
    }

    /// Cancels the write if the processor has not started transmitting it yet
    pub fn cancel(&self) -> bool {
        if self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.complete(Err(Error::Cancelled))
        } else {
            false
        }
    }

    /// Commits the write for transmission. Returns false if it was cancelled or has already
    /// completed, in which case the processor must skip it.
    pub fn commit(&self) -> bool {
        let committed = match self.state.compare_exchange(
            PENDING,
            COMMITTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(state) => state == COMMITTED,
        };
        committed && !self.inner.is_done()
    }

    /// Blocks until the write completes
    pub fn wait(&self) -> Result<()> {
        self.inner.wait()
    }

    /// Blocks until the write completes or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        self.inner.wait_timeout(timeout)
    }

    /// Registers a callback run on completion
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Result<()>) + Send + 'static,
    {
        self.inner.add_listener(listener)
    }
}

impl IntoFuture for WriteFuture {
    type Output = Result<()>;
    type IntoFuture = Completion<Result<()>>;

    fn into_future(self) -> Self::IntoFuture {
        self.inner.into_future()
    }
}

/// Completion handle signalling that a session has fully closed. It cannot be cancelled.
#[derive(Clone, Default)]
pub struct CloseFuture {
    inner: IoFuture<()>,
}

impl CloseFuture {
    /// Creates a new pending CloseFuture
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the session is closed
    pub fn is_closed(&self) -> bool {
        self.inner.is_done()
    }

    /// Marks the session as closed. Only the first call has any effect.
    pub(crate) fn set_closed(&self) -> bool {
        self.inner.complete(())
    }

    /// Blocks until the session is closed
    pub fn wait(&self) {
        self.inner.wait()
    }

    /// Blocks until the session is closed or `timeout` elapses; returns true if closed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.inner.wait_timeout(timeout).is_some()
    }

    /// Registers a callback run once the session is closed
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.add_listener(move |_| listener())
    }
}

impl IntoFuture for CloseFuture {
    type Output = ();
    type IntoFuture = Completion<()>;

    fn into_future(self) -> Self::IntoFuture {
        self.inner.into_future()
    }
}

/// Completion handle of a connect attempt, resolved with the session once `session_created`
/// has reached the handler.
#[derive(Clone, Default)]
pub struct ConnectFuture {
    inner: IoFuture<Result<Arc<Session>>>,
}

impl ConnectFuture {
    /// Creates a new pending ConnectFuture
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the connect attempt has finished
    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    /// Returns true if the connection was established
    pub fn is_connected(&self) -> bool {
        matches!(self.inner.get(), Some(Ok(_)))
    }

    /// Returns the connected session, if any
    pub fn session(&self) -> Option<Arc<Session>> {
        match self.inner.get() {
            Some(Ok(session)) => Some(session),
            _ => None,
        }
    }

    /// Returns the failure cause, if the attempt failed
    pub fn exception(&self) -> Option<Error> {
        match self.inner.get() {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }

    /// Resolves the attempt with a connected session
    pub fn set_session(&self, session: Arc<Session>) -> bool {
        self.inner.complete(Ok(session))
    }

    /// Fails the attempt
    pub fn set_exception(&self, err: Error) -> bool {
        self.inner.complete(Err(err))
    }

    /// Cancels a pending attempt
    pub fn cancel(&self) -> bool {
        self.inner.complete(Err(Error::Cancelled))
    }

    /// Blocks until the attempt finishes
    pub fn wait(&self) -> Result<Arc<Session>> {
        self.inner.wait()
    }

    /// Blocks until the attempt finishes or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Arc<Session>>> {
        self.inner.wait_timeout(timeout)
    }

    /// Registers a callback run when the attempt finishes
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Result<Arc<Session>>) + Send + 'static,
    {
        self.inner.add_listener(listener)
    }
}

impl IntoFuture for ConnectFuture {
    type Output = Result<Arc<Session>>;
    type IntoFuture = Completion<Result<Arc<Session>>>;

    fn into_future(self) -> Self::IntoFuture {
        self.inner.into_future()
    }
}
