use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Error;
use crate::future::WriteFuture;
use crate::message::Message;
use crate::session::Session;

/// A message on its way from [Session::write] to the transport, together with the future
/// that reports its outcome.
///
/// A request that is dropped before its future completed fails the future with
/// [Error::WriteDropped]. If the drop happens inside a filter's `filter_write` that then
/// returns an error, the future carries that error instead.
pub struct WriteRequest {
    message: Message,
    future: WriteFuture,
    destination: Option<SocketAddr>,
}

impl WriteRequest {
    /// Creates a new WriteRequest with a fresh future
    pub fn new(message: impl Into<Message>) -> Self {
        Self::with_destination(message, None)
    }

    /// Creates a new WriteRequest addressed to `destination`, for connectionless transports
    pub fn with_destination(message: impl Into<Message>, destination: Option<SocketAddr>) -> Self {
        Self {
            message: message.into(),
            future: WriteFuture::new(),
            destination,
        }
    }

    /// Returns the message
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Returns the message mutably, e.g. for an encoder to transform it in place
    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Replaces the message and returns the previous one
    pub fn replace_message(&mut self, message: impl Into<Message>) -> Message {
        std::mem::replace(&mut self.message, message.into())
    }

    /// Returns the future completed when the message is written
    pub fn future(&self) -> &WriteFuture {
        &self.future
    }

    /// Returns the destination address, if any
    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }
}

impl Drop for WriteRequest {
    fn drop(&mut self) {
        if !self.future.is_done() {
            WriteDispatch::dropped(&self.future);
        }
    }
}

impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRequest")
            .field("message", &self.message)
            .field("destination", &self.destination)
            .finish()
    }
}

#[derive(Default)]
struct DispatchState {
    depth: usize,
    dropped: Vec<WriteFuture>,
}

thread_local! {
    static DISPATCH: RefCell<DispatchState> = RefCell::new(DispatchState::default());
}

/// Marks the current thread as running a `filter_write` call. Requests dropped meanwhile are
/// only failed with [Error::WriteDropped] once the outermost call returns, so an error that
/// call returns wins.
pub(crate) struct WriteDispatch {
    _thread_bound: PhantomData<*const ()>,
}

impl WriteDispatch {
    pub(crate) fn enter() -> Self {
        let _ = DISPATCH.try_with(|state| state.borrow_mut().depth += 1);
        Self {
            _thread_bound: PhantomData,
        }
    }

    fn dropped(future: &WriteFuture) {
        let deferred = DISPATCH
            .try_with(|state| {
                let mut state = state.borrow_mut();
                if state.depth > 0 {
                    state.dropped.push(future.clone());
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if !deferred {
            future.set_exception(Error::WriteDropped);
        }
    }
}

impl Drop for WriteDispatch {
    fn drop(&mut self) {
        let dropped = DISPATCH
            .try_with(|state| {
                let mut state = state.borrow_mut();
                state.depth = state.depth.saturating_sub(1);
                if state.depth == 0 {
                    std::mem::take(&mut state.dropped)
                } else {
                    Vec::new()
                }
            })
            .unwrap_or_default();
        for future in dropped {
            future.set_exception(Error::WriteDropped);
        }
    }
}

enum Queued {
    Request(WriteRequest),
    CloseMarker,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Queued>,
    disposed: bool,
}

/// FIFO of write requests waiting for the processor. A close marker can be appended so that
/// the session closes once everything before it has been flushed.
#[derive(Default)]
pub struct WriteRequestQueue {
    state: Mutex<QueueState>,
}

impl WriteRequestQueue {
    /// Creates an empty WriteRequestQueue
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request. After [dispose](Self::dispose) the request's future is failed with
    /// [Error::WriteToClosedSession] instead.
    pub fn offer(&self, request: WriteRequest) {
        let mut state = self.state.lock();
        if state.disposed {
            drop(state);
            request.future().set_exception(Error::WriteToClosedSession);
            return;
        }
        state.queue.push_back(Queued::Request(request));
    }

    /// Appends the close marker. Returns false if the queue was already disposed.
    pub(crate) fn offer_close_marker(&self) -> bool {
        let mut state = self.state.lock();
        if state.disposed {
            return false;
        }
        state.queue.push_back(Queued::CloseMarker);
        true
    }

    /// Removes the next request. Reaching the close marker closes `session` immediately and
    /// yields `None`.
    pub fn poll(&self, session: &Arc<Session>) -> Option<WriteRequest> {
        let next = self.state.lock().queue.pop_front();
        match next {
            Some(Queued::Request(request)) => Some(request),
            Some(Queued::CloseMarker) => {
                session.close_now();
                None
            }
            None => None,
        }
    }

    /// Returns true if nothing, not even the close marker, is queued
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Returns the number of queued items, the close marker included
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Discards every queued item
    pub fn clear(&self) {
        let drained: Vec<Queued> = self.state.lock().queue.drain(..).collect();
        drop(drained);
    }

    /// Fails every queued request with [Error::WriteToClosedSession] and rejects later offers
    pub fn dispose(&self) {
        let drained: Vec<Queued> = {
            let mut state = self.state.lock();
            state.disposed = true;
            state.queue.drain(..).collect()
        };
        for item in drained {
            if let Queued::Request(request) = item {
                request.future().set_exception(Error::WriteToClosedSession);
            }
        }
    }

    /// Returns true once [dispose](Self::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }
}

impl fmt::Debug for WriteRequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WriteRequestQueue")
            .field("len", &state.queue.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}
