//! Processors move bytes between sessions and their transport

#[cfg(test)]
mod processor_test;

use bytes::{Buf, Bytes};
use log::{debug, trace, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::buffer::IoBuffer;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::{Session, WriteRequest};

/// Performs the actual I/O of the sessions it serves.
///
/// The head of every filter chain hands outbound writes and closes to the session's processor;
/// transports feed inbound data back in through [read](Processor::read),
/// [input_closed](Processor::input_closed) and [exception](Processor::exception).
pub trait Processor: Send + Sync + 'static {
    /// Starts serving a new session: allocates transport resources, builds its filter chain and
    /// fires `session_created` then `session_opened`.
    fn add(&self, session: &Arc<Session>);

    /// Queues `request` and flushes unless writes are suspended.
    fn write(&self, session: &Arc<Session>, request: WriteRequest);

    /// Writes out as much of the session's pending requests as the transport accepts.
    fn flush(&self, session: &Arc<Session>);

    /// Stops serving a session and releases its resources. Runs once per session.
    fn remove(&self, session: &Arc<Session>);

    /// Applies the session's read/write suspension flags.
    fn update_traffic_control(&self, session: &Arc<Session>);

    /// Delivers bytes read from the transport.
    fn read(&self, session: &Arc<Session>, data: Bytes) {
        if data.is_empty() {
            return;
        }
        trace!("session {} read {} bytes", session.id(), data.len());
        session
            .filter_chain()
            .fire_message_received(Message::Buffer(IoBuffer::new(data)));
    }

    /// Reports that the remote peer shut down its output half.
    fn input_closed(&self, session: &Arc<Session>) {
        session.filter_chain().fire_input_closed();
    }

    /// Reports a transport failure; fatal ones close the session.
    fn exception(&self, session: &Arc<Session>, err: io::Error) {
        let err = Error::from(err);
        let fatal = err.is_fatal();
        session.filter_chain().fire_exception_caught(err);
        if fatal {
            session.close_now();
        }
    }
}

/// The socket-level operations a [SimpleIoProcessor] drives.
///
/// Writes are non-blocking: a transport that cannot take more bytes returns
/// [io::ErrorKind::WouldBlock] (or a short count) and, once write interest is set, calls
/// [Processor::flush] when it becomes writable again.
pub trait Transport: Send + Sync + 'static {
    /// Allocates resources for a new session and starts reading from it
    fn open(&self, session: &Arc<Session>) -> Result<()>;
    /// Writes as much of `data` as possible without blocking
    fn write(
        &self,
        session: &Arc<Session>,
        data: &[u8],
        destination: Option<SocketAddr>,
    ) -> io::Result<usize>;
    /// Releases the session's resources
    fn close(&self, session: &Arc<Session>);
    /// Enables or disables reading
    fn set_read_interest(&self, session: &Arc<Session>, interested: bool);
    /// Asks to be told through [Processor::flush] when writing is possible again
    fn set_write_interest(&self, session: &Arc<Session>, interested: bool);
}

enum FlushState {
    /// Nothing left to write
    Drained,
    /// The transport stopped accepting bytes
    Blocked,
    /// The per-pass byte budget ran out
    Exhausted,
    /// The transport failed and the session was closed
    Failed,
}

enum Progress {
    Complete(usize),
    Partial,
}

/// A [Processor] over any [Transport], serializing flushes per session and writing at most
/// one and a half read buffers per pass.
pub struct SimpleIoProcessor<T: Transport> {
    transport: T,
    me: Weak<Self>,
}

impl<T: Transport> SimpleIoProcessor<T> {
    /// Creates a new SimpleIoProcessor
    pub fn new(transport: T) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            transport,
            me: me.clone(),
        })
    }

    /// Returns the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the handle sessions keep to this processor
    pub fn handle(&self) -> Weak<dyn Processor> {
        self.me.clone()
    }

    fn flush_now(&self, session: &Arc<Session>) -> FlushState {
        let max_bytes = session.config().max_write_bytes_per_flush();
        let mut written = 0usize;

        loop {
            if session.is_destroyed() {
                return FlushState::Drained;
            }
            if written >= max_bytes {
                return FlushState::Exhausted;
            }

            let current = session.current_write_request().lock().take();
            let mut request = match current {
                Some(request) => request,
                None => match session.write_request_queue().poll(session) {
                    Some(request) => {
                        if !request.future().commit() {
                            trace!("skipping cancelled write on session {}", session.id());
                            session.increase_scheduled_write_bytes(
                                -(request.message().remaining_bytes() as i64),
                            );
                            session.decrease_scheduled_write_messages();
                            continue;
                        }
                        request
                    }
                    None => return FlushState::Drained,
                },
            };

            match self.write_request(session, &mut request, max_bytes - written) {
                Ok(Progress::Complete(n)) => {
                    written += n;
                    Self::complete(session, request);
                }
                Ok(Progress::Partial) => {
                    *session.current_write_request().lock() = Some(request);
                    return FlushState::Blocked;
                }
                Err(err @ Error::InvalidArgument(_)) => {
                    request.future().set_exception(err.clone());
                    session.filter_chain().fire_exception_caught(err);
                }
                Err(err) => {
                    debug!("write failed on session {}: {}", session.id(), err);
                    request.future().set_exception(err.clone());
                    session.filter_chain().fire_exception_caught(err);
                    session.close_now();
                    return FlushState::Failed;
                }
            }
        }
    }

    fn write_request(
        &self,
        session: &Arc<Session>,
        request: &mut WriteRequest,
        budget: usize,
    ) -> Result<Progress> {
        let destination = request.destination();
        let (written, done) = match request.message_mut() {
            Message::Buffer(buf) => self.write_buffer(session, buf, destination, budget)?,
            Message::File(region) => {
                let mut written = 0usize;
                let mut chunk = vec![0u8; budget.min(region.remaining() as usize)];
                while region.remaining() > 0 && written < budget {
                    let want = (budget - written).min(chunk.len());
                    let n = region.read_chunk(&mut chunk[..want])?;
                    if n == 0 {
                        return Err(Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)));
                    }
                    match self.transport.write(session, &chunk[..n], destination) {
                        Ok(w) => {
                            region.update(w as u64);
                            written += w;
                            if w < n {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                (written, region.remaining() == 0)
            }
            Message::Object(_) => {
                return Err(Error::invalid_argument(
                    "don't know how to write an object message, is an encoder missing?",
                ))
            }
        };

        if written > 0 {
            session.increase_written_bytes(written as u64, Instant::now());
        }
        if done {
            Ok(Progress::Complete(written))
        } else {
            Ok(Progress::Partial)
        }
    }

    fn write_buffer(
        &self,
        session: &Arc<Session>,
        buf: &mut IoBuffer,
        destination: Option<SocketAddr>,
        budget: usize,
    ) -> Result<(usize, bool)> {
        let mut written = 0usize;
        while buf.has_remaining() && written < budget {
            let len = buf.remaining().min(budget - written);
            match self
                .transport
                .write(session, &buf.chunk()[..len], destination)
            {
                Ok(0) => break,
                Ok(n) => {
                    buf.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok((written, !buf.has_remaining()))
    }

    fn complete(session: &Arc<Session>, mut request: WriteRequest) {
        if let Some(buf) = request.message_mut().as_buffer_mut() {
            buf.reset_to_mark();
        }
        session.filter_chain().fire_message_sent(request);
    }
}

impl<T: Transport> Processor for SimpleIoProcessor<T> {
    fn add(&self, session: &Arc<Session>) {
        if let Err(err) = self.transport.open(session) {
            warn!("failed to open session {}: {}", session.id(), err);
            session.filter_chain().fire_exception_caught(err);
            session.close_now();
            return;
        }

        let service = session.service();
        if let Some(service) = &service {
            if let Err(err) = service
                .filter_chain_builder()
                .build_filter_chain(session.filter_chain())
            {
                warn!("failed to build filter chain of session {}: {}", session.id(), err);
                session.filter_chain().fire_exception_caught(err);
                session.close_now();
                return;
            }
        }

        match service {
            Some(service) => service.fire_session_created(session),
            None => {
                session.filter_chain().fire_session_created();
                session.filter_chain().fire_session_opened();
            }
        }
        trace!("session {} added", session.id());
    }

    fn write(&self, session: &Arc<Session>, request: WriteRequest) {
        session.write_request_queue().offer(request);
        if !session.is_write_suspended() {
            self.flush(session);
        }
    }

    fn flush(&self, session: &Arc<Session>) {
        loop {
            if session.is_write_suspended() || !session.try_begin_flush() {
                return;
            }
            let state = self.flush_now(session);
            session.end_flush();

            match state {
                FlushState::Drained => {
                    // a writer may have queued while we held the flag and backed off
                    if session.write_request_queue().is_empty() || session.is_destroyed() {
                        return;
                    }
                }
                // armed only once the flag is released so the wakeup can take it
                FlushState::Exhausted | FlushState::Blocked => {
                    self.transport.set_write_interest(session, true);
                    return;
                }
                FlushState::Failed => return,
            }
        }
    }

    fn remove(&self, session: &Arc<Session>) {
        if session.release(|session| self.transport.close(session)) {
            debug!("session {} removed", session.id());
        }
    }

    fn update_traffic_control(&self, session: &Arc<Session>) {
        self.transport
            .set_read_interest(session, !session.is_read_suspended());
        if session.is_write_suspended() {
            self.transport.set_write_interest(session, false);
        } else {
            let pending = !session.write_request_queue().is_empty()
                || session.current_write_request().lock().is_some();
            if pending {
                self.flush(session);
            }
        }
    }
}
