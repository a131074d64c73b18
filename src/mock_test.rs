use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::filter::{Filter, FilterKind, NextFilter};
use crate::handler::Handler;
use crate::message::Message;
use crate::processor::{SimpleIoProcessor, Transport};
use crate::session::{IdleStatus, Session, SessionConfig, WriteRequest};

#[derive(Default, Clone)]
pub(crate) struct Stats {
    pub(crate) created: Arc<AtomicUsize>,
    pub(crate) opened: Arc<AtomicUsize>,
    pub(crate) closed: Arc<AtomicUsize>,
    pub(crate) idle: Arc<AtomicUsize>,
    pub(crate) exception: Arc<AtomicUsize>,
    pub(crate) input_closed: Arc<AtomicUsize>,
    pub(crate) received: Arc<AtomicUsize>,
    pub(crate) sent: Arc<AtomicUsize>,
    pub(crate) write: Arc<AtomicUsize>,
    pub(crate) close: Arc<AtomicUsize>,
}

impl Stats {
    pub(crate) fn get(counter: &Arc<AtomicUsize>) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Counts every event it sees and forwards it
pub(crate) struct CountingFilter {
    stats: Stats,
}

impl CountingFilter {
    pub(crate) fn new(stats: Stats) -> Self {
        Self { stats }
    }
}

impl Filter for CountingFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::new("counting")
    }

    fn session_created(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        next.session_created(session);
        Ok(())
    }
    fn session_opened(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        next.session_opened(session);
        Ok(())
    }
    fn session_closed(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        next.session_closed(session);
        Ok(())
    }
    fn session_idle(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        status: IdleStatus,
    ) -> Result<()> {
        self.stats.idle.fetch_add(1, Ordering::SeqCst);
        next.session_idle(session, status);
        Ok(())
    }
    fn exception_caught(&self, next: &NextFilter, session: &Arc<Session>, cause: Error) -> Result<()> {
        self.stats.exception.fetch_add(1, Ordering::SeqCst);
        next.exception_caught(session, cause);
        Ok(())
    }
    fn input_closed(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        self.stats.input_closed.fetch_add(1, Ordering::SeqCst);
        next.input_closed(session);
        Ok(())
    }
    fn message_received(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        message: Message,
    ) -> Result<()> {
        self.stats.received.fetch_add(1, Ordering::SeqCst);
        next.message_received(session, message);
        Ok(())
    }
    fn message_sent(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        request: WriteRequest,
    ) -> Result<()> {
        self.stats.sent.fetch_add(1, Ordering::SeqCst);
        next.message_sent(session, request);
        Ok(())
    }
    fn filter_write(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        request: WriteRequest,
    ) -> Result<()> {
        self.stats.write.fetch_add(1, Ordering::SeqCst);
        next.filter_write(session, request);
        Ok(())
    }
    fn filter_close(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        self.stats.close.fetch_add(1, Ordering::SeqCst);
        next.filter_close(session);
        Ok(())
    }
}

/// Records the events reaching the end of the chain
#[derive(Default)]
pub(crate) struct RecordingHandler {
    pub(crate) events: Mutex<Vec<String>>,
    pub(crate) received: Mutex<Vec<Message>>,
    pub(crate) sent: Mutex<Vec<Message>>,
    pub(crate) exceptions: Mutex<Vec<Error>>,
    pub(crate) fail_on_received: Option<Error>,
}

impl RecordingHandler {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

impl Handler for RecordingHandler {
    fn session_created(&self, _session: &Arc<Session>) -> Result<()> {
        self.record("created");
        Ok(())
    }
    fn session_opened(&self, _session: &Arc<Session>) -> Result<()> {
        self.record("opened");
        Ok(())
    }
    fn session_closed(&self, _session: &Arc<Session>) -> Result<()> {
        self.record("closed");
        Ok(())
    }
    fn session_idle(&self, _session: &Arc<Session>, status: IdleStatus) -> Result<()> {
        self.record(format!("idle {}", status));
        Ok(())
    }
    fn exception_caught(&self, _session: &Arc<Session>, cause: &Error) -> Result<()> {
        self.record("exception");
        self.exceptions.lock().push(cause.clone());
        Ok(())
    }
    fn input_closed(&self, session: &Arc<Session>) -> Result<()> {
        self.record("input closed");
        session.close_now();
        Ok(())
    }
    fn message_received(&self, _session: &Arc<Session>, message: Message) -> Result<()> {
        self.record("received");
        self.received.lock().push(message);
        match &self.fail_on_received {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
    fn message_sent(&self, _session: &Arc<Session>, message: &Message) -> Result<()> {
        self.record("sent");
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// An in-memory transport accepting at most `capacity` bytes until it is given more
#[derive(Default)]
pub(crate) struct MockTransport {
    pub(crate) written: Mutex<Vec<u8>>,
    pub(crate) capacity: Mutex<Option<usize>>,
    pub(crate) fail_with: Mutex<Option<io::ErrorKind>>,
    pub(crate) writes: AtomicUsize,
    pub(crate) opened: AtomicUsize,
    pub(crate) closed: AtomicUsize,
    pub(crate) read_interest: Mutex<Option<bool>>,
    pub(crate) write_interest: AtomicUsize,
    /// Lifts the capacity limit and flushes as soon as write interest is armed
    pub(crate) writable_on_interest: AtomicBool,
}

impl MockTransport {
    pub(crate) fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub(crate) fn set_capacity(&self, capacity: Option<usize>) {
        *self.capacity.lock() = capacity;
    }
}

impl Transport for MockTransport {
    fn open(&self, _session: &Arc<Session>) -> Result<()> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(
        &self,
        _session: &Arc<Session>,
        data: &[u8],
        _destination: Option<SocketAddr>,
    ) -> io::Result<usize> {
        if let Some(kind) = *self.fail_with.lock() {
            return Err(io::Error::from(kind));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut capacity = self.capacity.lock();
        let n = match capacity.as_mut() {
            Some(0) => return Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Some(left) => {
                let n = data.len().min(*left);
                *left -= n;
                n
            }
            None => data.len(),
        };
        self.written.lock().extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn close(&self, _session: &Arc<Session>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn set_read_interest(&self, _session: &Arc<Session>, interested: bool) {
        *self.read_interest.lock() = Some(interested);
    }

    fn set_write_interest(&self, session: &Arc<Session>, interested: bool) {
        if !interested {
            return;
        }
        self.write_interest.fetch_add(1, Ordering::SeqCst);
        if self.writable_on_interest.swap(false, Ordering::SeqCst) {
            self.set_capacity(None);
            if let Some(processor) = session.processor() {
                processor.flush(session);
            }
        }
    }
}

/// Creates an added session on a mock transport, outside of any service
pub(crate) fn new_session(
    handler: Arc<RecordingHandler>,
    config: SessionConfig,
) -> (Arc<SimpleIoProcessor<MockTransport>>, Arc<Session>) {
    use crate::processor::Processor;

    let processor = SimpleIoProcessor::new(MockTransport::default());
    let session = Session::new(handler, processor.handle(), config);
    processor.add(&session);
    (processor, session)
}
