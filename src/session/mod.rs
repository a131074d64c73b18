//! A session is one connection (or one remote peer of a connectionless transport) together
//! with its filter chain, write queue, attributes and counters.

pub mod attributes;
pub mod counters;
pub mod write_queue;

#[cfg(test)]
mod session_test;

use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::filter::FilterChain;
use crate::future::{CloseFuture, ConnectFuture, WriteFuture};
use crate::handler::Handler;
use crate::message::Message;
use crate::processor::Processor;
use crate::service::Service;

pub use attributes::{Attribute, AttributeMap};
pub use counters::{SessionCounters, Throughput};
pub use write_queue::{WriteRequest, WriteRequestQueue};

/// Attribute key under which a pending [ConnectFuture] waits for `session_created`
pub const SESSION_CREATED_FUTURE: &str = "sluice.session.created_future";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Which direction of a session has been idle
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IdleStatus {
    /// Nothing has been read
    ReaderIdle,
    /// Nothing has been written
    WriterIdle,
    /// Nothing has been read or written
    BothIdle,
}

impl fmt::Display for IdleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleStatus::ReaderIdle => write!(f, "reader idle"),
            IdleStatus::WriterIdle => write!(f, "writer idle"),
            IdleStatus::BothIdle => write!(f, "both idle"),
        }
    }
}

/// Per-session settings, copied from the service's default when the session is created
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    read_buffer_size: usize,
    reader_idle_time: Duration,
    writer_idle_time: Duration,
    both_idle_time: Duration,
    write_timeout: Duration,
    throughput_calculation_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 2048,
            reader_idle_time: Duration::ZERO,
            writer_idle_time: Duration::ZERO,
            both_idle_time: Duration::ZERO,
            write_timeout: Duration::from_secs(60),
            throughput_calculation_interval: Duration::from_secs(3),
        }
    }
}

impl SessionConfig {
    /// Creates a new SessionConfig with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the size of the buffer used for each read
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Sets the size of the buffer used for each read
    pub fn set_read_buffer_size(&mut self, size: usize) -> &mut Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Returns the most bytes a processor writes for the session in one flush pass
    pub fn max_write_bytes_per_flush(&self) -> usize {
        self.read_buffer_size + (self.read_buffer_size >> 1)
    }

    /// Returns the idle time of `status`; zero disables the idle event
    pub fn idle_time(&self, status: IdleStatus) -> Duration {
        match status {
            IdleStatus::ReaderIdle => self.reader_idle_time,
            IdleStatus::WriterIdle => self.writer_idle_time,
            IdleStatus::BothIdle => self.both_idle_time,
        }
    }

    /// Sets the idle time of `status`
    pub fn set_idle_time(&mut self, status: IdleStatus, idle_time: Duration) -> &mut Self {
        match status {
            IdleStatus::ReaderIdle => self.reader_idle_time = idle_time,
            IdleStatus::WriterIdle => self.writer_idle_time = idle_time,
            IdleStatus::BothIdle => self.both_idle_time = idle_time,
        }
        self
    }

    /// Returns the write timeout; zero disables it
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Sets the write timeout
    pub fn set_write_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.write_timeout = timeout;
        self
    }

    /// Returns how often throughput is recalculated
    pub fn throughput_calculation_interval(&self) -> Duration {
        self.throughput_calculation_interval
    }

    /// Sets how often throughput is recalculated; zero disables the calculation
    pub fn set_throughput_calculation_interval(&mut self, interval: Duration) -> &mut Self {
        self.throughput_calculation_interval = interval;
        self
    }
}

/// What became of a message passed to [Session::write]
pub enum WriteOutcome {
    /// The request entered the filter chain
    Scheduled(WriteFuture),
    /// The session was closing; the request's future is already failed with
    /// [Error::WriteToClosedSession]
    Closed(WriteRequest),
}

impl WriteOutcome {
    /// Returns the future of the write, whatever became of it
    pub fn future(&self) -> &WriteFuture {
        match self {
            WriteOutcome::Scheduled(future) => future,
            WriteOutcome::Closed(request) => request.future(),
        }
    }

    /// Returns true if the request entered the filter chain
    pub fn is_scheduled(&self) -> bool {
        matches!(self, WriteOutcome::Scheduled(_))
    }
}

impl fmt::Debug for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOutcome::Scheduled(_) => write!(f, "Scheduled"),
            WriteOutcome::Closed(request) => write!(f, "Closed({:?})", request),
        }
    }
}

/// A connection and its pipeline
pub struct Session {
    id: u64,
    config: RwLock<SessionConfig>,
    service: Weak<Service>,
    processor: Weak<dyn Processor>,
    handler: Arc<dyn Handler>,
    filter_chain: FilterChain,
    attributes: AttributeMap,
    write_request_queue: WriteRequestQueue,
    current_write_request: Mutex<Option<WriteRequest>>,
    close_future: CloseFuture,
    closing: Mutex<bool>,
    read_suspended: AtomicBool,
    write_suspended: AtomicBool,
    flushing: AtomicBool,
    destroyed: AtomicBool,
    counters: SessionCounters,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl Session {
    /// Creates a session that is not managed by any [Service]
    pub fn new(
        handler: Arc<dyn Handler>,
        processor: Weak<dyn Processor>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Self::create(Weak::new(), handler, processor, config, None, None)
    }

    pub(crate) fn create(
        service: Weak<Service>,
        handler: Arc<dyn Handler>,
        processor: Weak<dyn Processor>,
        config: SessionConfig,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Arc<Self> {
        let now = Instant::now();
        let session = Arc::new_cyclic(|me: &Weak<Session>| Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            config: RwLock::new(config),
            service,
            processor,
            handler,
            filter_chain: FilterChain::with_session(me.clone()),
            attributes: AttributeMap::new(),
            write_request_queue: WriteRequestQueue::new(),
            current_write_request: Mutex::new(None),
            close_future: CloseFuture::new(),
            closing: Mutex::new(false),
            read_suspended: AtomicBool::new(false),
            write_suspended: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            counters: SessionCounters::new(now),
            local_addr,
            remote_addr,
        });
        trace!("session {} created", session.id);
        session
    }

    /// Returns the process-unique id of this session
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns a copy of the session config
    pub fn config(&self) -> SessionConfig {
        *self.config.read()
    }

    /// Changes the session config in place
    pub fn configure<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionConfig),
    {
        f(&mut *self.config.write());
    }

    /// Returns the service managing this session, if it is still alive
    pub fn service(&self) -> Option<Arc<Service>> {
        self.service.upgrade()
    }

    /// Returns the processor serving this session, if it is still alive
    pub fn processor(&self) -> Option<Arc<dyn Processor>> {
        self.processor.upgrade()
    }

    /// Returns the handler
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Returns the filter chain
    pub fn filter_chain(&self) -> &FilterChain {
        &self.filter_chain
    }

    /// Returns the attribute map
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Returns the queue of requests waiting for the processor
    pub fn write_request_queue(&self) -> &WriteRequestQueue {
        &self.write_request_queue
    }

    /// Returns the future completed when the session is closed
    pub fn close_future(&self) -> &CloseFuture {
        &self.close_future
    }

    /// Returns the counters
    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// Returns the local address, if the transport has one
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the remote address, if the transport has one
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Writes `message` through the filter chain without waiting for it to be sent.
    pub fn write(self: &Arc<Self>, message: impl Into<Message>) -> Result<WriteOutcome> {
        self.write_to(message, None)
    }

    /// Writes `message` to `destination`, for connectionless transports.
    pub fn write_to(
        self: &Arc<Self>,
        message: impl Into<Message>,
        destination: Option<SocketAddr>,
    ) -> Result<WriteOutcome> {
        let message = message.into();

        if self.is_closing() || !self.is_connected() {
            let request = WriteRequest::with_destination(message, destination);
            request.future().set_exception(Error::WriteToClosedSession);
            return Ok(WriteOutcome::Closed(request));
        }

        if let Message::Buffer(buf) = &message {
            if !bytes::Buf::has_remaining(buf) {
                return Err(Error::invalid_argument(
                    "message is empty. Forgot to call flip()?",
                ));
            }
        }

        let request = WriteRequest::with_destination(message, destination);
        let future = request.future().clone();
        self.filter_chain.fire_filter_write(request);
        Ok(WriteOutcome::Scheduled(future))
    }

    /// Closes the session immediately, or once every pending write has been flushed.
    pub fn close(self: &Arc<Self>, immediately: bool) -> CloseFuture {
        if immediately {
            self.close_now()
        } else {
            self.close_on_flush()
        }
    }

    /// Closes the session immediately; pending writes are failed.
    pub fn close_now(self: &Arc<Self>) -> CloseFuture {
        {
            let mut closing = self.closing.lock();
            if *closing {
                return self.close_future.clone();
            }
            *closing = true;
        }
        debug!("closing session {}", self.id);
        self.filter_chain.fire_filter_close();
        self.close_future.clone()
    }

    /// Closes the session after every write queued so far has been flushed.
    pub fn close_on_flush(self: &Arc<Self>) -> CloseFuture {
        if self.is_closing() {
            return self.close_future.clone();
        }
        match self.processor() {
            Some(processor) if self.write_request_queue.offer_close_marker() => {
                processor.flush(self);
                self.close_future.clone()
            }
            _ => self.close_now(),
        }
    }

    /// Returns true once a close has been initiated
    pub fn is_closing(&self) -> bool {
        *self.closing.lock()
    }

    /// Returns true until the session is closed
    pub fn is_connected(&self) -> bool {
        !self.close_future.is_closed()
    }

    /// Returns true while the session is connected and not closing
    pub fn is_active(&self) -> bool {
        self.is_connected() && !self.is_closing()
    }

    /// Stops reading from the transport
    pub fn suspend_read(self: &Arc<Self>) {
        self.read_suspended.store(true, Ordering::Release);
        self.update_traffic_control();
    }

    /// Stops writing to the transport; writes keep queueing
    pub fn suspend_write(self: &Arc<Self>) {
        self.write_suspended.store(true, Ordering::Release);
        self.update_traffic_control();
    }

    /// Resumes reading from the transport
    pub fn resume_read(self: &Arc<Self>) {
        self.read_suspended.store(false, Ordering::Release);
        self.update_traffic_control();
    }

    /// Resumes writing to the transport and flushes what queued up meanwhile
    pub fn resume_write(self: &Arc<Self>) {
        self.write_suspended.store(false, Ordering::Release);
        self.update_traffic_control();
    }

    /// Returns true if reads are suspended
    pub fn is_read_suspended(&self) -> bool {
        self.read_suspended.load(Ordering::Acquire)
    }

    /// Returns true if writes are suspended
    pub fn is_write_suspended(&self) -> bool {
        self.write_suspended.load(Ordering::Acquire)
    }

    fn update_traffic_control(self: &Arc<Self>) {
        if let Some(processor) = self.processor() {
            processor.update_traffic_control(self);
        }
    }

    /// Returns the attribute stored under `key` if it is of type `T`
    pub fn get_attribute<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.attributes.get(key)
    }

    /// Stores an attribute and returns the previous value
    pub fn set_attribute<T: Any + Send + Sync>(&self, key: &str, value: T) -> Option<Attribute> {
        self.attributes.set(key, value)
    }

    /// Stores an attribute unless `key` is taken; returns the value already there
    pub fn set_attribute_if_absent<T: Any + Send + Sync>(
        &self,
        key: &str,
        value: T,
    ) -> Option<Attribute> {
        self.attributes.set_if_absent(key, value)
    }

    /// Removes an attribute and returns it
    pub fn remove_attribute(&self, key: &str) -> Option<Attribute> {
        self.attributes.remove(key)
    }

    /// Returns true if `key` is present
    pub fn contains_attribute(&self, key: &str) -> bool {
        self.attributes.contains(key)
    }

    pub(crate) fn set_connect_future(&self, future: ConnectFuture) {
        self.attributes.set(SESSION_CREATED_FUTURE, future);
    }

    pub(crate) fn take_connect_future(&self) -> Option<ConnectFuture> {
        self.attributes
            .take::<ConnectFuture>(SESSION_CREATED_FUTURE)
            .map(|future| (*future).clone())
    }

    /// Returns the total bytes read
    pub fn read_bytes(&self) -> u64 {
        self.counters.read_bytes()
    }

    /// Returns the total bytes written
    pub fn written_bytes(&self) -> u64 {
        self.counters.written_bytes()
    }

    /// Returns the number of messages delivered to the handler
    pub fn read_messages(&self) -> u64 {
        self.counters.read_messages()
    }

    /// Returns the number of messages fully written
    pub fn written_messages(&self) -> u64 {
        self.counters.written_messages()
    }

    /// Returns the bytes scheduled but not yet written
    pub fn scheduled_write_bytes(&self) -> i64 {
        self.counters.scheduled_write_bytes()
    }

    /// Returns the messages scheduled but not yet written
    pub fn scheduled_write_messages(&self) -> i64 {
        self.counters.scheduled_write_messages()
    }

    /// Returns the consecutive idle events of `status` since the last I/O
    pub fn idle_count(&self, status: IdleStatus) -> u64 {
        self.counters.idle_count(status)
    }

    /// Returns true if an idle event of `status` fired since the last I/O
    pub fn is_idle(&self, status: IdleStatus) -> bool {
        self.idle_count(status) > 0
    }

    /// Returns the time of the last read
    pub fn last_read_time(&self) -> Instant {
        self.counters.last_read_time()
    }

    /// Returns the time of the last write
    pub fn last_write_time(&self) -> Instant {
        self.counters.last_write_time()
    }

    /// Returns the time of the last read or write
    pub fn last_io_time(&self) -> Instant {
        self.counters.last_io_time()
    }

    /// Returns when an idle event of `status` last fired
    pub fn last_idle_time(&self, status: IdleStatus) -> Instant {
        self.counters.last_idle_time(status)
    }

    /// Returns the last computed throughput
    pub fn throughput(&self) -> Throughput {
        self.counters.throughput()
    }

    /// Accounts `n` bytes read at `now`
    pub fn increase_read_bytes(&self, n: u64, now: Instant) {
        self.counters.increase_read_bytes(n, now);
        if let Some(service) = self.service().filter(|_| n > 0) {
            service.statistics().increase_read_bytes(n);
        }
    }

    /// Accounts `n` bytes written at `now`
    pub fn increase_written_bytes(&self, n: u64, now: Instant) {
        self.counters.increase_written_bytes(n, now);
        if let Some(service) = self.service().filter(|_| n > 0) {
            service.statistics().increase_written_bytes(n);
        }
    }

    pub(crate) fn increase_read_messages(&self, now: Instant) {
        self.counters.increase_read_messages(now);
        if let Some(service) = self.service() {
            service.statistics().increase_read_messages();
        }
    }

    pub(crate) fn increase_written_messages(&self, now: Instant) {
        self.counters.increase_written_messages(now);
        if let Some(service) = self.service() {
            service.statistics().increase_written_messages();
        }
    }

    pub(crate) fn increase_scheduled_write_bytes(&self, n: i64) {
        self.counters.increase_scheduled_write_bytes(n);
    }

    pub(crate) fn increase_scheduled_write_messages(&self) {
        self.counters.increase_scheduled_write_messages();
    }

    pub(crate) fn decrease_scheduled_write_messages(&self) {
        self.counters.decrease_scheduled_write_messages();
    }

    pub(crate) fn increase_idle_count(&self, status: IdleStatus, now: Instant) {
        self.counters.increase_idle_count(status, now);
    }

    /// Recomputes throughput if the calculation interval has elapsed, or unconditionally
    /// with `force`. Returns true if it was recomputed.
    pub fn update_throughput(&self, now: Instant, force: bool) -> bool {
        let interval = self.config().throughput_calculation_interval();
        self.counters.update_throughput(now, interval, force)
    }

    /// Fires the idle events that are due at `now`, then enforces the write timeout.
    pub fn notify_idleness(self: &Arc<Self>, now: Instant) {
        let config = self.config();
        for status in [
            IdleStatus::BothIdle,
            IdleStatus::ReaderIdle,
            IdleStatus::WriterIdle,
        ] {
            let idle_time = config.idle_time(status);
            if idle_time.is_zero() {
                continue;
            }
            let last_io = match status {
                IdleStatus::BothIdle => self.last_io_time(),
                IdleStatus::ReaderIdle => self.last_read_time(),
                IdleStatus::WriterIdle => self.last_write_time(),
            };
            let since = last_io.max(self.last_idle_time(status));
            if now.saturating_duration_since(since) >= idle_time {
                self.filter_chain.fire_session_idle_at(status, now);
            }
        }

        self.notify_write_timeout(now, config.write_timeout());
    }

    fn notify_write_timeout(self: &Arc<Self>, now: Instant, timeout: Duration) {
        if timeout.is_zero()
            || now.saturating_duration_since(self.last_write_time()) < timeout
            || self.write_request_queue.is_empty()
        {
            return;
        }
        let Some(request) = self.current_write_request.lock().take() else {
            return;
        };

        debug!("write timeout on session {}", self.id);
        let cause = Error::WriteTimeout;
        request.future().set_exception(cause.clone());
        self.filter_chain.fire_exception_caught(cause);
        self.close_now();
    }

    pub(crate) fn current_write_request(&self) -> &Mutex<Option<WriteRequest>> {
        &self.current_write_request
    }

    pub(crate) fn try_begin_flush(&self) -> bool {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_flush(&self) {
        self.flushing.store(false, Ordering::Release);
    }

    /// Returns true once the processor has released the session
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Resets the pending-write counters and rates, then completes the close future
    pub(crate) fn mark_closed(&self) -> bool {
        if self.close_future.is_closed() {
            return false;
        }
        self.counters.reset_on_close();
        self.close_future.set_closed()
    }

    /// Releases the session exactly once: fails every pending write, runs `close_transport`,
    /// then reports the session destroyed to its service (or fires `session_closed` directly
    /// when it has none). Returns false if it had already been released.
    pub(crate) fn release<F>(self: &Arc<Self>, close_transport: F) -> bool
    where
        F: FnOnce(&Arc<Session>),
    {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.closing.lock() = true;

        self.write_request_queue.dispose();
        let current = self.current_write_request.lock().take();
        if let Some(request) = current {
            request.future().set_exception(Error::WriteToClosedSession);
        }

        close_transport(self);

        match self.service() {
            Some(service) => service.fire_session_destroyed(self),
            None => self.filter_chain.fire_session_closed(),
        }
        true
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closing", &self.is_closing())
            .finish()
    }
}
