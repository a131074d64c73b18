//! The filter and filter chain APIs which intercept every session event on its way between
//! the processor and the [Handler](crate::handler::Handler)

pub mod builder;
pub mod chain;
pub mod logging;


use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::{IdleStatus, Session, WriteRequest};

pub use builder::{DefaultFilterChainBuilder, FilterChainBuilder};
pub use chain::{Entry, FilterChain};
pub use logging::LoggingFilter;

/// An explicit tag identifying what kind of filter an entry holds, used for lookups in
/// place of runtime type inspection.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterKind(&'static str);

impl FilterKind {
    /// Creates a new tag from a static name
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Creates the default tag of a filter type
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>())
    }

    /// Returns the tag name
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilterKind({})", self.0)
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Intercepts session events and forwards them to its next filter in the [FilterChain].
///
/// Every event method defaults to forwarding, so a filter only overrides what it cares about.
/// Forwarding is explicit: a filter that does not call `next` ends the event there.
/// Returning an `Err` from an inbound event turns into an `exception_caught` event on the same
/// session; returning an `Err` from `filter_write` also fails the request's future.
///
/// Inbound events and `message_sent` travel from head to tail; `filter_write` and
/// `filter_close` travel from tail to head.
#[allow(unused_variables)]
pub trait Filter: Send + Sync + 'static {
    /// Returns the tag used by [FilterChain::get_entry_by_kind]
    fn kind(&self) -> FilterKind {
        FilterKind::of::<Self>()
    }

    /// Called once before the filter is attached to a chain.
    fn init(&self) -> Result<()> {
        Ok(())
    }
    /// Called once after the filter is detached from a chain.
    fn destroy(&self) -> Result<()> {
        Ok(())
    }
    /// Called before the filter is linked into `chain` under `name`.
    fn on_pre_add(&self, chain: &FilterChain, name: &str, next: &NextFilter) -> Result<()> {
        Ok(())
    }
    /// Called after the filter is linked into `chain`. An error unlinks it again.
    fn on_post_add(&self, chain: &FilterChain, name: &str, next: &NextFilter) -> Result<()> {
        Ok(())
    }
    /// Called before the filter is unlinked from `chain`.
    fn on_pre_remove(&self, chain: &FilterChain, name: &str, next: &NextFilter) -> Result<()> {
        Ok(())
    }
    /// Called after the filter is unlinked from `chain`.
    fn on_post_remove(&self, chain: &FilterChain, name: &str, next: &NextFilter) -> Result<()> {
        Ok(())
    }

    /// A session has been created, before it is opened.
    fn session_created(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        next.session_created(session);
        Ok(())
    }
    /// A session has been opened.
    fn session_opened(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        next.session_opened(session);
        Ok(())
    }
    /// A session has been closed.
    fn session_closed(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        next.session_closed(session);
        Ok(())
    }
    /// A session has been idle for the configured time.
    fn session_idle(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        status: IdleStatus,
    ) -> Result<()> {
        next.session_idle(session, status);
        Ok(())
    }
    /// An error was raised by a filter, the handler or the transport.
    fn exception_caught(&self, next: &NextFilter, session: &Arc<Session>, cause: Error) -> Result<()> {
        next.exception_caught(session, cause);
        Ok(())
    }
    /// The remote peer shut down its output half.
    fn input_closed(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        next.input_closed(session);
        Ok(())
    }
    /// A message has been received.
    fn message_received(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        message: Message,
    ) -> Result<()> {
        next.message_received(session, message);
        Ok(())
    }
    /// A write request has been written to the transport.
    fn message_sent(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        request: WriteRequest,
    ) -> Result<()> {
        next.message_sent(session, request);
        Ok(())
    }
    /// A write has been requested.
    fn filter_write(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        request: WriteRequest,
    ) -> Result<()> {
        next.filter_write(session, request);
        Ok(())
    }
    /// A close has been requested.
    fn filter_close(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        next.filter_close(session);
        Ok(())
    }
}

/// Forwards events from the entry it is bound to, to the adjacent entry of the chain.
#[derive(Clone)]
pub struct NextFilter {
    entry: Weak<Entry>,
}

impl NextFilter {
    pub(crate) fn new(entry: Weak<Entry>) -> Self {
        Self { entry }
    }

    fn next(&self) -> Option<Arc<Entry>> {
        self.entry.upgrade().and_then(|entry| entry.next_entry())
    }

    fn prev(&self) -> Option<Arc<Entry>> {
        self.entry.upgrade().and_then(|entry| entry.prev_entry())
    }

    /// Forwards `session_created`.
    pub fn session_created(&self, session: &Arc<Session>) {
        if let Some(next) = self.next() {
            chain::call_session_created(&next, session);
        }
    }

    /// Forwards `session_opened`.
    pub fn session_opened(&self, session: &Arc<Session>) {
        if let Some(next) = self.next() {
            chain::call_session_opened(&next, session);
        }
    }

    /// Forwards `session_closed`.
    pub fn session_closed(&self, session: &Arc<Session>) {
        if let Some(next) = self.next() {
            chain::call_session_closed(&next, session);
        }
    }

    /// Forwards `session_idle`.
    pub fn session_idle(&self, session: &Arc<Session>, status: IdleStatus) {
        if let Some(next) = self.next() {
            chain::call_session_idle(&next, session, status);
        }
    }

    /// Forwards `exception_caught`.
    pub fn exception_caught(&self, session: &Arc<Session>, cause: Error) {
        if let Some(next) = self.next() {
            chain::call_exception_caught(&next, session, cause);
        }
    }

    /// Forwards `input_closed`.
    pub fn input_closed(&self, session: &Arc<Session>) {
        if let Some(next) = self.next() {
            chain::call_input_closed(&next, session);
        }
    }

    /// Forwards `message_received`.
    pub fn message_received(&self, session: &Arc<Session>, message: Message) {
        if let Some(next) = self.next() {
            chain::call_message_received(&next, session, message);
        }
    }

    /// Forwards `message_sent`.
    pub fn message_sent(&self, session: &Arc<Session>, request: WriteRequest) {
        if let Some(next) = self.next() {
            chain::call_message_sent(&next, session, request);
        }
    }

    /// Forwards `filter_write` towards the head.
    pub fn filter_write(&self, session: &Arc<Session>, request: WriteRequest) {
        if let Some(prev) = self.prev() {
            chain::call_filter_write(&prev, session, request);
        }
    }

    /// Forwards `filter_close` towards the head.
    pub fn filter_close(&self, session: &Arc<Session>) {
        if let Some(prev) = self.prev() {
            chain::call_filter_close(&prev, session);
        }
    }
}

impl fmt::Debug for NextFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry.upgrade() {
            Some(entry) => write!(f, "NextFilter({})", entry.name()),
            None => write!(f, "NextFilter(detached)"),
        }
    }
}
