use log::{debug, trace, warn};
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::filter::{Filter, FilterKind, NextFilter};
use crate::message::Message;
use crate::session::write_queue::WriteDispatch;
use crate::session::{IdleStatus, Session, WriteRequest};

const HEAD_NAME: &str = "head";
const TAIL_NAME: &str = "tail";

/// Kind tag of the head sentinel, which hands writes and closes to the processor
pub const HEAD_KIND: FilterKind = FilterKind::new("sluice::head");
/// Kind tag of the tail sentinel, which hands events to the handler
pub const TAIL_KIND: FilterKind = FilterKind::new("sluice::tail");

/// A named position in a [FilterChain]
pub struct Entry {
    name: String,
    filter: RwLock<Arc<dyn Filter>>,
    prev: RwLock<Weak<Entry>>,
    next: RwLock<Option<Arc<Entry>>>,
    next_filter: NextFilter,
}

impl Entry {
    fn new(name: &str, filter: Arc<dyn Filter>) -> Arc<Self> {
        Arc::new_cyclic(|me| Entry {
            name: name.to_owned(),
            filter: RwLock::new(filter),
            prev: RwLock::new(Weak::new()),
            next: RwLock::new(None),
            next_filter: NextFilter::new(me.clone()),
        })
    }

    /// Returns the name of the filter
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the filter
    pub fn filter(&self) -> Arc<dyn Filter> {
        Arc::clone(&self.filter.read())
    }

    /// Returns the kind tag of the filter
    pub fn kind(&self) -> FilterKind {
        self.filter.read().kind()
    }

    /// Returns the handle that forwards events from this entry
    pub fn next_filter(&self) -> &NextFilter {
        &self.next_filter
    }

    pub(crate) fn next_entry(&self) -> Option<Arc<Entry>> {
        self.next.read().clone()
    }

    pub(crate) fn prev_entry(&self) -> Option<Arc<Entry>> {
        self.prev.read().upgrade()
    }

    fn swap_filter(&self, filter: Arc<dyn Filter>) -> Arc<dyn Filter> {
        std::mem::replace(&mut *self.filter.write(), filter)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{})", self.name, self.kind())
    }
}

/// Iterates the user entries of a chain from head to tail
pub struct Entries {
    cursor: Option<Arc<Entry>>,
    tail: Arc<Entry>,
}

impl Iterator for Entries {
    type Item = Arc<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor.take()?;
        if Arc::ptr_eq(&current, &self.tail) {
            return None;
        }
        self.cursor = current.next_entry();
        Some(current)
    }
}

fn same_filter(a: &Arc<dyn Filter>, b: &Arc<dyn Filter>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// FilterChain is the ordered, mutable list of [Filter]s attached to one [Session], bounded by
/// a head entry that talks to the processor and a tail entry that talks to the handler.
///
/// Filters may be added, removed or replaced while events are flowing; an event that has
/// already entered a removed entry finishes its way through the chain.
pub struct FilterChain {
    session: Weak<Session>,
    head: Arc<Entry>,
    tail: Arc<Entry>,
    names: RwLock<HashMap<String, Arc<Entry>>>,
    mutation: ReentrantMutex<()>,
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterChain {
    /// Creates an empty FilterChain that is not bound to a session
    pub fn new() -> Self {
        Self::with_session(Weak::new())
    }

    pub(crate) fn with_session(session: Weak<Session>) -> Self {
        let head = Entry::new(HEAD_NAME, Arc::new(HeadFilter));
        let tail = Entry::new(TAIL_NAME, Arc::new(TailFilter));
        *head.next.write() = Some(Arc::clone(&tail));
        *tail.prev.write() = Arc::downgrade(&head);

        Self {
            session,
            head,
            tail,
            names: RwLock::new(HashMap::new()),
            mutation: ReentrantMutex::new(()),
        }
    }

    /// Returns the session this chain belongs to, if it is still alive
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }

    /// Returns the entry registered under `name`
    pub fn get_entry(&self, name: &str) -> Option<Arc<Entry>> {
        self.names.read().get(name).cloned()
    }

    /// Returns the entry holding exactly this filter instance
    pub fn get_entry_by_filter(&self, filter: &Arc<dyn Filter>) -> Option<Arc<Entry>> {
        self.get_all().find(|entry| same_filter(&entry.filter(), filter))
    }

    /// Returns the first entry whose filter has the given kind tag
    pub fn get_entry_by_kind(&self, kind: FilterKind) -> Option<Arc<Entry>> {
        self.get_all().find(|entry| entry.kind() == kind)
    }

    /// Returns the filter registered under `name`
    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.get_entry(name).map(|entry| entry.filter())
    }

    /// Returns the forwarding handle of the entry registered under `name`
    pub fn get_next_filter(&self, name: &str) -> Option<NextFilter> {
        self.get_entry(name).map(|entry| entry.next_filter().clone())
    }

    /// Returns true if a filter is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.names.read().contains_key(name)
    }

    /// Returns true if a filter of the given kind is in the chain
    pub fn contains_kind(&self, kind: FilterKind) -> bool {
        self.get_entry_by_kind(kind).is_some()
    }

    /// Returns the user entries in chain order. The iterator is lazy and finite; call again to
    /// restart.
    pub fn get_all(&self) -> Entries {
        Entries {
            cursor: self.head.next_entry(),
            tail: Arc::clone(&self.tail),
        }
    }

    /// Returns the number of user filters
    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    /// Returns true if no user filter is installed
    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }

    /// Inserts a filter at the first position of this chain.
    pub fn add_first(&self, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        let _guard = self.mutation.lock();
        self.check_add(name)?;
        self.register(&self.head, name, filter)
    }

    /// Appends a filter at the last position of this chain.
    pub fn add_last(&self, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        let _guard = self.mutation.lock();
        self.check_add(name)?;
        let prev = self
            .tail
            .prev_entry()
            .unwrap_or_else(|| Arc::clone(&self.head));
        self.register(&prev, name, filter)
    }

    /// Inserts a filter just before the entry named `base_name`.
    pub fn add_before(&self, base_name: &str, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        let _guard = self.mutation.lock();
        let base = self.check_old(base_name)?;
        self.check_add(name)?;
        let prev = base.prev_entry().unwrap_or_else(|| Arc::clone(&self.head));
        self.register(&prev, name, filter)
    }

    /// Inserts a filter just after the entry named `base_name`.
    pub fn add_after(&self, base_name: &str, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        let _guard = self.mutation.lock();
        let base = self.check_old(base_name)?;
        self.check_add(name)?;
        self.register(&base, name, filter)
    }

    /// Removes the filter named `name` and returns it.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Filter>> {
        let _guard = self.mutation.lock();
        let entry = self.check_old(name)?;
        self.deregister(&entry)?;
        Ok(entry.filter())
    }

    /// Removes the entry holding exactly this filter instance.
    pub fn remove_filter(&self, filter: &Arc<dyn Filter>) -> Result<()> {
        let _guard = self.mutation.lock();
        let entry = self
            .get_entry_by_filter(filter)
            .ok_or_else(|| Error::NotFound(filter.kind().name().to_owned()))?;
        self.deregister(&entry)
    }

    /// Replaces the filter named `name` and returns the old one. If the new filter fails its
    /// `on_post_add` hook the old filter is put back.
    pub fn replace(&self, name: &str, filter: Arc<dyn Filter>) -> Result<Arc<dyn Filter>> {
        let _guard = self.mutation.lock();
        let entry = self.check_old(name)?;
        let old = entry.filter();

        filter
            .init()
            .map_err(|e| self.lifecycle_error(name, &filter, "init", e))?;
        if let Err(e) = filter.on_pre_add(self, name, entry.next_filter()) {
            self.destroy_quietly(name, &filter);
            return Err(self.lifecycle_error(name, &filter, "on_pre_add", e));
        }
        if let Err(e) = old.on_pre_remove(self, name, entry.next_filter()) {
            self.destroy_quietly(name, &filter);
            return Err(self.lifecycle_error(name, &old, "on_pre_remove", e));
        }

        entry.swap_filter(Arc::clone(&filter));

        if let Err(e) = filter.on_post_add(self, name, entry.next_filter()) {
            entry.swap_filter(Arc::clone(&old));
            self.destroy_quietly(name, &filter);
            return Err(self.lifecycle_error(name, &filter, "on_post_add", e));
        }

        debug!("replaced filter {} with {}", name, filter.kind());
        old.on_post_remove(self, name, entry.next_filter())
            .map_err(|e| self.lifecycle_error(name, &old, "on_post_remove", e))?;
        old.destroy()
            .map_err(|e| self.lifecycle_error(name, &old, "destroy", e))?;
        Ok(old)
    }

    /// Removes every filter. Removal continues past hook failures; the first one is returned.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.mutation.lock();
        let mut first_error = None;
        let entries: Vec<Arc<Entry>> = self.get_all().collect();
        for entry in entries {
            let filter = entry.filter();
            let name = entry.name();
            let pre = filter.on_pre_remove(self, name, entry.next_filter());
            self.unregister(&entry);
            let post = filter.on_post_remove(self, name, entry.next_filter());
            let destroyed = filter.destroy();

            let failures = [
                ("on_pre_remove", pre),
                ("on_post_remove", post),
                ("destroy", destroyed),
            ];
            for (phase, result) in failures {
                if let Err(e) = result {
                    let err = self.lifecycle_error(name, &filter, phase, e);
                    warn!("clear(): {}", err);
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_add(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Err(Error::DuplicateName(name.to_owned()))
        } else {
            Ok(())
        }
    }

    fn check_old(&self, name: &str) -> Result<Arc<Entry>> {
        self.get_entry(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))
    }

    fn register(&self, prev: &Arc<Entry>, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        let entry = Entry::new(name, Arc::clone(&filter));

        filter
            .init()
            .map_err(|e| self.lifecycle_error(name, &filter, "init", e))?;
        if let Err(e) = filter.on_pre_add(self, name, entry.next_filter()) {
            self.destroy_quietly(name, &filter);
            return Err(self.lifecycle_error(name, &filter, "on_pre_add", e));
        }

        Self::link(prev, &entry);
        self.names
            .write()
            .insert(name.to_owned(), Arc::clone(&entry));

        if let Err(e) = filter.on_post_add(self, name, entry.next_filter()) {
            self.unregister(&entry);
            self.destroy_quietly(name, &filter);
            return Err(self.lifecycle_error(name, &filter, "on_post_add", e));
        }

        trace!("added filter {} ({})", name, filter.kind());
        Ok(())
    }

    fn deregister(&self, entry: &Arc<Entry>) -> Result<()> {
        let filter = entry.filter();
        let name = entry.name();
        filter
            .on_pre_remove(self, name, entry.next_filter())
            .map_err(|e| self.lifecycle_error(name, &filter, "on_pre_remove", e))?;

        self.unregister(entry);

        let post = filter.on_post_remove(self, name, entry.next_filter());
        let destroyed = filter.destroy();
        trace!("removed filter {} ({})", name, filter.kind());
        post.map_err(|e| self.lifecycle_error(name, &filter, "on_post_remove", e))?;
        destroyed.map_err(|e| self.lifecycle_error(name, &filter, "destroy", e))
    }

    fn link(prev: &Arc<Entry>, entry: &Arc<Entry>) {
        let next = prev.next_entry();
        *entry.prev.write() = Arc::downgrade(prev);
        *entry.next.write() = next.clone();
        if let Some(next) = &next {
            *next.prev.write() = Arc::downgrade(entry);
        }
        *prev.next.write() = Some(Arc::clone(entry));
    }

    // The unlinked entry keeps its own pointers so an event inside it can still move on.
    fn unregister(&self, entry: &Arc<Entry>) {
        let prev = entry.prev_entry();
        let next = entry.next_entry();
        if let Some(prev) = &prev {
            *prev.next.write() = next.clone();
        }
        if let Some(next) = &next {
            *next.prev.write() = prev.as_ref().map(Arc::downgrade).unwrap_or_default();
        }
        self.names.write().remove(entry.name());
    }

    fn destroy_quietly(&self, name: &str, filter: &Arc<dyn Filter>) {
        if let Err(err) = filter.destroy() {
            warn!("destroy() of {}:{} failed: {}", name, filter.kind(), err);
        }
    }

    fn lifecycle_error(
        &self,
        name: &str,
        filter: &Arc<dyn Filter>,
        phase: &'static str,
        cause: Error,
    ) -> Error {
        Error::FilterLifecycle {
            name: name.to_owned(),
            filter: filter.kind().name(),
            session_id: self.session().map(|s| s.id()),
            phase,
            cause: Box::new(cause),
        }
    }

    /// Fires `session_created` from the head.
    pub fn fire_session_created(&self) {
        if let Some(session) = self.session() {
            call_session_created(&self.head, &session);
        }
    }

    /// Fires `session_opened` from the head.
    pub fn fire_session_opened(&self) {
        if let Some(session) = self.session() {
            call_session_opened(&self.head, &session);
        }
    }

    /// Completes the close future, then fires `session_closed` from the head.
    pub fn fire_session_closed(&self) {
        if let Some(session) = self.session() {
            session.mark_closed();
            call_session_closed(&self.head, &session);
        }
    }

    /// Counts the idle event, then fires `session_idle` from the head.
    pub fn fire_session_idle(&self, status: IdleStatus) {
        self.fire_session_idle_at(status, Instant::now());
    }

    pub(crate) fn fire_session_idle_at(&self, status: IdleStatus, now: Instant) {
        if let Some(session) = self.session() {
            session.increase_idle_count(status, now);
            call_session_idle(&self.head, &session, status);
        }
    }

    /// Fires `exception_caught` from the head, or fails the pending connect future instead if
    /// the session has not been handed to the handler yet.
    pub fn fire_exception_caught(&self, cause: Error) {
        if let Some(session) = self.session() {
            if let Some(future) = session.take_connect_future() {
                debug!(
                    "session {} failed before creation completed: {}",
                    session.id(),
                    cause
                );
                future.set_exception(cause);
                session.close_now();
                return;
            }
            call_exception_caught(&self.head, &session, cause);
        }
    }

    /// Fires `input_closed` from the head unless the session is already closing.
    pub fn fire_input_closed(&self) {
        if let Some(session) = self.session() {
            if session.is_closing() {
                trace!("input_closed ignored on closing session {}", session.id());
                return;
            }
            call_input_closed(&self.head, &session);
        }
    }

    /// Accounts read bytes, then fires `message_received` from the head.
    pub fn fire_message_received(&self, message: Message) {
        if let Some(session) = self.session() {
            if let Message::Buffer(buf) = &message {
                session.increase_read_bytes(bytes::Buf::remaining(buf) as u64, Instant::now());
            }
            call_message_received(&self.head, &session, message);
        }
    }

    /// Marks the request's future written, then fires `message_sent` from the head.
    pub fn fire_message_sent(&self, request: WriteRequest) {
        if let Some(session) = self.session() {
            request.future().set_written();
            call_message_sent(&self.head, &session, request);
        }
    }

    /// Fires `filter_write` from the tail.
    pub fn fire_filter_write(&self, request: WriteRequest) {
        if let Some(session) = self.session() {
            call_filter_write(&self.tail, &session, request);
        } else {
            request
                .future()
                .set_exception(Error::WriteToClosedSession);
        }
    }

    /// Fires `filter_close` from the tail.
    pub fn fire_filter_close(&self) {
        if let Some(session) = self.session() {
            call_filter_close(&self.tail, &session);
        }
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.get_all()).finish()
    }
}

pub(crate) fn call_session_created(entry: &Arc<Entry>, session: &Arc<Session>) {
    if let Err(cause) = entry.filter().session_created(entry.next_filter(), session) {
        session.filter_chain().fire_exception_caught(cause);
    }
}

pub(crate) fn call_session_opened(entry: &Arc<Entry>, session: &Arc<Session>) {
    if let Err(cause) = entry.filter().session_opened(entry.next_filter(), session) {
        session.filter_chain().fire_exception_caught(cause);
    }
}

pub(crate) fn call_session_closed(entry: &Arc<Entry>, session: &Arc<Session>) {
    if let Err(cause) = entry.filter().session_closed(entry.next_filter(), session) {
        session.filter_chain().fire_exception_caught(cause);
    }
}

pub(crate) fn call_session_idle(entry: &Arc<Entry>, session: &Arc<Session>, status: IdleStatus) {
    if let Err(cause) = entry
        .filter()
        .session_idle(entry.next_filter(), session, status)
    {
        session.filter_chain().fire_exception_caught(cause);
    }
}

pub(crate) fn call_exception_caught(entry: &Arc<Entry>, session: &Arc<Session>, cause: Error) {
    if let Err(err) = entry
        .filter()
        .exception_caught(entry.next_filter(), session, cause)
    {
        warn!(
            "unexpected error from exception_caught of {} in session {}: {}",
            entry.name(),
            session.id(),
            err
        );
    }
}

pub(crate) fn call_input_closed(entry: &Arc<Entry>, session: &Arc<Session>) {
    if let Err(cause) = entry.filter().input_closed(entry.next_filter(), session) {
        session.filter_chain().fire_exception_caught(cause);
    }
}

pub(crate) fn call_message_received(entry: &Arc<Entry>, session: &Arc<Session>, message: Message) {
    if let Err(cause) = entry
        .filter()
        .message_received(entry.next_filter(), session, message)
    {
        session.filter_chain().fire_exception_caught(cause);
    }
}

pub(crate) fn call_message_sent(entry: &Arc<Entry>, session: &Arc<Session>, request: WriteRequest) {
    if let Err(cause) = entry
        .filter()
        .message_sent(entry.next_filter(), session, request)
    {
        session.filter_chain().fire_exception_caught(cause);
    }
}

pub(crate) fn call_filter_write(entry: &Arc<Entry>, session: &Arc<Session>, request: WriteRequest) {
    let future = request.future().clone();
    let dispatch = WriteDispatch::enter();
    let result = entry
        .filter()
        .filter_write(entry.next_filter(), session, request);
    if let Err(cause) = &result {
        future.set_exception(cause.clone());
    }
    drop(dispatch);

    if let Err(cause) = result {
        session.filter_chain().fire_exception_caught(cause);
    }
}

pub(crate) fn call_filter_close(entry: &Arc<Entry>, session: &Arc<Session>) {
    if let Err(cause) = entry.filter().filter_close(entry.next_filter(), session) {
        session.filter_chain().fire_exception_caught(cause);
    }
}

struct HeadFilter;

impl Filter for HeadFilter {
    fn kind(&self) -> FilterKind {
        HEAD_KIND
    }

    fn filter_write(
        &self,
        _next: &NextFilter,
        session: &Arc<Session>,
        mut request: WriteRequest,
    ) -> Result<()> {
        if let Some(buf) = request.message_mut().as_buffer_mut() {
            buf.mark();
        }
        let remaining = request.message().remaining_bytes();
        if remaining > 0 {
            session.increase_scheduled_write_bytes(remaining as i64);
        }
        session.increase_scheduled_write_messages();

        let queue = session.write_request_queue();
        if session.is_write_suspended() {
            queue.offer(request);
            return Ok(());
        }

        let processor = session.processor().ok_or(Error::WriteToClosedSession)?;
        if queue.is_empty() {
            processor.write(session, request);
        } else {
            queue.offer(request);
            processor.flush(session);
        }
        Ok(())
    }

    fn filter_close(&self, _next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        match session.processor() {
            Some(processor) => processor.remove(session),
            None => {
                warn!(
                    "session {} has no processor, releasing it in place",
                    session.id()
                );
                session.release(|_| {});
            }
        }
        Ok(())
    }
}

struct TailFilter;

impl Filter for TailFilter {
    fn kind(&self) -> FilterKind {
        TAIL_KIND
    }

    fn session_created(&self, _next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        let result = session.handler().session_created(session);
        if let Some(future) = session.take_connect_future() {
            future.set_session(Arc::clone(session));
        }
        result
    }

    fn session_opened(&self, _next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        session.handler().session_opened(session)
    }

    fn session_closed(&self, _next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        let handled = session.handler().session_closed(session);
        session.write_request_queue().dispose();
        session.attributes().dispose();
        let cleared = session.filter_chain().clear();
        handled.and(cleared)
    }

    fn session_idle(
        &self,
        _next: &NextFilter,
        session: &Arc<Session>,
        status: IdleStatus,
    ) -> Result<()> {
        session.handler().session_idle(session, status)
    }

    fn exception_caught(&self, _next: &NextFilter, session: &Arc<Session>, cause: Error) -> Result<()> {
        session.handler().exception_caught(session, &cause)
    }

    fn input_closed(&self, _next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        session.handler().input_closed(session)
    }

    fn message_received(
        &self,
        _next: &NextFilter,
        session: &Arc<Session>,
        message: Message,
    ) -> Result<()> {
        let now = Instant::now();
        session.increase_read_messages(now);
        if let Some(service) = session.service() {
            service.statistics().update_throughput(now);
        }
        session.handler().message_received(session, message)
    }

    fn message_sent(
        &self,
        _next: &NextFilter,
        session: &Arc<Session>,
        request: WriteRequest,
    ) -> Result<()> {
        let now = Instant::now();
        session.increase_written_messages(now);
        if let Some(service) = session.service() {
            service.statistics().update_throughput(now);
        }
        session.handler().message_sent(session, request.message())
    }
}
