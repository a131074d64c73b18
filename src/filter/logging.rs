use log::{log, log_enabled, Level};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::filter::{Filter, FilterKind, NextFilter};
use crate::message::Message;
use crate::session::{IdleStatus, Session, WriteRequest};

/// Logs every event passing through it, at a configurable [Level] per event, then forwards
/// it unchanged.
pub struct LoggingFilter {
    target: String,
    session_created: Option<Level>,
    session_opened: Option<Level>,
    session_closed: Option<Level>,
    session_idle: Option<Level>,
    exception_caught: Option<Level>,
    input_closed: Option<Level>,
    message_received: Option<Level>,
    message_sent: Option<Level>,
    filter_write: Option<Level>,
    filter_close: Option<Level>,
}

impl Default for LoggingFilter {
    fn default() -> Self {
        Self::new("sluice::logging")
    }
}

impl LoggingFilter {
    /// Creates a new LoggingFilter logging to `target`. Exceptions log at `Warn`, everything
    /// else at `Info`.
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_owned(),
            session_created: Some(Level::Info),
            session_opened: Some(Level::Info),
            session_closed: Some(Level::Info),
            session_idle: Some(Level::Info),
            exception_caught: Some(Level::Warn),
            input_closed: Some(Level::Info),
            message_received: Some(Level::Info),
            message_sent: Some(Level::Info),
            filter_write: Some(Level::Debug),
            filter_close: Some(Level::Debug),
        }
    }

    /// Returns the log target
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Sets the level of `session_created`, `None` to silence it
    pub fn session_created_level(&mut self, level: Option<Level>) -> &mut Self {
        self.session_created = level;
        self
    }

    /// Sets the level of `session_opened`
    pub fn session_opened_level(&mut self, level: Option<Level>) -> &mut Self {
        self.session_opened = level;
        self
    }

    /// Sets the level of `session_closed`
    pub fn session_closed_level(&mut self, level: Option<Level>) -> &mut Self {
        self.session_closed = level;
        self
    }

    /// Sets the level of `session_idle`
    pub fn session_idle_level(&mut self, level: Option<Level>) -> &mut Self {
        self.session_idle = level;
        self
    }

    /// Sets the level of `exception_caught`
    pub fn exception_caught_level(&mut self, level: Option<Level>) -> &mut Self {
        self.exception_caught = level;
        self
    }

    /// Sets the level of `input_closed`
    pub fn input_closed_level(&mut self, level: Option<Level>) -> &mut Self {
        self.input_closed = level;
        self
    }

    /// Sets the level of `message_received`
    pub fn message_received_level(&mut self, level: Option<Level>) -> &mut Self {
        self.message_received = level;
        self
    }

    /// Sets the level of `message_sent`
    pub fn message_sent_level(&mut self, level: Option<Level>) -> &mut Self {
        self.message_sent = level;
        self
    }

    /// Sets the level of `filter_write`
    pub fn filter_write_level(&mut self, level: Option<Level>) -> &mut Self {
        self.filter_write = level;
        self
    }

    /// Sets the level of `filter_close`
    pub fn filter_close_level(&mut self, level: Option<Level>) -> &mut Self {
        self.filter_close = level;
        self
    }

    fn event(&self, level: Option<Level>, session: &Session, event: &str) {
        if let Some(level) = level {
            if log_enabled!(target: self.target.as_str(), level) {
                log!(target: self.target.as_str(), level, "[session {}] {}", session.id(), event);
            }
        }
    }
}

impl Filter for LoggingFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::new("sluice::logging")
    }

    fn session_created(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        self.event(self.session_created, session, "CREATED");
        next.session_created(session);
        Ok(())
    }

    fn session_opened(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        self.event(self.session_opened, session, "OPENED");
        next.session_opened(session);
        Ok(())
    }

    fn session_closed(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        self.event(self.session_closed, session, "CLOSED");
        next.session_closed(session);
        Ok(())
    }

    fn session_idle(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        status: IdleStatus,
    ) -> Result<()> {
        self.event(self.session_idle, session, &format!("IDLE {}", status));
        next.session_idle(session, status);
        Ok(())
    }

    fn exception_caught(&self, next: &NextFilter, session: &Arc<Session>, cause: Error) -> Result<()> {
        self.event(self.exception_caught, session, &format!("EXCEPTION: {}", cause));
        next.exception_caught(session, cause);
        Ok(())
    }

    fn input_closed(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        self.event(self.input_closed, session, "INPUT CLOSED");
        next.input_closed(session);
        Ok(())
    }

    fn message_received(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        message: Message,
    ) -> Result<()> {
        self.event(self.message_received, session, &format!("RECEIVED: {:?}", message));
        next.message_received(session, message);
        Ok(())
    }

    fn message_sent(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        request: WriteRequest,
    ) -> Result<()> {
        self.event(
            self.message_sent,
            session,
            &format!("SENT: {:?}", request.message()),
        );
        next.message_sent(session, request);
        Ok(())
    }

    fn filter_write(
        &self,
        next: &NextFilter,
        session: &Arc<Session>,
        request: WriteRequest,
    ) -> Result<()> {
        self.event(
            self.filter_write,
            session,
            &format!("WRITE: {:?}", request.message()),
        );
        next.filter_write(session, request);
        Ok(())
    }

    fn filter_close(&self, next: &NextFilter, session: &Arc<Session>) -> Result<()> {
        self.event(self.filter_close, session, "CLOSE");
        next.filter_close(session);
        Ok(())
    }
}
