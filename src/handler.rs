//! Application callbacks at the end of the filter chain

use log::warn;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::{IdleStatus, Session};

/// Handles the events that reach the tail of a session's [FilterChain](crate::filter::FilterChain).
///
/// An `Err` returned from any callback except `exception_caught` is fed back into the chain
/// as an `exception_caught` event.
#[allow(unused_variables)]
pub trait Handler: Send + Sync + 'static {
    /// A session has been created and its chain built.
    fn session_created(&self, session: &Arc<Session>) -> Result<()> {
        Ok(())
    }
    /// A session has been opened.
    fn session_opened(&self, session: &Arc<Session>) -> Result<()> {
        Ok(())
    }
    /// A session has been closed.
    fn session_closed(&self, session: &Arc<Session>) -> Result<()> {
        Ok(())
    }
    /// A session has been idle for its configured idle time.
    fn session_idle(&self, session: &Arc<Session>, status: IdleStatus) -> Result<()> {
        Ok(())
    }
    /// An error reached the end of the chain.
    fn exception_caught(&self, session: &Arc<Session>, cause: &Error) -> Result<()> {
        warn!("session {} exception_caught: {}", session.id(), cause);
        Ok(())
    }
    /// The remote peer shut down its output half. Closes the session by default.
    fn input_closed(&self, session: &Arc<Session>) -> Result<()> {
        session.close_now();
        Ok(())
    }
    /// A message has been received.
    fn message_received(&self, session: &Arc<Session>, message: Message) -> Result<()> {
        Ok(())
    }
    /// A message has been written to the transport.
    fn message_sent(&self, session: &Arc<Session>, message: &Message) -> Result<()> {
        Ok(())
    }
}
