//! A service owns the sessions of one acceptor or connector, and the handler, default session
//! config and filter chain builder they share.

pub mod idle;
pub mod statistics;


use dashmap::DashMap;
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use waitgroup::WaitGroup;

use crate::error::Result;
use crate::filter::FilterChainBuilder;
use crate::handler::Handler;
use crate::message::Message;
use crate::processor::Processor;
use crate::session::{Session, SessionConfig, WriteOutcome};

pub use idle::IdleStatusChecker;
pub use statistics::ServiceStatistics;

/// The registry of managed sessions and the settings new sessions are created with
pub struct Service {
    handler: Arc<dyn Handler>,
    session_config: RwLock<SessionConfig>,
    filter_chain_builder: RwLock<Arc<dyn FilterChainBuilder>>,
    sessions: DashMap<u64, Arc<Session>>,
    statistics: ServiceStatistics,
    idle_checker: Mutex<IdleStatusChecker>,
    activation_time: Instant,
    disposed: AtomicBool,
    me: Weak<Self>,
}

impl Service {
    /// Creates a new Service and starts its idle checker
    pub fn new(
        handler: Arc<dyn Handler>,
        session_config: SessionConfig,
        filter_chain_builder: Arc<dyn FilterChainBuilder>,
    ) -> Arc<Self> {
        let now = Instant::now();
        let service = Arc::new_cyclic(|me: &Weak<Service>| Service {
            handler,
            session_config: RwLock::new(session_config),
            filter_chain_builder: RwLock::new(filter_chain_builder),
            sessions: DashMap::new(),
            statistics: ServiceStatistics::new(
                now,
                session_config.throughput_calculation_interval(),
            ),
            idle_checker: Mutex::new(IdleStatusChecker::new()),
            activation_time: now,
            disposed: AtomicBool::new(false),
            me: me.clone(),
        });

        if let Err(err) = service
            .idle_checker
            .lock()
            .start(Arc::downgrade(&service))
        {
            warn!("failed to start idle checker: {}", err);
        }
        service
    }

    /// Returns the handler of every session
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Returns a copy of the config new sessions start with
    pub fn session_config(&self) -> SessionConfig {
        *self.session_config.read()
    }

    /// Changes the config new sessions start with
    pub fn configure_sessions<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionConfig),
    {
        f(&mut *self.session_config.write());
    }

    /// Returns the builder of every new session's filter chain
    pub fn filter_chain_builder(&self) -> Arc<dyn FilterChainBuilder> {
        Arc::clone(&self.filter_chain_builder.read())
    }

    /// Sets the builder of every new session's filter chain
    pub fn set_filter_chain_builder(&self, builder: Arc<dyn FilterChainBuilder>) {
        *self.filter_chain_builder.write() = builder;
    }

    /// Returns the statistics
    pub fn statistics(&self) -> &ServiceStatistics {
        &self.statistics
    }

    /// Returns when the service was created
    pub fn activation_time(&self) -> Instant {
        self.activation_time
    }

    /// Restarts the idle checker with a different sweep interval
    pub fn set_idle_check_interval(&self, interval: std::time::Duration) -> std::io::Result<()> {
        let mut checker = self.idle_checker.lock();
        checker.interval(interval);
        checker.start(self.me.clone())
    }

    /// Creates a session served by `processor` with a copy of the default session config.
    /// The session becomes managed once [fire_session_created](Self::fire_session_created)
    /// runs for it.
    pub fn new_session(
        &self,
        processor: Weak<dyn Processor>,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Arc<Session> {
        Session::create(
            self.me.clone(),
            Arc::clone(&self.handler),
            processor,
            self.session_config(),
            local_addr,
            remote_addr,
        )
    }

    /// Registers `session` and fires `session_created` then `session_opened`. Does nothing if
    /// the session is already managed.
    pub fn fire_session_created(&self, session: &Arc<Session>) {
        if self
            .sessions
            .insert(session.id(), Arc::clone(session))
            .is_some()
        {
            return;
        }
        self.statistics.session_added(self.sessions.len());
        debug!("session {} managed", session.id());

        let chain = session.filter_chain();
        chain.fire_session_created();
        chain.fire_session_opened();
    }

    /// Unregisters `session` and fires `session_closed`. A session that was never managed
    /// only has its close future completed.
    pub fn fire_session_destroyed(&self, session: &Arc<Session>) {
        if self.sessions.remove(&session.id()).is_none() {
            trace!("session {} was not managed", session.id());
            session.mark_closed();
            return;
        }
        debug!("session {} unmanaged", session.id());
        session.filter_chain().fire_session_closed();
    }

    /// Returns a snapshot of the managed sessions
    pub fn managed_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Returns the managed session with the given id
    pub fn managed_session(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Returns the number of managed sessions
    pub fn managed_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true while at least one session is managed
    pub fn is_active(&self) -> bool {
        !self.sessions.is_empty()
    }

    /// Writes `message` to every managed session
    pub fn broadcast(&self, message: impl Into<Message>) -> Vec<Result<WriteOutcome>> {
        let message = message.into();
        self.managed_sessions()
            .iter()
            .map(|session| session.write(message.clone()))
            .collect()
    }

    /// Closes every managed session immediately, optionally blocking until all of them have
    /// closed.
    pub fn close_all_sessions(&self, wait: bool) {
        let wg = WaitGroup::new();
        for session in self.managed_sessions() {
            let worker = wg.worker();
            session.close_future().add_listener(move || drop(worker));
            session.close_now();
        }
        if wait {
            smol::block_on(wg.wait());
        }
    }

    /// Runs the idle and write timeout checks of every managed session
    pub fn notify_idleness(&self, now: Instant) {
        for session in self.managed_sessions() {
            session.notify_idleness(now);
        }
    }

    /// Stops the idle checker and closes every session. Later calls are no-ops.
    pub fn dispose(&self, await_termination: bool) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("disposing service with {} sessions", self.sessions.len());
        self.idle_checker.lock().stop();
        self.close_all_sessions(await_termination);
    }

    /// Returns true once [dispose](Self::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
