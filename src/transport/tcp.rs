use bytes::Bytes;
use dashmap::DashMap;
use futures_lite::AsyncReadExt;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use smol::Async;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use waitgroup::{WaitGroup, Worker};

use crate::error::{Error, Result};
use crate::future::ConnectFuture;
use crate::processor::{Processor, SimpleIoProcessor, Transport};
use crate::service::Service;
use crate::session::Session;

struct Socket {
    stream: Arc<Async<TcpStream>>,
    close_tx: async_broadcast::Sender<()>,
    interest_tx: async_broadcast::Sender<bool>,
    write_pending: Arc<AtomicBool>,
}

/// A [Transport] over non-blocking TCP streams. Each open session gets a reader task on the
/// smol executor.
#[derive(Default)]
pub struct TcpTransport {
    pending: DashMap<u64, (Async<TcpStream>, Option<Worker>)>,
    sockets: DashMap<u64, Socket>,
}

impl TcpTransport {
    /// Creates a new TcpTransport
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands a connected stream to the transport; [open](Transport::open) picks it up
    pub fn register(&self, session_id: u64, stream: Async<TcpStream>, worker: Option<Worker>) {
        self.pending.insert(session_id, (stream, worker));
    }

    /// Returns the number of open sockets
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// Returns true if no socket is open
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    fn stream(&self, session: &Session) -> Option<Arc<Async<TcpStream>>> {
        self.sockets
            .get(&session.id())
            .map(|socket| Arc::clone(&socket.stream))
    }

    async fn read_loop(
        session: Arc<Session>,
        stream: Arc<Async<TcpStream>>,
        mut close_rx: async_broadcast::Receiver<()>,
        mut interest_rx: async_broadcast::Receiver<bool>,
        worker: Option<Worker>,
    ) {
        let _w = worker;
        let mut reader: &Async<TcpStream> = &stream;
        let mut buf = vec![0u8; session.config().read_buffer_size()];

        loop {
            if session.is_read_suspended() {
                tokio::select! {
                    _ = close_rx.recv() => {
                        trace!("socket of session {} exit loop", session.id());
                        break;
                    }
                    _ = interest_rx.recv() => {
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = close_rx.recv() => {
                    trace!("socket of session {} exit loop", session.id());
                    break;
                }
                _ = interest_rx.recv() => {
                    continue;
                }
                res = reader.read(&mut buf) => {
                    let Some(processor) = session.processor() else {
                        break;
                    };
                    match res {
                        Ok(0) => {
                            trace!("socket of session {} read eof", session.id());
                            processor.input_closed(&session);
                            break;
                        }
                        Ok(n) => {
                            trace!("socket read {} bytes", n);
                            processor.read(&session, Bytes::copy_from_slice(&buf[..n]));
                        }
                        Err(err) => {
                            warn!("socket read error {}", err);
                            processor.exception(&session, err);
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    fn open(&self, session: &Arc<Session>) -> Result<()> {
        let (stream, worker) = self
            .pending
            .remove(&session.id())
            .map(|(_, pending)| pending)
            .ok_or_else(|| Error::from(io::Error::from(io::ErrorKind::NotConnected)))?;
        let stream = Arc::new(stream);

        let (close_tx, close_rx) = async_broadcast::broadcast(1);
        let (mut interest_tx, interest_rx) = async_broadcast::broadcast(1);
        interest_tx.set_overflow(true);

        self.sockets.insert(
            session.id(),
            Socket {
                stream: Arc::clone(&stream),
                close_tx,
                interest_tx,
                write_pending: Arc::new(AtomicBool::new(false)),
            },
        );

        smol::spawn(Self::read_loop(
            Arc::clone(session),
            stream,
            close_rx,
            interest_rx,
            worker,
        ))
        .detach();
        Ok(())
    }

    fn write(
        &self,
        session: &Arc<Session>,
        data: &[u8],
        _destination: Option<SocketAddr>,
    ) -> io::Result<usize> {
        let stream = self
            .stream(session)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let mut writer: &TcpStream = stream.get_ref();
        writer.write(data)
    }

    fn close(&self, session: &Arc<Session>) {
        if let Some((_, socket)) = self.sockets.remove(&session.id()) {
            let _ = socket.close_tx.try_broadcast(());
            socket.close_tx.close();
            if let Err(err) = socket.stream.get_ref().shutdown(Shutdown::Both) {
                trace!("shutdown of session {} socket: {}", session.id(), err);
            }
        }
        self.pending.remove(&session.id());
    }

    fn set_read_interest(&self, session: &Arc<Session>, interested: bool) {
        if let Some(socket) = self.sockets.get(&session.id()) {
            let _ = socket.interest_tx.try_broadcast(interested);
        }
    }

    fn set_write_interest(&self, session: &Arc<Session>, interested: bool) {
        if !interested {
            return;
        }
        let Some((stream, write_pending)) = self
            .sockets
            .get(&session.id())
            .map(|socket| (Arc::clone(&socket.stream), Arc::clone(&socket.write_pending)))
        else {
            return;
        };
        if write_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let session = Arc::clone(session);
        smol::spawn(async move {
            let res = stream.writable().await;
            write_pending.store(false, Ordering::Release);
            if let Err(err) = res {
                trace!("session {} never became writable: {}", session.id(), err);
            }
            if let Some(processor) = session.processor() {
                processor.flush(&session);
            }
        })
        .detach();
    }
}

/// Accepts TCP connections and serves them as sessions of a [Service]
pub struct TcpAcceptor {
    service: Arc<Service>,
    processor: Arc<SimpleIoProcessor<TcpTransport>>,
    close_tx: Mutex<Option<async_broadcast::Sender<()>>>,
    wg: Mutex<Option<WaitGroup>>,
}

impl TcpAcceptor {
    /// Creates a new TcpAcceptor whose sessions belong to `service`
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            service,
            processor: SimpleIoProcessor::new(TcpTransport::new()),
            close_tx: Mutex::new(None),
            wg: Mutex::new(None),
        }
    }

    /// Returns the service
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Returns the processor
    pub fn processor(&self) -> &Arc<SimpleIoProcessor<TcpTransport>> {
        &self.processor
    }

    /// Binds local address and port and starts accepting
    pub fn bind<A: ToSocketAddrs>(&self, addr: A) -> Result<SocketAddr> {
        let listener = Async::new(TcpListener::bind(addr)?)?;
        let local_addr = listener.get_ref().local_addr()?;

        let (close_tx, mut close_rx) = async_broadcast::broadcast(1);
        {
            let mut tx = self.close_tx.lock();
            *tx = Some(close_tx);
        }

        let worker = {
            let workgroup = WaitGroup::new();
            let worker = workgroup.worker();
            {
                let mut wg = self.wg.lock();
                *wg = Some(workgroup);
            }
            worker
        };

        let service = Arc::clone(&self.service);
        let processor = Arc::clone(&self.processor);
        smol::spawn(async move {
            let _w = worker;

            let child_wg = WaitGroup::new();
            loop {
                tokio::select! {
                    _ = close_rx.recv() => {
                        trace!("listener exit loop");
                        break;
                    }
                    res = listener.accept() => {
                        match res {
                            Ok((stream, remote_addr)) => {
                                let local_addr = stream.get_ref().local_addr().ok();
                                let session = service.new_session(
                                    processor.handle(),
                                    local_addr,
                                    Some(remote_addr),
                                );
                                debug!("accepted session {} from {}", session.id(), remote_addr);
                                processor
                                    .transport()
                                    .register(session.id(), stream, Some(child_wg.worker()));
                                processor.add(&session);
                            }
                            Err(err) => {
                                warn!("listener accept error {}", err);
                                break;
                            }
                        }
                    }
                }
            }
            child_wg.wait().await;
        })
        .detach();

        Ok(local_addr)
    }

    /// Gracefully stops accepting, closes every session and waits for their sockets
    pub async fn stop(&self) {
        {
            let mut close_tx = self.close_tx.lock();
            if let Some(close_tx) = close_tx.take() {
                let _ = close_tx.try_broadcast(());
            }
        }
        self.service.close_all_sessions(false);
        let wg = {
            let mut wg = self.wg.lock();
            wg.take()
        };
        if let Some(wg) = wg {
            wg.wait().await;
        }
    }
}

/// Connects to TCP peers and serves the connections as sessions of a [Service]
pub struct TcpConnector {
    service: Arc<Service>,
    processor: Arc<SimpleIoProcessor<TcpTransport>>,
}

impl TcpConnector {
    /// Creates a new TcpConnector whose sessions belong to `service`
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            service,
            processor: SimpleIoProcessor::new(TcpTransport::new()),
        }
    }

    /// Returns the service
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Returns the processor
    pub fn processor(&self) -> &Arc<SimpleIoProcessor<TcpTransport>> {
        &self.processor
    }

    /// Connects to the remote peer. The returned future resolves with the session once
    /// `session_created` has reached the handler.
    pub fn connect<A: ToSocketAddrs>(&self, addr: A) -> ConnectFuture {
        let future = ConnectFuture::new();
        let addr = match addr.to_socket_addrs().map(|mut addrs| addrs.next()) {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                future.set_exception(Error::from(io::Error::from(
                    io::ErrorKind::AddrNotAvailable,
                )));
                return future;
            }
            Err(err) => {
                future.set_exception(err.into());
                return future;
            }
        };

        let service = Arc::clone(&self.service);
        let processor = Arc::clone(&self.processor);
        let connect_future = future.clone();
        smol::spawn(async move {
            match Async::<TcpStream>::connect(addr).await {
                Ok(stream) => {
                    let local_addr = stream.get_ref().local_addr().ok();
                    let session = service.new_session(processor.handle(), local_addr, Some(addr));
                    debug!("connected session {} to {}", session.id(), addr);
                    session.set_connect_future(connect_future);
                    processor.transport().register(session.id(), stream, None);
                    processor.add(&session);
                }
                Err(err) => {
                    warn!("failed to connect to {}: {}", addr, err);
                    connect_future.set_exception(err.into());
                }
            }
        })
        .detach();

        future
    }
}
