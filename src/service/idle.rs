use log::{trace, warn};
use smol::Timer;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::service::Service;

/// Periodically sweeps every session of a [Service] for idleness and write timeouts on a
/// dedicated thread.
pub struct IdleStatusChecker {
    interval: Duration,
    close_tx: Option<async_broadcast::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Default for IdleStatusChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleStatusChecker {
    /// Creates a new IdleStatusChecker sweeping once per second
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(1),
            close_tx: None,
            handle: None,
        }
    }

    /// Sets the sweep interval; takes effect on the next [start](Self::start)
    pub fn interval(&mut self, interval: Duration) -> &mut Self {
        self.interval = interval;
        self
    }

    /// Returns true while the sweep thread runs
    pub fn is_running(&self) -> bool {
        self.close_tx.is_some()
    }

    /// Starts sweeping `service` until [stop](Self::stop) or until the service is dropped
    pub fn start(&mut self, service: Weak<Service>) -> std::io::Result<()> {
        self.stop();

        let (close_tx, mut close_rx) = async_broadcast::broadcast::<()>(1);
        let interval = self.interval;
        let handle = thread::Builder::new()
            .name("sluice-idle-checker".to_string())
            .spawn(move || {
                smol::block_on(async move {
                    loop {
                        tokio::select! {
                            _ = close_rx.recv() => {
                                trace!("idle checker exit loop");
                                break;
                            }
                            _ = Timer::after(interval) => {
                                let Some(service) = service.upgrade() else {
                                    trace!("idle checker lost its service");
                                    break;
                                };
                                service.notify_idleness(Instant::now());
                            }
                        }
                    }
                })
            })?;

        self.close_tx = Some(close_tx);
        self.handle = Some(handle);
        Ok(())
    }

    /// Stops sweeping and waits for the sweep thread, unless called from it
    pub fn stop(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.try_broadcast(());
            close_tx.close();
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("idle checker thread panicked");
            }
        }
    }
}

impl Drop for IdleStatusChecker {
    fn drop(&mut self) {
        self.stop();
    }
}
