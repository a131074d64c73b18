use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::session::counters::{ThroughputMeter, Totals};
use crate::session::Throughput;

/// Aggregated counters of every session a [Service](super::Service) has managed
pub struct ServiceStatistics {
    largest_managed_session_count: AtomicUsize,
    cumulative_managed_session_count: AtomicU64,
    read_bytes: AtomicU64,
    written_bytes: AtomicU64,
    read_messages: AtomicU64,
    written_messages: AtomicU64,
    throughput_calculation_interval: RwLock<Duration>,
    meter: ThroughputMeter,
}

impl ServiceStatistics {
    pub(crate) fn new(now: Instant, interval: Duration) -> Self {
        Self {
            largest_managed_session_count: AtomicUsize::new(0),
            cumulative_managed_session_count: AtomicU64::new(0),
            read_bytes: AtomicU64::new(0),
            written_bytes: AtomicU64::new(0),
            read_messages: AtomicU64::new(0),
            written_messages: AtomicU64::new(0),
            throughput_calculation_interval: RwLock::new(interval),
            meter: ThroughputMeter::new(now),
        }
    }

    /// Returns the most sessions managed at the same time
    pub fn largest_managed_session_count(&self) -> usize {
        self.largest_managed_session_count.load(Ordering::Relaxed)
    }

    /// Returns how many sessions have ever been managed
    pub fn cumulative_managed_session_count(&self) -> u64 {
        self.cumulative_managed_session_count.load(Ordering::Relaxed)
    }

    /// Returns the bytes read by every session
    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    /// Returns the bytes written by every session
    pub fn written_bytes(&self) -> u64 {
        self.written_bytes.load(Ordering::Relaxed)
    }

    /// Returns the messages read by every session
    pub fn read_messages(&self) -> u64 {
        self.read_messages.load(Ordering::Relaxed)
    }

    /// Returns the messages written by every session
    pub fn written_messages(&self) -> u64 {
        self.written_messages.load(Ordering::Relaxed)
    }

    /// Returns the last computed aggregate throughput
    pub fn throughput(&self) -> Throughput {
        self.meter.throughput()
    }

    /// Returns how often the aggregate throughput is recalculated
    pub fn throughput_calculation_interval(&self) -> Duration {
        *self.throughput_calculation_interval.read()
    }

    /// Sets how often the aggregate throughput is recalculated
    pub fn set_throughput_calculation_interval(&self, interval: Duration) {
        *self.throughput_calculation_interval.write() = interval;
    }

    /// Recomputes the aggregate throughput if the calculation interval has elapsed
    pub fn update_throughput(&self, now: Instant) -> bool {
        let totals = Totals {
            read_bytes: self.read_bytes(),
            written_bytes: self.written_bytes(),
            read_messages: self.read_messages(),
            written_messages: self.written_messages(),
        };
        self.meter
            .update(now, self.throughput_calculation_interval(), false, totals)
    }

    pub(crate) fn session_added(&self, managed: usize) {
        self.cumulative_managed_session_count
            .fetch_add(1, Ordering::Relaxed);
        self.largest_managed_session_count
            .fetch_max(managed, Ordering::Relaxed);
    }

    pub(crate) fn increase_read_bytes(&self, n: u64) {
        self.read_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn increase_written_bytes(&self, n: u64) {
        self.written_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn increase_read_messages(&self) {
        self.read_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increase_written_messages(&self) {
        self.written_messages.fetch_add(1, Ordering::Relaxed);
    }
}
