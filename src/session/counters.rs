use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::session::IdleStatus;

/// Totals sampled by a [ThroughputMeter]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Totals {
    /// Bytes read
    pub read_bytes: u64,
    /// Bytes written
    pub written_bytes: u64,
    /// Messages read
    pub read_messages: u64,
    /// Messages written
    pub written_messages: u64,
}

/// Per-second rates computed by a [ThroughputMeter]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Throughput {
    /// Bytes read per second
    pub read_bytes: f64,
    /// Bytes written per second
    pub written_bytes: f64,
    /// Messages read per second
    pub read_messages: f64,
    /// Messages written per second
    pub written_messages: f64,
}

struct MeterState {
    last_calculation: Instant,
    last_totals: Totals,
    throughput: Throughput,
}

/// Turns monotonically growing totals into per-second rates, recalculated at most once per
/// interval.
pub(crate) struct ThroughputMeter {
    state: Mutex<MeterState>,
}

impl ThroughputMeter {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            state: Mutex::new(MeterState {
                last_calculation: now,
                last_totals: Totals::default(),
                throughput: Throughput::default(),
            }),
        }
    }

    /// Returns true if the rates were recalculated
    pub(crate) fn update(&self, now: Instant, interval: Duration, force: bool, totals: Totals) -> bool {
        let mut state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.last_calculation);
        if interval.is_zero() || (!force && elapsed < interval) || elapsed.is_zero() {
            return false;
        }

        let secs = elapsed.as_secs_f64();
        let last = state.last_totals;
        state.throughput = Throughput {
            read_bytes: totals.read_bytes.saturating_sub(last.read_bytes) as f64 / secs,
            written_bytes: totals.written_bytes.saturating_sub(last.written_bytes) as f64 / secs,
            read_messages: totals.read_messages.saturating_sub(last.read_messages) as f64 / secs,
            written_messages: totals.written_messages.saturating_sub(last.written_messages) as f64
                / secs,
        };
        state.last_totals = totals;
        state.last_calculation = now;
        true
    }

    pub(crate) fn throughput(&self) -> Throughput {
        self.state.lock().throughput
    }

    pub(crate) fn last_calculation(&self) -> Instant {
        self.state.lock().last_calculation
    }

    pub(crate) fn clear(&self) {
        self.state.lock().throughput = Throughput::default();
    }
}

struct Times {
    last_read: Instant,
    last_write: Instant,
    last_idle: [Instant; 3],
}

/// Byte, message and idle accounting of one session
pub struct SessionCounters {
    creation_time: Instant,
    read_bytes: AtomicU64,
    written_bytes: AtomicU64,
    read_messages: AtomicU64,
    written_messages: AtomicU64,
    scheduled_write_bytes: AtomicI64,
    scheduled_write_messages: AtomicI64,
    idle_counts: [AtomicU64; 3],
    times: Mutex<Times>,
    meter: ThroughputMeter,
}

fn slot(status: IdleStatus) -> usize {
    match status {
        IdleStatus::ReaderIdle => 0,
        IdleStatus::WriterIdle => 1,
        IdleStatus::BothIdle => 2,
    }
}

impl SessionCounters {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            creation_time: now,
            read_bytes: AtomicU64::new(0),
            written_bytes: AtomicU64::new(0),
            read_messages: AtomicU64::new(0),
            written_messages: AtomicU64::new(0),
            scheduled_write_bytes: AtomicI64::new(0),
            scheduled_write_messages: AtomicI64::new(0),
            idle_counts: Default::default(),
            times: Mutex::new(Times {
                last_read: now,
                last_write: now,
                last_idle: [now; 3],
            }),
            meter: ThroughputMeter::new(now),
        }
    }

    /// Returns when the session was created
    pub fn creation_time(&self) -> Instant {
        self.creation_time
    }

    /// Returns the total bytes read
    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    /// Returns the total bytes written
    pub fn written_bytes(&self) -> u64 {
        self.written_bytes.load(Ordering::Relaxed)
    }

    /// Returns the number of messages delivered to the handler
    pub fn read_messages(&self) -> u64 {
        self.read_messages.load(Ordering::Relaxed)
    }

    /// Returns the number of messages fully written
    pub fn written_messages(&self) -> u64 {
        self.written_messages.load(Ordering::Relaxed)
    }

    /// Returns the bytes scheduled for writing but not yet written
    pub fn scheduled_write_bytes(&self) -> i64 {
        self.scheduled_write_bytes.load(Ordering::Relaxed)
    }

    /// Returns the messages scheduled for writing but not yet written
    pub fn scheduled_write_messages(&self) -> i64 {
        self.scheduled_write_messages.load(Ordering::Relaxed)
    }

    /// Returns how many consecutive idle events of `status` fired since the last I/O
    pub fn idle_count(&self, status: IdleStatus) -> u64 {
        self.idle_counts[slot(status)].load(Ordering::Relaxed)
    }

    /// Returns the time of the last read
    pub fn last_read_time(&self) -> Instant {
        self.times.lock().last_read
    }

    /// Returns the time of the last write
    pub fn last_write_time(&self) -> Instant {
        self.times.lock().last_write
    }

    /// Returns the later of the last read and last write times
    pub fn last_io_time(&self) -> Instant {
        let times = self.times.lock();
        times.last_read.max(times.last_write)
    }

    /// Returns when an idle event of `status` last fired, or the creation time
    pub fn last_idle_time(&self, status: IdleStatus) -> Instant {
        self.times.lock().last_idle[slot(status)]
    }

    /// Returns the last computed rates
    pub fn throughput(&self) -> Throughput {
        self.meter.throughput()
    }

    /// Returns when the rates were last computed
    pub fn last_throughput_calculation_time(&self) -> Instant {
        self.meter.last_calculation()
    }

    pub(crate) fn increase_read_bytes(&self, n: u64, now: Instant) {
        if n == 0 {
            return;
        }
        self.read_bytes.fetch_add(n, Ordering::Relaxed);
        self.times.lock().last_read = now;
        self.reset_idle(IdleStatus::ReaderIdle);
        self.reset_idle(IdleStatus::BothIdle);
    }

    pub(crate) fn increase_written_bytes(&self, n: u64, now: Instant) {
        if n == 0 {
            return;
        }
        self.written_bytes.fetch_add(n, Ordering::Relaxed);
        self.times.lock().last_write = now;
        self.reset_idle(IdleStatus::WriterIdle);
        self.reset_idle(IdleStatus::BothIdle);
        self.scheduled_write_bytes
            .fetch_sub(n as i64, Ordering::Relaxed);
    }

    pub(crate) fn increase_read_messages(&self, now: Instant) {
        self.read_messages.fetch_add(1, Ordering::Relaxed);
        self.times.lock().last_read = now;
    }

    pub(crate) fn increase_written_messages(&self, now: Instant) {
        self.written_messages.fetch_add(1, Ordering::Relaxed);
        self.times.lock().last_write = now;
        self.scheduled_write_messages.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn increase_scheduled_write_bytes(&self, n: i64) {
        self.scheduled_write_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn increase_scheduled_write_messages(&self) {
        self.scheduled_write_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decrease_scheduled_write_messages(&self) {
        self.scheduled_write_messages.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn increase_idle_count(&self, status: IdleStatus, now: Instant) {
        self.idle_counts[slot(status)].fetch_add(1, Ordering::Relaxed);
        self.times.lock().last_idle[slot(status)] = now;
    }

    fn reset_idle(&self, status: IdleStatus) {
        self.idle_counts[slot(status)].store(0, Ordering::Relaxed);
    }

    /// Drops what a closed session can no longer write and zeroes its rates
    pub(crate) fn reset_on_close(&self) {
        self.scheduled_write_bytes.store(0, Ordering::Relaxed);
        self.scheduled_write_messages.store(0, Ordering::Relaxed);
        self.meter.clear();
    }

    pub(crate) fn totals(&self) -> Totals {
        Totals {
            read_bytes: self.read_bytes(),
            written_bytes: self.written_bytes(),
            read_messages: self.read_messages(),
            written_messages: self.written_messages(),
        }
    }

    pub(crate) fn update_throughput(&self, now: Instant, interval: Duration, force: bool) -> bool {
        self.meter.update(now, interval, force, self.totals())
    }
}
