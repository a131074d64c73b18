use anyhow::Result;
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::mock_test::{new_session, RecordingHandler};
use crate::processor::Processor;
use crate::session::{IdleStatus, SessionConfig, WriteOutcome};

#[test]
fn test_session_config_defaults() {
    let config = SessionConfig::default();
    assert_eq!(2048, config.read_buffer_size());
    assert_eq!(3072, config.max_write_bytes_per_flush());
    assert_eq!(Duration::from_secs(60), config.write_timeout());
    assert_eq!(
        Duration::from_secs(3),
        config.throughput_calculation_interval()
    );
    for status in [
        IdleStatus::ReaderIdle,
        IdleStatus::WriterIdle,
        IdleStatus::BothIdle,
    ] {
        assert!(config.idle_time(status).is_zero());
    }
}

#[test]
fn test_session_ids_are_unique() {
    let (_p1, s1) = new_session(Arc::new(RecordingHandler::default()), SessionConfig::default());
    let (_p2, s2) = new_session(Arc::new(RecordingHandler::default()), SessionConfig::default());
    assert_ne!(s1.id(), s2.id());
}

#[test]
fn test_session_write_empty_buffer() {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(handler, SessionConfig::default());

    let result = session.write(Bytes::new());
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(0, processor.transport().writes.load(Ordering::SeqCst));
    assert_eq!(0, session.scheduled_write_messages());
}

#[test]
fn test_session_write_after_close() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    session.close_now();
    let outcome = session.write(Bytes::from_static(b"late"))?;
    assert!(!outcome.is_scheduled());
    assert_eq!(
        Some(Error::WriteToClosedSession),
        outcome.future().exception()
    );
    match outcome {
        WriteOutcome::Closed(request) => {
            assert_eq!(4, request.message().remaining_bytes());
        }
        WriteOutcome::Scheduled(_) => panic!("write to a closed session was scheduled"),
    }
    assert!(processor.transport().written().is_empty());
    Ok(())
}

#[test]
fn test_session_close_now_runs_once() {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());
    assert!(session.is_active());

    let first = session.close_now();
    let second = session.close(true);

    assert!(first.is_closed());
    assert!(second.is_closed());
    assert!(session.is_closing());
    assert!(!session.is_connected());
    assert!(session.is_destroyed());
    assert_eq!(1, processor.transport().closed.load(Ordering::SeqCst));
    assert_eq!(
        1,
        handler.events().iter().filter(|e| *e == "closed").count()
    );
}

#[test]
fn test_session_close_listener() {
    let handler = Arc::new(RecordingHandler::default());
    let (_processor, session) = new_session(handler, SessionConfig::default());

    let notified = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&notified);
    session
        .close_future()
        .add_listener(move || flag.store(true, Ordering::SeqCst));
    assert!(!notified.load(Ordering::SeqCst));

    session.close_now();
    assert!(notified.load(Ordering::SeqCst));
}

#[test]
fn test_session_close_now_fails_pending_writes() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(handler, SessionConfig::default());
    processor.transport().set_capacity(Some(2));

    let first = session.write(Bytes::from_static(b"abcd"))?;
    let second = session.write(Bytes::from_static(b"efgh"))?;
    assert!(!first.future().is_done());
    assert!(!second.future().is_done());

    session.close_now();
    assert_eq!(
        Some(Error::WriteToClosedSession),
        first.future().exception()
    );
    assert_eq!(
        Some(Error::WriteToClosedSession),
        second.future().exception()
    );
    assert_eq!(b"ab".to_vec(), processor.transport().written());
    Ok(())
}

#[test]
fn test_session_close_on_flush() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());
    processor.transport().set_capacity(Some(2));

    let outcome = session.write(Bytes::from_static(b"abcd"))?;
    let closed = session.close_on_flush();
    assert!(!closed.is_closed());
    assert!(!session.is_closing());

    processor.transport().set_capacity(None);
    processor.flush(&session);

    assert!(outcome.future().is_written());
    assert!(closed.is_closed());
    assert_eq!(b"abcd".to_vec(), processor.transport().written());
    assert_eq!(
        vec!["created", "opened", "sent", "closed"],
        handler.events()
    );
    Ok(())
}

#[test]
fn test_session_close_on_flush_keeps_queue_order() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());
    processor.transport().set_capacity(Some(0));

    let m1 = session.write(Bytes::from_static(b"m1"))?;
    let m2 = session.write(Bytes::from_static(b"m2"))?;
    let closed = session.close_on_flush();
    let late = session.write(Bytes::from_static(b"late"))?;
    assert!(processor.transport().written().is_empty());
    assert!(!closed.is_closed());
    assert!(!late.future().is_done());

    processor.transport().set_capacity(None);
    processor.flush(&session);

    assert_eq!(b"m1m2".to_vec(), processor.transport().written());
    assert!(m1.future().is_written());
    assert!(m2.future().is_written());
    assert_eq!(Some(Error::WriteToClosedSession), late.future().exception());
    assert!(closed.is_closed());
    Ok(())
}

#[test]
fn test_session_close_resets_counters() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(handler, SessionConfig::default());
    processor.transport().set_capacity(Some(0));
    let start = Instant::now();

    processor.read(&session, Bytes::from(vec![0u8; 300]));
    assert!(session.update_throughput(start + Duration::from_secs(4), false));
    assert!(session.throughput().read_bytes > 0.0);

    session.write(Bytes::from_static(b"abcd"))?;
    session.write(Bytes::from_static(b"efgh"))?;
    assert_eq!(8, session.scheduled_write_bytes());
    assert_eq!(2, session.scheduled_write_messages());

    assert!(session.close_now().is_closed());
    assert_eq!(0, session.scheduled_write_bytes());
    assert_eq!(0, session.scheduled_write_messages());
    assert_eq!(0.0, session.throughput().read_bytes);
    assert_eq!(300, session.read_bytes());
    Ok(())
}

#[test]
fn test_session_close_on_flush_without_pending_writes() {
    let handler = Arc::new(RecordingHandler::default());
    let (_processor, session) = new_session(handler, SessionConfig::default());

    let closed = session.close(false);
    assert!(closed.is_closed());
}

#[test]
fn test_session_idle_events() {
    let handler = Arc::new(RecordingHandler::default());
    let mut config = SessionConfig::default();
    config
        .set_idle_time(IdleStatus::BothIdle, Duration::from_secs(10))
        .set_idle_time(IdleStatus::ReaderIdle, Duration::from_secs(30));
    let (processor, session) = new_session(Arc::clone(&handler), config);
    let start = Instant::now();

    session.notify_idleness(start + Duration::from_secs(5));
    assert!(!session.is_idle(IdleStatus::BothIdle));

    session.notify_idleness(start + Duration::from_secs(11));
    assert_eq!(1, session.idle_count(IdleStatus::BothIdle));
    assert_eq!(0, session.idle_count(IdleStatus::ReaderIdle));

    // not again until another idle period has passed since the last event
    session.notify_idleness(start + Duration::from_secs(15));
    assert_eq!(1, session.idle_count(IdleStatus::BothIdle));

    session.notify_idleness(start + Duration::from_secs(22));
    assert_eq!(2, session.idle_count(IdleStatus::BothIdle));

    processor.read(&session, Bytes::from_static(b"wake"));
    assert!(!session.is_idle(IdleStatus::BothIdle));

    assert_eq!(
        2,
        handler
            .events()
            .iter()
            .filter(|e| *e == "idle both idle")
            .count()
    );
    assert_eq!(0, session.idle_count(IdleStatus::WriterIdle));
}

#[test]
fn test_session_reader_idle_resets_on_read() {
    let handler = Arc::new(RecordingHandler::default());
    let mut config = SessionConfig::default();
    config.set_idle_time(IdleStatus::ReaderIdle, Duration::from_secs(10));
    let (processor, session) = new_session(Arc::clone(&handler), config);

    session.notify_idleness(Instant::now() + Duration::from_secs(11));
    assert_eq!(1, session.idle_count(IdleStatus::ReaderIdle));
    assert!(session.is_idle(IdleStatus::ReaderIdle));
    assert_eq!(
        vec!["created", "opened", "idle reader idle"],
        handler.events()
    );

    processor.read(&session, Bytes::from_static(b"ping"));
    assert_eq!(0, session.idle_count(IdleStatus::ReaderIdle));
    assert!(!session.is_idle(IdleStatus::ReaderIdle));
}

#[test]
fn test_session_write_timeout() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());
    processor.transport().set_capacity(Some(2));

    let stuck = session.write(Bytes::from_static(b"abcd"))?;
    let queued = session.write(Bytes::from_static(b"efgh"))?;

    session.notify_idleness(Instant::now() + Duration::from_secs(30));
    assert!(!stuck.future().is_done());

    session.notify_idleness(Instant::now() + Duration::from_secs(61));
    assert_eq!(Some(Error::WriteTimeout), stuck.future().exception());
    assert_eq!(
        Some(Error::WriteToClosedSession),
        queued.future().exception()
    );
    assert_eq!(vec![Error::WriteTimeout], *handler.exceptions.lock());
    assert!(session.close_future().is_closed());
    Ok(())
}

#[test]
fn test_session_write_timeout_disabled() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let mut config = SessionConfig::default();
    config.set_write_timeout(Duration::ZERO);
    let (processor, session) = new_session(handler, config);
    processor.transport().set_capacity(Some(0));

    let first = session.write(Bytes::from_static(b"abcd"))?;
    session.write(Bytes::from_static(b"efgh"))?;
    session.notify_idleness(Instant::now() + Duration::from_secs(3600));

    assert!(!first.future().is_done());
    assert!(session.is_active());
    Ok(())
}

#[test]
fn test_session_throughput_interval() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(handler, SessionConfig::default());
    let start = Instant::now();

    processor.read(&session, Bytes::from(vec![0u8; 300]));
    assert!(!session.update_throughput(start + Duration::from_secs(1), false));
    assert_eq!(0.0, session.throughput().read_bytes);

    assert!(session.update_throughput(start + Duration::from_secs(4), false));
    assert!(session.throughput().read_bytes > 0.0);

    // forcing recomputes inside the interval
    assert!(session.update_throughput(start + Duration::from_secs(5), true));
    Ok(())
}

#[test]
fn test_session_suspend_and_resume() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(handler, SessionConfig::default());

    session.suspend_read();
    assert!(session.is_read_suspended());
    assert_eq!(Some(false), *processor.transport().read_interest.lock());
    session.resume_read();
    assert_eq!(Some(true), *processor.transport().read_interest.lock());

    session.suspend_write();
    let outcome = session.write(Bytes::from_static(b"held"))?;
    assert!(!outcome.future().is_done());
    assert_eq!(1, session.write_request_queue().len());
    assert_eq!(4, session.scheduled_write_bytes());

    session.resume_write();
    assert!(outcome.future().is_written());
    assert_eq!(b"held".to_vec(), processor.transport().written());
    assert_eq!(0, session.scheduled_write_bytes());
    Ok(())
}

#[test]
fn test_session_cancelled_write_is_skipped() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    session.suspend_write();
    let cancelled = session.write(Bytes::from_static(b"drop"))?;
    let kept = session.write(Bytes::from_static(b"keep"))?;
    assert!(cancelled.future().cancel());
    assert!(cancelled.future().is_cancelled());

    session.resume_write();
    assert_eq!(Some(Error::Cancelled), cancelled.future().exception());
    assert!(kept.future().is_written());
    assert!(!kept.future().cancel());
    assert_eq!(b"keep".to_vec(), processor.transport().written());
    assert_eq!(0, session.scheduled_write_bytes());
    assert_eq!(0, session.scheduled_write_messages());
    assert_eq!(1, session.written_messages());
    Ok(())
}

#[test]
fn test_session_attributes() {
    let handler = Arc::new(RecordingHandler::default());
    let (_processor, session) = new_session(handler, SessionConfig::default());

    assert!(session.set_attribute("user", "alice".to_string()).is_none());
    assert!(session
        .set_attribute_if_absent("user", "bob".to_string())
        .is_some());
    assert_eq!(
        Some("alice".to_string()),
        session.get_attribute::<String>("user").map(|v| (*v).clone())
    );
    assert!(session.get_attribute::<u32>("user").is_none());

    session.set_attribute("hits", 3u32);
    assert!(session.remove_attribute("hits").is_some());
    assert!(!session.contains_attribute("hits"));

    session.close_now();
    assert!(!session.contains_attribute("user"));
    assert!(session.attributes().is_empty());
}

#[test]
fn test_session_configure() {
    let handler = Arc::new(RecordingHandler::default());
    let (_processor, session) = new_session(handler, SessionConfig::default());

    session.configure(|config| {
        config.set_read_buffer_size(64);
    });
    assert_eq!(64, session.config().read_buffer_size());
    assert_eq!(96, session.config().max_write_bytes_per_flush());
}
