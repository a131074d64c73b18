use anyhow::Result;
use bytes::Bytes;
use std::io::{self, Write};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::buffer::FileRegion;
use crate::error::Error;
use crate::message::Message;
use crate::mock_test::{new_session, RecordingHandler};
use crate::processor::Processor;
use crate::session::SessionConfig;

#[test]
fn test_processor_add_opens_transport() {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    assert_eq!(1, processor.transport().opened.load(Ordering::SeqCst));
    assert_eq!(vec!["created", "opened"], handler.events());
    assert!(session.is_active());
}

#[test]
fn test_processor_partial_write_resumes() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());
    processor.transport().set_capacity(Some(3));

    let outcome = session.write(Bytes::from_static(b"hello"))?;
    assert!(!outcome.future().is_done());
    assert_eq!(b"hel".to_vec(), processor.transport().written());
    assert_eq!(2, session.scheduled_write_bytes());
    assert_eq!(1, processor.transport().write_interest.load(Ordering::SeqCst));

    processor.transport().set_capacity(None);
    processor.flush(&session);

    assert!(outcome.future().is_written());
    assert_eq!(b"hello".to_vec(), processor.transport().written());
    assert_eq!(5, session.written_bytes());
    assert_eq!(0, session.scheduled_write_bytes());
    assert_eq!(0, session.scheduled_write_messages());
    Ok(())
}

#[test]
fn test_processor_writes_in_order() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());
    processor.transport().set_capacity(Some(0));

    let futures = ["one", "two", "three"]
        .iter()
        .map(|s| session.write(Bytes::from(s.as_bytes().to_vec())))
        .collect::<crate::error::Result<Vec<_>>>()?;
    assert!(processor.transport().written().is_empty());

    processor.transport().set_capacity(None);
    processor.flush(&session);

    assert_eq!(b"onetwothree".to_vec(), processor.transport().written());
    assert!(futures.iter().all(|f| f.future().is_written()));
    assert_eq!(3, session.written_messages());
    Ok(())
}

#[test]
fn test_processor_flush_budget() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let mut config = SessionConfig::default();
    config.set_read_buffer_size(4);
    let (processor, session) = new_session(Arc::clone(&handler), config);

    let outcome = session.write(Bytes::from_static(b"0123456789"))?;
    assert_eq!(b"012345".to_vec(), processor.transport().written());
    assert!(!outcome.future().is_done());
    assert!(processor.transport().write_interest.load(Ordering::SeqCst) > 0);

    processor.flush(&session);
    assert_eq!(b"0123456789".to_vec(), processor.transport().written());
    assert!(outcome.future().is_written());
    Ok(())
}

#[test]
fn test_processor_fires_message_sent() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (_processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    session.write(Bytes::from_static(b"again"))?;
    assert_eq!(vec!["created", "opened", "sent"], handler.events());
    Ok(())
}

#[test]
fn test_processor_sent_buffer_is_reset_to_mark() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());
    processor.transport().set_capacity(Some(3));

    session.write(Bytes::from_static(b"hello"))?;
    processor.transport().set_capacity(None);
    processor.flush(&session);

    let sent = handler.sent.lock();
    assert_eq!(1, sent.len());
    assert_eq!(5, sent[0].remaining_bytes());
    Ok(())
}

#[test]
fn test_processor_wakeup_during_partial_write_flushes() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());
    processor.transport().set_capacity(Some(2));
    processor
        .transport()
        .writable_on_interest
        .store(true, Ordering::SeqCst);

    // the transport reports writable the moment interest is armed
    let outcome = session.write(Bytes::from_static(b"abcd"))?;
    assert!(outcome.future().is_written());
    assert_eq!(b"abcd".to_vec(), processor.transport().written());
    assert!(session.current_write_request().lock().is_none());

    let closed = session.close_on_flush();
    assert!(closed.is_closed());
    Ok(())
}

#[test]
fn test_processor_object_message_is_rejected() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    let rejected = session.write(Message::object(42u32))?;
    assert!(matches!(
        rejected.future().exception(),
        Some(Error::InvalidArgument(_))
    ));
    assert_eq!(1, handler.exceptions.lock().len());
    assert!(session.is_active());

    let accepted = session.write(Bytes::from_static(b"ok"))?;
    assert!(accepted.future().is_written());
    assert_eq!(b"ok".to_vec(), processor.transport().written());
    Ok(())
}

#[test]
fn test_processor_io_error_closes_session() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());
    *processor.transport().fail_with.lock() = Some(io::ErrorKind::BrokenPipe);

    let outcome = session.write(Bytes::from_static(b"data"))?;
    assert!(matches!(
        outcome.future().exception(),
        Some(Error::Io {
            kind: io::ErrorKind::BrokenPipe,
            ..
        })
    ));
    assert!(session.close_future().is_closed());
    assert_eq!(1, processor.transport().closed.load(Ordering::SeqCst));
    assert_eq!(
        vec!["created", "opened", "exception", "closed"],
        handler.events()
    );
    Ok(())
}

#[test]
fn test_processor_remove_runs_once() {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    processor.remove(&session);
    processor.remove(&session);
    session.close_now();

    assert_eq!(1, processor.transport().closed.load(Ordering::SeqCst));
    assert_eq!(
        1,
        handler.events().iter().filter(|e| *e == "closed").count()
    );
}

#[test]
fn test_processor_read() {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    processor.read(&session, Bytes::new());
    assert!(handler.received.lock().is_empty());

    processor.read(&session, Bytes::from_static(b"abc"));
    let received = handler.received.lock();
    assert_eq!(1, received.len());
    assert_eq!(
        Some(&b"abc"[..]),
        received[0].as_buffer().map(|buf| buf.as_slice())
    );
}

#[test]
fn test_processor_input_closed() {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    processor.input_closed(&session);
    assert!(session.close_future().is_closed());

    // ignored once the session is closing
    processor.input_closed(&session);
    assert_eq!(
        1,
        handler
            .events()
            .iter()
            .filter(|e| *e == "input closed")
            .count()
    );
}

#[test]
fn test_processor_exception() {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    processor.exception(&session, io::Error::from(io::ErrorKind::ConnectionReset));
    assert!(session.close_future().is_closed());
    assert!(matches!(
        handler.exceptions.lock().first(),
        Some(Error::Io {
            kind: io::ErrorKind::ConnectionReset,
            ..
        })
    ));
}

#[test]
fn test_processor_writes_file_region() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    let path = std::env::temp_dir().join(format!("sluice-region-{}", session.id()));
    {
        let mut file = std::fs::File::create(&path)?;
        file.write_all(b"file region contents")?;
    }
    let region = FileRegion::new(std::fs::File::open(&path)?, 5, 6);

    processor.transport().set_capacity(Some(4));
    let outcome = session.write(region)?;
    assert_eq!(b"regi".to_vec(), processor.transport().written());
    assert!(!outcome.future().is_done());

    processor.transport().set_capacity(None);
    processor.flush(&session);
    assert!(outcome.future().is_written());
    assert_eq!(b"region".to_vec(), processor.transport().written());
    assert_eq!(6, session.written_bytes());

    std::fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn test_processor_flush_is_serialized() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let (processor, session) = new_session(Arc::clone(&handler), SessionConfig::default());

    // another flush holds the session
    assert!(session.try_begin_flush());
    let outcome = session.write(Bytes::from_static(b"wait"))?;
    processor.flush(&session);
    assert!(processor.transport().written().is_empty());
    assert_eq!(1, session.write_request_queue().len());

    session.end_flush();
    processor.flush(&session);
    assert!(outcome.future().is_written());
    assert_eq!(b"wait".to_vec(), processor.transport().written());
    Ok(())
}
