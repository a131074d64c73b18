#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use bytes::Bytes;
    use futures_lite::future;
    use parking_lot::Mutex;
    use smol::Timer;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use sluice::filter::{DefaultFilterChainBuilder, LoggingFilter};
    use sluice::handler::Handler;
    use sluice::message::Message;
    use sluice::service::Service;
    use sluice::session::{Session, SessionConfig};
    use sluice::transport::{TcpAcceptor, TcpConnector};

    ////////////////////////////////////////////////////////////////////////////////////////////////////

    struct EchoServer;

    impl Handler for EchoServer {
        fn message_received(
            &self,
            session: &Arc<Session>,
            message: Message,
        ) -> sluice::Result<()> {
            if let Message::Buffer(buf) = message {
                session.write(buf)?;
            }
            Ok(())
        }
    }

    struct EchoClient {
        received: Mutex<Vec<u8>>,
        expected: usize,
        done_tx: async_broadcast::Sender<()>,
    }

    impl Handler for EchoClient {
        fn message_received(
            &self,
            _session: &Arc<Session>,
            message: Message,
        ) -> sluice::Result<()> {
            if let Some(buf) = message.as_buffer() {
                let mut received = self.received.lock();
                received.extend_from_slice(buf.as_slice());
                if received.len() >= self.expected {
                    let _ = self.done_tx.try_broadcast(());
                }
            }
            Ok(())
        }
    }

    fn logging_builder() -> anyhow::Result<Arc<DefaultFilterChainBuilder>> {
        let builder = DefaultFilterChainBuilder::new();
        builder.add_last("logger", Arc::new(LoggingFilter::default()))?;
        Ok(Arc::new(builder))
    }

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }

    #[test]
    fn test_echo_tcp() -> anyhow::Result<()> {
        const ITER: usize = 64;

        let server = Service::new(
            Arc::new(EchoServer),
            SessionConfig::default(),
            logging_builder()?,
        );
        let acceptor = TcpAcceptor::new(Arc::clone(&server));
        let addr = acceptor.bind("127.0.0.1:0")?;

        let lines: Vec<String> = (0..ITER).map(|i| format!("line {}\r\n", i)).collect();
        let expected: Vec<u8> = lines.concat().into_bytes();

        let (done_tx, mut done_rx) = async_broadcast::broadcast(1);
        let handler = Arc::new(EchoClient {
            received: Mutex::new(vec![]),
            expected: expected.len(),
            done_tx,
        });
        let client = Service::new(
            handler.clone(),
            SessionConfig::default(),
            logging_builder()?,
        );
        let connector = TcpConnector::new(Arc::clone(&client));

        let session = connector
            .connect(addr)
            .wait_timeout(Duration::from_secs(5))
            .ok_or_else(|| anyhow!("connect timed out"))??;
        assert_eq!(Some(addr), session.remote_addr());

        for line in &lines {
            session.write(Bytes::from(line.clone()))?;
        }

        let done = smol::block_on(future::or(
            async { done_rx.recv().await.is_ok() },
            async {
                Timer::after(Duration::from_secs(5)).await;
                false
            },
        ));
        assert!(done, "echo did not complete");
        assert_eq!(expected, *handler.received.lock());
        assert_eq!(1, server.managed_session_count());
        assert_eq!(expected.len() as u64, server.statistics().read_bytes());

        assert!(session.close_now().wait_timeout(Duration::from_secs(5)));
        assert!(wait_until(|| server.managed_session_count() == 0));
        assert_eq!(0, client.managed_session_count());

        smol::block_on(acceptor.stop());
        client.dispose(true);
        server.dispose(true);
        Ok(())
    }

    #[test]
    fn test_connect_refused() -> anyhow::Result<()> {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            listener.local_addr()?
        };

        let client = Service::new(
            Arc::new(EchoServer),
            SessionConfig::default(),
            Arc::new(DefaultFilterChainBuilder::new()),
        );
        let connector = TcpConnector::new(Arc::clone(&client));

        let result = connector
            .connect(addr)
            .wait_timeout(Duration::from_secs(5))
            .ok_or_else(|| anyhow!("connect timed out"))?;
        assert!(result.is_err());
        assert_eq!(0, client.managed_session_count());

        client.dispose(false);
        Ok(())
    }
}
