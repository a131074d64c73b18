use clap::Parser;
use std::sync::Arc;
use std::{io::Write, str::FromStr, time::Duration};

use sluice::filter::{DefaultFilterChainBuilder, LoggingFilter};
use sluice::handler::Handler;
use sluice::message::Message;
use sluice::service::Service;
use sluice::session::{IdleStatus, Session, SessionConfig};
use sluice::transport::TcpAcceptor;

////////////////////////////////////////////////////////////////////////////////////////////////////

struct EchoHandler;

impl Handler for EchoHandler {
    fn session_opened(&self, session: &Arc<Session>) -> sluice::Result<()> {
        println!("session {} opened from {:?}", session.id(), session.remote_addr());
        Ok(())
    }

    fn session_idle(&self, session: &Arc<Session>, status: IdleStatus) -> sluice::Result<()> {
        println!("session {} is {}, closing", session.id(), status);
        session.close_on_flush();
        Ok(())
    }

    fn message_received(&self, session: &Arc<Session>, message: Message) -> sluice::Result<()> {
        if let Message::Buffer(buf) = message {
            println!(
                "handling {:?} from {:?}",
                String::from_utf8_lossy(buf.as_slice()),
                session.remote_addr()
            );
            session.write(buf)?;
        }
        Ok(())
    }

    fn session_closed(&self, session: &Arc<Session>) -> sluice::Result<()> {
        println!(
            "session {} closed after {} bytes in, {} bytes out",
            session.id(),
            session.read_bytes(),
            session.written_bytes()
        );
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "Echo Server TCP")]
#[command(author = "Rusty Rain <y@liu.mx>")]
#[command(version = "0.1.0")]
#[command(about = "An example of echo server tcp", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("0.0.0.0"))]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value_t = 60)]
    idle_secs: u64,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let host = cli.host;
    let port = cli.port;
    let log_level = log::LevelFilter::from_str(&cli.log_level)?;
    if cli.debug {
        env_logger::Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}:{} [{}] {} - {}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.level(),
                    chrono::Local::now().format("%H:%M:%S.%6f"),
                    record.args()
                )
            })
            .filter(None, log_level)
            .init();
    }

    let builder = DefaultFilterChainBuilder::new();
    builder.add_last("logger", Arc::new(LoggingFilter::default()))?;

    let mut config = SessionConfig::default();
    config.set_idle_time(IdleStatus::BothIdle, Duration::from_secs(cli.idle_secs));

    let service = Service::new(Arc::new(EchoHandler), config, Arc::new(builder));
    let acceptor = TcpAcceptor::new(Arc::clone(&service));
    let addr = acceptor.bind(format!("{}:{}", host, port))?;

    println!("listening {}...", addr);
    println!("Press ctrl-c to stop");
    println!("try `nc {} {}` in another shell", host, port);

    smol::block_on(async move {
        let (tx, rx) = futures::channel::oneshot::channel();
        std::thread::spawn(move || {
            let mut tx = Some(tx);
            ctrlc::set_handler(move || {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(());
                }
            })
            .expect("Error setting Ctrl-C handler");
        });
        let _ = rx.await;

        acceptor.stop().await;
    });

    let statistics = service.statistics();
    println!(
        "served {} sessions, {} bytes in, {} bytes out",
        statistics.cumulative_managed_session_count(),
        statistics.read_bytes(),
        statistics.written_bytes()
    );
    service.dispose(true);

    Ok(())
}
