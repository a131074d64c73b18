use clap::Parser;
use std::sync::Arc;
use std::{io::Write, str::FromStr, time::Duration};

use sluice::filter::{DefaultFilterChainBuilder, LoggingFilter};
use sluice::handler::Handler;
use sluice::message::Message;
use sluice::service::Service;
use sluice::session::{Session, SessionConfig};
use sluice::transport::TcpConnector;

////////////////////////////////////////////////////////////////////////////////////////////////////

struct EchoHandler;

impl Handler for EchoHandler {
    fn message_received(&self, _session: &Arc<Session>, message: Message) -> sluice::Result<()> {
        if let Some(buf) = message.as_buffer() {
            print!("received back: {}", String::from_utf8_lossy(buf.as_slice()));
        }
        Ok(())
    }

    fn session_closed(&self, session: &Arc<Session>) -> sluice::Result<()> {
        println!("session {} closed", session.id());
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "Echo Client TCP")]
#[command(author = "Rusty Rain <y@liu.mx>")]
#[command(version = "0.1.0")]
#[command(about = "An example of echo client tcp", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("127.0.0.1"))]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
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

    println!("Connecting {}:{}...", host, port);

    let builder = DefaultFilterChainBuilder::new();
    builder.add_last("logger", Arc::new(LoggingFilter::default()))?;
    let service = Service::new(
        Arc::new(EchoHandler),
        SessionConfig::default(),
        Arc::new(builder),
    );
    let connector = TcpConnector::new(Arc::clone(&service));

    let session = connector
        .connect(format!("{}:{}", host, port))
        .wait_timeout(Duration::from_secs(5))
        .ok_or_else(|| anyhow::anyhow!("connect timed out"))??;

    println!("Enter bye to stop");
    let mut buffer = String::new();
    while std::io::stdin().read_line(&mut buffer)? > 0 {
        let line = buffer.trim_end().to_string();
        buffer.clear();
        if line == "bye" || !session.is_active() {
            break;
        }
        session.write(bytes::Bytes::from(format!("{}\r\n", line)))?;
    }

    session.close_on_flush().wait_timeout(Duration::from_secs(5));
    service.dispose(true);

    Ok(())
}
