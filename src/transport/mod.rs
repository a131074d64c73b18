//! Socket transports driving a [SimpleIoProcessor](crate::processor::SimpleIoProcessor)

pub mod tcp;

pub use tcp::{TcpAcceptor, TcpConnector, TcpTransport};
