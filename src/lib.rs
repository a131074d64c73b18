//! Sluice is a session and filter-chain pipeline for asynchronous network I/O.
//!
//! Every connection is a [Session](session::Session) with its own mutable
//! [FilterChain](filter::FilterChain). Inbound events travel from the chain's head to its
//! tail and on to a [Handler](handler::Handler); writes and closes travel back from the tail
//! to the head and on to the session's [Processor](processor::Processor).

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub mod buffer;
pub mod error;
pub mod filter;
pub mod future;
pub mod handler;
pub mod message;
pub mod processor;
pub mod service;
pub mod session;
pub mod transport;

#[cfg(test)]
mod mock_test;

pub use error::{Error, Result};
