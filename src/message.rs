//! Payloads travelling through the filter chain

use bytes::{Buf, Bytes};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::buffer::{FileRegion, IoBuffer};

/// A message read from or written to a session.
///
/// Transports only know how to move [IoBuffer]s and [FileRegion]s; anything else is an
/// [Object](Message::Object) that some filter (a codec, typically) must turn into bytes
/// before it reaches the processor.
#[derive(Clone)]
pub enum Message {
    /// Raw bytes
    Buffer(IoBuffer),
    /// A region of a file
    File(FileRegion),
    /// An application-level object
    Object(Arc<dyn Any + Send + Sync>),
}

impl Message {
    /// Wraps an application-level object
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Message::Object(Arc::new(value))
    }

    /// Returns the buffer if this message is one
    pub fn as_buffer(&self) -> Option<&IoBuffer> {
        match self {
            Message::Buffer(buf) => Some(buf),
            _ => None,
        }
    }

    /// Returns the buffer mutably if this message is one
    pub fn as_buffer_mut(&mut self) -> Option<&mut IoBuffer> {
        match self {
            Message::Buffer(buf) => Some(buf),
            _ => None,
        }
    }

    /// Returns the file region if this message is one
    pub fn as_file_region(&self) -> Option<&FileRegion> {
        match self {
            Message::File(region) => Some(region),
            _ => None,
        }
    }

    /// Returns a reference to the wrapped object if it is of type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Message::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns true if this message is a buffer
    pub fn is_buffer(&self) -> bool {
        matches!(self, Message::Buffer(_))
    }

    /// Returns the number of bytes a transport still has to move for this message
    pub fn remaining_bytes(&self) -> u64 {
        match self {
            Message::Buffer(buf) => buf.remaining() as u64,
            Message::File(region) => region.remaining(),
            Message::Object(_) => 0,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Buffer(buf) => write!(f, "{:?}", buf),
            Message::File(region) => write!(f, "{:?}", region),
            Message::Object(_) => write!(f, "Object(..)"),
        }
    }
}

impl From<IoBuffer> for Message {
    fn from(buf: IoBuffer) -> Self {
        Message::Buffer(buf)
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Message::Buffer(IoBuffer::new(bytes))
    }
}

impl From<FileRegion> for Message {
    fn from(region: FileRegion) -> Self {
        Message::File(region)
    }
}
