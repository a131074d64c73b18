use std::fmt::{Display, Formatter};
use std::net::AddrParseError;
use std::string::FromUtf8Error;

/// A specialized [Result](std::result::Result) type for sluice operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that arise from filter chain mutation, session writes or transport I/O
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A filter with the same name already exists in the chain.
    DuplicateName(String),
    /// No filter with the given name exists in the chain.
    NotFound(String),
    /// A filter lifecycle hook failed while the chain was being mutated.
    FilterLifecycle {
        /// Name of the entry being mutated
        name: String,
        /// Kind tag of the filter whose hook failed
        filter: &'static str,
        /// Id of the session owning the chain, if any
        session_id: Option<u64>,
        /// Hook that failed, e.g. `on_post_add`
        phase: &'static str,
        /// Error returned by the hook
        cause: Box<Error>,
    },
    /// The session was closing or already closed when the write was requested.
    WriteToClosedSession,
    /// The write request did not complete within the configured write timeout.
    WriteTimeout,
    /// The write request was dropped by a filter before it completed.
    WriteDropped,
    /// The write request was cancelled before the processor started transmitting it.
    Cancelled,
    /// An argument was rejected, e.g. an empty buffer was written.
    InvalidArgument(String),
    /// An I/O error reported by a transport.
    Io {
        /// A list specifying general categories of I/O error.
        kind: std::io::ErrorKind,
        /// A message describing error information
        message: String,
    },
    /// Any other error raised by a user filter or handler.
    Other(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DuplicateName(name) => write!(f, "other filter is using the same name: {}", name),
            Error::NotFound(name) => write!(f, "filter not found: {}", name),
            Error::FilterLifecycle {
                name,
                filter,
                session_id,
                phase,
                cause,
            } => {
                write!(f, "{}(): {}:{}", phase, name, filter)?;
                if let Some(id) = session_id {
                    write!(f, " in session {}", id)?;
                }
                write!(f, ", caused by {}", cause)
            }
            Error::WriteToClosedSession => write!(f, "write to closed session"),
            Error::WriteTimeout => write!(f, "write timeout"),
            Error::WriteDropped => write!(f, "write request dropped before completion"),
            Error::Cancelled => write!(f, "write request cancelled"),
            Error::InvalidArgument(message) => write!(f, "invalid argument: {}", message),
            Error::Io { kind, message } => write!(f, "{:?} , {}", kind, message),
            Error::Other(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::FilterLifecycle { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<AddrParseError> for Error {
    fn from(e: AddrParseError) -> Self {
        Error::Io {
            kind: std::io::ErrorKind::AddrNotAvailable,
            message: e.to_string(),
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(e: FromUtf8Error) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

impl Error {
    /// Creates a new generic error from a message.
    pub fn other<M: Into<String>>(message: M) -> Self {
        Error::Other(message.into())
    }

    /// Creates a new invalid argument error from a message.
    pub fn invalid_argument<M: Into<String>>(message: M) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Returns true if this error means the session can no longer carry I/O.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::WriteTimeout | Error::WriteToClosedSession
        )
    }
}
