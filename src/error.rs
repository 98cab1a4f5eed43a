//! Contains the `Error` and `Result` types that `mongolite` uses.

use std::sync::Arc;

use bson::Document;
use thiserror::Error;

/// The result type for all methods that can return an error in the `mongolite` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongolite` crate. The inner [`ErrorKind`] is wrapped in a
/// `Box` to keep the type small; the error as a whole is cloneable so that a single
/// connection-level failure can be delivered to every caller awaiting a reply on that
/// connection.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,
}

impl Error {
    pub(crate) fn internal(message: impl Into<String>) -> Error {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Error {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    /// Whether this error was returned by the server in reply to a command (`ok != 1`).
    /// Command errors leave the connection healthy; every other kind of error originating
    /// after `open` is fatal to the connection.
    pub fn is_command_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Command(_))
    }

    /// If this is a command error, the error document the server replied with.
    pub fn command_error(&self) -> Option<&CommandError> {
        match self.kind.as_ref() {
            ErrorKind::Command(ref err) => Some(err),
            _ => None,
        }
    }

    /// Whether this error was caused by a reply that violated the wire protocol.
    pub fn is_invalid_response(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::InvalidResponse { .. })
    }

    /// Whether this error is an I/O error from the underlying socket.
    pub fn is_io_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(_))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        ErrorKind::Io(Arc::new(err)).into()
    }
}

impl From<bson::de::Error> for Error {
    fn from(err: bson::de::Error) -> Self {
        ErrorKind::BsonDeserialization(Arc::new(err)).into()
    }
}

impl From<bson::ser::Error> for Error {
    fn from(err: bson::ser::Error) -> Self {
        ErrorKind::BsonSerialization(Arc::new(err)).into()
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(Arc<bson::de::Error>),

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(Arc<bson::ser::Error>),

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// Wrapper around [`std::io::Error`].
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The server sent a reply that violated the wire protocol: an unknown opcode or flag
    /// bit, a malformed section stream, a compression envelope whose decompressed length
    /// disagrees with its header, or a compressor this build does not support.
    #[error("The server returned an invalid reply: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// The server does not support this driver's wire protocol version.
    #[error("The server does not support a compatible wire protocol version: {message}")]
    #[non_exhaustive]
    IncompatibleServer { message: String },

    /// An operation was attempted before the connection was opened.
    #[error("Connection not established. Did you forget to call `open`?")]
    NotReady,

    /// The connection has been shut down.
    #[error("Connection has been shut down")]
    Shutdown,
}

/// An error document returned by the server in reply to a command (`ok != 1`). The
/// connection remains usable after a command error.
#[derive(Clone, Debug, Error)]
#[error("Error code {code} ({code_name}): {message}")]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error.
    pub code: i32,

    /// The name associated with the error code.
    pub code_name: String,

    /// A description of the error that occurred.
    pub message: String,

    /// The complete reply document.
    pub response: Document,
}

impl CommandError {
    pub(crate) fn from_reply(response: Document) -> Self {
        Self {
            code: response
                .get("code")
                .and_then(crate::bson_util::get_int)
                .and_then(|code| i32::try_from(code).ok())
                .unwrap_or(0),
            code_name: response
                .get_str("codeName")
                .unwrap_or_default()
                .to_string(),
            message: response.get_str("errmsg").unwrap_or_default().to_string(),
            response,
        }
    }
}
