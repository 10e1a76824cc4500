//! Error module
pub use std::io::ErrorKind as IoErrorKind;
use std::{borrow::Cow, io};
use thiserror::Error;

/// A unified error enum that contains several errors that might occurr during
/// the lifecycle of this client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("An error occured during the attempt of performing I/O: {}", message)]
    /// An error occured when performing I/O to the server.
    Io {
        /// A list specifying general categories of I/O error.
        kind: IoErrorKind,
        /// The error description.
        message: String,
    },
    #[error("Protocol error: {}", _0)]
    /// An oversized or malformed packet, or an unexpected end of stream. The
    /// connection must be discarded.
    Protocol(Cow<'static, str>),
    #[error("Authentication failed: {}", _0)]
    /// The server rejected the login. Fatal for this connection.
    Auth(Cow<'static, str>),
    #[error("Connection misuse: {}", _0)]
    /// The caller violated the request/response sequencing contract.
    Misuse(Cow<'static, str>),
    #[error("Error forming TLS connection: {}", _0)]
    /// An error in the TLS handshake.
    Tls(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Self::Io {
            kind: err.kind(),
            message: format!("{}", err),
        }
    }
}
