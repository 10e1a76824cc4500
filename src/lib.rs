//! A minimal client for the TDS protocol (Microsoft SQL Server).
//!
//! `manx` implements the hard core of a TDS connection and nothing more: the
//! PreLogin negotiation, a TLS handshake tunneled inside TDS packet framing,
//! the Login7 credential exchange, and packet-oriented buffered I/O. It sends
//! one SQL batch at a time and hands back raw response packets; it does not
//! parse result rows, pool connections, or retry anything.
//!
//! # Example
//!
//! ```no_run
//! use manx::{AuthMethod, Client, Config};
//! use tokio_util::compat::TokioAsyncWriteCompatExt;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::new();
//! config.host("localhost");
//! config.port(1433);
//! config.database("master");
//! config.authentication(AuthMethod::sql_server("sa", "your_password"));
//! config.trust_cert();
//!
//! let tcp = tokio::net::TcpStream::connect(config.get_addr()).await?;
//! tcp.set_nodelay(true)?;
//!
//! let mut client = Client::connect(config, tcp.compat_write()).await?;
//! client.execute("SELECT 1").await?;
//!
//! client.ensure_single_packet().await?;
//! let payload = client.read_packet()?;
//! assert!(!payload.is_empty());
//! # Ok(())
//! # }
//! ```

#![allow(dead_code)]

#[macro_use]
mod macros;

mod connection;

pub mod error;
mod protocol;

pub use connection::{AuthMethod, Client, Config};
pub(crate) use error::Error;
pub use protocol::{EncryptionLevel, TextEncoding};

/// An alias for a result that holds this module's error type as the error.
pub type Result<T> = std::result::Result<T, Error>;
