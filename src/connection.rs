mod auth;
mod config;
#[allow(clippy::module_inception)]
mod connection;
mod tls;
mod tls_stream;

pub use auth::*;
pub use config::*;
pub(crate) use connection::*;

use futures_util::io::{AsyncRead, AsyncWrite};

/// The main entry point for talking to a TDS server.
///
/// A `Client` wraps an authenticated connection and exposes the raw
/// protocol surface: submit one SQL batch with [`execute`](Self::execute),
/// then pull the response packet by packet with
/// [`ensure_single_packet`](Self::ensure_single_packet) and
/// [`read_packet`](Self::read_packet). Response payloads are returned as
/// raw bytes; this client never materializes rows.
///
/// Construct a `Client` by calling [`Client::connect`] with a [`Config`] and
/// an async stream (typically a [`TcpStream`](https://docs.rs/tokio/latest/tokio/net/struct.TcpStream.html)
/// wrapped with `compat_write()` from `tokio_util`).
///
/// A connection carries one request at a time: send a batch, consume its
/// response completely, then send the next. The `&mut self` receivers
/// enforce this; sharing a client between tasks is not supported.
#[derive(Debug)]
pub struct Client<S: AsyncRead + AsyncWrite + Unpin + Send> {
    pub(crate) connection: Connection<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Client<S> {
    /// Establishes a connection using the given [`Config`] and async stream.
    ///
    /// Runs the full handshake: PreLogin, a TLS handshake relayed inside
    /// packet framing, then Login7. Returns once the server acknowledges
    /// the login.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails, the server breaks framing
    /// ([`Protocol`](crate::error::Error::Protocol)), the TLS handshake
    /// fails ([`Tls`](crate::error::Error::Tls)) or the credentials are
    /// rejected ([`Auth`](crate::error::Error::Auth)).
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use manx::{AuthMethod, Client, Config};
    /// # use tokio_util::compat::TokioAsyncWriteCompatExt;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut config = Config::new();
    /// config.host("localhost");
    /// config.authentication(AuthMethod::sql_server("sa", "password"));
    /// config.trust_cert();
    ///
    /// let tcp = tokio::net::TcpStream::connect(config.get_addr()).await?;
    /// tcp.set_nodelay(true)?;
    /// let mut client = Client::connect(config, tcp.compat_write()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: Config, stream: S) -> crate::Result<Client<S>> {
        Ok(Client {
            connection: Connection::connect(config, stream).await?,
        })
    }

    /// Sends one SQL batch to the server.
    ///
    /// The response stays on the wire; consume it with
    /// [`ensure_single_packet`](Self::ensure_single_packet) and
    /// [`read_packet`](Self::read_packet) before executing again.
    pub async fn execute(&mut self, sql: &str) -> crate::Result<()> {
        self.connection.execute(sql).await
    }

    /// Suspends until one full response packet is buffered. Returns
    /// immediately when the packet already arrived.
    ///
    /// Calling this twice without [`read_packet`](Self::read_packet) in
    /// between is a [`Misuse`](crate::error::Error::Misuse) error.
    pub async fn ensure_single_packet(&mut self) -> crate::Result<()> {
        self.connection.ensure_single_packet().await
    }

    /// Returns the payload of the buffered packet with the 8-byte header
    /// stripped. The returned slice stays valid until the next read.
    pub fn read_packet(&mut self) -> crate::Result<&[u8]> {
        self.connection.read_packet()
    }

    /// Closes the connection. Dropping the client closes the transport as
    /// well; `close` only makes the shutdown explicit and awaitable.
    pub async fn close(self) -> crate::Result<()> {
        self.connection.close().await
    }
}
