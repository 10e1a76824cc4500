use crate::connection::tls::{MaybeTlsStream, TlsPreloginWrapper};
use crate::connection::tls_stream::TlsStream;
use crate::connection::{AuthMethod, Config};
use crate::protocol::parser::PacketParser;
use crate::protocol::wire::{LoginMessage, TOKEN_LOGIN_ACK};
use crate::protocol::TextEncoding;
use crate::Error;
use futures_util::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{Level, event};

/// An authenticated connection: the transport (encrypted from Login7
/// onwards) and the framing engine bound to it.
///
/// The connection exclusively owns both; dropping it closes the transport,
/// also when the handshake never finished.
#[derive(Debug)]
pub(crate) struct Connection<S: AsyncRead + AsyncWrite + Unpin + Send> {
    parser: PacketParser<MaybeTlsStream<S>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Connection<S> {
    /// Runs the connection sequence: PreLogin over the raw transport, a TLS
    /// handshake relayed inside packet framing, then Login7 over the
    /// encrypted stream.
    pub(crate) async fn connect(config: Config, stream: S) -> crate::Result<Connection<S>> {
        // Rejected up front so nothing is sent when no credentials exist.
        if let AuthMethod::None = config.auth {
            return Err(Error::Auth("no authentication method configured".into()));
        }

        let encoding = TextEncoding::Ucs2;

        let mut parser = PacketParser::new(MaybeTlsStream::Raw(stream), encoding);

        parser.send_prelogin().await?;
        parser.ensure_single_packet().await?;
        // The response is consumed but not inspected; this client does not
        // negotiate based on its contents.
        parser.read_packet()?;

        let parser = Self::tls_handshake(&config, parser).await?;
        let mut connection = Connection { parser };

        connection.login(&config).await?;

        Ok(connection)
    }

    /// Rebinds the transport through the TLS layer. The prelogin wrapper
    /// frames the handshake bytes and is flipped to passthrough before any
    /// login traffic flows.
    async fn tls_handshake(
        config: &Config,
        parser: PacketParser<MaybeTlsStream<S>>,
    ) -> crate::Result<PacketParser<MaybeTlsStream<S>>> {
        let encoding = parser.encoding();

        let stream = match parser.into_inner() {
            MaybeTlsStream::Raw(stream) => stream,
            MaybeTlsStream::Tls(_) => {
                return Err(Error::Misuse(
                    "TLS handshake attempted on an encrypted stream".into(),
                ));
            }
        };

        let mut tls_stream = TlsStream::new(config, TlsPreloginWrapper::new(stream)).await?;
        tls_stream.get_mut().handshake_complete();

        event!(Level::INFO, "TLS handshake successful");

        Ok(PacketParser::new(MaybeTlsStream::Tls(tls_stream), encoding))
    }

    async fn login(&mut self, config: &Config) -> crate::Result<()> {
        let auth = match &config.auth {
            AuthMethod::SqlServer(auth) => auth,
            AuthMethod::None => {
                return Err(Error::Auth("no authentication method configured".into()));
            }
        };

        let mut login = LoginMessage::new(self.parser.encoding());
        login.hostname(hostname());
        login.credentials(auth.user(), auth.password());
        login.app_name(config.get_application_name().to_string());
        login.db_name(config.get_database().to_string());

        self.parser.send_login(login).await?;

        self.parser.ensure_single_packet().await?;
        let payload = self.parser.read_packet()?;

        match payload.first() {
            Some(&TOKEN_LOGIN_ACK) => {
                event!(Level::INFO, "Login acknowledged");
                Ok(())
            }
            _ => Err(Error::Auth("the server rejected the login".into())),
        }
    }

    pub(crate) async fn execute(&mut self, sql: &str) -> crate::Result<()> {
        self.parser.send_batch(sql).await
    }

    pub(crate) async fn ensure_single_packet(&mut self) -> crate::Result<()> {
        self.parser.ensure_single_packet().await
    }

    pub(crate) fn read_packet(&mut self) -> crate::Result<&[u8]> {
        self.parser.read_packet()
    }

    pub(crate) async fn close(mut self) -> crate::Result<()> {
        self.parser.transport_mut().close().await?;
        Ok(())
    }
}

/// The machine name reported in the login, best effort.
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}
