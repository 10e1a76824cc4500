use std::path::PathBuf;

use super::AuthMethod;

/// Configuration for connecting to a TDS server.
///
/// Use the builder methods to construct a configuration, then pass it to
/// [`Client::connect`](super::Client::connect).
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) database: Option<String>,
    pub(crate) application_name: Option<String>,
    pub(crate) trust: TrustConfig,
    pub(crate) auth: AuthMethod,
}

#[derive(Clone, Debug)]
pub(crate) enum TrustConfig {
    CaCertificateLocation(PathBuf),
    TrustAll,
    Default,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            database: None,
            application_name: None,
            trust: TrustConfig::Default,
            auth: AuthMethod::None,
        }
    }
}

impl Config {
    /// Create a new `Config` with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// A host or ip address to connect to.
    ///
    /// - Defaults to `localhost`.
    pub fn host(&mut self, host: impl ToString) {
        self.host = Some(host.to_string());
    }

    /// The server port.
    ///
    /// - Defaults to `1433`.
    pub fn port(&mut self, port: u16) {
        self.port = Some(port);
    }

    /// The database to connect to.
    ///
    /// - Defaults to `master`.
    pub fn database(&mut self, database: impl ToString) {
        self.database = Some(database.to_string())
    }

    /// Sets the application name reported to the server in the login.
    ///
    /// - Defaults to the name of this crate.
    pub fn application_name(&mut self, name: impl ToString) {
        self.application_name = Some(name.to_string());
    }

    /// If set, the server certificate will not be validated and it is
    /// accepted as-is.
    ///
    /// On production setting, the certificate should be added to the local
    /// key storage (or use `trust_cert_ca` instead), using this setting is
    /// potentially dangerous.
    ///
    /// # Panics
    /// Will panic in case `trust_cert_ca` was called before.
    ///
    /// - Defaults to validating the server certificate against the system
    ///   truststore.
    pub fn trust_cert(&mut self) {
        if let TrustConfig::CaCertificateLocation(_) = &self.trust {
            panic!("'trust_cert' and 'trust_cert_ca' are mutual exclusive! Only use one.")
        }
        self.trust = TrustConfig::TrustAll;
    }

    /// If set, the server certificate will be validated against the given
    /// CA certificate. Useful when using self-signed certificates on the
    /// server without having to disable the trust-chain.
    ///
    /// # Panics
    /// Will panic in case `trust_cert` was called before.
    pub fn trust_cert_ca(&mut self, path: impl ToString) {
        if let TrustConfig::TrustAll = &self.trust {
            panic!("'trust_cert' and 'trust_cert_ca' are mutual exclusive! Only use one.")
        } else {
            self.trust = TrustConfig::CaCertificateLocation(PathBuf::from(path.to_string()))
        }
    }

    /// Sets the authentication method.
    ///
    /// - Defaults to `None`.
    pub fn authentication(&mut self, auth: AuthMethod) {
        self.auth = auth;
    }

    pub(crate) fn get_host(&self) -> &str {
        self.host
            .as_deref()
            .filter(|v| v != &".")
            .unwrap_or("localhost")
    }

    pub(crate) fn get_port(&self) -> u16 {
        self.port.unwrap_or(1433)
    }

    pub(crate) fn get_database(&self) -> &str {
        self.database.as_deref().unwrap_or("master")
    }

    pub(crate) fn get_application_name(&self) -> &str {
        self.application_name
            .as_deref()
            .unwrap_or(env!("CARGO_PKG_NAME"))
    }

    /// Get the host address including port
    pub fn get_addr(&self) -> String {
        format!("{}:{}", self.get_host(), self.get_port())
    }
}
