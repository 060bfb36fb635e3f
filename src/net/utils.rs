use http::uri::Authority;
use std::fmt::Display;
use tokio::net::TcpListener;

pub const CONTROL_HOST: &str = "127.0.0.1";
/// Wildcard host for internet-facing listeners.
pub const PUBLIC_HOST: &str = "0.0.0.0";

/// Implementation of authority component of a URI which is always contain host and port.
/// For validation rules, see [`Address::precheck`].
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Address(Authority);

impl Address {
    pub fn precheck(data: &str) -> Result<Self, InvalidAddress> {
        let authority = data
            .parse::<http::uri::Authority>()
            .map_err(|err| InvalidAddress(format!("{data}, source: {err:?}")))?;

        if authority.host().is_empty() || authority.port().is_none() {
            return Err(InvalidAddress(data.into()));
        }

        Ok(Self(authority))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn host(&self) -> &str {
        self.0.host()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("expected valid host:port, received {0}")]
pub struct InvalidAddress(pub String);

/// Helper trait for binding TCP listeners.
pub trait NewTcpListener {
    type Error: Display;
    type Config;

    fn bind(
        config: Self::Config,
    ) -> impl std::future::Future<Output = Result<TcpListener, Self::Error>> + Send;
}

pub struct ControlListener;
pub struct NodeListener;

impl NewTcpListener for ControlListener {
    type Error = std::io::Error;
    type Config = u16;

    /// Attempt to bind a listener for localhost control server.
    async fn bind(port: Self::Config) -> Result<TcpListener, Self::Error> {
        TcpListener::bind(format!("{CONTROL_HOST}:{port}")).await
    }
}

impl NewTcpListener for NodeListener {
    type Error = std::io::Error;
    type Config = u16;

    /// Attempt to bind a listener on all interfaces, used for peer facing servers.
    async fn bind(port: Self::Config) -> Result<TcpListener, Self::Error> {
        TcpListener::bind(format!("{PUBLIC_HOST}:{port}")).await
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StartServerError {
    #[error("failed to start control server: {0}")]
    FailedToStartControl(std::io::Error),
    #[error("failed to start node server: {0}")]
    FailedToStartNode(std::io::Error),
}
