use thiserror::Error;

/// Construction-time misconfiguration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("interface name must not be empty")]
    EmptyInterfaceName,
}

/// Failure to bring up a client connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection reset by peer during handshake")]
    Reset,
    #[error("timed out waiting for a response from {0}")]
    Timeout(std::net::Ipv4Addr),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
