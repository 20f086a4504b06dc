use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The endpoint actively refused the TCP connection. Permanent.
    #[error("relay at {endpoint} refused the connection")]
    Refused { endpoint: String },

    #[error("relay did not acknowledge within {}ms", timeout.as_millis())]
    StartupTimeout { timeout: Duration },

    #[error("connection manager already started")]
    AlreadyStarted,

    #[error("connection manager is stopped")]
    Stopped,

    #[error("relay websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Whether this error means the endpoint refused us outright.
    #[must_use]
    pub fn is_refused(&self) -> bool {
        match self {
            Self::Refused { .. } => true,
            Self::WebSocket(tokio_tungstenite::tungstenite::Error::Io(e)) => {
                e.kind() == std::io::ErrorKind::ConnectionRefused
            },
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
