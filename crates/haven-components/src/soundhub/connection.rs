//! Controller connections
//!
//! The network side of the soundhub integration sits behind
//! [`ControllerConnection`] so flows and entry setup can validate hosts
//! without touching a real socket in tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Controller command port
pub const CONTROLLER_PORT: u16 = 1255;

/// Timeout for the initial connect
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection failed: {0}")]
    Failed(String),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for connection operations
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// One connection to a soundhub controller.
///
/// `disconnect` is idempotent; validation code calls it on every exit
/// path, whether or not `connect` succeeded.
#[async_trait]
pub trait ControllerConnection: Send + Sync {
    async fn connect(&self) -> ConnectionResult<()>;
    async fn disconnect(&self);
}

/// Builds connections for a host. The flow and setup handlers own one
/// factory and create a fresh connection per validation.
pub trait ConnectionFactory: Send + Sync {
    fn create(&self, host: &str) -> Arc<dyn ControllerConnection>;
}

/// TCP connection to a controller's command port.
pub struct TcpControllerConnection {
    host: String,
    port: u16,
    connect_timeout: Duration,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
}

impl TcpControllerConnection {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: CONTROLLER_PORT,
            connect_timeout: CONNECT_TIMEOUT,
            stream: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl ControllerConnection for TcpControllerConnection {
    async fn connect(&self) -> ConnectionResult<()> {
        let addr = format!("{}:{}", self.host, self.port);
        debug!(%addr, "connecting to controller");

        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::Timeout(self.connect_timeout))?
            .map_err(|e| ConnectionError::Failed(e.to_string()))?;

        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn disconnect(&self) {
        if self.stream.lock().await.take().is_some() {
            debug!(host = %self.host, "disconnected from controller");
        }
    }
}

/// Factory producing [`TcpControllerConnection`]s on the default port.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnectionFactory;

impl ConnectionFactory for TcpConnectionFactory {
    fn create(&self, host: &str) -> Arc<dyn ControllerConnection> {
        Arc::new(TcpControllerConnection::new(host))
    }
}
