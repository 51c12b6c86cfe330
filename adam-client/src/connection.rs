//! One command exchange with the service: connect, send one document, read one reply.

use std::time::Duration;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use shared::codec::{encode, read_frame, FramingError, Reply, DEFAULT_FRAME_LIMIT};
use shared::protocol::{DEFAULT_SERVICE_PORT, FIELD_WAIT_FOR_RESPONSE};

/// Connect, write and read each get this long
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out talking to {0}")]
    Timeout(String),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid reply: {0}")]
    Framing(#[from] FramingError),
}

#[derive(Debug, Clone)]
pub struct ServiceClient {
    host: String,
    port: u16,
    io_timeout: Duration,
}

impl ServiceClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Send `command` and, if `wait_for_response`, read the reply.
    ///
    /// `wait_for_response` is written into the command object so the service
    /// knows whether to answer. A service that closes without answering
    /// yields an empty text reply.
    pub async fn send_command(
        &self,
        command: &Value,
        wait_for_response: bool,
    ) -> Result<Option<Reply>, ClientError> {
        let mut command = command.clone();
        if let Value::Object(map) = &mut command {
            map.insert(FIELD_WAIT_FOR_RESPONSE.to_string(), Value::Bool(wait_for_response));
        }
        let bytes = encode(&command)?;

        let addr = self.addr();
        let mut stream = self
            .timed(TcpStream::connect((self.host.as_str(), self.port)))
            .await?
            .map_err(|source| ClientError::Connect {
                addr: addr.clone(),
                source,
            })?;
        tracing::debug!("Connected to {}", addr);

        self.timed(stream.write_all(&bytes)).await??;
        tracing::debug!("Sent {} bytes to {}", bytes.len(), addr);

        if !wait_for_response {
            let _ = stream.shutdown().await;
            return Ok(None);
        }

        match self.timed(read_frame(&mut stream, DEFAULT_FRAME_LIMIT)).await? {
            Ok(frame) => Ok(Some(Reply::from_frame(frame))),
            Err(FramingError::Closed) => Ok(Some(Reply::text(""))),
            Err(e) => Err(e.into()),
        }
    }

    async fn timed<F: std::future::Future>(&self, fut: F) -> Result<F::Output, ClientError> {
        tokio::time::timeout(self.io_timeout, fut)
            .await
            .map_err(|_| ClientError::Timeout(self.addr()))
    }
}

impl Default for ServiceClient {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_SERVICE_PORT)
    }
}
