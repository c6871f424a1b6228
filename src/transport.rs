//! TCP transport to the controller
//!
//! Owns the socket and the request/response exchange. Every command is a
//! single write followed by a header read and a body read, each guarded by
//! its own timeout. Any I/O failure drops the socket, because a partial
//! exchange leaves the stream desynchronized.

use std::time::Duration;

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::command::AdamCommand;
use crate::constants::{DEFAULT_TCP_PORT, FRAME_HEADER_LEN, MAX_RESPONSE_BODY_LEN};
use crate::error::{AdamError, Result};

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Controller host address
    pub host: String,
    /// Controller port number
    pub port: u16,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Response read timeout
    pub read_timeout: Duration,
    /// Request write timeout
    pub write_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
        }
    }
}

impl TransportConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(AdamError::config("Host cannot be empty"));
        }
        if self.port == 0 {
            return Err(AdamError::config("Port cannot be zero"));
        }
        Ok(())
    }

    fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Transport exchange counters
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    /// Command frames written
    pub requests_sent: u64,
    /// Complete response frames read back
    pub responses_received: u64,
    /// Failed exchanges, including timeouts
    pub errors: u64,
}

/// Request/response channel to a controller
///
/// Implementations pair each command frame with exactly one response frame.
#[async_trait]
pub trait AdamTransport: Send {
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Send one command and read back its complete response frame
    async fn execute(&mut self, command: &AdamCommand) -> Result<Vec<u8>>;

    fn stats(&self) -> TransportStats;
}

/// TCP implementation of the controller transport
pub struct TcpTransport {
    config: TransportConfig,
    stream: Option<TcpStream>,
    stats: TransportStats,
}

impl TcpTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stream: None,
            stats: TransportStats::default(),
        })
    }

    /// Read one complete response frame: the 6-byte header, then the body
    /// length the header declares
    async fn read_response(&mut self) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(AdamError::NotConnected)?;

        let mut header = [0u8; FRAME_HEADER_LEN];
        match timeout(self.config.read_timeout, stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(AdamError::connection(format!(
                    "Failed to read response header: {e}"
                )));
            }
            Err(_) => {
                return Err(AdamError::timeout(format!(
                    "Response header timed out after {:?}",
                    self.config.read_timeout
                )));
            }
        }

        let declared = BigEndian::read_u16(&header[4..6]) as usize;
        if declared > MAX_RESPONSE_BODY_LEN {
            return Err(AdamError::decode(format!(
                "Response declares {declared} body bytes, stream desynchronized"
            )));
        }

        let mut body = vec![0u8; declared];
        match timeout(self.config.read_timeout, stream.read_exact(&mut body)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(AdamError::connection(format!(
                    "Failed to read response body: {e}"
                )));
            }
            Err(_) => {
                return Err(AdamError::timeout(format!(
                    "Response body timed out after {:?}",
                    self.config.read_timeout
                )));
            }
        }

        let mut response = Vec::with_capacity(FRAME_HEADER_LEN + declared);
        response.extend_from_slice(&header);
        response.extend_from_slice(&body);
        Ok(response)
    }
}

#[async_trait]
impl AdamTransport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        let addr = self.config.socket_addr();
        debug!("Connecting to controller at {addr}");

        match timeout(self.config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {e}");
                }
                self.stream = Some(stream);
                info!("Connected to controller at {addr}");
                Ok(())
            }
            Ok(Err(e)) => {
                let msg = format!("Failed to connect to {addr}: {e}");
                error!("{msg}");
                self.stats.errors += 1;
                Err(AdamError::connection(msg))
            }
            Err(_) => {
                let msg = format!("Connection to {addr} timed out");
                warn!("{msg}");
                self.stats.errors += 1;
                Err(AdamError::timeout(msg))
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("Error during TCP shutdown: {e}");
            }
            info!("Disconnected from {}", self.config.socket_addr());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn execute(&mut self, command: &AdamCommand) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(AdamError::NotConnected)?;

        let frame = command.frame();
        debug!(data = %hex::encode(frame), "TX {command}");

        match timeout(self.config.write_timeout, stream.write_all(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stream = None;
                self.stats.errors += 1;
                return Err(AdamError::connection(format!("Failed to send frame: {e}")));
            }
            Err(_) => {
                self.stream = None;
                self.stats.errors += 1;
                return Err(AdamError::timeout(format!(
                    "Send timed out after {:?}",
                    self.config.write_timeout
                )));
            }
        }
        self.stats.requests_sent += 1;

        match self.read_response().await {
            Ok(response) => {
                debug!(data = %hex::encode(&response), "RX {} bytes", response.len());
                self.stats.responses_received += 1;
                Ok(response)
            }
            Err(e) => {
                self.stream = None;
                self.stats.errors += 1;
                Err(e)
            }
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}
