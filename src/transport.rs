// src/transport.rs - Serial link abstraction and the serial2-tokio implementation
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use tokio::time::{timeout_at, Duration, Instant};

use crate::config::SerialConfig;
use crate::error::TransportError;

/// Longest line kept while waiting for a terminator.
pub const MAX_LINE_LEN: usize = 256;

/// An open, line-oriented byte channel to the device.
#[async_trait]
pub trait Transport: Send {
    /// Waits up to `timeout` for one complete line, returned without its `\n`.
    ///
    /// `Ok(None)` means nothing complete arrived in time and is not an error.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Writes all of `bytes` to the device.
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Releases the link. The transport must not be used afterwards.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Opens fresh transports; called on startup and after every failure.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn open(&self) -> Result<Self::Transport, TransportError>;

    /// Human readable endpoint name for log lines.
    fn describe(&self) -> String;
}

/// Accumulates received bytes and splits them into `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Set after an overlong line was dropped; its tail up to the next `\n` is dropped too.
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, mut bytes: &[u8]) {
        if self.discarding {
            match bytes.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    bytes = &bytes[end + 1..];
                }
                None => return,
            }
        }
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > MAX_LINE_LEN && !self.pending.contains(&b'\n') {
            tracing::warn!(
                "Discarding {} bytes received without a line terminator",
                self.pending.len()
            );
            self.pending.clear();
            self.discarding = true;
        }
    }

    /// Removes and returns the oldest complete line, if any.
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        Some(line)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Opens the configured serial device.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    device: String,
    baud: u32,
}

impl SerialConnector {
    pub fn new(config: &SerialConfig) -> Self {
        Self {
            device: config.device.clone(),
            baud: config.baud,
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    type Transport = SerialTransport;

    async fn open(&self) -> Result<SerialTransport, TransportError> {
        let port = SerialPort::open(&self.device, self.baud).map_err(|source| {
            TransportError::Unavailable {
                device: self.device.clone(),
                source,
            }
        })?;
        Ok(SerialTransport::new(port))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.device, self.baud)
    }
}

/// A serial port with line buffering. Dropping it closes the device.
pub struct SerialTransport {
    port: SerialPort,
    buffer: LineBuffer,
}

impl SerialTransport {
    pub fn new(port: SerialPort) -> Self {
        Self {
            port,
            buffer: LineBuffer::new(),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 64];
        loop {
            if let Some(line) = self.buffer.take_line() {
                return Ok(Some(line));
            }
            let n = match timeout_at(deadline, self.port.read(&mut chunk)).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(0)) => return Err(TransportError::Closed),
                Ok(Ok(n)) => n,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Ok(Err(e)) => return Err(TransportError::Io(e)),
            };
            tracing::trace!("Read {} bytes from serial", n);
            self.buffer.extend(&chunk[..n]);
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut written = 0;
        while written < bytes.len() {
            let n = self.port.write(&bytes[written..]).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            written += n;
        }
        Ok(())
    }
}

/// Lists serial ports the OS knows about.
pub fn available_ports() -> Vec<String> {
    match SerialPort::available_ports() {
        Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate serial ports: {}", e);
            vec![]
        }
    }
}
