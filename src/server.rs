// src/server.rs - Serve loop with reconnect supervision
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};

use crate::clock::TimeSource;
use crate::config::{Config, DecodePolicy};
use crate::error::{ServerError, TransportError};
use crate::protocol::{decode_line, CommandTable, TimeResponse};
use crate::transport::{Connector, Transport};

/// Connection lifecycle. There is no per-request state; a request is handled
/// entirely within one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Serving,
}

/// Operator-visible happenings, mirrored to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Started { endpoint: String },
    Responded(TimeResponse),
    Ignored(String),
    TransportFailed(String),
    Stopped,
}

/// Running counters. All counters saturate instead of wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connects: u64,
    pub responses_sent: u64,
    pub lines_ignored: u64,
    pub transport_failures: u64,
}

/// Timing and policy knobs for [`TimeServer`].
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub decode_policy: DecodePolicy,
    pub log_unrecognized: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServerSettings {
    fn from(config: &Config) -> Self {
        Self {
            read_timeout: config.serial.read_timeout(),
            poll_interval: Duration::from_millis(config.server.poll_interval_ms),
            reconnect_delay: Duration::from_millis(config.server.reconnect_delay_ms),
            decode_policy: config.server.on_decode_error,
            log_unrecognized: config.server.log_unrecognized,
        }
    }
}

/// Answers `GET_TIME` requests on a single serial connection.
pub struct TimeServer<C: Connector> {
    connector: C,
    clock: Arc<dyn TimeSource>,
    settings: ServerSettings,
    commands: CommandTable,
    state: ConnectionState,
    stats: ServerStats,
    events: Option<mpsc::UnboundedSender<ServerEvent>>,
}

impl<C: Connector> TimeServer<C> {
    pub fn new(connector: C, clock: Arc<dyn TimeSource>, settings: ServerSettings) -> Self {
        Self {
            connector,
            clock,
            settings,
            commands: CommandTable::standard(),
            state: ConnectionState::Disconnected,
            stats: ServerStats::default(),
            events: None,
        }
    }

    /// Publishes every [`ServerEvent`] on `tx` in addition to logging it.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_commands(mut self, commands: CommandTable) -> Self {
        self.commands = commands;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    /// Runs until `shutdown` becomes `true`.
    ///
    /// Transport failures, including failing to open the device, are retried forever
    /// after `reconnect_delay`. Returns `Ok(())` on shutdown and `Err` only for
    /// non-transport failures such as undecodable input under [`DecodePolicy::Exit`].
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connector.open().await {
                Ok(transport) => {
                    let outcome = self.serve_connection(transport, &mut shutdown).await;
                    match outcome {
                        Ok(()) => break,
                        Err(ServerError::Transport(e)) => self.record_transport_failure(&e),
                        Err(fatal) => return Err(fatal),
                    }
                }
                Err(e) => self.record_transport_failure(&e),
            }

            tracing::warn!(
                "Transport error, retrying in {:?}",
                self.settings.reconnect_delay
            );
            if !pause(self.settings.reconnect_delay, &mut shutdown).await {
                break;
            }
        }

        tracing::info!("Server stopped");
        self.emit(ServerEvent::Stopped);
        Ok(())
    }

    /// Serves one connection and closes it whatever the outcome.
    async fn serve_connection(
        &mut self,
        mut transport: C::Transport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        self.state = ConnectionState::Serving;
        self.stats.connects = self.stats.connects.saturating_add(1);
        let endpoint = self.connector.describe();
        tracing::info!("Time server started on {}. Waiting for requests...", endpoint);
        self.emit(ServerEvent::Started { endpoint });

        let outcome = self.serve(&mut transport, shutdown).await;

        if let Err(e) = transport.close().await {
            tracing::debug!("Error while closing transport: {}", e);
        }
        drop(transport);
        self.state = ConnectionState::Disconnected;
        outcome
    }

    async fn serve(
        &mut self,
        transport: &mut C::Transport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            if let Some(raw) = transport.read_line(self.settings.read_timeout).await? {
                self.handle_line(transport, &raw).await?;
            }
            if !pause(self.settings.poll_interval, shutdown).await {
                return Ok(());
            }
        }
    }

    async fn handle_line(
        &mut self,
        transport: &mut C::Transport,
        raw: &[u8],
    ) -> Result<(), ServerError> {
        let line = match decode_line(raw) {
            Ok(line) => line,
            Err(e) => match self.settings.decode_policy {
                DecodePolicy::Exit => return Err(e.into()),
                DecodePolicy::Skip => {
                    tracing::warn!("Skipping undecodable line: {}", e);
                    self.stats.lines_ignored = self.stats.lines_ignored.saturating_add(1);
                    self.emit(ServerEvent::Ignored(String::from_utf8_lossy(raw).trim().to_string()));
                    return Ok(());
                }
            },
        };
        if line.is_empty() {
            return Ok(());
        }

        let Some(command) = self.commands.lookup(line) else {
            if self.settings.log_unrecognized {
                tracing::debug!("Ignoring unrecognized input: {:?}", line);
            }
            self.stats.lines_ignored = self.stats.lines_ignored.saturating_add(1);
            self.emit(ServerEvent::Ignored(line.to_string()));
            return Ok(());
        };

        let response = command.execute(self.clock.as_ref())?;
        transport.write_all(&response.to_bytes()).await?;
        self.stats.responses_sent = self.stats.responses_sent.saturating_add(1);
        tracing::info!("Sent: {}", response);
        self.emit(ServerEvent::Responded(response));
        Ok(())
    }

    fn record_transport_failure(&mut self, error: &TransportError) {
        self.stats.transport_failures = self.stats.transport_failures.saturating_add(1);
        tracing::warn!("Serial port error: {}", error);
        self.emit(ServerEvent::TransportFailed(error.to_string()));
    }

    fn emit(&self, event: ServerEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

/// Sleeps for `duration` unless shutdown is requested first.
///
/// Returns `false` when the server should stop.
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let delay = sleep(duration);
    tokio::pin!(delay);
    loop {
        tokio::select! {
            _ = &mut delay => return !*shutdown.borrow(),
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => return false,
                Ok(()) => continue,
                Err(_) => {
                    // Sender gone: no shutdown can arrive any more.
                    (&mut delay).await;
                    return true;
                }
            },
        }
    }
}
