// src/error.rs - Error taxonomy for the transport, the wire protocol and the serve loop
use thiserror::Error;

/// Failures of the serial link. Every variant is recoverable by reconnecting.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot open serial device '{device}': {source}")]
    Unavailable {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial device closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("received bytes are not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),
    #[error("malformed time response: {0}")]
    Malformed(String),
    #[error("year {0} does not fit the 4-digit timestamp field")]
    YearOutOfRange(i32),
}

/// Errors that end a serve session.
///
/// `Transport` is consumed by the reconnect supervisor; only `Protocol` leaves
/// [`TimeServer::run`](crate::server::TimeServer::run).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
