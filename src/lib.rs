// timekeeper-rs: answers GET_TIME requests from a serial-attached device with the host's local time

pub mod clock;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

pub use clock::{SystemClock, TimeSource};
pub use error::{ProtocolError, ServerError, TransportError};
pub use protocol::{Command, CommandTable, TimeResponse};
pub use server::{ConnectionState, ServerEvent, ServerSettings, ServerStats, TimeServer};
