//! Serial protocol engine for monome crow.
//!
//! crow speaks a newline-delimited text protocol over USB serial. Incoming
//! bytes flow through four stages:
//!
//! ```text
//! ┌────────┐  bytes  ┌─────────┐ packets ┌─────────┐ lines ┌────────────┐
//! │ serial │ ──────► │ framing │ ──────► │ decoder │ ────► │   router   │ ──► callbacks
//! └────────┘         └─────────┘         └─────────┘       └────────────┘
//!      ▲
//!      └── ConnectionManager: discover, open, read, reconnect
//! ```
//!
//! # Protocol
//!
//! Packets end with `\n\r`. Structured lines carry `^^`-separated
//! subcommands such as `^^stream(1,2.5)`; anything else is free-form output
//! from the Lua REPL on the device.
//!
//! # Usage
//!
//! ```ignore
//! use druid_tui::crow::{
//!     shutdown_channel, ConnectionManager, EventTree, OutputWriter, Pipeline, SerialTransport,
//! };
//!
//! let pipeline = Pipeline::crow(EventTree::new(), |text| print!("{}", text));
//! let writer = OutputWriter::new();
//! let mut manager = ConnectionManager::new(SerialTransport::default(), pipeline, writer.clone());
//! let (trigger, shutdown) = shutdown_channel();
//! tokio::spawn(async move { manager.listen(shutdown).await });
//! writer.write_str("print('hi')\r\n")?;
//! ```

mod connection;
mod framing;
mod parser;
mod router;
mod writer;

use thiserror::Error;

pub use connection::{
    shutdown_channel, ConnectionEvents, ConnectionInfo, ConnectionManager, ConnectionState,
    DisconnectReason, ReconnectPolicy, SerialLink, SerialSettings, SerialTransport, Shutdown,
    ShutdownTrigger, Transport, CROW_PID, CROW_VID, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT,
    DEFAULT_RETRY_DELAY,
};
pub use framing::{decode_packet, DecodeError, LineFramer, Packets, TERMINATOR};
pub use parser::{is_structured, parse_line, Subcommand, SEPARATOR};
pub use router::{
    ChannelHandler, CommandHandler, Dispatch, EventHandler, EventNode, EventTree, LineHandler,
    Pipeline, ResultHandler, ResultOutput,
};
pub use writer::OutputWriter;

/// Errors from talking to the device.
///
/// None of these are fatal to the client: the connection manager turns
/// them into a retry.
#[derive(Debug, Error)]
pub enum CrowError {
    /// No serial port matched the crow USB identity.
    #[error("crow not found")]
    DeviceNotFound,

    /// Serial ports could not be listed.
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),

    /// The port was found but could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    /// No connection is attached to the writer.
    #[error("not connected")]
    NotConnected,

    /// I/O error on an open port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crow_error_display() {
        assert_eq!(CrowError::DeviceNotFound.to_string(), "crow not found");
        assert_eq!(CrowError::NotConnected.to_string(), "not connected");

        let open = CrowError::Open {
            path: "/dev/ttyACM0".to_string(),
            source: serialport::Error::new(serialport::ErrorKind::NoDevice, "gone"),
        };
        assert_eq!(open.to_string(), "failed to open /dev/ttyACM0: gone");
    }

    #[test]
    fn test_crow_error_from_io() {
        let err: CrowError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, CrowError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: pipe");
    }
}
